use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "portal-keeper",
    version,
    about = "Keeps a campus captive-portal Wi-Fi session logged in, unattended"
)]
pub struct Args {
    /// Path to the TOML config file (defaults to the platform config dir).
    #[arg(short, long, global = true, env = "PORTAL_KEEPER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory for the state document and credential key file.
    #[arg(long, global = true, env = "PORTAL_KEEPER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the keeper daemon: periodic connectivity checks and auto-login.
    Run,

    /// Attempt one login right now and report the outcome.
    Login,

    /// Show the current session state.
    Status {
        /// Emit the state document as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Pause automatic checks and logins.
    Pause,

    /// Resume automatic checks and logins.
    Resume,

    /// Store portal credentials (encrypted at rest).
    SetCredentials {
        /// Portal username; prompted for when omitted.
        #[arg(long)]
        username: Option<String>,
    },

    /// Remove the stored credentials.
    ClearCredentials,
}
