use portal_client::PortalError;

#[derive(Debug, thiserror::Error)]
pub enum KeeperError {
    #[error("credentials not configured")]
    CredentialsMissing,

    #[error("failed to read stored credentials: {reason}")]
    CredentialsUnreadable { reason: String },

    #[error("invalid credentials")]
    CredentialsRejected,

    #[error("{source}")]
    Portal {
        #[from]
        source: PortalError,
    },

    #[error("network unreachable")]
    NetworkDown,

    #[error("state store error: {source}")]
    Store {
        #[from]
        source: std::io::Error,
    },

    #[error("state store corrupt: {reason}")]
    StoreCorrupt { reason: String },

    #[error("keeper task stopped")]
    Shutdown,
}

impl KeeperError {
    /// Terminal states caused by the credential set itself; never retried on
    /// the backoff schedule, cleared only by a credential change.
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            Self::CredentialsMissing | Self::CredentialsUnreadable { .. } | Self::CredentialsRejected
        )
    }
}
