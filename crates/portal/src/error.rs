use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("could not fetch login page: HTTP {status}")]
    LoginPageStatus { status: StatusCode },

    #[error("magic token not found in login page")]
    TokenNotFound,

    #[error("unknown login response (HTTP {status})")]
    UnknownResponse { status: StatusCode },
}
