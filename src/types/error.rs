//! Error taxonomy for the Teller gateway
//!
//! Every fallible path in the crate funnels into [`TellerError`] so the HTTP
//! layer can map failures onto status codes in exactly one place. Upstream
//! error text never reaches API clients: [`TellerError::user_message`] returns
//! the sanitized copy we are willing to show, and the raw detail stays in the
//! server-side logs.

use hyper::StatusCode;

pub type Result<T> = std::result::Result<T, TellerError>;

#[derive(Debug, thiserror::Error)]
pub enum TellerError {
    /// Malformed or out-of-range caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or unusable caller identity.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The referenced connection, account, or snapshot does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The institution rejected the stored credentials. Retrying cannot help;
    /// the user has to re-enter them.
    #[error("terminal credential failure: {0}")]
    TerminalCredential(String),

    /// Every scrape attempt failed with a retryable error.
    #[error("provider retries exhausted after {attempts} attempts")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<TellerError>,
    },

    /// The provider answered but is momentarily unable to serve us.
    #[error("provider unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The provider answered with something we do not recognize.
    #[error("unrecognized provider response: {0}")]
    UnknownUpstream(String),

    /// Credential sealing or unsealing failed.
    #[error("credential encryption error: {0}")]
    Encryption(String),

    /// The provider call succeeded but persisting its results did not.
    #[error("persistence error after successful provider call: {0}")]
    Persistence(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TellerError {
    /// HTTP status code this error maps to at the API boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            TellerError::Validation(_) => StatusCode::BAD_REQUEST,
            TellerError::Auth(_) => StatusCode::UNAUTHORIZED,
            TellerError::NotFound(_) => StatusCode::NOT_FOUND,
            TellerError::TerminalCredential(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TellerError::RetryExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            TellerError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            TellerError::UnknownUpstream(_) => StatusCode::BAD_GATEWAY,
            TellerError::Encryption(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TellerError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TellerError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            TellerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TellerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for API clients to branch on.
    pub fn code(&self) -> &'static str {
        match self {
            TellerError::Validation(_) => "validation",
            TellerError::Auth(_) => "auth",
            TellerError::NotFound(_) => "not_found",
            TellerError::TerminalCredential(_) => "credentials_rejected",
            TellerError::RetryExhausted { .. } => "retries_exhausted",
            TellerError::UpstreamUnavailable(_) => "provider_unavailable",
            TellerError::UnknownUpstream(_) => "provider_unrecognized",
            TellerError::Encryption(_) => "credential_store",
            TellerError::Persistence(_) => "persistence",
            TellerError::Database(_) => "database",
            TellerError::Config(_) => "config",
            TellerError::Internal(_) => "internal",
        }
    }

    /// Copy safe to hand to API clients. Validation and lookup failures echo
    /// their message; everything touching upstreams or secrets gets a fixed
    /// phrase so institution error text and credential details never leak.
    pub fn user_message(&self) -> String {
        match self {
            TellerError::Validation(msg) => msg.clone(),
            TellerError::Auth(_) => "authentication required".to_string(),
            TellerError::NotFound(msg) => msg.clone(),
            TellerError::TerminalCredential(_) => {
                "The institution rejected the stored credentials. Please reconnect and enter them again.".to_string()
            }
            TellerError::RetryExhausted { .. } | TellerError::UpstreamUnavailable(_) => {
                "The provider is temporarily unavailable. Please try again later.".to_string()
            }
            TellerError::UnknownUpstream(_) => {
                "The provider returned an unexpected response. Please try again later.".to_string()
            }
            TellerError::Encryption(_) => {
                "Stored credentials could not be read. Please reconnect this institution.".to_string()
            }
            TellerError::Persistence(_) => {
                "The provider call succeeded but saving its data failed. A later sync will recover.".to_string()
            }
            TellerError::Database(_)
            | TellerError::Config(_)
            | TellerError::Internal(_) => "internal error".to_string(),
        }
    }
}

impl From<std::io::Error> for TellerError {
    fn from(err: std::io::Error) -> Self {
        TellerError::Internal(format!("io error: {}", err))
    }
}

impl From<serde_json::Error> for TellerError {
    fn from(err: serde_json::Error) -> Self {
        TellerError::Validation(format!("invalid JSON: {}", err))
    }
}

impl From<hyper::Error> for TellerError {
    fn from(err: hyper::Error) -> Self {
        TellerError::Internal(format!("http error: {}", err))
    }
}

impl From<mongodb::error::Error> for TellerError {
    fn from(err: mongodb::error::Error) -> Self {
        TellerError::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for TellerError {
    fn from(err: bson::ser::Error) -> Self {
        TellerError::Database(format!("bson encode error: {}", err))
    }
}

impl From<bson::de::Error> for TellerError {
    fn from(err: bson::de::Error) -> Self {
        TellerError::Database(format!("bson decode error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_class() {
        assert_eq!(
            TellerError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            TellerError::TerminalCredential("invalid password".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            TellerError::UnknownUpstream("weird payload".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        let exhausted = TellerError::RetryExhausted {
            attempts: 3,
            last: Box::new(TellerError::UpstreamUnavailable("RATE_LIMITED".into())),
        };
        assert_eq!(exhausted.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn user_messages_never_echo_upstream_text() {
        let err = TellerError::RetryExhausted {
            attempts: 3,
            last: Box::new(TellerError::UpstreamUnavailable(
                "institution says: balance only visible after fee payment".into(),
            )),
        };
        assert!(!err.user_message().contains("fee payment"));

        let terminal = TellerError::TerminalCredential("INVALID_PASSWORD from upstream".into());
        assert!(!terminal.user_message().contains("INVALID_PASSWORD"));
    }

    #[test]
    fn retry_exhausted_keeps_last_error_as_source() {
        let err = TellerError::RetryExhausted {
            attempts: 2,
            last: Box::new(TellerError::UpstreamUnavailable("TIMEOUT".into())),
        };
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("TIMEOUT"));
    }
}
