use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns `true` for failures a later caller action may not hit again
    /// (server-side errors, throttling, broken connections).
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Http { status, .. } => *status >= 500 || *status == 429,
            BridgeError::Io(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
