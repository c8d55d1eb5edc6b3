use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// I/O-level failures (connect, read, reset) that a fresh attempt may cure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::Connection(_) | BridgeError::Timeout(_) | BridgeError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BridgeError::Timeout("read".into()).is_transient());
        assert!(BridgeError::Connection("refused".into()).is_transient());
        assert!(BridgeError::Io(std::io::Error::other("reset")).is_transient());
        assert!(!BridgeError::OperationFailed("bad url".into()).is_transient());
        assert!(!BridgeError::NotAvailable("http".into()).is_transient());
    }
}
