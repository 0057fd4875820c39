//! API Error Types

use thiserror::Error;

/// Errors that stop the HTTP server
#[derive(Error, Debug)]
pub enum ApiError {
    /// Binding or accepting failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let api_err: ApiError = io_err.into();
        assert!(matches!(api_err, ApiError::Io(_)));
        assert_eq!(api_err.to_string(), "IO error: port taken");
    }
}
