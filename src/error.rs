use thiserror::Error;

/// Type alias for Result with SyncError
pub type Result<T> = std::result::Result<T, SyncError>;

/// Error types for the mail synchronization engine
#[derive(Error, Debug)]
pub enum SyncError {
    /// Remote API returned an error
    #[error("Remote API error: {0}")]
    ApiError(String),

    /// Authentication failed (missing, invalid or expired token)
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Token is valid but lacks a required scope
    #[error("Insufficient scope: {0}")]
    InsufficientScope(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404)
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Invalid message format or parsing error
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Attachment payload could not be retrieved from the provider
    #[error("Attachment unavailable: {0}")]
    AttachmentUnavailable(String),

    /// Database errors
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Principal is not registered
    #[error("Unknown principal: {0}")]
    UnknownPrincipal(String),

    /// A sync run for this principal is already in flight
    #[error("Sync already in progress for principal {0}")]
    SyncInProgress(i64),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic catch-all error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl SyncError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::RateLimitExceeded { .. }
                | SyncError::ServerError { .. }
                | SyncError::NetworkError(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Check if the error means the principal's credential is unusable.
    ///
    /// Credential failures are terminal for a run and surfaced to the
    /// operator as "reauthentication required".
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            SyncError::AuthError(_) | SyncError::InsufficientScope(_) | SyncError::Forbidden(_)
        )
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(error: rusqlite::Error) -> Self {
        SyncError::StorageError(error.to_string())
    }
}

impl From<rusqlite_migration::Error> for SyncError {
    fn from(error: rusqlite_migration::Error) -> Self {
        SyncError::StorageError(format!("migration failed: {}", error))
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// The Retry-After header can be specified in two formats:
/// 1. Delay-seconds: An integer indicating seconds to wait (e.g., "120")
/// 2. HTTP-date: An HTTP date format (e.g., "Wed, 21 Oct 2015 07:28:00 GMT")
///
/// Returns the number of seconds to wait. If the header is missing or invalid,
/// returns a default of 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    if let Some(retry_after_value) = response.headers().get("retry-after") {
        if let Ok(retry_after_str) = retry_after_value.to_str() {
            // Try to parse as integer (delay-seconds format)
            if let Ok(seconds) = retry_after_str.parse::<u64>() {
                return seconds;
            }

            // Try to parse as HTTP date format
            if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
                let now = std::time::SystemTime::now();
                if let Ok(duration) = http_date.duration_since(now) {
                    return duration.as_secs();
                }
            }
        }
    }

    DEFAULT_RETRY_AFTER
}

impl From<google_gmail1::Error> for SyncError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            // HTTP response with status code (non-success responses)
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    // Rate limiting - transient
                    429 => {
                        let retry_after = parse_retry_after_header(response);
                        SyncError::RateLimitExceeded { retry_after }
                    }
                    // Expired or revoked token
                    401 => SyncError::AuthError(message),
                    // Not found
                    404 => SyncError::MessageNotFound("Resource not found".to_string()),
                    // Bad request
                    400 => SyncError::BadRequest(message),
                    // Forbidden
                    403 => SyncError::Forbidden(message),
                    // Server errors - transient
                    500..=599 => SyncError::ServerError {
                        status: status_code,
                        message,
                    },
                    // Other non-success status codes
                    _ => SyncError::ApiError(message),
                }
            }
            // Token could not be obtained for the call
            google_gmail1::Error::MissingToken(ref err) => {
                SyncError::AuthError(format!("{}", err))
            }
            // BadRequest variant (request not understood by server)
            google_gmail1::Error::BadRequest(ref err) => SyncError::BadRequest(format!("{}", err)),
            // Network/connection errors - transient
            google_gmail1::Error::HttpError(ref err) => {
                SyncError::NetworkError(format!("Connection error: {}", err))
            }
            // IO errors - transient
            google_gmail1::Error::Io(err) => SyncError::NetworkError(err.to_string()),
            // All other errors
            _ => SyncError::ApiError(error.to_string()),
        }
    }
}

/// Map a Drive API error into the sync taxonomy.
///
/// Named helper rather than a From impl: the generated Google API crates
/// share their error type when their common layer lines up, and a second
/// blanket From would collide with the Gmail one.
pub fn drive_error(error: google_drive3::Error) -> SyncError {
    match error {
        google_drive3::Error::Failure(ref response) => {
            let status = response.status();
            let status_code = status.as_u16();
            let message = format!(
                "HTTP {}: {}",
                status_code,
                status.canonical_reason().unwrap_or("Unknown")
            );

            match status_code {
                429 => {
                    let retry_after = parse_retry_after_header(response);
                    SyncError::RateLimitExceeded { retry_after }
                }
                401 => SyncError::AuthError(message),
                404 => SyncError::AttachmentUnavailable("Drive resource not found".to_string()),
                400 => SyncError::BadRequest(message),
                403 => SyncError::Forbidden(message),
                500..=599 => SyncError::ServerError {
                    status: status_code,
                    message,
                },
                _ => SyncError::ApiError(message),
            }
        }
        google_drive3::Error::MissingToken(ref err) => SyncError::AuthError(format!("{}", err)),
        google_drive3::Error::BadRequest(ref err) => SyncError::BadRequest(format!("{}", err)),
        google_drive3::Error::HttpError(ref err) => {
            SyncError::NetworkError(format!("Connection error: {}", err))
        }
        google_drive3::Error::Io(err) => SyncError::NetworkError(err.to_string()),
        _ => SyncError::ApiError(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let rate_limit = SyncError::RateLimitExceeded { retry_after: 5 };
        assert!(rate_limit.is_transient());
        assert!(!rate_limit.is_permanent());

        let server_error = SyncError::ServerError {
            status: 503,
            message: "Service unavailable".to_string(),
        };
        assert!(server_error.is_transient());

        let network_error = SyncError::NetworkError("Connection timeout".to_string());
        assert!(network_error.is_transient());
    }

    #[test]
    fn test_permanent_errors() {
        let bad_request = SyncError::BadRequest("Invalid query".to_string());
        assert!(bad_request.is_permanent());
        assert!(!bad_request.is_transient());

        let not_found = SyncError::MessageNotFound("msg123".to_string());
        assert!(not_found.is_permanent());

        let forbidden = SyncError::Forbidden("Access denied".to_string());
        assert!(forbidden.is_permanent());
    }

    #[test]
    fn test_requires_reauth() {
        assert!(SyncError::AuthError("expired".to_string()).requires_reauth());
        assert!(SyncError::Forbidden("scope".to_string()).requires_reauth());
        assert!(SyncError::InsufficientScope("drive.file".to_string()).requires_reauth());

        assert!(!SyncError::NetworkError("reset".to_string()).requires_reauth());
        assert!(!SyncError::MessageNotFound("msg".to_string()).requires_reauth());
        assert!(!SyncError::SyncInProgress(1).requires_reauth());
    }

    #[test]
    fn test_error_display() {
        let error = SyncError::RateLimitExceeded { retry_after: 10 };
        let display = format!("{}", error);
        assert!(display.contains("Rate limit exceeded"));
        assert!(display.contains("10 seconds"));

        let auth_error = SyncError::AuthError("Invalid token".to_string());
        let display = format!("{}", auth_error);
        assert!(display.contains("Authentication failed"));
    }

    #[test]
    fn test_parse_retry_after_header_integer() {
        let mut response = hyper::Response::builder().status(429).body(()).unwrap();
        response.headers_mut().insert(
            "retry-after",
            hyper::header::HeaderValue::from_static("120"),
        );

        let retry_after = parse_retry_after_header(&response);
        assert_eq!(retry_after, 120);
    }

    #[test]
    fn test_parse_retry_after_header_missing() {
        let response = hyper::Response::builder().status(429).body(()).unwrap();

        let retry_after = parse_retry_after_header(&response);
        assert_eq!(retry_after, 5); // Default value
    }

    #[test]
    fn test_parse_retry_after_header_invalid() {
        let mut response = hyper::Response::builder().status(429).body(()).unwrap();
        response.headers_mut().insert(
            "retry-after",
            hyper::header::HeaderValue::from_static("invalid"),
        );

        let retry_after = parse_retry_after_header(&response);
        assert_eq!(retry_after, 5); // Default value
    }

    #[test]
    fn test_parse_retry_after_header_http_date() {
        let mut response = hyper::Response::builder().status(429).body(()).unwrap();

        // Create a date 60 seconds in the future
        let future_time = std::time::SystemTime::now() + std::time::Duration::from_secs(60);
        let http_date = httpdate::fmt_http_date(future_time);

        response.headers_mut().insert(
            "retry-after",
            hyper::header::HeaderValue::from_str(&http_date).unwrap(),
        );

        let retry_after = parse_retry_after_header(&response);
        assert!(
            (59..=61).contains(&retry_after),
            "Expected ~60, got {}",
            retry_after
        );
    }

    #[test]
    fn test_parse_retry_after_header_past_http_date() {
        let mut response = hyper::Response::builder().status(429).body(()).unwrap();

        let past_time = std::time::SystemTime::now() - std::time::Duration::from_secs(60);
        let http_date = httpdate::fmt_http_date(past_time);

        response.headers_mut().insert(
            "retry-after",
            hyper::header::HeaderValue::from_str(&http_date).unwrap(),
        );

        let retry_after = parse_retry_after_header(&response);
        // Past dates fall back to the default
        assert_eq!(retry_after, 5);
    }

    #[test]
    fn test_storage_error_from_rusqlite() {
        let err: SyncError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, SyncError::StorageError(_)));
        assert!(err.is_permanent());
    }
}
