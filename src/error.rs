//! Error types for fedhost
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.
//! Each variant belongs to one [`ErrorKind`], which is what callers
//! branch on (retry policy, status codes, metrics).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Coarse classification of an [`AppError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Resource, tenant or document absent
    NotFound,
    /// Blocked by a rule or permission mismatch
    Forbidden,
    /// Missing or invalid caller identity
    Unauthorized,
    /// Malformed activity or protocol violation
    BadRequest,
    /// Persistence or unexpected failure
    Internal,
    /// Network failure or timeout; callers may retry
    Transient,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::Unauthorized => "unauthorized",
            Self::BadRequest => "bad_request",
            Self::Internal => "internal",
            Self::Transient => "transient",
        }
    }

    /// HTTP status used when this kind reaches the REST surface
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Internal | Self::Transient => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Access denied (403)
    #[error("Access denied")]
    Forbidden,

    /// Validation error or protocol violation (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network failure or timeout (500, retryable)
    #[error("Transient error: {0}")]
    Transient(String),

    /// Remote server answered with an error status
    #[error("Remote {url} answered HTTP {status}")]
    Remote { url: String, status: u16 },

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    /// Another error with a description of where it happened
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound => ErrorKind::NotFound,
            AppError::Unauthorized => ErrorKind::Unauthorized,
            AppError::Forbidden => ErrorKind::Forbidden,
            AppError::Validation(_) => ErrorKind::BadRequest,
            AppError::Transient(_) => ErrorKind::Transient,
            AppError::Remote { status, .. } if (400..500).contains(status) => ErrorKind::NotFound,
            AppError::Remote { .. } => ErrorKind::Transient,
            AppError::HttpClient(e)
                if e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.is_body()
                    || e.is_decode() =>
            {
                ErrorKind::Transient
            }
            AppError::HttpClient(_) => ErrorKind::Internal,
            AppError::Database(sqlx::Error::RowNotFound) => ErrorKind::NotFound,
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                ErrorKind::Internal
            }
            AppError::Context { source, .. } => source.kind(),
        }
    }

    /// Wrap this error with a description of the failing operation
    pub fn wrap(self, context: impl Into<String>) -> Self {
        AppError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether the caller may retry the operation later
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(format!("Invalid JSON: {}", err))
    }
}

/// Attach context to the error branch of a `Result`
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<AppError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().wrap(context))
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Forbidden, NotFound, BadRequest and Unauthorized keep their status;
    /// everything else is a 500 with the detail withheld from the body.
    fn into_response(self) -> Response {
        use axum::Json;

        let kind = self.kind();
        let status = kind.status_code();
        let error_message = match kind {
            ErrorKind::Internal | ErrorKind::Transient => {
                tracing::error!(error = %self, kind = kind.as_str(), "Request failed");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        crate::metrics::ERRORS_TOTAL
            .with_label_values(&[kind.as_str()])
            .inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_status_classification() {
        let gone = AppError::Remote {
            url: "https://remote.example/users/alice".to_string(),
            status: 410,
        };
        let unavailable = AppError::Remote {
            url: "https://remote.example/users/alice".to_string(),
            status: 503,
        };

        assert_eq!(gone.kind(), ErrorKind::NotFound);
        assert_eq!(unavailable.kind(), ErrorKind::Transient);
        assert!(unavailable.is_transient());
    }

    #[tokio::test]
    async fn truncated_response_body_is_transient() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\n{\"partial\"")
                .await
                .unwrap();
            // Connection drops before the promised body length
        });

        let response = reqwest::get(format!("http://{}/doc", addr)).await.unwrap();
        let error = AppError::from(response.bytes().await.unwrap_err());

        assert_eq!(error.kind(), ErrorKind::Transient);
    }

    #[test]
    fn wrapped_errors_keep_their_kind() {
        let error = AppError::Forbidden
            .wrap("inner step")
            .wrap("outer step");

        assert_eq!(error.kind(), ErrorKind::Forbidden);
        assert_eq!(error.to_string(), "outer step: inner step: Access denied");
    }

    #[test]
    fn status_codes_follow_kind() {
        assert_eq!(
            AppError::Validation("bad".to_string())
                .kind()
                .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Transient("timeout".to_string())
                .kind()
                .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Unauthorized.kind().status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn result_context_wraps_foreign_errors() {
        let parsed: std::result::Result<serde_json::Value, serde_json::Error> =
            serde_json::from_str("{");
        let error = parsed.context("parsing delivery").unwrap_err();

        assert_eq!(error.kind(), ErrorKind::BadRequest);
        assert!(error.to_string().starts_with("parsing delivery: "));
    }
}
