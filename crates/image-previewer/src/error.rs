//! Error types for the image previewer

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::fmt;

/// Errors that stop the service from starting or serving
#[derive(Debug)]
pub enum PreviewerError {
    Io(Box<std::io::Error>),
    Config(String),
}

impl fmt::Display for PreviewerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreviewerError::Io(err) => write!(f, "IO error: {}", err),
            PreviewerError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for PreviewerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PreviewerError::Io(err) => Some(err.as_ref()),
            PreviewerError::Config(_) => None,
        }
    }
}

impl From<std::io::Error> for PreviewerError {
    fn from(err: std::io::Error) -> Self {
        PreviewerError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for PreviewerError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        PreviewerError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PreviewerError>;

/// Errors from fetching the source image
#[derive(Debug)]
pub enum FetchError {
    /// The source URL could not be turned into a request
    InvalidUrl(String),
    /// DNS, connect, TLS or body read failure
    Network(Box<reqwest::Error>),
    /// The source body is larger than the configured limit
    TooLarge { limit: usize },
    /// The request was cancelled before the body arrived
    Cancelled,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::InvalidUrl(url) => write!(f, "Invalid source URL: {}", url),
            FetchError::Network(err) => write!(f, "Network error: {}", err),
            FetchError::TooLarge { limit } => {
                write!(f, "Source image exceeds {} bytes", limit)
            }
            FetchError::Cancelled => write!(f, "Fetch cancelled"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Network(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            let url = err.url().map(|u| u.to_string()).unwrap_or_default();
            FetchError::InvalidUrl(url)
        } else {
            FetchError::Network(Box::new(err))
        }
    }
}

/// Errors from validating or resizing an image
#[derive(Debug)]
pub enum TransformError {
    /// The bytes are not a raster image this build can decode
    InvalidImage(String),
    Decode(image::ImageError),
    Encode(image::ImageError),
    /// The resize task panicked or was aborted
    Task(String),
    Cancelled,
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::InvalidImage(msg) => write!(f, "Invalid image: {}", msg),
            TransformError::Decode(err) => write!(f, "Failed to decode image: {}", err),
            TransformError::Encode(err) => write!(f, "Failed to encode image: {}", err),
            TransformError::Task(msg) => write!(f, "Resize task failed: {}", msg),
            TransformError::Cancelled => write!(f, "Resize cancelled"),
        }
    }
}

impl std::error::Error for TransformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransformError::Decode(err) | TransformError::Encode(err) => Some(err),
            _ => None,
        }
    }
}

/// Outcome of a failed `/fill` request, one variant per response kind
#[derive(Debug)]
pub enum PipelineError {
    BadRequest(String),
    BadGateway(String),
    /// The upstream answered with a non-2xx status; mirrored to the client
    UpstreamStatus {
        status: StatusCode,
        content_type: Option<String>,
        body: Bytes,
    },
    Internal(String),
    /// The client went away or the request was cancelled
    Cancelled,
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::BadRequest(_) => StatusCode::BAD_REQUEST,
            PipelineError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            PipelineError::UpstreamStatus { status, .. } => *status,
            PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::Cancelled => client_closed_request(),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            PipelineError::BadGateway(msg) => write!(f, "Bad gateway: {}", msg),
            PipelineError::UpstreamStatus { status, .. } => {
                write!(f, "Upstream responded with {}", status)
            }
            PipelineError::Internal(msg) => write!(f, "Internal error: {}", msg),
            PipelineError::Cancelled => write!(f, "Request cancelled"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<FetchError> for PipelineError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidUrl(_) => PipelineError::BadRequest(err.to_string()),
            FetchError::Network(_) => PipelineError::BadGateway("Failed to fetch image".into()),
            FetchError::TooLarge { .. } => PipelineError::BadRequest(err.to_string()),
            FetchError::Cancelled => PipelineError::Cancelled,
        }
    }
}

impl From<TransformError> for PipelineError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::InvalidImage(_) => {
                PipelineError::BadRequest("Fetched file is not an image".into())
            }
            TransformError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Internal(format!("Failed to save image to cache: {}", err))
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            PipelineError::BadRequest(msg) | PipelineError::BadGateway(msg) => msg,
            PipelineError::UpstreamStatus {
                status,
                content_type,
                body,
            } => {
                let mut builder = Response::builder().status(status);
                if let Some(content_type) = content_type {
                    builder = builder.header(header::CONTENT_TYPE, content_type);
                }
                return builder
                    .body(Body::from(body))
                    .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response());
            }
            PipelineError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                "Internal server error".into()
            }
            PipelineError::Cancelled => return status.into_response(),
        };

        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}

/// Non-standard 499, used for a request whose client is already gone
fn client_closed_request() -> StatusCode {
    StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_config_error_display() {
        let err = PreviewerError::Config("bad PORT".to_string());
        assert_eq!(format!("{}", err), "Configuration error: bad PORT");
    }

    #[test]
    fn test_server_io_error_converts_to_io_variant() {
        let bind: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            "address in use",
        ));
        let err = bind.map_err(PreviewerError::from).unwrap_err();

        assert!(matches!(err, PreviewerError::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "IO error: address in use");
    }

    #[test]
    fn test_transform_errors_map_to_pipeline_kinds() {
        let invalid: PipelineError = TransformError::InvalidImage("text/plain".into()).into();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let cancelled: PipelineError = TransformError::Cancelled.into();
        assert!(matches!(cancelled, PipelineError::Cancelled));

        let task: PipelineError = TransformError::Task("panicked".into()).into();
        assert_eq!(task.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_fetch_errors_map_to_pipeline_kinds() {
        let cancelled: PipelineError = FetchError::Cancelled.into();
        assert!(matches!(cancelled, PipelineError::Cancelled));

        let invalid: PipelineError = FetchError::InvalidUrl("http://".into()).into();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let too_large: PipelineError = FetchError::TooLarge { limit: 1024 }.into();
        assert_eq!(too_large.status(), StatusCode::BAD_REQUEST);
        assert!(too_large.to_string().contains("1024"));
    }

    #[test]
    fn test_io_error_is_internal() {
        let err: PipelineError = std::io::Error::other("disk full").into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn test_bad_request_response() {
        let response = PipelineError::BadRequest("invalid width".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid width");
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let response = PipelineError::Internal("disk full at /var/cache".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Internal server error");
    }

    #[tokio::test]
    async fn test_upstream_status_is_mirrored() {
        let response = PipelineError::UpstreamStatus {
            status: StatusCode::NOT_FOUND,
            content_type: Some("text/plain".into()),
            body: Bytes::from_static(b"no such image"),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"no such image");
    }

    #[test]
    fn test_cancelled_status() {
        assert_eq!(PipelineError::Cancelled.status().as_u16(), 499);
    }
}
