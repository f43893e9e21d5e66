use hyper::StatusCode;
use thiserror::Error;

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Service definition not found: {0}")]
    ServiceDefinitionNotFound(String),

    #[error("No rule matched path: {0}")]
    PathNoMatched(String),

    #[error("No service instance available: {0}")]
    ServiceInstanceNotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("IP in blacklist: {0}")]
    Blacklist(String),

    #[error("IP not in whitelist: {0}")]
    Whitelist(String),

    #[error("Backend call failed: {0}")]
    HttpResponseError(#[from] HttpClientError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl GatewayError {
    /// HTTP status carried by the client-visible error response
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::ServiceDefinitionNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::PathNoMatched(_) => StatusCode::NOT_FOUND,
            GatewayError::ServiceInstanceNotFound(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Blacklist(_) => StatusCode::FORBIDDEN,
            GatewayError::Whitelist(_) => StatusCode::FORBIDDEN,
            GatewayError::HttpResponseError(_) => StatusCode::BAD_GATEWAY,
            GatewayError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code carried in the JSON body
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::ServiceDefinitionNotFound(_) => "SERVICE_DEFINITION_NOT_FOUND",
            GatewayError::PathNoMatched(_) => "PATH_NO_MATCHED",
            GatewayError::ServiceInstanceNotFound(_) => "SERVICE_INSTANCE_NOT_FOUND",
            GatewayError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            GatewayError::Blacklist(_) => "BLACKLIST",
            GatewayError::Whitelist(_) => "WHITELIST",
            GatewayError::HttpResponseError(_) => "HTTP_RESPONSE_ERROR",
            GatewayError::ConfigError(_) => "CONFIG_ERROR",
            GatewayError::InvalidRequest(_) => "INVALID_REQUEST",
            GatewayError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Client-visible message. Transport and internal causes are summarized
    /// so backend detail never reaches the client; the raw error goes to the
    /// logs instead.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::HttpResponseError(e) => e.client_message().to_string(),
            GatewayError::ConfigError(_) => "gateway configuration error".to_string(),
            GatewayError::InternalError(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Backend HTTP client errors, kept as discrete variants so the circuit
/// breaker result filter and the error mapper can tell them apart.
#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("connect error: {0}")]
    Connect(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("request timeout after {0}ms")]
    Timeout(u64),
}

impl HttpClientError {
    fn client_message(&self) -> &'static str {
        match self {
            HttpClientError::Connect(_) => "backend connect error",
            HttpClientError::Read(_) => "backend read error",
            HttpClientError::Timeout(_) => "backend request timeout",
        }
    }
}

/// Configuration specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}
