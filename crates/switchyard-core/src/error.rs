use http::StatusCode;

/// Trait for domain errors that can be converted to HTTP responses
///
/// The server layer renders these as JSON error bodies so the domain
/// crates never depend on axum types.
pub trait HttpError: std::error::Error {
    /// HTTP status code for this error
    fn status_code(&self) -> StatusCode;

    /// Machine-readable error type (e.g. `invalid_request_error`)
    fn error_type(&self) -> &str;

    /// Optional machine-readable code (e.g. `responses_empty_output`)
    fn error_code(&self) -> Option<String> {
        None
    }

    /// Message safe to expose to API consumers
    fn client_message(&self) -> String;
}
