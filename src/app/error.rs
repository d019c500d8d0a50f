use core::fmt;
use core::fmt::Debug;

use coap_lite::ResponseType;

/// Error type which can be converted to an error response as a convenience for allowing
/// Rust's `?` operator to work naturally in handler code without violating the protocol by
/// failing to respond to requests.
#[derive(Debug, Clone)]
pub struct CoapError {
    pub code: Option<ResponseType>,
    pub message: String,
}

impl CoapError {
    pub fn internal(msg: impl ToString) -> Self {
        Self::for_code(ResponseType::InternalServerError, msg)
    }

    pub fn bad_request(msg: impl ToString) -> Self {
        Self::for_code(ResponseType::BadRequest, msg)
    }

    pub fn not_found() -> Self {
        Self::for_code(ResponseType::NotFound, "Not found")
    }

    pub fn method_not_allowed() -> Self {
        Self::for_code(ResponseType::MethodNotAllowed, "Method not allowed")
    }

    /// The resource exists but its permission mask excludes the requested method.
    pub fn permission_denied() -> Self {
        Self::for_code(ResponseType::MethodNotAllowed, "Permission denied")
    }

    /// None of the representations the peer will accept is one the resource can produce.
    pub fn content_negotiation_failed() -> Self {
        Self::for_code(
            ResponseType::UnsupportedContentFormat,
            "Unsupported content format",
        )
    }

    pub fn for_code(code: ResponseType, msg: impl ToString) -> Self {
        Self {
            code: Some(code),
            message: msg.to_string(),
        }
    }

    pub fn response_code(&self) -> ResponseType {
        self.code.unwrap_or(ResponseType::InternalServerError)
    }
}

impl fmt::Display for CoapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handling error {:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for CoapError {}
