use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error codes shared by every uRPC client and server.
pub mod codes {
    /// The input or output did not match the schema.
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    /// The client gave up waiting for a response.
    pub const REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";
    /// Anything else: handler failures, panics, transport errors.
    pub const INTERNAL: &str = "INTERNAL";
    /// No handler is registered for the requested operation.
    pub const UNKNOWN_OPERATION: &str = "UNKNOWN_OPERATION";
    /// A stream event exceeded the client's size limit.
    pub const MESSAGE_TOO_LARGE: &str = "MESSAGE_TOO_LARGE";
}

/// The `error` member of a failed response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    pub code:     String,
    pub message:  String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details:  Option<Value>,
}

impl RpcError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code:     code.into(),
            message:  message.into(),
            category: None,
            details:  None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(codes::VALIDATION_ERROR, message).with_category("ValidationError")
    }

    pub fn timeout(attempt: u32) -> Self {
        Self::new(codes::REQUEST_TIMEOUT, "Request timeout")
            .with_category("TimeoutError")
            .with_details(serde_json::json!({ "attempt": attempt }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL, message)
    }

    pub fn unknown_operation(rpc_name: &str, operation: &str) -> Self {
        Self::new(
            codes::UNKNOWN_OPERATION,
            format!("{}.{} is not a registered operation", rpc_name, operation),
        )
        .with_details(serde_json::json!({ "rpc": rpc_name, "operation": operation }))
    }

    pub fn message_too_large(limit: usize) -> Self {
        Self::new(codes::MESSAGE_TOO_LARGE, format!("stream message exceeds {} bytes", limit))
            .with_category("ProtocolError")
            .with_details(serde_json::json!({ "maxMessageSize": limit }))
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}

impl From<http::Error> for RpcError {
    fn from(err: http::Error) -> Self {
        RpcError::validation(format!("invalid header: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_json_shape() {
        let err = RpcError::new("NOT_FOUND", "user not found");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!({ "code": "NOT_FOUND", "message": "user not found" })
        );

        let timeout = RpcError::timeout(2);
        assert!(timeout.is(codes::REQUEST_TIMEOUT));
        assert_eq!(timeout.details, Some(serde_json::json!({ "attempt": 2 })));
        assert_eq!(timeout.to_string(), "REQUEST_TIMEOUT: Request timeout");
    }

    #[test]
    fn test_invalid_header_is_a_validation_error() {
        let mut headers = crate::headers::Headers::new();
        let err: RpcError = headers.insert("bad header", "v").unwrap_err().into();
        assert!(err.is(codes::VALIDATION_ERROR));
        assert!(err.message.starts_with("invalid header"), "{}", err.message);
    }
}
