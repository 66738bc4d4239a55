//! Unary call and reply types.
//!
//! A [`Call`] is what the server hands to the pipeline: the full method name,
//! the metadata sent alongside it, and the raw payload. The pipeline and the
//! handler turn it into a [`Reply`].

use crate::error::CallError;
use crate::status::Code;
use bytes::Bytes;
use http::HeaderMap;
use http::header::HeaderValue;

/// A single unary call.
#[derive(Debug, Clone)]
pub struct Call {
    method: String,
    metadata: HeaderMap,
    payload: Bytes,
}

impl Call {
    /// Creates a call for `method` (`/package.Service/Method`).
    pub fn new(method: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            method: method.into(),
            metadata: HeaderMap::new(),
            payload: payload.into(),
        }
    }

    /// Replaces the call metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: HeaderMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Adds one metadata entry. Invalid values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.metadata.insert(name, value);
        }
        self
    }

    /// Full method name, including the leading slash.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Service part of the method name (`package.Service`).
    pub fn service(&self) -> &str {
        split_method(&self.method).0
    }

    /// Method part of the method name (`Method`).
    pub fn method_name(&self) -> &str {
        split_method(&self.method).1
    }

    /// Call metadata.
    pub const fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    /// Mutable call metadata.
    pub fn metadata_mut(&mut self) -> &mut HeaderMap {
        &mut self.metadata
    }

    /// Returns a metadata value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.metadata.get(name).and_then(|v| v.to_str().ok())
    }

    /// Raw request payload.
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consumes the call, returning its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

fn split_method(method: &str) -> (&str, &str) {
    let trimmed = method.trim_start_matches('/');
    trimmed.rsplit_once('/').unwrap_or(("", trimmed))
}

/// The outcome of a call.
#[derive(Debug, Clone)]
pub struct Reply {
    code: Code,
    message: Option<String>,
    metadata: HeaderMap,
    payload: Bytes,
}

impl Reply {
    /// A successful reply carrying `payload`.
    pub fn ok(payload: impl Into<Bytes>) -> Self {
        Self {
            code: Code::Ok,
            message: None,
            metadata: HeaderMap::new(),
            payload: payload.into(),
        }
    }

    /// A failed reply with the given code and message.
    pub fn error(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            metadata: HeaderMap::new(),
            payload: Bytes::new(),
        }
    }

    /// Status code.
    pub const fn code(&self) -> Code {
        self.code
    }

    /// Returns `true` when the code is [`Code::Ok`].
    pub const fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// Error message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Reply metadata.
    pub const fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    /// Mutable reply metadata.
    pub fn metadata_mut(&mut self) -> &mut HeaderMap {
        &mut self.metadata
    }

    /// Response payload.
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Splits the reply into its parts.
    pub fn into_parts(self) -> (Code, Option<String>, HeaderMap, Bytes) {
        (self.code, self.message, self.metadata, self.payload)
    }
}

impl From<CallError> for Reply {
    fn from(err: CallError) -> Self {
        Self::error(err.code(), err.message().to_string())
    }
}

impl From<Result<Bytes, CallError>> for Reply {
    fn from(result: Result<Bytes, CallError>) -> Self {
        match result {
            Ok(payload) => Self::ok(payload),
            Err(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_split() {
        let call = Call::new("/helloworld.Greeter/SayHello", "{}");
        assert_eq!(call.service(), "helloworld.Greeter");
        assert_eq!(call.method_name(), "SayHello");
    }

    #[test]
    fn test_method_without_service() {
        let call = Call::new("/Ping", "");
        assert_eq!(call.service(), "");
        assert_eq!(call.method_name(), "Ping");
    }

    #[test]
    fn test_header_lookup() {
        let call = Call::new("/a.B/C", "").with_header("authorization", "Bearer t");
        assert_eq!(call.header("authorization"), Some("Bearer t"));
        assert_eq!(call.header("x-missing"), None);
    }

    #[test]
    fn test_reply_from_error() {
        let reply: Reply = CallError::unauthenticated("missing token").into();
        assert_eq!(reply.code(), Code::Unauthenticated);
        assert_eq!(reply.message(), Some("missing token"));
        assert!(reply.payload().is_empty());
    }

    #[test]
    fn test_reply_from_result() {
        let reply: Reply = Ok::<_, CallError>(Bytes::from_static(b"hi")).into();
        assert!(reply.is_ok());
        assert_eq!(reply.payload().as_ref(), b"hi");
    }
}
