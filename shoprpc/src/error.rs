use serde::{Deserialize, Serialize};

use crate::MethodDescriptor;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Cancelled,
    DeadlineExceeded,
    Unimplemented,
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    ResourceExhausted,
    Unavailable,
    Internal,
    SerializeFailed,
    DeserializeFailed,
    SerdeJsonError,
    #[serde(untagged)]
    Unknown(String),
}

impl ErrorKind {
    /// Whether a caller may reasonably issue the same call again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Unavailable | ErrorKind::DeadlineExceeded | ErrorKind::ResourceExhausted
        )
    }

    /// Whether the call ended because it was cancelled or ran out of time,
    /// rather than because the handler failed.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ErrorKind::Cancelled | ErrorKind::DeadlineExceeded)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub msg: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    #[must_use]
    pub fn kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            msg: String::default(),
        }
    }

    /// The response of every service operation that has no handler.
    #[must_use]
    pub fn unimplemented(method: &MethodDescriptor) -> Self {
        Self::new(
            ErrorKind::Unimplemented,
            format!("method {} is not implemented", method.full_name()),
        )
    }

    /// The error reported to callers when the server side aborted a call.
    /// Details stay in the server log.
    #[must_use]
    pub fn internal() -> Self {
        Self::new(ErrorKind::Internal, "internal error")
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::kind(kind)
    }
}

/// Maps foreign errors onto a kind, keeping their text as the message.
macro_rules! error_conversions {
    ($($source:ty => $kind:ident,)*) => {
        $(
            impl From<$source> for Error {
                fn from(source: $source) -> Self {
                    Self::new(ErrorKind::$kind, source.to_string())
                }
            }
        )*
    };
}

error_conversions! {
    std::num::TryFromIntError => InvalidArgument,
    serde_json::Error => SerdeJsonError,
    rmp_serde::encode::Error => SerializeFailed,
    rmp_serde::decode::Error => DeserializeFailed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.kind, f)?;
        match self.msg.as_str() {
            "" => Ok(()),
            msg => write!(f, ": {msg}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        let kind = ErrorKind::DeadlineExceeded;
        let error: Error = kind.into();
        assert_eq!(error.to_string(), "DeadlineExceeded");

        let error = Error::new(ErrorKind::NotFound, "no product with id p9");
        assert_eq!(error.to_string(), "NotFound: no product with id p9");

        let error: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(error.kind, ErrorKind::SerdeJsonError);

        let error: Error = u8::try_from(300u32).unwrap_err().into();
        assert_eq!(error.kind, ErrorKind::InvalidArgument);
        assert!(error.to_string().starts_with("InvalidArgument: "));
    }

    #[test]
    fn test_error_classification() {
        assert!(ErrorKind::Unavailable.is_retryable());
        assert!(!ErrorKind::Unimplemented.is_retryable());
        assert!(ErrorKind::Cancelled.is_cancellation());
        assert!(ErrorKind::DeadlineExceeded.is_cancellation());
        assert!(!ErrorKind::Internal.is_cancellation());
    }

    #[test]
    fn test_error_serde() {
        let error = Error::new(ErrorKind::Unimplemented, "nope");
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(serde_json::from_str::<Error>(&json).unwrap(), error);

        let unknown: ErrorKind = serde_json::from_str("\"Teapot\"").unwrap();
        assert_eq!(unknown, ErrorKind::Unknown("Teapot".into()));
    }
}
