use bytes::{Bytes, BytesMut};

use crate::Error;

/// An encoded message travelling through a call.
///
/// An empty body decodes as a null value, so `()` requests cost nothing to
/// send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Payload(Bytes);

impl Payload {
    pub const EMPTY: Payload = Payload(Bytes::new());

    #[must_use]
    pub const fn from_static(body: &'static [u8]) -> Self {
        Self(Bytes::from_static(body))
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.0
    }
}

impl std::ops::Deref for Payload {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Bytes> for Payload {
    fn from(body: Bytes) -> Self {
        Self(body)
    }
}

impl From<BytesMut> for Payload {
    fn from(body: BytesMut) -> Self {
        Self(body.freeze())
    }
}

impl From<Payload> for Bytes {
    fn from(payload: Payload) -> Self {
        payload.0
    }
}

/// One item on the response side of a call.
///
/// A call ends with exactly one `End` or `Error`; nothing after it is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseFrame {
    Message(Payload),
    End,
    Error(Error),
}

impl ResponseFrame {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResponseFrame::Message(_))
    }
}

impl From<Error> for ResponseFrame {
    fn from(error: Error) -> Self {
        ResponseFrame::Error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_payload() {
        assert!(Payload::EMPTY.is_empty());
        assert_eq!(Payload::default(), Payload::EMPTY);

        let payload = Payload::from(BytesMut::from(&b"[1,2]"[..]));
        assert_eq!(&payload[..], b"[1,2]");
        assert_eq!(payload, Payload::from_static(b"[1,2]"));
        assert_eq!(Bytes::from(payload), Bytes::from_static(b"[1,2]"));
    }

    #[test]
    fn test_response_frame() {
        assert!(!ResponseFrame::Message(Payload::EMPTY).is_terminal());
        assert!(ResponseFrame::End.is_terminal());
        let frame = ResponseFrame::from(Error::from(ErrorKind::Internal));
        assert!(frame.is_terminal());
    }
}
