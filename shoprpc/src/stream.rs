use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::mpsc;

use crate::{CallHandle, Codec, Context, Error, ErrorKind, Payload, ResponseFrame, Result};

/// Request messages of a client-streaming or bidi call, as seen by the handler.
#[derive(Debug)]
pub struct RequestStream<T> {
    rx: mpsc::Receiver<Payload>,
    codec: Codec,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> RequestStream<T> {
    pub(crate) fn new(rx: mpsc::Receiver<Payload>, codec: Codec) -> Self {
        Self {
            rx,
            codec,
            _marker: PhantomData,
        }
    }

    /// Next request message, or `None` once the client closed its side.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the message is not a `T`.
    pub async fn message(&mut self) -> Result<Option<T>> {
        match self.rx.recv().await {
            Some(payload) => self.codec.decode(&payload).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) async fn single(mut self) -> Result<T> {
        self.message().await?.ok_or_else(|| {
            Error::new(ErrorKind::InvalidArgument, "missing request message")
        })
    }
}

/// Response side of a server-streaming or bidi call, as seen by the handler.
///
/// Messages arrive at the client in the order they were sent.
#[derive(Debug)]
pub struct ResponseSink<T> {
    tx: mpsc::Sender<ResponseFrame>,
    ctx: Context,
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for ResponseSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            ctx: self.ctx.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Serialize> ResponseSink<T> {
    pub(crate) fn new(tx: mpsc::Sender<ResponseFrame>, ctx: Context) -> Self {
        Self {
            tx,
            ctx,
            _marker: PhantomData,
        }
    }

    /// Sends one response message, waiting while the client's queue is full.
    ///
    /// # Errors
    ///
    /// Fails with `Cancelled` or `DeadlineExceeded` once the call is over,
    /// and with an encode error if `value` cannot be serialized.
    pub async fn send(&self, value: &T) -> Result<()> {
        self.ctx.check()?;
        if !self.ctx.handle().is_active() {
            return Err(Error::new(
                ErrorKind::FailedPrecondition,
                "call already completed",
            ));
        }
        let payload = self.ctx.codec().encode(value)?;
        self.tx
            .send(ResponseFrame::Message(payload))
            .await
            .map_err(|_| Error::new(ErrorKind::Cancelled, "client went away"))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || !self.ctx.handle().is_active()
    }
}

/// Request side of a client-streaming or bidi call, as seen by the caller.
///
/// Dropping the sink, or calling [`RequestSink::close`], ends the request
/// stream.
#[derive(Debug)]
pub struct RequestSink<T> {
    tx: mpsc::Sender<Payload>,
    codec: Codec,
    handle: CallHandle,
    _marker: PhantomData<fn(T)>,
}

impl<T: Serialize> RequestSink<T> {
    pub(crate) fn new(tx: mpsc::Sender<Payload>, codec: Codec, handle: CallHandle) -> Self {
        Self {
            tx,
            codec,
            handle,
            _marker: PhantomData,
        }
    }

    fn closed_error(&self) -> Error {
        self.handle
            .terminal_error()
            .unwrap_or_else(|| Error::new(ErrorKind::FailedPrecondition, "call already completed"))
    }

    /// # Errors
    ///
    /// Fails once the call is over, or if `value` cannot be encoded.
    pub async fn send(&self, value: &T) -> Result<()> {
        let payload = self.codec.encode(value)?;
        if !self.handle.is_active() {
            return Err(self.closed_error());
        }
        self.tx.send(payload).await.map_err(|_| self.closed_error())
    }

    /// Blocking flavor of [`RequestSink::send`]; must not be called from
    /// inside an async runtime.
    ///
    /// # Errors
    ///
    /// Same as [`RequestSink::send`].
    pub fn blocking_send(&self, value: &T) -> Result<()> {
        let payload = self.codec.encode(value)?;
        if !self.handle.is_active() {
            return Err(self.closed_error());
        }
        self.tx.blocking_send(payload).map_err(|_| self.closed_error())
    }

    pub(crate) fn send_last(self, payload: Payload) -> Result<()> {
        self.tx.try_send(payload).map_err(|_| self.closed_error())
    }

    /// Ends the request stream; the server sees no more messages.
    pub fn close(self) {}

    /// Cancels the whole call. Returns `false` if it had already ended.
    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    #[must_use]
    pub fn call_handle(&self) -> &CallHandle {
        &self.handle
    }
}

/// Response messages of a call, as seen by the caller.
///
/// Dropping the stream before the call ended cancels the call.
#[derive(Debug)]
pub struct ResponseStream<T> {
    rx: mpsc::Receiver<ResponseFrame>,
    codec: Codec,
    handle: CallHandle,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> ResponseStream<T> {
    pub(crate) fn new(rx: mpsc::Receiver<ResponseFrame>, codec: Codec, handle: CallHandle) -> Self {
        Self {
            rx,
            codec,
            handle,
            done: false,
            _marker: PhantomData,
        }
    }

    fn on_frame(&mut self, frame: Option<ResponseFrame>) -> Result<Option<T>> {
        match frame {
            Some(ResponseFrame::Message(payload)) => match self.codec.decode(&payload) {
                Ok(value) => Ok(Some(value)),
                Err(error) => {
                    self.done = true;
                    self.handle.cancel();
                    Err(error)
                }
            },
            Some(ResponseFrame::End) => {
                self.done = true;
                Ok(None)
            }
            Some(ResponseFrame::Error(error)) => {
                self.done = true;
                Err(error)
            }
            None => {
                self.done = true;
                Err(self.handle.terminal_error().unwrap_or_else(|| {
                    Error::new(ErrorKind::Unavailable, "call closed before it ended")
                }))
            }
        }
    }

    /// Next response message, or `None` once the call completed successfully.
    ///
    /// # Errors
    ///
    /// Returns the error the call ended with. No message follows an error.
    pub async fn message(&mut self) -> Result<Option<T>> {
        if self.done {
            return Ok(None);
        }
        let frame = self.rx.recv().await;
        self.on_frame(frame)
    }

    /// Blocking flavor of [`ResponseStream::message`]; parks the calling
    /// thread until a message arrives. Must not be called from inside an async
    /// runtime.
    ///
    /// # Errors
    ///
    /// Same as [`ResponseStream::message`].
    pub fn blocking_message(&mut self) -> Result<Option<T>> {
        if self.done {
            return Ok(None);
        }
        let frame = self.rx.blocking_recv();
        self.on_frame(frame)
    }

    pub(crate) async fn single(mut self) -> Result<T> {
        self.message().await?.ok_or_else(|| {
            Error::new(ErrorKind::Internal, "call completed without a response")
        })
    }

    /// Cancels the call. Returns `false` if it had already ended.
    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    #[must_use]
    pub fn call_handle(&self) -> &CallHandle {
        &self.handle
    }

    #[must_use]
    pub fn into_blocking(self) -> BlockingResponseStream<T> {
        BlockingResponseStream { inner: self }
    }
}

impl<T> Drop for ResponseStream<T> {
    fn drop(&mut self) {
        if !self.done {
            self.handle.cancel();
        }
    }
}

/// Lazily consumed, blocking sequence of response messages.
///
/// Ends after the last message or after the first error.
#[derive(Debug)]
pub struct BlockingResponseStream<T> {
    inner: ResponseStream<T>,
}

impl<T> BlockingResponseStream<T> {
    pub fn cancel(&self) -> bool {
        self.inner.handle.cancel()
    }
}

impl<T: DeserializeOwned> Iterator for BlockingResponseStream<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.blocking_message().transpose()
    }
}
