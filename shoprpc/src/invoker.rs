use std::{
    future::Future,
    marker::PhantomData,
    pin::Pin,
    task::{Context as TaskContext, Poll},
    time::Duration,
};

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{mpsc, oneshot};

use crate::{
    BlockingResponseStream, CallHandle, CallOptions, Channel, ClientCall, Codec, Error, ErrorKind,
    MethodDescriptor, RequestSink, ResponseStream, Result,
};

/// Receives the outcome of a call started through an async stub.
///
/// Either `on_error` is called once, or `on_next` is called for every
/// response message and then `on_completed` once. Callbacks run on the
/// channel's runtime, never on the thread that started the call.
pub trait StreamObserver<T>: Send + 'static {
    fn on_next(&mut self, value: T);

    fn on_error(&mut self, error: Error);

    fn on_completed(&mut self) {}
}

/// One observed step of a call, for observers backed by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent<T> {
    Next(T),
    Error(Error),
    Completed,
}

impl<T: Send + 'static> StreamObserver<T> for mpsc::UnboundedSender<StreamEvent<T>> {
    fn on_next(&mut self, value: T) {
        let _ = self.send(StreamEvent::Next(value));
    }

    fn on_error(&mut self, error: Error) {
        let _ = self.send(StreamEvent::Error(error));
    }

    fn on_completed(&mut self) {
        let _ = self.send(StreamEvent::Completed);
    }
}

/// Observer that hands the single outcome of a unary call to a closure.
pub struct Callback<T, F> {
    f: Option<F>,
    _marker: PhantomData<fn(T)>,
}

/// Wraps `f` into an observer for a unary call.
pub fn callback<T, F>(f: F) -> Callback<T, F>
where
    F: FnOnce(Result<T>) + Send + 'static,
{
    Callback {
        f: Some(f),
        _marker: PhantomData,
    }
}

impl<T, F> StreamObserver<T> for Callback<T, F>
where
    T: 'static,
    F: FnOnce(Result<T>) + Send + 'static,
{
    fn on_next(&mut self, value: T) {
        if let Some(f) = self.f.take() {
            f(Ok(value));
        }
    }

    fn on_error(&mut self, error: Error) {
        if let Some(f) = self.f.take() {
            f(Err(error));
        }
    }
}

/// Pending outcome of a unary or client-streaming call.
///
/// Resolves exactly once, to the response or to the error. Dropping it before
/// it resolved cancels the call.
#[derive(Debug)]
pub struct ResponseFuture<T> {
    rx: oneshot::Receiver<Result<T>>,
    handle: CallHandle,
}

impl<T> ResponseFuture<T> {
    /// Cancels the call. Returns `false` if it had already ended.
    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    #[must_use]
    pub fn call_handle(&self) -> &CallHandle {
        &self.handle
    }

    /// Parks the calling thread until the call ends. Must not be called from
    /// inside an async runtime.
    ///
    /// # Errors
    ///
    /// Returns the error the call failed with.
    pub fn wait(self) -> Result<T> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(lost_response()))
    }
}

impl<T> Future for ResponseFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| Err(lost_response())))
    }
}

/// Handle of a call that failed before it reached the channel. It is already
/// over, so cancelling it is a no-op.
fn unstarted_call() -> CallHandle {
    let handle = CallHandle::default();
    handle.complete();
    handle
}

fn lost_response() -> Error {
    Error::new(ErrorKind::Internal, "call dropped without a response")
}

/// Starts calls on a channel and adapts them to one of the calling
/// conventions. Every generated stub is a thin wrapper around one of these.
#[derive(Debug, Clone)]
pub struct CallInvoker<C> {
    channel: C,
    options: CallOptions,
}

impl<C: Channel> CallInvoker<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            options: CallOptions::default(),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    #[must_use]
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    /// Starts a call and returns both of its raw halves.
    pub fn start_call<Req, Rsp>(
        &self,
        method: &'static MethodDescriptor,
    ) -> (RequestSink<Req>, ResponseStream<Rsp>)
    where
        Req: Serialize,
        Rsp: DeserializeOwned,
    {
        let ClientCall {
            requests,
            responses,
            handle,
        } = self.channel.new_call(method, &self.options);
        let codec = self.options.codec;
        (
            RequestSink::new(requests, codec, handle.clone()),
            ResponseStream::new(responses, codec, handle),
        )
    }

    /// Starts a call whose single request is known up front.
    fn start_single<Req, Rsp>(
        &self,
        method: &'static MethodDescriptor,
        req: &Req,
    ) -> Result<ResponseStream<Rsp>>
    where
        Req: Serialize,
        Rsp: DeserializeOwned,
    {
        let payload = self.options.codec.encode(req)?;
        let (sink, stream) = self.start_call::<Req, Rsp>(method);
        // a refused call reports through the response stream.
        let _ = sink.send_last(payload);
        Ok(stream)
    }

    /// Resolves a single response in the background and hands it over
    /// through a [`ResponseFuture`].
    fn resolve<Rsp>(&self, stream: Result<ResponseStream<Rsp>>) -> ResponseFuture<Rsp>
    where
        Rsp: DeserializeOwned + Send + 'static,
    {
        let (mut tx, rx) = oneshot::channel();
        let stream = match stream {
            Ok(stream) => stream,
            Err(error) => {
                let _ = tx.send(Err(error));
                return ResponseFuture {
                    rx,
                    handle: unstarted_call(),
                };
            }
        };
        let handle = stream.call_handle().clone();
        let call = handle.clone();
        self.channel.runtime().spawn(async move {
            tokio::select! {
                result = stream.single() => {
                    let _ = tx.send(result);
                }
                () = tx.closed() => {
                    call.cancel();
                }
            }
        });
        ResponseFuture { rx, handle }
    }

    /// Async convention for unary calls.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, `Unimplemented`, or the reason the call
    /// was cancelled.
    pub async fn unary<Req, Rsp>(&self, method: &'static MethodDescriptor, req: &Req) -> Result<Rsp>
    where
        Req: Serialize,
        Rsp: DeserializeOwned,
    {
        self.start_single(method, req)?.single().await
    }

    /// Future convention for unary calls.
    pub fn unary_future<Req, Rsp>(
        &self,
        method: &'static MethodDescriptor,
        req: &Req,
    ) -> ResponseFuture<Rsp>
    where
        Req: Serialize,
        Rsp: DeserializeOwned + Send + 'static,
    {
        self.resolve(self.start_single(method, req))
    }

    /// Blocking convention for unary calls: parks the calling thread until
    /// the response arrives, the call fails, or the deadline passes.
    ///
    /// # Errors
    ///
    /// Same as [`CallInvoker::unary`].
    pub fn blocking_unary<Req, Rsp>(&self, method: &'static MethodDescriptor, req: &Req) -> Result<Rsp>
    where
        Req: Serialize,
        Rsp: DeserializeOwned + Send + 'static,
    {
        self.unary_future(method, req).wait()
    }

    /// Callback convention for unary calls.
    pub fn unary_observer<Req, Rsp>(
        &self,
        method: &'static MethodDescriptor,
        req: &Req,
        observer: impl StreamObserver<Rsp>,
    ) -> CallHandle
    where
        Req: Serialize,
        Rsp: DeserializeOwned + Send + 'static,
    {
        self.observe(self.start_single(method, req), observer)
    }

    /// # Errors
    ///
    /// Returns an encode error if `req` cannot be serialized.
    pub fn server_streaming<Req, Rsp>(
        &self,
        method: &'static MethodDescriptor,
        req: &Req,
    ) -> Result<ResponseStream<Rsp>>
    where
        Req: Serialize,
        Rsp: DeserializeOwned,
    {
        self.start_single(method, req)
    }

    pub fn server_streaming_observer<Req, Rsp>(
        &self,
        method: &'static MethodDescriptor,
        req: &Req,
        observer: impl StreamObserver<Rsp>,
    ) -> CallHandle
    where
        Req: Serialize,
        Rsp: DeserializeOwned + Send + 'static,
    {
        self.observe(self.start_single(method, req), observer)
    }

    /// Blocking convention for server-streaming calls: responses are pulled
    /// lazily, each pull parking the calling thread.
    ///
    /// # Errors
    ///
    /// Returns an encode error if `req` cannot be serialized.
    pub fn blocking_server_streaming<Req, Rsp>(
        &self,
        method: &'static MethodDescriptor,
        req: &Req,
    ) -> Result<BlockingResponseStream<Rsp>>
    where
        Req: Serialize,
        Rsp: DeserializeOwned,
    {
        Ok(self.start_single(method, req)?.into_blocking())
    }

    /// Client-streaming call; the response resolves after the sink is closed.
    pub fn client_streaming<Req, Rsp>(
        &self,
        method: &'static MethodDescriptor,
    ) -> (RequestSink<Req>, ResponseFuture<Rsp>)
    where
        Req: Serialize,
        Rsp: DeserializeOwned + Send + 'static,
    {
        let (sink, stream) = self.start_call(method);
        (sink, self.resolve(Ok(stream)))
    }

    /// Async convention for client-streaming and bidi calls.
    pub fn streaming_observer<Req, Rsp>(
        &self,
        method: &'static MethodDescriptor,
        observer: impl StreamObserver<Rsp>,
    ) -> RequestSink<Req>
    where
        Req: Serialize,
        Rsp: DeserializeOwned + Send + 'static,
    {
        let (sink, stream) = self.start_call(method);
        self.observe(Ok(stream), observer);
        sink
    }

    fn observe<Rsp>(
        &self,
        stream: Result<ResponseStream<Rsp>>,
        mut observer: impl StreamObserver<Rsp>,
    ) -> CallHandle
    where
        Rsp: DeserializeOwned + Send + 'static,
    {
        match stream {
            Ok(stream) => {
                let handle = stream.call_handle().clone();
                self.channel.runtime().spawn(pump(stream, observer));
                handle
            }
            Err(error) => {
                self.channel.runtime().spawn(async move {
                    observer.on_error(error);
                });
                unstarted_call()
            }
        }
    }
}

async fn pump<Rsp: DeserializeOwned>(
    mut responses: ResponseStream<Rsp>,
    mut observer: impl StreamObserver<Rsp>,
) {
    loop {
        match responses.message().await {
            Ok(Some(value)) => observer.on_next(value),
            Ok(None) => {
                observer.on_completed();
                break;
            }
            Err(error) => {
                observer.on_error(error);
                break;
            }
        }
    }
}

/// Common surface of generated stubs: construction from a channel and
/// per-stub call options.
pub trait ClientStub<C: Channel>: Sized {
    fn from_invoker(invoker: CallInvoker<C>) -> Self;

    fn invoker(&self) -> &CallInvoker<C>;

    fn into_invoker(self) -> CallInvoker<C>;

    fn new(channel: C) -> Self {
        Self::from_invoker(CallInvoker::new(channel))
    }

    #[must_use]
    fn with_options(self, options: CallOptions) -> Self {
        Self::from_invoker(self.into_invoker().with_options(options))
    }

    /// Deadline for each call made through the stub.
    #[must_use]
    fn with_timeout(self, timeout: Duration) -> Self {
        let mut options = self.invoker().options().clone();
        options.timeout = Some(timeout);
        self.with_options(options)
    }

    #[must_use]
    fn with_metadata(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut options = self.invoker().options().clone();
        options.metadata.insert(key, value);
        self.with_options(options)
    }

    #[must_use]
    fn with_codec(self, codec: Codec) -> Self {
        let mut options = self.invoker().options().clone();
        options.codec = codec;
        self.with_options(options)
    }
}
