//! Server-side glue between a transport call and a typed handler.
//!
//! Generated service code implements [`Dispatch`] as one exhaustive match
//! over its methods, each arm handing the typed handler to the `serve_*`
//! adapter of the method's call shape.

use std::{future::Future, pin::Pin, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::mpsc;

use crate::{
    Context, Error, MethodId, Payload, RequestStream, ResponseFrame, ResponseSink, Result,
    ServiceDescriptor,
};

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The generic call a transport hands to a service.
///
/// Request messages arrive on `requests`. The service pushes its response
/// messages into `responses`, followed by exactly one `End` or `Error` frame,
/// even if a handler keeps a clone of its sink alive afterwards.
#[derive(Debug)]
pub struct ServerCall {
    pub ctx: Context,
    pub requests: mpsc::Receiver<Payload>,
    pub responses: mpsc::Sender<ResponseFrame>,
}

/// Routes a call to the handler of one method of a bound service.
pub trait Dispatch: Send + Sync + 'static {
    /// # Panics
    ///
    /// Panics if `method` is not one of the service's methods.
    fn dispatch(&self, method: MethodId, call: ServerCall) -> BoxFuture;
}

/// A service instance paired with its descriptor and dispatch table, ready to
/// be added to a [`crate::Router`].
#[derive(Clone)]
pub struct ServiceBinding {
    descriptor: &'static ServiceDescriptor,
    dispatcher: Arc<dyn Dispatch>,
}

impl ServiceBinding {
    pub fn new(descriptor: &'static ServiceDescriptor, dispatcher: impl Dispatch) -> Self {
        Self {
            descriptor,
            dispatcher: Arc::new(dispatcher),
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &'static ServiceDescriptor {
        self.descriptor
    }

    pub fn dispatch(&self, method: MethodId, call: ServerCall) -> BoxFuture {
        self.dispatcher.dispatch(method, call)
    }
}

impl std::fmt::Debug for ServiceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBinding")
            .field("service", &self.descriptor.name())
            .finish()
    }
}

/// Runs `fut` until it finishes or the call is cancelled, whichever happens
/// first. A cancelled handler future is dropped on the spot.
async fn run<T>(ctx: &Context, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        () = ctx.cancelled() => Err(ctx.check().err().unwrap_or_else(Error::internal)),
        result = fut => result,
    }
}

/// Completes the call and pushes its outcome: an optional final message and
/// the end marker, or an error. A call that was already cancelled reports why
/// instead.
async fn finish(
    ctx: &Context,
    responses: &mpsc::Sender<ResponseFrame>,
    outcome: Result<Option<Payload>>,
) {
    let outcome = if ctx.handle().complete() {
        outcome
    } else {
        Err(ctx.check().err().unwrap_or_else(Error::internal))
    };
    match outcome {
        Ok(last) => {
            if let Some(payload) = last
                && responses.send(ResponseFrame::Message(payload)).await.is_err()
            {
                return;
            }
            let _ = responses.send(ResponseFrame::End).await;
        }
        Err(error) => {
            tracing::debug!("call {} {} failed: {}", ctx.call_id(), ctx.method(), error);
            let _ = responses.send(ResponseFrame::Error(error)).await;
        }
    }
}

pub fn serve_unary<Req, Rsp, F, Fut>(call: ServerCall, handler: F) -> BoxFuture
where
    Req: DeserializeOwned + Send + 'static,
    Rsp: Serialize + Send + 'static,
    F: FnOnce(Context, Req) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Rsp>> + Send + 'static,
{
    let ServerCall {
        ctx,
        requests,
        responses,
    } = call;
    Box::pin(async move {
        let outcome = run(&ctx, async {
            let req = RequestStream::<Req>::new(requests, ctx.codec()).single().await?;
            let rsp = handler(ctx.clone(), req).await?;
            ctx.codec().encode(&rsp).map(Some)
        })
        .await;
        finish(&ctx, &responses, outcome).await;
    })
}

pub fn serve_server_streaming<Req, Rsp, F, Fut>(call: ServerCall, handler: F) -> BoxFuture
where
    Req: DeserializeOwned + Send + 'static,
    Rsp: Serialize + Send + 'static,
    F: FnOnce(Context, Req, ResponseSink<Rsp>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let ServerCall {
        ctx,
        requests,
        responses,
    } = call;
    Box::pin(async move {
        let sink = ResponseSink::new(responses.clone(), ctx.clone());
        let outcome = run(&ctx, async {
            let req = RequestStream::<Req>::new(requests, ctx.codec()).single().await?;
            handler(ctx.clone(), req, sink).await.map(|()| None)
        })
        .await;
        finish(&ctx, &responses, outcome).await;
    })
}

pub fn serve_client_streaming<Req, Rsp, F, Fut>(call: ServerCall, handler: F) -> BoxFuture
where
    Req: DeserializeOwned + Send + 'static,
    Rsp: Serialize + Send + 'static,
    F: FnOnce(Context, RequestStream<Req>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Rsp>> + Send + 'static,
{
    let ServerCall {
        ctx,
        requests,
        responses,
    } = call;
    Box::pin(async move {
        let outcome = run(&ctx, async {
            let rsp = handler(ctx.clone(), RequestStream::new(requests, ctx.codec())).await?;
            ctx.codec().encode(&rsp).map(Some)
        })
        .await;
        finish(&ctx, &responses, outcome).await;
    })
}

pub fn serve_bidi_streaming<Req, Rsp, F, Fut>(call: ServerCall, handler: F) -> BoxFuture
where
    Req: DeserializeOwned + Send + 'static,
    Rsp: Serialize + Send + 'static,
    F: FnOnce(Context, RequestStream<Req>, ResponseSink<Rsp>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let ServerCall {
        ctx,
        requests,
        responses,
    } = call;
    Box::pin(async move {
        let sink = ResponseSink::new(responses.clone(), ctx.clone());
        let stream = RequestStream::new(requests, ctx.codec());
        let outcome = run(&ctx, async {
            handler(ctx.clone(), stream, sink).await.map(|()| None)
        })
        .await;
        finish(&ctx, &responses, outcome).await;
    })
}

/// Aborts the dispatch of a method id the service never declared.
///
/// Reaching this means the descriptor and the dispatch table disagree, which
/// no correctly generated service allows.
pub fn unregistered_method(service: &str, method: MethodId) -> ! {
    tracing::error!("service {service} has no method {method}");
    panic!("service {service} has no method {method}");
}
