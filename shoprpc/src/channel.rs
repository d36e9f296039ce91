use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{CallHandle, CallOptions, MethodDescriptor, Payload, ResponseFrame, State};

/// The client half of a started call.
#[derive(Debug)]
pub struct ClientCall {
    pub requests: mpsc::Sender<Payload>,
    pub responses: mpsc::Receiver<ResponseFrame>,
    pub handle: CallHandle,
}

/// Something client stubs can start calls on.
///
/// Starting a call never blocks and never fails: a call the other side
/// refuses reports the refusal as the first item of its response stream.
pub trait Channel: Clone + std::fmt::Debug + Send + Sync + 'static {
    fn new_call(&self, method: &'static MethodDescriptor, options: &CallOptions) -> ClientCall;

    /// Runtime on which stubs run their background work.
    fn runtime(&self) -> &tokio::runtime::Handle;
}

/// Channel to a [`crate::Server`] living in the same process.
#[derive(Clone)]
pub struct LocalChannel {
    state: Arc<State>,
    runtime: tokio::runtime::Handle,
}

impl LocalChannel {
    pub(crate) fn new(state: Arc<State>, runtime: tokio::runtime::Handle) -> Self {
        Self { state, runtime }
    }
}

impl Channel for LocalChannel {
    fn new_call(&self, method: &'static MethodDescriptor, options: &CallOptions) -> ClientCall {
        self.state.start_call(method, options, &self.runtime)
    }

    fn runtime(&self) -> &tokio::runtime::Handle {
        &self.runtime
    }
}

impl std::fmt::Debug for LocalChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalChannel")
            .field("router", &self.state.router)
            .finish()
    }
}
