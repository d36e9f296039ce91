use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    CallHandle, CallOptions, CallRegistry, ClientCall, Context, Error, ErrorKind,
    MethodDescriptor, ResponseFrame, Result, Router, ServerConfig, TaskSupervisor,
    dispatch::ServerCall,
    services::HealthReporter,
};

/// Shared server state: routing, in-flight calls and health.
#[derive(Debug, Default)]
pub struct State {
    pub router: Router,
    pub(crate) calls: Arc<CallRegistry>,
    pub(crate) supervisor: TaskSupervisor,
    pub(crate) health: Arc<HealthReporter>,
    pub(crate) config: ServerConfig,
}

impl State {
    pub(crate) fn new(router: Router, config: &ServerConfig, health: Arc<HealthReporter>) -> Self {
        Self {
            router,
            calls: Arc::default(),
            supervisor: TaskSupervisor::default(),
            health,
            config: config.clone(),
        }
    }

    /// Decides whether a call that is already registered may run.
    ///
    /// Runs after registration, so a concurrent `stop` either is seen here or
    /// cancels the call, and the registry length already counts this call.
    fn admit(&self, method: &MethodDescriptor) -> Result<&crate::Route> {
        if self.supervisor.is_stopped() {
            return Err(Error::new(ErrorKind::Unavailable, "server is shutting down"));
        }
        if let Some(limit) = self.config.max_concurrent_calls
            && self.calls.len() > limit
        {
            return Err(Error::new(
                ErrorKind::ResourceExhausted,
                format!("too many concurrent calls, limit {limit}"),
            ));
        }
        let Some(route) = self.router.route(method.full_name()) else {
            return Err(Error::new(
                ErrorKind::Unimplemented,
                format!("unknown method {method}"),
            ));
        };
        if route.method().method_type() != method.method_type() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!(
                    "method {method} is {}, called as {}",
                    route.method().method_type(),
                    method.method_type()
                ),
            ));
        }
        Ok(route)
    }

    /// Starts serving one call of `method` and returns the client half.
    pub(crate) fn start_call(
        self: &Arc<Self>,
        method: &'static MethodDescriptor,
        options: &CallOptions,
        runtime: &tokio::runtime::Handle,
    ) -> ClientCall {
        let buffer_size = options.buffer_size.max(1);
        let (req_tx, req_rx) = mpsc::channel(buffer_size);
        let (rsp_tx, rsp_rx) = mpsc::channel(buffer_size);
        let handle = CallHandle::default();
        let client = ClientCall {
            requests: req_tx,
            responses: rsp_rx,
            handle: handle.clone(),
        };

        let guard = self.supervisor.start_async_task();
        let registration = self.calls.register(handle.clone());
        let route = match self.admit(method) {
            Ok(route) => route.clone(),
            Err(error) => {
                tracing::warn!("call to {} rejected: {}", method, error);
                drop(registration);
                drop(guard);
                handle.complete();
                let _ = rsp_tx.try_send(ResponseFrame::Error(error));
                return client;
            }
        };

        let ctx = Context::new(registration.call_id(), method, options, handle.clone());
        let timeout = options.timeout;
        let call = ServerCall {
            ctx,
            requests: req_rx,
            responses: rsp_tx.clone(),
        };

        runtime.spawn(async move {
            let mut task = tokio::spawn(async move { route.dispatch(call).await });
            let joined = match timeout {
                Some(timeout) => tokio::select! {
                    joined = &mut task => joined,
                    () = tokio::time::sleep(timeout) => {
                        if handle.expire() {
                            tracing::debug!("call {} to {} timed out", registration.call_id(), method);
                        }
                        task.await
                    }
                },
                None => task.await,
            };
            if let Err(error) = joined {
                tracing::error!("call {} to {} aborted: {}", registration.call_id(), method, error);
                let error = if handle.complete() {
                    Error::internal()
                } else {
                    handle.terminal_error().unwrap_or_else(Error::internal)
                };
                let _ = rsp_tx.send(ResponseFrame::Error(error)).await;
            }
            drop(registration);
            drop(guard);
        });

        client
    }
}
