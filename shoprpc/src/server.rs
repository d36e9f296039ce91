use std::sync::Arc;

use crate::{
    LocalChannel, Result, Router, ServerConfig, State,
    services::{Health, HealthReporter, MetaService, Reflection, ServingStatus},
};

/// RPC server that routes calls to bound services.
///
/// The server owns the router and the table of in-flight calls, and always
/// carries the built-in health and discovery services. Clients reach it
/// through a [`LocalChannel`].
///
/// # Examples
///
/// ```rust
/// # use shoprpc::{ClientStub, Context, Router, Server, ServerConfig};
/// # use std::sync::Arc;
/// #[shoprpc::service(package = "demo")]
/// trait EchoService {
///     async fn echo(&self, ctx: &Context, req: String) -> shoprpc::Result<String>;
/// }
///
/// struct DemoImpl;
///
/// impl EchoService for DemoImpl {
///     async fn echo(&self, _ctx: &Context, req: String) -> shoprpc::Result<String> {
///         Ok(req)
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let mut router = Router::default();
/// router.add_service(Arc::new(DemoImpl).bind_service()).unwrap();
///
/// let server = Server::create(router, &ServerConfig::default()).unwrap();
/// let stub = echo_service::new_future_stub(server.channel(tokio::runtime::Handle::current()));
/// assert_eq!(stub.echo(&"hi".to_string()).await.unwrap(), "hi");
///
/// server.stop();
/// server.join().await;
/// # }
/// ```
#[derive(Debug)]
pub struct Server {
    state: Arc<State>,
}

impl Server {
    /// Creates a server for the services of `router`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `router` already holds one of the
    /// built-in services.
    pub fn create(mut router: Router, config: &ServerConfig) -> Result<Self> {
        let health = Arc::new(HealthReporter::default());
        router.add_service(health.clone().bind_service())?;

        let mut services = router.services().collect::<Vec<_>>();
        services.push(crate::services::meta_service::service_descriptor());
        router.add_service(Arc::new(Reflection::new(services)).bind_service())?;

        health.set_status("", ServingStatus::Serving);
        for service in router.services() {
            health.set_status(service.name(), ServingStatus::Serving);
        }

        Ok(Self {
            state: Arc::new(State::new(router, config, health)),
        })
    }

    /// A channel whose calls are served on `runtime`.
    #[must_use]
    pub fn channel(&self, runtime: tokio::runtime::Handle) -> LocalChannel {
        LocalChannel::new(self.state.clone(), runtime)
    }

    /// Refuses new calls and cancels every in-flight one.
    ///
    /// Call [`join`](Self::join) after this to wait for the handlers to wind
    /// down.
    pub fn stop(&self) {
        self.state.health.set_all(ServingStatus::NotServing);
        self.state.supervisor.stop();
        let cancelled = self.state.calls.cancel_all();
        tracing::info!("server stopped, {} calls cancelled", cancelled);
    }

    /// Waits until stop was requested and no call is running anymore.
    pub async fn join(&self) {
        self.state.supervisor.all_stopped().await;
    }

    pub fn set_serving_status(&self, service: &str, status: ServingStatus) {
        self.state.health.set_status(service, status);
    }

    /// Cancels one in-flight call. Returns `false` if it is not running.
    pub fn cancel_call(&self, call_id: u64) -> bool {
        self.state.calls.cancel(call_id)
    }

    #[must_use]
    pub fn in_flight_calls(&self) -> usize {
        self.state.calls.len()
    }

    #[must_use]
    pub fn state(&self) -> &Arc<State> {
        &self.state
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if !self.state.supervisor.is_stopped() {
            self.stop();
        }
    }
}
