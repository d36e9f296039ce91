#![forbid(unsafe_code)]

use std::{
    sync::{
        Arc, Barrier,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use shoprpc::*;
use tokio::sync::mpsc;

#[service(package = "test")]
trait Sleeper {
    async fn sleep(&self, ctx: &Context, millis: u64) -> Result<u64>;
}

struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct SleeperImpl {
    started: mpsc::UnboundedSender<u64>,
    observed: mpsc::UnboundedSender<CallStatus>,
    released: Arc<AtomicUsize>,
}

impl Sleeper for SleeperImpl {
    async fn sleep(&self, ctx: &Context, millis: u64) -> Result<u64> {
        let _guard = ReleaseGuard(self.released.clone());

        let watcher = ctx.clone();
        let observed = self.observed.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = watcher.cancelled() => {
                    let _ = observed.send(watcher.handle().status());
                }
                () = watcher.handle().finished() => {}
            }
        });

        let _ = self.started.send(ctx.call_id());
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(millis)
    }
}

struct Fixture {
    server: Server,
    started: mpsc::UnboundedReceiver<u64>,
    observed: mpsc::UnboundedReceiver<CallStatus>,
    released: Arc<AtomicUsize>,
}

fn create_fixture(config: &ServerConfig) -> Fixture {
    let (started_tx, started) = mpsc::unbounded_channel();
    let (observed_tx, observed) = mpsc::unbounded_channel();
    let released = Arc::new(AtomicUsize::new(0));
    let sleeper = Arc::new(SleeperImpl {
        started: started_tx,
        observed: observed_tx,
        released: released.clone(),
    });
    let mut router = Router::default();
    router.add_service(sleeper.bind_service()).unwrap();
    Fixture {
        server: Server::create(router, config).unwrap(),
        started,
        observed,
        released,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_cancel_future() {
    let mut fixture = create_fixture(&ServerConfig::default());
    let stub =
        sleeper::new_future_stub(fixture.server.channel(tokio::runtime::Handle::current()));

    let rsp = stub.sleep(&60_000);
    fixture.started.recv().await.unwrap();
    assert_eq!(fixture.server.in_flight_calls(), 1);

    assert!(rsp.cancel());
    assert!(!rsp.cancel());
    assert_eq!(rsp.call_handle().status(), CallStatus::Cancelled);

    let error = rsp.await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Cancelled);
    assert_eq!(fixture.observed.recv().await, Some(CallStatus::Cancelled));

    let released = fixture.released.clone();
    wait_until(|| released.load(Ordering::SeqCst) == 1).await;
    let server = &fixture.server;
    wait_until(|| server.in_flight_calls() == 0).await;
}

#[tokio::test]
async fn test_drop_future_cancels_call() {
    let mut fixture = create_fixture(&ServerConfig::default());
    let stub =
        sleeper::new_future_stub(fixture.server.channel(tokio::runtime::Handle::current()));

    let rsp = stub.sleep(&60_000);
    fixture.started.recv().await.unwrap();
    drop(rsp);

    assert_eq!(fixture.observed.recv().await, Some(CallStatus::Cancelled));
    let released = fixture.released.clone();
    wait_until(|| released.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn test_cancel_by_call_id() {
    let mut fixture = create_fixture(&ServerConfig::default());
    let stub =
        sleeper::new_future_stub(fixture.server.channel(tokio::runtime::Handle::current()));

    let rsp = stub.sleep(&60_000);
    let call_id = fixture.started.recv().await.unwrap();
    assert!(fixture.server.cancel_call(call_id));
    assert_eq!(rsp.await.unwrap_err().kind, ErrorKind::Cancelled);
    assert!(!fixture.server.cancel_call(call_id));
}

#[tokio::test]
async fn test_cancel_after_completion() {
    let fixture = create_fixture(&ServerConfig::default());
    let stub =
        sleeper::new_future_stub(fixture.server.channel(tokio::runtime::Handle::current()));

    let rsp = stub.sleep(&1);
    let handle = rsp.call_handle().clone();
    assert_eq!(rsp.await.unwrap(), 1);
    assert!(!handle.cancel());
    assert_eq!(handle.status(), CallStatus::Completed);
}

#[tokio::test]
async fn test_deadline_future() {
    let mut fixture = create_fixture(&ServerConfig::default());
    let stub =
        sleeper::new_future_stub(fixture.server.channel(tokio::runtime::Handle::current()))
            .with_timeout(Duration::from_millis(50));

    let error = stub.sleep(&60_000).await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::DeadlineExceeded);
    assert!(error.kind.is_retryable());
    assert_eq!(
        fixture.observed.recv().await,
        Some(CallStatus::DeadlineExceeded)
    );

    assert_eq!(stub.sleep(&1).await.unwrap(), 1);
}

#[test]
fn test_deadline_blocking() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let fixture = create_fixture(&ServerConfig::default());
    let stub = sleeper::new_blocking_stub(fixture.server.channel(runtime.handle().clone()))
        .with_timeout(Duration::from_millis(100));

    let start = Instant::now();
    let error = stub.sleep(&60_000).unwrap_err();
    assert_eq!(error.kind, ErrorKind::DeadlineExceeded);
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(start.elapsed() < Duration::from_secs(30));
}

#[tokio::test]
async fn test_stop_cancels_in_flight_calls() {
    let mut fixture = create_fixture(&ServerConfig::default());
    let stub =
        sleeper::new_future_stub(fixture.server.channel(tokio::runtime::Handle::current()));

    let first = stub.sleep(&60_000);
    let second = stub.sleep(&60_000);
    fixture.started.recv().await.unwrap();
    fixture.started.recv().await.unwrap();

    fixture.server.stop();
    assert_eq!(first.await.unwrap_err().kind, ErrorKind::Cancelled);
    assert_eq!(second.await.unwrap_err().kind, ErrorKind::Cancelled);
    tokio::time::timeout(Duration::from_secs(5), fixture.server.join())
        .await
        .unwrap();

    let error = stub.sleep(&1).await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Unavailable);
    assert_eq!(fixture.server.in_flight_calls(), 0);
}

#[tokio::test]
async fn test_max_concurrent_calls() {
    let config = ServerConfig {
        max_concurrent_calls: Some(1),
    };
    let mut fixture = create_fixture(&config);
    let stub =
        sleeper::new_future_stub(fixture.server.channel(tokio::runtime::Handle::current()));

    let first = stub.sleep(&60_000);
    fixture.started.recv().await.unwrap();

    let error = stub.sleep(&1).await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::ResourceExhausted);

    first.cancel();
    let server = &fixture.server;
    wait_until(|| server.in_flight_calls() == 0).await;
    assert_eq!(stub.sleep(&1).await.unwrap(), 1);
}

#[test]
fn test_concurrent_admission_respects_limit() {
    const LIMIT: usize = 4;
    const CALLERS: usize = 32;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let config = ServerConfig {
        max_concurrent_calls: Some(LIMIT),
    };
    let fixture = create_fixture(&config);
    let stub = sleeper::new_future_stub(fixture.server.channel(runtime.handle().clone()));

    let barrier = Arc::new(Barrier::new(CALLERS));
    let calls = (0..CALLERS)
        .map(|_| {
            let barrier = barrier.clone();
            let stub = stub.clone();
            std::thread::spawn(move || {
                barrier.wait();
                stub.sleep(&60_000)
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect::<Vec<_>>();

    // rejected calls are completed before the stub returns them.
    let admitted = calls
        .iter()
        .filter(|rsp| rsp.call_handle().is_active())
        .count();
    assert!(admitted <= LIMIT, "admitted {admitted} calls");
    assert!(fixture.server.in_flight_calls() <= LIMIT);

    for rsp in &calls {
        rsp.cancel();
    }
    let rejected = calls
        .into_iter()
        .map(ResponseFuture::wait)
        .filter(|r| matches!(r, Err(e) if e.kind == ErrorKind::ResourceExhausted))
        .count();
    assert_eq!(rejected, CALLERS - admitted);
}
