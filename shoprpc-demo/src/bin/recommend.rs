use clap::Parser;
use shoprpc::{
    CallOptions, ClientStub, Codec, Router, Server, ServerConfig, StreamEvent,
    services::meta_service,
};
use shoprpc_demo::{
    CatalogRecommender, ListRecommendationsRequest, NoRecommender, RecommendationService,
    recommendation_service,
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// User to recommend products for.
    #[arg(default_value = "u1")]
    pub user_id: String,

    /// Products to leave out of the recommendations.
    #[arg(short, long)]
    pub exclude: Vec<String>,

    /// Products known to the catalog.
    #[arg(long, value_delimiter = ',', default_value = "p1,p2,p3,p4,p5,p6")]
    pub catalog: Vec<String>,

    /// Maximum number of recommendations.
    #[arg(long, default_value = "5")]
    pub max_results: usize,

    /// Message encoding.
    #[arg(long, default_value = "json")]
    pub codec: Codec,

    /// Per-call timeout in milliseconds.
    #[arg(long, default_value = "5000")]
    pub timeout_ms: u64,

    /// Serve the service without overriding any method.
    #[arg(long, default_value_t = false)]
    pub unimplemented: bool,

    /// Print the services the server exposes.
    #[arg(long, default_value_t = false)]
    pub describe: bool,

    /// Enable stress testing.
    #[arg(long, default_value_t = false)]
    pub stress: bool,

    /// Stress testing duration.
    #[arg(long, default_value = "10")]
    pub secs: u64,

    /// The number of coroutines.
    #[arg(long, default_value = "32")]
    pub coroutines: usize,
}

impl Args {
    fn call_options(&self) -> CallOptions {
        CallOptions {
            timeout: Some(Duration::from_millis(self.timeout_ms)),
            codec: self.codec,
            ..Default::default()
        }
    }

    fn request(&self) -> ListRecommendationsRequest {
        ListRecommendationsRequest {
            user_id: self.user_id.clone(),
            excluded_ids: self.exclude.clone(),
        }
    }
}

#[derive(Default)]
struct Stats {
    total: AtomicUsize,
    fails: AtomicUsize,
}

async fn stress_test(args: Args, server: &Server) {
    let stats = Arc::new(Stats::default());
    let start_time = std::time::Instant::now();
    let stub = recommendation_service::new_future_stub(
        server.channel(tokio::runtime::Handle::current()),
    )
    .with_options(args.call_options());
    let mut tasks = vec![];
    for _ in 0..args.coroutines {
        let req = args.request();
        let stats = stats.clone();
        let stub = stub.clone();
        let secs = args.secs;
        tasks.push(tokio::spawn(async move {
            while start_time.elapsed().as_secs() < secs {
                for _ in 0..256 {
                    let result = stub.list_recommendations(&req).await;
                    stats.total.fetch_add(1, Ordering::AcqRel);
                    if result.is_err() {
                        stats.fails.fetch_add(1, Ordering::AcqRel);
                    }
                }
            }
        }));
    }
    tokio::select! {
        _ = async {
            for task in tasks {
                let _ = task.await;
            }
        } => {
        }
        _ = async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let total = stats.total.swap(0, Ordering::AcqRel);
                let fails = stats.fails.swap(0, Ordering::AcqRel);
                tracing::info!("QPS: {total}/s, fails: {fails}/s");
            }
        } => {
        }
    }
}

async fn describe(server: &Server) -> shoprpc::Result<()> {
    let meta = meta_service::new_future_stub(server.channel(tokio::runtime::Handle::current()));
    for name in meta.list_services(&()).await? {
        let info = meta.describe_service(&name).await?;
        tracing::info!("{}", serde_json::to_string_pretty(&info)?);
    }
    Ok(())
}

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> shoprpc::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let mut router = Router::default();
    if args.unimplemented {
        router.add_service(Arc::new(NoRecommender).bind_service())?;
    } else {
        let recommender = CatalogRecommender::new(args.catalog.clone(), args.max_results);
        router.add_service(Arc::new(recommender).bind_service())?;
    }
    let server = Server::create(router, &ServerConfig::default())?;

    if args.describe {
        describe(&server).await?;
    }

    if args.stress {
        stress_test(args, &server).await;
    } else {
        let channel = server.channel(tokio::runtime::Handle::current());
        let req = args.request();

        let future_stub = recommendation_service::new_future_stub(channel.clone())
            .with_options(args.call_options());
        let rsp = future_stub.list_recommendations(&req).await;
        tracing::info!("future stub rsp: {:?}", rsp);

        let blocking_stub = recommendation_service::new_blocking_stub(channel.clone())
            .with_options(args.call_options());
        let blocking_req = req.clone();
        let rsp = tokio::task::spawn_blocking(move || {
            blocking_stub.list_recommendations(&blocking_req)
        })
        .await
        .map_err(|e| shoprpc::Error::new(shoprpc::ErrorKind::Internal, e.to_string()))?;
        tracing::info!("blocking stub rsp: {:?}", rsp);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let async_stub =
            recommendation_service::new_stub(channel).with_options(args.call_options());
        async_stub.list_recommendations(&req, tx);
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Next(rsp) => tracing::info!("async stub rsp: {:?}", rsp),
                StreamEvent::Error(error) => tracing::info!("async stub error: {}", error),
                StreamEvent::Completed => break,
            }
        }
    }

    server.stop();
    server.join().await;
    Ok(())
}
