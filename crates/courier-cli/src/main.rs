//! courier: durable job dispatch and retry engine
//!
//! Subcommands:
//! - `serve`: HTTP endpoint (`POST /api/job`) + drainer + local cron loop
//! - `sign`: print the signature for a request body
//! - `demo`: in-process publish → drain → retry cycle on a manual clock

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courier_core::app::{
    Backend, BackoffSchedule, BuildError, CourierBuilder, DrainerHandle, PublishError,
    PublishOptions, Signer, sync_cron_jobs,
};
use courier_core::config::CourierConfig;
use courier_core::http::create_router;
use courier_core::impls::{HttpInvoker, InMemoryBackend, LocalCronScheduler, LocalInvoker};
use courier_core::ports::{
    Clock, CronError, Invoker, JobRunStore, ManualClock, QueueError, StoreError, SystemClock,
};
use courier_core::typed::RegistryError;

mod jobs;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cron(#[from] CronError),

    #[error("invalid hmac secret")]
    Secret,

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Durable job dispatch and retry engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the invocation endpoint and run the drainer and cron loops
    Serve {
        /// Listen address
        #[arg(long, env = "COURIER_ADDR", default_value = "127.0.0.1:3000")]
        addr: SocketAddr,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Print the hex HMAC-SHA256 signature of a body
    Sign {
        #[arg(long, env = "COURIER_HMAC_SECRET", hide_env_values = true)]
        hmac_secret: String,

        /// Raw request body, signed byte for byte
        body: String,
    },

    /// Publish sample events and drain them in-process, printing the run table
    Demo {
        /// How many times the preview job fails before it succeeds
        #[arg(long, default_value_t = 2)]
        flaky_calls: u32,
    },
}

#[derive(Args)]
struct EngineArgs {
    /// Shared secret for endpoint signatures
    #[arg(long, env = "COURIER_HMAC_SECRET", hide_env_values = true)]
    hmac_secret: String,

    /// Retry delays in seconds, indexed by attempts so far
    #[arg(long, env = "COURIER_BACKOFF", default_value = "5,60,300,3600")]
    backoff: BackoffSchedule,

    /// Drainer tick in seconds
    #[arg(long, env = "COURIER_DRAIN_INTERVAL", default_value_t = 5)]
    drain_interval: u64,

    /// Messages popped per queue read
    #[arg(long, env = "COURIER_DRAIN_BATCH_SIZE", default_value_t = 1)]
    drain_batch_size: usize,

    /// Processing window in seconds; also the run claim lease
    #[arg(long, env = "COURIER_VISIBILITY_TIMEOUT", default_value_t = 30)]
    visibility_timeout: u64,

    /// Forward drained messages to this URL instead of calling the endpoint in-process
    #[arg(long, env = "COURIER_ENDPOINT_URL")]
    endpoint_url: Option<String>,
}

impl EngineArgs {
    fn into_config(self) -> CourierConfig {
        CourierConfig {
            hmac_secret: self.hmac_secret,
            backoff: self.backoff,
            drain_interval: Duration::from_secs(self.drain_interval),
            drain_batch_size: self.drain_batch_size,
            visibility_timeout: Duration::from_secs(self.visibility_timeout),
            endpoint_url: self.endpoint_url,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { addr, engine } => serve(addr, engine.into_config()).await,
        Commands::Sign { hmac_secret, body } => {
            let signer = Signer::new(hmac_secret).map_err(|_| CliError::Secret)?;
            println!("{}", signer.sign(body.as_bytes()));
            Ok(())
        }
        Commands::Demo { flaky_calls } => demo(flaky_calls).await,
    }
}

async fn serve(addr: SocketAddr, config: CourierConfig) -> Result<(), CliError> {
    let memory = InMemoryBackend::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let courier = jobs::register(CourierBuilder::new(), 0)?
        .expect_jobs(jobs::EXPECTED_JOBS)
        .build(
            &config,
            Backend {
                queue: Arc::new(memory.clone()),
                store: Arc::new(memory.clone()),
                clock: Arc::clone(&clock),
            },
        )?;
    tracing::info!(?config, "starting courier");

    let invoker: Arc<dyn Invoker> = match &config.endpoint_url {
        Some(url) => Arc::new(HttpInvoker::new(url.clone())),
        None => Arc::new(LocalInvoker::new(Arc::clone(&courier.endpoint))),
    };

    let drainer = DrainerHandle::spawn(
        Arc::new(courier.drainer(Arc::clone(&invoker))),
        config.drain_interval,
    );

    let cron = Arc::new(LocalCronScheduler::new(
        Arc::clone(&invoker),
        courier.signer.clone(),
        Arc::clone(&clock),
    ));
    let report = sync_cron_jobs(&courier.registry, cron.as_ref()).await?;
    tracing::info!(scheduled = report.scheduled.len(), "cron jobs synced");

    let (cron_shutdown_tx, cron_shutdown_rx) = watch::channel(false);
    let cron_loop = tokio::spawn({
        let cron = Arc::clone(&cron);
        async move { cron.run(Duration::from_secs(1), cron_shutdown_rx).await }
    });

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, create_router(Arc::clone(&courier.endpoint)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // stop feeding new work, then let running handlers finish
    drainer.shutdown_and_join().await;
    let _ = cron_shutdown_tx.send(true);
    let _ = cron_loop.await;
    courier.dispatcher.wait_idle().await;

    let counts = memory.counts().await?;
    tracing::info!(
        in_flight = counts.in_flight,
        succeeded = counts.succeeded,
        errored = counts.errored,
        "courier stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "could not listen for ctrl-c");
        return;
    }
    tracing::info!("shutdown requested");
}

async fn demo(flaky_calls: u32) -> Result<(), CliError> {
    let clock = ManualClock::new(SystemClock.now());
    let memory = InMemoryBackend::with_clock(Arc::new(clock.clone()));
    let config = CourierConfig::new("demo-secret");
    let courier = jobs::register(CourierBuilder::new(), flaky_calls)?
        .expect_jobs(jobs::EXPECTED_JOBS)
        .build(
            &config,
            Backend {
                queue: Arc::new(memory.clone()),
                store: Arc::new(memory.clone()),
                clock: Arc::new(clock.clone()),
            },
        )?;
    let invoker: Arc<dyn Invoker> = Arc::new(LocalInvoker::new(Arc::clone(&courier.endpoint)));
    let drainer = courier.drainer(Arc::clone(&invoker));

    courier
        .publisher
        .publish(&jobs::MessageCreated { message_id: 42 }, PublishOptions::default())
        .await?;
    courier
        .publisher
        .publish(&jobs::FilePreviewRequested { file_id: 7 }, PublishOptions::default())
        .await?;

    let drain = || async {
        let report = drainer.drain_once().await?;
        courier.dispatcher.wait_idle().await;
        Ok::<_, CliError>(report.processed)
    };

    let mut processed = drain().await?;
    for delay in config.backoff.delays() {
        clock.advance(*delay);
        processed += drain().await?;
    }
    tracing::info!("Processed {} jobs", processed);

    let cron = LocalCronScheduler::new(
        Arc::clone(&invoker),
        courier.signer.clone(),
        Arc::new(clock.clone()),
    );
    sync_cron_jobs(&courier.registry, &cron).await?;
    if let Some(next) = cron.next_fire("generate_daily_reports").await {
        clock.set(next);
        cron.fire_due(next).await;
        courier.dispatcher.wait_idle().await;
    }

    println!("{}", serde_json::to_string_pretty(&memory.runs().await)?);
    let counts = memory.counts().await?;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}
