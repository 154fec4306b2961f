use clap::Parser;
use miette::{IntoDiagnostic, Result};
use permitflow::application::metrics::MetricsCollector;
use permitflow::application::queue::PermitQueue;
use permitflow::application::recovery::RecoveryScheduler;
use permitflow::application::scanner::ExpirationScanner;
use permitflow::application::webhook::WebhookProcessor;
use permitflow::config::PipelineConfig;
use permitflow::domain::application::{Application, ApplicationStatus};
use permitflow::domain::ports::{ClockRef, StoreRef, SystemClock};
use permitflow::infrastructure::in_memory::InMemoryStore;
use permitflow::infrastructure::local::{LocalIssuanceBackend, LoggingNotifier, OfflineGateway};
use permitflow::interfaces::csv::summary_writer::SummaryWriter;
use permitflow::interfaces::jsonl::event_reader::{ReplayReader, ReplayRecord};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input replay file (JSON lines: applications and webhook events)
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[cfg(feature = "storage-rocksdb")]
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Run one recovery scan after the replay.
    #[arg(long)]
    recover: bool,

    /// Run the voucher and permit-expiry reminder scans after the replay.
    #[arg(long)]
    scan_reminders: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "permitflow=info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let clock: ClockRef = Arc::new(SystemClock);
    let config = PipelineConfig::default();

    let store = build_store(&cli, &clock).into_diagnostic()?;
    let queue = PermitQueue::new(
        Arc::clone(&store),
        Arc::new(LocalIssuanceBackend),
        Arc::new(LoggingNotifier),
        Arc::clone(&clock),
        config.clone(),
    );
    let workers = queue.spawn_workers();
    let processor = WebhookProcessor::new(Arc::clone(&store), Arc::clone(&queue), Arc::clone(&clock));

    let file = File::open(&cli.input).into_diagnostic()?;
    for record in ReplayReader::new(file).records() {
        match record {
            Ok(ReplayRecord::Application {
                id,
                order_id,
                amount,
                currency,
            }) => {
                let mut application = Application::new(id, clock.now());
                application.status = ApplicationStatus::PendingPayment;
                application.payment_order_id = Some(order_id);
                application.amount = amount;
                application.currency = currency;
                if let Err(e) = store.insert_application(application).await {
                    eprintln!("Error seeding application: {e}");
                }
            }
            Ok(ReplayRecord::Webhook(event)) => {
                if let Err(e) = processor.process(&event).await {
                    eprintln!("Error processing webhook: {e}");
                }
            }
            Err(e) => {
                eprintln!("Error reading record: {e}");
            }
        }
    }

    queue.drained().await;

    if cli.recover {
        let scheduler = RecoveryScheduler::new(
            Arc::clone(&store),
            Arc::new(OfflineGateway),
            Arc::clone(&queue),
            Arc::new(LoggingNotifier),
            Arc::clone(&clock),
            config.clone(),
        );
        scheduler.run_scan().await.into_diagnostic()?;
        queue.drained().await;
    }

    if cli.scan_reminders {
        let scanner = ExpirationScanner::new(
            Arc::clone(&store),
            Arc::new(LoggingNotifier),
            Arc::clone(&clock),
            config.clone(),
        );
        scanner.scan_voucher_expirations().await.into_diagnostic()?;
        scanner.scan_permit_expirations().await.into_diagnostic()?;
    }

    // One final sample so the replay outcome lands in the time series.
    let collector = MetricsCollector::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&clock),
        config,
    );
    collector.collect_sample().await.into_diagnostic()?;

    queue.shutdown();
    for worker in workers {
        worker.await.into_diagnostic()?;
    }

    let applications = store.all_applications().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = SummaryWriter::new(stdout.lock());
    writer.write_applications(applications).into_diagnostic()?;
    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn build_store(cli: &Cli, clock: &ClockRef) -> permitflow::error::Result<StoreRef> {
    use permitflow::infrastructure::rocksdb::RocksDbStore;
    Ok(match &cli.db_path {
        Some(path) => Arc::new(RocksDbStore::open(path, Arc::clone(clock))?),
        None => Arc::new(InMemoryStore::new(Arc::clone(clock))),
    })
}

#[cfg(not(feature = "storage-rocksdb"))]
fn build_store(_cli: &Cli, clock: &ClockRef) -> permitflow::error::Result<StoreRef> {
    Ok(Arc::new(InMemoryStore::new(Arc::clone(clock))))
}
