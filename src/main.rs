use anyhow::Result;
use clap::{Parser, Subcommand};
use proxy_sieve::{
    logging::{init_logging, LogFormat},
    proxy::{
        scheduler::totals, sink::resume_path_for, CandidateSource, CheckerConfig, FileSink,
        JudgeConfig, JudgePool, ProxyChecker, Scheduler, SchedulerConfig, SinkConfig,
    },
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A judge-based proxy verifier with resumable runs
#[derive(Parser)]
#[command(name = "proxy-sieve")]
#[command(about = "A judge-based proxy verifier with resumable runs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info", env = "PROXY_SIEVE_LOG")]
    log_level: String,

    /// Log format (human, json)
    #[arg(long, global = true, default_value = "human")]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Check proxies and save working ones per protocol
    Check {
        /// Input file containing proxies, one per line
        #[arg(default_value = "scraped-proxies.txt")]
        input: PathBuf,
        /// Output path prefix; files are written as <prefix>-<set>.txt
        #[arg(short, long, default_value = "working-proxies")]
        output: PathBuf,
        /// Number of concurrent checks
        #[arg(short = 'n', long, default_value = "100", env = "PROXY_SIEVE_WORKERS")]
        workers: usize,
        /// Timeout in seconds for each proxied request
        #[arg(long, default_value = "10", env = "PROXY_SIEVE_TIMEOUT")]
        timeout: u64,
        /// Save progress every N working proxies
        #[arg(long, default_value = "25", env = "PROXY_SIEVE_BATCH_SIZE")]
        batch_size: usize,
        /// Prepend the protocol (e.g. http://) in protocol-specific files
        #[arg(long)]
        prepend_protocol: bool,
        /// Where to write unchecked proxies on interruption
        #[arg(long)]
        resume_file: Option<PathBuf>,
        /// MMDB file for country lookup
        #[arg(long)]
        mmdb: Option<String>,
        /// Record the REMOTE_ADDR reported by the judge
        #[arg(long)]
        remote_address: bool,
    },
    /// Validate the proxy judges and show the public IP
    Judges,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format, &cli.log_level)?;

    match cli.command {
        Commands::Judges => {
            let pool = JudgePool::initialize(&JudgeConfig::default()).await?;
            println!("Public IP: {}", pool.public_ip());
            println!("Live judges ({}):", pool.judges().len());
            for judge in pool.judges() {
                println!("  {}", judge);
            }
        }
        Commands::Check {
            input,
            output,
            workers,
            timeout,
            batch_size,
            prepend_protocol,
            resume_file,
            mmdb,
            remote_address,
        } => {
            // Missing input aborts before the judges are even contacted
            let source = CandidateSource::open(&input)?;

            let judges = Arc::new(JudgePool::initialize(&JudgeConfig::default()).await?);
            println!("Your public IP is: {}", judges.public_ip());
            println!("Checking with {} workers, timeout: {}s", workers, timeout);
            println!();

            let mut checker_config = CheckerConfig::new()
                .with_timeout(Duration::from_secs(timeout))
                .with_remote_address(remote_address);
            if let Some(path) = mmdb {
                checker_config = checker_config.with_mmdb_path(path);
            }
            let checker = Arc::new(ProxyChecker::with_config(checker_config, judges));

            let sink = FileSink::new(
                SinkConfig::new()
                    .with_base(output)
                    .with_prepend_protocol(prepend_protocol),
            );
            let scheduler_config = SchedulerConfig::new()
                .with_workers(workers)
                .with_batch_size(batch_size)
                .with_resume_path(resume_file.unwrap_or_else(|| resume_path_for(Some(&input))));
            let scheduler = Scheduler::new(scheduler_config, checker, sink.clone());

            let shutdown = CancellationToken::new();
            tokio::spawn(wait_for_signal(shutdown.clone()));

            let report = scheduler.run(source, shutdown).await?;

            println!();
            println!("--- Check Finished or Interrupted ---");
            for (set, count) in totals(&report.results) {
                if count > 0 {
                    println!("  {:<7} {:>6}  {}", set, count, sink.path_for(set).display());
                } else {
                    println!("  {:<7} {:>6}", set, count);
                }
            }
            if let Some(resume) = &report.resume {
                println!(
                    "Saved {} unchecked proxies to {}; pass it as input to resume.",
                    resume.count,
                    resume.path.display()
                );
            }
        }
    }

    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::warn!("received SIGINT, stopping"),
        _ = terminate => tracing::warn!("received SIGTERM, stopping"),
    }

    shutdown.cancel();
}
