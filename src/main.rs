//! nftban - qBittorrent ban sidecar for nftables
//!
//! # Usage
//!
//! ```bash
//! # Proxy the WebUI on :19830 and manage the ban sets
//! USE_NFTABLES=yes QBT_ENDPOINT=http://127.0.0.1:8080 nftban
//!
//! # Print the ban table that would be installed
//! nftban render --peer-port 51413
//!
//! # Validate the ban table with nft --check
//! nftban check
//! ```

use clap::{Parser, Subcommand};
use nftban::audit::{AuditEvent, AuditLog, EventType};
use nftban::config::{Config, ServeArgs};
use nftban::core::bootstrap;
use nftban::core::executor::NftExecutor;
use nftban::core::verify::verify_script;
use nftban::proxy::{self, ProxyState};
use nftban::{BanEngine, Error};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "nftban", version = build::PKG_VERSION, long_version = build::CLAP_LONG_VERSION)]
#[command(about = "qBittorrent ban sidecar for nftables", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Append logs to this file instead of stderr
    #[arg(long, global = true, env = "NFTBAN_LOG_FILE", value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the rendered ban table script
    Render(ServeArgs),
    /// Check the rendered ban table with `nft --check` without applying it
    Check(ServeArgs),
}

fn init_logging(log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if let Some(path) = log_file {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            nftban::utils::ensure_dir(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        builder.with_ansi(false).with_writer(Mutex::new(file)).init();
    } else {
        builder.with_writer(std::io::stderr).init();
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_file.as_deref()) {
        eprintln!("Error: failed to open log file: {e}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> nftban::Result<()> {
    match cli.command {
        None => serve(Config::from_args(cli.serve)?).await,
        Some(Commands::Render(args)) => {
            let config = Config::from_args(args)?;
            print!("{}", bootstrap::render(bootstrap::TEMPLATE, &config.table));
            Ok(())
        }
        Some(Commands::Check(args)) => {
            let config = Config::from_args(args)?;
            let executor = NftExecutor::elevated(&config.nft_command, config.elevation)?;
            let script = bootstrap::render(bootstrap::TEMPLATE, &config.table);
            let result = verify_script(&executor, &script).await?;
            if result.success {
                println!("✓ Ban table script is valid");
                Ok(())
            } else {
                for message in &result.errors {
                    eprintln!("  {message}");
                }
                Err(Error::Nftables {
                    message: "ban table script failed verification".to_string(),
                    stderr: Some(result.errors.join("\n")),
                    exit_code: None,
                })
            }
        }
    }
}

async fn serve(config: Config) -> nftban::Result<()> {
    let engine = if config.use_nftables {
        let executor = NftExecutor::elevated(&config.nft_command, config.elevation)?;
        info!("Running nft as: {}", executor.command_line());

        if config.install_table {
            let result = bootstrap::install(&executor, &config.table).await;
            AuditLog::new(&config.audit_path)
                .record(AuditEvent::from_result(
                    EventType::Bootstrap,
                    serde_json::json!({
                        "peer_port": config.table.peer_port,
                        "cgroup_level": config.table.cgroup_level,
                    }),
                    &result,
                ))
                .await;
            result?;
        }

        Some(BanEngine::with_queue_depth(
            config.binding.clone(),
            executor,
            config.queue_depth,
        ))
    } else {
        warn!("nftables disabled; ban requests are forwarded upstream");
        None
    };

    let state = Arc::new(ProxyState::from_config(&config, engine)?);
    let listener = tokio::net::TcpListener::bind(config.listen).await?;

    info!("qbt endpoint: {}", config.upstream.origin().ascii_serialization());
    info!(
        "nftban {} started: http://{}",
        build::PKG_VERSION,
        listener.local_addr()?
    );

    axum::serve(listener, proxy::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("nftban stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutting down");
}
