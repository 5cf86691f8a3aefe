//! Larder server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use larder_core::config::AppConfig;
use larder_scanner::{ScanOptions, scan_directory};
use larder_server::{AppState, create_router, load_tls_config, serve};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Larder - serve opkg package feeds over HTTP(S)
#[derive(Parser, Debug)]
#[command(name = "larderd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "LARDER_CONFIG")]
    config: Option<PathBuf>,

    /// Directory containing the packages (overrides repository.root)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Address to bind to (overrides server.bind)
    #[arg(long)]
    bind: Option<String>,

    /// Number of packages parsed concurrently (overrides repository.workers)
    #[arg(long)]
    workers: Option<usize>,

    /// Scan the root directory, print its package index and exit
    #[arg(long)]
    dump: bool,

    /// Print the client identity for a PEM certificate and exit
    #[arg(long, value_name = "CERT")]
    client_id_for: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(cert) = &args.client_id_for {
        return print_client_id(cert);
    }

    let config = load_config(&args)?;
    let _log_guard = init_tracing(&config)?;

    tracing::info!("Larder v{}", env!("CARGO_PKG_VERSION"));
    config.validate().context("invalid configuration")?;

    if args.dump {
        return dump(&config).await;
    }

    larder_server::metrics::register_metrics();

    let tls = config
        .tls
        .as_ref()
        .map(load_tls_config)
        .transpose()
        .context("failed to load TLS configuration")?
        .map(tokio_rustls::TlsAcceptor::from);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let scheme = config.scheme();

    let state = AppState::load(config)
        .await
        .context("failed to build package repositories")?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!("Serving at {scheme}://{}", listener.local_addr()?);

    serve(listener, app, tls, shutdown_signal()).await?;
    Ok(())
}

/// Merge the config file, `LARDER_` environment variables and flags.
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if let Some(path) = &args.config {
        if !path.exists() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("LARDER_").ignore(&["CONFIG"]).split("__"));

    if let Some(root) = &args.root {
        let root = std::path::absolute(root)
            .with_context(|| format!("invalid root {}", root.display()))?;
        figment = figment.merge(Serialized::default("repository.root", root));
    }
    if let Some(bind) = &args.bind {
        figment = figment.merge(Serialized::default("server.bind", bind));
    }
    if let Some(workers) = args.workers {
        figment = figment.merge(Serialized::default("repository.workers", workers));
    }

    figment.extract().context(
        "failed to load configuration; pass --root, a --config file or LARDER_REPOSITORY__ROOT",
    )
}

/// Log to stderr and, if configured, to a file.
///
/// The returned guard flushes the file writer when dropped.
fn init_tracing(config: &AppConfig) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.filter().into());

    let (file_layer, guard) = match &config.logging.file {
        Some(path) => {
            let file_name = path
                .file_name()
                .with_context(|| format!("invalid log file {}", path.display()))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn print_client_id(cert: &Path) -> Result<()> {
    let pem = std::fs::read(cert).with_context(|| format!("failed to read {}", cert.display()))?;
    let identity = larder_core::identity_from_pem(&pem)
        .with_context(|| format!("failed to parse {}", cert.display()))?;
    println!("{identity}");
    Ok(())
}

/// Print the `Packages` document of the root directory.
async fn dump(config: &AppConfig) -> Result<()> {
    let options = ScanOptions::from(&config.repository);
    let scan = scan_directory(&config.repository.root, &options)
        .await
        .context("failed to scan repository root")?;
    tracing::info!(
        packages = scan.index.len(),
        failed = scan.failed,
        elapsed_ms = scan.elapsed.as_millis() as u64,
        "Parsed packages"
    );

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(scan.index.to_packages_text().as_bytes())?;
    stdout.flush()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
