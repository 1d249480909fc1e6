//! `csid` — CSI controller plugin for clustered filesystems.
//!
//! Loads the cluster configuration, bootstraps the primary fileset and then
//! serves CSI requests over QUIC.  `csid probe` connects to a running
//! instance and reports its plugin info and readiness.

mod tls;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use libcsi::backend::scale::ScaleBackend;
use libcsi::config::DriverConfig;
use libcsi::connector::rest::RestConnectorFactory;
use libcsi::nodemap::PublishSettings;
use libcsi::transport::{CsiClient, CsiServer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "csid", version, about = "CSI controller plugin over QUIC")]
struct Cli {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(flatten)]
    serve: ServeArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve CSI requests (the default)
    Serve,
    /// Query a running plugin
    Probe(ProbeArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Cluster configuration file (JSON or YAML)
    #[arg(long, global = true, env = "SCALE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, global = true, default_value = "0.0.0.0:7443")]
    endpoint: SocketAddr,

    #[arg(long, global = true, env = "CSI_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    #[arg(long, global = true, env = "CSI_TLS_KEY")]
    tls_key: Option<PathBuf>,

    /// Host directory bind-mounted into the plugin
    #[arg(long, global = true, env = "SCALE_HOSTPATH")]
    host_path: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    #[arg(long, default_value = "127.0.0.1:7443")]
    addr: SocketAddr,

    /// Name expected in the server certificate
    #[arg(long, default_value = "localhost")]
    server_name: String,

    /// CA bundle used to verify the server
    #[arg(long)]
    ca: PathBuf,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.with_target(false).init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let (Some(config_path), Some(cert), Some(key)) = (args.config, args.tls_cert, args.tls_key)
    else {
        bail!("--config, --tls-cert and --tls-key are required to serve");
    };
    let Some(host_path) = args.host_path else {
        bail!("--host-path (or SCALE_HOSTPATH) is required to serve");
    };

    let config = DriverConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    info!(clusters = config.clusters.len(), "configuration loaded");

    let factory = RestConnectorFactory::new(&config);
    let backend = ScaleBackend::bootstrap(
        &config,
        &factory,
        &host_path.to_string_lossy(),
        PublishSettings::from_env(),
    )
    .await
    .context("driver bootstrap failed")?;

    let tls = tls::server_config(&cert, &key)?;
    let server = CsiServer::new(args.endpoint, tls, Arc::new(backend))?;

    tokio::select! {
        res = server.serve() => res?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            server.endpoint().close(0u32.into(), b"shutdown");
        }
    }
    Ok(())
}

async fn probe(args: ProbeArgs) -> Result<()> {
    let tls = tls::client_config(&args.ca)?;
    let client = CsiClient::connect(args.addr, &args.server_name, tls)
        .await
        .with_context(|| format!("failed to connect to {}", args.addr))?;
    let result = client.probe().await;
    client.close();

    let (info, ready) = result?;
    println!("{} {} ready={ready}", info.name, info.vendor_version);
    if !ready {
        bail!("plugin is not ready");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);
    info!("csid v{} starting", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        None | Some(Command::Serve) => serve(cli.serve).await,
        Some(Command::Probe(args)) => probe(args).await,
    };
    if let Err(e) = &result {
        error!("csid failed: {e:#}");
    }
    result
}
