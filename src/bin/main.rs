//! external-dns-docker binary entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use external_dns_docker::telemetry::LogFormat;
use external_dns_docker::{
    config, health, telemetry, Controller, ControllerConfig, DockerSource, Error,
    MultiZoneProvider, Provider, Rfc2136Config, Rfc2136Provider, Source,
};

/// Watches Docker containers and manages DNS records via an
/// RFC2136-compatible server based on container labels.
#[derive(Parser, Debug)]
#[command(name = "external-dns-docker")]
#[command(version, about, long_about = None)]
struct Args {
    /// RFC2136 DNS server host (single-zone mode)
    #[arg(long, env = "EXTERNAL_DNS_RFC2136_HOST")]
    rfc2136_host: Option<String>,

    /// RFC2136 DNS server port
    #[arg(long, env = "EXTERNAL_DNS_RFC2136_PORT", default_value_t = 53)]
    rfc2136_port: u16,

    /// DNS zone to manage (single-zone mode)
    #[arg(long, env = "EXTERNAL_DNS_RFC2136_ZONE")]
    rfc2136_zone: Option<String>,

    /// TSIG key name
    #[arg(long, env = "EXTERNAL_DNS_RFC2136_TSIG_KEY", default_value = "")]
    rfc2136_tsig_key: String,

    /// TSIG secret (base64-encoded); mutually exclusive with --rfc2136-tsig-secret-file
    #[arg(long, env = "EXTERNAL_DNS_RFC2136_TSIG_SECRET")]
    rfc2136_tsig_secret: Option<String>,

    /// Path to file containing the base64-encoded TSIG secret; mutually
    /// exclusive with --rfc2136-tsig-secret
    #[arg(long, env = "EXTERNAL_DNS_RFC2136_TSIG_SECRET_FILE")]
    rfc2136_tsig_secret_file: Option<PathBuf>,

    /// TSIG algorithm (e.g. hmac-sha256, hmac-sha512)
    #[arg(long, env = "EXTERNAL_DNS_RFC2136_TSIG_ALG", default_value = "hmac-sha256")]
    rfc2136_tsig_alg: String,

    /// Minimum TTL enforced on all DNS records (0 = disabled)
    #[arg(long, env = "EXTERNAL_DNS_RFC2136_MIN_TTL", default_value_t = 0)]
    rfc2136_min_ttl: u32,

    /// Timeout for RFC2136 DNS operations (AXFR and UPDATE)
    #[arg(long, env = "EXTERNAL_DNS_RFC2136_TIMEOUT", value_parser = humantime::parse_duration, default_value = "10s")]
    rfc2136_timeout: Duration,

    /// Path to YAML file defining multiple RFC2136 zones (mutually
    /// exclusive with single-zone flags)
    #[arg(long, env = "EXTERNAL_DNS_RFC2136_CONFIG_FILE")]
    rfc2136_config_file: Option<PathBuf>,

    /// Docker daemon address (e.g. unix:///var/run/docker.sock, tcp://host:2376)
    #[arg(long, env = "EXTERNAL_DNS_DOCKER_HOST")]
    docker_host: Option<String>,

    /// Periodic reconciliation interval
    #[arg(long, env = "EXTERNAL_DNS_INTERVAL", value_parser = humantime::parse_duration, default_value = "60s")]
    interval: Duration,

    /// Event debounce duration (quiet period after Docker events before reconciling)
    #[arg(long, env = "EXTERNAL_DNS_DEBOUNCE", value_parser = humantime::parse_duration, default_value = "5s")]
    debounce: Duration,

    /// Run exactly one reconciliation cycle and exit
    #[arg(long, env = "EXTERNAL_DNS_ONCE")]
    once: bool,

    /// Log planned DNS changes without applying them
    #[arg(long, env = "EXTERNAL_DNS_DRY_RUN")]
    dry_run: bool,

    /// Ownership identifier written to TXT records (default: external-dns-docker)
    #[arg(long, env = "EXTERNAL_DNS_OWNER_ID", default_value = "")]
    owner_id: String,

    /// Skip the startup DNS connectivity and TSIG credential check
    #[arg(long, env = "EXTERNAL_DNS_SKIP_PREFLIGHT")]
    skip_preflight: bool,

    /// Base duration for exponential backoff on consecutive reconciliation failures
    #[arg(long, env = "EXTERNAL_DNS_RECONCILE_BACKOFF_BASE", value_parser = humantime::parse_duration, default_value = "5s")]
    reconcile_backoff_base: Duration,

    /// Maximum backoff duration for reconciliation failures
    #[arg(long, env = "EXTERNAL_DNS_RECONCILE_BACKOFF_MAX", value_parser = humantime::parse_duration, default_value = "5m")]
    reconcile_backoff_max: Duration,

    /// Port for the HTTP health check server (0 to disable)
    #[arg(long, env = "EXTERNAL_DNS_HEALTH_PORT", default_value_t = 8080)]
    health_port: u16,

    /// HTTP path for the Prometheus metrics endpoint
    #[arg(long, env = "EXTERNAL_DNS_METRICS_PATH", default_value = "/metrics")]
    metrics_path: String,

    /// Maximum time to wait for graceful shutdown after SIGTERM
    #[arg(long, env = "EXTERNAL_DNS_SHUTDOWN_TIMEOUT", value_parser = humantime::parse_duration, default_value = "30s")]
    shutdown_timeout: Duration,

    /// Log level: debug, info, warn, error
    #[arg(long, env = "EXTERNAL_DNS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format: text or json
    #[arg(long, env = "EXTERNAL_DNS_LOG_FORMAT", default_value = "text")]
    log_format: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let format: LogFormat = match args.log_format.parse() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("invalid --log-format: {e}");
            return ExitCode::FAILURE;
        }
    };
    telemetry::init(&args.log_level, format);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "exiting with error");
            ExitCode::FAILURE
        }
    }
}

/// Build and run the daemon. Returns an error on fatal configuration
/// problems and on once-mode reconciliation failures.
async fn run(args: Args) -> Result<(), Error> {
    let (provider, mode, zones) = build_provider(&args)?;

    let source = Arc::new(DockerSource::new(args.docker_host.as_deref())?);

    if !args.skip_preflight {
        match tokio::time::timeout(args.rfc2136_timeout, provider.preflight()).await {
            Ok(Ok(())) => info!("DNS preflight check passed"),
            Ok(Err(e)) => {
                error!(error = %e, "DNS preflight check failed; use --skip-preflight to bypass");
                return Err(e);
            }
            Err(_) => {
                error!("DNS preflight check timed out; use --skip-preflight to bypass");
                return Err(Error::Timeout(args.rfc2136_timeout));
            }
        }
    }

    let ctrl = Controller::new(
        source.clone() as Arc<dyn Source>,
        provider,
        ControllerConfig {
            interval: args.interval,
            debounce: args.debounce,
            backoff_base: args.reconcile_backoff_base,
            backoff_max: args.reconcile_backoff_max,
            dry_run: args.dry_run,
            once: args.once,
            owner_id: args.owner_id.clone(),
        },
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    // Health check server.
    {
        let ready = ctrl.ready_flag();
        let metrics_path = args.metrics_path.clone();
        let port = args.health_port;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = health::serve(port, &metrics_path, ready, shutdown).await {
                error!(error = %e, "health server failed");
            }
        });
    }

    // Docker event watcher (not needed for once mode).
    let watch_handle = if args.once {
        None
    } else {
        let source = source.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move { source.watch(shutdown).await }))
    };

    info!(
        mode,
        zones,
        interval = %humantime::format_duration(args.interval),
        dry_run = args.dry_run,
        once = args.once,
        "starting external-dns-docker"
    );

    let result = ctrl.run(shutdown.clone()).await;

    // Stop background tasks regardless of how the loop ended.
    shutdown.cancel();

    if let Some(handle) = watch_handle {
        if tokio::time::timeout(args.shutdown_timeout, handle).await.is_err() {
            warn!(
                timeout = %humantime::format_duration(args.shutdown_timeout),
                "shutdown timeout exceeded, forcing exit"
            );
        }
    }

    match result {
        Ok(()) => {
            info!("shutdown complete");
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            info!("shutdown complete");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Detect the provider mode and build it.
///
/// Priority: YAML config file, then env-prefix zones, then single-zone
/// flags. Mixing any two modes is a fatal configuration error.
fn build_provider(args: &Args) -> Result<(Arc<dyn Provider>, &'static str, usize), Error> {
    let single_zone_flags_set = args.rfc2136_host.is_some() || args.rfc2136_zone.is_some();
    let env_zones = config::load_zones_from_env()?;

    if let Some(path) = &args.rfc2136_config_file {
        if single_zone_flags_set {
            return Err(Error::config(
                "--rfc2136-config-file is mutually exclusive with --rfc2136-host / --rfc2136-zone",
            ));
        }
        if env_zones.is_some() {
            return Err(Error::config(
                "--rfc2136-config-file is mutually exclusive with EXTERNAL_DNS_RFC2136_ZONE_* env vars",
            ));
        }
        let configs = config::load_zones_file(path)?;
        let mp = MultiZoneProvider::new(configs)?;
        let zones = mp.zone_count();
        return Ok((Arc::new(mp), "multi-zone (yaml-file)", zones));
    }

    if let Some(configs) = env_zones {
        if single_zone_flags_set {
            return Err(Error::config(
                "EXTERNAL_DNS_RFC2136_ZONE_* env vars are mutually exclusive with --rfc2136-host / --rfc2136-zone",
            ));
        }
        let mp = MultiZoneProvider::new(configs)?;
        let zones = mp.zone_count();
        return Ok((Arc::new(mp), "multi-zone (env-prefix)", zones));
    }

    if let (Some(host), Some(zone)) = (&args.rfc2136_host, &args.rfc2136_zone) {
        if args.rfc2136_tsig_secret.is_some() && args.rfc2136_tsig_secret_file.is_some() {
            return Err(Error::config(
                "--rfc2136-tsig-secret and --rfc2136-tsig-secret-file are mutually exclusive",
            ));
        }
        let tsig_secret = match &args.rfc2136_tsig_secret_file {
            Some(path) => config::read_secret_file(path).map_err(|e| {
                Error::config(format!("reading TSIG secret file {}: {e}", path.display()))
            })?,
            None => args.rfc2136_tsig_secret.clone().unwrap_or_default(),
        };
        let provider = Rfc2136Provider::new(Rfc2136Config {
            host: host.clone(),
            port: args.rfc2136_port,
            zone: zone.clone(),
            tsig_key: args.rfc2136_tsig_key.clone(),
            tsig_secret,
            tsig_alg: args.rfc2136_tsig_alg.clone(),
            min_ttl: args.rfc2136_min_ttl,
            timeout: args.rfc2136_timeout,
        })?;
        return Ok((Arc::new(provider), "single-zone", 1));
    }

    Err(Error::config(
        "no RFC2136 configuration provided; use --rfc2136-host/--rfc2136-zone, \
         EXTERNAL_DNS_RFC2136_ZONE_* env vars, or --rfc2136-config-file",
    ))
}

/// Cancel the shutdown token on SIGTERM or SIGINT.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    shutdown.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received interrupt, shutting down");
        }
        shutdown.cancel();
    });
}
