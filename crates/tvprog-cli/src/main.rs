//! tvprog - shows what airs on watched channels from a cached XMLTV guide.

/// Application configuration (TOML).
mod config;
/// Program sensors.
mod sensor;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::instrument;
use tracing_subscriber::filter::EnvFilter;
#[cfg(not(feature = "otel"))]
use tracing_subscriber::fmt;
#[cfg(feature = "otel")]
use tracing_subscriber::layer::SubscriberExt;
#[cfg(feature = "otel")]
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{AppConfig, resolve_config_path};
use crate::sensor::{ProgramSensor, create_sensors};
use tvprog_api::xmltv::XmltvClient;
use tvprog_cache::{CacheStore, ProgramBuilder, resolve_cache_path};

/// CLI argument parser.
#[derive(Parser)]
#[command(about, version)]
struct Cli {
    /// Override config/cache directory.
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Update every sensor once and print its state.
    Show(ShowArgs),
    /// Update every sensor periodically.
    Watch(WatchArgs),
    /// Guide cache maintenance.
    Cache(CacheCommand),
}

/// Sensor selection shared by `show` and `watch`.
#[derive(clap::Args)]
struct SensorArgs {
    /// XMLTV guide URL. Falls back to config `provider` if omitted.
    #[arg(long)]
    provider: Option<String>,

    /// Comma-separated channel ids (e.g. "tf1.fr,france2.fr"). Falls back to config `channels` if omitted.
    #[arg(long, value_delimiter = ',')]
    channels: Option<Vec<String>>,

    /// Comma-separated time specs (e.g. "now,tonight,20h45"). Falls back to config `times_to_watch` if omitted.
    #[arg(long, value_delimiter = ',')]
    times: Option<Vec<String>>,
}

/// Arguments for the `show` subcommand.
#[derive(clap::Args)]
struct ShowArgs {
    /// Sensor selection.
    #[command(flatten)]
    sensors: SensorArgs,
}

/// Arguments for the `watch` subcommand.
#[derive(clap::Args)]
struct WatchArgs {
    /// Sensor selection.
    #[command(flatten)]
    sensors: SensorArgs,

    /// Seconds between two updates.
    #[arg(long, default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    interval_secs: u64,
}

/// Arguments for the `cache` subcommand.
#[derive(clap::Args)]
struct CacheCommand {
    /// Cache subcommand to run.
    #[command(subcommand)]
    command: CacheSubcommands,
}

/// Available cache subcommands.
#[derive(Subcommand)]
enum CacheSubcommands {
    /// Show the cache file's age and contents.
    Info,
    /// Delete the cache file.
    Clear,
}

/// Effective sensor settings after merging CLI flags over the config file.
#[derive(Debug)]
struct Settings {
    /// XMLTV guide URL.
    provider: String,
    /// Channel ids to watch.
    channels: Vec<String>,
    /// Time specs to look up.
    times: Vec<String>,
    /// Download bound, if configured.
    fetch_timeout: Option<Duration>,
}

impl Settings {
    /// Merges `args` over the config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be loaded or no provider is set.
    fn resolve(args: &SensorArgs, dir: Option<&PathBuf>) -> Result<Self> {
        let config_path = resolve_config_path(dir).context("failed to resolve config path")?;
        let config = AppConfig::load(&config_path).context("failed to load config")?;

        let Some(provider) = args.provider.clone().or(config.provider) else {
            bail!(
                "no provider configured: set `provider` in {} or pass --provider",
                config_path.display()
            );
        };
        let channels = args.channels.clone().unwrap_or(config.channels);
        let times = args.times.clone().unwrap_or(config.times_to_watch);

        Ok(Self {
            provider,
            channels,
            times,
            fetch_timeout: config.fetch_timeout_secs.map(Duration::from_secs),
        })
    }
}

/// Builds the cache-backed program builder for `settings`.
///
/// # Errors
///
/// Returns an error if the HTTP client fails to build or the cache path
/// cannot be resolved.
fn build_program_builder(
    settings: &Settings,
    dir: Option<&PathBuf>,
) -> Result<ProgramBuilder<XmltvClient>> {
    let mut client = XmltvClient::builder();
    if let Some(timeout) = settings.fetch_timeout {
        client = client.timeout(timeout);
    }
    let client = client.build().context("failed to build XMLTV client")?;

    let cache_path = resolve_cache_path(dir).context("failed to resolve cache path")?;
    Ok(ProgramBuilder::new(client, CacheStore::new(cache_path)))
}

/// Updates every sensor concurrently. Results are in sensor order.
async fn update_all(
    sensors: &mut [ProgramSensor],
    builder: &ProgramBuilder<XmltvClient>,
    provider: &str,
) -> Vec<Result<()>> {
    let now = Local::now();
    futures::future::join_all(
        sensors
            .iter_mut()
            .map(|sensor| sensor.update(builder, provider, &now)),
    )
    .await
}

/// Logs one sensor's state and attributes.
fn report(sensor: &ProgramSensor) {
    tracing::info!(
        "{}\t{}\t{}",
        sensor.entity_id(),
        sensor.name(),
        sensor.state()
    );
    if let Some(attrs) = sensor.attributes() {
        tracing::info!(
            "\t{}\t{} - {} ({} min)\t{}\t{}",
            attrs.title,
            attrs.start.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            attrs.end.with_timezone(&Local).format("%H:%M"),
            attrs.duration,
            attrs.channel_name,
            attrs.category.as_deref().unwrap_or("-"),
        );
        if let Some(icon) = attrs.channel_icon.as_deref() {
            tracing::debug!("\ticon: {icon}");
        }
        if let Some(description) = attrs.description.as_deref() {
            tracing::info!("\t{description}");
        }
    }
}

/// Runs the `show` subcommand.
///
/// # Errors
///
/// Returns an error if settings are incomplete or any sensor update fails.
#[instrument(skip_all)]
async fn run_show(args: &ShowArgs, dir: Option<&PathBuf>) -> Result<()> {
    let settings = Settings::resolve(&args.sensors, dir)?;
    if settings.channels.is_empty() {
        tracing::warn!("No channels configured. Set `channels` in config or pass --channels.");
        return Ok(());
    }
    let builder = build_program_builder(&settings, dir)?;
    let mut sensors = create_sensors(&settings.channels, &settings.times);

    for result in update_all(&mut sensors, &builder, &settings.provider).await {
        result?;
    }

    tracing::info!("Entity\t\t\tName\t\tState");
    for sensor in &sensors {
        report(sensor);
    }
    tracing::info!("Total: {} sensors", sensors.len());

    Ok(())
}

/// Runs the `watch` subcommand. Never returns unless setup fails.
///
/// # Errors
///
/// Returns an error if settings are incomplete or the client fails to build.
/// Update failures are logged and retried on the next tick.
#[instrument(skip_all)]
async fn run_watch(args: &WatchArgs, dir: Option<&PathBuf>) -> Result<()> {
    let settings = Settings::resolve(&args.sensors, dir)?;
    if settings.channels.is_empty() {
        bail!("no channels configured: set `channels` in config or pass --channels");
    }
    let builder = build_program_builder(&settings, dir)?;
    let mut sensors = create_sensors(&settings.channels, &settings.times);

    tracing::info!(
        "Watching {} sensor(s) every {}s",
        sensors.len(),
        args.interval_secs
    );
    let mut interval = tokio::time::interval(Duration::from_secs(args.interval_secs));
    loop {
        interval.tick().await;
        let results = update_all(&mut sensors, &builder, &settings.provider).await;
        for (sensor, result) in sensors.iter().zip(results) {
            match result {
                Ok(()) => report(sensor),
                Err(e) => tracing::error!("{}: update failed: {e:#}", sensor.entity_id()),
            }
        }
    }
}

/// Runs the `cache info` subcommand.
///
/// # Errors
///
/// Returns an error if the cache path cannot be resolved or the file cannot be opened.
fn run_cache_info(dir: Option<&PathBuf>) -> Result<()> {
    let store = CacheStore::new(resolve_cache_path(dir).context("failed to resolve cache path")?);

    let Some(summary) = store.inspect()? else {
        tracing::info!("No cache file at {}", store.path().display());
        return Ok(());
    };

    tracing::info!("Path: {}", store.path().display());
    tracing::info!("Size: {} bytes", summary.size_bytes);
    tracing::info!(
        "Written: {}",
        summary.written_at.map_or_else(
            || String::from("-"),
            |t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
        )
    );
    tracing::info!("Expired: {}", if summary.expired { "yes" } else { "no" });
    if summary.corrupted {
        tracing::warn!("Cache file is damaged; it will be refetched on next use");
    }
    tracing::info!("Channels ({}):", summary.channel_ids.len());
    for id in &summary.channel_ids {
        tracing::info!("  {id}");
    }

    Ok(())
}

/// Runs the `cache clear` subcommand.
///
/// # Errors
///
/// Returns an error if the cache file exists but cannot be removed.
fn run_cache_clear(dir: Option<&PathBuf>) -> Result<()> {
    let store = CacheStore::new(resolve_cache_path(dir).context("failed to resolve cache path")?);
    if !store.clear()? {
        tracing::info!("No cache file at {}", store.path().display());
    }
    Ok(())
}

/// Entry point.
///
/// # Errors
///
/// Returns an error if subcommand execution fails.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    #[cfg(not(feature = "otel"))]
    {
        fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_target(false)
            .init();
    }

    #[cfg(feature = "otel")]
    {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

        let otel_layer = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .and_then(|_| {
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_http()
                    .build()
                    .ok()?;

                let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
                    .with_simple_exporter(exporter)
                    .build();

                let tracer = opentelemetry::trace::TracerProvider::tracer(
                    &tracer_provider,
                    env!("CARGO_PKG_NAME"),
                );
                opentelemetry::global::set_tracer_provider(tracer_provider);

                Some(tracing_opentelemetry::layer().with_tracer(tracer))
            });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .init();
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Show(args) => run_show(&args, cli.dir.as_ref()).await,
        Commands::Watch(args) => run_watch(&args, cli.dir.as_ref()).await,
        Commands::Cache(cache) => match cache.command {
            CacheSubcommands::Info => run_cache_info(cli.dir.as_ref()),
            CacheSubcommands::Clear => run_cache_clear(cli.dir.as_ref()),
        },
    }
}
