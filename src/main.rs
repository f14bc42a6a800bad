mod collectors;
mod config;
mod logger;
mod poller;
mod session;
mod state;
mod store;
mod view;

use clap::Parser;
use collectors::inventory::SystemInventory;
use collectors::system::SystemProbe;
use collectors::{PerformanceCounter, TemperatureProbe};
use config::{Config, ConfigError, OutputFormat};
use poller::PollSettings;
use session::{SessionSettings, TelemetrySession};
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use view::Gauges;

const DEFAULT_CONFIG_PATH: &str = "./tempgauge.yaml";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "tempgauge")]
#[command(version)]
struct Cli {
    /// Config file; defaults to ./tempgauge.yaml when present.
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    print_default_config: bool,
    /// Exit after this many gauge refreshes.
    #[arg(long)]
    ticks: Option<u64>,
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            init_tracing(None);
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if cli.json {
        cfg.output = OutputFormat::Json;
    }
    init_tracing(cfg.log_file.as_deref());

    info!(
        poll_interval = %humantime::format_duration(cfg.poll_interval),
        refresh_interval = %humantime::format_duration(cfg.refresh_interval),
        disk_target = %cfg.disk_target,
        "starting tempgauge"
    );

    let inventory = SystemInventory::detect();
    let mut session = TelemetrySession::new(
        SystemProbe::new(),
        SystemProbe::new(),
        &inventory,
        SessionSettings {
            poll: PollSettings {
                interval: cfg.poll_interval,
                log_every: cfg.log_every_cycles,
            },
            disk_target: cfg.disk_target.clone(),
        },
    );

    let output = cfg.output;
    let ticks = run(
        &mut session,
        cfg.refresh_interval,
        cli.ticks,
        shutdown_signal(),
        |gauges| print_gauges(gauges, output),
    )
    .await;

    if let Err(err) = session.shutdown(SHUTDOWN_GRACE) {
        warn!(error = %err, "poller did not shut down cleanly");
    }
    info!(
        ticks,
        temperature_snapshots = session.temperature_store().version(),
        performance_snapshots = session.performance_store().version(),
        last = %session.view().gauges(),
        "tempgauge stopped"
    );
}

async fn run<P, C, S, F>(
    session: &mut TelemetrySession<P, C>,
    refresh_interval: Duration,
    max_ticks: Option<u64>,
    shutdown: S,
    mut render: F,
) -> u64
where
    P: TemperatureProbe,
    C: PerformanceCounter,
    S: std::future::Future<Output = ()>,
    F: FnMut(&Gauges),
{
    session.activate();

    let mut ticker = tokio::time::interval(refresh_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);
    let mut ticks = 0_u64;

    loop {
        if max_ticks.is_some_and(|max| ticks >= max) {
            break;
        }
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                if let Some(gauges) = session.tick() {
                    render(gauges);
                }
                ticks += 1;
            }
        }
    }

    session.deactivate();
    ticks
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

fn print_gauges(gauges: &Gauges, output: OutputFormat) {
    match output {
        OutputFormat::Text => println!("{gauges}"),
        OutputFormat::Json => match serde_json::to_string(gauges) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(error = %err, "failed to encode gauges"),
        },
    }
}

fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => Config::load_from_file(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::load_from_file(DEFAULT_CONFIG_PATH)
        }
        None => Ok(Config::default()),
    }
}

fn init_tracing(log_file: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file.map(|path| (path, File::create(path))) {
        Some((_, Ok(file))) => builder.with_ansi(false).with_writer(Mutex::new(file)).init(),
        Some((path, Err(err))) => {
            builder.init();
            warn!(error = %err, path, "cannot open log file, logging to stderr");
        }
        None => builder.init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::fakes::{FakePerformanceCounter, FakeTemperatureProbe};

    fn session() -> TelemetrySession<FakeTemperatureProbe, FakePerformanceCounter> {
        TelemetrySession::new(
            FakeTemperatureProbe {
                disks: vec![("C:0".to_string(), 35)],
                ..FakeTemperatureProbe::default()
            },
            FakePerformanceCounter::default(),
            &SystemInventory::default(),
            SessionSettings {
                poll: PollSettings {
                    interval: Duration::from_millis(2),
                    log_every: 10,
                },
                disk_target: "0".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn run_stops_after_max_ticks() {
        let mut session = session();
        let mut rendered = Vec::new();
        let ticks = run(
            &mut session,
            Duration::from_millis(5),
            Some(3),
            std::future::pending::<()>(),
            |g| rendered.push(g.clone()),
        )
        .await;

        assert_eq!(ticks, 3);
        assert_eq!(rendered.len(), 3);
        assert!(!session.view().is_ticking());
        session.shutdown(Duration::from_secs(5)).expect("shutdown");
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let mut session = session();
        let ticks = run(
            &mut session,
            Duration::from_secs(60),
            None,
            tokio::time::sleep(Duration::from_millis(20)),
            |_| {},
        )
        .await;

        // The first interval tick completes immediately.
        assert_eq!(ticks, 1);
        session.shutdown(Duration::from_secs(5)).expect("shutdown");
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        assert!(load_config(Some("/nonexistent/tempgauge.yaml")).is_err());
    }

    #[test]
    fn gauges_encode_as_json() {
        let gauges = Gauges {
            cpu_temp_celsius: 51,
            ..Gauges::default()
        };
        let line = serde_json::to_string(&gauges).expect("json");
        assert!(line.contains("\"cpu_temp_celsius\":51"));
        assert!(line.contains("\"captured_at\":null"));
    }
}
