use axum::serve;
use clap::{Parser, Subcommand};
use hosttel::collectors::{
    count_online_cores, outbound_ip_or_loopback, read_all_core_counters, read_core_counters,
    read_memory_counters, scan_partitions,
};
use hosttel::{collect_snapshot, http, Config, TelemetryError};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hosttel")]
#[command(version)]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    print_default_config: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Outbound IP address (127.0.0.1 when it cannot be determined)
    Ip,
    /// Online core count and tick counters of every core
    Cores,
    /// Tick counters of one core
    Core {
        #[arg(long)]
        index: usize,
    },
    /// RAM and swap counters in bytes
    Memory,
    /// Partition inventory
    Partitions,
    /// Every collector at once (default)
    Snapshot,
    /// Serve the collectors over HTTP on demand
    Serve,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match &cli.config {
        Some(path) => match Config::load_from_file(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = %err, "не удалось загрузить конфигурацию");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    let cfg = Arc::new(cfg);

    match cli.command.unwrap_or(Command::Snapshot) {
        Command::Serve => run_server(cfg).await,
        command => {
            let task = tokio::task::spawn_blocking(move || run_once(&command, &cfg));
            match task.await {
                Ok(Ok(text)) => println!("{text}"),
                Ok(Err(err)) => {
                    error!(error = %err, "сбор телеметрии не удался");
                    std::process::exit(1);
                }
                Err(err) => {
                    error!(error = %err, "задача сбора прервана");
                    std::process::exit(1);
                }
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("не удалось сериализовать результат: {0}")]
    Json(#[from] serde_json::Error),
}

fn run_once(command: &Command, cfg: &Config) -> Result<String, RunError> {
    match command {
        Command::Ip => to_json(&serde_json::json!({
            "ip": outbound_ip_or_loopback(&cfg.network_probe).to_string()
        })),
        Command::Cores => to_json(&http::ApiCores {
            online: count_online_cores()?,
            cores: read_all_core_counters(&cfg.sources.proc_stat)?,
        }),
        Command::Core { index } => to_json(&read_core_counters(&cfg.sources.proc_stat, *index)?),
        Command::Memory => to_json(&read_memory_counters()?),
        Command::Partitions => to_json(&scan_partitions(&cfg.sources, &cfg.storage)?),
        Command::Snapshot | Command::Serve => to_json(&collect_snapshot(cfg)?),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, RunError> {
    Ok(serde_json::to_string_pretty(value)?)
}

async fn run_server(cfg: Arc<Config>) {
    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "некорректный адрес listen");
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, "не удалось запустить HTTP-сервер");
            std::process::exit(1);
        }
    };
    info!(listen = %addr, "запуск hosttel");

    let app = http::build_router(cfg);
    let server = serve(listener, app).with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "не удалось дождаться Ctrl+C");
        }
        info!("получен Ctrl+C, выполняется остановка");
    });

    if let Err(err) = server.await {
        error!(error = %err, "ошибка HTTP-сервера");
    }
}
