mod collectors;
mod config;
mod http;
mod metrics;
mod snapshot;

use axum::serve;
use clap::Parser;
use collectors::{Collector, CollectorSettings};
use config::Config;
use metrics::Metrics;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "netfetch")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Overrides the port of `listen`.
    #[arg(long)]
    web_port: Option<u16>,
    /// Collect once, print the snapshot as JSON and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };
    if let Some(port) = cli.web_port {
        if let Err(err) = cfg.override_port(port) {
            error!(error = %err, "не удалось применить --web-port");
            std::process::exit(1);
        }
    }

    let settings = CollectorSettings::from(&cfg);

    if cli.once {
        let collector = Collector::start(settings, None).await;
        collector.collect_dynamic().await;
        match serde_json::to_string_pretty(&collector.snapshot().await) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                error!(error = %err, "не удалось сериализовать снимок");
                std::process::exit(1);
            }
        }
        return;
    }

    info!(
        listen = %cfg.listen,
        refresh_interval_secs = cfg.refresh_interval_secs,
        command_timeout = %humantime::format_duration(settings.command_timeout),
        "запуск netfetch"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            std::process::exit(1);
        }
    };

    let collector = Collector::start(settings, Some(metrics.clone())).await;
    info!(modules = collector.modules().len(), "статические факты собраны");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let listen = cfg.listen.clone();
        let metrics = metrics.clone();
        let collector = collector.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, collector);
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "некорректный адрес listen");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "не удалось запустить HTTP-сервер");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "ошибка HTTP-сервера");
            }
        })
    };

    let refresh_task = {
        let collector = collector.clone();
        let interval = Duration::from_secs(cfg.refresh_interval_secs);
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("получен сигнал остановки цикла обновления");
                        break;
                    }
                    _ = ticker.tick() => {
                        collector.collect_dynamic().await;
                    }
                }
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
    }
    info!("получен Ctrl+C, выполняется остановка");

    let _ = shutdown_tx.send(true);

    let _ = refresh_task.await;
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
