// src/main.rs - Control unit entry point
use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;

use climate_unit::bus;
use climate_unit::config::{self, Config};
use climate_unit::coordinator::{Coordinator, CoordinatorInputs};
use climate_unit::queue::recent_channel;
use climate_unit::serial::simulator::SimulatedActuator;
use climate_unit::serial::{ActuatorLink, LinkSettings, PortProvider, SystemPorts};
use climate_unit::shutdown::Shutdown;
use climate_unit::web::{self, ControlSurface, CoordinatorHandle, MockControl};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Climate control unit
#[derive(Parser, Debug)]
#[command(name = "climate-unit", about = "Window climate control unit: MQTT temperature in, serial actuator out.")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "climate.toml")]
    config: String,

    /// Serve canned data on the HTTP API instead of live state
    #[arg(long)]
    mock: bool,

    /// Talk to an in-process simulated actuator instead of serial hardware
    #[arg(long)]
    simulate_actuator: bool,
}

fn load(path: &str) -> Result<Config, BoxError> {
    let config = if std::path::Path::new(path).exists() {
        config::load_config(path)?
    } else {
        eprintln!("Config file '{}' not found, using defaults", path);
        Config::default()
    };
    config.validate()?;
    Ok(config)
}

#[cfg(unix)]
async fn termination() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Cannot install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn termination() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Trigger `shutdown` on SIGINT/SIGTERM.
async fn wait_for_signal(shutdown: Shutdown) {
    tokio::select! {
        _ = termination() => {
            tracing::info!("Shutdown signal received");
            shutdown.trigger();
        }
        _ = shutdown.wait() => {}
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let mut config = load(&cli.config)?;
    config.server.use_mock |= cli.mock;
    config.serial.simulate |= cli.simulate_actuator;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(config.logging.tracing_level()?)
        .init();

    tracing::info!("Starting climate control unit");
    tracing::info!(
        "Thresholds: hot > {:.1}°C, too hot > {:.1}°C",
        config.thermal.hot_threshold,
        config.thermal.too_hot_threshold
    );

    let shutdown = Shutdown::new();

    let (temp_tx, temp_rx) = mpsc::channel::<f64>(32);
    let (request_tx, request_rx) = mpsc::channel(16);
    let (interval_tx, interval_rx) = mpsc::unbounded_channel();
    let (readings_tx, readings_rx) = recent_channel(config.serial.inbound_capacity);
    let (commands_tx, commands_rx) = recent_channel(1);

    let coordinator = Coordinator::new(&config, interval_tx, commands_tx);
    let inputs = CoordinatorInputs {
        temperatures: temp_rx,
        requests: request_rx,
        readings: readings_rx,
    };
    let coordinator_task = tokio::spawn(coordinator.run(inputs, shutdown.clone()));

    let provider: Arc<dyn PortProvider> = if config.serial.simulate {
        let period = std::time::Duration::from_millis(config.serial.command_period_ms);
        let (ports, actuator) = SimulatedActuator::attach(period);
        tokio::spawn(actuator.run(shutdown.clone()));
        Arc::new(ports)
    } else {
        Arc::new(SystemPorts)
    };
    let link = ActuatorLink::new(provider, LinkSettings::from(&config.serial));
    let link_task = tokio::spawn(link.run(shutdown.clone(), readings_tx, commands_rx));

    let (client, eventloop) = bus::connect(&config.bus);
    tracing::info!("MQTT broker at {}:{}", config.bus.host, config.bus.port);
    let subscriber_task = tokio::spawn(bus::run_subscriber(
        client.clone(),
        eventloop,
        config.bus.temperature_topic.clone(),
        std::time::Duration::from_millis(config.bus.retry_ms),
        temp_tx,
        shutdown.clone(),
    ));
    let publisher_task = tokio::spawn(bus::run_publisher(
        client,
        config.bus.interval_topic.clone(),
        interval_rx,
        shutdown.clone(),
    ));

    let control: Arc<dyn ControlSurface> = if config.server.use_mock {
        tracing::info!("Using mock control surface");
        Arc::new(MockControl::new())
    } else {
        Arc::new(CoordinatorHandle::new(request_tx, config.server.request_timeout()))
    };
    let app = web::create_router(control);

    tokio::spawn(wait_for_signal(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("Web API listening on http://{}", listener.local_addr()?);
    let server_shutdown = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.wait().await })
        .await;
    if let Err(e) = &served {
        tracing::error!("Web server failed: {}", e);
        shutdown.trigger();
    }

    for (name, task) in [
        ("coordinator", coordinator_task),
        ("actuator link", link_task),
        ("mqtt subscriber", subscriber_task),
        ("mqtt publisher", publisher_task),
    ] {
        if let Err(e) = task.await {
            tracing::error!("{} task failed: {}", name, e);
        }
    }
    tracing::info!("Shutdown complete");
    served.map_err(Into::into)
}
