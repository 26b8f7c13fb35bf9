//! RoverCam server binary
//!
//! # Usage
//!
//! ```bash
//! # Real controller on a UART
//! rovercam-server --serial-device /dev/ttyUSB0 --baud-rate 115200
//!
//! # No hardware: simulated controller and test-pattern camera
//! rovercam-server --mock-link
//!
//! # From a config file
//! rovercam-server --config rovercam.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rovercam_core::{
    CameraSensor, FrameSource, LinkTiming, MockTransport, PixelFormat, SharedLink,
    SimulatedSensor, TestPatternSource,
};
use rovercam_http_server::{
    api::{build_router, build_stream_router, AppState},
    config::{Config, LinkConfig},
};

/// How long open streams get to finish after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// RoverCam server
///
/// Bridges HTTP clients to the rover's motion controller and camera.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "ROVERCAM_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long, env = "ROVERCAM_HOST")]
    bind_host: Option<String>,

    /// HTTP port
    #[arg(long, env = "ROVERCAM_HTTP_PORT")]
    http_port: Option<u16>,

    /// Serial device of the motion controller
    #[arg(long, env = "ROVERCAM_SERIAL_DEVICE")]
    serial_device: Option<String>,

    /// Serial baud rate
    #[arg(long, env = "ROVERCAM_BAUD_RATE")]
    baud_rate: Option<u32>,

    /// Use the simulated controller instead of a serial port
    #[arg(long, env = "ROVERCAM_MOCK_LINK")]
    mock_link: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.bind_host {
            config.server.host = host;
        }
        if let Some(port) = self.http_port {
            config.server.http_port = port;
        }
        if let Some(device) = self.serial_device {
            config.link.device = device;
        }
        if let Some(baud) = self.baud_rate {
            config.link.baud_rate = baud;
        }
        if self.mock_link {
            config.link.mock = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_ref())?;
    args.apply(&mut config);
    let config = Arc::new(config);

    tracing::info!(
        "Configuration: HTTP port={}, stream port={:?}, link={}, ack timeout={}ms, policy={:?}",
        config.server.http_port,
        config.server.stream_port,
        if config.link.mock { "simulated" } else { config.link.device.as_str() },
        config.link.ack_timeout_ms,
        config.link.ack_policy
    );

    let link = open_link(&config.link)?;

    let camera = &config.camera;
    let source: Arc<dyn FrameSource> = Arc::new(TestPatternSource::new(
        camera.width,
        camera.height,
        camera.pixel_format,
    ));
    let sensor: Arc<dyn CameraSensor> =
        Arc::new(SimulatedSensor::new(camera.pixel_format == PixelFormat::Jpeg));
    tracing::info!(
        "Camera: {}x{} {:?} test pattern, JPEG quality {}",
        camera.width,
        camera.height,
        camera.pixel_format,
        camera.jpeg_quality
    );

    let state = AppState::new(config.clone(), link, source, sensor);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let bind_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("HTTP server listening on {}", bind_addr);
    let mut servers = vec![spawn_server(listener, build_router(state.clone()), &shutdown_tx)];

    if let Some(port) = config.server.stream_port {
        let stream_addr = format!("{}:{}", config.server.host, port);
        let listener = TcpListener::bind(&stream_addr).await?;
        tracing::info!("Stream server listening on {}", stream_addr);
        servers.push(spawn_server(listener, build_stream_router(state), &shutdown_tx));
    }

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, initiating graceful shutdown...");
    let _ = shutdown_tx.send(());

    for server in servers {
        match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
            Ok(joined) => joined??,
            Err(_) => tracing::warn!(
                "Open connections still active after {:?}, exiting anyway",
                SHUTDOWN_GRACE
            ),
        }
    }

    tracing::info!("RoverCam server shutdown complete");
    Ok(())
}

fn spawn_server(
    listener: TcpListener,
    router: Router,
    shutdown_tx: &broadcast::Sender<()>,
) -> JoinHandle<std::io::Result<()>> {
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
    })
}

fn open_link(config: &LinkConfig) -> Result<SharedLink> {
    let timing = config.timing();
    if config.mock {
        tracing::info!("Using simulated motion controller");
        return Ok(SharedLink::new(MockTransport::simulated(), timing));
    }

    open_serial(config, timing)
}

#[cfg(feature = "serial")]
fn open_serial(config: &LinkConfig, timing: LinkTiming) -> Result<SharedLink> {
    let transport = rovercam_core::SerialTransport::open(&config.device, config.baud_rate)?;
    Ok(SharedLink::new(transport, timing))
}

#[cfg(not(feature = "serial"))]
fn open_serial(_config: &LinkConfig, _timing: LinkTiming) -> Result<SharedLink> {
    anyhow::bail!("built without serial support; run with --mock-link")
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
