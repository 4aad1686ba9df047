use std::{error::Error, path::PathBuf};

use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use streamrelay::{
    bridge::{self, IngestNotification, ShutdownSignals},
    cli::{Cli, Commands, parse_args},
    config::{RelayConfig, load_config},
    error::ControlError,
    ipc,
    launcher::EncoderLauncher,
    logs::show_logs,
    stream::{PublishSession, StreamIdentity},
    supervisor::Supervisor,
};

/// Capacity of the queue between the notification socket and the supervisor loop.
const NOTIFICATION_QUEUE: usize = 64;

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    match args.command {
        Commands::Run { config } => {
            let config = load_config(Some(&config))?;
            let socket_path = socket_path(&config)?;
            info!(
                "Starting srelay with {} destination(s), segmentation {}",
                config.enabled_destinations().count(),
                if config.segmentation.enabled { "on" } else { "off" }
            );

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_supervisor(config, socket_path))?;
        }
        Commands::Notify {
            event,
            path,
            app,
            name,
            socket,
            config,
        } => {
            let socket_path = match (socket, config) {
                (Some(socket), _) => PathBuf::from(socket),
                (None, Some(config)) => socket_path(&load_config(Some(&config))?)?,
                (None, None) => ipc::default_socket_path()?,
            };
            let notification = IngestNotification {
                event,
                path,
                session: PublishSession {
                    stream_name: name,
                    stream_app: app,
                    ..Default::default()
                },
            };

            match ipc::send_notification(&socket_path, &notification) {
                Ok(_) => info!("Delivered {event} notification"),
                Err(ControlError::NotAvailable(path)) => {
                    warn!("No running srelay supervisor found at {path}");
                    return Err(ControlError::NotAvailable(path).into());
                }
                Err(err) => return Err(err.into()),
            }
        }
        Commands::Logs {
            config,
            log_dir,
            stream,
            target,
            lines,
            kind,
        } => {
            let log_dir = match log_dir {
                Some(dir) => PathBuf::from(dir),
                None => load_config(Some(&config))?.log_dir,
            };
            let identity = StreamIdentity::from_path(&stream)
                .ok_or_else(|| format!("invalid stream path '{stream}'"))?;
            show_logs(&log_dir, &identity, &target, kind, lines)?;
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn socket_path(config: &RelayConfig) -> Result<PathBuf, ControlError> {
    match &config.ingest.socket {
        Some(path) => Ok(path.clone()),
        None => ipc::default_socket_path(),
    }
}

async fn run_supervisor(config: RelayConfig, socket_path: PathBuf) -> Result<(), Box<dyn Error>> {
    let shutdown = ShutdownSignals::install()?;
    let listener = ipc::bind(&socket_path)?;
    info!(
        "Listening for ingest notifications on {}",
        socket_path.display()
    );

    let (tx, rx) = mpsc::channel(NOTIFICATION_QUEUE);
    let server = tokio::spawn(ipc::serve(listener, tx));

    let mut supervisor = Supervisor::new(config, EncoderLauncher);
    bridge::run(&mut supervisor, rx, shutdown.recv()).await;

    server.abort();
    ipc::cleanup_socket(&socket_path);
    Ok(())
}
