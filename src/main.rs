use std::time::{Duration, Instant};

use bytes::BytesMut;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use serial_imu_bridge::{
    backend::NativeBackend,
    cli::{self, Commands},
    config::Config,
    error::Error,
    events::Event,
    logging,
    serial::codecs::imu::ImuCodec,
    session::SessionManager,
    state::SessionState,
};
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn, Level};

#[cfg(unix)]
async fn hangup() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    signal(SignalKind::hangup())?.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn hangup() -> Result<()> {
    std::future::pending().await
}

/// Connect, and if permission has to be asked for first, wait for the outcome.
async fn connect_and_wait(manager: &SessionManager) -> Result<()> {
    match manager.connect().await {
        Ok(()) => return Ok(()),
        Err(Error::PermissionDenied(device)) => info!(%device, "Waiting for permission"),
        Err(e) => return Err(e.into()),
    }

    let outcome = tokio::time::timeout(Duration::from_secs(30), async {
        while let Some(event) = manager.next_event().await {
            match event.inner {
                Event::Connected { .. } => return Ok(()),
                Event::PermissionResult { granted: false, device } => {
                    return Err(eyre!("Permission denied for {device}"))
                }
                Event::OpenFailed { reason } => return Err(eyre!("Open failed: {reason}")),
                _ => continue,
            }
        }
        Err(eyre!("Session closed"))
    })
    .await;

    outcome.map_err(|_| eyre!("No answer to the permission request"))?
}

async fn monitor(manager: &SessionManager, imu: bool, json: bool) -> Result<()> {
    let config = manager.config().clone();

    if !config.auto_connect {
        connect_and_wait(manager).await?;
    }

    let mut codec = ImuCodec::new();
    let mut pending = BytesMut::new();

    let mut poll = tokio::time::interval(Duration::from_millis(20));
    let mut last_attempt: Option<Instant> = None;

    loop {
        poll.tick().await;

        let state = manager.state();
        let due = last_attempt.map_or(true, |at| at.elapsed() >= config.reconnect_interval());

        if config.auto_connect && due {
            if let SessionState::Error(_) = state {
                manager.acknowledge()?;
            }

            if matches!(state, SessionState::Disconnected | SessionState::Error(_)) {
                last_attempt = Some(Instant::now());

                if let Err(e) = manager.connect().await {
                    debug!(%e, "Connection attempt failed");
                }
            }
        }

        while let Some(event) = manager.poll_event() {
            if json {
                println!("{}", serde_json::to_string(&event)?);
            } else {
                println!("[{}] {event}", event.timestamp.format("%H:%M:%S%.3f"));
            }

            if matches!(event.inner, Event::Disconnected) {
                pending.clear();
                codec = ImuCodec::new();
            }
        }

        let received = manager.drain();
        if received.is_empty() {
            continue;
        }

        if imu {
            pending.extend_from_slice(&received);

            while let Some(orientation) = codec.decode(&mut pending)? {
                println!("{orientation}");
            }
        } else {
            print!("{}", String::from_utf8_lossy(&received));
        }
    }
}

async fn send(manager: &SessionManager, mut text: String, newline: bool) -> Result<()> {
    if newline {
        text.push('\n');
    }

    connect_and_wait(manager).await?;
    let result = manager.write(text.as_bytes()).await;
    manager.disconnect().await;

    result?;
    info!("Sent {} byte(s)", text.len());

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    if let Commands::Examples(example) = cli.command {
        cli::handle_example(example)?;

        return Ok(());
    }

    logging::init(Level::INFO, cli.log_dir.map(|dir| (Level::DEBUG, dir)));

    let config = if let Some(config_path) = cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };

    let manager = SessionManager::new(NativeBackend::new(), config)?;

    let result = match cli.command {
        Commands::List => {
            let devices = manager.device_list();
            if devices.is_empty() {
                warn!("No USB serial devices found");
            }
            for device in devices {
                println!("{device}");
            }
            Ok(())
        }
        Commands::Send { text, newline } => send(&manager, text, newline).await,
        Commands::Monitor { imu, json } => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C, quitting");
                    Ok(())
                }
                result = hangup() => {
                    info!("Told to hang up, quitting");
                    result
                }
                result = monitor(&manager, imu, json) => result,
            }
        }
        Commands::Examples(_) => unreachable!("handled before logging is set up"),
    };

    manager.close().await;

    result
}
