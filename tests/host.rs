//! The blocking surface, driven from plain threads the way a host application would.

use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use pretty_assertions::assert_eq;
use serial_imu_bridge::{
    backend::{MockBackend, PermissionPolicy},
    config::Config,
    events::Event,
    host::HostBridge,
    state::SessionState,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    runtime::Runtime,
};

mod common;

use common::{mock_with, IMU};

/// Plays the device's side of the link.
fn device_runtime() -> Result<Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

fn bridge(mock: &MockBackend) -> Result<HostBridge> {
    Ok(HostBridge::new(mock.clone(), Config::default())?)
}

fn read_at_least(bridge: &HostBridge, len: usize) -> Result<Vec<u8>> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut collected = vec![];

    while collected.len() < len {
        if Instant::now() > deadline {
            return Err(eyre!("Only got {} of {len} byte(s)", collected.len()));
        }
        collected.extend(bridge.read_data());
        std::thread::sleep(Duration::from_millis(5));
    }

    Ok(collected)
}

fn wait_for_event(bridge: &HostBridge) -> Result<Event> {
    let deadline = Instant::now() + Duration::from_secs(5);

    loop {
        if let Some(event) = bridge.poll_event() {
            return Ok(event.inner);
        }
        if Instant::now() > deadline {
            return Err(eyre!("No event"));
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn connect_read_send() -> Result<()> {
    let mock = mock_with(PermissionPolicy::Granted);
    let bridge = bridge(&mock)?;
    let device = device_runtime()?;

    assert!(bridge.connect(115_200, 8, 1, 0));
    assert!(bridge.is_connected());

    let mut remote = mock.take_remote(IMU).ok_or_else(|| eyre!("No link"))?;

    device.block_on(remote.write_all(b"W: 0.7071 X: 0.7071 Y: 0.0 Z: 0.0\n"))?;
    let received = read_at_least(&bridge, 34)?;
    assert_eq!(
        String::from_utf8(received)?,
        "W: 0.7071 X: 0.7071 Y: 0.0 Z: 0.0\n"
    );

    bridge.send_data(b"reset\n");
    let mut sent = [0u8; 6];
    device.block_on(remote.read_exact(&mut sent))?;
    assert_eq!(&sent, b"reset\n");

    Ok(())
}

#[test]
fn read_string_is_lossy() -> Result<()> {
    let mock = mock_with(PermissionPolicy::Granted);
    let bridge = bridge(&mock)?;
    let device = device_runtime()?;

    assert!(bridge.connect(115_200, 8, 1, 0));
    let mut remote = mock.take_remote(IMU).ok_or_else(|| eyre!("No link"))?;

    device.block_on(remote.write_all(b"ok\xFF"))?;
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(bridge.read_string(), "ok\u{FFFD}");
    assert_eq!(bridge.read_string(), "");

    Ok(())
}

#[test]
fn rejects_bad_line_parameters() -> Result<()> {
    let mock = mock_with(PermissionPolicy::Granted);
    let bridge = bridge(&mock)?;

    assert!(!bridge.connect(115_200, 8, 1, 7));
    assert!(!bridge.connect(115_200, 4, 1, 0));
    assert!(!bridge.connect(0, 8, 1, 0));

    assert_eq!(bridge.state(), SessionState::Disconnected);
    assert_eq!(mock.open_count(IMU), 0);

    Ok(())
}

#[test]
fn waits_for_permission() -> Result<()> {
    let mock = mock_with(PermissionPolicy::Manual);
    let bridge = bridge(&mock)?;

    assert!(!bridge.connect(115_200, 8, 1, 0));
    assert_eq!(bridge.state(), SessionState::PermissionPending);

    assert!(mock.respond_permission(IMU, true));

    assert_eq!(
        wait_for_event(&bridge)?,
        Event::PermissionResult {
            device: IMU.to_string(),
            granted: true
        }
    );
    assert!(matches!(wait_for_event(&bridge)?, Event::Connected { .. }));
    assert!(bridge.is_connected());

    Ok(())
}

#[test]
fn connect_recovers_from_a_failed_open() -> Result<()> {
    let mock = mock_with(PermissionPolicy::Granted);
    mock.set_busy(IMU, true);

    let bridge = bridge(&mock)?;

    assert!(!bridge.connect(115_200, 8, 1, 0));
    assert!(matches!(bridge.state(), SessionState::Error(_)));

    mock.set_busy(IMU, false);
    assert!(bridge.connect(115_200, 8, 1, 0));

    Ok(())
}

#[test]
fn calls_while_disconnected_are_harmless() -> Result<()> {
    let bridge = bridge(&MockBackend::new())?;

    assert!(bridge.get_device_list().is_empty());
    assert!(!bridge.connect(115_200, 8, 1, 0));
    assert!(!bridge.is_connected());

    bridge.send_data(b"nobody listens");
    bridge.disconnect();

    assert!(bridge.read_data().is_empty());

    Ok(())
}

#[test]
fn unplugged_device() -> Result<()> {
    let mock = mock_with(PermissionPolicy::Granted);
    let bridge = bridge(&mock)?;

    assert!(bridge.connect(115_200, 8, 1, 0));
    assert!(matches!(wait_for_event(&bridge)?, Event::Connected { .. }));

    drop(mock.take_remote(IMU));

    assert!(matches!(wait_for_event(&bridge)?, Event::IoFault { .. }));
    assert_eq!(wait_for_event(&bridge)?, Event::Disconnected);
    assert!(!bridge.is_connected());

    Ok(())
}

#[test]
fn cleanup_twice() -> Result<()> {
    let mock = mock_with(PermissionPolicy::Granted);
    let bridge = bridge(&mock)?;

    assert!(bridge.connect(115_200, 8, 1, 0));

    bridge.cleanup();
    bridge.cleanup();

    assert!(!bridge.is_connected());
    assert!(!bridge.connect(115_200, 8, 1, 0));

    Ok(())
}

#[test]
fn device_list() -> Result<()> {
    let mock = mock_with(PermissionPolicy::Granted);
    let bridge = bridge(&mock)?;

    assert_eq!(
        bridge.get_device_list(),
        vec!["/dev/ttyUSB0 (VID: 1A86, PID: 7523)".to_string()]
    );

    Ok(())
}
