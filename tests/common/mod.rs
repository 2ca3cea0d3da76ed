#![allow(dead_code)]

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serial_imu_bridge::{
    backend::{MockBackend, PermissionPolicy},
    config::Config,
    events::Event,
    session::SessionManager,
};
use tokio::time::timeout;
use tracing::debug;

pub const IMU: &str = "/dev/ttyUSB0";
pub const CH340_VID: u16 = 0x1A86;
pub const CH340_PID: u16 = 0x7523;

#[macro_export]
macro_rules! assert_next_event {
    ($manager:expr, $event:pat) => {
        let event = $crate::common::next_event(&$manager).await?;
        assert!(
            matches!(event, $event),
            "unexpected event: {event:?}"
        );
    };
}

/// A mock backend with one CH340 style device.
pub fn mock_with(policy: PermissionPolicy) -> MockBackend {
    let mock = MockBackend::new();
    mock.add_device(IMU, CH340_VID, CH340_PID, policy);
    mock
}

pub fn manager(mock: &MockBackend) -> SessionManager {
    manager_with_config(mock, Config::default())
}

pub fn manager_with_config(mock: &MockBackend, config: Config) -> SessionManager {
    SessionManager::new(mock.clone(), config).expect("config should be valid")
}

pub async fn next_event(manager: &SessionManager) -> Result<Event> {
    let event = timeout(Duration::from_secs(5), manager.next_event())
        .await?
        .ok_or_else(|| eyre!("Event bridge closed"))?;

    debug!(%event, "Got event");

    Ok(event.inner)
}

/// Make sure nothing else is queued, giving background tasks a moment to misbehave first.
pub async fn assert_no_more_events(manager: &SessionManager) {
    tokio::time::sleep(Duration::from_millis(50)).await;

    let event = manager.poll_event();
    assert!(event.is_none(), "unexpected event: {event:?}");
}

/// Drain until at least `len` bytes have been collected.
pub async fn drain_at_least(manager: &SessionManager, len: usize) -> Result<Vec<u8>> {
    let mut collected = vec![];

    timeout(Duration::from_secs(5), async {
        while collected.len() < len {
            collected.extend_from_slice(&manager.drain());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    Ok(collected)
}

/// Connect to a device which already has permission.
pub async fn connected(mock: &MockBackend) -> Result<SessionManager> {
    let manager = manager(mock);

    manager.connect().await?;
    assert_next_event!(manager, Event::Connected { .. });

    Ok(manager)
}

/// Wait until the session has let go of its most recent link to the device.
pub async fn link_released(mock: &MockBackend, path: &str) -> Result<()> {
    timeout(Duration::from_secs(5), async {
        while mock.link_held(path) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    Ok(())
}
