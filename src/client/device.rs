//! Best-effort device identifier, sent with the identity token so the access
//! token can be bound to this machine.
//!
//! The cache asks a [`DeviceIdSource`] only when it runs the identity flow, so
//! serving or refreshing a token never spawns a platform lookup.

use async_trait::async_trait;
#[cfg(any(target_os = "macos", windows))]
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Where the cache gets the device id from when it re-authenticates.
#[async_trait]
pub trait DeviceIdSource: Send + Sync {
    /// The id to bind new access tokens to, if any.
    async fn device_id(&self) -> Option<String>;
}

/// A device id known up front (or deliberately absent).
#[derive(Debug, Clone, Default)]
pub struct FixedDeviceId(pub Option<String>);

#[async_trait]
impl DeviceIdSource for FixedDeviceId {
    async fn device_id(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Looks the id up from the platform on first use and remembers the answer.
#[derive(Debug, Default)]
pub struct PlatformDeviceId {
    resolved: OnceCell<Option<String>>,
}

impl PlatformDeviceId {
    /// Source that has not looked anything up yet.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceIdSource for PlatformDeviceId {
    async fn device_id(&self) -> Option<String> {
        self.resolved
            .get_or_init(|| async {
                let id = device_id().await;
                debug!(found = id.is_some(), "Resolved device id");
                id
            })
            .await
            .clone()
    }
}

/// Identify this machine, or `None` if the platform source is unavailable.
pub async fn device_id() -> Option<String> {
    match platform_device_id().await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "Failed to determine device id");
            None
        }
    }
}

#[cfg(target_os = "linux")]
async fn platform_device_id() -> std::io::Result<Option<String>> {
    match tokio::fs::read_to_string("/etc/machine-id").await {
        Ok(content) => Ok(non_empty(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(target_os = "macos")]
async fn platform_device_id() -> std::io::Result<Option<String>> {
    let output = Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .await?;
    Ok(parse_ioreg(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(windows)]
async fn platform_device_id() -> std::io::Result<Option<String>> {
    let output = Command::new("powershell")
        .args([
            "-NoProfile",
            "-Command",
            "(Get-CimInstance Win32_ComputerSystemProduct).UUID",
        ])
        .output()
        .await?;
    Ok(non_empty(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
async fn platform_device_id() -> std::io::Result<Option<String>> {
    Ok(None)
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Pull `IOPlatformUUID` out of `ioreg` output:
/// `"IOPlatformUUID" = "XXXXXXXX-..."`
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_ioreg(output: &str) -> Option<String> {
    output
        .lines()
        .find(|line| line.contains("IOPlatformUUID"))
        .and_then(|line| line.split('"').nth(3))
        .and_then(non_empty)
}
