mod wifi;

use std::{future::Future, net::IpAddr};

use common::{NetworkConfig, NetworkInfo, NetworkStatus};
use log::error;

use crate::error::NetworkError;

pub use wifi::{parse_connected_ssid, parse_scan, WifiTools, WpaSupplicant};

/// SSID reported when the connected network could not be determined.
pub const SSID_UNKNOWN: &str = "UNKNOWN";
/// What `iwconfig` shows as the ESSID of an unassociated interface.
pub const SSID_OFF: &str = "off/any";

/// Point queries about the WiFi interface. Each may fail on its own.
pub trait NetworkProbe: Send + Sync + 'static {
    /// SSID the interface is associated with, [`SSID_OFF`] or empty if none.
    fn connected_ssid(&self) -> impl Future<Output = Result<String, NetworkError>> + Send;
    /// Local address of the default route.
    fn local_ip(&self) -> impl Future<Output = Result<IpAddr, NetworkError>> + Send;
    /// Whether a host outside the local network answers.
    fn is_reachable(&self) -> impl Future<Output = bool> + Send;
    /// SSIDs visible to the interface, in scan order.
    fn available_ssids(&self) -> impl Future<Output = Result<Vec<String>, NetworkError>> + Send;
}

/// Applies new WiFi credentials.
pub trait NetworkConfigurator: Send + Sync + 'static {
    /// Persist `config` and kick off reconnection. Returns once the
    /// configuration is stored; reconnection runs in the background.
    fn configure(
        &self,
        config: &NetworkConfig,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;
}

/// Build a fresh status snapshot. Failed queries degrade their own fields and
/// are logged; the snapshot itself is always produced.
pub async fn network_info<P: NetworkProbe>(probe: &P) -> NetworkInfo {
    let mut info = NetworkInfo::default();

    match probe.connected_ssid().await {
        Err(e) => {
            error!("Network: unable to read connected SSID: {}", e);
            info.ssid = SSID_UNKNOWN.to_string();
            info.status = NetworkStatus::Down;
        }
        Ok(ssid) if ssid.is_empty() || ssid == SSID_OFF => {
            info.status = NetworkStatus::Down;
        }
        Ok(ssid) => {
            info.ssid = ssid;

            match probe.local_ip().await {
                Ok(ip) => info.ip_addr = ip.to_string(),
                Err(e) => error!("Network: error obtaining IP address: {}", e),
            }

            info.status = if probe.is_reachable().await {
                NetworkStatus::Up
            } else {
                NetworkStatus::Local
            };
        }
    }

    info.available = probe.available_ssids().await.unwrap_or_else(|e| {
        error!("Network: error determining available SSIDs: {}", e);
        Vec::new()
    });

    info
}
