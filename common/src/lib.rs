#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use alloc::{string::String, vec::Vec};
use serde::{Deserialize, Serialize};

/// Primary GATT service exposed by the sensor.
pub const SERVICE_UUID: &str = "d9f99901-97cd-4506-ae8b-ceecf44b84c4";
/// Read/write characteristic carrying network configuration as JSON.
pub const CONFIG_CHARACTERISTIC_UUID: &str = "d9f99901-97cd-4506-ae8b-ceecf44b84c5";
/// Notify-only characteristic carrying the latest sensor reading.
pub const SENSOR_CHARACTERISTIC_UUID: &str = "d9f99901-97cd-4506-ae8b-ceecf44b84c6";

/// Sent over the sensor characteristic in place of a reading when the last
/// acquisition failed.
pub const SENSOR_ERROR: &str = "ERROR";

/// Raw value from the temperature sensor.
pub type Reading = i32;

/// How far the device can reach over WiFi.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NetworkStatus {
    /// Not associated, or association state could not be determined
    #[default]
    Down,
    /// Associated, but hosts outside the network are unreachable
    Local,
    /// Associated and able to reach the internet
    Up,
}

/// Point-in-time WiFi status, returned when a peer reads the config
/// characteristic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub ssid: String,
    #[serde(rename = "ipaddr")]
    pub ip_addr: String,
    pub status: NetworkStatus,
    /// SSIDs in scan order. Duplicates are kept.
    pub available: Vec<String>,
}

/// Credentials a peer writes to the config characteristic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub ssid: String,
    /// Empty for open networks
    #[serde(default)]
    pub password: String,
}

/// A single reading pushed to the remote collector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Bluetooth hardware address of the reporting device
    pub device: String,
    pub reading: Reading,
}

#[cfg(feature = "std")]
impl NetworkInfo {
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(feature = "std")]
impl NetworkConfig {
    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}
