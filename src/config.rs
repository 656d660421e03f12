use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Error};
use clap::Parser;
use serde::{Deserialize, Serialize};

/// Process configuration, fixed once bring-up starts.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Maximum concurrent Bluetooth connections
    pub max_connections: u32,
    /// HCI device index, -1 picks the default adapter
    pub hci_device: i32,
    /// Refuse adapters without LE support
    pub check_le: bool,
    /// How long to hold the iBeacon advertisement. Zero disables alternation.
    pub beacon_interval_ms: u64,
    /// How long to hold the name + services advertisement when alternating
    pub name_interval_ms: u64,
    /// Advertised device name
    pub name: String,
    pub sensor_period_ms: u64,
    pub notify_period_ms: u64,
    pub report_url: String,
    pub reachability_url: String,
    pub wifi_interface: String,
    pub wpa_config_path: PathBuf,
    pub wpa_country: String,
    /// Command that makes the supplicant reload its configuration. Unset
    /// means `wpa_cli -i <wifi_interface> reconfigure`.
    pub wpa_reconfigure: Option<Vec<String>>,
    pub log_level: String,
    /// Remote syslog host. Logs go to stderr when unset.
    pub syslog_host: Option<String>,
    pub syslog_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_connections: 1,
            hci_device: -1,
            check_le: true,
            beacon_interval_ms: 0,
            name_interval_ms: 5_000,
            name: "EveryTherm Sensor".to_string(),
            sensor_period_ms: 30_000,
            notify_period_ms: 30_000,
            report_url: "http://services.pcsw.us/everytherm/report".to_string(),
            reachability_url: "https://google.com".to_string(),
            wifi_interface: "wlan0".to_string(),
            wpa_config_path: PathBuf::from("/etc/wpa_supplicant/wpa_supplicant.conf"),
            wpa_country: "US".to_string(),
            wpa_reconfigure: None,
            log_level: "info".to_string(),
            syslog_host: None,
            syslog_port: 514,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, Error> {
        let config = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            ron::from_str(&config).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn beacon_interval(&self) -> Duration {
        Duration::from_millis(self.beacon_interval_ms)
    }

    pub fn name_interval(&self) -> Duration {
        Duration::from_millis(self.name_interval_ms)
    }

    pub fn sensor_period(&self) -> Duration {
        Duration::from_millis(self.sensor_period_ms)
    }

    pub fn notify_period(&self) -> Duration {
        Duration::from_millis(self.notify_period_ms)
    }

    /// Where to ship logs, if remote logging is configured.
    pub fn syslog_server(&self) -> Option<(&str, u16)> {
        self.syslog_host
            .as_deref()
            .map(|host| (host, self.syslog_port))
    }
}

/// Command line flags. Anything given here wins over the config file.
#[derive(Debug, Default, Parser)]
#[command(name = "everytherm", about = "EveryTherm sensor device")]
pub struct Args {
    /// RON configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Maximum concurrent connections
    #[arg(long = "mc")]
    pub max_connections: Option<u32>,
    /// HCI device ID
    #[arg(long = "dev", allow_negative_numbers = true)]
    pub hci_device: Option<i32>,
    /// Check device LE support
    #[arg(long = "chk")]
    pub check_le: Option<bool>,
    /// iBeacon duration, e.g. `2s` or `1500ms`
    #[arg(long = "id", value_parser = humantime::parse_duration)]
    pub beacon_interval: Option<Duration>,
    /// Name advertising interval, e.g. `5s`
    #[arg(long = "ii", value_parser = humantime::parse_duration)]
    pub name_interval: Option<Duration>,
    /// Device name
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub report_url: Option<String>,
    #[arg(long)]
    pub wifi_interface: Option<String>,
    #[arg(long)]
    pub log_level: Option<String>,
    /// Remote syslog host
    #[arg(long = "logging-host")]
    pub syslog_host: Option<String>,
    /// Remote syslog port
    #[arg(long = "logging-port")]
    pub syslog_port: Option<u16>,
}

fn millis(duration: Duration) -> Result<u64, Error> {
    u64::try_from(duration.as_millis()).context("interval out of range")
}

impl Args {
    /// Load the config file (if any) and apply the flags on top of it.
    pub fn resolve(self) -> Result<Config, Error> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(mc) = self.max_connections {
            config.max_connections = mc;
        }
        if let Some(dev) = self.hci_device {
            config.hci_device = dev;
        }
        if let Some(chk) = self.check_le {
            config.check_le = chk;
        }
        if let Some(id) = self.beacon_interval {
            config.beacon_interval_ms = millis(id)?;
        }
        if let Some(ii) = self.name_interval {
            config.name_interval_ms = millis(ii)?;
        }
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(url) = self.report_url {
            config.report_url = url;
        }
        if let Some(interface) = self.wifi_interface {
            config.wifi_interface = interface;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(host) = self.syslog_host {
            config.syslog_host = Some(host);
        }
        if let Some(port) = self.syslog_port {
            config.syslog_port = port;
        }

        Ok(config)
    }
}
