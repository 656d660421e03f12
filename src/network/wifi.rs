use std::{net::IpAddr, path::PathBuf};

use common::NetworkConfig;
use log::{debug, error, info};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, net::UdpSocket, process::Command};

use super::{NetworkConfigurator, NetworkProbe};
use crate::error::NetworkError;

/// Any routable address works, nothing is sent. Connecting a UDP socket only
/// makes the kernel pick the local address of the default route.
const ROUTE_PROBE_ADDR: &str = "8.8.8.8:80";

/// Queries the wireless interface through the `wireless-tools` commands.
pub struct WifiTools {
    interface: String,
    reachability_url: String,
    client: reqwest::Client,
}

impl WifiTools {
    pub fn new(interface: impl Into<String>, reachability_url: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            reachability_url: reachability_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

async fn run(program: &str, args: &[&str]) -> Result<String, NetworkError> {
    let command = format!("{} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| NetworkError::Spawn {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(NetworkError::Exit {
            command,
            status: output.status.to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Pull the value out of an `ESSID:"name"` / `ESSID:off/any` fragment. Some
/// drivers print more fields after it on the same line.
fn essid_value(line: &str) -> Option<&str> {
    let (_, value) = line.split_once("ESSID:")?;
    let value = value.trim_start();
    match value.strip_prefix('"') {
        Some(quoted) => Some(quoted.split_once('"').map_or(quoted, |(ssid, _)| ssid)),
        None => Some(value.split_whitespace().next().unwrap_or_default()),
    }
}

/// The associated SSID from `iwconfig <iface>` output. Empty if the output has
/// no ESSID field at all.
pub fn parse_connected_ssid(output: &str) -> String {
    output
        .lines()
        .find_map(essid_value)
        .unwrap_or_default()
        .to_string()
}

/// Every SSID in `iwlist <iface> scan` output, in the order the cells appear.
pub fn parse_scan(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(essid_value)
        .map(str::to_string)
        .collect()
}

impl NetworkProbe for WifiTools {
    async fn connected_ssid(&self) -> Result<String, NetworkError> {
        let output = run("iwconfig", &[&self.interface]).await?;
        let ssid = parse_connected_ssid(&output);
        info!("Network: connected to SSID {}", ssid);
        Ok(ssid)
    }

    async fn local_ip(&self) -> Result<IpAddr, NetworkError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(ROUTE_PROBE_ADDR).await?;
        Ok(socket.local_addr()?.ip())
    }

    async fn is_reachable(&self) -> bool {
        match self.client.get(&self.reachability_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Network: {} unreachable: {}", self.reachability_url, e);
                false
            }
        }
    }

    async fn available_ssids(&self) -> Result<Vec<String>, NetworkError> {
        let output = run("iwlist", &[&self.interface, "scan"]).await?;
        let ssids = parse_scan(&output);
        for ssid in &ssids {
            info!("Network: found SSID {}", ssid);
        }
        Ok(ssids)
    }
}

/// Writes credentials into the `wpa_supplicant` configuration and asks the
/// running supplicant to reload it.
pub struct WpaSupplicant {
    path: PathBuf,
    interface: String,
    country: String,
    reconfigure: Vec<String>,
}

impl WpaSupplicant {
    pub fn new(
        path: impl Into<PathBuf>,
        interface: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        let interface = interface.into();
        let reconfigure = ["wpa_cli", "-i", interface.as_str(), "reconfigure"]
            .into_iter()
            .map(String::from)
            .collect();
        Self {
            path: path.into(),
            interface,
            country: country.into(),
            reconfigure,
        }
    }

    /// Replace the command run after the file is written. The first element
    /// is the program.
    pub fn with_reconfigure(mut self, command: Vec<String>) -> Self {
        self.reconfigure = command;
        self
    }

    /// Full configuration file contents for `config`.
    pub fn render(&self, config: &NetworkConfig) -> Result<String, NetworkError> {
        if config.ssid.is_empty() {
            return Err(NetworkError::InvalidConfig("SSID is empty"));
        }
        // Values are written inside double quotes, one per line
        let unquotable = |s: &str| s.contains(['"', '\n', '\r']);
        if unquotable(&config.ssid) || unquotable(&config.password) {
            return Err(NetworkError::InvalidConfig(
                "SSID and password may not contain quotes or line breaks",
            ));
        }

        let credentials = if config.password.is_empty() {
            "\tkey_mgmt=NONE\n".to_string()
        } else {
            format!("\tpsk=\"{}\"\n", config.password)
        };

        Ok(format!(
            "country={}\n\
             ctrl_interface=DIR=/var/run/wpa_supplicant GROUP=netdev\n\
             update_config=1\n\
             network={{\n\
             \tssid=\"{}\"\n\
             {}}}\n",
            self.country, config.ssid, credentials
        ))
    }

    async fn write(&self, contents: &str) -> Result<(), NetworkError> {
        let to_error = |source| NetworkError::ConfigFile {
            path: self.path.display().to_string(),
            source,
        };

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&self.path)
            .await
            .map_err(to_error)?;
        file.write_all(contents.as_bytes()).await.map_err(to_error)?;
        file.flush().await.map_err(to_error)?;

        Ok(())
    }

    /// Detached reconfigure command. The outcome is only logged.
    fn spawn_reconfigure(&self) {
        let interface = self.interface.clone();
        let command = self.reconfigure.clone();
        tokio::spawn(async move {
            let Some((program, args)) = command.split_first() else {
                error!("Network: no reconfigure command for {}", interface);
                return;
            };
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            match run(program, &args).await {
                Ok(_) => info!("Network: {} reconfigured", interface),
                Err(e) => error!("Network: reconfigure failed: {}", e),
            }
        });
    }
}

impl NetworkConfigurator for WpaSupplicant {
    async fn configure(&self, config: &NetworkConfig) -> Result<(), NetworkError> {
        let contents = self.render(config)?;
        self.write(&contents).await?;
        info!(
            "Network: wrote configuration for SSID {} to {}",
            config.ssid,
            self.path.display()
        );

        self.spawn_reconfigure();
        Ok(())
    }
}
