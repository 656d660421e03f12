//! Radio stand-in for hosts without a usable Bluetooth controller. Advertising
//! changes are logged, and a single local subscriber streams sensor readings
//! into the log so the rest of the device behaves as on hardware.

use std::sync::Arc;

use common::{CONFIG_CHARACTERISTIC_UUID, SENSOR_CHARACTERISTIC_UUID, SERVICE_UUID};
use log::info;
use tokio_util::sync::CancellationToken;

use super::{format_address, Advertiser, Beacon, Notifier, Radio, SensorService};
use crate::{
    error::RadioError,
    network::{NetworkConfigurator, NetworkProbe},
};

/// Locally administered address reported as the device identity.
pub const SIM_ADDRESS: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

pub struct SimRadio {
    address: [u8; 6],
    powered: bool,
    cancel: CancellationToken,
}

impl SimRadio {
    pub fn new(address: [u8; 6], cancel: CancellationToken) -> Self {
        Self {
            address,
            powered: false,
            cancel,
        }
    }
}

impl Radio for SimRadio {
    type Advertiser = SimAdvertiser;

    async fn power_on(&mut self) -> Result<(), RadioError> {
        self.powered = true;
        info!("Bluetooth (sim): powered on");
        Ok(())
    }

    async fn address(&self) -> Result<String, RadioError> {
        if !self.powered {
            return Err(RadioError::Identity("radio is not powered on".into()));
        }
        Ok(format_address(self.address))
    }

    async fn serve<P, C>(&mut self, service: Arc<SensorService<P, C>>) -> Result<(), RadioError>
    where
        P: NetworkProbe,
        C: NetworkConfigurator,
    {
        info!(
            "Bluetooth (sim): serving {} (config {}, sensor {})",
            SERVICE_UUID, CONFIG_CHARACTERISTIC_UUID, SENSOR_CHARACTERISTIC_UUID
        );

        let notifier = LogNotifier {
            cancel: self.cancel.clone(),
        };
        tokio::spawn(async move { service.stream_readings(notifier).await });

        Ok(())
    }

    fn advertiser(&self) -> SimAdvertiser {
        SimAdvertiser
    }
}

pub struct SimAdvertiser;

impl Advertiser for SimAdvertiser {
    async fn advertise_name_and_services(
        &mut self,
        name: &str,
        services: &[&str],
    ) -> Result<(), RadioError> {
        info!("Bluetooth (sim): advertising {} {:?}", name, services);
        Ok(())
    }

    async fn advertise_beacon(&mut self, beacon: &Beacon) -> Result<(), RadioError> {
        info!(
            "Bluetooth (sim): advertising iBeacon major {} minor {}",
            beacon.major, beacon.minor
        );
        Ok(())
    }
}

/// A subscriber that lives as long as the process.
struct LogNotifier {
    cancel: CancellationToken,
}

impl Notifier for LogNotifier {
    fn is_done(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn closed(&self) {
        self.cancel.cancelled().await
    }

    async fn notify(&mut self, value: Vec<u8>) -> Result<(), RadioError> {
        info!("Bluetooth (sim): sensor {}", String::from_utf8_lossy(&value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identity_needs_power() {
        let mut radio = SimRadio::new(SIM_ADDRESS, CancellationToken::new());
        assert!(radio.address().await.is_err());

        radio.power_on().await.unwrap();
        assert_eq!(radio.address().await.unwrap(), "02:00:00:00:00:01");
    }
}
