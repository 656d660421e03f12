mod advertising;
#[cfg(feature = "bluez")]
mod bluez;
mod service;
mod sim;

use std::{future::Future, sync::Arc};

use crate::{
    error::RadioError,
    network::{NetworkConfigurator, NetworkProbe},
};

pub use advertising::{AdvertisingMode, AdvertisingScheduler, Phase};
#[cfg(feature = "bluez")]
pub use bluez::BluezRadio;
pub use service::{GattError, SensorService};
pub use sim::{SimRadio, SIM_ADDRESS};

/// Apple's Bluetooth SIG company identifier, used by iBeacon frames.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

/// iBeacon advertisement contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Beacon {
    pub uuid: [u8; 16],
    pub major: u16,
    pub minor: u16,
    /// RSSI at one metre
    pub measured_power: i8,
}

impl Beacon {
    /// The RedBear Labs beacon the sensor has always advertised.
    pub const fn everytherm() -> Self {
        Self {
            uuid: [
                0x5A, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
                0xFF, 0xFF, 0xFF,
            ],
            major: 1,
            minor: 2,
            measured_power: -59,
        }
    }

    /// Manufacturer specific data following [`APPLE_COMPANY_ID`].
    pub fn manufacturer_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(23);
        // Type: iBeacon, length: 21 bytes
        data.extend_from_slice(&[0x02, 0x15]);
        data.extend_from_slice(&self.uuid);
        data.extend_from_slice(&self.major.to_be_bytes());
        data.extend_from_slice(&self.minor.to_be_bytes());
        data.push(self.measured_power as u8);
        data
    }
}

/// Formats a hardware address, most significant byte first, the way the
/// collector keys devices.
pub fn format_address(address: [u8; 6]) -> String {
    address
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Controls what the radio broadcasts while nobody is connected.
pub trait Advertiser: Send + 'static {
    fn advertise_name_and_services(
        &mut self,
        name: &str,
        services: &[&str],
    ) -> impl Future<Output = Result<(), RadioError>> + Send;

    fn advertise_beacon(
        &mut self,
        beacon: &Beacon,
    ) -> impl Future<Output = Result<(), RadioError>> + Send;
}

/// One peer's subscription to a notify characteristic.
pub trait Notifier: Send {
    /// Whether the peer has unsubscribed or disconnected.
    fn is_done(&self) -> bool;

    /// Resolves once [`Notifier::is_done`] would return `true`.
    fn closed(&self) -> impl Future<Output = ()> + Send;

    fn notify(&mut self, value: Vec<u8>) -> impl Future<Output = Result<(), RadioError>> + Send;
}

/// The Bluetooth controller, as far as bring-up is concerned.
pub trait Radio: Send {
    type Advertiser: Advertiser;

    /// Open the controller and wait until it is powered on.
    fn power_on(&mut self) -> impl Future<Output = Result<(), RadioError>> + Send;

    /// Hardware address, formatted by [`format_address`].
    fn address(&self) -> impl Future<Output = Result<String, RadioError>> + Send;

    /// Publish the sensor GATT service. Handlers stay registered for the
    /// lifetime of the radio.
    fn serve<P, C>(
        &mut self,
        service: Arc<SensorService<P, C>>,
    ) -> impl Future<Output = Result<(), RadioError>> + Send
    where
        P: NetworkProbe,
        C: NetworkConfigurator;

    fn advertiser(&self) -> Self::Advertiser;
}
