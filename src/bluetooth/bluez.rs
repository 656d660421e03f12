use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use bluer::{
    adv::{Advertisement, AdvertisementHandle, Type},
    gatt::local::{
        Application, ApplicationHandle, Characteristic, CharacteristicNotifier,
        CharacteristicNotify, CharacteristicNotifyMethod, CharacteristicRead,
        CharacteristicWrite, CharacteristicWriteMethod, ReqError, Service,
    },
    Adapter, Session, Uuid,
};
use common::{CONFIG_CHARACTERISTIC_UUID, SENSOR_CHARACTERISTIC_UUID, SERVICE_UUID};
use log::{info, warn};

use super::{
    format_address, Advertiser, Beacon, GattError, Notifier, Radio, SensorService,
    APPLE_COMPANY_ID,
};
use crate::{
    config::Config,
    error::RadioError,
    network::{NetworkConfigurator, NetworkProbe},
};

fn uuid(value: &str) -> Result<Uuid, RadioError> {
    Uuid::parse_str(value).map_err(|e| RadioError::Service(format!("{}: {}", value, e)))
}

fn req_error(error: GattError) -> ReqError {
    match error {
        GattError::InvalidPayload | GattError::Unexpected => ReqError::Failed,
    }
}

/// Bluetooth controller driven through BlueZ over D-Bus.
pub struct BluezRadio {
    hci_device: i32,
    check_le: bool,
    _session: Option<Session>,
    adapter: Option<Adapter>,
    application: Option<ApplicationHandle>,
}

impl BluezRadio {
    pub fn new(config: &Config) -> Self {
        if config.max_connections != 1 {
            // BlueZ owns connection admission; there is no per-application cap
            warn!(
                "Bluetooth: max connections {} is not enforced by BlueZ",
                config.max_connections
            );
        }

        Self {
            hci_device: config.hci_device,
            check_le: config.check_le,
            _session: None,
            adapter: None,
            application: None,
        }
    }

    fn adapter(&self) -> Result<&Adapter, RadioError> {
        self.adapter
            .as_ref()
            .ok_or_else(|| RadioError::PowerOn("radio is not powered on".into()))
    }
}

impl Radio for BluezRadio {
    type Advertiser = BluezAdvertiser;

    async fn power_on(&mut self) -> Result<(), RadioError> {
        let to_error = |e: bluer::Error| RadioError::PowerOn(e.to_string());

        let session = Session::new().await.map_err(to_error)?;
        let adapter = if self.hci_device < 0 {
            session.default_adapter().await.map_err(to_error)?
        } else {
            session
                .adapter(&format!("hci{}", self.hci_device))
                .map_err(to_error)?
        };

        adapter.set_powered(true).await.map_err(to_error)?;

        if self.check_le {
            let instances = adapter
                .supported_advertising_instances()
                .await
                .map_err(|e| RadioError::PowerOn(format!("no LE support: {}", e)))?;
            if instances == 0 {
                return Err(RadioError::PowerOn(format!(
                    "{} has no free advertising instances",
                    adapter.name()
                )));
            }
        }

        info!("Bluetooth: {} powered on", adapter.name());

        self._session = Some(session);
        self.adapter = Some(adapter);
        Ok(())
    }

    async fn address(&self) -> Result<String, RadioError> {
        let address = self
            .adapter()?
            .address()
            .await
            .map_err(|e| RadioError::Identity(e.to_string()))?;
        Ok(format_address(address.0))
    }

    async fn serve<P, C>(&mut self, service: Arc<SensorService<P, C>>) -> Result<(), RadioError>
    where
        P: NetworkProbe,
        C: NetworkConfigurator,
    {
        let read_service = service.clone();
        let write_service = service.clone();
        let notify_service = service;

        let config = Characteristic {
            uuid: uuid(CONFIG_CHARACTERISTIC_UUID)?,
            read: Some(CharacteristicRead {
                read: true,
                fun: Box::new(move |_request| {
                    let service = read_service.clone();
                    Box::pin(async move { service.read_config().await.map_err(req_error) })
                }),
                ..Default::default()
            }),
            write: Some(CharacteristicWrite {
                write: true,
                write_without_response: false,
                method: CharacteristicWriteMethod::Fun(Box::new(move |value, _request| {
                    let service = write_service.clone();
                    Box::pin(async move { service.write_config(&value).await.map_err(req_error) })
                })),
                ..Default::default()
            }),
            ..Default::default()
        };

        let sensor = Characteristic {
            uuid: uuid(SENSOR_CHARACTERISTIC_UUID)?,
            notify: Some(CharacteristicNotify {
                notify: true,
                method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                    let service = notify_service.clone();
                    Box::pin(async move { service.stream_readings(notifier).await })
                })),
                ..Default::default()
            }),
            ..Default::default()
        };

        let application = Application {
            services: vec![Service {
                uuid: uuid(SERVICE_UUID)?,
                primary: true,
                characteristics: vec![config, sensor],
                ..Default::default()
            }],
            ..Default::default()
        };

        let handle = self
            .adapter()?
            .serve_gatt_application(application)
            .await
            .map_err(|e| RadioError::Service(e.to_string()))?;
        self.application = Some(handle);

        info!("Bluetooth: serving {}", SERVICE_UUID);
        Ok(())
    }

    fn advertiser(&self) -> BluezAdvertiser {
        BluezAdvertiser {
            adapter: self.adapter.clone(),
            handle: None,
        }
    }
}

/// Keeps exactly one advertisement registered; registering a new one drops
/// the previous handle, which withdraws it.
pub struct BluezAdvertiser {
    adapter: Option<Adapter>,
    handle: Option<AdvertisementHandle>,
}

impl BluezAdvertiser {
    async fn replace(&mut self, advertisement: Advertisement) -> Result<(), RadioError> {
        let adapter = self
            .adapter
            .as_ref()
            .ok_or_else(|| RadioError::Advertise("radio is not powered on".into()))?;

        self.handle = None;
        let handle = adapter
            .advertise(advertisement)
            .await
            .map_err(|e| RadioError::Advertise(e.to_string()))?;
        self.handle = Some(handle);

        Ok(())
    }
}

impl Advertiser for BluezAdvertiser {
    async fn advertise_name_and_services(
        &mut self,
        name: &str,
        services: &[&str],
    ) -> Result<(), RadioError> {
        let service_uuids = services
            .iter()
            .map(|s| uuid(s))
            .collect::<Result<BTreeSet<_>, _>>()?;

        self.replace(Advertisement {
            advertisement_type: Type::Peripheral,
            service_uuids,
            local_name: Some(name.to_string()),
            discoverable: Some(true),
            ..Default::default()
        })
        .await
    }

    async fn advertise_beacon(&mut self, beacon: &Beacon) -> Result<(), RadioError> {
        self.replace(Advertisement {
            advertisement_type: Type::Broadcast,
            manufacturer_data: BTreeMap::from([(APPLE_COMPANY_ID, beacon.manufacturer_data())]),
            ..Default::default()
        })
        .await
    }
}

impl Notifier for CharacteristicNotifier {
    fn is_done(&self) -> bool {
        self.is_stopped()
    }

    async fn closed(&self) {
        self.stopped().await
    }

    async fn notify(&mut self, value: Vec<u8>) -> Result<(), RadioError> {
        CharacteristicNotifier::notify(self, value)
            .await
            .map_err(|e| RadioError::Service(e.to_string()))
    }
}
