use std::time::Duration;

use common::{NetworkConfig, SENSOR_ERROR};
use log::{error, info, warn};
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::Notifier;
use crate::{
    network::{network_info, NetworkConfigurator, NetworkProbe},
    state::DeviceState,
};

/// Status returned to the peer when a characteristic request fails.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum GattError {
    /// The written value is not a usable network configuration
    #[error("invalid network configuration payload")]
    InvalidPayload,
    /// The request was understood but could not be carried out
    #[error("unexpected error")]
    Unexpected,
}

/// Handlers behind the EveryTherm GATT service. Radio backends call into
/// these; none of them hold the state lock across I/O.
pub struct SensorService<P, C> {
    state: DeviceState,
    probe: P,
    configurator: C,
    notify_period: Duration,
    cancel: CancellationToken,
}

impl<P: NetworkProbe, C: NetworkConfigurator> SensorService<P, C> {
    pub fn new(
        state: DeviceState,
        probe: P,
        configurator: C,
        notify_period: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state,
            probe,
            configurator,
            notify_period,
            cancel,
        }
    }

    /// Config characteristic read: current WiFi status as JSON.
    pub async fn read_config(&self) -> Result<Vec<u8>, GattError> {
        let info = network_info(&self.probe).await;
        info.to_json().map_err(|e| {
            error!("Bluetooth: error marshalling network info: {}", e);
            GattError::Unexpected
        })
    }

    /// Config characteristic write: new WiFi credentials as JSON.
    pub async fn write_config(&self, data: &[u8]) -> Result<(), GattError> {
        let config = NetworkConfig::from_json(data).map_err(|e| {
            error!("Bluetooth: error unmarshalling network config: {}", e);
            GattError::InvalidPayload
        })?;

        if config.ssid.is_empty() {
            error!("Bluetooth: network config has an empty SSID");
            return Err(GattError::InvalidPayload);
        }

        self.configurator.configure(&config).await.map_err(|e| {
            error!("Bluetooth: error configuring network: {}", e);
            GattError::Unexpected
        })?;

        info!("Bluetooth: network configured for SSID {}", config.ssid);
        Ok(())
    }

    /// Sensor characteristic subscription: pushes the latest reading, or
    /// [`SENSOR_ERROR`] while the sensor is failing, every notify period until
    /// the peer goes away.
    pub async fn stream_readings<N: Notifier>(&self, mut notifier: N) {
        info!("Bluetooth: sensor subscription opened");

        while !notifier.is_done() && !self.cancel.is_cancelled() {
            let snapshot = self.state.read();
            let value = match snapshot.error {
                None => snapshot.reading.to_string(),
                Some(_) => SENSOR_ERROR.to_string(),
            };

            if let Err(e) = notifier.notify(value.into_bytes()).await {
                warn!("Bluetooth: sensor notification failed: {}", e);
            }

            tokio::select! {
                () = self.cancel.cancelled() => { break; }
                () = notifier.closed() => { break; }
                () = sleep(self.notify_period) => {}
            }
        }

        info!("Bluetooth: sensor subscription closed");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::{IpAddr, Ipv4Addr},
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex,
        },
    };

    use common::{NetworkInfo, NetworkStatus};
    use tokio::sync::{mpsc, Notify};

    use super::*;
    use crate::{
        error::{NetworkError, RadioError, SensorError},
        network::{tests::FakeProbe, WpaSupplicant, SSID_OFF},
    };

    /// Stands in for the config file: records what was stored.
    #[derive(Clone, Default)]
    struct FakeStore {
        events: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl NetworkConfigurator for FakeStore {
        async fn configure(&self, config: &NetworkConfig) -> Result<(), NetworkError> {
            if self.fail {
                return Err(NetworkError::InvalidConfig("read-only filesystem"));
            }
            let mut events = self.events.lock().unwrap();
            events.push(format!("store {} {}", config.ssid, config.password));
            Ok(())
        }
    }

    /// Subscription that stays open until the test closes it.
    struct ChannelNotifier {
        tx: mpsc::UnboundedSender<String>,
        done: Arc<AtomicBool>,
        closed: Arc<Notify>,
    }

    impl Notifier for ChannelNotifier {
        fn is_done(&self) -> bool {
            self.done.load(Ordering::SeqCst)
        }

        async fn closed(&self) {
            if !self.is_done() {
                self.closed.notified().await;
            }
        }

        async fn notify(&mut self, value: Vec<u8>) -> Result<(), RadioError> {
            let value = String::from_utf8(value).map_err(|e| RadioError::Service(e.to_string()))?;
            self.tx
                .send(value)
                .map_err(|e| RadioError::Service(e.to_string()))
        }
    }

    fn service(
        state: &DeviceState,
        probe: FakeProbe,
        store: FakeStore,
    ) -> SensorService<FakeProbe, FakeStore> {
        SensorService::new(
            state.clone(),
            probe,
            store,
            Duration::from_secs(30),
            CancellationToken::new(),
        )
    }

    fn subscription() -> (
        ChannelNotifier,
        mpsc::UnboundedReceiver<String>,
        Arc<AtomicBool>,
        Arc<Notify>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let done = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(Notify::new());
        let notifier = ChannelNotifier {
            tx,
            done: done.clone(),
            closed: closed.clone(),
        };
        (notifier, rx, done, closed)
    }

    #[tokio::test]
    async fn test_read_config_unassociated() {
        let probe = FakeProbe {
            ssid: Some(SSID_OFF.to_string()),
            scan: Some(vec!["HomeNet".into()]),
            ..Default::default()
        };
        let service = service(&DeviceState::new(), probe, FakeStore::default());

        let data = service.read_config().await.unwrap();
        let info: NetworkInfo = serde_json::from_slice(&data).unwrap();
        assert_eq!(
            info,
            NetworkInfo {
                ssid: String::new(),
                ip_addr: String::new(),
                status: NetworkStatus::Down,
                available: vec!["HomeNet".into()],
            }
        );
    }

    #[tokio::test]
    async fn test_read_config_online() {
        let probe = FakeProbe {
            ssid: Some("HomeNet".into()),
            ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))),
            reachable: true,
            scan: Some(vec![]),
            ..Default::default()
        };
        let service = service(&DeviceState::new(), probe, FakeStore::default());

        let json: serde_json::Value =
            serde_json::from_slice(&service.read_config().await.unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "ssid": "HomeNet",
                "ipaddr": "10.0.0.7",
                "status": "UP",
                "available": [],
            })
        );
    }

    #[tokio::test]
    async fn test_write_config() {
        let store = FakeStore::default();
        let service = service(&DeviceState::new(), FakeProbe::default(), store.clone());

        service
            .write_config(br#"{"ssid":"HomeNet","password":"secret123"}"#)
            .await
            .unwrap();

        assert_eq!(
            *store.events.lock().unwrap(),
            vec!["store HomeNet secret123"]
        );
    }

    #[tokio::test]
    async fn test_write_config_reaches_supplicant_before_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wpa_supplicant.conf");
        let seen = dir.path().join("seen.conf");
        let copy = format!("cp '{}' '{}'", path.display(), seen.display());
        let supplicant = WpaSupplicant::new(&path, "wlan-test0", "US")
            .with_reconfigure(vec!["sh".to_string(), "-c".to_string(), copy]);
        let expected = supplicant
            .render(&NetworkConfig {
                ssid: "HomeNet".to_string(),
                password: "secret123".to_string(),
            })
            .unwrap();
        let service = SensorService::new(
            DeviceState::new(),
            FakeProbe::default(),
            supplicant,
            Duration::from_secs(30),
            CancellationToken::new(),
        );

        service
            .write_config(br#"{"ssid":"HomeNet","password":"secret123"}"#)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), expected);

        // The reload command copies whatever the file held when it ran
        let mut captured = String::new();
        for _ in 0..100 {
            captured = std::fs::read_to_string(&seen).unwrap_or_default();
            if !captured.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(captured, expected);
    }

    #[tokio::test]
    async fn test_write_config_malformed() {
        let store = FakeStore::default();
        let service = service(&DeviceState::new(), FakeProbe::default(), store.clone());

        assert_eq!(
            service.write_config(b"ssid=HomeNet").await,
            Err(GattError::InvalidPayload)
        );
        assert_eq!(
            service.write_config(br#"{"ssid":"","password":"x"}"#).await,
            Err(GattError::InvalidPayload)
        );
        assert!(store.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_config_store_fails() {
        let store = FakeStore {
            fail: true,
            ..Default::default()
        };
        let service = service(&DeviceState::new(), FakeProbe::default(), store);

        assert_eq!(
            service
                .write_config(br#"{"ssid":"HomeNet","password":"secret123"}"#)
                .await,
            Err(GattError::Unexpected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_readings() {
        let state = DeviceState::new();
        state.record_reading(22);
        let service = Arc::new(service(&state, FakeProbe::default(), FakeStore::default()));
        let (notifier, mut rx, _done, _closed) = subscription();

        let handle = tokio::spawn({
            let service = service.clone();
            async move { service.stream_readings(notifier).await }
        });

        assert_eq!(rx.recv().await.unwrap(), "22");

        state.record_error(SensorError::Read("bus timeout".into()));
        sleep(Duration::from_secs(30)).await;
        assert_eq!(rx.recv().await.unwrap(), SENSOR_ERROR);

        state.record_reading(23);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(rx.recv().await.unwrap(), "23");

        service.cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_stops_when_unsubscribed() {
        let state = DeviceState::new();
        let service = Arc::new(service(&state, FakeProbe::default(), FakeStore::default()));
        let (notifier, mut rx, done, closed) = subscription();

        let handle = tokio::spawn({
            let service = service.clone();
            async move { service.stream_readings(notifier).await }
        });
        assert_eq!(rx.recv().await.unwrap(), "0");

        // Exits right away, well before the next 30 s tick
        let start = tokio::time::Instant::now();
        done.store(true, Ordering::SeqCst);
        closed.notify_waiters();
        handle.await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(rx.recv().await.is_none());
    }
}
