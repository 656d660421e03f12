use std::sync::Arc;

use anyhow::{Context, Error};
use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::{
    bluetooth::{AdvertisingMode, AdvertisingScheduler, Radio, SensorService},
    config::Config,
    error::SensorError,
    network::{NetworkConfigurator, NetworkProbe, WifiTools, WpaSupplicant},
    report::{HttpReporter, Reporter},
    sensor::{SensorBus, SensorMonitor, SpiSensor},
    state::DeviceState,
};

/// Everything the device runs, minus the radio, which the caller picks.
pub struct Device<P, C, R> {
    config: Config,
    state: DeviceState,
    probe: P,
    configurator: C,
    reporter: Arc<R>,
}

impl Device<WifiTools, WpaSupplicant, HttpReporter> {
    /// The device as deployed: shell WiFi tools, `wpa_supplicant` and the
    /// HTTP collector.
    pub fn from_config(config: Config) -> Self {
        let probe = WifiTools::new(&config.wifi_interface, &config.reachability_url);
        let mut configurator = WpaSupplicant::new(
            &config.wpa_config_path,
            &config.wifi_interface,
            &config.wpa_country,
        );
        if let Some(command) = &config.wpa_reconfigure {
            configurator = configurator.with_reconfigure(command.clone());
        }
        let reporter = Arc::new(HttpReporter::new(&config.report_url));

        Device::new(config, probe, configurator, reporter)
    }
}

impl<P, C, R> Device<P, C, R>
where
    P: NetworkProbe,
    C: NetworkConfigurator,
    R: Reporter,
{
    pub fn new(config: Config, probe: P, configurator: C, reporter: Arc<R>) -> Self {
        Self {
            config,
            state: DeviceState::new(),
            probe,
            configurator,
            reporter,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Start sampling, bring the radio up, then serve and advertise until
    /// `cancel` fires. Only bring-up failures are returned; everything after
    /// that is absorbed by the individual tasks.
    pub async fn run<F, B, X>(
        self,
        open_bus: F,
        mut radio: X,
        cancel: CancellationToken,
    ) -> Result<(), Error>
    where
        F: FnOnce() -> Result<B, SensorError> + Send + 'static,
        B: SensorBus + 'static,
        X: Radio,
    {
        let Device {
            config,
            state,
            probe,
            configurator,
            reporter,
        } = self;

        let monitor = SensorMonitor::new(state.clone(), reporter, config.sensor_period());
        let sensor_cancel = cancel.clone();
        let sensor = tokio::spawn(async move {
            // Opened once; held until the loop exits
            let bus = open_bus();
            monitor.run(bus, sensor_cancel).await
        });

        // Bring-up gate: nothing is advertised until the radio is powered and
        // the identity is known.
        let bring_up = async {
            radio.power_on().await.context("failed to open bluetooth device")?;
            let identity = radio
                .address()
                .await
                .context("unable to obtain bluetooth device ID")?;
            info!("Bluetooth: device ID {}", identity);
            state.set_identity(identity);

            let service = Arc::new(SensorService::new(
                state.clone(),
                probe,
                configurator,
                config.notify_period(),
                cancel.clone(),
            ));
            radio
                .serve(service)
                .await
                .context("failed to register sensor service")?;

            Ok::<_, Error>(())
        };

        if let Err(e) = bring_up.await {
            error!("Bring-up failed: {:#}", e);
            cancel.cancel();
            if let Err(join) = sensor.await {
                error!("Sensor task panicked: {}", join);
            }
            return Err(e);
        }

        let mode = AdvertisingMode::from_intervals(config.beacon_interval(), config.name_interval());
        let scheduler = AdvertisingScheduler::new(mode, &config.name);
        let advertising = tokio::spawn(scheduler.run(radio.advertiser(), cancel.clone()));

        info!("Device running");
        cancel.cancelled().await;

        let (sensor, advertising) = tokio::join!(sensor, advertising);
        sensor.context("sensor task panicked")?;
        advertising.context("advertising task panicked")?;

        // The radio goes last so the service stays registered until the end
        drop(radio);
        info!("Device stopped");

        Ok(())
    }
}

/// Runs the deployed device on the real sensor bus.
pub async fn run<X: Radio>(config: Config, radio: X, cancel: CancellationToken) -> Result<(), Error> {
    Device::from_config(config)
        .run(SpiSensor::open, radio, cancel)
        .await
}
