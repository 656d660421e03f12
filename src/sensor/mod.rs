mod spi;

use std::{sync::Arc, time::Duration};

use common::{Reading, Report};
use log::{debug, error, info};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    error::SensorError,
    report::{spawn_report, Reporter},
    state::DeviceState,
};

pub use spi::{SensorBus, SpiSensor};

/// Bytes clocked out of the converter per sample. Only the first is used.
pub const SAMPLE_LEN: usize = 3;

/// Periodically samples the sensor into the device state and pushes each good
/// reading to the collector once the device has an identity.
pub struct SensorMonitor<R> {
    state: DeviceState,
    reporter: Arc<R>,
    period: Duration,
}

impl<R: Reporter> SensorMonitor<R> {
    pub fn new(state: DeviceState, reporter: Arc<R>, period: Duration) -> Self {
        Self {
            state,
            reporter,
            period,
        }
    }

    /// Run until `cancel` fires. `bus` is the result of opening the sensor bus
    /// once up front; if that failed every cycle records the setup error.
    pub async fn run<B: SensorBus>(
        self,
        mut bus: Result<B, SensorError>,
        cancel: CancellationToken,
    ) {
        if let Err(e) = &bus {
            error!("Sensor: {}", e);
        }

        info!("Sensor: sampling every {:?}", self.period);

        loop {
            let sample = match bus.as_mut() {
                Ok(bus) => read_sample(bus).await,
                Err(e) => Err(e.clone()),
            };
            self.record(sample);

            tokio::select! {
                () = cancel.cancelled() => { break; }
                () = sleep(self.period) => {}
            }
        }

        info!("Sensor: stopped");
    }

    fn record(&self, sample: Result<Reading, SensorError>) {
        match sample {
            Ok(reading) => {
                let snapshot = self.state.record_reading(reading);
                debug!("Sensor: read {}", reading);

                // The identity is the collector's key for this device, so
                // nothing is reported until bring-up has resolved it.
                if snapshot.has_identity() {
                    spawn_report(
                        self.reporter.clone(),
                        Report {
                            device: snapshot.identity,
                            reading,
                        },
                    );
                }
            }
            Err(e) => {
                error!("Sensor: {}", e);
                self.state.record_error(e);
            }
        }
    }
}

async fn read_sample<B: SensorBus>(bus: &mut B) -> Result<Reading, SensorError> {
    let data = bus.receive(SAMPLE_LEN).await?;
    data.first()
        .map(|&byte| Reading::from(byte))
        .ok_or(SensorError::ShortRead {
            wanted: SAMPLE_LEN,
            got: 0,
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use tokio::sync::mpsc;

    use super::*;
    use crate::error::ReportError;

    /// Plays back a fixed script of bus results, then keeps failing.
    pub(crate) struct ScriptedBus {
        pub script: VecDeque<Result<Vec<u8>, SensorError>>,
    }

    impl ScriptedBus {
        pub(crate) fn new(
            script: impl IntoIterator<Item = Result<Vec<u8>, SensorError>>,
        ) -> Self {
            Self {
                script: script.into_iter().collect(),
            }
        }
    }

    impl SensorBus for ScriptedBus {
        async fn receive(&mut self, len: usize) -> Result<Vec<u8>, SensorError> {
            assert_eq!(len, SAMPLE_LEN);
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(SensorError::Read("script exhausted".into())))
        }
    }

    pub(crate) struct ChannelReporter {
        pub tx: mpsc::UnboundedSender<Report>,
    }

    impl Reporter for ChannelReporter {
        async fn report(&self, report: Report) -> Result<(), ReportError> {
            self.tx.send(report).ok();
            Ok(())
        }
    }

    fn monitor(
        state: &DeviceState,
    ) -> (
        SensorMonitor<ChannelReporter>,
        mpsc::UnboundedReceiver<Report>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = SensorMonitor::new(
            state.clone(),
            Arc::new(ChannelReporter { tx }),
            Duration::from_secs(30),
        );
        (monitor, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_then_success() {
        let state = DeviceState::new();
        let (monitor, _rx) = monitor(&state);
        let cancel = CancellationToken::new();

        let bus = ScriptedBus::new([
            Ok(vec![40, 0, 0]),
            Err(SensorError::Read("bus timeout".into())),
            Ok(vec![42, 1, 2]),
        ]);
        let handle = tokio::spawn(monitor.run(Ok(bus), cancel.clone()));

        sleep(Duration::from_secs(1)).await;
        assert_eq!(state.read().reading, 40);
        assert_eq!(state.read().error, None);

        sleep(Duration::from_secs(30)).await;
        let failed = state.read();
        assert_eq!(failed.error, Some(SensorError::Read("bus timeout".into())));

        sleep(Duration::from_secs(30)).await;
        let recovered = state.read();
        assert_eq!(recovered.error, None);
        assert_eq!(recovered.reading, 42);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_failure_keeps_retrying() {
        let state = DeviceState::new();
        let (monitor, mut rx) = monitor(&state);
        let cancel = CancellationToken::new();
        let setup = SensorError::Setup("no spidev".into());

        let bus = Err::<ScriptedBus, _>(setup.clone());
        let handle = tokio::spawn(monitor.run(bus, cancel.clone()));

        for _ in 0..3 {
            sleep(Duration::from_secs(30)).await;
            assert_eq!(state.read().error, Some(setup.clone()));
        }
        assert!(!handle.is_finished());
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_only_with_identity() {
        let state = DeviceState::new();
        let (monitor, mut rx) = monitor(&state);
        let cancel = CancellationToken::new();

        let bus = ScriptedBus::new([Ok(vec![20, 0, 0]), Ok(vec![21, 0, 0])]);
        let handle = tokio::spawn(monitor.run(Ok(bus), cancel.clone()));

        sleep(Duration::from_secs(1)).await;
        assert_eq!(state.read().reading, 20);
        assert!(rx.try_recv().is_err());

        state.set_identity("AA:BB:CC:DD:EE:FF");
        sleep(Duration::from_secs(30)).await;

        assert_eq!(
            rx.recv().await,
            Some(Report {
                device: "AA:BB:CC:DD:EE:FF".to_string(),
                reading: 21,
            })
        );
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_read_is_an_error() {
        let state = DeviceState::new();
        let (monitor, _rx) = monitor(&state);
        let cancel = CancellationToken::new();

        let bus = ScriptedBus::new([Ok(vec![])]);
        let handle = tokio::spawn(monitor.run(Ok(bus), cancel.clone()));

        sleep(Duration::from_secs(1)).await;
        assert_eq!(
            state.read().error,
            Some(SensorError::ShortRead {
                wanted: SAMPLE_LEN,
                got: 0
            })
        );

        cancel.cancel();
        handle.await.unwrap();
    }
}
