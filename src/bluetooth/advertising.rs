use std::time::Duration;

use common::SERVICE_UUID;
use log::{error, info};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::{Advertiser, Beacon};

/// How the device makes itself discoverable. Chosen once at bring-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdvertisingMode {
    /// Name and services only, set once
    Static,
    /// Beacon for `beacon`, then name and services for `name`, forever
    Alternating { beacon: Duration, name: Duration },
}

impl AdvertisingMode {
    /// A zero beacon interval turns alternation off.
    pub fn from_intervals(beacon: Duration, name: Duration) -> Self {
        if beacon.is_zero() {
            AdvertisingMode::Static
        } else {
            AdvertisingMode::Alternating { beacon, name }
        }
    }
}

/// What is currently on air.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Name,
    Beacon,
}

pub struct AdvertisingScheduler {
    mode: AdvertisingMode,
    name: String,
    beacon: Beacon,
}

impl AdvertisingScheduler {
    pub fn new(mode: AdvertisingMode, name: impl Into<String>) -> Self {
        Self {
            mode,
            name: name.into(),
            beacon: Beacon::everytherm(),
        }
    }

    pub fn mode(&self) -> AdvertisingMode {
        self.mode
    }

    async fn enter<A: Advertiser>(&self, phase: Phase, advertiser: &mut A) {
        let result = match phase {
            Phase::Name => {
                advertiser
                    .advertise_name_and_services(&self.name, &[SERVICE_UUID])
                    .await
            }
            Phase::Beacon => advertiser.advertise_beacon(&self.beacon).await,
        };

        // The next phase tries again, so a failure only costs one slot
        if let Err(e) = result {
            error!("Advertising: {:?} phase failed: {}", phase, e);
        }
    }

    /// Drive the advertiser until `cancel` fires. The advertiser is held for
    /// the whole run so whatever it last registered stays on air.
    pub async fn run<A: Advertiser>(self, mut advertiser: A, cancel: CancellationToken) {
        match self.mode {
            AdvertisingMode::Static => {
                info!("Advertising: {} (static)", self.name);
                self.enter(Phase::Name, &mut advertiser).await;
                cancel.cancelled().await;
            }
            AdvertisingMode::Alternating { beacon, name } => {
                info!(
                    "Advertising: alternating beacon ({:?}) and {} ({:?})",
                    beacon, self.name, name
                );
                'outer: loop {
                    for (phase, hold) in [(Phase::Beacon, beacon), (Phase::Name, name)] {
                        self.enter(phase, &mut advertiser).await;

                        tokio::select! {
                            () = cancel.cancelled() => { break 'outer; }
                            () = sleep(hold) => {}
                        }
                    }
                }
            }
        }

        info!("Advertising: stopped");
    }
}
