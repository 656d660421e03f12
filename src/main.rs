use anyhow::Error;
use clap::Parser;
use log::{error, info};
use tokio_util::sync::CancellationToken;

#[cfg(feature = "bluez")]
use everytherm::bluetooth::BluezRadio;
#[cfg(not(feature = "bluez"))]
use everytherm::bluetooth::{SimRadio, SIM_ADDRESS};
use everytherm::{config::Args, device, logging};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Args::parse().resolve()?;

    logging::init(&config)?;
    info!("Configuring the EveryTherm service");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutting down");
                    cancel.cancel();
                }
                Err(e) => error!("Unable to listen for shutdown signal: {}", e),
            }
        }
    });

    #[cfg(feature = "bluez")]
    let radio = BluezRadio::new(&config);
    #[cfg(not(feature = "bluez"))]
    let radio = SimRadio::new(SIM_ADDRESS, cancel.clone());

    device::run(config, radio, cancel).await
}
