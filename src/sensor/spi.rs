use std::future::Future;

use log::info;

use crate::error::SensorError;

#[cfg(feature = "pi")]
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

#[cfg(feature = "pi")]
const CLOCK_SPEED: u32 = 1_000_000;

/// A bus the sensor can be read over.
pub trait SensorBus: Send {
    /// Read exactly `len` bytes. May block for up to the bus timeout.
    fn receive(&mut self, len: usize) -> impl Future<Output = Result<Vec<u8>, SensorError>> + Send;
}

/// Thermocouple converter on SPI0, chip select 0, mode 0.
pub struct SpiSensor {
    #[cfg(feature = "pi")]
    spi: Spi,
}

impl SpiSensor {
    #[cfg(feature = "pi")]
    pub fn open() -> Result<Self, SensorError> {
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, CLOCK_SPEED, Mode::Mode0)
            .map_err(|e| SensorError::Setup(e.to_string()))?;

        info!("Sensor: SPI0 opened at {} Hz", CLOCK_SPEED);

        Ok(Self { spi })
    }

    #[cfg(not(feature = "pi"))]
    pub fn open() -> Result<Self, SensorError> {
        info!("Sensor: no SPI bus on this platform");

        Err(SensorError::Setup(
            "SPI is not supported on this platform".to_string(),
        ))
    }
}

impl SensorBus for SpiSensor {
    #[cfg(feature = "pi")]
    async fn receive(&mut self, len: usize) -> Result<Vec<u8>, SensorError> {
        let mut buffer = vec![0; len];
        let read = tokio::task::block_in_place(|| self.spi.read(&mut buffer))
            .map_err(|e| SensorError::Read(e.to_string()))?;

        if read < len {
            return Err(SensorError::ShortRead { wanted: len, got: read });
        }

        Ok(buffer)
    }

    #[cfg(not(feature = "pi"))]
    async fn receive(&mut self, _len: usize) -> Result<Vec<u8>, SensorError> {
        Err(SensorError::Read(
            "SPI is not supported on this platform".to_string(),
        ))
    }
}
