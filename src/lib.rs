pub mod bluetooth;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod network;
pub mod report;
pub mod sensor;
pub mod state;

pub mod prelude {
    pub use crate::{
        bluetooth::*, config::*, device::Device, error::*, network::*, report::*, sensor::*,
        state::*,
    };
}
