// modular_bitfield_msb generates fields that trip unused_parens; keep this crate clean.
#![allow(unused_parens)]

pub mod ata;
mod data_direction;
mod device;
mod error;
mod os;
pub mod passthrough;
pub mod sense;
pub mod translator;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use data_direction::DataDirection;
pub use device::SatDevice;
pub use error::{Completion, Error, Result};
pub use passthrough::{PassthroughHacks, SoftSatFlags};
pub use translator::translate_scsi;
pub use transport::{IoOutcome, ScsiIoCtx, Transport};

#[cfg(target_os = "linux")]
pub use transport::SgTransport;

#[cfg(target_os = "windows")]
pub use transport::WinTransport;
