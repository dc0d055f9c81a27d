pub mod cdb;
pub mod dispatch;
pub mod hacks;
pub mod rtfr;

pub use hacks::{PassthroughHacks, SoftSatFlags};
