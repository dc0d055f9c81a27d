pub mod command;
pub mod identify;
pub mod ops;
pub mod tfr;

pub use command::AtaCommand;
pub use identify::{IdentifyDevice, ZonedKind};
pub use tfr::{
    AtaCommandShape, AtaError, AtaProtocol, AtaReturnTfrs, AtaStatus, AtaTaskfile,
    TransferBlockKind, TransferLengthLocation,
};
