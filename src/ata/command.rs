#![allow(dead_code)]

use std::time::Duration;

use crate::{
    ata::tfr::{
        AtaCommandShape, AtaProtocol, AtaReturnTfrs, AtaTaskfile, TransferBlockKind,
        TransferLengthLocation,
    },
    DataDirection,
};

/// One ATA command on its way through the translation layer.
///
/// Constructed per request, consumed by the CDB builder, and mutated by the
/// RTFR extractor, which fills [`Self::rtfr`].
#[derive(Clone, Debug)]
pub struct AtaCommand {
    pub shape: AtaCommandShape,
    pub protocol: AtaProtocol,
    pub tfr: AtaTaskfile,
    pub transfer_length_location: TransferLengthLocation,
    pub transfer_block_kind: TransferBlockKind,
    pub direction: DataDirection,
    pub multiple_count: u8,
    pub need_rtfrs: bool,
    /// 0 leaves the choice to the builder; 12/16/32 override it.
    pub force_cdb_size: u8,
    pub timeout: Option<Duration>,
    pub rtfr: AtaReturnTfrs,
}

impl AtaCommand {
    pub fn new(protocol: AtaProtocol, command: u8) -> Self {
        Self {
            shape: AtaCommandShape::Taskfile28,
            protocol,
            tfr: AtaTaskfile {
                command,
                ..Default::default()
            },
            transfer_length_location: TransferLengthLocation::NoData,
            transfer_block_kind: TransferBlockKind::Blocks512,
            direction: protocol.implied_direction().unwrap_or(DataDirection::None),
            multiple_count: 0,
            need_rtfrs: false,
            force_cdb_size: 0,
            timeout: None,
            rtfr: AtaReturnTfrs::default(),
        }
    }

    pub fn extended(mut self) -> Self {
        self.shape = AtaCommandShape::Taskfile48;
        self
    }

    pub fn complete32(mut self) -> Self {
        self.shape = AtaCommandShape::Complete32;
        self
    }

    pub fn feature(mut self, value: u16) -> Self {
        self.tfr.feature = value as u8;
        self.tfr.feature_ext = (value >> 8) as u8;
        self
    }

    pub fn count(mut self, value: u16) -> Self {
        self.tfr.set_count16(value);
        self
    }

    pub fn lba28(mut self, lba: u32) -> Self {
        self.tfr.set_lba28(lba);
        self
    }

    pub fn lba48(mut self, lba: u64) -> Self {
        self.tfr.set_lba48(lba);
        self
    }

    pub fn device(mut self, value: u8) -> Self {
        self.tfr.device = value;
        self
    }

    pub fn icc(mut self, value: u8) -> Self {
        self.tfr.icc = value;
        self
    }

    pub fn aux(mut self, value: u32) -> Self {
        self.tfr.aux = value.to_be_bytes();
        self
    }

    pub fn direction(mut self, direction: DataDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn transfer(mut self, location: TransferLengthLocation, kind: TransferBlockKind) -> Self {
        self.transfer_length_location = location;
        self.transfer_block_kind = kind;
        self
    }

    pub fn multiple_count(mut self, log2: u8) -> Self {
        self.multiple_count = log2;
        self
    }

    pub fn need_rtfrs(mut self) -> Self {
        self.need_rtfrs = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_extended(&self) -> bool {
        !matches!(self.shape, AtaCommandShape::Taskfile28)
    }
}
