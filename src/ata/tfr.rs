#![allow(dead_code)]

use bitflags::bitflags;

use crate::DataDirection;

bitflags! {
    /// ATA status register bits.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AtaStatus: u8 {
        const BUSY = 0x80;
        const READY = 0x40;
        const DEVICE_FAULT = 0x20;
        const SEEK_COMPLETE = 0x10;
        const DATA_REQUEST = 0x08;
        const CORRECTED = 0x04;
        /// ACS: sense data is available for this command.
        const SENSE_DATA_AVAILABLE = 0x02;
        const ERROR = 0x01;
    }
}

bitflags! {
    /// ATA error register bits. Some bits are reused by the standard
    /// depending on the command; the aliases below share a value.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AtaError: u8 {
        const INTERFACE_CRC = 0x80;
        const UNCORRECTABLE = 0x40;
        /// Removable media commands report write protection here.
        const WRITE_PROTECTED = 0x40;
        const MEDIA_CHANGE = 0x20;
        const ID_NOT_FOUND = 0x10;
        const MEDIA_CHANGE_REQUEST = 0x08;
        const ABORT = 0x04;
        /// Removable media commands report "no media" here.
        const NO_MEDIA = 0x02;
        const END_OF_MEDIA = 0x02;
        const ADDRESS_MARK_NOT_FOUND = 0x01;
    }
}

/// Protocol the SATL uses when talking to the ATA device. The discriminant
/// is the protocol nibble placed into the pass-through CDB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AtaProtocol {
    /// Device management - ATA hardware reset
    HardReset = 0x00,
    /// Device management - ATA software reset
    SoftReset = 0x01,
    NoData = 0x03,
    PioIn = 0x04,
    PioOut = 0x05,
    Dma = 0x06,
    DmaQueued = 0x07,
    /// Execute Device Diagnostic
    DevDiag = 0x08,
    DevReset = 0x09,
    UdmaIn = 0x0A,
    UdmaOut = 0x0B,
    /// FPDMA (NCQ, see SATA 3.3)
    Fpdma = 0x0C,
    /// Return Response Information
    ReturnInfo = 0x0F,
}

impl AtaProtocol {
    pub fn nibble(self) -> u8 {
        self as u8
    }

    /// Reverse of [`Self::nibble`]. UDMA and PIO nibbles encode the
    /// direction; the remaining data-transfer protocols do not, which is the
    /// "protocol-nibble redundancy" tolerated by the CDB round-trip.
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        Some(match nibble {
            0x00 => AtaProtocol::HardReset,
            0x01 => AtaProtocol::SoftReset,
            0x03 => AtaProtocol::NoData,
            0x04 => AtaProtocol::PioIn,
            0x05 => AtaProtocol::PioOut,
            0x06 => AtaProtocol::Dma,
            0x07 => AtaProtocol::DmaQueued,
            0x08 => AtaProtocol::DevDiag,
            0x09 => AtaProtocol::DevReset,
            0x0A => AtaProtocol::UdmaIn,
            0x0B => AtaProtocol::UdmaOut,
            0x0C => AtaProtocol::Fpdma,
            0x0F => AtaProtocol::ReturnInfo,
            _ => return None,
        })
    }

    pub fn is_data_transfer(self) -> bool {
        matches!(
            self,
            AtaProtocol::PioIn
                | AtaProtocol::PioOut
                | AtaProtocol::Dma
                | AtaProtocol::DmaQueued
                | AtaProtocol::UdmaIn
                | AtaProtocol::UdmaOut
                | AtaProtocol::Fpdma
        )
    }

    pub fn is_reset(self) -> bool {
        matches!(self, AtaProtocol::HardReset | AtaProtocol::SoftReset)
    }

    pub fn implied_direction(self) -> Option<DataDirection> {
        match self {
            AtaProtocol::PioIn | AtaProtocol::UdmaIn => Some(DataDirection::FromDevice),
            AtaProtocol::PioOut | AtaProtocol::UdmaOut => Some(DataDirection::ToDevice),
            _ => None,
        }
    }
}

/// Controls which registers are set and which CDB length is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtaCommandShape {
    Taskfile28,
    Taskfile48,
    /// 48-bit taskfile plus ICC and AUX registers; needs the 32-byte CDB.
    Complete32,
}

/// Where the SATL finds the transfer length (the T_LENGTH field).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferLengthLocation {
    NoData = 0,
    Feature = 1,
    SectorCount = 2,
    /// Transport-specific information unit; sizing deferred to the transport.
    Tpsiu = 3,
}

/// Unit of the value T_LENGTH points at (the BYTE_BLOCK and T_TYPE bits).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferBlockKind {
    Bytes,
    Blocks512,
    LogicalSectors,
}

/// The command block registers handed to the drive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AtaTaskfile {
    pub feature: u8,
    pub count: u8,
    pub lba_low: u8,
    pub lba_mid: u8,
    pub lba_hi: u8,
    pub device: u8,
    pub command: u8,

    // 48-bit extensions; must stay zero for 28-bit commands.
    pub feature_ext: u8,
    pub count_ext: u8,
    pub lba_low_ext: u8,
    pub lba_mid_ext: u8,
    pub lba_hi_ext: u8,

    // 32-byte CDB extensions.
    pub icc: u8,
    pub aux: [u8; 4],
}

impl AtaTaskfile {
    pub fn lba28(&self) -> u32 {
        (self.lba_low as u32)
            | (self.lba_mid as u32) << 8
            | (self.lba_hi as u32) << 16
            | ((self.device & 0x0F) as u32) << 24
    }

    pub fn lba48(&self) -> u64 {
        (self.lba_low as u64)
            | (self.lba_mid as u64) << 8
            | (self.lba_hi as u64) << 16
            | (self.lba_low_ext as u64) << 24
            | (self.lba_mid_ext as u64) << 32
            | (self.lba_hi_ext as u64) << 40
    }

    pub fn set_lba28(&mut self, lba: u32) {
        self.lba_low = lba as u8;
        self.lba_mid = (lba >> 8) as u8;
        self.lba_hi = (lba >> 16) as u8;
        self.device = (self.device & 0xF0) | ((lba >> 24) & 0x0F) as u8;
    }

    pub fn set_lba48(&mut self, lba: u64) {
        self.lba_low = lba as u8;
        self.lba_mid = (lba >> 8) as u8;
        self.lba_hi = (lba >> 16) as u8;
        self.lba_low_ext = (lba >> 24) as u8;
        self.lba_mid_ext = (lba >> 32) as u8;
        self.lba_hi_ext = (lba >> 40) as u8;
    }

    pub fn count16(&self) -> u16 {
        (self.count_ext as u16) << 8 | self.count as u16
    }

    pub fn set_count16(&mut self, count: u16) {
        self.count = count as u8;
        self.count_ext = (count >> 8) as u8;
    }

    pub fn ext_registers_zero(&self) -> bool {
        self.feature_ext == 0
            && self.count_ext == 0
            && self.lba_low_ext == 0
            && self.lba_mid_ext == 0
            && self.lba_hi_ext == 0
    }
}

/// Registers returned by the drive after command completion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AtaReturnTfrs {
    pub status: u8,
    pub error: u8,
    pub count: u8,
    pub count_ext: u8,
    pub lba_low: u8,
    pub lba_mid: u8,
    pub lba_hi: u8,
    pub lba_low_ext: u8,
    pub lba_mid_ext: u8,
    pub lba_hi_ext: u8,
    pub device: u8,
}

impl AtaReturnTfrs {
    pub fn status_flags(&self) -> AtaStatus {
        AtaStatus::from_bits_retain(self.status)
    }

    pub fn error_flags(&self) -> AtaError {
        AtaError::from_bits_retain(self.error)
    }

    pub fn lba48(&self) -> u64 {
        (self.lba_low as u64)
            | (self.lba_mid as u64) << 8
            | (self.lba_hi as u64) << 16
            | (self.lba_low_ext as u64) << 24
            | (self.lba_mid_ext as u64) << 32
            | (self.lba_hi_ext as u64) << 40
    }

    pub fn ext_registers_zero(&self) -> bool {
        self.count_ext == 0
            && self.lba_low_ext == 0
            && self.lba_mid_ext == 0
            && self.lba_hi_ext == 0
    }

    /// An all-zero status after a command that was supposed to return RTFRs
    /// means the SATL never populated them.
    pub fn looks_empty(&self) -> bool {
        self.status == 0 || (self.status_flags().contains(AtaStatus::ERROR) && self.error == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lba48_register_split() {
        let mut tfr = AtaTaskfile::default();
        tfr.set_lba48(0x0123_4567_89AB);

        assert_eq!(tfr.lba_low, 0xAB);
        assert_eq!(tfr.lba_mid, 0x89);
        assert_eq!(tfr.lba_hi, 0x67);
        assert_eq!(tfr.lba_low_ext, 0x45);
        assert_eq!(tfr.lba_mid_ext, 0x23);
        assert_eq!(tfr.lba_hi_ext, 0x01);
        assert_eq!(tfr.lba48(), 0x0123_4567_89AB);
    }

    #[test]
    fn lba28_uses_device_nibble() {
        let mut tfr = AtaTaskfile {
            device: 0xE0,
            ..Default::default()
        };
        tfr.set_lba28(0x0FED_CBA9);

        assert_eq!(tfr.device, 0xEF);
        assert_eq!(tfr.lba28(), 0x0FED_CBA9);
    }

    #[test]
    fn protocol_nibble_round_trip() {
        for protocol in [
            AtaProtocol::HardReset,
            AtaProtocol::SoftReset,
            AtaProtocol::NoData,
            AtaProtocol::PioIn,
            AtaProtocol::PioOut,
            AtaProtocol::Dma,
            AtaProtocol::DmaQueued,
            AtaProtocol::DevDiag,
            AtaProtocol::DevReset,
            AtaProtocol::UdmaIn,
            AtaProtocol::UdmaOut,
            AtaProtocol::Fpdma,
            AtaProtocol::ReturnInfo,
        ] {
            assert_eq!(AtaProtocol::from_nibble(protocol.nibble()), Some(protocol));
        }
    }

    #[test]
    fn empty_rtfr_detection() {
        let zeroed = AtaReturnTfrs::default();
        assert!(zeroed.looks_empty());

        let error_without_bits = AtaReturnTfrs {
            status: 0x51,
            error: 0,
            ..Default::default()
        };
        assert!(error_without_bits.looks_empty());

        let good = AtaReturnTfrs {
            status: 0x50,
            ..Default::default()
        };
        assert!(!good.looks_empty());
    }
}
