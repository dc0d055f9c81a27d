#![allow(dead_code)]

//! SCSI sense buffer formats: fixed (70h/71h) and descriptor (72h/73h),
//! parsing helpers, and the descriptor layouts shared by the extractor and
//! the synthesizer.

pub mod synthesize;

use modular_bitfield_msb::prelude::*;

use crate::ata::AtaReturnTfrs;

/// Sense buffer length used when the dispatcher allocates one itself.
pub const SPC3_SENSE_LEN: usize = 252;

pub const RESPONSE_CODE_FIXED_CURRENT: u8 = 0x70;
pub const RESPONSE_CODE_FIXED_DEFERRED: u8 = 0x71;
pub const RESPONSE_CODE_DESCRIPTOR_CURRENT: u8 = 0x72;
pub const RESPONSE_CODE_DESCRIPTOR_DEFERRED: u8 = 0x73;

pub const DESCRIPTOR_TYPE_INFORMATION: u8 = 0x00;
pub const DESCRIPTOR_TYPE_COMMAND_SPECIFIC: u8 = 0x01;
pub const DESCRIPTOR_TYPE_SENSE_KEY_SPECIFIC: u8 = 0x02;
pub const DESCRIPTOR_TYPE_FRU: u8 = 0x03;
pub const DESCRIPTOR_TYPE_BLOCK_COMMANDS: u8 = 0x05;
pub const DESCRIPTOR_TYPE_ATA_STATUS_RETURN: u8 = 0x09;

pub const ATA_STATUS_RETURN_DESC_LEN: u8 = 0x0C;

pub mod key {
    pub const NO_SENSE: u8 = 0x0;
    pub const RECOVERED_ERROR: u8 = 0x1;
    pub const NOT_READY: u8 = 0x2;
    pub const MEDIUM_ERROR: u8 = 0x3;
    pub const HARDWARE_ERROR: u8 = 0x4;
    pub const ILLEGAL_REQUEST: u8 = 0x5;
    pub const UNIT_ATTENTION: u8 = 0x6;
    pub const DATA_PROTECT: u8 = 0x7;
    pub const ABORTED_COMMAND: u8 = 0xB;
    pub const MISCOMPARE: u8 = 0xE;
}

/// `(asc, ascq)` pairs the translators raise.
pub mod asc {
    pub const NO_ADDITIONAL_SENSE: (u8, u8) = (0x00, 0x00);
    pub const ATA_PASSTHROUGH_INFO_AVAILABLE: (u8, u8) = (0x00, 0x1D);
    pub const LOGICAL_UNIT_NOT_READY_FORMAT_IN_PROGRESS: (u8, u8) = (0x04, 0x04);
    pub const LOGICAL_UNIT_NOT_READY_SELF_TEST_IN_PROGRESS: (u8, u8) = (0x04, 0x09);
    pub const LOGICAL_UNIT_NOT_READY_SANITIZE_IN_PROGRESS: (u8, u8) = (0x04, 0x1B);
    pub const WARNING_TEMPERATURE_EXCEEDED: (u8, u8) = (0x0B, 0x01);
    pub const UNRECOVERED_READ_ERROR: (u8, u8) = (0x11, 0x00);
    pub const MISCOMPARE_DURING_VERIFY: (u8, u8) = (0x1D, 0x00);
    pub const INVALID_COMMAND_OPERATION_CODE: (u8, u8) = (0x20, 0x00);
    pub const LBA_OUT_OF_RANGE: (u8, u8) = (0x21, 0x00);
    pub const INVALID_FIELD_IN_CDB: (u8, u8) = (0x24, 0x00);
    pub const INVALID_FIELD_IN_PARAMETER_LIST: (u8, u8) = (0x26, 0x00);
    pub const WRITE_PROTECTED: (u8, u8) = (0x27, 0x00);
    pub const NOT_READY_TO_READY_CHANGE: (u8, u8) = (0x28, 0x00);
    pub const POWER_ON_RESET: (u8, u8) = (0x29, 0x00);
    pub const COMMAND_SEQUENCE_ERROR: (u8, u8) = (0x2C, 0x00);
    pub const SANITIZE_COMMAND_FAILED: (u8, u8) = (0x31, 0x03);
    pub const MEDIUM_NOT_PRESENT: (u8, u8) = (0x3A, 0x00);
    pub const INTERNAL_TARGET_FAILURE: (u8, u8) = (0x44, 0x00);
    pub const INFORMATION_UNIT_CRC_ERROR: (u8, u8) = (0x47, 0x03);
    pub const OPERATOR_MEDIUM_REMOVAL_REQUEST: (u8, u8) = (0x5A, 0x01);
    pub const FAILURE_PREDICTION_THRESHOLD_EXCEEDED: (u8, u8) = (0x5D, 0x10);
    pub const LOW_POWER_CONDITION_ON: (u8, u8) = (0x5E, 0x00);
    pub const IDLE_CONDITION_BY_TIMER: (u8, u8) = (0x5E, 0x03);
    pub const STANDBY_CONDITION_BY_TIMER: (u8, u8) = (0x5E, 0x04);
}

/// Fixed-format sense, first 18 bytes.
#[bitfield]
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedSenseData {
    pub valid: B1,
    pub response_code: B7,
    pub obsolete: B8,
    pub file_mark: B1,
    pub end_of_medium: B1,
    pub incorrect_length_indicator: B1,
    pub sense_data_overflow: B1,
    pub sense_key: B4,
    pub information: B32,
    pub additional_sense_length: B8,
    pub command_specific_information: B32,
    pub additional_sense_code: B8,
    pub additional_sense_code_qualifier: B8,
    pub field_replaceable_unit_code: B8,
    pub sense_key_specific_valid: B1,
    pub sense_key_specific_high: B7,
    pub sense_key_specific_low: B16,
}

/// Descriptor-format sense header.
#[bitfield]
#[derive(Clone, Copy, Debug, Default)]
pub struct DescriptorSenseHeader {
    pub reserved_0: B1,
    pub response_code: B7,
    pub reserved_1: B4,
    pub sense_key: B4,
    pub additional_sense_code: B8,
    pub additional_sense_code_qualifier: B8,
    pub reserved_2: B24,
    pub additional_sense_length: B8,
}

/// ATA Status Return descriptor (type 09h, length 0Ch, 14 bytes total).
#[bitfield]
#[derive(Clone, Copy, Debug, Default)]
pub struct AtaStatusReturnDescriptor {
    pub descriptor_type: B8,
    pub additional_length: B8,
    pub reserved_0: B7,
    pub extend: B1,
    pub error: B8,
    pub count_ext: B8,
    pub count: B8,
    pub lba_low_ext: B8,
    pub lba_low: B8,
    pub lba_mid_ext: B8,
    pub lba_mid: B8,
    pub lba_hi_ext: B8,
    pub lba_hi: B8,
    pub device: B8,
    pub status: B8,
}

impl AtaStatusReturnDescriptor {
    pub fn from_rtfrs(rtfrs: &AtaReturnTfrs, extend: bool) -> Self {
        Self::new()
            .with_descriptor_type(DESCRIPTOR_TYPE_ATA_STATUS_RETURN)
            .with_additional_length(ATA_STATUS_RETURN_DESC_LEN)
            .with_extend(extend as u8)
            .with_error(rtfrs.error)
            .with_count_ext(rtfrs.count_ext)
            .with_count(rtfrs.count)
            .with_lba_low_ext(rtfrs.lba_low_ext)
            .with_lba_low(rtfrs.lba_low)
            .with_lba_mid_ext(rtfrs.lba_mid_ext)
            .with_lba_mid(rtfrs.lba_mid)
            .with_lba_hi_ext(rtfrs.lba_hi_ext)
            .with_lba_hi(rtfrs.lba_hi)
            .with_device(rtfrs.device)
            .with_status(rtfrs.status)
    }

    pub fn to_rtfrs(&self) -> AtaReturnTfrs {
        AtaReturnTfrs {
            status: self.status(),
            error: self.error(),
            count: self.count(),
            count_ext: self.count_ext(),
            lba_low: self.lba_low(),
            lba_mid: self.lba_mid(),
            lba_hi: self.lba_hi(),
            lba_low_ext: self.lba_low_ext(),
            lba_mid_ext: self.lba_mid_ext(),
            lba_hi_ext: self.lba_hi_ext(),
            device: self.device(),
        }
    }
}

/// Sense-key-specific descriptor (type 02h), also used flattened into the
/// fixed format at bytes 15..17.
#[bitfield]
#[derive(Clone, Copy, Debug, Default)]
pub struct SenseKeySpecificDescriptor {
    pub descriptor_type: B8,
    pub additional_length: B8,
    pub reserved_0: B16,
    pub sense_key_specific_valid: B1,
    pub command_data: B1,
    pub reserved_1: B2,
    pub bit_pointer_valid: B1,
    pub bit_pointer: B3,
    pub field_pointer: B16,
    pub reserved_2: B8,
}

/// The format a sense buffer is (to be) encoded in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SenseFormat {
    Fixed,
    Descriptor,
}

/// What a received sense buffer parsed into.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SenseData {
    pub response_code: u8,
    pub sense_key: u8,
    pub asc: u8,
    pub ascq: u8,
    pub fixed_information: u32,
    pub fixed_command_specific: u32,
}

impl SenseData {
    pub fn is_descriptor_format(&self) -> bool {
        matches!(
            self.response_code,
            RESPONSE_CODE_DESCRIPTOR_CURRENT | RESPONSE_CODE_DESCRIPTOR_DEFERRED
        )
    }

    pub fn is_fixed_format(&self) -> bool {
        matches!(
            self.response_code,
            RESPONSE_CODE_FIXED_CURRENT | RESPONSE_CODE_FIXED_DEFERRED
        )
    }

    pub fn triple(&self) -> (u8, u8, u8) {
        (self.sense_key, self.asc, self.ascq)
    }
}

/// Pulls response code, key and ASC/ASCQ out of either sense format.
/// Returns `None` for an empty or unrecognized buffer.
pub fn parse(buffer: &[u8]) -> Option<SenseData> {
    let response_code = buffer.first()? & 0x7F;
    match response_code {
        RESPONSE_CODE_FIXED_CURRENT | RESPONSE_CODE_FIXED_DEFERRED => {
            if buffer.len() < 14 {
                return None;
            }
            Some(SenseData {
                response_code,
                sense_key: buffer[2] & 0x0F,
                asc: buffer[12],
                ascq: buffer[13],
                fixed_information: u32::from_be_bytes(buffer[3..7].try_into().ok()?),
                fixed_command_specific: u32::from_be_bytes(buffer[8..12].try_into().ok()?),
            })
        }
        RESPONSE_CODE_DESCRIPTOR_CURRENT | RESPONSE_CODE_DESCRIPTOR_DEFERRED => {
            if buffer.len() < 8 {
                return None;
            }
            Some(SenseData {
                response_code,
                sense_key: buffer[1] & 0x0F,
                asc: buffer[2],
                ascq: buffer[3],
                fixed_information: 0,
                fixed_command_specific: 0,
            })
        }
        _ => None,
    }
}

/// Walks the descriptors of a 72h/73h sense buffer and returns the first of
/// the requested type (including its two-byte header).
pub fn find_descriptor(buffer: &[u8], descriptor_type: u8) -> Option<&[u8]> {
    let data = parse(buffer)?;
    if !data.is_descriptor_format() {
        return None;
    }

    let additional_length = buffer.get(7).copied()? as usize;
    let end = usize::min(8 + additional_length, buffer.len());
    let mut offset = 8;
    while offset + 2 <= end {
        let this_type = buffer[offset];
        let this_len = buffer[offset + 1] as usize + 2;
        if this_type == descriptor_type {
            return buffer.get(offset..usize::min(offset + this_len, end));
        }
        if this_len == 2 {
            // A zero additional length would loop forever.
            return None;
        }
        offset += this_len;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    const FIXED_SENSE_LENGTH: usize = 18;
    const DESCRIPTOR_HEADER_LENGTH: usize = 8;
    const ATA_STATUS_RETURN_LENGTH: usize = 14;
    const SKS_DESCRIPTOR_LENGTH: usize = 8;

    #[test]
    fn layout_test() {
        assert_eq!(
            size_of::<FixedSenseData>(),
            FIXED_SENSE_LENGTH,
            concat!("Size of: ", stringify!(FixedSenseData))
        );

        assert_eq!(
            size_of::<DescriptorSenseHeader>(),
            DESCRIPTOR_HEADER_LENGTH,
            concat!("Size of: ", stringify!(DescriptorSenseHeader))
        );

        assert_eq!(
            size_of::<AtaStatusReturnDescriptor>(),
            ATA_STATUS_RETURN_LENGTH,
            concat!("Size of: ", stringify!(AtaStatusReturnDescriptor))
        );

        assert_eq!(
            size_of::<SenseKeySpecificDescriptor>(),
            SKS_DESCRIPTOR_LENGTH,
            concat!("Size of: ", stringify!(SenseKeySpecificDescriptor))
        );
    }

    #[test]
    fn parse_both_formats() {
        let mut fixed = [0u8; 18];
        fixed[0] = 0x70;
        fixed[2] = key::ILLEGAL_REQUEST;
        fixed[7] = 10;
        fixed[12] = 0x24;

        let parsed = parse(&fixed).unwrap();
        assert!(parsed.is_fixed_format());
        assert_eq!(parsed.triple(), (key::ILLEGAL_REQUEST, 0x24, 0x00));

        let mut descriptor = [0u8; 8];
        descriptor[0] = 0x72;
        descriptor[1] = key::NOT_READY;
        descriptor[2] = 0x04;
        descriptor[3] = 0x1B;

        let parsed = parse(&descriptor).unwrap();
        assert!(parsed.is_descriptor_format());
        assert_eq!(parsed.triple(), (key::NOT_READY, 0x04, 0x1B));

        assert_eq!(parse(&[0u8; 18]), None);
    }

    #[test]
    fn descriptor_walk_skips_leading_descriptors() {
        let mut buffer = [0u8; 40];
        buffer[0] = 0x72;
        buffer[7] = 26;
        // Information descriptor first.
        buffer[8] = DESCRIPTOR_TYPE_INFORMATION;
        buffer[9] = 0x0A;
        // Then the ATA status return descriptor.
        buffer[20] = DESCRIPTOR_TYPE_ATA_STATUS_RETURN;
        buffer[21] = ATA_STATUS_RETURN_DESC_LEN;
        buffer[23] = 0x04; // error

        let found = find_descriptor(&buffer, DESCRIPTOR_TYPE_ATA_STATUS_RETURN).unwrap();
        assert_eq!(found[0], DESCRIPTOR_TYPE_ATA_STATUS_RETURN);
        assert_eq!(found.len(), 14);
        assert_eq!(found[3], 0x04);

        assert_eq!(find_descriptor(&buffer, DESCRIPTOR_TYPE_FRU), None);
    }

    #[test]
    fn ata_status_return_descriptor_round_trip() {
        let rtfrs = AtaReturnTfrs {
            status: 0x51,
            error: 0x04,
            count: 0x01,
            lba_low: 0xAA,
            lba_mid: 0xBB,
            lba_hi: 0xCC,
            lba_low_ext: 0x11,
            device: 0xA0,
            ..Default::default()
        };

        let descriptor = AtaStatusReturnDescriptor::from_rtfrs(&rtfrs, true);
        assert_eq!(descriptor.bytes[0], DESCRIPTOR_TYPE_ATA_STATUS_RETURN);
        assert_eq!(descriptor.bytes[1], ATA_STATUS_RETURN_DESC_LEN);
        assert_eq!(descriptor.to_rtfrs(), rtfrs);
    }
}
