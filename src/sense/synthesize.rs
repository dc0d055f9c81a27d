#![allow(dead_code)]

//! Builds SCSI sense buffers: from ATA return task file registers, and from
//! explicit `(key, asc, ascq)` triples plus optional descriptors.

use crate::{
    ata::{AtaError, AtaReturnTfrs, AtaStatus},
    sense::{
        asc, key, AtaStatusReturnDescriptor, SenseFormat, SenseKeySpecificDescriptor,
        DESCRIPTOR_TYPE_ATA_STATUS_RETURN, DESCRIPTOR_TYPE_BLOCK_COMMANDS,
        DESCRIPTOR_TYPE_COMMAND_SPECIFIC, DESCRIPTOR_TYPE_FRU, DESCRIPTOR_TYPE_INFORMATION,
        DESCRIPTOR_TYPE_SENSE_KEY_SPECIFIC, RESPONSE_CODE_DESCRIPTOR_CURRENT,
        RESPONSE_CODE_FIXED_CURRENT,
    },
};

/// The three-byte sense-key-specific payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SenseKeySpecific {
    pub bytes: [u8; 3],
}

/// Points the initiator at the exact CDB or parameter-list field (and bit)
/// that failed validation.
pub fn invalid_field(
    command_data: bool,
    bit_pointer_valid: bool,
    bit_pointer: u8,
    field_pointer: u16,
) -> SenseKeySpecific {
    let mut first = 0x80; // SKSV
    if command_data {
        first |= 0x40;
    }
    if bit_pointer_valid {
        first |= 0x08 | (bit_pointer & 0x07);
    }

    SenseKeySpecific {
        bytes: [first, (field_pointer >> 8) as u8, field_pointer as u8],
    }
}

/// Progress indication, 0..=65535 spanning 0..100%.
pub fn progress(value: u16) -> SenseKeySpecific {
    SenseKeySpecific {
        bytes: [0x80, (value >> 8) as u8, value as u8],
    }
}

/// Descriptors a caller may attach to a synthesized sense buffer. In fixed
/// format each is flattened into the corresponding fixed field.
#[derive(Clone, Copy, Debug)]
pub enum SenseDescriptor {
    Information(u64),
    CommandSpecific(u64),
    SenseKeySpecific(SenseKeySpecific),
    FieldReplaceableUnit(u8),
    BlockCommands { incorrect_length: bool },
    AtaStatusReturn { rtfrs: AtaReturnTfrs, extend: bool },
}

/// Assembles a sense buffer from an explicit triple. Returns the number of
/// bytes written; the buffer is always valid even when truncated by a short
/// `out`.
pub fn from_triple(
    sense_key: u8,
    additional_code: u8,
    qualifier: u8,
    descriptors: &[SenseDescriptor],
    format: SenseFormat,
    out: &mut [u8],
) -> usize {
    match format {
        SenseFormat::Descriptor => descriptor_format(sense_key, additional_code, qualifier, descriptors, out),
        SenseFormat::Fixed => fixed_format(sense_key, additional_code, qualifier, descriptors, out),
    }
}

fn descriptor_format(
    sense_key: u8,
    additional_code: u8,
    qualifier: u8,
    descriptors: &[SenseDescriptor],
    out: &mut [u8],
) -> usize {
    let mut buffer = Vec::with_capacity(8 + descriptors.len() * 14);
    buffer.extend_from_slice(&[
        RESPONSE_CODE_DESCRIPTOR_CURRENT,
        sense_key & 0x0F,
        additional_code,
        qualifier,
        0,
        0,
        0,
        0,
    ]);

    for descriptor in descriptors {
        match descriptor {
            SenseDescriptor::Information(value) => {
                buffer.extend_from_slice(&[DESCRIPTOR_TYPE_INFORMATION, 0x0A, 0x80, 0]);
                buffer.extend_from_slice(&value.to_be_bytes());
            }
            SenseDescriptor::CommandSpecific(value) => {
                buffer.extend_from_slice(&[DESCRIPTOR_TYPE_COMMAND_SPECIFIC, 0x0A, 0, 0]);
                buffer.extend_from_slice(&value.to_be_bytes());
            }
            SenseDescriptor::SenseKeySpecific(sks) => {
                let descriptor = SenseKeySpecificDescriptor::new()
                    .with_descriptor_type(DESCRIPTOR_TYPE_SENSE_KEY_SPECIFIC)
                    .with_additional_length(0x06)
                    .with_sense_key_specific_valid((sks.bytes[0] >> 7) & 1)
                    .with_command_data((sks.bytes[0] >> 6) & 1)
                    .with_bit_pointer_valid((sks.bytes[0] >> 3) & 1)
                    .with_bit_pointer(sks.bytes[0] & 0x07)
                    .with_field_pointer(u16::from_be_bytes([sks.bytes[1], sks.bytes[2]]));
                buffer.extend_from_slice(&descriptor.bytes);
            }
            SenseDescriptor::FieldReplaceableUnit(code) => {
                buffer.extend_from_slice(&[DESCRIPTOR_TYPE_FRU, 0x02, 0, *code]);
            }
            SenseDescriptor::BlockCommands { incorrect_length } => {
                buffer.extend_from_slice(&[
                    DESCRIPTOR_TYPE_BLOCK_COMMANDS,
                    0x02,
                    0,
                    (*incorrect_length as u8) << 5,
                ]);
            }
            SenseDescriptor::AtaStatusReturn { rtfrs, extend } => {
                buffer.extend_from_slice(&AtaStatusReturnDescriptor::from_rtfrs(rtfrs, *extend).bytes);
            }
        }
    }

    buffer[7] = (buffer.len() - 8).min(u8::MAX as usize) as u8;
    write_out(&buffer, out)
}

fn fixed_format(
    sense_key: u8,
    additional_code: u8,
    qualifier: u8,
    descriptors: &[SenseDescriptor],
    out: &mut [u8],
) -> usize {
    let mut buffer = [0u8; 18];
    buffer[0] = RESPONSE_CODE_FIXED_CURRENT;
    buffer[2] = sense_key & 0x0F;
    buffer[7] = 10;
    buffer[12] = additional_code;
    buffer[13] = qualifier;

    for descriptor in descriptors {
        match descriptor {
            SenseDescriptor::Information(value) => {
                buffer[0] |= 0x80; // VALID
                buffer[3..7].copy_from_slice(&(*value as u32).to_be_bytes());
            }
            SenseDescriptor::CommandSpecific(value) => {
                buffer[8..12].copy_from_slice(&(*value as u32).to_be_bytes());
            }
            SenseDescriptor::SenseKeySpecific(sks) => {
                buffer[15..18].copy_from_slice(&sks.bytes);
            }
            SenseDescriptor::FieldReplaceableUnit(code) => {
                buffer[14] = *code;
            }
            SenseDescriptor::BlockCommands { incorrect_length } => {
                buffer[2] |= (*incorrect_length as u8) << 5;
            }
            SenseDescriptor::AtaStatusReturn { rtfrs, extend } => {
                flatten_ata_status_return(rtfrs, *extend, &mut buffer);
            }
        }
    }

    write_out(&buffer, out)
}

/// The fixed-format "ATA pass-through information available" layout: the
/// registers land in the information and command-specific fields, with the
/// extend and ext-nonzero flags plus the results-log index in byte 8.
fn flatten_ata_status_return(rtfrs: &AtaReturnTfrs, extend: bool, buffer: &mut [u8; 18]) {
    buffer[0] |= 0x80;
    buffer[3] = rtfrs.error;
    buffer[4] = rtfrs.status;
    buffer[5] = rtfrs.device;
    buffer[6] = rtfrs.count;

    let mut flags = 0u8;
    if extend {
        flags |= 0x80;
    }
    if rtfrs.count_ext != 0 {
        flags |= 0x40;
    }
    if rtfrs.lba_low_ext != 0 || rtfrs.lba_mid_ext != 0 || rtfrs.lba_hi_ext != 0 {
        flags |= 0x20;
    }
    buffer[8] = flags;
    buffer[9] = rtfrs.lba_hi;
    buffer[10] = rtfrs.lba_mid;
    buffer[11] = rtfrs.lba_low;
    buffer[12] = asc::ATA_PASSTHROUGH_INFO_AVAILABLE.0;
    buffer[13] = asc::ATA_PASSTHROUGH_INFO_AVAILABLE.1;
}

fn write_out(buffer: &[u8], out: &mut [u8]) -> usize {
    let length = usize::min(buffer.len(), out.len());
    out[..length].copy_from_slice(&buffer[..length]);
    out.iter_mut().skip(length).for_each(|b| *b = 0);
    length
}

/// Maps final RTFRs to a sense triple plus descriptors and writes the
/// buffer. The caller is expected to have taken the ATA sense-data path
/// (REQUEST SENSE DATA EXT) first when the drive offers it.
pub fn from_rtfrs(rtfrs: &AtaReturnTfrs, extend: bool, format: SenseFormat, out: &mut [u8]) -> usize {
    let status = rtfrs.status_flags();
    let error = rtfrs.error_flags();

    let mut descriptors = vec![SenseDescriptor::AtaStatusReturn {
        rtfrs: *rtfrs,
        extend,
    }];

    let (sense_key, (code, qualifier)) = if status.contains(AtaStatus::DEVICE_FAULT) {
        (key::HARDWARE_ERROR, asc::INTERNAL_TARGET_FAILURE)
    } else if status.contains(AtaStatus::ERROR) && error.contains(AtaError::UNCORRECTABLE) {
        descriptors.push(SenseDescriptor::Information(rtfrs.lba48()));
        (key::MEDIUM_ERROR, asc::UNRECOVERED_READ_ERROR)
    } else if error.contains(AtaError::ID_NOT_FOUND) {
        (key::ILLEGAL_REQUEST, asc::LBA_OUT_OF_RANGE)
    } else if error.contains(AtaError::INTERFACE_CRC) {
        (key::ABORTED_COMMAND, asc::INFORMATION_UNIT_CRC_ERROR)
    } else if error.contains(AtaError::ABORT) {
        (key::ABORTED_COMMAND, asc::NO_ADDITIONAL_SENSE)
    } else if status.contains(AtaStatus::ERROR) {
        (key::ABORTED_COMMAND, asc::NO_ADDITIONAL_SENSE)
    } else {
        (key::NO_SENSE, asc::NO_ADDITIONAL_SENSE)
    };

    from_triple(sense_key, code, qualifier, &descriptors, format, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sense;

    #[test]
    fn invalid_field_descriptor_points_at_bit() {
        let sks = invalid_field(true, true, 5, 0x0102);
        assert_eq!(sks.bytes, [0x80 | 0x40 | 0x08 | 0x05, 0x01, 0x02]);

        let mut out = [0u8; 32];
        let length = from_triple(
            key::ILLEGAL_REQUEST,
            asc::INVALID_FIELD_IN_CDB.0,
            asc::INVALID_FIELD_IN_CDB.1,
            &[SenseDescriptor::SenseKeySpecific(sks)],
            SenseFormat::Descriptor,
            &mut out,
        );

        assert_eq!(length, 16);
        assert_eq!(out[0], 0x72);
        assert_eq!(out[1], key::ILLEGAL_REQUEST);
        assert_eq!(out[2], 0x24);
        assert_eq!(out[7], 8);
        assert_eq!(out[8], sense::DESCRIPTOR_TYPE_SENSE_KEY_SPECIFIC);
        assert_eq!(out[12], 0xCD);
        assert_eq!(&out[13..15], &[0x01, 0x02]);
    }

    #[test]
    fn fixed_format_flattens_sks() {
        let mut out = [0u8; 32];
        let length = from_triple(
            key::ILLEGAL_REQUEST,
            asc::INVALID_FIELD_IN_CDB.0,
            asc::INVALID_FIELD_IN_CDB.1,
            &[SenseDescriptor::SenseKeySpecific(invalid_field(
                true, false, 0, 7,
            ))],
            SenseFormat::Fixed,
            &mut out,
        );

        assert_eq!(length, 18);
        assert_eq!(out[0], 0x70);
        assert_eq!(out[2], key::ILLEGAL_REQUEST);
        assert_eq!(out[12], 0x24);
        assert_eq!(out[15], 0xC0);
        assert_eq!(out[17], 7);
    }

    #[test]
    fn uncorrectable_error_reports_medium_error_with_lba() {
        let rtfrs = AtaReturnTfrs {
            status: (AtaStatus::READY | AtaStatus::ERROR).bits(),
            error: AtaError::UNCORRECTABLE.bits(),
            lba_low: 0x44,
            lba_mid: 0x33,
            lba_hi: 0x22,
            lba_low_ext: 0x11,
            ..Default::default()
        };

        let mut out = [0u8; 64];
        from_rtfrs(&rtfrs, true, SenseFormat::Descriptor, &mut out);

        let parsed = sense::parse(&out).unwrap();
        assert_eq!(parsed.triple(), (key::MEDIUM_ERROR, 0x11, 0x00));

        let info = sense::find_descriptor(&out, sense::DESCRIPTOR_TYPE_INFORMATION).unwrap();
        assert_eq!(
            u64::from_be_bytes(info[4..12].try_into().unwrap()),
            0x0000_0011_2233_44
        );

        let ata = sense::find_descriptor(&out, sense::DESCRIPTOR_TYPE_ATA_STATUS_RETURN).unwrap();
        assert_eq!(ata[13], rtfrs.status);
    }

    #[test]
    fn device_fault_wins_over_error_bits() {
        let rtfrs = AtaReturnTfrs {
            status: (AtaStatus::READY | AtaStatus::DEVICE_FAULT | AtaStatus::ERROR).bits(),
            error: AtaError::ABORT.bits(),
            ..Default::default()
        };

        let mut out = [0u8; 64];
        from_rtfrs(&rtfrs, false, SenseFormat::Fixed, &mut out);

        let parsed = sense::parse(&out).unwrap();
        assert_eq!(parsed.triple(), (key::HARDWARE_ERROR, 0x44, 0x00));
    }

    #[test]
    fn fixed_ata_flattening_sets_ext_flags() {
        let rtfrs = AtaReturnTfrs {
            status: 0x50,
            count_ext: 0x01,
            lba_mid_ext: 0x02,
            ..Default::default()
        };

        let mut out = [0u8; 32];
        from_triple(
            key::NO_SENSE,
            0,
            0,
            &[SenseDescriptor::AtaStatusReturn {
                rtfrs,
                extend: true,
            }],
            SenseFormat::Fixed,
            &mut out,
        );

        assert_eq!(out[8] & 0xE0, 0xE0);
        assert_eq!(out[12], 0x00);
        assert_eq!(out[13], 0x1D);
    }
}
