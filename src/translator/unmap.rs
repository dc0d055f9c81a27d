//! UNMAP → ATA DATA SET MANAGEMENT (TRIM). Block descriptors are repacked
//! into little-endian TRIM range entries, ranges longer than one entry can
//! carry are split, and the payload is chunked to the drive's DSM limit.

use crate::{
    ata::ops,
    device::SatDevice,
    error::Completion,
    translator::{
        check_reserved_fields, ensure_identify, feature_not_supported, good_sense,
        invalid_parameter_field, sense_from_completion, ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

const RESERVED_FIELDS: &[ReservedField] = &[
    (1, 0xFE),
    (2, 0xFF),
    (3, 0xFF),
    (4, 0xFF),
    (5, 0xFF),
    (6, 0xE0),
];

/// Entries per 512-byte DSM payload block.
const ENTRIES_PER_BLOCK: usize = 64;
const XL_ENTRIES_PER_BLOCK: usize = 32;

/// Largest range one classic 8-byte TRIM entry can express.
const MAX_RANGE_PER_ENTRY: u64 = 65535;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TrimRange {
    lba: u64,
    blocks: u64,
}

pub(crate) fn translate<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS)?;
    ensure_identify(device)?;

    let supports_trim = device
        .identify()
        .map(|id| id.supports_trim())
        .unwrap_or(false);
    if !supports_trim {
        return Err(feature_not_supported(device, ctx, "DATA SET MANAGEMENT"));
    }

    let parameter_length =
        usize::from(u16::from_be_bytes(ctx.cdb[7..9].try_into().unwrap()));
    if parameter_length == 0 {
        // Nothing to unmap; not an error.
        good_sense(device, ctx);
        return Ok(Completion::Success);
    }
    if parameter_length < 8 || parameter_length > ctx.data.len() {
        return Err(invalid_parameter_field(device, ctx, 0, None));
    }

    let ranges = parse_block_descriptors(device, ctx, parameter_length)?;
    if ranges.is_empty() {
        good_sense(device, ctx);
        return Ok(Completion::Success);
    }

    let use_xl = device.flags.dsm_xl_supported
        && device
            .identify()
            .map(|id| id.word(169) & (1 << 3) != 0)
            .unwrap_or(false);
    let max_blocks = device
        .identify()
        .map(|id| usize::from(id.dsm_max_blocks().max(1)))
        .unwrap_or(1);

    let entries = build_entries(&ranges, use_xl);
    let entries_per_command = max_blocks
        * if use_xl {
            XL_ENTRIES_PER_BLOCK
        } else {
            ENTRIES_PER_BLOCK
        };

    for chunk in entries.chunks(entries_per_command) {
        let entry_size = if use_xl { 16 } else { 8 };
        let payload_blocks = (chunk.len() * entry_size).div_ceil(512);
        let mut payload = vec![0u8; payload_blocks * 512];
        for (index, entry) in chunk.iter().enumerate() {
            payload[index * entry_size..index * entry_size + entry_size]
                .copy_from_slice(&entry[..entry_size]);
        }

        let mut command = ops::data_set_management(payload_blocks as u16, use_xl);
        let completion = device.issue_ata(&mut command, &mut payload)?;
        if !completion.is_success() {
            sense_from_completion(device, ctx, &command, completion);
            return Ok(completion);
        }
    }

    good_sense(device, ctx);
    Ok(Completion::Success)
}

fn parse_block_descriptors<T: Transport>(
    device: &SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    parameter_length: usize,
) -> Result<Vec<TrimRange>> {
    let data = &ctx.data[..parameter_length];
    let descriptor_bytes =
        usize::from(u16::from_be_bytes([data[2], data[3]])).min(parameter_length - 8);

    let mut ranges = Vec::new();
    let mut offset = 8;
    while offset + 16 <= 8 + descriptor_bytes {
        let lba = u64::from_be_bytes(ctx.data[offset..offset + 8].try_into().unwrap());
        let blocks =
            u64::from(u32::from_be_bytes(ctx.data[offset + 8..offset + 12].try_into().unwrap()));

        if blocks > 0 {
            if lba + blocks > device.max_lba() {
                return Err(invalid_parameter_field(device, ctx, offset as u16, None));
            }
            ranges.push(TrimRange { lba, blocks });
        }

        offset += 16;
    }

    Ok(ranges)
}

/// Splits SCSI descriptors into TRIM entries. Classic entries pack the LBA
/// into bits 0..47 and the range into bits 48..63, all little-endian; XL
/// entries spread a 48-bit LBA and 32-bit range over 16 bytes.
fn build_entries(ranges: &[TrimRange], use_xl: bool) -> Vec<[u8; 16]> {
    let mut entries = Vec::new();

    for range in ranges {
        let mut remaining = range.blocks;
        let mut lba = range.lba;
        let per_entry = if use_xl {
            u64::from(u32::MAX)
        } else {
            MAX_RANGE_PER_ENTRY
        };

        while remaining > 0 {
            let this_blocks = remaining.min(per_entry);
            let mut entry = [0u8; 16];
            if use_xl {
                entry[0..6].copy_from_slice(&lba.to_le_bytes()[..6]);
                entry[6..10].copy_from_slice(&(this_blocks as u32).to_le_bytes());
            } else {
                let packed = (lba & 0x0000_FFFF_FFFF_FFFF) | (this_blocks << 48);
                entry[0..8].copy_from_slice(&packed.to_le_bytes());
            }
            entries.push(entry);

            lba += this_blocks;
            remaining -= this_blocks;
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ata::identify::tests::sample_identify,
        testing::{ScriptedTransport, Step},
        DataDirection,
    };

    fn unmap_cdb(parameter_length: u16) -> [u8; 10] {
        let length = parameter_length.to_be_bytes();
        [0x42, 0, 0, 0, 0, 0, 0, length[0], length[1], 0]
    }

    fn unmap_parameters(ranges: &[(u64, u32)]) -> Vec<u8> {
        let descriptor_bytes = ranges.len() * 16;
        let mut data = Vec::with_capacity(8 + descriptor_bytes);
        data.extend_from_slice(&((descriptor_bytes + 6) as u16).to_be_bytes());
        data.extend_from_slice(&(descriptor_bytes as u16).to_be_bytes());
        data.extend_from_slice(&[0; 4]);
        for &(lba, blocks) in ranges {
            data.extend_from_slice(&lba.to_be_bytes());
            data.extend_from_slice(&blocks.to_be_bytes());
            data.extend_from_slice(&[0; 4]);
        }
        data
    }

    fn ready_device(steps: Vec<Step>) -> SatDevice<ScriptedTransport> {
        let mut device = SatDevice::new(ScriptedTransport::new(steps));
        device.install_identify(sample_identify());
        device
    }

    #[test]
    fn long_range_splits_into_two_entries() {
        let mut device = ready_device(vec![Step::good()]);
        let mut data = unmap_parameters(&[(0, 70000)]);
        let cdb = unmap_cdb(data.len() as u16);
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::ToDevice, &mut data, &mut sense);

        let completion = translate(&mut device, &mut ctx).unwrap();
        assert_eq!(completion, Completion::Success);

        let (cdb_sent, _, payload) = &device.transport.sent[0];
        assert_eq!(cdb_sent[14], ops::opcode::DATA_SET_MANAGEMENT);
        assert_eq!(cdb_sent[4], 0x01, "TRIM feature bit");

        let entry0 = u64::from_le_bytes(payload[0..8].try_into().unwrap());
        let entry1 = u64::from_le_bytes(payload[8..16].try_into().unwrap());
        assert_eq!(entry0 & 0x0000_FFFF_FFFF_FFFF, 0, "first entry LBA");
        assert_eq!(entry0 >> 48, 65535, "first entry range");
        assert_eq!(entry1 & 0x0000_FFFF_FFFF_FFFF, 65535, "second entry LBA");
        assert_eq!(entry1 >> 48, 70000 - 65535, "second entry range");
        assert!(payload[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn drive_without_trim_rejects_unmap() {
        let mut raw = sample_identify();
        crate::ata::identify::tests::set_word(&mut raw, 169, 0);
        let mut device = SatDevice::new(ScriptedTransport::default());
        device.install_identify(raw);

        let mut data = unmap_parameters(&[(0, 8)]);
        let cdb = unmap_cdb(data.len() as u16);
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::ToDevice, &mut data, &mut sense);

        assert!(translate(&mut device, &mut ctx).is_err());
        assert!(device.transport.sent.is_empty());
    }

    #[test]
    fn empty_parameter_list_is_a_no_op() {
        let mut device = ready_device(vec![]);
        let cdb = unmap_cdb(0);
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::ToDevice, &mut [], &mut sense);

        let completion = translate(&mut device, &mut ctx).unwrap();
        assert_eq!(completion, Completion::Success);
        assert!(device.transport.sent.is_empty());
    }

    #[test]
    fn range_past_the_end_is_rejected() {
        let mut device = ready_device(vec![]);
        let mut data = unmap_parameters(&[(0x1234_5678, 1)]);
        let cdb = unmap_cdb(data.len() as u16);
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::ToDevice, &mut data, &mut sense);

        assert!(translate(&mut device, &mut ctx).is_err());
        assert_eq!(ctx.sense[12], 0x26, "invalid field in parameter list");
    }
}
