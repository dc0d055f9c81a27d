//! WRITE SAME 10/16. Three rungs, best first: ZERO EXT for an
//! all-zero pattern, SCT Write Same when the drive carries it, and a plain
//! write loop replicating the pattern as the last resort.

use crate::{
    ata::{
        ops::{self, opcode},
        tfr::{AtaProtocol, TransferBlockKind, TransferLengthLocation},
        AtaCommand,
    },
    device::SatDevice,
    error::Completion,
    translator::{
        check_reserved_fields, ensure_identify, good_sense, invalid_field, issue_and_sense,
        scsi_op, sense_from_completion,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

/// SCT action code 2 (write same), function 0101h (repeat pattern).
const SCT_ACTION_WRITE_SAME: u16 = 0x0002;
const SCT_FUNCTION_REPEAT_PATTERN: u16 = 0x0101;

/// Sectors per fallback write, bounding the replication buffer.
const FALLBACK_CHUNK_SECTORS: u64 = 128;

pub(crate) fn translate<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    let (lba, blocks, unmap_bit, ndob) = match ctx.cdb[0] {
        scsi_op::WRITE_SAME_10 => {
            check_reserved_fields(device, ctx, &[(1, 0xF7), (6, 0xC0)])?;
            (
                u64::from(u32::from_be_bytes(ctx.cdb[2..6].try_into().unwrap())),
                u64::from(u16::from_be_bytes(ctx.cdb[7..9].try_into().unwrap())),
                ctx.cdb[1] & 0x08 != 0,
                false,
            )
        }
        _ => {
            check_reserved_fields(device, ctx, &[(1, 0xF6)])?;
            (
                u64::from_be_bytes(ctx.cdb[2..10].try_into().unwrap()),
                u64::from(u32::from_be_bytes(ctx.cdb[10..14].try_into().unwrap())),
                ctx.cdb[1] & 0x08 != 0,
                ctx.cdb[1] & 0x01 != 0,
            )
        }
    };

    if unmap_bit {
        // UNMAP + pattern cannot be translated faithfully; the initiator
        // has the UNMAP command for deallocation.
        return Err(invalid_field(device, ctx, 1, Some(3)));
    }

    ensure_identify(device)?;

    // Zero blocks means "to the end of the medium".
    let blocks = if blocks == 0 {
        device.max_lba().saturating_sub(lba)
    } else {
        blocks
    };

    let block_size = device.logical_block_size() as usize;
    let pattern_is_zero = ndob || ctx.data.iter().take(block_size).all(|&b| b == 0);
    let (zero_ext, sct) = {
        let id = device.identify().expect("identify cached");
        (
            device.flags.zero_ext_supported && id.supports_lba48(),
            device.flags.sct_write_same_supported,
        )
    };

    if pattern_is_zero && zero_ext {
        return zero_ext_loop(device, ctx, lba, blocks);
    }

    if sct {
        return sct_write_same(device, ctx, lba, blocks);
    }

    fallback_write_loop(device, ctx, lba, blocks)
}

fn zero_ext_loop<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    lba: u64,
    blocks: u64,
) -> Result<Completion> {
    let mut remaining = blocks;
    let mut next = lba;
    while remaining > 0 {
        let this_count = remaining.min(65536);
        // 65536 aliases to a zero count register.
        let mut command = ops::zeros_ext(next, this_count as u16, false);
        let completion = device.issue_ata(&mut command, &mut [])?;
        if !completion.is_success() {
            sense_from_completion(device, ctx, &command, completion);
            return Ok(completion);
        }
        next += this_count;
        remaining -= this_count;
    }

    good_sense(device, ctx);
    Ok(Completion::Success)
}

fn sct_write_same<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    lba: u64,
    blocks: u64,
) -> Result<Completion> {
    let mut pattern = [0u8; 4];
    let available = usize::min(ctx.data.len(), 4);
    pattern[..available].copy_from_slice(&ctx.data[..available]);

    let mut key = [0u8; 512];
    key[0..2].copy_from_slice(&SCT_ACTION_WRITE_SAME.to_le_bytes());
    key[2..4].copy_from_slice(&SCT_FUNCTION_REPEAT_PATTERN.to_le_bytes());
    key[4..12].copy_from_slice(&lba.to_le_bytes());
    key[12..20].copy_from_slice(&blocks.to_le_bytes());
    key[20..24].copy_from_slice(&pattern);

    let mut command = ops::sct_command(device.flags.gpl_supported);
    issue_and_sense(device, ctx, &mut command, &mut key)
}

fn fallback_write_loop<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    lba: u64,
    blocks: u64,
) -> Result<Completion> {
    let block_size = device.logical_block_size() as usize;
    let use_48bit = device
        .identify()
        .map(|id| id.supports_lba48())
        .unwrap_or(false);

    let mut single = vec![0u8; block_size];
    let available = usize::min(ctx.data.len(), block_size);
    single[..available].copy_from_slice(&ctx.data[..available]);

    let mut remaining = blocks;
    let mut next = lba;
    while remaining > 0 {
        let this_count = remaining.min(FALLBACK_CHUNK_SECTORS);
        let mut buffer = Vec::with_capacity(block_size * this_count as usize);
        for _ in 0..this_count {
            buffer.extend_from_slice(&single);
        }

        let mut command = write_command(next, this_count as u16, use_48bit);
        let completion = device.issue_ata(&mut command, &mut buffer)?;
        if !completion.is_success() {
            sense_from_completion(device, ctx, &command, completion);
            return Ok(completion);
        }

        next += this_count;
        remaining -= this_count;
    }

    good_sense(device, ctx);
    Ok(Completion::Success)
}

fn write_command(lba: u64, count: u16, use_48bit: bool) -> AtaCommand {
    if use_48bit {
        AtaCommand::new(AtaProtocol::UdmaOut, opcode::WRITE_DMA_EXT)
            .extended()
            .lba48(lba)
            .count(count)
            .transfer(
                TransferLengthLocation::SectorCount,
                TransferBlockKind::LogicalSectors,
            )
    } else {
        let mut command = AtaCommand::new(AtaProtocol::UdmaOut, opcode::WRITE_DMA)
            .lba28(lba as u32)
            .count(count)
            .transfer(
                TransferLengthLocation::SectorCount,
                TransferBlockKind::LogicalSectors,
            );
        command.tfr.device |= 0x40;
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ata::identify::tests::sample_identify,
        testing::{ScriptedTransport, Step},
        DataDirection,
    };

    fn write_same_16_cdb(lba: u64, blocks: u32, ndob: bool, unmap: bool) -> [u8; 16] {
        let lba = lba.to_be_bytes();
        let blocks = blocks.to_be_bytes();
        let mut cdb = [0u8; 16];
        cdb[0] = 0x93;
        cdb[1] = (ndob as u8) | ((unmap as u8) << 3);
        cdb[2..10].copy_from_slice(&lba);
        cdb[10..14].copy_from_slice(&blocks);
        cdb
    }

    fn ready_device(steps: Vec<Step>) -> SatDevice<ScriptedTransport> {
        let mut device = SatDevice::new(ScriptedTransport::new(steps));
        device.install_identify(sample_identify());
        device
    }

    #[test]
    fn ndob_with_zero_ext_issues_zero_ext() {
        let mut device = ready_device(vec![Step::good(), Step::good()]);
        // 0x11000 blocks: one full-aliased chunk plus a remainder.
        let cdb = write_same_16_cdb(0, 0x11000, true, false);
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::None, &mut [], &mut sense);

        let completion = translate(&mut device, &mut ctx).unwrap();
        assert_eq!(completion, Completion::Success);

        let sent = &device.transport.sent;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0[14], opcode::ZERO_EXT);
        assert_eq!(sent[0].0[6], 0, "65536 aliases to zero");
        assert_eq!(sent[1].0[5], 0x10, "second chunk count 0x1000");
    }

    #[test]
    fn unmap_bit_is_rejected() {
        let mut device = ready_device(vec![]);
        let cdb = write_same_16_cdb(0, 8, false, true);
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::None, &mut [], &mut sense);

        assert!(translate(&mut device, &mut ctx).is_err());
        assert_eq!(ctx.sense[15] & 0x07, 3, "bit pointer at UNMAP");
        assert!(device.transport.sent.is_empty());
    }

    #[test]
    fn patterned_write_same_uses_sct() {
        let mut device = ready_device(vec![Step::good()]);
        let cdb = write_same_16_cdb(0x1000, 64, false, false);
        let mut data = vec![0xA5u8; 512];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::ToDevice, &mut data, &mut sense);

        translate(&mut device, &mut ctx).unwrap();

        let (cdb_sent, _, payload) = &device.transport.sent[0];
        assert_eq!(cdb_sent[14], opcode::WRITE_LOG_EXT);
        assert_eq!(payload[0..2], SCT_ACTION_WRITE_SAME.to_le_bytes());
        assert_eq!(payload[2..4], SCT_FUNCTION_REPEAT_PATTERN.to_le_bytes());
        assert_eq!(&payload[4..6], &[0x00, 0x10], "little-endian LBA");
        assert_eq!(payload[20..24], [0xA5; 4]);
    }
}
