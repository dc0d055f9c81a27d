//! FORMAT UNIT and REASSIGN BLOCKS. ATA has no real format operation, so
//! FORMAT UNIT becomes a zero-fill of the medium; REASSIGN BLOCKS probes
//! each listed LBA and rewrites it to trigger the drive's own reallocation.

use crate::{
    ata::{
        ops::{self, opcode},
        tfr::{AtaProtocol, TransferBlockKind, TransferLengthLocation},
        AtaCommand,
    },
    device::SatDevice,
    error::Completion,
    sense,
    translator::{
        check_reserved_fields, ensure_identify, good_sense, invalid_parameter_field,
        sense_from_completion, set_sense, ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

// FMTDATA is the only byte-1 bit the translation honors; protection,
// LONGLIST, CMPLST and a non-zero defect list format have no ATA shape.
const RESERVED_FIELDS_FORMAT: &[ReservedField] = &[(1, 0xEF), (2, 0xFF), (3, 0xFF), (4, 0xFF)];
const RESERVED_FIELDS_REASSIGN: &[ReservedField] =
    &[(1, 0xFC), (2, 0xFF), (3, 0xFF), (4, 0xFF), (5, 0xFF)];

/// Sectors per write while zero-filling.
const FORMAT_CHUNK_SECTORS: u64 = 65536;

pub(crate) fn format_unit<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS_FORMAT)?;

    let fmtdata = ctx.cdb[1] & 0x10 != 0;
    if fmtdata {
        // Minimal parameter header only; an initialization pattern cannot
        // be honored without SCT write same, and defect lists never can.
        if ctx.data.len() < 4 {
            return Err(invalid_parameter_field(device, ctx, 0, None));
        }
        let ip = ctx.data[1] & 0x08 != 0;
        let defect_list_length = u16::from_be_bytes([ctx.data[2], ctx.data[3]]);
        if ip || defect_list_length != 0 {
            return Err(invalid_parameter_field(device, ctx, 1, Some(3)));
        }
    }

    ensure_identify(device)?;

    let total = device.max_lba();
    let (zero_ext, use_48bit) = {
        let id = device.identify().expect("identify cached");
        (device.flags.zero_ext_supported, id.supports_lba48())
    };

    let chunk = if use_48bit { FORMAT_CHUNK_SECTORS } else { 256 };
    let mut next = 0u64;
    while next < total {
        let this_count = (total - next).min(chunk);
        let mut command = if zero_ext {
            ops::zeros_ext(next, this_count as u16, false)
        } else {
            zero_write_command(device, next, this_count, use_48bit)
        };

        let completion = if zero_ext {
            device.issue_ata(&mut command, &mut [])?
        } else {
            let block_size = device.logical_block_size() as usize;
            let mut zeros = vec![0u8; block_size * this_count as usize];
            device.issue_ata(&mut command, &mut zeros)?
        };

        if !completion.is_success() {
            sense_from_completion(device, ctx, &command, completion);
            return Ok(completion);
        }

        next += this_count;
    }

    good_sense(device, ctx);
    Ok(Completion::Success)
}

fn zero_write_command<T: Transport>(
    device: &SatDevice<T>,
    lba: u64,
    count: u64,
    use_48bit: bool,
) -> AtaCommand {
    let dma = device
        .identify()
        .map(|id| id.supports_dma())
        .unwrap_or(false);

    let (protocol, write_opcode) = if dma {
        (
            AtaProtocol::UdmaOut,
            if use_48bit {
                opcode::WRITE_DMA_EXT
            } else {
                opcode::WRITE_DMA
            },
        )
    } else {
        (
            AtaProtocol::PioOut,
            if use_48bit {
                opcode::WRITE_SECTORS_EXT
            } else {
                opcode::WRITE_SECTORS
            },
        )
    };

    let mut command = AtaCommand::new(protocol, write_opcode)
        .count(count as u16)
        .transfer(
            TransferLengthLocation::SectorCount,
            TransferBlockKind::LogicalSectors,
        );
    if use_48bit {
        command = command.extended().lba48(lba);
    } else {
        command = command.lba28(lba as u32);
        command.tfr.device |= 0x40;
    }
    command
}

pub(crate) fn reassign_blocks<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS_REASSIGN)?;
    ensure_identify(device)?;

    let long_lba = ctx.cdb[1] & 0x02 != 0;
    let long_list = ctx.cdb[1] & 0x01 != 0;

    if ctx.data.len() < 4 {
        return Err(invalid_parameter_field(device, ctx, 0, None));
    }

    let list_length = if long_list {
        u32::from_be_bytes(ctx.data[0..4].try_into().unwrap()) as usize
    } else {
        usize::from(u16::from_be_bytes([ctx.data[2], ctx.data[3]]))
    };
    let entry_size = if long_lba { 8 } else { 4 };
    if list_length % entry_size != 0 || 4 + list_length > ctx.data.len() {
        return Err(invalid_parameter_field(device, ctx, 2, None));
    }

    let use_48bit = device
        .identify()
        .map(|id| id.supports_lba48())
        .unwrap_or(false);
    let block_size = device.logical_block_size() as usize;

    let lbas: Vec<u64> = ctx.data[4..4 + list_length]
        .chunks(entry_size)
        .map(|chunk| {
            if long_lba {
                u64::from_be_bytes(chunk.try_into().unwrap())
            } else {
                u64::from(u32::from_be_bytes(chunk.try_into().unwrap()))
            }
        })
        .collect();

    for lba in lbas {
        if lba >= device.max_lba() {
            set_sense(
                device,
                ctx,
                sense::key::ILLEGAL_REQUEST,
                sense::asc::LBA_OUT_OF_RANGE,
            );
            return Err(crate::Error::BadParameter(format!(
                "defect LBA {lba:#X} exceeds the medium"
            )));
        }

        // Rewriting the block is what makes the drive reallocate it; a
        // verify first skips blocks that are actually fine.
        let mut verify = verify_one(lba, use_48bit);
        let verify_result = device.issue_ata(&mut verify, &mut [])?;
        if verify_result.is_success() {
            continue;
        }

        let mut zeros = vec![0u8; block_size];
        let mut write = zero_write_command(device, lba, 1, use_48bit);
        let completion = device.issue_ata(&mut write, &mut zeros)?;
        if !completion.is_success() {
            sense_from_completion(device, ctx, &write, completion);
            return Ok(completion);
        }
    }

    good_sense(device, ctx);
    Ok(Completion::Success)
}

fn verify_one(lba: u64, use_48bit: bool) -> AtaCommand {
    if use_48bit {
        AtaCommand::new(AtaProtocol::NoData, opcode::READ_VERIFY_SECTORS_EXT)
            .extended()
            .lba48(lba)
            .count(1)
    } else {
        let mut command = AtaCommand::new(AtaProtocol::NoData, opcode::READ_VERIFY_SECTORS)
            .lba28(lba as u32)
            .count(1);
        command.tfr.device |= 0x40;
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ata::{identify::tests::{sample_identify, set_word}, AtaError, AtaStatus},
        sense::{synthesize, SenseFormat},
        testing::{ScriptedTransport, Step},
        DataDirection,
    };

    fn small_device(steps: Vec<Step>) -> SatDevice<ScriptedTransport> {
        let mut raw = sample_identify();
        // 0x20000 sectors keeps the zero-fill loop at two commands.
        set_word(&mut raw, 100, 0x0000);
        set_word(&mut raw, 101, 0x0002);
        let mut device = SatDevice::new(ScriptedTransport::new(steps));
        device.install_identify(raw);
        device
    }

    #[test]
    fn format_unit_zero_fills_with_zeros_ext() {
        let mut device = small_device(vec![Step::good(), Step::good()]);
        let cdb = [0x04, 0, 0, 0, 0, 0];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::None, &mut [], &mut sense);

        let completion = format_unit(&mut device, &mut ctx).unwrap();
        assert_eq!(completion, Completion::Success);

        let sent = &device.transport.sent;
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(cdb, _, _)| cdb[14] == opcode::ZERO_EXT));
    }

    #[test]
    fn format_unit_rejects_initialization_pattern() {
        let mut device = small_device(vec![]);
        let cdb = [0x04, 0x10, 0, 0, 0, 0];
        let mut data = [0u8, 0x08, 0, 0];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::ToDevice, &mut data, &mut sense);

        assert!(format_unit(&mut device, &mut ctx).is_err());
        assert_eq!(ctx.sense[12], 0x26);
    }

    #[test]
    fn reassign_rewrites_only_failing_blocks() {
        let bad = crate::ata::AtaReturnTfrs {
            status: (AtaStatus::READY | AtaStatus::ERROR).bits(),
            error: AtaError::UNCORRECTABLE.bits(),
            ..Default::default()
        };
        let mut bad_sense = vec![0u8; 32];
        synthesize::from_rtfrs(&bad, true, SenseFormat::Descriptor, &mut bad_sense);

        let mut device = small_device(vec![
            Step::good(),             // verify LBA 5: fine
            Step::good().sense(&bad_sense), // verify LBA 9: uncorrectable
            Step::good(),             // rewrite LBA 9
        ]);

        let cdb = [0x07, 0, 0, 0, 0, 0];
        let mut data = [0u8; 12];
        data[3] = 8;
        data[4..8].copy_from_slice(&5u32.to_be_bytes());
        data[8..12].copy_from_slice(&9u32.to_be_bytes());
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::ToDevice, &mut data, &mut sense);

        let completion = reassign_blocks(&mut device, &mut ctx).unwrap();
        assert_eq!(completion, Completion::Success);

        let opcodes: Vec<u8> = device
            .transport
            .sent
            .iter()
            .map(|(cdb, _, _)| cdb[14])
            .collect();
        assert_eq!(
            opcodes,
            vec![
                opcode::READ_VERIFY_SECTORS_EXT,
                opcode::READ_VERIFY_SECTORS_EXT,
                opcode::WRITE_DMA_EXT,
            ]
        );
    }
}
