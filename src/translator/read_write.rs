//! READ, WRITE, VERIFY, WRITE AND VERIFY and WRITE LONG: decomposed to a
//! single 28- or 48-bit ATA command each, PIO or DMA per the drive's
//! capabilities, with FUA emulated through READ VERIFY where ATA has no
//! native equivalent.

use crate::{
    ata::{
        ops::opcode,
        tfr::{AtaProtocol, TransferBlockKind, TransferLengthLocation},
        AtaCommand,
    },
    device::SatDevice,
    error::Completion,
    sense,
    translator::{
        check_reserved_fields, ensure_identify, good_sense, invalid_field, issue_and_sense,
        issue_with_ctx_data, scsi_op, sense_from_completion, set_sense, ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Error, Result,
};

const ATA_READ_OPCODES: RwOpcodes = RwOpcodes {
    pio28: opcode::READ_SECTORS,
    pio48: opcode::READ_SECTORS_EXT,
    dma28: opcode::READ_DMA,
    dma48: opcode::READ_DMA_EXT,
};

const ATA_WRITE_OPCODES: RwOpcodes = RwOpcodes {
    pio28: opcode::WRITE_SECTORS,
    pio48: opcode::WRITE_SECTORS_EXT,
    dma28: opcode::WRITE_DMA,
    dma48: opcode::WRITE_DMA_EXT,
};

struct RwOpcodes {
    pio28: u8,
    pio48: u8,
    dma28: u8,
    dma48: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RwKind {
    Read,
    Write,
    Verify,
    WriteAndVerify,
}

#[derive(Clone, Copy, Debug)]
struct RwRequest {
    kind: RwKind,
    lba: u64,
    transfer_length: u32,
    fua: bool,
    /// Field pointer of the transfer length for error reporting.
    length_field: u16,
    bytchk: u8,
}

pub(crate) fn translate<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    let request = parse_cdb(device, ctx)?;
    ensure_identify(device)?;

    if request.kind == RwKind::Verify && request.bytchk != 0 {
        // BYTCHK compare modes cannot be expressed as an ATA verify.
        return Err(invalid_field(device, ctx, 1, Some(2)));
    }

    if request.transfer_length == 0 {
        // Nothing to transfer; not an error.
        good_sense(device, ctx);
        return Ok(Completion::Success);
    }

    if request.transfer_length > 65536 {
        return Err(invalid_field(device, ctx, request.length_field, None));
    }

    let (use_48bit, supports_fua_write) = {
        let id = device.identify().expect("identify cached");
        (id.supports_lba48(), id.supports_write_dma_fua())
    };
    let end = request.lba + u64::from(request.transfer_length);

    if end > device.max_lba() {
        set_sense(device, ctx, sense::key::ILLEGAL_REQUEST, sense::asc::LBA_OUT_OF_RANGE);
        return Err(Error::BadParameter(format!(
            "LBA range {:#X}+{} exceeds the medium",
            request.lba, request.transfer_length
        )));
    }

    if !use_48bit && (end > 1 << 28 || request.transfer_length > 256) {
        return Err(invalid_field(device, ctx, request.length_field, None));
    }

    match request.kind {
        RwKind::Read => {
            if request.fua {
                // No ATA read-FUA exists: force the media access with a
                // READ VERIFY of the same range first.
                let mut verify = verify_command(&request, use_48bit);
                let completion = device.issue_ata(&mut verify, &mut [])?;
                if !completion.is_success() {
                    sense_from_completion(device, ctx, &verify, completion);
                    return Ok(completion);
                }
            }
            let mut command = data_command(device, &request, use_48bit, &ATA_READ_OPCODES);
            issue_with_ctx_data(device, ctx, &mut command)
        }
        RwKind::Write => {
            let fua_native = request.fua && supports_fua_write && use_48bit;
            let mut command = if fua_native {
                write_dma_fua_command(&request)
            } else {
                data_command(device, &request, use_48bit, &ATA_WRITE_OPCODES)
            };

            let completion = device.issue_ata(&mut command, ctx.data)?;
            if !completion.is_success() || fua_native || !request.fua {
                sense_from_completion(device, ctx, &command, completion);
                return Ok(completion);
            }

            // FUA without the DMA FUA variant: verify forces the flush.
            let mut verify = verify_command(&request, use_48bit);
            issue_and_sense(device, ctx, &mut verify, &mut [])
        }
        RwKind::Verify => {
            let mut command = verify_command(&request, use_48bit);
            issue_and_sense(device, ctx, &mut command, &mut [])
        }
        RwKind::WriteAndVerify => {
            let mut command = data_command(device, &request, use_48bit, &ATA_WRITE_OPCODES);
            let completion = device.issue_ata(&mut command, ctx.data)?;
            if !completion.is_success() {
                sense_from_completion(device, ctx, &command, completion);
                return Ok(completion);
            }

            let mut verify = verify_command(&request, use_48bit);
            issue_and_sense(device, ctx, &mut verify, &mut [])
        }
    }
}

fn parse_cdb<T: Transport>(device: &SatDevice<T>, ctx: &mut ScsiIoCtx) -> Result<RwRequest> {
    let cdb = ctx.cdb;
    let op = cdb[0];

    let kind = match op {
        scsi_op::READ_6 | scsi_op::READ_10 | scsi_op::READ_12 | scsi_op::READ_16 => RwKind::Read,
        scsi_op::WRITE_6 | scsi_op::WRITE_10 | scsi_op::WRITE_12 | scsi_op::WRITE_16 => {
            RwKind::Write
        }
        scsi_op::VERIFY_10 | scsi_op::VERIFY_12 | scsi_op::VERIFY_16 => RwKind::Verify,
        _ => RwKind::WriteAndVerify,
    };

    Ok(match op {
        scsi_op::READ_6 | scsi_op::WRITE_6 => {
            if cdb.len() < 6 {
                return Err(Error::BadParameter("short CDB".to_owned()));
            }
            check_reserved_fields(device, ctx, &[(1, 0xE0)])?;
            let lba = u64::from(ctx.cdb[1] & 0x1F) << 16
                | u64::from(ctx.cdb[2]) << 8
                | u64::from(ctx.cdb[3]);
            // A zero transfer length means 256 blocks for the 6-byte CDBs.
            let transfer_length = match ctx.cdb[4] {
                0 => 256,
                n => u32::from(n),
            };
            RwRequest {
                kind,
                lba,
                transfer_length,
                fua: false,
                length_field: 4,
                bytchk: 0,
            }
        }
        scsi_op::READ_10
        | scsi_op::WRITE_10
        | scsi_op::WRITE_AND_VERIFY_10
        | scsi_op::VERIFY_10 => {
            if cdb.len() < 10 {
                return Err(Error::BadParameter("short CDB".to_owned()));
            }
            check_reserved_fields(device, ctx, &[(1, 0x01), (6, 0xC0)])?;
            RwRequest {
                kind,
                lba: u64::from(u32::from_be_bytes(ctx.cdb[2..6].try_into().unwrap())),
                transfer_length: u32::from(u16::from_be_bytes(
                    ctx.cdb[7..9].try_into().unwrap(),
                )),
                fua: ctx.cdb[1] & 0x08 != 0,
                length_field: 7,
                bytchk: (ctx.cdb[1] >> 1) & 0x03,
            }
        }
        scsi_op::READ_12
        | scsi_op::WRITE_12
        | scsi_op::WRITE_AND_VERIFY_12
        | scsi_op::VERIFY_12 => {
            if cdb.len() < 12 {
                return Err(Error::BadParameter("short CDB".to_owned()));
            }
            check_reserved_fields(device, ctx, &[(1, 0x01), (10, 0xC0)])?;
            RwRequest {
                kind,
                lba: u64::from(u32::from_be_bytes(ctx.cdb[2..6].try_into().unwrap())),
                transfer_length: u32::from_be_bytes(ctx.cdb[6..10].try_into().unwrap()),
                fua: ctx.cdb[1] & 0x08 != 0,
                length_field: 6,
                bytchk: (ctx.cdb[1] >> 1) & 0x03,
            }
        }
        _ => {
            if cdb.len() < 16 {
                return Err(Error::BadParameter("short CDB".to_owned()));
            }
            check_reserved_fields(device, ctx, &[(1, 0x01), (14, 0xC0)])?;
            RwRequest {
                kind,
                lba: u64::from_be_bytes(ctx.cdb[2..10].try_into().unwrap()),
                transfer_length: u32::from_be_bytes(ctx.cdb[10..14].try_into().unwrap()),
                fua: ctx.cdb[1] & 0x08 != 0,
                length_field: 10,
                bytchk: (ctx.cdb[1] >> 1) & 0x03,
            }
        }
    })
}

fn sector_count(request: &RwRequest, use_48bit: bool) -> u16 {
    if use_48bit {
        // 65536 aliases to zero in the 16-bit count register.
        request.transfer_length as u16
    } else {
        // 256 aliases to zero in the 8-bit count register.
        (request.transfer_length & 0xFF) as u16
    }
}

fn data_command<T: Transport>(
    device: &SatDevice<T>,
    request: &RwRequest,
    use_48bit: bool,
    opcodes: &RwOpcodes,
) -> AtaCommand {
    let dma = device
        .identify()
        .map(|id| id.supports_dma())
        .unwrap_or(false);
    let writing = matches!(request.kind, RwKind::Write | RwKind::WriteAndVerify);

    let (protocol, command) = match (dma, use_48bit) {
        (true, true) => (
            if writing {
                AtaProtocol::UdmaOut
            } else {
                AtaProtocol::UdmaIn
            },
            opcodes.dma48,
        ),
        (true, false) => (
            if writing {
                AtaProtocol::UdmaOut
            } else {
                AtaProtocol::UdmaIn
            },
            opcodes.dma28,
        ),
        (false, true) => (
            if writing {
                AtaProtocol::PioOut
            } else {
                AtaProtocol::PioIn
            },
            opcodes.pio48,
        ),
        (false, false) => (
            if writing {
                AtaProtocol::PioOut
            } else {
                AtaProtocol::PioIn
            },
            opcodes.pio28,
        ),
    };

    let mut ata = AtaCommand::new(protocol, command)
        .count(sector_count(request, use_48bit))
        .transfer(
            TransferLengthLocation::SectorCount,
            TransferBlockKind::LogicalSectors,
        );
    if use_48bit {
        ata = ata.extended().lba48(request.lba);
    } else {
        ata = ata.lba28(request.lba as u32);
        ata.tfr.device |= 0x40; // LBA mode
    }
    ata
}

fn verify_command(request: &RwRequest, use_48bit: bool) -> AtaCommand {
    let mut ata = if use_48bit {
        AtaCommand::new(AtaProtocol::NoData, opcode::READ_VERIFY_SECTORS_EXT)
            .extended()
            .lba48(request.lba)
    } else {
        let mut cmd =
            AtaCommand::new(AtaProtocol::NoData, opcode::READ_VERIFY_SECTORS).lba28(request.lba as u32);
        cmd.tfr.device |= 0x40;
        cmd
    };
    ata = ata.count(sector_count(request, use_48bit));
    ata
}

fn write_dma_fua_command(request: &RwRequest) -> AtaCommand {
    AtaCommand::new(AtaProtocol::UdmaOut, opcode::WRITE_DMA_FUA_EXT)
        .extended()
        .lba48(request.lba)
        .count(sector_count(request, true))
        .transfer(
            TransferLengthLocation::SectorCount,
            TransferBlockKind::LogicalSectors,
        )
}

/// WRITE LONG maps to WRITE UNCORRECTABLE EXT: the only faithful way a SATL
/// can plant a bad block.
pub(crate) fn write_long<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    ensure_identify(device)?;

    let (wr_uncor, pblock, lba) = match ctx.cdb[0] {
        scsi_op::WRITE_LONG_10 => (
            ctx.cdb[1] & 0x40 != 0,
            ctx.cdb[1] & 0x20 != 0,
            u64::from(u32::from_be_bytes(ctx.cdb[2..6].try_into().unwrap())),
        ),
        _ => (
            ctx.cdb[1] & 0x40 != 0,
            ctx.cdb[1] & 0x20 != 0,
            u64::from_be_bytes(ctx.cdb[2..10].try_into().unwrap()),
        ),
    };

    if !wr_uncor {
        // Transferring raw long-sector data is not translatable.
        return Err(invalid_field(device, ctx, 1, Some(6)));
    }

    let id = device.identify().expect("identify cached");
    if !id.supports_write_uncorrectable() {
        return Err(crate::translator::feature_not_supported(
            device,
            ctx,
            "WRITE UNCORRECTABLE EXT",
        ));
    }

    // PBLOCK covers the whole physical sector: pseudo-uncorrectable with
    // logging. Without it, flag the single logical block.
    let mut command = crate::ata::ops::write_uncorrectable(!pblock, lba, 1);
    issue_and_sense(device, ctx, &mut command, &mut [])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ata::identify::tests::{sample_identify, set_word},
        testing::{ScriptedTransport, Step},
        Completion, DataDirection,
    };

    fn ready_device(steps: Vec<Step>) -> SatDevice<ScriptedTransport> {
        let mut device = SatDevice::new(ScriptedTransport::new(steps));
        device.install_identify(sample_identify());
        device
    }

    fn read10_cdb(lba: u32, length: u16, fua: bool) -> [u8; 10] {
        let lba = lba.to_be_bytes();
        let length = length.to_be_bytes();
        [
            0x28,
            if fua { 0x08 } else { 0 },
            lba[0],
            lba[1],
            lba[2],
            lba[3],
            0,
            length[0],
            length[1],
            0,
        ]
    }

    #[test]
    fn zero_length_read_is_a_no_op() {
        let mut device = ready_device(vec![]);
        let cdb = read10_cdb(0x1234, 0, false);
        let mut data = [0u8; 0];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense);

        let completion = translate(&mut device, &mut ctx).unwrap();
        assert_eq!(completion, Completion::Success);
        assert!(device.transport.sent.is_empty(), "no I/O performed");
        assert_eq!(ctx.sense[2] & 0x0F, 0, "sense key 0");
    }

    #[test]
    fn read_builds_one_dma_ext_command() {
        let mut device = ready_device(vec![Step::good()]);
        let cdb = read10_cdb(0x1234, 8, false);
        let mut data = [0u8; 8 * 512];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense);

        translate(&mut device, &mut ctx).unwrap();

        assert_eq!(device.transport.sent.len(), 1);
        let (cdb_sent, _, _) = &device.transport.sent[0];
        assert_eq!(cdb_sent[0], 0x85, "16-byte pass-through for 48-bit");
        assert_eq!(cdb_sent[14], opcode::READ_DMA_EXT);
        assert_eq!(cdb_sent[6], 8, "sector count");
        assert_eq!(cdb_sent[8], 0x34, "lba low");
    }

    #[test]
    fn fua_read_verifies_first() {
        // sample identify has no 48-bit FUA read; expect verify + read.
        let mut device = ready_device(vec![Step::good(), Step::good()]);
        let cdb = read10_cdb(0, 1, true);
        let mut data = [0u8; 512];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense);

        let completion = translate(&mut device, &mut ctx).unwrap();
        assert_eq!(completion, Completion::Success);

        let opcodes: Vec<u8> = device
            .transport
            .sent
            .iter()
            .map(|(cdb, _, _)| cdb[14])
            .collect();
        assert_eq!(
            opcodes,
            vec![opcode::READ_VERIFY_SECTORS_EXT, opcode::READ_DMA_EXT]
        );
    }

    #[test]
    fn fua_write_uses_dma_fua_ext() {
        let mut device = ready_device(vec![Step::good()]);
        let lba = 0u32.to_be_bytes();
        let cdb = [
            0x8A, 0x08, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0,
        ];
        let _ = lba;
        let mut data = [0u8; 512];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::ToDevice, &mut data, &mut sense);

        translate(&mut device, &mut ctx).unwrap();

        let (cdb_sent, _, _) = &device.transport.sent[0];
        assert_eq!(cdb_sent[14], opcode::WRITE_DMA_FUA_EXT);
    }

    #[test]
    fn oversized_transfer_points_at_length_field() {
        let mut device = ready_device(vec![]);
        let cdb = [
            0x88, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x00, 0x01, 0x00, 0x01, 0, 0,
        ];
        let mut data = [0u8; 0];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense);

        assert!(translate(&mut device, &mut ctx).is_err());
        assert_eq!(ctx.sense[2] & 0x0F, sense::key::ILLEGAL_REQUEST);
        assert_eq!(ctx.sense[12], 0x24);
        assert_eq!(ctx.sense[17], 10, "field pointer at transfer length");
    }

    #[test]
    fn lba_beyond_capacity_is_out_of_range() {
        let mut device = ready_device(vec![]);
        let cdb = read10_cdb(0xFFFF_FFFF, 1, false);
        let mut data = [0u8; 512];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense);

        assert!(translate(&mut device, &mut ctx).is_err());
        assert_eq!(ctx.sense[12], 0x21);
    }

    #[test]
    fn legacy_28bit_drive_uses_short_commands() {
        let mut raw = sample_identify();
        set_word(&mut raw, 83, 0x0001); // no lba48
        let mut device = SatDevice::new(ScriptedTransport::new(vec![Step::good()]));
        device.install_identify(raw);

        let cdb = read10_cdb(0x100, 4, false);
        let mut data = [0u8; 4 * 512];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense);

        translate(&mut device, &mut ctx).unwrap();

        let (cdb_sent, _, _) = &device.transport.sent[0];
        assert_eq!(cdb_sent[0], 0xA1, "12-byte pass-through for 28-bit");
        assert_eq!(cdb_sent[9], opcode::READ_DMA);
        assert_eq!(cdb_sent[8] & 0x40, 0x40, "LBA mode bit in device register");
    }

    #[test]
    fn write_long_requires_wr_uncor() {
        let mut device = ready_device(vec![]);
        let cdb = [0x3F, 0x00, 0, 0, 0, 1, 0, 0, 0, 0];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::None, &mut [], &mut sense);

        assert!(write_long(&mut device, &mut ctx).is_err());

        let mut device = ready_device(vec![Step::good()]);
        let cdb = [0x3F, 0x40, 0, 0, 0, 1, 0, 0, 0, 0];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::None, &mut [], &mut sense);
        write_long(&mut device, &mut ctx).unwrap();

        let (cdb_sent, _, _) = &device.transport.sent[0];
        assert_eq!(cdb_sent[14], opcode::WRITE_UNCORRECTABLE_EXT);
        assert_eq!(cdb_sent[4], 0xAA, "flagged mode without PBLOCK");
    }
}
