#![allow(dead_code)]

//! Builds the 12-, 16- or 32-byte SCSI ATA PASS-THROUGH CDB for an
//! [`AtaCommand`], and re-parses one for verification.

use modular_bitfield_msb::prelude::*;

use crate::{
    ata::{
        ops::opcode,
        tfr::{
            AtaCommandShape, AtaProtocol, AtaTaskfile, TransferBlockKind, TransferLengthLocation,
        },
        AtaCommand,
    },
    passthrough::hacks::PassthroughHacks,
    DataDirection, Error, Result,
};

pub const OPERATION_CODE_12: u8 = 0xA1;
pub const OPERATION_CODE_16: u8 = 0x85;
pub const OPERATION_CODE_32: u8 = 0x7F;
pub const SERVICE_ACTION_32: u16 = 0x1FF0;
const ADDITIONAL_LENGTH_32: u8 = 0x18;

/// Opcodes for which a zero sector count is not an alias for 256, so the
/// PIO rewrite below must leave them alone.
const FORMAT_TRACK: u8 = 0x50;
const LEGACY_WRITE_SAME: u8 = 0xE9;

/// Read/Write Multiple family; the only commands allowed a multiple count.
const READ_MULTIPLE_EXT: u8 = 0x29;
const WRITE_MULTIPLE_EXT: u8 = 0x39;
const WRITE_MULTIPLE_FUA_EXT: u8 = 0xCE;

#[bitfield]
#[derive(Clone, Copy, Debug)]
struct CommandBuffer12 {
    operation_code: B8,
    multiple_count: B3,
    protocol: B4,
    reserved_0: B1,
    off_line: B2,
    ck_cond: B1,
    t_type: B1,
    t_dir: B1,
    byte_block: B1,
    t_length: B2,
    features: B8,
    count: B8,
    lba_0: B8,
    lba_1: B8,
    lba_2: B8,
    device: B8,
    command: B8,
    reserved_1: B8,
    control: B8,
}

#[bitfield]
#[derive(Clone, Copy, Debug)]
struct CommandBuffer16 {
    operation_code: B8,
    multiple_count: B3,
    protocol: B4,
    extend: B1,
    off_line: B2,
    ck_cond: B1,
    t_type: B1,
    t_dir: B1,
    byte_block: B1,
    t_length: B2,
    features_high: B8,
    features_low: B8,
    count_high: B8,
    count_low: B8,
    lba_3: B8,
    lba_0: B8,
    lba_4: B8,
    lba_1: B8,
    lba_5: B8,
    lba_2: B8,
    device: B8,
    command: B8,
    control: B8,
}

#[bitfield]
#[derive(Clone, Copy, Debug)]
struct CommandBuffer32 {
    operation_code: B8,
    control: B8,
    reserved_0: B40,
    additional_cdb_length: B8,
    service_action: B16,
    reserved_1: B3,
    protocol: B4,
    extend: B1,
    off_line: B2,
    ck_cond: B1,
    t_type: B1,
    t_dir: B1,
    byte_block: B1,
    t_length: B2,
    reserved_2: B16,
    lba_5: B8,
    lba_4: B8,
    lba_3: B8,
    lba_2: B8,
    lba_1: B8,
    lba_0: B8,
    features_high: B8,
    features_low: B8,
    count_high: B8,
    count_low: B8,
    device: B8,
    command: B8,
    reserved_3: B8,
    icc: B8,
    auxiliary_3: B8,
    auxiliary_2: B8,
    auxiliary_1: B8,
    auxiliary_0: B8,
}

/// A built CDB plus its chosen length.
#[derive(Clone, Copy, Debug)]
pub struct BuiltCdb {
    bytes: [u8; 32],
    length: usize,
}

impl BuiltCdb {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.length]
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

struct TransferBits {
    t_length: u8,
    t_dir: u8,
    byte_block: u8,
    t_type: u8,
    ck_cond: u8,
    off_line: u8,
}

pub fn build(command: &AtaCommand, hacks: &PassthroughHacks) -> Result<BuiltCdb> {
    let mut command = command.clone();
    rewrite_zero_sector_count(&mut command);

    let length = select_length(&command, hacks)?;
    let bits = transfer_bits(&command, hacks)?;
    let multiple_count = multiple_count(&command)?;

    if command.protocol.is_reset() {
        return build_reset(&command, length, &bits);
    }

    let tfr = &command.tfr;
    let bytes = match length {
        12 => {
            if command.is_extended() && !tfr.ext_registers_zero() {
                return Err(Error::BadParameter(
                    "48-bit extension registers do not fit a 12-byte CDB".to_owned(),
                ));
            }

            let buffer = CommandBuffer12::new()
                .with_operation_code(OPERATION_CODE_12)
                .with_multiple_count(multiple_count)
                .with_protocol(command.protocol.nibble())
                .with_off_line(bits.off_line)
                .with_ck_cond(bits.ck_cond)
                .with_t_type(bits.t_type)
                .with_t_dir(bits.t_dir)
                .with_byte_block(bits.byte_block)
                .with_t_length(bits.t_length)
                .with_features(tfr.feature)
                .with_count(tfr.count)
                .with_lba_0(tfr.lba_low)
                .with_lba_1(tfr.lba_mid)
                .with_lba_2(tfr.lba_hi)
                .with_device(tfr.device)
                .with_command(tfr.command);
            let mut bytes = [0u8; 32];
            bytes[..12].copy_from_slice(&buffer.bytes);
            bytes
        }
        16 => {
            let buffer = CommandBuffer16::new()
                .with_operation_code(OPERATION_CODE_16)
                .with_multiple_count(multiple_count)
                .with_protocol(command.protocol.nibble())
                .with_extend(command.is_extended() as u8)
                .with_off_line(bits.off_line)
                .with_ck_cond(bits.ck_cond)
                .with_t_type(bits.t_type)
                .with_t_dir(bits.t_dir)
                .with_byte_block(bits.byte_block)
                .with_t_length(bits.t_length)
                .with_features_high(tfr.feature_ext)
                .with_features_low(tfr.feature)
                .with_count_high(tfr.count_ext)
                .with_count_low(tfr.count)
                .with_lba_0(tfr.lba_low)
                .with_lba_1(tfr.lba_mid)
                .with_lba_2(tfr.lba_hi)
                .with_lba_3(tfr.lba_low_ext)
                .with_lba_4(tfr.lba_mid_ext)
                .with_lba_5(tfr.lba_hi_ext)
                .with_device(tfr.device)
                .with_command(tfr.command);
            let mut bytes = [0u8; 32];
            bytes[..16].copy_from_slice(&buffer.bytes);
            bytes
        }
        32 => {
            let buffer = CommandBuffer32::new()
                .with_operation_code(OPERATION_CODE_32)
                .with_additional_cdb_length(ADDITIONAL_LENGTH_32)
                .with_service_action(SERVICE_ACTION_32)
                .with_protocol(command.protocol.nibble())
                .with_extend(command.is_extended() as u8)
                .with_off_line(bits.off_line)
                .with_ck_cond(bits.ck_cond)
                .with_t_type(bits.t_type)
                .with_t_dir(bits.t_dir)
                .with_byte_block(bits.byte_block)
                .with_t_length(bits.t_length)
                .with_lba_0(tfr.lba_low)
                .with_lba_1(tfr.lba_mid)
                .with_lba_2(tfr.lba_hi)
                .with_lba_3(tfr.lba_low_ext)
                .with_lba_4(tfr.lba_mid_ext)
                .with_lba_5(tfr.lba_hi_ext)
                .with_features_high(tfr.feature_ext)
                .with_features_low(tfr.feature)
                .with_count_high(tfr.count_ext)
                .with_count_low(tfr.count)
                .with_device(tfr.device)
                .with_command(tfr.command)
                .with_icc(tfr.icc)
                .with_auxiliary_0(tfr.aux[3])
                .with_auxiliary_1(tfr.aux[2])
                .with_auxiliary_2(tfr.aux[1])
                .with_auxiliary_3(tfr.aux[0]);
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&buffer.bytes);
            bytes
        }
        other => {
            return Err(Error::BadParameter(format!(
                "cannot build a {other}-byte ATA pass-through CDB"
            )))
        }
    };

    Ok(BuiltCdb { bytes, length })
}

/// Reset protocols carry nothing but the protocol nibble and off-line bits.
fn build_reset(command: &AtaCommand, length: usize, bits: &TransferBits) -> Result<BuiltCdb> {
    let length = if length == 32 { 16 } else { length };
    let mut bytes = [0u8; 32];
    bytes[0] = if length == 12 {
        OPERATION_CODE_12
    } else {
        OPERATION_CODE_16
    };
    bytes[1] = command.protocol.nibble() << 1;
    bytes[2] = bits.off_line << 6;

    Ok(BuiltCdb { bytes, length })
}

fn select_length(command: &AtaCommand, hacks: &PassthroughHacks) -> Result<usize> {
    for forced in [command.force_cdb_size, hacks.force_cdb_size] {
        match forced {
            0 => {}
            12 | 16 | 32 => return Ok(forced as usize),
            other => {
                return Err(Error::BadParameter(format!(
                    "forced CDB size {other} is not 12, 16 or 32"
                )))
            }
        }
    }

    Ok(match command.shape {
        AtaCommandShape::Taskfile28 => {
            if hacks.a1_never_supported {
                16
            } else {
                12
            }
        }
        AtaCommandShape::Taskfile48 => {
            if hacks.a1_ext_when_possible
                && !hacks.a1_never_supported
                && command.tfr.ext_registers_zero()
            {
                12
            } else {
                16
            }
        }
        AtaCommandShape::Complete32 => 32,
    })
}

fn transfer_bits(command: &AtaCommand, hacks: &PassthroughHacks) -> Result<TransferBits> {
    if command.protocol.is_data_transfer() && !command.direction.is_data_transfer() {
        return Err(Error::BadParameter(format!(
            "{:?} protocol requires a transfer direction",
            command.protocol
        )));
    }

    let t_length = if hacks.always_use_tpsiu {
        TransferLengthLocation::Tpsiu
    } else {
        command.transfer_length_location
    } as u8;

    let t_dir = match command.direction {
        DataDirection::FromDevice => 1,
        _ => 0,
    };

    let (byte_block, t_type) = if t_length == TransferLengthLocation::Tpsiu as u8 {
        (0, 0)
    } else {
        match command.transfer_block_kind {
            TransferBlockKind::Bytes => (0, 0),
            TransferBlockKind::Blocks512 => (1, 0),
            TransferBlockKind::LogicalSectors => (1, 1),
        }
    };

    let ck_cond = if hacks.windows_ide {
        // The IDE-mode driver loses RTFRs unless asked for a check condition.
        1
    } else if command.need_rtfrs
        && !hacks.disable_check_condition
        && !hacks.check_condition_empty
        && !matches!(command.protocol, AtaProtocol::PioIn | AtaProtocol::Fpdma)
    {
        1
    } else {
        0
    };

    let off_line = if command.protocol.is_reset() {
        // Encodes an offline timeout of (2^n - 2) seconds: 0, 2, 6 or 14.
        let seconds = command.timeout.map(|t| t.as_secs()).unwrap_or(0);
        match seconds {
            0 => 0,
            1..=2 => 1,
            3..=6 => 2,
            _ => 3,
        }
    } else {
        0
    };

    Ok(TransferBits {
        t_length,
        t_dir,
        byte_block,
        t_type,
        ck_cond,
        off_line,
    })
}

fn multiple_count(command: &AtaCommand) -> Result<u8> {
    if command.multiple_count == 0 {
        return Ok(0);
    }

    let is_pio_multiple = matches!(
        command.protocol,
        AtaProtocol::PioIn | AtaProtocol::PioOut
    ) && matches!(
        command.tfr.command,
        opcode::READ_MULTIPLE
            | opcode::WRITE_MULTIPLE
            | READ_MULTIPLE_EXT
            | WRITE_MULTIPLE_EXT
            | WRITE_MULTIPLE_FUA_EXT
    );

    if !is_pio_multiple {
        return Err(Error::BadParameter(
            "multiple count is only valid for PIO read/write multiple commands".to_owned(),
        ));
    }

    if command.multiple_count > 0x07 {
        return Err(Error::BadParameter(format!(
            "multiple count {} does not fit three bits",
            command.multiple_count
        )));
    }

    Ok(command.multiple_count)
}

/// A data-transfer PIO command at a 28-bit taskfile whose sector count is
/// zero but which moves one 512-byte block really means one sector; zero is
/// only meaningful for the two legacy opcodes where it is not an alias
/// for 256.
fn rewrite_zero_sector_count(command: &mut AtaCommand) {
    if matches!(command.shape, AtaCommandShape::Taskfile28)
        && matches!(command.protocol, AtaProtocol::PioIn | AtaProtocol::PioOut)
        && command.transfer_length_location == TransferLengthLocation::SectorCount
        && command.transfer_block_kind == TransferBlockKind::Blocks512
        && command.tfr.count == 0
        && !matches!(command.tfr.command, FORMAT_TRACK | LEGACY_WRITE_SAME)
    {
        command.tfr.count = 1;
    }
}

/// Re-parses a built CDB back into an [`AtaCommand`]. Protocol nibbles that
/// encode direction restore it; the rest keep the direction implied by the
/// transfer bits.
pub fn parse(cdb: &[u8]) -> Result<AtaCommand> {
    match (cdb.first(), cdb.len()) {
        (Some(&OPERATION_CODE_12), 12) => {
            let buffer = CommandBuffer12::from_bytes(cdb.try_into().unwrap());
            let protocol = parse_protocol(buffer.protocol())?;
            let mut command = AtaCommand::new(protocol, buffer.command());
            command.tfr = AtaTaskfile {
                feature: buffer.features(),
                count: buffer.count(),
                lba_low: buffer.lba_0(),
                lba_mid: buffer.lba_1(),
                lba_hi: buffer.lba_2(),
                device: buffer.device(),
                command: buffer.command(),
                ..Default::default()
            };
            command.multiple_count = buffer.multiple_count();
            finish_parse(
                command,
                AtaCommandShape::Taskfile28,
                buffer.t_length(),
                buffer.t_dir(),
                buffer.byte_block(),
                buffer.t_type(),
                buffer.ck_cond(),
            )
        }
        (Some(&OPERATION_CODE_16), 16) => {
            let buffer = CommandBuffer16::from_bytes(cdb.try_into().unwrap());
            let protocol = parse_protocol(buffer.protocol())?;
            let mut command = AtaCommand::new(protocol, buffer.command());
            command.tfr = AtaTaskfile {
                feature: buffer.features_low(),
                feature_ext: buffer.features_high(),
                count: buffer.count_low(),
                count_ext: buffer.count_high(),
                lba_low: buffer.lba_0(),
                lba_mid: buffer.lba_1(),
                lba_hi: buffer.lba_2(),
                lba_low_ext: buffer.lba_3(),
                lba_mid_ext: buffer.lba_4(),
                lba_hi_ext: buffer.lba_5(),
                device: buffer.device(),
                command: buffer.command(),
                ..Default::default()
            };
            command.multiple_count = buffer.multiple_count();
            let shape = if buffer.extend() != 0 {
                AtaCommandShape::Taskfile48
            } else {
                AtaCommandShape::Taskfile28
            };
            finish_parse(
                command,
                shape,
                buffer.t_length(),
                buffer.t_dir(),
                buffer.byte_block(),
                buffer.t_type(),
                buffer.ck_cond(),
            )
        }
        (Some(&OPERATION_CODE_32), 32) => {
            let buffer = CommandBuffer32::from_bytes(cdb.try_into().unwrap());
            if buffer.service_action() != SERVICE_ACTION_32 {
                return Err(Error::BadParameter(format!(
                    "service action {:#06X} is not ATA pass-through (32)",
                    buffer.service_action()
                )));
            }

            let protocol = parse_protocol(buffer.protocol())?;
            let mut command = AtaCommand::new(protocol, buffer.command());
            command.tfr = AtaTaskfile {
                feature: buffer.features_low(),
                feature_ext: buffer.features_high(),
                count: buffer.count_low(),
                count_ext: buffer.count_high(),
                lba_low: buffer.lba_0(),
                lba_mid: buffer.lba_1(),
                lba_hi: buffer.lba_2(),
                lba_low_ext: buffer.lba_3(),
                lba_mid_ext: buffer.lba_4(),
                lba_hi_ext: buffer.lba_5(),
                device: buffer.device(),
                command: buffer.command(),
                icc: buffer.icc(),
                aux: [
                    buffer.auxiliary_3(),
                    buffer.auxiliary_2(),
                    buffer.auxiliary_1(),
                    buffer.auxiliary_0(),
                ],
            };
            finish_parse(
                command,
                AtaCommandShape::Complete32,
                buffer.t_length(),
                buffer.t_dir(),
                buffer.byte_block(),
                buffer.t_type(),
                buffer.ck_cond(),
            )
        }
        _ => Err(Error::BadParameter(
            "not an ATA pass-through CDB".to_owned(),
        )),
    }
}

fn parse_protocol(nibble: u8) -> Result<AtaProtocol> {
    AtaProtocol::from_nibble(nibble)
        .ok_or_else(|| Error::BadParameter(format!("reserved ATA protocol {nibble:#X}")))
}

fn finish_parse(
    mut command: AtaCommand,
    shape: AtaCommandShape,
    t_length: u8,
    t_dir: u8,
    byte_block: u8,
    t_type: u8,
    ck_cond: u8,
) -> Result<AtaCommand> {
    command.shape = shape;
    command.transfer_length_location = match t_length {
        0 => TransferLengthLocation::NoData,
        1 => TransferLengthLocation::Feature,
        2 => TransferLengthLocation::SectorCount,
        _ => TransferLengthLocation::Tpsiu,
    };
    command.transfer_block_kind = match (byte_block, t_type) {
        (0, _) => TransferBlockKind::Bytes,
        (_, 0) => TransferBlockKind::Blocks512,
        _ => TransferBlockKind::LogicalSectors,
    };
    command.need_rtfrs = ck_cond != 0;
    if command.transfer_length_location != TransferLengthLocation::NoData {
        command.direction = if t_dir != 0 {
            DataDirection::FromDevice
        } else {
            DataDirection::ToDevice
        };
    } else {
        command.direction = DataDirection::None;
    }

    Ok(command)
}
