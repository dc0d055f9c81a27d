//! START STOP UNIT. Power conditions go through the EPC feature set when
//! the drive has it, the legacy IDLE/STANDBY commands otherwise; stopping
//! with LOEJ ejects removable media.

use crate::{
    ata::{
        ops::{self, power_condition},
        tfr::AtaProtocol,
        AtaCommand,
    },
    device::SatDevice,
    error::Completion,
    translator::{
        check_reserved_fields, ensure_identify, feature_not_supported, invalid_field,
        issue_and_sense, ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

mod condition {
    pub const START_VALID: u8 = 0x0;
    pub const ACTIVE: u8 = 0x1;
    pub const IDLE: u8 = 0x2;
    pub const STANDBY: u8 = 0x3;
    pub const LU_CONTROL: u8 = 0x7;
    pub const FORCE_IDLE_0: u8 = 0xA;
    pub const FORCE_STANDBY_0: u8 = 0xB;
}

const RESERVED_FIELDS: &[ReservedField] = &[(1, 0xFE), (2, 0xFF), (3, 0xF0), (4, 0x08)];

pub(crate) fn translate<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS)?;
    ensure_identify(device)?;

    let modifier = ctx.cdb[3] & 0x0F;
    let power_cond = ctx.cdb[4] >> 4;
    let no_flush = ctx.cdb[4] & 0x04 != 0;
    let loej = ctx.cdb[4] & 0x02 != 0;
    let start = ctx.cdb[4] & 0x01 != 0;

    let (epc, removable) = {
        let id = device.identify().expect("identify cached");
        (id.supports_epc(), id.is_removable())
    };

    if !no_flush
        && matches!(
            power_cond,
            condition::IDLE | condition::STANDBY | condition::FORCE_IDLE_0
                | condition::FORCE_STANDBY_0
        )
    {
        let ext = device
            .identify()
            .map(|id| id.supports_lba48())
            .unwrap_or(false);
        let mut flush = ops::flush_cache(ext);
        let completion = device.issue_ata(&mut flush, &mut [])?;
        if !completion.is_success() {
            crate::translator::sense_from_completion(device, ctx, &flush, completion);
            return Ok(completion);
        }
    }

    let mut command = match power_cond {
        condition::START_VALID => {
            if loej && start {
                return Err(invalid_field(device, ctx, 4, Some(1)));
            }
            if loej {
                if !removable {
                    return Err(feature_not_supported(device, ctx, "media eject"));
                }
                ops::media_eject()
            } else if start {
                ops::idle_immediate()
            } else {
                ops::standby_immediate()
            }
        }
        condition::ACTIVE => spin_up_command(device),
        condition::IDLE => {
            if epc {
                let target = match modifier {
                    0 => power_condition::IDLE_A,
                    1 => power_condition::IDLE_B,
                    2 => power_condition::IDLE_C,
                    _ => return Err(invalid_field(device, ctx, 3, None)),
                };
                ops::epc_go_to_power_condition(target, false, false)
            } else {
                ops::idle_immediate()
            }
        }
        condition::STANDBY => {
            if epc {
                let target = match modifier {
                    0 => power_condition::STANDBY_Z,
                    1 => power_condition::STANDBY_Y,
                    _ => return Err(invalid_field(device, ctx, 3, None)),
                };
                ops::epc_go_to_power_condition(target, false, false)
            } else {
                ops::standby_immediate()
            }
        }
        condition::LU_CONTROL => {
            if !epc {
                return Err(feature_not_supported(device, ctx, "extended power conditions"));
            }
            // Hand timer control back to the drive.
            ops::epc_restore_power_condition(power_condition::ALL, false, false)
        }
        condition::FORCE_IDLE_0 => ops::idle_immediate(),
        condition::FORCE_STANDBY_0 => ops::standby_immediate(),
        _ => return Err(invalid_field(device, ctx, 4, Some(7))),
    };

    issue_and_sense(device, ctx, &mut command, &mut [])
}

/// Nothing wakes a drive like touching the media.
fn spin_up_command<T: Transport>(device: &SatDevice<T>) -> AtaCommand {
    let use_48bit = device
        .identify()
        .map(|id| id.supports_lba48())
        .unwrap_or(false);

    if use_48bit {
        AtaCommand::new(AtaProtocol::NoData, ops::opcode::READ_VERIFY_SECTORS_EXT)
            .extended()
            .lba48(0)
            .count(1)
    } else {
        let mut command =
            AtaCommand::new(AtaProtocol::NoData, ops::opcode::READ_VERIFY_SECTORS).count(1);
        command.tfr.device |= 0x40;
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ata::identify::tests::{sample_identify, set_word},
        testing::{ScriptedTransport, Step},
        DataDirection,
    };

    fn ssu_cdb(modifier: u8, power_cond: u8, flags: u8) -> [u8; 6] {
        [0x1B, 0, 0, modifier, (power_cond << 4) | flags, 0]
    }

    #[test]
    fn stop_without_epc_is_standby_immediate() {
        let mut raw = sample_identify();
        set_word(&mut raw, 119, 0x4044); // EPC off
        let mut device = SatDevice::new(ScriptedTransport::new([Step::good()]));
        device.install_identify(raw);

        let cdb = ssu_cdb(0, condition::START_VALID, 0x04); // no flush, stop
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::None, &mut [], &mut sense);

        translate(&mut device, &mut ctx).unwrap();

        let (cdb_sent, _, _) = &device.transport.sent[0];
        assert_eq!(cdb_sent[9], ops::opcode::STANDBY_IMMEDIATE);
    }

    #[test]
    fn idle_b_goes_through_epc() {
        let mut device = SatDevice::new(ScriptedTransport::new([Step::good(), Step::good()]));
        device.install_identify(sample_identify());

        let cdb = ssu_cdb(1, condition::IDLE, 0);
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::None, &mut [], &mut sense);

        translate(&mut device, &mut ctx).unwrap();

        let sent = &device.transport.sent;
        // Flush first, then the EPC transition.
        assert_eq!(sent[0].0[14], ops::opcode::FLUSH_CACHE_EXT);
        assert_eq!(sent[1].0[3], 0x4A, "EPC feature");
        assert_eq!(sent[1].0[5], power_condition::IDLE_B, "condition id");
    }

    #[test]
    fn eject_requires_removable_media() {
        let mut device = SatDevice::new(ScriptedTransport::default());
        device.install_identify(sample_identify());

        let cdb = ssu_cdb(0, condition::START_VALID, 0x02);
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::None, &mut [], &mut sense);

        assert!(translate(&mut device, &mut ctx).is_err());
    }
}
