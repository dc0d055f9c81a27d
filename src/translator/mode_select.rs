//! MODE SELECT 6/10. The writable bits map to SET FEATURES and the EPC
//! feature set; everything else must match what MODE SENSE reports.

use crate::{
    ata::ops::{self, power_condition, set_features},
    device::SatDevice,
    error::Completion,
    sense,
    translator::{
        check_reserved_fields, ensure_identify, good_sense, invalid_parameter_field,
        mode_sense::page, scsi_op, sense_from_completion, set_sense, ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

const RESERVED_FIELDS_6: &[ReservedField] = &[(1, 0xEE), (2, 0xFF), (3, 0xFF)];
const RESERVED_FIELDS_10: &[ReservedField] =
    &[(1, 0xEE), (2, 0xFF), (3, 0xFF), (4, 0xFF), (5, 0xFF), (6, 0xFF)];

/// SCSI timer values (100 ms units) above this cannot be expressed even in
/// ATA minute units.
const MAX_ATA_TIMER_100MS: u32 = 39_321_000;

pub(crate) fn translate<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    let six_byte = ctx.cdb[0] == scsi_op::MODE_SELECT_6;
    check_reserved_fields(
        device,
        ctx,
        if six_byte {
            RESERVED_FIELDS_6
        } else {
            RESERVED_FIELDS_10
        },
    )?;
    ensure_identify(device)?;

    let page_format = ctx.cdb[1] & 0x10 != 0;
    let save_pages = ctx.cdb[1] & 0x01 != 0;
    if !page_format {
        // Vendor-specific parameter format has no translation.
        return Err(crate::translator::invalid_field(device, ctx, 1, Some(4)));
    }

    let parameter_length = if six_byte {
        usize::from(ctx.cdb[4])
    } else {
        usize::from(u16::from_be_bytes(ctx.cdb[7..9].try_into().unwrap()))
    };
    if parameter_length == 0 {
        good_sense(device, ctx);
        return Ok(Completion::Success);
    }
    if parameter_length > ctx.data.len() {
        return Err(invalid_parameter_field(device, ctx, 0, None));
    }

    // Skip the mode parameter header and any block descriptors.
    let (header_length, descriptor_length) = if six_byte {
        (4usize, usize::from(ctx.data.get(3).copied().unwrap_or(0)))
    } else {
        (
            8usize,
            usize::from(u16::from_be_bytes([
                ctx.data.get(6).copied().unwrap_or(0),
                ctx.data.get(7).copied().unwrap_or(0),
            ])),
        )
    };

    let mut offset = header_length + descriptor_length;
    if offset >= parameter_length {
        return Err(invalid_parameter_field(device, ctx, header_length as u16, None));
    }

    while offset + 2 <= parameter_length {
        let code = ctx.data[offset] & 0x3F;
        let spf = ctx.data[offset] & 0x40 != 0;
        let (subpage, page_length) = if spf {
            (
                ctx.data[offset + 1],
                4 + usize::from(u16::from_be_bytes([
                    ctx.data[offset + 2],
                    ctx.data[offset + 3],
                ])),
            )
        } else {
            (0, 2 + usize::from(ctx.data[offset + 1]))
        };

        if offset + page_length > parameter_length {
            return Err(invalid_parameter_field(device, ctx, offset as u16, None));
        }

        let page_bytes: Vec<u8> = ctx.data[offset..offset + page_length].to_vec();
        match (code, subpage) {
            (page::CACHING, 0) => select_caching(device, ctx, &page_bytes, offset)?,
            (page::POWER_CONDITION, 0) => {
                select_power_condition(device, ctx, &page_bytes, offset, save_pages)?
            }
            (page::INFORMATIONAL_EXCEPTIONS, 0) => {
                select_informational_exceptions(device, ctx, &page_bytes, offset)?
            }
            (page::CONTROL, 0) => select_control(device, ctx, &page_bytes, offset)?,
            _ => {
                return Err(invalid_parameter_field(device, ctx, offset as u16, None));
            }
        }

        offset += page_length;
    }

    good_sense(device, ctx);
    Ok(Completion::Success)
}

fn apply_set_features<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    feature: u8,
) -> Result<()> {
    let mut command = ops::set_features(feature, 0);
    let completion = device.issue_ata(&mut command, &mut [])?;
    if !completion.is_success() {
        sense_from_completion(device, ctx, &command, completion);
        return Err(crate::Error::BadParameter(format!(
            "SET FEATURES {feature:#04X} failed"
        )));
    }
    Ok(())
}

fn select_caching<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    page_bytes: &[u8],
    offset: usize,
) -> Result<()> {
    if page_bytes.len() < 13 {
        return Err(invalid_parameter_field(device, ctx, offset as u16, None));
    }

    let wce = page_bytes[2] & 0x04 != 0;
    let dra = page_bytes[12] & 0x20 != 0;

    let (has_write_cache, has_look_ahead) = {
        let id = device.identify().expect("identify cached");
        (id.supports_write_cache(), id.supports_read_look_ahead())
    };

    if has_write_cache {
        apply_set_features(
            device,
            ctx,
            if wce {
                set_features::ENABLE_WRITE_CACHE
            } else {
                set_features::DISABLE_WRITE_CACHE
            },
        )?;
    } else if wce {
        return Err(invalid_parameter_field(device, ctx, (offset + 2) as u16, Some(2)));
    }

    if has_look_ahead {
        apply_set_features(
            device,
            ctx,
            if dra {
                set_features::DISABLE_READ_LOOK_AHEAD
            } else {
                set_features::ENABLE_READ_LOOK_AHEAD
            },
        )?;
    } else if dra {
        return Err(invalid_parameter_field(device, ctx, (offset + 12) as u16, Some(5)));
    }

    crate::translator::refresh_identify(device)
}

struct TimerSelection {
    condition: u8,
    enabled: bool,
    /// 100 ms units from the SCSI page.
    timer: u32,
}

fn select_power_condition<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    page_bytes: &[u8],
    offset: usize,
    save: bool,
) -> Result<()> {
    if page_bytes.len() < 40 {
        return Err(invalid_parameter_field(device, ctx, offset as u16, None));
    }

    let epc = device
        .identify()
        .map(|id| id.supports_epc())
        .unwrap_or(false);
    if !epc {
        return Err(invalid_parameter_field(device, ctx, offset as u16, None));
    }

    let timer_at = |start: usize| u32::from_be_bytes(page_bytes[start..start + 4].try_into().unwrap());
    let selections = [
        TimerSelection {
            condition: power_condition::IDLE_A,
            enabled: page_bytes[3] & 0x02 != 0,
            timer: timer_at(4),
        },
        TimerSelection {
            condition: power_condition::STANDBY_Z,
            enabled: page_bytes[3] & 0x01 != 0,
            timer: timer_at(8),
        },
        TimerSelection {
            condition: power_condition::IDLE_B,
            enabled: page_bytes[3] & 0x04 != 0,
            timer: timer_at(12),
        },
        TimerSelection {
            condition: power_condition::IDLE_C,
            enabled: page_bytes[3] & 0x08 != 0,
            timer: timer_at(16),
        },
        TimerSelection {
            condition: power_condition::STANDBY_Y,
            enabled: page_bytes[2] & 0x01 != 0,
            timer: timer_at(20),
        },
    ];

    let mut rounded = false;
    for selection in selections {
        // A 32-bit 100 ms timer has to squeeze into 16 ATA bits: keep it
        // when it fits, fall back to minute units, else peg at the max.
        let (ata_timer, minutes, this_rounded) = if selection.timer <= 65535 {
            (selection.timer as u16, false, false)
        } else if selection.timer <= MAX_ATA_TIMER_100MS {
            let minutes = (selection.timer + 300) / 600;
            (minutes.min(65535) as u16, true, true)
        } else {
            (u16::MAX, true, true)
        };
        rounded |= this_rounded;

        let mut command = ops::epc_set_power_condition_timer(
            selection.condition,
            ata_timer,
            minutes,
            selection.enabled,
            save,
        );
        let completion = device.issue_ata(&mut command, &mut [])?;
        if !completion.is_success() {
            sense_from_completion(device, ctx, &command, completion);
            return Err(crate::Error::BadParameter(
                "EPC set power condition timer failed".to_owned(),
            ));
        }
    }

    if rounded {
        set_sense(
            device,
            ctx,
            sense::key::RECOVERED_ERROR,
            (0x37, 0x00), // rounded parameter
        );
    }

    Ok(())
}

fn select_informational_exceptions<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    page_bytes: &[u8],
    offset: usize,
) -> Result<()> {
    if page_bytes.len() < 4 {
        return Err(invalid_parameter_field(device, ctx, offset as u16, None));
    }

    let supports_smart = device
        .identify()
        .map(|id| id.supports_smart())
        .unwrap_or(false);
    if !supports_smart {
        return Err(invalid_parameter_field(device, ctx, offset as u16, None));
    }

    let dexcpt = page_bytes[2] & 0x08 != 0;
    let mut command = if dexcpt {
        ops::smart_disable_operations()
    } else {
        ops::smart_enable_operations()
    };
    let completion = device.issue_ata(&mut command, &mut [])?;
    if !completion.is_success() {
        sense_from_completion(device, ctx, &command, completion);
        return Err(crate::Error::BadParameter("SMART enable/disable failed".to_owned()));
    }

    crate::translator::refresh_identify(device)
}

fn select_control<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    page_bytes: &[u8],
    offset: usize,
) -> Result<()> {
    if page_bytes.len() < 12 {
        return Err(invalid_parameter_field(device, ctx, offset as u16, None));
    }

    // D_SENSE selects the sense format the translator synthesizes.
    device.flags.prefer_descriptor_sense = page_bytes[2] & 0x04 != 0;
    let _ = ctx;
    Ok(())
}
