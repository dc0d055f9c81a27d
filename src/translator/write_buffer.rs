//! WRITE BUFFER, including immediate and deferred firmware download.

use crate::{
    ata::ops,
    device::SatDevice,
    error::Completion,
    translator::{
        check_reserved_fields, ensure_identify, feature_not_supported, invalid_field,
        issue_and_sense, issue_with_ctx_data, ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

mod write_mode {
    pub const DATA: u8 = 0x02;
    pub const DOWNLOAD_SAVE: u8 = 0x05;
    pub const DOWNLOAD_OFFSETS_SAVE: u8 = 0x07;
    pub const DOWNLOAD_OFFSETS_DEFER_SELECT: u8 = 0x0D;
    pub const DOWNLOAD_OFFSETS_DEFER: u8 = 0x0E;
    pub const ACTIVATE_DEFERRED: u8 = 0x0F;
}

/// ATA DOWNLOAD MICROCODE subcommands.
mod dm_mode {
    pub const OFFSETS: u8 = 0x03;
    pub const FULL: u8 = 0x07;
    pub const DEFERRED: u8 = 0x0E;
    pub const ACTIVATE: u8 = 0x0F;
}

const RESERVED_FIELDS: &[ReservedField] = &[(1, 0xC0)];

pub(crate) fn write_buffer<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS)?;
    ensure_identify(device)?;

    let mode = ctx.cdb[1] & 0x1F;
    let buffer_id = ctx.cdb[2];
    let offset = u32::from_be_bytes([0, ctx.cdb[3], ctx.cdb[4], ctx.cdb[5]]);
    let length = u32::from_be_bytes([0, ctx.cdb[6], ctx.cdb[7], ctx.cdb[8]]);

    if buffer_id != 0 {
        return Err(invalid_field(device, ctx, 2, None));
    }

    match mode {
        write_mode::DATA => {
            if offset != 0 || length != 512 {
                return Err(invalid_field(device, ctx, 6, None));
            }
            let mut command = ops::write_buffer(false);
            issue_with_ctx_data(device, ctx, &mut command)
        }
        write_mode::DOWNLOAD_SAVE => {
            download(device, ctx, dm_mode::FULL, offset, length)
        }
        write_mode::DOWNLOAD_OFFSETS_SAVE => {
            download(device, ctx, dm_mode::OFFSETS, offset, length)
        }
        write_mode::DOWNLOAD_OFFSETS_DEFER_SELECT | write_mode::DOWNLOAD_OFFSETS_DEFER => {
            if !device.flags.download_deferred_supported {
                return Err(feature_not_supported(device, ctx, "deferred microcode download"));
            }
            download(device, ctx, dm_mode::DEFERRED, offset, length)
        }
        write_mode::ACTIVATE_DEFERRED => {
            if !device.flags.download_deferred_supported {
                return Err(feature_not_supported(device, ctx, "deferred microcode download"));
            }
            let mut command = ops::download_microcode(dm_mode::ACTIVATE, 0, 0, false);
            issue_and_sense(device, ctx, &mut command, &mut [])
        }
        _ => Err(invalid_field(device, ctx, 1, None)),
    }
}

fn download<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    dm_subcommand: u8,
    offset: u32,
    length: u32,
) -> Result<Completion> {
    let supported = device
        .identify()
        .map(|id| id.supports_download_microcode())
        .unwrap_or(false);
    if !supported {
        return Err(feature_not_supported(device, ctx, "DOWNLOAD MICROCODE"));
    }
    if dm_subcommand == dm_mode::OFFSETS && !device.flags.download_mode3_supported {
        return Err(feature_not_supported(device, ctx, "download with offsets"));
    }

    if offset % 512 != 0 {
        return Err(invalid_field(device, ctx, 3, None));
    }
    if length % 512 != 0 {
        return Err(invalid_field(device, ctx, 6, None));
    }

    let blocks = (length / 512) as u16;
    let block_offset = (offset / 512) as u16;

    // The drive publishes per-command block limits in identify 234/235.
    let (min_blocks, max_blocks) = {
        let id = device.identify().expect("identify cached");
        (id.download_min_blocks(), id.download_max_blocks())
    };
    if dm_subcommand != dm_mode::FULL {
        if max_blocks != 0 && blocks > max_blocks {
            return Err(invalid_field(device, ctx, 6, None));
        }
        if min_blocks != 0 && blocks != 0 && blocks < min_blocks && !ctx.fwdl_last_segment {
            return Err(invalid_field(device, ctx, 6, None));
        }
    }

    let mut command = ops::download_microcode(dm_subcommand, blocks, block_offset, false);
    issue_with_ctx_data(device, ctx, &mut command)
}
