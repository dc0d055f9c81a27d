//! SYNCHRONIZE CACHE 10/16 → FLUSH CACHE / FLUSH CACHE EXT.

use crate::{
    ata::ops,
    device::SatDevice,
    error::Completion,
    translator::{
        check_reserved_fields, ensure_identify, issue_and_sense, scsi_op, ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

// The IMMED bit is accepted and ignored; the flush is always synchronous.
const RESERVED_FIELDS_10: &[ReservedField] = &[(1, 0xF9), (6, 0xE0)];
const RESERVED_FIELDS_16: &[ReservedField] = &[(1, 0xF9), (14, 0xE0)];

pub(crate) fn translate<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    let table = if ctx.cdb[0] == scsi_op::SYNCHRONIZE_CACHE_10 {
        RESERVED_FIELDS_10
    } else {
        RESERVED_FIELDS_16
    };
    check_reserved_fields(device, ctx, table)?;
    ensure_identify(device)?;

    let ext = device
        .identify()
        .map(|id| id.supports_lba48())
        .unwrap_or(false);

    let mut command = ops::flush_cache(ext);
    issue_and_sense(device, ctx, &mut command, &mut [])
}
