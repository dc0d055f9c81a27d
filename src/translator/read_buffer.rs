//! READ BUFFER, including the error-history gateway to the device internal
//! status logs.

use crate::{
    ata::ops,
    device::SatDevice,
    error::Completion,
    translator::{
        check_reserved_fields, ensure_identify, feature_not_supported, fill_data_in, good_sense,
        invalid_field, issue_with_ctx_data, ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

mod read_mode {
    pub const DATA: u8 = 0x02;
    pub const DESCRIPTOR: u8 = 0x03;
    pub const ERROR_HISTORY: u8 = 0x1C;
}

const RESERVED_FIELDS: &[ReservedField] = &[(1, 0xC0)];

pub(crate) fn read_buffer<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS)?;
    ensure_identify(device)?;

    let mode = ctx.cdb[1] & 0x1F;
    let buffer_id = ctx.cdb[2];
    let offset = u32::from_be_bytes([0, ctx.cdb[3], ctx.cdb[4], ctx.cdb[5]]);

    match mode {
        read_mode::DATA => {
            if buffer_id != 0 || offset != 0 {
                return Err(invalid_field(device, ctx, 2, None));
            }
            let mut command = ops::read_buffer(false);
            issue_with_ctx_data(device, ctx, &mut command)
        }
        read_mode::DESCRIPTOR => {
            // One 512-byte buffer, no offset granularity games.
            let descriptor = [0x09, 0x00, 0x02, 0x00];
            fill_data_in(ctx, &descriptor);
            good_sense(device, ctx);
            Ok(Completion::Success)
        }
        read_mode::ERROR_HISTORY => error_history(device, ctx, buffer_id),
        _ => Err(invalid_field(device, ctx, 1, None)),
    }
}

/// Error history buffer IDs map onto the device internal status logs.
fn error_history<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    buffer_id: u8,
) -> Result<Completion> {
    if !device.flags.internal_status_log_supported {
        return Err(feature_not_supported(device, ctx, "device internal status log"));
    }

    match buffer_id {
        0x00 => {
            // Directory: vendor, version, one source entry per log.
            let mut directory = vec![0u8; 32 + 2 * 8];
            directory[0..8].copy_from_slice(crate::translator::inquiry::T10_VENDOR_ID);
            directory[30..32].copy_from_slice(&16u16.to_be_bytes());
            // Buffer 10h: current internal status data.
            directory[32] = 0x10;
            directory[33] = 0x01;
            // Buffer 11h: saved internal status data.
            directory[40] = 0x11;
            directory[41] = 0x01;
            fill_data_in(ctx, &directory);
            good_sense(device, ctx);
            Ok(Completion::Success)
        }
        0x10 | 0x11 => {
            let log = if buffer_id == 0x10 {
                ops::log_address::CURRENT_DEVICE_INTERNAL_STATUS
            } else {
                ops::log_address::SAVED_DEVICE_INTERNAL_STATUS
            };

            let pages = (ctx.data.len().max(512) / 512).min(u16::MAX as usize) as u16;
            let mut command = ops::read_log_ext(log, 0, pages, false);
            issue_with_ctx_data(device, ctx, &mut command)
        }
        _ => Err(invalid_field(device, ctx, 2, None)),
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

    #[test]
    fn error_history_reads_internal_status_log() {
        let mut device = SatDevice::new(ScriptedTransport::new([Step::good()]));
        device.install_identify(sample_identify());
        device.flags.internal_status_log_supported = true;

        let cdb: [u8; 10] = [0x3C, 0x1C, 0x10, 0, 0, 0, 0x02, 0x00, 0x00, 0];
        let mut data = vec![0u8; 1024];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense);

        read_buffer(&mut device, &mut ctx).unwrap();

        let (cdb_sent, _, _) = &device.transport.sent[0];
        assert_eq!(cdb_sent[14], ops::opcode::READ_LOG_EXT);
        assert_eq!(cdb_sent[8], 0x24, "current internal status log");
    }

    #[test]
    fn descriptor_mode_reports_one_buffer() {
        let mut device = SatDevice::new(ScriptedTransport::default());
        device.install_identify(sample_identify());

        let cdb: [u8; 10] = [0x3C, 0x03, 0, 0, 0, 0, 0, 0, 4, 0];
        let mut data = [0u8; 4];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense);

        read_buffer(&mut device, &mut ctx).unwrap();

        assert_eq!(data[0], 0x09, "offset boundary");
        assert_eq!(&data[1..4], &[0x00, 0x02, 0x00], "512-byte capacity");
        assert!(device.transport.sent.is_empty());
    }

    #[test]
    fn error_history_without_the_log_is_rejected() {
        let mut device = SatDevice::new(ScriptedTransport::default());
        device.install_identify(sample_identify());

        let cdb: [u8; 10] = [0x3C, 0x1C, 0, 0, 0, 0, 0, 0, 0x40, 0];
        let mut data = [0u8; 64];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense);

        assert!(read_buffer(&mut device, &mut ctx).is_err());
        assert!(device.transport.sent.is_empty());
    }
}
