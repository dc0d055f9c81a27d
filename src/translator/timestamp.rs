//! REPORT TIMESTAMP and SET TIMESTAMP, mapped onto the ATA date & time
//! statistic and SET DATE & TIME EXT.

use crate::{
    ata::ops,
    device::SatDevice,
    error::Completion,
    translator::{
        check_reserved_fields, ensure_identify, fill_data_in, good_sense,
        invalid_parameter_field, issue_and_sense, ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

const RESERVED_FIELDS: &[ReservedField] = &[(2, 0xFF), (3, 0xFF), (4, 0xFF), (5, 0xFF)];

pub(crate) fn report_timestamp<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS)?;
    ensure_identify(device)?;

    // Milliseconds since epoch, from the general statistics date & time
    // timestamp when the drive keeps one.
    let mut milliseconds = 0u64;
    if device.flags.stats_pages.date_time || device.flags.stats_pages.general {
        let mut data = [0u8; 512];
        let mut command =
            ops::read_log_ext(ops::log_address::DEVICE_STATISTICS, 1, 1, false);
        if matches!(device.issue_ata(&mut command, &mut data), Ok(c) if c.is_success()) {
            let raw = u64::from_le_bytes(data[56..64].try_into().unwrap());
            if raw & (1 << 63) != 0 {
                milliseconds = raw & 0x0000_FFFF_FFFF_FFFF;
            }
        }
    }

    let mut payload = [0u8; 12];
    payload[1] = 0x0A;
    // Timestamp origin: zero when the device has never been set.
    payload[2] = if milliseconds == 0 { 0x00 } else { 0x02 };
    payload[4..10].copy_from_slice(&milliseconds.to_be_bytes()[2..8]);

    fill_data_in(ctx, &payload);
    good_sense(device, ctx);
    Ok(Completion::Success)
}

pub(crate) fn set_timestamp<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS)?;
    ensure_identify(device)?;

    if ctx.data.len() < 12 {
        return Err(invalid_parameter_field(device, ctx, 0, None));
    }

    let mut raw = [0u8; 8];
    raw[2..8].copy_from_slice(&ctx.data[4..10]);
    let milliseconds = u64::from_be_bytes(raw);

    let mut command = ops::set_date_and_time(milliseconds);
    issue_and_sense(device, ctx, &mut command, &mut [])
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
    fn set_timestamp_packs_milliseconds_into_lba() {
        let mut device = SatDevice::new(ScriptedTransport::new([Step::good()]));
        device.install_identify(sample_identify());

        let cdb = [0xA4, 0x0F, 0, 0, 0, 0, 0, 0, 0, 12, 0, 0];
        let mut data = [0u8; 12];
        data[4..10].copy_from_slice(&[0x00, 0x00, 0x01, 0x02, 0x03, 0x04]);
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::ToDevice, &mut data, &mut sense);

        set_timestamp(&mut device, &mut ctx).unwrap();

        let (cdb_sent, _, _) = &device.transport.sent[0];
        assert_eq!(cdb_sent[14], ops::opcode::SET_DATE_AND_TIME_EXT);
        assert_eq!(cdb_sent[8], 0x04, "lba low");
        assert_eq!(cdb_sent[10], 0x03, "lba mid");
        assert_eq!(cdb_sent[12], 0x02, "lba hi");
        assert_eq!(cdb_sent[7], 0x01, "lba low ext");
    }

    #[test]
    fn report_timestamp_without_statistics_reports_zero() {
        let mut device = SatDevice::new(ScriptedTransport::default());
        device.install_identify(sample_identify());

        let cdb = [0xA3, 0x0F, 0, 0, 0, 0, 0, 0, 12, 0, 0, 0];
        let mut data = [0u8; 12];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense);

        report_timestamp(&mut device, &mut ctx).unwrap();
        assert_eq!(&data[4..10], &[0; 6]);
        assert_eq!(data[1], 0x0A);
    }
}
