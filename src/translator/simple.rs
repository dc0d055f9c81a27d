//! TEST UNIT READY, REQUEST SENSE, SEND DIAGNOSTIC and REPORT LUNS.

use crate::{
    ata::{ops, AtaStatus},
    device::SatDevice,
    error::Completion,
    sense::{
        self,
        synthesize::{progress, SenseDescriptor},
    },
    translator::{
        check_reserved_fields, ensure_identify, feature_not_supported, fill_data_in, good_sense,
        invalid_field, issue_and_sense, sanitize, set_sense, set_sense_with_descriptors,
        ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

const RESERVED_FIELDS_TUR: &[ReservedField] = &[(1, 0xFF), (2, 0xFF), (3, 0xFF), (4, 0xFF)];
const RESERVED_FIELDS_REQUEST_SENSE: &[ReservedField] = &[(1, 0xFE), (2, 0xFF), (3, 0xFF)];
const RESERVED_FIELDS_SEND_DIAGNOSTIC: &[ReservedField] = &[(1, 0x0B), (2, 0xFF)];
const RESERVED_FIELDS_REPORT_LUNS: &[ReservedField] =
    &[(1, 0xFF), (3, 0xFF), (4, 0xFF), (5, 0xFF), (10, 0xFF)];

pub(crate) fn test_unit_ready<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS_TUR)?;
    ensure_identify(device)?;

    if device.sanitize_in_progress && sanitize::report_progress(device, ctx)? {
        return Ok(Completion::InProgress);
    }

    if smart_self_test_remaining(device)?.is_some() {
        set_sense(
            device,
            ctx,
            sense::key::NOT_READY,
            sense::asc::LOGICAL_UNIT_NOT_READY_SELF_TEST_IN_PROGRESS,
        );
        return Ok(Completion::InProgress);
    }

    good_sense(device, ctx);
    Ok(Completion::Success)
}

pub(crate) fn request_sense<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS_REQUEST_SENSE)?;
    ensure_identify(device)?;

    let descriptor_format = ctx.cdb[1] & 0x01 != 0;
    let previous = device.flags.prefer_descriptor_sense;
    device.flags.prefer_descriptor_sense = descriptor_format;

    let result = current_condition(device, ctx);

    device.flags.prefer_descriptor_sense = previous;

    // REQUEST SENSE reports its answer in the data-in buffer, not in the
    // sense bytes of this request.
    let mut scratch = [0u8; sense::SPC3_SENSE_LEN];
    let copied = ctx.sense.len().min(sense::SPC3_SENSE_LEN);
    scratch[..copied].copy_from_slice(&ctx.sense[..copied]);
    fill_data_in(ctx, &scratch);
    good_sense(device, ctx);

    result
}

fn current_condition<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    if device.sanitize_in_progress && sanitize::report_progress(device, ctx)? {
        return Ok(Completion::Success);
    }

    if let Some(percent_remaining) = smart_self_test_remaining(device)? {
        let indicator = u32::from(100 - percent_remaining.min(100)) * 65535 / 100;
        set_sense_with_descriptors(
            device,
            ctx,
            sense::key::NOT_READY,
            sense::asc::LOGICAL_UNIT_NOT_READY_SELF_TEST_IN_PROGRESS,
            &[SenseDescriptor::SenseKeySpecific(progress(indicator as u16))],
        );
        return Ok(Completion::Success);
    }

    // Threshold exceeded shows up before power state reporting.
    let supports_smart = device
        .identify()
        .map(|id| id.supports_smart())
        .unwrap_or(false);
    if supports_smart {
        let mut command = ops::smart_return_status();
        let completion = device.issue_ata(&mut command, &mut [])?;
        if completion.is_success()
            && command.rtfr.lba_mid == 0xF4
            && command.rtfr.lba_hi == 0x2C
        {
            set_sense(
                device,
                ctx,
                sense::key::RECOVERED_ERROR,
                sense::asc::FAILURE_PREDICTION_THRESHOLD_EXCEEDED,
            );
            return Ok(Completion::Success);
        }
    }

    let mut command = ops::check_power_mode();
    let completion = device.issue_ata(&mut command, &mut [])?;
    if completion.is_success() && !command.rtfr.status_flags().contains(AtaStatus::ERROR) {
        let code = match command.rtfr.count {
            0x00 => Some(sense::asc::STANDBY_CONDITION_BY_TIMER),
            0x80 => Some(sense::asc::IDLE_CONDITION_BY_TIMER),
            _ => None,
        };
        if let Some(code) = code {
            set_sense(device, ctx, sense::key::NO_SENSE, code);
            return Ok(Completion::Success);
        }
    }

    good_sense(device, ctx);
    Ok(Completion::Success)
}

fn smart_self_test_remaining<T: Transport>(device: &mut SatDevice<T>) -> Result<Option<u8>> {
    if !device.self_test_in_progress {
        return Ok(None);
    }

    let mut data = [0u8; 512];
    let mut command = ops::smart_read_data();
    let completion = device.issue_ata(&mut command, &mut data)?;
    if !completion.is_success() {
        device.self_test_in_progress = false;
        return Ok(None);
    }

    let execution_status = data[363];
    if execution_status >> 4 == 0x0F {
        Ok(Some((execution_status & 0x0F) * 10))
    } else {
        device.self_test_in_progress = false;
        Ok(None)
    }
}

pub(crate) fn send_diagnostic<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS_SEND_DIAGNOSTIC)?;
    ensure_identify(device)?;

    let self_test_code = ctx.cdb[1] >> 5;
    let self_test = ctx.cdb[1] & 0x04 != 0;

    let supports_self_test = device
        .identify()
        .map(|id| id.supports_smart() && id.supports_smart_self_test())
        .unwrap_or(false);

    // Default self-test: the short captive test stands in for it.
    let subcommand = match (self_test, self_test_code) {
        (true, 0) => 0x81,
        (false, 0) => {
            // Nothing to do: the drive runs its own power-on diagnostics.
            good_sense(device, ctx);
            return Ok(Completion::Success);
        }
        (false, 1) => 0x01, // background short
        (false, 2) => 0x02, // background extended
        (false, 4) => 0x7F, // abort
        (false, 5) => 0x81, // foreground short
        (false, 6) => 0x82, // foreground extended
        _ => return Err(invalid_field(device, ctx, 1, Some(7))),
    };

    if !supports_self_test {
        return Err(feature_not_supported(device, ctx, "SMART self-test"));
    }

    let mut command = ops::smart_execute_offline(subcommand);
    let completion = issue_and_sense(device, ctx, &mut command, &mut [])?;
    if completion.is_success() && matches!(subcommand, 0x01 | 0x02) {
        device.self_test_in_progress = true;
    }
    Ok(completion)
}

pub(crate) fn report_luns<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS_REPORT_LUNS)?;

    let select_report = ctx.cdb[2];
    let lun_count: u32 = match select_report {
        // One drive, one LUN; no well-known logical units.
        0x00 | 0x02 => 1,
        0x01 => 0,
        _ => return Err(invalid_field(device, ctx, 2, None)),
    };

    let mut payload = vec![0u8; 8 + 8 * lun_count as usize];
    payload[0..4].copy_from_slice(&(lun_count * 8).to_be_bytes());

    fill_data_in(ctx, &payload);
    good_sense(device, ctx);
    Ok(Completion::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ata::{identify::tests::sample_identify, AtaReturnTfrs},
        sense::{synthesize::from_triple, SenseFormat},
        testing::{ScriptedTransport, Step},
        DataDirection,
    };

    #[test]
    fn test_unit_ready_is_quiet_when_idle() {
        let mut device = SatDevice::new(ScriptedTransport::default());
        device.install_identify(sample_identify());

        let cdb = [0x00, 0, 0, 0, 0, 0];
        let mut sense_buffer = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::None, &mut [], &mut sense_buffer);

        let completion = test_unit_ready(&mut device, &mut ctx).unwrap();
        assert_eq!(completion, Completion::Success);
        assert!(device.transport.sent.is_empty());
    }

    #[test]
    fn report_luns_single_lun() {
        let mut device = SatDevice::new(ScriptedTransport::default());

        let cdb = [0xA0, 0, 0, 0, 0, 0, 0, 0, 0, 64, 0, 0];
        let mut data = [0u8; 64];
        let mut sense_buffer = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense_buffer);

        report_luns(&mut device, &mut ctx).unwrap();

        assert_eq!(u32::from_be_bytes(data[0..4].try_into().unwrap()), 8);
        assert!(data[8..16].iter().all(|&b| b == 0), "LUN 0");
    }

    #[test]
    fn request_sense_reports_standby_power_state() {
        let standby = AtaReturnTfrs {
            status: 0x50,
            count: 0x00, // standby
            ..Default::default()
        };
        let mut drive_sense = vec![0u8; 48];
        let length = from_triple(
            0,
            0,
            0x1D,
            &[SenseDescriptor::AtaStatusReturn {
                rtfrs: standby,
                extend: false,
            }],
            SenseFormat::Descriptor,
            &mut drive_sense,
        );
        drive_sense.truncate(length);

        let mut device = SatDevice::new(ScriptedTransport::new([
            Step::good(), // smart return status: quiet
            Step::good().sense(&drive_sense),
        ]));
        device.install_identify(sample_identify());

        let cdb = [0x03, 0, 0, 0, 252, 0];
        let mut data = [0u8; 64];
        let mut sense_buffer = [0u8; 64];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense_buffer);

        request_sense(&mut device, &mut ctx).unwrap();

        // The condition lands in the returned data, fixed format.
        assert_eq!(ctx.data[0] & 0x7F, 0x70);
        assert_eq!(ctx.data[12], 0x5E);
        assert_eq!(ctx.data[13], 0x04);
        assert!(ctx.sense[..8].iter().all(|&b| b == 0 || b == 0x70), "own sense clean");
    }

    #[test]
    fn send_diagnostic_runs_short_captive_test() {
        let mut device = SatDevice::new(ScriptedTransport::new([Step::good()]));
        device.install_identify(sample_identify());

        let cdb = [0x1D, 0x04, 0, 0, 0, 0];
        let mut sense_buffer = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::None, &mut [], &mut sense_buffer);

        send_diagnostic(&mut device, &mut ctx).unwrap();

        let (cdb_sent, _, _) = &device.transport.sent[0];
        assert_eq!(cdb_sent[9], ops::opcode::SMART);
        assert_eq!(cdb_sent[3], 0xD4, "execute offline");
        assert_eq!(cdb_sent[5], 0x81, "short captive subcommand");
    }
}
