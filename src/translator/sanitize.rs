//! SANITIZE → the ATA sanitize feature set, including the status polling
//! loop for non-immediate requests.

use std::{thread, time::Duration};

use crate::{
    ata::{ops, AtaCommand, AtaStatus},
    device::SatDevice,
    error::Completion,
    sense::{
        self,
        synthesize::{progress, SenseDescriptor},
    },
    translator::{
        check_reserved_fields, ensure_identify, feature_not_supported, good_sense,
        invalid_field, invalid_parameter_field, sense_from_completion, set_sense,
        set_sense_with_descriptors, ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

mod service_action {
    pub const OVERWRITE: u8 = 0x01;
    pub const BLOCK_ERASE: u8 = 0x02;
    pub const CRYPTOGRAPHIC_ERASE: u8 = 0x03;
    pub const EXIT_FAILURE_MODE: u8 = 0x1F;
}

/// Sanitize progress rides in the returned count registers: bit 6 of the
/// upper byte flags an operation in progress, bit 7 of the lower a failure.
const SANITIZE_IN_PROGRESS_BIT: u8 = 0x40;

const RESERVED_FIELDS: &[ReservedField] = &[(2, 0xFF), (3, 0xFF), (4, 0xFF), (5, 0xFF), (6, 0xFF)];

const POLL_FLOOR: Duration = Duration::from_secs(1);
const POLL_CEILING: Duration = Duration::from_secs(15);

pub(crate) fn translate<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS)?;
    ensure_identify(device)?;

    let immediate = ctx.cdb[1] & 0x80 != 0;
    let znr = ctx.cdb[1] & 0x40 != 0;
    let ause = ctx.cdb[1] & 0x20 != 0;
    let action = ctx.cdb[1] & 0x1F;

    let id = device.identify().expect("identify cached");
    if !id.supports_sanitize() {
        return Err(feature_not_supported(device, ctx, "SANITIZE"));
    }
    if znr {
        // ZNR only means something on zoned drives; nothing to map here.
        return Err(invalid_field(device, ctx, 1, Some(6)));
    }

    let mut command = match action {
        service_action::OVERWRITE => {
            if !id.supports_sanitize_overwrite() {
                return Err(feature_not_supported(device, ctx, "sanitize overwrite"));
            }
            build_overwrite(device, ctx, ause)?
        }
        service_action::BLOCK_ERASE => {
            if !id.supports_sanitize_block_erase() {
                return Err(feature_not_supported(device, ctx, "sanitize block erase"));
            }
            ops::sanitize_block_erase(ause)
        }
        service_action::CRYPTOGRAPHIC_ERASE => {
            if !id.supports_sanitize_crypto() {
                return Err(feature_not_supported(device, ctx, "sanitize crypto scramble"));
            }
            ops::sanitize_crypto_scramble(ause)
        }
        service_action::EXIT_FAILURE_MODE => {
            let mut status = ops::sanitize_status();
            status.tfr.feature |= 0x01; // clear sanitize operation failed
            status
        }
        _ => return Err(invalid_field(device, ctx, 1, Some(4))),
    };

    let completion = device.issue_ata(&mut command, &mut [])?;
    if !completion.is_success() {
        sense_from_completion(device, ctx, &command, completion);
        return Ok(completion);
    }

    if action == service_action::EXIT_FAILURE_MODE {
        good_sense(device, ctx);
        return Ok(Completion::Success);
    }

    if immediate {
        device.sanitize_in_progress = true;
        good_sense(device, ctx);
        return Ok(Completion::Success);
    }

    poll_until_done(device, ctx)
}

fn build_overwrite<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    ause: bool,
) -> Result<AtaCommand> {
    // Overwrite parameter list: invert/test/count header plus the pattern.
    if ctx.data.len() < 8 {
        return Err(invalid_parameter_field(device, ctx, 0, None));
    }
    let invert = ctx.data[0] & 0x80 != 0;
    let overwrite_count = ctx.data[0] & 0x1F;
    let pattern_length = usize::from(u16::from_be_bytes([ctx.data[2], ctx.data[3]]));
    if pattern_length > 4 || 4 + pattern_length > ctx.data.len() {
        // The ATA overwrite pattern register is 32 bits wide.
        return Err(invalid_parameter_field(device, ctx, 2, None));
    }

    let mut pattern = [0u8; 4];
    pattern[..pattern_length].copy_from_slice(&ctx.data[4..4 + pattern_length]);

    Ok(ops::sanitize_overwrite(
        u32::from_be_bytes(pattern),
        overwrite_count.max(1),
        invert,
        ause,
    ))
}

/// Probes SANITIZE STATUS until the in-progress bit clears, backing off
/// from one second toward fifteen between probes.
fn poll_until_done<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    let mut interval = POLL_FLOOR;

    loop {
        let mut status = ops::sanitize_status();
        let completion = device.issue_ata(&mut status, &mut [])?;

        if status.rtfr.status_flags().contains(AtaStatus::ERROR) || !completion.is_success() {
            device.sanitize_in_progress = false;
            set_sense(
                device,
                ctx,
                sense::key::MEDIUM_ERROR,
                sense::asc::SANITIZE_COMMAND_FAILED,
            );
            return Ok(Completion::Failure);
        }

        if status.rtfr.count_ext & SANITIZE_IN_PROGRESS_BIT == 0 {
            device.sanitize_in_progress = false;
            good_sense(device, ctx);
            return Ok(Completion::Success);
        }

        thread::sleep(interval);
        interval = (interval * 2).min(POLL_CEILING);
    }
}

/// Progress report used by REQUEST SENSE and TEST UNIT READY while a
/// sanitize runs: the 16-bit indicator lives in the LBA registers.
pub(crate) fn report_progress<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<bool> {
    let mut status = ops::sanitize_status();
    let completion = device.issue_ata(&mut status, &mut [])?;
    if !completion.is_success() {
        device.sanitize_in_progress = false;
        return Ok(false);
    }

    if status.rtfr.count_ext & SANITIZE_IN_PROGRESS_BIT != 0 {
        let indicator =
            u16::from_be_bytes([status.rtfr.lba_mid, status.rtfr.lba_low]);
        set_sense_with_descriptors(
            device,
            ctx,
            sense::key::NOT_READY,
            sense::asc::LOGICAL_UNIT_NOT_READY_SANITIZE_IN_PROGRESS,
            &[SenseDescriptor::SenseKeySpecific(progress(indicator))],
        );
        return Ok(true);
    }

    device.sanitize_in_progress = false;
    Ok(false)
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

    fn status_sense(count_ext: u8) -> Vec<u8> {
        let rtfrs = AtaReturnTfrs {
            status: 0x50,
            count_ext,
            ..Default::default()
        };
        let mut buffer = vec![0u8; 48];
        let length = from_triple(
            0,
            0,
            0x1D,
            &[SenseDescriptor::AtaStatusReturn { rtfrs, extend: true }],
            SenseFormat::Descriptor,
            &mut buffer,
        );
        buffer.truncate(length);
        buffer
    }

    #[test]
    fn block_erase_polls_until_clear() {
        let mut device = SatDevice::new(ScriptedTransport::new([
            Step::good(),                                   // sanitize block erase
            Step::good().sense(&status_sense(0x00)),        // status: done
        ]));
        device.install_identify(sample_identify());

        // Block erase, immediate = 0.
        let cdb = [0x48, 0x02, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut sense_buffer = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::None, &mut [], &mut sense_buffer);

        let completion = translate(&mut device, &mut ctx).unwrap();
        assert_eq!(completion, Completion::Success);
        assert_eq!(ctx.sense[2] & 0x0F, 0);

        let sent = &device.transport.sent;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0[4], 0x12, "block erase feature");
        assert_eq!(sent[1].0[4], 0x00, "status probe");
    }

    #[test]
    fn immediate_skips_polling() {
        let mut device = SatDevice::new(ScriptedTransport::new([Step::good()]));
        device.install_identify(sample_identify());

        let cdb = [0x48, 0x82, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut sense_buffer = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::None, &mut [], &mut sense_buffer);

        let completion = translate(&mut device, &mut ctx).unwrap();
        assert_eq!(completion, Completion::Success);
        assert_eq!(device.transport.sent.len(), 1);
        assert!(device.sanitize_in_progress);
    }

    #[test]
    fn overwrite_packs_pattern_and_count() {
        let mut device = SatDevice::new(ScriptedTransport::new([
            Step::good(),
            Step::good().sense(&status_sense(0x00)),
        ]));
        device.install_identify(sample_identify());

        let cdb = [0x48, 0x01, 0, 0, 0, 0, 0, 0, 8, 0];
        let mut data = [0u8; 8];
        data[0] = 0x83; // invert, three passes
        data[3] = 4;
        data[4..8].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let mut sense_buffer = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::ToDevice, &mut data, &mut sense_buffer);

        translate(&mut device, &mut ctx).unwrap();

        let (cdb_sent, _, _) = &device.transport.sent[0];
        assert_eq!(cdb_sent[4], 0x14, "overwrite feature");
        assert_eq!(cdb_sent[8], 0xEF, "pattern low byte in lba low");
        assert_eq!(cdb_sent[6] & 0x0F, 3, "pass count");
        assert_eq!(cdb_sent[6] & 0x80, 0x80, "invert bit");
    }

    #[test]
    fn unsupported_drive_is_rejected() {
        let mut raw = sample_identify();
        crate::ata::identify::tests::set_word(&mut raw, 59, 0);
        let mut device = SatDevice::new(ScriptedTransport::default());
        device.install_identify(raw);

        let cdb = [0x48, 0x02, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut sense_buffer = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::None, &mut [], &mut sense_buffer);

        assert!(translate(&mut device, &mut ctx).is_err());
        assert!(device.transport.sent.is_empty());
    }
}
