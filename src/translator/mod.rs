#![allow(dead_code)]

//! Top-level SCSI command dispatch: validates CDB structure, routes each
//! opcode (and service action) to its translator, and funnels every outcome
//! into a conformant sense buffer.

pub mod format_unit;
pub mod inquiry;
pub mod log_select;
pub mod log_sense;
pub mod mode_select;
pub mod mode_sense;
pub mod read_buffer;
pub mod read_capacity;
pub mod read_write;
pub mod report_supported_operation_codes;
pub mod sanitize;
pub mod security_protocol;
pub mod simple;
pub mod start_stop_unit;
pub mod synchronize_cache;
pub mod timestamp;
pub mod unmap;
pub mod write_buffer;
pub mod write_same;
pub mod zone;

mod passthrough_cmd;

use crate::{
    device::SatDevice,
    error::Completion,
    sense::{
        self,
        synthesize::{self, SenseDescriptor},
        SenseFormat,
    },
    transport::{ScsiIoCtx, Transport},
    Error, Result,
};

pub(crate) mod scsi_op {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const FORMAT_UNIT: u8 = 0x04;
    pub const REASSIGN_BLOCKS: u8 = 0x07;
    pub const READ_6: u8 = 0x08;
    pub const WRITE_6: u8 = 0x0A;
    pub const INQUIRY: u8 = 0x12;
    pub const MODE_SELECT_6: u8 = 0x15;
    pub const MODE_SENSE_6: u8 = 0x1A;
    pub const START_STOP_UNIT: u8 = 0x1B;
    pub const SEND_DIAGNOSTIC: u8 = 0x1D;
    pub const READ_CAPACITY_10: u8 = 0x25;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2A;
    pub const WRITE_AND_VERIFY_10: u8 = 0x2E;
    pub const VERIFY_10: u8 = 0x2F;
    pub const SYNCHRONIZE_CACHE_10: u8 = 0x35;
    pub const WRITE_LONG_10: u8 = 0x3F;
    pub const WRITE_BUFFER: u8 = 0x3B;
    pub const READ_BUFFER: u8 = 0x3C;
    pub const WRITE_SAME_10: u8 = 0x41;
    pub const UNMAP: u8 = 0x42;
    pub const SANITIZE: u8 = 0x48;
    pub const LOG_SELECT: u8 = 0x4C;
    pub const LOG_SENSE: u8 = 0x4D;
    pub const MODE_SELECT_10: u8 = 0x55;
    pub const MODE_SENSE_10: u8 = 0x5A;
    pub const VARIABLE_LENGTH: u8 = 0x7F;
    pub const ATA_PASS_THROUGH_16: u8 = 0x85;
    pub const READ_16: u8 = 0x88;
    pub const WRITE_16: u8 = 0x8A;
    pub const WRITE_AND_VERIFY_16: u8 = 0x8E;
    pub const VERIFY_16: u8 = 0x8F;
    pub const SYNCHRONIZE_CACHE_16: u8 = 0x91;
    pub const WRITE_SAME_16: u8 = 0x93;
    pub const ZBC_OUT: u8 = 0x94;
    pub const ZBC_IN: u8 = 0x95;
    pub const SERVICE_ACTION_IN_16: u8 = 0x9E;
    pub const SERVICE_ACTION_OUT_16: u8 = 0x9F;
    pub const REPORT_LUNS: u8 = 0xA0;
    pub const ATA_PASS_THROUGH_12: u8 = 0xA1;
    pub const SECURITY_PROTOCOL_IN: u8 = 0xA2;
    pub const MAINTENANCE_IN: u8 = 0xA3;
    pub const MAINTENANCE_OUT: u8 = 0xA4;
    pub const READ_12: u8 = 0xA8;
    pub const WRITE_12: u8 = 0xAA;
    pub const WRITE_AND_VERIFY_12: u8 = 0xAE;
    pub const VERIFY_12: u8 = 0xAF;
    pub const SECURITY_PROTOCOL_OUT: u8 = 0xB5;
}

/// Entry point: translate one SCSI request against an ATA device.
pub fn translate_scsi<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    if ctx.cdb.is_empty() {
        return Err(Error::BadParameter("empty CDB".to_owned()));
    }

    match ctx.cdb[0] {
        scsi_op::TEST_UNIT_READY => simple::test_unit_ready(device, ctx),
        scsi_op::REQUEST_SENSE => simple::request_sense(device, ctx),
        scsi_op::FORMAT_UNIT => format_unit::format_unit(device, ctx),
        scsi_op::REASSIGN_BLOCKS => format_unit::reassign_blocks(device, ctx),
        scsi_op::INQUIRY => inquiry::translate(device, ctx),
        scsi_op::MODE_SELECT_6 | scsi_op::MODE_SELECT_10 => mode_select::translate(device, ctx),
        scsi_op::MODE_SENSE_6 | scsi_op::MODE_SENSE_10 => mode_sense::translate(device, ctx),
        scsi_op::START_STOP_UNIT => start_stop_unit::translate(device, ctx),
        scsi_op::SEND_DIAGNOSTIC => simple::send_diagnostic(device, ctx),
        scsi_op::READ_CAPACITY_10 => read_capacity::read_capacity_10(device, ctx),
        scsi_op::READ_6
        | scsi_op::READ_10
        | scsi_op::READ_12
        | scsi_op::READ_16
        | scsi_op::WRITE_6
        | scsi_op::WRITE_10
        | scsi_op::WRITE_12
        | scsi_op::WRITE_16
        | scsi_op::WRITE_AND_VERIFY_10
        | scsi_op::WRITE_AND_VERIFY_12
        | scsi_op::WRITE_AND_VERIFY_16
        | scsi_op::VERIFY_10
        | scsi_op::VERIFY_12
        | scsi_op::VERIFY_16 => read_write::translate(device, ctx),
        scsi_op::WRITE_LONG_10 => read_write::write_long(device, ctx),
        scsi_op::SYNCHRONIZE_CACHE_10 | scsi_op::SYNCHRONIZE_CACHE_16 => {
            synchronize_cache::translate(device, ctx)
        }
        scsi_op::WRITE_BUFFER => write_buffer::write_buffer(device, ctx),
        scsi_op::READ_BUFFER => read_buffer::read_buffer(device, ctx),
        scsi_op::WRITE_SAME_10 | scsi_op::WRITE_SAME_16 => write_same::translate(device, ctx),
        scsi_op::UNMAP => unmap::translate(device, ctx),
        scsi_op::SANITIZE => sanitize::translate(device, ctx),
        scsi_op::LOG_SELECT => log_select::translate(device, ctx),
        scsi_op::LOG_SENSE => log_sense::translate(device, ctx),
        scsi_op::ZBC_IN => zone::zone_management_in(device, ctx),
        scsi_op::ZBC_OUT => zone::zone_management_out(device, ctx),
        scsi_op::SERVICE_ACTION_IN_16 => match service_action(ctx) {
            0x10 => read_capacity::read_capacity_16(device, ctx),
            _ => unsupported_operation(device, ctx),
        },
        scsi_op::SERVICE_ACTION_OUT_16 => match service_action(ctx) {
            0x11 => read_write::write_long(device, ctx),
            _ => unsupported_operation(device, ctx),
        },
        scsi_op::REPORT_LUNS => simple::report_luns(device, ctx),
        scsi_op::SECURITY_PROTOCOL_IN | scsi_op::SECURITY_PROTOCOL_OUT => {
            security_protocol::translate(device, ctx)
        }
        scsi_op::MAINTENANCE_IN => match service_action(ctx) {
            0x0C => report_supported_operation_codes::translate(device, ctx),
            0x0F => timestamp::report_timestamp(device, ctx),
            _ => unsupported_operation(device, ctx),
        },
        scsi_op::MAINTENANCE_OUT => match service_action(ctx) {
            0x0F => timestamp::set_timestamp(device, ctx),
            _ => unsupported_operation(device, ctx),
        },
        scsi_op::ATA_PASS_THROUGH_12
        | scsi_op::ATA_PASS_THROUGH_16
        | scsi_op::VARIABLE_LENGTH => passthrough_cmd::translate(device, ctx),
        _ => unsupported_operation(device, ctx),
    }
}

fn service_action(ctx: &ScsiIoCtx) -> u8 {
    ctx.cdb.get(1).map(|b| b & 0x1F).unwrap_or(0)
}

pub(crate) fn sense_format<T: Transport>(device: &SatDevice<T>) -> SenseFormat {
    if device.flags.prefer_descriptor_sense {
        SenseFormat::Descriptor
    } else {
        SenseFormat::Fixed
    }
}

/// One row of a reserved-field table: `(byte, mask)` marks the bits of a
/// CDB byte that must be zero.
pub(crate) type ReservedField = (u16, u8);

/// Walks the table in order; the first violated row produces ILLEGAL
/// REQUEST / invalid field in CDB with a sense-key-specific pointer at the
/// exact byte and the highest offending bit.
pub(crate) fn check_reserved_fields<T: Transport>(
    device: &SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    table: &[ReservedField],
) -> Result<()> {
    for &(byte, mask) in table {
        let value = ctx.cdb.get(byte as usize).copied().unwrap_or(0);
        let violation = value & mask;
        if violation != 0 {
            let bit = 7 - violation.leading_zeros() as u8;
            return Err(invalid_field(device, ctx, byte, Some(bit)));
        }
    }

    Ok(())
}

/// Writes the invalid-field sense and returns the matching error.
pub(crate) fn invalid_field<T: Transport>(
    device: &SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    field_pointer: u16,
    bit_pointer: Option<u8>,
) -> Error {
    let sks = synthesize::invalid_field(
        true,
        bit_pointer.is_some(),
        bit_pointer.unwrap_or(0),
        field_pointer,
    );
    set_sense_with_descriptors(
        device,
        ctx,
        sense::key::ILLEGAL_REQUEST,
        sense::asc::INVALID_FIELD_IN_CDB,
        &[SenseDescriptor::SenseKeySpecific(sks)],
    );

    Error::NotSupported(format!(
        "invalid field in CDB at byte {field_pointer}{}",
        bit_pointer
            .map(|b| format!(" bit {b}"))
            .unwrap_or_default()
    ))
}

/// Invalid field in the parameter list rather than the CDB.
pub(crate) fn invalid_parameter_field<T: Transport>(
    device: &SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    field_pointer: u16,
    bit_pointer: Option<u8>,
) -> Error {
    let sks = synthesize::invalid_field(
        false,
        bit_pointer.is_some(),
        bit_pointer.unwrap_or(0),
        field_pointer,
    );
    set_sense_with_descriptors(
        device,
        ctx,
        sense::key::ILLEGAL_REQUEST,
        sense::asc::INVALID_FIELD_IN_PARAMETER_LIST,
        &[SenseDescriptor::SenseKeySpecific(sks)],
    );

    Error::BadParameter(format!(
        "invalid field in parameter list at byte {field_pointer}"
    ))
}

pub(crate) fn unsupported_operation<T: Transport>(
    device: &SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    set_sense(
        device,
        ctx,
        sense::key::ILLEGAL_REQUEST,
        sense::asc::INVALID_COMMAND_OPERATION_CODE,
    );

    Err(Error::NotSupported(format!(
        "operation code {:#04X}",
        ctx.cdb.first().copied().unwrap_or(0)
    )))
}

/// The translator understands the command but the drive lacks the feature.
pub(crate) fn feature_not_supported<T: Transport>(
    device: &SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    what: &str,
) -> Error {
    set_sense(
        device,
        ctx,
        sense::key::ILLEGAL_REQUEST,
        sense::asc::INVALID_FIELD_IN_CDB,
    );

    Error::NotSupported(what.to_owned())
}

pub(crate) fn set_sense<T: Transport>(
    device: &SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    sense_key: u8,
    code: (u8, u8),
) {
    set_sense_with_descriptors(device, ctx, sense_key, code, &[]);
}

pub(crate) fn set_sense_with_descriptors<T: Transport>(
    device: &SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    sense_key: u8,
    code: (u8, u8),
    descriptors: &[SenseDescriptor],
) {
    synthesize::from_triple(
        sense_key,
        code.0,
        code.1,
        descriptors,
        sense_format(device),
        ctx.sense,
    );
}

pub(crate) fn good_sense<T: Transport>(device: &SatDevice<T>, ctx: &mut ScsiIoCtx) {
    set_sense(device, ctx, sense::key::NO_SENSE, (0, 0));
}

/// Most translators need identify data; fetch and cache it on first use,
/// then probe the log directory for the capabilities identify cannot show.
pub(crate) fn ensure_identify<T: Transport>(device: &mut SatDevice<T>) -> Result<()> {
    if device.identify().is_some() {
        return Ok(());
    }

    let mut command = crate::ata::ops::identify();
    let mut data = [0u8; 512];
    let completion = device.issue_ata(&mut command, &mut data)?;
    if !completion.is_success() {
        return Err(Error::NotSupported(
            "IDENTIFY DEVICE failed; not an ATA device?".to_owned(),
        ));
    }

    device.install_identify(data);
    discover_log_capabilities(device);
    Ok(())
}

/// Re-reads identify data after a state change (SET FEATURES and friends);
/// MODE SENSE answers from the cache.
pub(crate) fn refresh_identify<T: Transport>(device: &mut SatDevice<T>) -> Result<()> {
    let mut command = crate::ata::ops::identify();
    let mut data = [0u8; 512];
    let completion = device.issue_ata(&mut command, &mut data)?;
    if completion.is_success() {
        device.install_identify(data);
    }
    Ok(())
}

/// Best effort: a failed log read just leaves the capability off.
fn discover_log_capabilities<T: Transport>(device: &mut SatDevice<T>) {
    use crate::ata::ops::{self, log_address};

    if !device.flags.gpl_supported {
        return;
    }

    let mut directory = [0u8; 512];
    let mut command = ops::read_log_ext(log_address::DIRECTORY, 0, 1, false);
    match device.issue_ata(&mut command, &mut directory) {
        Ok(completion) if completion.is_success() => {}
        _ => return,
    }

    // The directory holds a little-endian page count per log address.
    let pages_of = |log: u8| {
        let offset = usize::from(log) * 2;
        u16::from_le_bytes([directory[offset], directory[offset + 1]])
    };

    device.flags.identify_data_log_supported = pages_of(log_address::IDENTIFY_DEVICE_DATA) > 0;
    device.flags.internal_status_log_supported =
        pages_of(log_address::CURRENT_DEVICE_INTERNAL_STATUS) > 0;
    device.flags.host_vendor_logs_supported = pages_of(log_address::HOST_VENDOR_FIRST) > 0;

    if pages_of(log_address::DEVICE_STATISTICS) == 0 {
        return;
    }

    let mut list = [0u8; 512];
    let mut command = ops::read_log_ext(log_address::DEVICE_STATISTICS, 0, 1, false);
    match device.issue_ata(&mut command, &mut list) {
        Ok(completion) if completion.is_success() => {}
        _ => return,
    }

    let count = usize::from(list[8]);
    for &page in list.iter().skip(9).take(count) {
        match page {
            p if p == ops::device_stats_page::GENERAL => device.flags.stats_pages.general = true,
            p if p == ops::device_stats_page::ROTATING_MEDIA => {
                device.flags.stats_pages.rotating_media = true
            }
            p if p == ops::device_stats_page::GENERAL_ERRORS => {
                device.flags.stats_pages.general_errors = true
            }
            p if p == ops::device_stats_page::SOLID_STATE => {
                device.flags.stats_pages.solid_state = true
            }
            p if p == ops::device_stats_page::TEMPERATURE => {
                device.flags.stats_pages.temperature = true
            }
            _ => {}
        }
    }
    device.flags.stats_pages.date_time = device.flags.stats_pages.general;
}

/// Copies a generated payload into the data-in buffer, truncating at the
/// allocation the initiator gave us. Returns the number of bytes copied.
pub(crate) fn fill_data_in(ctx: &mut ScsiIoCtx, payload: &[u8]) -> usize {
    let length = usize::min(payload.len(), ctx.data.len());
    ctx.data[..length].copy_from_slice(&payload[..length]);
    length
}

/// Issues an ATA command for a translated SCSI command and synthesizes
/// sense data from the outcome. Successful completions leave NO SENSE in
/// the buffer, drive errors the RTFR-derived triple.
pub(crate) fn issue_and_sense<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    command: &mut crate::ata::AtaCommand,
    data: &mut [u8],
) -> Result<Completion> {
    let completion = device.issue_ata(command, data)?;
    sense_from_completion(device, ctx, command, completion);
    Ok(completion)
}

/// [`issue_and_sense`] with the request's own data buffer as the transfer
/// payload.
pub(crate) fn issue_with_ctx_data<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    command: &mut crate::ata::AtaCommand,
) -> Result<Completion> {
    let completion = device.issue_ata(command, ctx.data)?;
    sense_from_completion(device, ctx, command, completion);
    Ok(completion)
}

pub(crate) fn sense_from_completion<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    command: &crate::ata::AtaCommand,
    completion: Completion,
) {
    match completion {
        Completion::Success | Completion::WarnIncompleteRtfrs => good_sense(device, ctx),
        Completion::InProgress => {
            set_sense(device, ctx, sense::key::NO_SENSE, (0x00, 0x16));
        }
        Completion::Aborted | Completion::Failure => {
            // Prefer the drive's own sense data when it reported some.
            if let Some((key, code, qualifier)) = device.ata_sense_data() {
                set_sense(device, ctx, key, (code, qualifier));
            } else {
                synthesize::from_rtfrs(
                    &command.rtfr,
                    command.is_extended(),
                    sense_format(device),
                    ctx.sense,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;

    #[test]
    fn unknown_opcode_reports_invalid_operation() {
        let mut device = SatDevice::new(ScriptedTransport::default());
        let cdb = [0xEE, 0, 0, 0, 0, 0];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, crate::DataDirection::None, &mut [], &mut sense);

        let result = translate_scsi(&mut device, &mut ctx);
        assert!(matches!(result, Err(Error::NotSupported(_))));

        let parsed = sense::parse(ctx.sense).unwrap();
        assert_eq!(parsed.triple(), (sense::key::ILLEGAL_REQUEST, 0x20, 0x00));
        assert!(device.transport.sent.is_empty(), "nothing reached the drive");
    }

    #[test]
    fn reserved_field_table_points_at_first_violation() {
        let device = SatDevice::new(ScriptedTransport::default());
        let cdb = [0x28, 0x14, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, crate::DataDirection::None, &mut [], &mut sense);

        let result = check_reserved_fields(&device, &mut ctx, &[(1, 0x14)]);
        assert!(result.is_err());

        let sks = sense::find_descriptor(ctx.sense, sense::DESCRIPTOR_TYPE_SENSE_KEY_SPECIFIC);
        // Fixed format by default: the SKS data is flattened at bytes 15..18.
        assert!(sks.is_none());
        assert_eq!(ctx.sense[15] & 0x08, 0x08, "bit pointer valid");
        assert_eq!(ctx.sense[15] & 0x07, 4, "highest offending bit");
        assert_eq!(ctx.sense[17], 1, "field pointer");
    }
}
