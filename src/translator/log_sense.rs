//! LOG SENSE. Every supported page is synthesized from ATA logs: device
//! statistics, the SMART self-test logs, the host vendor logs, and the
//! device-wide pass-through results ring.

use crate::{
    ata::{ops, AtaStatus},
    device::{SatDevice, ATA_PASSTHROUGH_RESULTS_RING_LEN},
    error::Completion,
    sense::AtaStatusReturnDescriptor,
    translator::{
        check_reserved_fields, ensure_identify, fill_data_in, good_sense, invalid_field,
        ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

pub(crate) mod log_page {
    pub const SUPPORTED_PAGES: u8 = 0x00;
    pub const READ_ERROR_COUNTERS: u8 = 0x03;
    pub const TEMPERATURE: u8 = 0x0D;
    pub const APPLICATION_CLIENT: u8 = 0x0F;
    pub const SELF_TEST_RESULTS: u8 = 0x10;
    pub const SOLID_STATE_MEDIA: u8 = 0x11;
    pub const BACKGROUND_SCAN: u8 = 0x15;
    pub const ATA_PASSTHROUGH_RESULTS: u8 = 0x16;
    pub const GENERAL_STATISTICS: u8 = 0x19;
    pub const INFORMATIONAL_EXCEPTIONS: u8 = 0x2F;
}

const RESERVED_FIELDS: &[ReservedField] = &[(1, 0xFE), (3, 0xFF), (4, 0xFF)];

pub(crate) fn translate<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS)?;
    ensure_identify(device)?;

    let page_control = ctx.cdb[2] >> 6;
    let page_code = ctx.cdb[2] & 0x3F;
    let subpage = ctx.cdb[3];
    let parameter_pointer = u16::from_be_bytes(ctx.cdb[5..7].try_into().unwrap());

    // Only cumulative values exist behind a SATL.
    if page_control != 0x01 {
        return Err(invalid_field(device, ctx, 2, Some(7)));
    }
    if subpage != 0 {
        return Err(invalid_field(device, ctx, 3, None));
    }

    let body = match page_code {
        log_page::SUPPORTED_PAGES => supported_pages(device),
        log_page::READ_ERROR_COUNTERS => read_error_counters(device),
        log_page::TEMPERATURE => temperature(device),
        log_page::APPLICATION_CLIENT => application_client(device, parameter_pointer),
        log_page::SELF_TEST_RESULTS => self_test_results(device),
        log_page::SOLID_STATE_MEDIA => solid_state_media(device),
        log_page::BACKGROUND_SCAN => background_scan(device),
        log_page::ATA_PASSTHROUGH_RESULTS => passthrough_results(device),
        log_page::GENERAL_STATISTICS => general_statistics(device),
        log_page::INFORMATIONAL_EXCEPTIONS => informational_exceptions(device),
        _ => return Err(invalid_field(device, ctx, 2, None)),
    };

    let mut page = vec![0u8; 4];
    page[0] = page_code;
    page[2..4].copy_from_slice(&(body.len() as u16).to_be_bytes());
    page.extend_from_slice(&body);

    fill_data_in(ctx, &page);
    good_sense(device, ctx);
    Ok(Completion::Success)
}

fn parameter(code: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + data.len());
    out.extend_from_slice(&code.to_be_bytes());
    out.push(0x03); // binary format, list parameter
    out.push(data.len() as u8);
    out.extend_from_slice(data);
    out
}

fn supported_pages<T: Transport>(device: &SatDevice<T>) -> Vec<u8> {
    let mut codes = vec![log_page::SUPPORTED_PAGES];
    let stats = &device.flags.stats_pages;
    if stats.general_errors {
        codes.push(log_page::READ_ERROR_COUNTERS);
    }
    if stats.temperature {
        codes.push(log_page::TEMPERATURE);
    }
    if device.flags.host_vendor_logs_supported {
        codes.push(log_page::APPLICATION_CLIENT);
    }
    codes.push(log_page::SELF_TEST_RESULTS);
    if stats.solid_state {
        codes.push(log_page::SOLID_STATE_MEDIA);
    }
    codes.push(log_page::BACKGROUND_SCAN);
    codes.push(log_page::ATA_PASSTHROUGH_RESULTS);
    if stats.general {
        codes.push(log_page::GENERAL_STATISTICS);
    }
    codes.push(log_page::INFORMATIONAL_EXCEPTIONS);
    codes
}

/// One page of the Device Statistics log.
fn read_stats_page<T: Transport>(device: &mut SatDevice<T>, page: u8) -> Option<[u8; 512]> {
    if !device.flags.gpl_supported {
        return None;
    }

    let mut data = [0u8; 512];
    let mut command =
        ops::read_log_ext(ops::log_address::DEVICE_STATISTICS, page.into(), 1, false);
    match device.issue_ata(&mut command, &mut data) {
        Ok(completion) if completion.is_success() => Some(data),
        _ => None,
    }
}

/// Device statistics values are qwords with a validity bit in byte 7.
fn stat_qword(page: &[u8; 512], offset: usize) -> Option<u64> {
    let raw = u64::from_le_bytes(page[offset..offset + 8].try_into().unwrap());
    if raw & (1 << 63) != 0 {
        Some(raw & 0x0000_FFFF_FFFF_FFFF)
    } else {
        None
    }
}

fn read_error_counters<T: Transport>(device: &mut SatDevice<T>) -> Vec<u8> {
    let uncorrected = read_stats_page(device, ops::device_stats_page::GENERAL_ERRORS)
        .and_then(|page| stat_qword(&page, 16))
        .unwrap_or(0);

    let mut body = Vec::new();
    // Total corrected and the like are not observable; report the one
    // counter ATA actually keeps.
    body.extend_from_slice(&parameter(0x0003, &0u32.to_be_bytes()));
    body.extend_from_slice(&parameter(0x0006, &(uncorrected as u32).to_be_bytes()));
    body
}

fn temperature<T: Transport>(device: &mut SatDevice<T>) -> Vec<u8> {
    let stats = read_stats_page(device, ops::device_stats_page::TEMPERATURE);
    let current = stats
        .as_ref()
        .and_then(|page| stat_qword(page, 8))
        .unwrap_or(0) as u8;
    let reference = stats
        .as_ref()
        .and_then(|page| stat_qword(page, 56))
        .unwrap_or(0) as u8;

    let mut body = Vec::new();
    body.extend_from_slice(&parameter(0x0000, &[0, current]));
    body.extend_from_slice(&parameter(0x0001, &[0, reference]));
    body
}

fn application_client<T: Transport>(device: &mut SatDevice<T>, first: u16) -> Vec<u8> {
    if !device.flags.host_vendor_logs_supported || first >= 512 {
        return Vec::new();
    }

    // 512 parameters of 252 bytes spread across host vendor logs
    // 90h..9Fh, two parameters per 512-byte log page.
    let mut body = Vec::new();
    let zeros = [0u8; 252];
    for code in first..(first + 8).min(512) {
        let log = ops::log_address::HOST_VENDOR_FIRST + (code / 32) as u8;
        let page = (code % 32) / 2;
        let offset = usize::from(code % 2) * 256;

        let mut data = [0u8; 512];
        let mut command = ops::read_log_ext(log, page, 1, false);
        let slice = match device.issue_ata(&mut command, &mut data) {
            Ok(completion) if completion.is_success() => &data[offset + 4..offset + 256],
            _ => &zeros[..],
        };
        body.extend_from_slice(&parameter(code, slice));
    }
    body
}

/// Self-test status nibble → SCSI self-test results code.
fn self_test_result_code(status: u8) -> u8 {
    match status >> 4 {
        0x0 => 0x0,
        0x1 => 0x1,
        0x2 => 0x2,
        0x3 => 0x3,
        0x4 => 0x4,
        0x5 => 0x5,
        0x6 => 0x6,
        0x7 => 0x7,
        0xF => 0xF,
        _ => 0x8,
    }
}

fn self_test_results<T: Transport>(device: &mut SatDevice<T>) -> Vec<u8> {
    let mut body = Vec::new();
    let gpl = device.flags.gpl_supported;

    // The extended log holds 19 descriptors per page; the legacy SMART log
    // 21 in one page. Either way the SCSI page wants exactly 20 parameters.
    let mut descriptors: Vec<(u8, u8, u16, u64)> = Vec::new();
    if gpl {
        let mut data = [0u8; 512];
        let mut command =
            ops::read_log_ext(ops::log_address::EXTENDED_SMART_SELF_TEST, 0, 1, false);
        if matches!(device.issue_ata(&mut command, &mut data), Ok(c) if c.is_success()) {
            for entry in 0..19 {
                let offset = 4 + entry * 26;
                let raw = &data[offset..offset + 26];
                let status = raw[1];
                let hours = u16::from_le_bytes([raw[2], raw[3]]);
                let lba = u64::from(u32::from_le_bytes(raw[5..9].try_into().unwrap()))
                    | u64::from(raw[9]) << 32
                    | u64::from(raw[10]) << 40;
                if status != 0 || hours != 0 {
                    descriptors.push((raw[0], status, hours, lba));
                }
            }
        }
    } else {
        let mut data = [0u8; 512];
        let mut command = ops::smart_read_log(ops::log_address::SMART_SELF_TEST, 1);
        if matches!(device.issue_ata(&mut command, &mut data), Ok(c) if c.is_success()) {
            for entry in 0..21 {
                let offset = 2 + entry * 24;
                let raw = &data[offset..offset + 24];
                let status = raw[1];
                let hours = u16::from_le_bytes([raw[2], raw[3]]);
                let lba = u64::from(u32::from_le_bytes(raw[5..9].try_into().unwrap()));
                if status != 0 || hours != 0 {
                    descriptors.push((raw[0], status, hours, lba));
                }
            }
        }
    }

    for code in 1u16..=20 {
        let mut data = [0u8; 16];
        if let Some(&(subcommand, status, hours, lba)) = descriptors.get(usize::from(code - 1)) {
            data[0] = (self_test_code_from_subcommand(subcommand) << 5)
                | self_test_result_code(status);
            data[2..4].copy_from_slice(&hours.to_be_bytes());
            data[4..12].copy_from_slice(&lba.to_be_bytes());
            if status >> 4 == 0x7 {
                // Read element failure maps to a medium error key.
                data[12] = 0x03;
                data[13] = 0x11;
            }
        } else {
            data[4..12].copy_from_slice(&u64::MAX.to_be_bytes());
        }
        body.extend_from_slice(&parameter(code, &data));
    }

    body
}

fn self_test_code_from_subcommand(subcommand: u8) -> u8 {
    match subcommand & 0x7F {
        0x01 => 0x1, // short
        0x02 => 0x2, // extended
        _ => 0x0,
    }
}

fn solid_state_media<T: Transport>(device: &mut SatDevice<T>) -> Vec<u8> {
    let used = read_stats_page(device, ops::device_stats_page::SOLID_STATE)
        .and_then(|page| stat_qword(&page, 8))
        .unwrap_or(0) as u8;

    parameter(0x0001, &[0, 0, 0, used])
}

fn background_scan<T: Transport>(device: &mut SatDevice<T>) -> Vec<u8> {
    let minutes = read_stats_page(device, ops::device_stats_page::GENERAL)
        .and_then(|page| stat_qword(&page, 16))
        .map(|hours| hours * 60)
        .unwrap_or(0);

    let mut status = [0u8; 16];
    status[0..4].copy_from_slice(&(minutes.min(u32::MAX as u64) as u32).to_be_bytes());
    parameter(0x0000, &status)
}

fn passthrough_results<T: Transport>(device: &SatDevice<T>) -> Vec<u8> {
    let mut body = Vec::new();
    for code in 1..=ATA_PASSTHROUGH_RESULTS_RING_LEN as u16 {
        let rtfrs = device
            .passthrough_result(code as u8)
            .copied()
            .unwrap_or_default();
        let descriptor =
            AtaStatusReturnDescriptor::from_rtfrs(&rtfrs, !rtfrs.ext_registers_zero());
        body.extend_from_slice(&parameter(code - 1, &descriptor.into_bytes()));
    }
    body
}

fn general_statistics<T: Transport>(device: &mut SatDevice<T>) -> Vec<u8> {
    let stats = read_stats_page(device, ops::device_stats_page::GENERAL);
    let read_commands = stats.as_ref().and_then(|p| stat_qword(p, 40)).unwrap_or(0);
    let write_commands = stats.as_ref().and_then(|p| stat_qword(p, 24)).unwrap_or(0);
    let read_sectors = stats.as_ref().and_then(|p| stat_qword(p, 48)).unwrap_or(0);
    let write_sectors = stats.as_ref().and_then(|p| stat_qword(p, 32)).unwrap_or(0);

    let mut data = [0u8; 0x40];
    data[0..8].copy_from_slice(&read_commands.to_be_bytes());
    data[8..16].copy_from_slice(&write_commands.to_be_bytes());
    data[16..24].copy_from_slice(&read_sectors.to_be_bytes());
    data[24..32].copy_from_slice(&write_sectors.to_be_bytes());
    parameter(0x0001, &data)
}

fn informational_exceptions<T: Transport>(device: &mut SatDevice<T>) -> Vec<u8> {
    let mut asc = 0u8;
    let mut ascq = 0u8;

    let mut command = ops::smart_return_status();
    if matches!(device.issue_ata(&mut command, &mut []), Ok(c) if c.is_success())
        && !command
            .rtfr
            .status_flags()
            .contains(AtaStatus::ERROR)
    {
        // 2Ch/F4h in the LBA registers reports threshold exceeded.
        if command.rtfr.lba_mid == 0xF4 && command.rtfr.lba_hi == 0x2C {
            asc = 0x5D;
            ascq = 0x10;
        }
    }

    let temperature = read_stats_page(device, ops::device_stats_page::TEMPERATURE)
        .and_then(|page| stat_qword(&page, 8))
        .unwrap_or(0) as u8;

    parameter(0x0000, &[asc, ascq, temperature])
}
