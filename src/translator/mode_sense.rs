//! MODE SENSE 6/10. Pages are synthesized from identify data, SET FEATURES
//! state and the EPC power conditions log.

use crate::{
    ata::ops,
    device::SatDevice,
    error::Completion,
    translator::{
        check_reserved_fields, ensure_identify, fill_data_in, good_sense, invalid_field, scsi_op,
        ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

pub(crate) mod page {
    pub const READ_WRITE_ERROR_RECOVERY: u8 = 0x01;
    pub const CACHING: u8 = 0x08;
    pub const CONTROL: u8 = 0x0A;
    pub const POWER_CONDITION: u8 = 0x1A;
    pub const INFORMATIONAL_EXCEPTIONS: u8 = 0x1C;
    pub const ALL: u8 = 0x3F;

    pub const SUBPAGE_CONTROL_EXTENSION: u8 = 0x01;
    pub const SUBPAGE_PATA_CONTROL: u8 = 0xF1;
    pub const SUBPAGE_ATA_POWER_CONDITION: u8 = 0xF1;
    pub const SUBPAGE_NONE: u8 = 0x00;
    pub const SUBPAGE_ALL: u8 = 0xFF;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PageControl {
    Current,
    Changeable,
    Default,
    Saved,
}

/// Timers the EPC log reports for the power condition page, 100 ms units.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct PowerConditionTimers {
    pub idle_a: Option<u32>,
    pub idle_b: Option<u32>,
    pub idle_c: Option<u32>,
    pub standby_y: Option<u32>,
    pub standby_z: Option<u32>,
    pub idle_a_enabled: bool,
    pub idle_b_enabled: bool,
    pub idle_c_enabled: bool,
    pub standby_y_enabled: bool,
    pub standby_z_enabled: bool,
}

const RESERVED_FIELDS_6: &[ReservedField] = &[(1, 0xF7)];
const RESERVED_FIELDS_10: &[ReservedField] = &[(1, 0xE7), (4, 0xFF), (5, 0xFF)];

pub(crate) fn translate<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    let six_byte = ctx.cdb[0] == scsi_op::MODE_SENSE_6;
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

    let disable_block_descriptors = ctx.cdb[1] & 0x08 != 0;
    let page_control = match ctx.cdb[2] >> 6 {
        0 => PageControl::Current,
        1 => PageControl::Changeable,
        2 => PageControl::Default,
        _ => PageControl::Saved,
    };
    let page_code = ctx.cdb[2] & 0x3F;
    let subpage = ctx.cdb[3];

    let mut pages = Vec::new();
    let matched = collect_pages(device, page_code, subpage, page_control, &mut pages);
    if !matched {
        return Err(invalid_field(device, ctx, 2, None));
    }

    let block_descriptor = if disable_block_descriptors {
        Vec::new()
    } else {
        short_block_descriptor(device)
    };

    let payload = if six_byte {
        let mut header = vec![0u8; 4];
        header[1] = 0x00; // medium type
        header[2] = device_specific(device);
        header[3] = block_descriptor.len() as u8;
        header.extend_from_slice(&block_descriptor);
        header.extend_from_slice(&pages);
        let total = header.len() - 1;
        header[0] = total.min(u8::MAX as usize) as u8;
        header
    } else {
        let mut header = vec![0u8; 8];
        header[3] = device_specific(device);
        header[6..8].copy_from_slice(&(block_descriptor.len() as u16).to_be_bytes());
        header.extend_from_slice(&block_descriptor);
        header.extend_from_slice(&pages);
        let total = (header.len() - 2) as u16;
        header[0..2].copy_from_slice(&total.to_be_bytes());
        header
    };

    fill_data_in(ctx, &payload);
    good_sense(device, ctx);
    Ok(Completion::Success)
}

fn device_specific<T: Transport>(device: &SatDevice<T>) -> u8 {
    // WP would go in bit 7; ATA drives behind a SATL report writable.
    let _ = device;
    0
}

fn short_block_descriptor<T: Transport>(device: &SatDevice<T>) -> Vec<u8> {
    let mut descriptor = vec![0u8; 8];
    let blocks = device.max_lba().min(u32::MAX as u64) as u32;
    descriptor[0..4].copy_from_slice(&blocks.to_be_bytes());
    let block_size = device.logical_block_size();
    descriptor[5..8].copy_from_slice(&block_size.to_be_bytes()[1..4]);
    descriptor
}

/// Appends every matching page; returns false when nothing matched.
fn collect_pages<T: Transport>(
    device: &mut SatDevice<T>,
    page_code: u8,
    subpage: u8,
    control: PageControl,
    out: &mut Vec<u8>,
) -> bool {
    let mut matched = false;
    let all = page_code == page::ALL;
    let mut push = |bytes: Vec<u8>| {
        out.extend_from_slice(&bytes);
        matched = true;
    };

    if (all || page_code == page::READ_WRITE_ERROR_RECOVERY)
        && (subpage == page::SUBPAGE_NONE || subpage == page::SUBPAGE_ALL)
    {
        push(read_write_error_recovery(control));
    }
    if (all || page_code == page::CACHING)
        && (subpage == page::SUBPAGE_NONE || subpage == page::SUBPAGE_ALL)
    {
        push(caching(device, control));
    }
    if all || page_code == page::CONTROL {
        if subpage == page::SUBPAGE_NONE || subpage == page::SUBPAGE_ALL {
            push(control_page(device, control));
        }
        if subpage == page::SUBPAGE_CONTROL_EXTENSION || subpage == page::SUBPAGE_ALL {
            push(control_extension(device, control));
        }
        if subpage == page::SUBPAGE_PATA_CONTROL || subpage == page::SUBPAGE_ALL {
            push(pata_control(control));
        }
    }
    if all || page_code == page::POWER_CONDITION {
        if subpage == page::SUBPAGE_NONE || subpage == page::SUBPAGE_ALL {
            push(power_condition(device, control));
        }
        if subpage == page::SUBPAGE_ATA_POWER_CONDITION || subpage == page::SUBPAGE_ALL {
            push(ata_power_condition(device, control));
        }
    }
    if (all || page_code == page::INFORMATIONAL_EXCEPTIONS)
        && (subpage == page::SUBPAGE_NONE || subpage == page::SUBPAGE_ALL)
    {
        push(informational_exceptions(device, control));
    }

    matched
}

fn read_write_error_recovery(control: PageControl) -> Vec<u8> {
    let mut page = vec![0u8; 12];
    page[0] = page::READ_WRITE_ERROR_RECOVERY;
    page[1] = 0x0A;
    if control != PageControl::Changeable {
        page[2] = 0xC0; // AWRE | ARRE, what the drive's own logic does
        page[3] = 0x00; // read retry count is the drive's business
    }
    page
}

fn caching<T: Transport>(device: &SatDevice<T>, control: PageControl) -> Vec<u8> {
    let id = device.identify().expect("identify cached");
    let mut page = vec![0u8; 20];
    page[0] = page::CACHING;
    page[1] = 0x12;

    match control {
        PageControl::Changeable => {
            if id.supports_write_cache() {
                page[2] = 0x04; // WCE
            }
            if id.supports_read_look_ahead() {
                page[12] = 0x20; // DRA
            }
        }
        PageControl::Default => {
            page[2] = if id.supports_write_cache() { 0x04 } else { 0 };
        }
        PageControl::Current | PageControl::Saved => {
            if id.write_cache_enabled() {
                page[2] = 0x04;
            }
            if id.supports_read_look_ahead() && !id.read_look_ahead_enabled() {
                page[12] = 0x20;
            }
        }
    }

    page
}

fn control_page<T: Transport>(device: &SatDevice<T>, control: PageControl) -> Vec<u8> {
    let mut page = vec![0u8; 12];
    page[0] = page::CONTROL;
    page[1] = 0x0A;
    if control == PageControl::Changeable {
        page[2] = 0x04; // D_SENSE is the one thing an initiator can flip
    } else {
        if device.flags.prefer_descriptor_sense {
            page[2] = 0x04;
        }
        page[3] = 0x10; // unrestricted reordering
        page[8..10].copy_from_slice(&0xFFFFu16.to_be_bytes()); // busy timeout
    }
    page
}

fn control_extension<T: Transport>(device: &SatDevice<T>, control: PageControl) -> Vec<u8> {
    let _ = (device, control);
    let mut page = vec![0u8; 32];
    page[0] = 0x40 | page::CONTROL; // SPF
    page[1] = page::SUBPAGE_CONTROL_EXTENSION;
    page[2..4].copy_from_slice(&28u16.to_be_bytes());
    page
}

fn pata_control(control: PageControl) -> Vec<u8> {
    let _ = control;
    let mut page = vec![0u8; 8];
    page[0] = 0x40 | page::CONTROL;
    page[1] = page::SUBPAGE_PATA_CONTROL;
    page[2..4].copy_from_slice(&4u16.to_be_bytes());
    page
}

fn power_condition<T: Transport>(device: &mut SatDevice<T>, control: PageControl) -> Vec<u8> {
    let mut page = vec![0u8; 40];
    page[0] = page::POWER_CONDITION;
    page[1] = 0x26;

    if control == PageControl::Changeable {
        let epc = device
            .identify()
            .map(|id| id.supports_epc())
            .unwrap_or(false);
        if epc {
            page[2] = 0x01; // standby_y
            page[3] = 0x0F; // idle_a/b/c, standby_z
            for timer in page[4..24].chunks_mut(4) {
                timer.copy_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
            }
        }
        return page;
    }

    let timers = read_power_condition_timers(device);
    if timers.standby_y_enabled {
        page[2] |= 0x01;
    }
    if timers.standby_z_enabled {
        page[3] |= 0x01;
    }
    if timers.idle_a_enabled {
        page[3] |= 0x02;
    }
    if timers.idle_b_enabled {
        page[3] |= 0x04;
    }
    if timers.idle_c_enabled {
        page[3] |= 0x08;
    }
    page[4..8].copy_from_slice(&timers.idle_a.unwrap_or(0).to_be_bytes());
    page[8..12].copy_from_slice(&timers.standby_z.unwrap_or(0).to_be_bytes());
    page[12..16].copy_from_slice(&timers.idle_b.unwrap_or(0).to_be_bytes());
    page[16..20].copy_from_slice(&timers.idle_c.unwrap_or(0).to_be_bytes());
    page[20..24].copy_from_slice(&timers.standby_y.unwrap_or(0).to_be_bytes());

    page
}

/// One condition descriptor inside the ATA Power Conditions log.
fn parse_condition(raw: &[u8]) -> (bool, Option<u32>) {
    if raw.len() < 16 || raw[0] & 0x80 == 0 {
        return (false, None);
    }
    let enabled = raw[0] & 0x04 != 0;
    let timer = u32::from_le_bytes(raw[12..16].try_into().unwrap());
    (enabled, Some(timer))
}

pub(crate) fn read_power_condition_timers<T: Transport>(
    device: &mut SatDevice<T>,
) -> PowerConditionTimers {
    let mut timers = PowerConditionTimers::default();

    let epc = device
        .identify()
        .map(|id| id.supports_epc() && id.supports_gpl())
        .unwrap_or(false);
    if !epc {
        return timers;
    }

    let mut idle = [0u8; 512];
    let mut command = ops::read_log_ext(ops::log_address::POWER_CONDITIONS, 0, 1, false);
    if matches!(device.issue_ata(&mut command, &mut idle), Ok(c) if c.is_success()) {
        (timers.idle_a_enabled, timers.idle_a) = parse_condition(&idle[0..64]);
        (timers.idle_b_enabled, timers.idle_b) = parse_condition(&idle[64..128]);
        (timers.idle_c_enabled, timers.idle_c) = parse_condition(&idle[128..192]);
    }

    let mut standby = [0u8; 512];
    let mut command = ops::read_log_ext(ops::log_address::POWER_CONDITIONS, 1, 1, false);
    if matches!(device.issue_ata(&mut command, &mut standby), Ok(c) if c.is_success()) {
        (timers.standby_y_enabled, timers.standby_y) = parse_condition(&standby[384..448]);
        (timers.standby_z_enabled, timers.standby_z) = parse_condition(&standby[448..512]);
    }

    timers
}

fn ata_power_condition<T: Transport>(device: &SatDevice<T>, control: PageControl) -> Vec<u8> {
    let id = device.identify().expect("identify cached");
    let mut page = vec![0u8; 16];
    page[0] = 0x40 | page::POWER_CONDITION;
    page[1] = page::SUBPAGE_ATA_POWER_CONDITION;
    page[2..4].copy_from_slice(&12u16.to_be_bytes());

    if control == PageControl::Changeable {
        if id.supports_apm() {
            page[5] = 0x01; // APMP
            page[6] = 0xFF;
        }
    } else if id.apm_enabled() {
        page[5] = 0x01;
        page[6] = id.apm_level();
    }

    page
}

fn informational_exceptions<T: Transport>(device: &SatDevice<T>, control: PageControl) -> Vec<u8> {
    let id = device.identify().expect("identify cached");
    let mut page = vec![0u8; 12];
    page[0] = page::INFORMATIONAL_EXCEPTIONS;
    page[1] = 0x0A;

    if control == PageControl::Changeable {
        page[2] = 0x08; // DEXCPT
        return page;
    }

    if !id.smart_enabled() {
        page[2] = 0x08;
    }
    page[3] = 0x06; // MRIE: on request

    page
}
