//! INQUIRY: the standard page built from identify data, and the vital
//! product data pages the translation layer emits.

use crate::{
    ata::{identify::IdentifyDevice, ops, ZonedKind},
    device::SatDevice,
    error::Completion,
    passthrough::hacks::ZonedFlavor,
    translator::{
        check_reserved_fields, ensure_identify, fill_data_in, good_sense, invalid_field,
        ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

pub const T10_VENDOR_ID: &[u8; 8] = b"ATA     ";
const PRODUCT_ID_SATL: &[u8; 16] = b"satlr           ";
const PRODUCT_REVISION_SATL: &[u8; 4] = b"0100";

/// SPC version descriptors reported in the standard page.
mod version_descriptor {
    pub const SAM_6: u16 = 0x00C0;
    pub const SPC_5: u16 = 0x05C0;
    pub const SBC_4: u16 = 0x0600;
    pub const ZBC: u16 = 0x0624;
    pub const SAT_4: u16 = 0x1F00;
    pub const ACS_2: u16 = 0x1761;
    pub const ACS_3: u16 = 0x1765;
    pub const ACS_4: u16 = 0x1767;
}

mod vpd_page {
    pub const SUPPORTED_PAGES: u8 = 0x00;
    pub const UNIT_SERIAL_NUMBER: u8 = 0x80;
    pub const DEVICE_IDENTIFICATION: u8 = 0x83;
    pub const EXTENDED_INQUIRY: u8 = 0x86;
    pub const MODE_PAGE_POLICY: u8 = 0x87;
    pub const ATA_INFORMATION: u8 = 0x89;
    pub const POWER_CONDITION: u8 = 0x8A;
    pub const BLOCK_LIMITS: u8 = 0xB0;
    pub const BLOCK_DEVICE_CHARACTERISTICS: u8 = 0xB1;
    pub const LOGICAL_BLOCK_PROVISIONING: u8 = 0xB2;
    pub const ZONED_BLOCK_DEVICE_CHARACTERISTICS: u8 = 0xB6;
}

const RESERVED_FIELDS: &[ReservedField] = &[(1, 0xFE)];

pub(crate) fn translate<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS)?;

    let evpd = ctx.cdb[1] & 0x01 != 0;
    let page_code = ctx.cdb[2];
    if !evpd && page_code != 0 {
        return Err(invalid_field(device, ctx, 2, None));
    }

    ensure_identify(device)?;

    let payload = if evpd {
        vpd_page(device, page_code, ctx)?
    } else {
        standard_inquiry(device)
    };

    fill_data_in(ctx, &payload);
    good_sense(device, ctx);
    Ok(Completion::Success)
}

fn identify<'a, T: Transport>(device: &'a SatDevice<T>) -> &'a IdentifyDevice {
    // ensure_identify ran first on every path into this module.
    device.identify().expect("identify data cached")
}

fn peripheral_device_type<T: Transport>(device: &SatDevice<T>) -> u8 {
    if identify(device).is_packet_device() {
        0x05
    } else if device.flags.zoned == ZonedFlavor::DeviceManaged {
        0x14
    } else {
        0x00
    }
}

fn standard_inquiry<T: Transport>(device: &SatDevice<T>) -> Vec<u8> {
    let mut page = vec![0u8; 96];

    page[0] = peripheral_device_type(device);
    if identify(device).is_removable() {
        page[1] = 0x80;
    }
    page[2] = 0x07; // SPC-5
    page[3] = 0x02; // response data format
    page[4] = (page.len() - 5) as u8;
    page[7] = 0x02; // CMDQUE, as far as a single-LUN SATL is concerned

    page[8..16].copy_from_slice(T10_VENDOR_ID);
    copy_padded(&mut page[16..32], identify(device).model_number().as_bytes());
    copy_padded(
        &mut page[32..36],
        product_revision(&identify(device).firmware_revision()).as_bytes(),
    );
    copy_padded(
        &mut page[36..56],
        identify(device).serial_number().as_bytes(),
    );

    let mut descriptors = vec![
        version_descriptor::SAM_6,
        version_descriptor::SAT_4,
        version_descriptor::SPC_5,
        version_descriptor::SBC_4,
    ];
    if device.flags.zoned != ZonedFlavor::NotZoned {
        descriptors.push(version_descriptor::ZBC);
    }
    descriptors.push(ata_version_descriptor(identify(device)));

    for (slot, descriptor) in descriptors.iter().enumerate().take(8) {
        page[58 + slot * 2..60 + slot * 2].copy_from_slice(&descriptor.to_be_bytes());
    }

    page
}

/// The last four significant characters of the eight-character ATA
/// firmware revision.
fn product_revision(firmware: &str) -> String {
    let trimmed = firmware.trim();
    if trimmed.len() > 4 {
        trimmed[trimmed.len() - 4..].to_string()
    } else {
        format!("{trimmed:<4}")
    }
}

fn ata_version_descriptor(id: &IdentifyDevice) -> u16 {
    let major = id.major_version();
    if major == 0 || major == 0xFFFF {
        return 0;
    }

    // Highest supported major version wins.
    match 15 - major.leading_zeros() as u16 {
        12.. => version_descriptor::ACS_4,
        11 => version_descriptor::ACS_3,
        _ => version_descriptor::ACS_2,
    }
}

fn vpd_page<T: Transport>(
    device: &mut SatDevice<T>,
    page_code: u8,
    ctx: &mut ScsiIoCtx,
) -> Result<Vec<u8>> {
    let payload = match page_code {
        vpd_page::SUPPORTED_PAGES => supported_pages(device),
        vpd_page::UNIT_SERIAL_NUMBER => unit_serial_number(device),
        vpd_page::DEVICE_IDENTIFICATION => device_identification(device),
        vpd_page::EXTENDED_INQUIRY => extended_inquiry(device),
        vpd_page::MODE_PAGE_POLICY => mode_page_policy(device),
        vpd_page::ATA_INFORMATION => ata_information(device),
        vpd_page::POWER_CONDITION => power_condition(device),
        vpd_page::BLOCK_LIMITS => block_limits(device),
        vpd_page::BLOCK_DEVICE_CHARACTERISTICS => block_device_characteristics(device),
        vpd_page::LOGICAL_BLOCK_PROVISIONING => logical_block_provisioning(device),
        vpd_page::ZONED_BLOCK_DEVICE_CHARACTERISTICS
            if device.flags.zoned != ZonedFlavor::NotZoned =>
        {
            zoned_characteristics(device)
        }
        _ => return Err(invalid_field(device, ctx, 2, None)),
    };

    Ok(payload)
}

fn page_header<T: Transport>(device: &SatDevice<T>, code: u8, body_length: usize) -> Vec<u8> {
    let mut page = Vec::with_capacity(4 + body_length);
    page.push(peripheral_device_type(device));
    page.push(code);
    page.extend_from_slice(&(body_length as u16).to_be_bytes());
    page
}

fn supported_pages<T: Transport>(device: &SatDevice<T>) -> Vec<u8> {
    let mut codes = vec![
        vpd_page::SUPPORTED_PAGES,
        vpd_page::UNIT_SERIAL_NUMBER,
        vpd_page::DEVICE_IDENTIFICATION,
        vpd_page::EXTENDED_INQUIRY,
        vpd_page::MODE_PAGE_POLICY,
        vpd_page::ATA_INFORMATION,
        vpd_page::POWER_CONDITION,
        vpd_page::BLOCK_LIMITS,
        vpd_page::BLOCK_DEVICE_CHARACTERISTICS,
        vpd_page::LOGICAL_BLOCK_PROVISIONING,
    ];
    if device.flags.zoned != ZonedFlavor::NotZoned {
        codes.push(vpd_page::ZONED_BLOCK_DEVICE_CHARACTERISTICS);
    }

    let mut page = page_header(device, vpd_page::SUPPORTED_PAGES, codes.len());
    page.extend_from_slice(&codes);
    page
}

fn unit_serial_number<T: Transport>(device: &SatDevice<T>) -> Vec<u8> {
    let serial = identify(device).serial_number();
    let mut body = vec![b' '; 20];
    copy_padded(&mut body, serial.as_bytes());

    let mut page = page_header(device, vpd_page::UNIT_SERIAL_NUMBER, body.len());
    page.extend_from_slice(&body);
    page
}

fn device_identification<T: Transport>(device: &SatDevice<T>) -> Vec<u8> {
    let id = identify(device);
    let mut body = Vec::new();

    if id.supports_wwn() {
        let wwn = id.world_wide_name();

        // NAA identifier, binary, LU association.
        body.extend_from_slice(&[0x01, 0x03, 0x00, 0x08]);
        body.extend_from_slice(&wwn.to_be_bytes());

        // SCSI name string, UTF-8: "naa." + 16 hex digits.
        let name = format!("naa.{wwn:016X}");
        let padded_length = name.len().div_ceil(4) * 4;
        body.extend_from_slice(&[0x03, 0x08, 0x00, padded_length as u8]);
        body.extend_from_slice(name.as_bytes());
        body.resize(body.len() + padded_length - name.len(), 0);
    }

    // T10 vendor identification: vendor + model + serial.
    let mut vendor_identifier = Vec::with_capacity(68);
    vendor_identifier.extend_from_slice(T10_VENDOR_ID);
    let mut model = vec![b' '; 40];
    copy_padded(&mut model, id.model_number().as_bytes());
    vendor_identifier.extend_from_slice(&model);
    let mut serial = vec![b' '; 20];
    copy_padded(&mut serial, id.serial_number().as_bytes());
    vendor_identifier.extend_from_slice(&serial);

    body.extend_from_slice(&[0x02, 0x01, 0x00, vendor_identifier.len() as u8]);
    body.extend_from_slice(&vendor_identifier);

    let mut page = page_header(device, vpd_page::DEVICE_IDENTIFICATION, body.len());
    page.extend_from_slice(&body);
    page
}

fn extended_inquiry<T: Transport>(device: &SatDevice<T>) -> Vec<u8> {
    let mut body = vec![0u8; 60];
    // ACTIVATE_MICROCODE: new microcode takes effect after hard reset.
    body[0] = 0x01 << 6;
    // LUICLR: sense data is cleared per I_T nexus.
    body[3] = 0x01;
    if identify(device).sense_data_reporting_enabled() {
        body[4] = 0x01; // HSSRELEF placeholder space kept zero; D_SENSE via mode page
    }

    let mut page = page_header(device, vpd_page::EXTENDED_INQUIRY, body.len());
    page.extend_from_slice(&body);
    page
}

fn mode_page_policy<T: Transport>(device: &SatDevice<T>) -> Vec<u8> {
    // One descriptor: every page, policy = shared.
    let body = [0x3F, 0xFF, 0x00, 0x00];

    let mut page = page_header(device, vpd_page::MODE_PAGE_POLICY, body.len());
    page.extend_from_slice(&body);
    page
}

fn ata_information<T: Transport>(device: &SatDevice<T>) -> Vec<u8> {
    let id = identify(device);
    let mut body = vec![0u8; 568];

    copy_padded(&mut body[4..12], T10_VENDOR_ID);
    copy_padded(&mut body[12..28], PRODUCT_ID_SATL);
    copy_padded(&mut body[28..32], PRODUCT_REVISION_SATL);

    // Device signature: the real registers from the most recent IDENTIFY
    // when we have them, else the dummy signature the SATA spec defines.
    let last = device.last_command_rtfrs();
    let signature = &mut body[32..52];
    if last.status != 0 {
        signature[0] = last.status;
        signature[1] = last.count;
        signature[2] = last.lba_low;
        signature[3] = last.lba_mid;
        signature[4] = last.lba_hi;
        signature[5] = last.device;
    } else if id.is_packet_device() {
        signature[..5].copy_from_slice(&[0x00, 0x01, 0x01, 0x14, 0xEB]);
    } else if id.zoned_kind() == ZonedKind::HostAware
        || device.flags.zoned == ZonedFlavor::DeviceManaged
    {
        signature[..5].copy_from_slice(&[0x50, 0x01, 0x01, 0xCD, 0xAB]);
    } else {
        signature[..5].copy_from_slice(&[0x50, 0x01, 0x01, 0x00, 0x00]);
    }

    // The command we fetch identify data with.
    body[52] = if id.is_packet_device() {
        ops::opcode::IDENTIFY_PACKET
    } else {
        ops::opcode::IDENTIFY
    };
    body[56..568].copy_from_slice(id.raw());

    let mut page = page_header(device, vpd_page::ATA_INFORMATION, body.len());
    page.extend_from_slice(&body);
    page
}

fn power_condition<T: Transport>(device: &SatDevice<T>) -> Vec<u8> {
    let id = identify(device);
    let mut body = vec![0u8; 14];

    if id.supports_epc() {
        body[0] = 0x03; // standby_y, standby_z
        body[1] = 0x07; // idle_a, idle_b, idle_c
    } else if id.supports_apm() {
        body[0] = 0x01;
        body[1] = 0x01;
    }

    let mut page = page_header(device, vpd_page::POWER_CONDITION, body.len());
    page.extend_from_slice(&body);
    page
}

fn block_limits<T: Transport>(device: &SatDevice<T>) -> Vec<u8> {
    let id = identify(device);
    let mut body = vec![0u8; 60];

    // Maximum transfer length in logical blocks: one 48-bit command.
    body[4..8].copy_from_slice(&65536u32.to_be_bytes());
    // Optimal transfer: 128 blocks fits every 28-bit path comfortably.
    body[8..12].copy_from_slice(&128u32.to_be_bytes());

    if id.supports_trim() {
        let ranges_per_block = 64u64;
        let dsm_blocks = u64::from(id.dsm_max_blocks().max(1));
        let max_lba_count = dsm_blocks * ranges_per_block * 65535;
        body[16..20].copy_from_slice(&(max_lba_count.min(u32::MAX as u64) as u32).to_be_bytes());
        // One descriptor per range entry.
        body[20..24].copy_from_slice(&((dsm_blocks * ranges_per_block) as u32).to_be_bytes());
        body[24..28].copy_from_slice(&1u32.to_be_bytes()); // granularity
    }

    // Maximum write same length: bounded by one 48-bit command.
    body[36..44].copy_from_slice(&65536u64.to_be_bytes());

    let mut page = page_header(device, vpd_page::BLOCK_LIMITS, body.len());
    page.extend_from_slice(&body);
    page
}

fn block_device_characteristics<T: Transport>(device: &SatDevice<T>) -> Vec<u8> {
    let id = identify(device);
    let mut body = vec![0u8; 60];

    body[0..2].copy_from_slice(&id.rotation_rate().to_be_bytes());
    body[3] = id.form_factor() & 0x0F;
    if id.zoned_kind() == ZonedKind::HostAware {
        body[4] = 0x01 << 4;
    }

    let mut page = page_header(device, vpd_page::BLOCK_DEVICE_CHARACTERISTICS, body.len());
    page.extend_from_slice(&body);
    page
}

fn logical_block_provisioning<T: Transport>(device: &SatDevice<T>) -> Vec<u8> {
    let id = identify(device);
    let mut body = vec![0u8; 4];

    if id.supports_trim() {
        body[1] = 0x80; // LBPU
        if id.word(69) & (1 << 5) != 0 {
            body[1] |= 0x04; // LBPRZ: deterministic read zero after trim
        }
        body[2] = 0x02; // provisioning type: thin
    }

    let mut page = page_header(device, vpd_page::LOGICAL_BLOCK_PROVISIONING, body.len());
    page.extend_from_slice(&body);
    page
}

fn zoned_characteristics<T: Transport>(device: &mut SatDevice<T>) -> Vec<u8> {
    let mut body = vec![0u8; 60];

    // Zone counts live in the Zoned Device Information log.
    let mut log = [0u8; 512];
    let mut command = ops::read_log_ext(ops::log_address::ZONED_DEVICE_INFORMATION, 0, 1, false);
    if let Ok(completion) = device.issue_ata(&mut command, &mut log) {
        if completion.is_success() {
            // Qword 1: zoned device capabilities (URSWRZ in bit 0).
            body[0] = log[8] & 0x01;
            // Qwords 3/4: optimal open / non-sequential resources.
            body[4..8].copy_from_slice(&[log[27], log[26], log[25], log[24]]);
            body[8..12].copy_from_slice(&[log[35], log[34], log[33], log[32]]);
            // Qword 5: maximum number of open zones.
            body[16..20].copy_from_slice(&[log[43], log[42], log[41], log[40]]);
        }
    }

    let mut page = page_header(
        device,
        vpd_page::ZONED_BLOCK_DEVICE_CHARACTERISTICS,
        body.len(),
    );
    page.extend_from_slice(&body);
    page
}

fn copy_padded(target: &mut [u8], source: &[u8]) {
    target.fill(b' ');
    let length = usize::min(target.len(), source.len());
    target[..length].copy_from_slice(&source[..length]);
}
