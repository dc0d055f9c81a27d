//! ZONE MANAGEMENT IN/OUT for zoned drives: REPORT ZONES with the ATA
//! little-endian fields swapped to SCSI order, and the open/close/finish/
//! reset write pointer actions.

use crate::{
    ata::ops,
    device::SatDevice,
    error::Completion,
    passthrough::hacks::ZonedFlavor,
    translator::{
        check_reserved_fields, ensure_identify, feature_not_supported, fill_data_in, good_sense,
        invalid_field, issue_and_sense, sense_from_completion, ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

mod service_action {
    pub const REPORT_ZONES: u8 = 0x00;
    pub const CLOSE_ZONE: u8 = 0x01;
    pub const FINISH_ZONE: u8 = 0x02;
    pub const OPEN_ZONE: u8 = 0x03;
    pub const RESET_WRITE_POINTER: u8 = 0x04;
}

const RESERVED_FIELDS_IN: &[ReservedField] = &[(1, 0xE0)];
const RESERVED_FIELDS_OUT: &[ReservedField] = &[(1, 0xE0), (14, 0xFE)];

fn check_zoned<T: Transport>(device: &mut SatDevice<T>, ctx: &mut ScsiIoCtx) -> Result<()> {
    ensure_identify(device)?;
    if device.flags.zoned == ZonedFlavor::NotZoned {
        return Err(feature_not_supported(device, ctx, "zoned commands"));
    }
    Ok(())
}

pub(crate) fn zone_management_in<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS_IN)?;
    check_zoned(device, ctx)?;

    if ctx.cdb[1] & 0x1F != service_action::REPORT_ZONES {
        return Err(invalid_field(device, ctx, 1, None));
    }

    let zone_start = u64::from_be_bytes(ctx.cdb[2..10].try_into().unwrap());
    let allocation = u32::from_be_bytes(ctx.cdb[10..14].try_into().unwrap());
    let partial = ctx.cdb[14] & 0x80 != 0;
    let reporting_options = ctx.cdb[14] & 0x3F;

    let pages = allocation.div_ceil(512).clamp(1, u16::MAX as u32) as u16;
    let mut ata_options = reporting_options;
    if partial {
        ata_options |= 0x80;
    }

    let mut data = vec![0u8; usize::from(pages) * 512];
    let mut command = ops::report_zones_ext(zone_start, pages, ata_options);
    let completion = device.issue_ata(&mut command, &mut data)?;
    if !completion.is_success() {
        sense_from_completion(device, ctx, &command, completion);
        return Ok(completion);
    }

    let payload = swap_report_zones(&data);
    fill_data_in(ctx, &payload);
    good_sense(device, ctx);
    Ok(Completion::Success)
}

/// ATA REPORT ZONES EXT data is little-endian; SBC wants every multi-byte
/// field big-endian. Header: zone list length (4), then the maximum LBA (8);
/// descriptors: flags in the first two bytes, then length/start/write
/// pointer qwords.
fn swap_report_zones(data: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; data.len()];

    let zone_list_length = u32::from_le_bytes(data[0..4].try_into().unwrap());
    out[0..4].copy_from_slice(&zone_list_length.to_be_bytes());
    out[4] = data[4]; // same-field
    let max_lba = u64::from_le_bytes(data[8..16].try_into().unwrap());
    out[8..16].copy_from_slice(&max_lba.to_be_bytes());

    let mut offset = 64;
    while offset + 64 <= data.len() {
        let descriptor = &data[offset..offset + 64];
        if descriptor.iter().all(|&b| b == 0) {
            break;
        }

        let target = &mut out[offset..offset + 64];
        target[0] = descriptor[0]; // zone type
        target[1] = descriptor[1]; // zone condition, non_seq, reset
        for (field, start) in [(8usize, 8usize), (16, 16), (24, 24)] {
            let value = u64::from_le_bytes(descriptor[start..start + 8].try_into().unwrap());
            target[field..field + 8].copy_from_slice(&value.to_be_bytes());
        }

        offset += 64;
    }

    out
}

pub(crate) fn zone_management_out<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS_OUT)?;
    check_zoned(device, ctx)?;

    let action = ctx.cdb[1] & 0x1F;
    let zone_id = u64::from_be_bytes(ctx.cdb[2..10].try_into().unwrap());
    let all = ctx.cdb[14] & 0x01 != 0;

    let mut command = match action {
        service_action::CLOSE_ZONE => ops::close_zone_ext(zone_id, all),
        service_action::FINISH_ZONE => ops::finish_zone_ext(zone_id, all),
        service_action::OPEN_ZONE => ops::open_zone_ext(zone_id, all),
        service_action::RESET_WRITE_POINTER => ops::reset_write_pointers_ext(zone_id, all),
        _ => return Err(invalid_field(device, ctx, 1, None)),
    };

    issue_and_sense(device, ctx, &mut command, &mut [])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ata::identify::tests::{sample_identify, set_word},
        testing::{ScriptedTransport, Step},
        DataDirection,
    };

    fn zoned_device(steps: Vec<Step>) -> SatDevice<ScriptedTransport> {
        let mut raw = sample_identify();
        set_word(&mut raw, 69, 0x0001); // host aware
        let mut device = SatDevice::new(ScriptedTransport::new(steps));
        device.install_identify(raw);
        device
    }

    #[test]
    fn report_zones_swaps_endianness() {
        let mut ata = vec![0u8; 512];
        ata[0..4].copy_from_slice(&128u32.to_le_bytes());
        ata[8..16].copy_from_slice(&0x1234_5678u64.to_le_bytes());
        // One descriptor: sequential-write-required, zone length 0x100.
        ata[64] = 0x02;
        ata[72..80].copy_from_slice(&0x100u64.to_le_bytes());
        ata[80..88].copy_from_slice(&0x200u64.to_le_bytes());
        ata[88..96].copy_from_slice(&0x210u64.to_le_bytes());

        let mut device = zoned_device(vec![Step::good().data(&ata)]);

        let mut cdb = [0u8; 16];
        cdb[0] = 0x95;
        cdb[10..14].copy_from_slice(&512u32.to_be_bytes());
        let mut data = vec![0u8; 512];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense);

        zone_management_in(&mut device, &mut ctx).unwrap();

        assert_eq!(u32::from_be_bytes(data[0..4].try_into().unwrap()), 128);
        assert_eq!(
            u64::from_be_bytes(data[8..16].try_into().unwrap()),
            0x1234_5678
        );
        assert_eq!(
            u64::from_be_bytes(data[72..80].try_into().unwrap()),
            0x100
        );
        assert_eq!(
            u64::from_be_bytes(data[88..96].try_into().unwrap()),
            0x210
        );

        // The ATA side went out as a 32-byte pass-through CDB.
        let (cdb_sent, _, _) = &device.transport.sent[0];
        assert_eq!(cdb_sent[0], 0x7F);
        assert_eq!(cdb_sent[25], ops::opcode::ZONE_MANAGEMENT_IN);
    }

    #[test]
    fn reset_write_pointer_all() {
        let mut device = zoned_device(vec![Step::good()]);

        let mut cdb = [0u8; 16];
        cdb[0] = 0x94;
        cdb[1] = 0x04;
        cdb[14] = 0x01;
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::None, &mut [], &mut sense);

        zone_management_out(&mut device, &mut ctx).unwrap();

        let (cdb_sent, _, _) = &device.transport.sent[0];
        assert_eq!(cdb_sent[14], ops::opcode::ZONE_MANAGEMENT_OUT);
        assert_eq!(cdb_sent[4], 0x04, "reset write pointers action");
        assert_eq!(cdb_sent[6], 0x01, "ALL bit in the count");
    }

    #[test]
    fn conventional_drive_rejects_zone_commands() {
        let mut device = SatDevice::new(ScriptedTransport::default());
        device.install_identify(sample_identify());

        let mut cdb = [0u8; 16];
        cdb[0] = 0x95;
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut [], &mut sense);

        assert!(zone_management_in(&mut device, &mut ctx).is_err());
    }
}
