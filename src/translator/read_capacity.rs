//! READ CAPACITY 10 and 16, answered from cached identify data.

use crate::{
    device::SatDevice,
    error::Completion,
    passthrough::hacks::ZonedFlavor,
    translator::{
        check_reserved_fields, ensure_identify, fill_data_in, good_sense, ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

const RESERVED_FIELDS_10: &[ReservedField] = &[(1, 0xFF), (6, 0xFF), (7, 0xFF), (8, 0xFE)];

// TODO: re-verify the byte-14 field pointer for the obsolete PMI bit
// against SAT-4; the original translation is ambiguous here.
const RESERVED_FIELDS_16: &[ReservedField] = &[(14, 0xFE), (15, 0xFF)];

pub(crate) fn read_capacity_10<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS_10)?;
    ensure_identify(device)?;

    let max_lba = device.max_lba().saturating_sub(1);
    let block_size = device.logical_block_size();

    let mut payload = [0u8; 8];
    payload[0..4].copy_from_slice(&(max_lba.min(u32::MAX as u64) as u32).to_be_bytes());
    payload[4..8].copy_from_slice(&block_size.to_be_bytes());

    fill_data_in(ctx, &payload);
    good_sense(device, ctx);
    Ok(Completion::Success)
}

pub(crate) fn read_capacity_16<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS_16)?;
    ensure_identify(device)?;

    let max_lba = device.max_lba().saturating_sub(1);
    let block_size = device.logical_block_size();
    let id = device.identify().expect("identify cached");

    let mut payload = [0u8; 32];
    payload[0..8].copy_from_slice(&max_lba.to_be_bytes());
    payload[8..12].copy_from_slice(&block_size.to_be_bytes());

    // RC BASIS: for host-aware/-managed drives the value reflects all zones.
    if device.flags.zoned != ZonedFlavor::NotZoned {
        payload[12] = 0x10;
    }

    payload[13] = id.logical_per_physical_exponent() & 0x0F;

    let lowest_aligned = id.lowest_aligned_lba();
    payload[14] = ((lowest_aligned >> 8) & 0x3F) as u8;
    payload[15] = lowest_aligned as u8;
    if id.supports_trim() {
        payload[14] |= 0x80; // LBPME
        if id.word(69) & (1 << 5) != 0 {
            payload[14] |= 0x40; // LBPRZ
        }
    }

    fill_data_in(ctx, &payload);
    good_sense(device, ctx);
    Ok(Completion::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ata::identify::tests::sample_identify, testing::ScriptedTransport, DataDirection,
    };

    fn ready_device() -> SatDevice<ScriptedTransport> {
        let mut device = SatDevice::new(ScriptedTransport::default());
        device.install_identify(sample_identify());
        device
    }

    #[test]
    fn read_capacity_10_reports_max_lba_and_block_size() {
        let mut device = ready_device();
        let cdb = [0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut data = [0u8; 8];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense);

        read_capacity_10(&mut device, &mut ctx).unwrap();

        assert_eq!(
            u32::from_be_bytes(data[0..4].try_into().unwrap()),
            0x1234_5677
        );
        assert_eq!(u32::from_be_bytes(data[4..8].try_into().unwrap()), 512);
    }

    #[test]
    fn read_capacity_16_sets_provisioning_bits() {
        let mut device = ready_device();
        let cdb = [0x9E, 0x10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 32, 0, 0];
        let mut data = [0u8; 32];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense);

        read_capacity_16(&mut device, &mut ctx).unwrap();

        assert_eq!(
            u64::from_be_bytes(data[0..8].try_into().unwrap()),
            0x1234_5677
        );
        assert_eq!(data[14] & 0x80, 0x80, "LBPME from the TRIM bit");
    }

    #[test]
    fn reserved_bits_rejected() {
        let mut device = ready_device();
        let cdb = [0x25, 0, 0, 0, 0, 0, 0, 0, 0x02, 0];
        let mut data = [0u8; 8];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense);

        assert!(read_capacity_10(&mut device, &mut ctx).is_err());
        assert_eq!(ctx.sense[17], 8, "field pointer at the PMI byte");
    }
}
