//! SECURITY PROTOCOL IN/OUT. Protocol EFh is the ATA Security feature set
//! translated to its dedicated commands; everything else rides Trusted
//! Send/Receive. Protocol 00h answers are fixed up so ATA Security shows up
//! as discoverable, with ATA's little-endian fields swapped to SCSI order.

use crate::{
    ata::ops,
    device::SatDevice,
    error::Completion,
    translator::{
        check_reserved_fields, ensure_identify, feature_not_supported, fill_data_in, good_sense,
        invalid_field, issue_and_sense, issue_with_ctx_data, scsi_op, sense_from_completion,
        ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

pub const PROTOCOL_INFORMATION: u8 = 0x00;
pub const PROTOCOL_ATA_SECURITY: u8 = 0xEF;

/// Security-protocol-specific values for protocol EFh, from SAT-4.
mod ata_security_page {
    pub const INFORMATION: u16 = 0x0000;
    pub const SET_PASSWORD: u16 = 0x0001;
    pub const UNLOCK: u16 = 0x0002;
    pub const ERASE_PREPARE: u16 = 0x0003;
    pub const ERASE_UNIT: u16 = 0x0004;
    pub const FREEZE_LOCK: u16 = 0x0005;
    pub const DISABLE_PASSWORD: u16 = 0x0006;
}

const RESERVED_FIELDS: &[ReservedField] = &[(4, 0x7F), (5, 0xFF), (10, 0xFF)];

struct Request {
    reading: bool,
    protocol: u8,
    specific: u16,
    inc_512: bool,
    length: u32,
}

pub(crate) fn translate<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS)?;
    ensure_identify(device)?;

    let request = Request {
        reading: ctx.cdb[0] == scsi_op::SECURITY_PROTOCOL_IN,
        protocol: ctx.cdb[1],
        specific: u16::from_be_bytes(ctx.cdb[2..4].try_into().unwrap()),
        inc_512: ctx.cdb[4] & 0x80 != 0,
        length: u32::from_be_bytes(ctx.cdb[6..10].try_into().unwrap()),
    };

    let byte_length = if request.inc_512 {
        request.length.saturating_mul(512)
    } else {
        request.length
    };
    if !request.inc_512 && byte_length % 512 != 0 && request.protocol != PROTOCOL_ATA_SECURITY {
        // Trusted transfers move whole 512-byte increments.
        return Err(invalid_field(device, ctx, 6, None));
    }

    match request.protocol {
        PROTOCOL_ATA_SECURITY => ata_security(device, ctx, &request),
        PROTOCOL_INFORMATION if request.reading => {
            protocol_information(device, ctx, &request, byte_length)
        }
        _ => trusted_transfer(device, ctx, &request, byte_length),
    }
}

fn ata_security<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    request: &Request,
) -> Result<Completion> {
    let supports_security = device
        .identify()
        .map(|id| id.supports_security())
        .unwrap_or(false);
    if !supports_security {
        return Err(feature_not_supported(device, ctx, "ATA security"));
    }

    if request.reading {
        if request.specific != ata_security_page::INFORMATION {
            return Err(invalid_field(device, ctx, 2, None));
        }

        // Security state summary straight from identify word 128.
        let id = device.identify().expect("identify cached");
        let word = id.word(128);
        let mut page = [0u8; 16];
        page[1] = 14;
        page[2] = (word & 0x0001) as u8; // supported
        page[3] = ((word >> 1) & 0x01) as u8; // enabled
        page[4] = ((word >> 2) & 0x01) as u8; // locked
        page[5] = ((word >> 3) & 0x01) as u8; // frozen
        page[6] = ((word >> 4) & 0x01) as u8; // count expired
        page[7] = ((word >> 5) & 0x01) as u8; // enhanced erase supported
        fill_data_in(ctx, &page);
        good_sense(device, ctx);
        return Ok(Completion::Success);
    }

    let mut command = match request.specific {
        ata_security_page::SET_PASSWORD => ops::security_set_password(),
        ata_security_page::UNLOCK => ops::security_unlock(),
        ata_security_page::ERASE_PREPARE => ops::security_erase_prepare(),
        ata_security_page::ERASE_UNIT => ops::security_erase_unit(),
        ata_security_page::FREEZE_LOCK => ops::security_freeze_lock(),
        ata_security_page::DISABLE_PASSWORD => ops::security_disable_password(),
        _ => return Err(invalid_field(device, ctx, 2, None)),
    };

    if command.direction.is_data_transfer() {
        issue_with_ctx_data(device, ctx, &mut command)
    } else {
        issue_and_sense(device, ctx, &mut command, &mut [])
    }
}

fn protocol_information<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    request: &Request,
    byte_length: u32,
) -> Result<Completion> {
    let trusted = device
        .identify()
        .map(|id| id.supports_trusted_computing())
        .unwrap_or(false);

    if request.specific == 0 {
        // Supported protocols list. Ask the drive when it does TCG, then
        // make sure ATA security is discoverable either way.
        let mut protocols = vec![PROTOCOL_INFORMATION];
        if trusted {
            let blocks = 1u16;
            let mut data = vec![0u8; 512];
            let mut command = ops::trusted_receive(0, 0, blocks, false);
            if matches!(device.issue_ata(&mut command, &mut data), Ok(c) if c.is_success()) {
                // ATA keeps the list length little-endian at bytes 6..8.
                let count = usize::from(u16::from_le_bytes([data[6], data[7]]));
                for &p in data[8..].iter().take(count) {
                    if p != PROTOCOL_INFORMATION {
                        protocols.push(p);
                    }
                }
            }
        }
        if !protocols.contains(&PROTOCOL_ATA_SECURITY) {
            protocols.push(PROTOCOL_ATA_SECURITY);
        }

        let mut page = vec![0u8; 8];
        page[6..8].copy_from_slice(&(protocols.len() as u16).to_be_bytes());
        page.extend_from_slice(&protocols);
        fill_data_in(ctx, &page);
        good_sense(device, ctx);
        return Ok(Completion::Success);
    }

    // Certificate and compliance pages pass through, with their length
    // fields swapped from ATA little-endian to SCSI big-endian.
    if !trusted {
        return Err(feature_not_supported(device, ctx, "trusted computing"));
    }

    let blocks = byte_length.div_ceil(512).min(u16::MAX as u32) as u16;
    let mut data = vec![0u8; usize::from(blocks) * 512];
    let mut command = ops::trusted_receive(0, request.specific, blocks, false);
    let completion = device.issue_ata(&mut command, &mut data)?;
    if !completion.is_success() {
        sense_from_completion(device, ctx, &command, completion);
        return Ok(completion);
    }

    data.swap(2, 3);
    fill_data_in(ctx, &data);
    good_sense(device, ctx);
    Ok(Completion::Success)
}

fn trusted_transfer<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
    request: &Request,
    byte_length: u32,
) -> Result<Completion> {
    let trusted = device
        .identify()
        .map(|id| id.supports_trusted_computing())
        .unwrap_or(false);
    if !trusted {
        return Err(feature_not_supported(device, ctx, "trusted computing"));
    }

    if byte_length == 0 {
        let mut command = ops::trusted_non_data(request.protocol, request.specific);
        return issue_and_sense(device, ctx, &mut command, &mut []);
    }

    let blocks = byte_length.div_ceil(512).min(u16::MAX as u32) as u16;
    let mut command = if request.reading {
        ops::trusted_receive(request.protocol, request.specific, blocks, false)
    } else {
        ops::trusted_send(request.protocol, request.specific, blocks, false)
    };

    issue_with_ctx_data(device, ctx, &mut command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ata::identify::tests::{sample_identify, set_word},
        testing::{ScriptedTransport, Step},
        DataDirection,
    };

    fn secure_identify() -> [u8; 512] {
        let mut raw = sample_identify();
        set_word(&mut raw, 48, 0x0001); // trusted computing
        set_word(&mut raw, 128, 0x0021); // security supported, enhanced erase
        raw
    }

    fn in_cdb(protocol: u8, specific: u16, length: u32) -> [u8; 12] {
        let specific = specific.to_be_bytes();
        let length = length.to_be_bytes();
        [
            0xA2,
            protocol,
            specific[0],
            specific[1],
            0,
            0,
            length[0],
            length[1],
            length[2],
            length[3],
            0,
            0,
        ]
    }

    #[test]
    fn protocol_list_always_advertises_ata_security() {
        let mut list = vec![0u8; 512];
        list[7] = 1;
        list[8] = 0x01; // drive only knows TCG protocol 1

        let mut device = SatDevice::new(ScriptedTransport::new([Step::good().data(&list)]));
        device.install_identify(secure_identify());

        let cdb = in_cdb(0, 0, 512);
        let mut data = [0u8; 64];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense);

        translate(&mut device, &mut ctx).unwrap();

        let count = usize::from(u16::from_be_bytes([data[6], data[7]]));
        let listed = &data[8..8 + count];
        assert!(listed.contains(&0x00));
        assert!(listed.contains(&0x01));
        assert!(listed.contains(&PROTOCOL_ATA_SECURITY));
    }

    #[test]
    fn ata_security_freeze_lock_maps_to_the_dedicated_command() {
        let mut device = SatDevice::new(ScriptedTransport::new([Step::good()]));
        device.install_identify(secure_identify());

        let specific = ata_security_page::FREEZE_LOCK.to_be_bytes();
        let cdb: [u8; 12] = [
            0xB5, 0xEF, specific[0], specific[1], 0, 0, 0, 0, 0, 0, 0, 0,
        ];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::None, &mut [], &mut sense);

        translate(&mut device, &mut ctx).unwrap();

        let (cdb_sent, _, _) = &device.transport.sent[0];
        assert_eq!(cdb_sent[9], ops::opcode::SECURITY_FREEZE_LOCK);
    }

    #[test]
    fn security_state_page_reads_identify_word_128() {
        let mut device = SatDevice::new(ScriptedTransport::default());
        device.install_identify(secure_identify());

        let cdb = in_cdb(0xEF, 0, 16);
        let mut data = [0u8; 16];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::FromDevice, &mut data, &mut sense);

        translate(&mut device, &mut ctx).unwrap();

        assert_eq!(data[2], 1, "security supported");
        assert_eq!(data[3], 0, "not enabled");
        assert_eq!(data[7], 1, "enhanced erase");
        assert!(device.transport.sent.is_empty(), "answered from identify");
    }

    #[test]
    fn trusted_send_carries_the_payload() {
        let mut device = SatDevice::new(ScriptedTransport::new([Step::good()]));
        device.install_identify(secure_identify());

        let cdb: [u8; 12] = [0xB5, 0x01, 0x00, 0x01, 0x80, 0, 0, 0, 0, 1, 0, 0];
        let mut data = vec![0x5Au8; 512];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::ToDevice, &mut data, &mut sense);

        translate(&mut device, &mut ctx).unwrap();

        let (cdb_sent, _, payload) = &device.transport.sent[0];
        assert_eq!(cdb_sent[9], ops::opcode::TRUSTED_SEND);
        assert_eq!(payload.len(), 512);
    }
}
