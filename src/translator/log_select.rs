//! LOG SELECT. The application client page is the only writable one; its
//! parameters live in the ATA host vendor logs 90h..9Fh.

use crate::{
    ata::ops,
    device::SatDevice,
    error::Completion,
    translator::{
        check_reserved_fields, ensure_identify, feature_not_supported, good_sense, invalid_field,
        invalid_parameter_field, log_sense::log_page, sense_from_completion, ReservedField,
    },
    transport::{ScsiIoCtx, Transport},
    Result,
};

const RESERVED_FIELDS: &[ReservedField] = &[(1, 0xFC), (4, 0xFF), (5, 0xFF), (6, 0xFF)];

pub(crate) fn translate<T: Transport>(
    device: &mut SatDevice<T>,
    ctx: &mut ScsiIoCtx,
) -> Result<Completion> {
    check_reserved_fields(device, ctx, RESERVED_FIELDS)?;
    ensure_identify(device)?;

    let parameter_code_reset = ctx.cdb[1] & 0x02 != 0;
    let page_code = ctx.cdb[2] & 0x3F;
    let parameter_length = usize::from(u16::from_be_bytes(ctx.cdb[7..9].try_into().unwrap()));

    if page_code != 0 && page_code != log_page::APPLICATION_CLIENT {
        return Err(invalid_field(device, ctx, 2, None));
    }
    if !device.flags.host_vendor_logs_supported {
        return Err(feature_not_supported(device, ctx, "host vendor logs"));
    }

    if parameter_code_reset {
        // Zero the parameter headers across every backing log page.
        let zeros = &mut [0u8; 512];
        for log in ops::log_address::HOST_VENDOR_FIRST..=ops::log_address::HOST_VENDOR_LAST {
            for page in 0..16u16 {
                let mut command = ops::write_log_ext(log, page, 1);
                let completion = device.issue_ata(&mut command, zeros)?;
                if !completion.is_success() {
                    sense_from_completion(device, ctx, &command, completion);
                    return Ok(completion);
                }
            }
        }
        good_sense(device, ctx);
        return Ok(Completion::Success);
    }

    if parameter_length == 0 {
        good_sense(device, ctx);
        return Ok(Completion::Success);
    }
    if parameter_length > ctx.data.len() {
        return Err(invalid_parameter_field(device, ctx, 0, None));
    }

    // Parameters arrive as (code, control, length, data); each 252-byte
    // parameter maps to half a host vendor log page.
    let mut offset = 0usize;
    while offset + 4 <= parameter_length {
        let code = u16::from_be_bytes([ctx.data[offset], ctx.data[offset + 1]]);
        let length = usize::from(ctx.data[offset + 3]);
        if code >= 512 || length != 252 || offset + 4 + length > parameter_length {
            return Err(invalid_parameter_field(device, ctx, offset as u16, None));
        }

        let log = ops::log_address::HOST_VENDOR_FIRST + (code / 32) as u8;
        let page = (code % 32) / 2;
        let half = usize::from(code % 2) * 256;

        // Read-modify-write the 512-byte page around this parameter.
        let mut page_data = [0u8; 512];
        let mut read = ops::read_log_ext(log, page, 1, false);
        let completion = device.issue_ata(&mut read, &mut page_data)?;
        if !completion.is_success() {
            sense_from_completion(device, ctx, &read, completion);
            return Ok(completion);
        }

        page_data[half..half + 4].copy_from_slice(&ctx.data[offset..offset + 4]);
        page_data[half + 4..half + 256]
            .copy_from_slice(&ctx.data[offset + 4..offset + 4 + 252]);

        let mut write = ops::write_log_ext(log, page, 1);
        let completion = device.issue_ata(&mut write, &mut page_data)?;
        if !completion.is_success() {
            sense_from_completion(device, ctx, &write, completion);
            return Ok(completion);
        }

        offset += 4 + length;
    }

    good_sense(device, ctx);
    Ok(Completion::Success)
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
    fn write_updates_the_backing_log_page() {
        let mut device = SatDevice::new(ScriptedTransport::new([Step::good(), Step::good()]));
        device.install_identify(sample_identify());
        device.flags.host_vendor_logs_supported = true;

        // One parameter, code 3: log 90h page 1, second half.
        let mut data = vec![0u8; 256];
        data[1] = 3;
        data[2] = 0x03;
        data[3] = 252;
        data[4] = 0xAB;
        let length = (data.len() as u16).to_be_bytes();
        let cdb = [0x4C, 0, 0x40 | 0x0F, 0, 0, 0, 0, length[0], length[1], 0];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::ToDevice, &mut data, &mut sense);

        let completion = translate(&mut device, &mut ctx).unwrap();
        assert_eq!(completion, Completion::Success);

        let sent = &device.transport.sent;
        assert_eq!(sent.len(), 2, "read-modify-write");
        assert_eq!(sent[0].0[14], ops::opcode::READ_LOG_EXT);
        assert_eq!(sent[0].0[8], 0x90, "host vendor log");
        assert_eq!(sent[0].0[10], 1, "page one");
        assert_eq!(sent[1].0[14], ops::opcode::WRITE_LOG_EXT);
        assert_eq!(sent[1].2[256 + 4], 0xAB, "payload in the second half");
    }

    #[test]
    fn other_pages_are_rejected() {
        let mut device = SatDevice::new(ScriptedTransport::default());
        device.install_identify(sample_identify());
        device.flags.host_vendor_logs_supported = true;

        let cdb = [0x4C, 0, 0x40 | 0x10, 0, 0, 0, 0, 0, 0, 0];
        let mut sense = [0u8; 32];
        let mut ctx = ScsiIoCtx::new(&cdb, DataDirection::ToDevice, &mut [], &mut sense);

        assert!(translate(&mut device, &mut ctx).is_err());
    }
}
