#![allow(dead_code)]

//! Recovers ATA return task file registers from whatever the SATL handed
//! back: a descriptor-format sense buffer, the fixed-format "ATA pass-through
//! information available" layout, the passthrough results log page, or a
//! "return response information" reply. Drives, HBAs and OS drivers lose
//! these registers in different ways; the extractor reports how much it
//! actually trusts.

use crate::{
    ata::{ops, AtaError, AtaProtocol, AtaReturnTfrs, AtaStatus},
    passthrough::hacks::PassthroughHacks,
    sense::{self, AtaStatusReturnDescriptor, ATA_STATUS_RETURN_DESC_LEN},
};

/// How much of the register file the extractor recovered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractionStatus {
    /// All registers present and trusted.
    Complete,
    /// Registers recovered but the extension registers are unknown; a
    /// follow-up may still improve the answer.
    Incomplete,
    /// The sense buffer carried no ATA information at all.
    NotFound,
}

/// Follow-up command the dispatcher should try next, in ladder order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FollowUp {
    /// Read the ATA Pass-Through Results log page, parameter `index - 1`.
    ResultsLog { parameter_index: u8 },
    /// SCSI REQUEST SENSE for descriptor-format sense, then re-extract.
    RequestSense,
    /// ATA pass-through with protocol Fh, T_LENGTH = TPSIU, T_DIR = in.
    ReturnResponseInfo,
}

#[derive(Clone, Copy, Debug)]
pub struct Extraction {
    pub rtfrs: AtaReturnTfrs,
    pub status: ExtractionStatus,
    pub follow_up: Option<FollowUp>,
    /// ILLEGAL REQUEST/24h against a UDMA transfer; the dispatcher retries
    /// the command once with the DMA protocol.
    pub dma_retry: bool,
}

impl Extraction {
    fn not_found() -> Self {
        Self {
            rtfrs: AtaReturnTfrs::default(),
            status: ExtractionStatus::NotFound,
            follow_up: None,
            dma_retry: false,
        }
    }
}

/// Byte 8 of the fixed-format 00h/1Dh layout.
const FIXED_FLAG_EXTEND: u8 = 0x80;
const FIXED_FLAG_COUNT_EXT_NONZERO: u8 = 0x40;
const FIXED_FLAG_LBA_EXT_NONZERO: u8 = 0x20;
const FIXED_LOG_INDEX_MASK: u8 = 0x0F;

/// Offset at which some SATLs embed a full status-return descriptor inside
/// fixed-format sense. Non-standard but observed in the field.
const FIXED_EMBEDDED_DESCRIPTOR_OFFSET: usize = 18;

pub fn extract(
    sense_buffer: &[u8],
    protocol: AtaProtocol,
    hacks: &PassthroughHacks,
) -> Extraction {
    let Some(parsed) = sense::parse(sense_buffer) else {
        // Nothing in the buffer at all; for the protocols that legitimately
        // return no status this is a success.
        return synthesize_quiet_success(protocol);
    };

    if parsed.is_descriptor_format() {
        if let Some(descriptor) =
            sense::find_descriptor(sense_buffer, sense::DESCRIPTOR_TYPE_ATA_STATUS_RETURN)
        {
            return from_status_return_descriptor(descriptor, hacks);
        }
        return from_sense_triple(parsed.triple(), protocol);
    }

    if parsed.is_fixed_format()
        && (parsed.asc, parsed.ascq) == sense::asc::ATA_PASSTHROUGH_INFO_AVAILABLE
    {
        return from_fixed_passthrough_info(sense_buffer, hacks);
    }

    let mut extraction = from_sense_triple(parsed.triple(), protocol);

    // Some libATA versions report the failing LBA of an unaligned write in
    // the information field instead of the registers.
    if hacks.unaligned_write_sense_workaround
        && parsed.is_fixed_format()
        && parsed.fixed_information != 0
        && extraction.rtfrs.status_flags().contains(AtaStatus::ERROR)
    {
        let lba = parsed.fixed_information;
        extraction.rtfrs.lba_low = lba as u8;
        extraction.rtfrs.lba_mid = (lba >> 8) as u8;
        extraction.rtfrs.lba_hi = (lba >> 16) as u8;
        extraction.rtfrs.lba_low_ext = (lba >> 24) as u8;
    }

    extraction
}

/// Step 1/2: a well-formed ATA Status Return descriptor.
fn from_status_return_descriptor(descriptor: &[u8], hacks: &PassthroughHacks) -> Extraction {
    if descriptor.len() < 14 || descriptor[1] != ATA_STATUS_RETURN_DESC_LEN {
        return Extraction::not_found();
    }

    let raw: [u8; 14] = descriptor[..14].try_into().unwrap();
    let parsed = AtaStatusReturnDescriptor::from_bytes(raw);
    let mut rtfrs = parsed.to_rtfrs();

    if parsed.extend() == 0 && !hacks.return_response_ignore_extend_bit {
        rtfrs.count_ext = 0;
        rtfrs.lba_low_ext = 0;
        rtfrs.lba_mid_ext = 0;
        rtfrs.lba_hi_ext = 0;
    }

    Extraction {
        rtfrs,
        status: ExtractionStatus::Complete,
        follow_up: None,
        dma_retry: false,
    }
}

/// Step 3: fixed-format sense with ASC/ASCQ 00h/1Dh.
fn from_fixed_passthrough_info(sense_buffer: &[u8], hacks: &PassthroughHacks) -> Extraction {
    if sense_buffer.len() < 12 {
        return Extraction::not_found();
    }

    let mut rtfrs = AtaReturnTfrs {
        error: sense_buffer[3],
        status: sense_buffer[4],
        device: sense_buffer[5],
        count: sense_buffer[6],
        lba_hi: sense_buffer[9],
        lba_mid: sense_buffer[10],
        lba_low: sense_buffer[11],
        ..Default::default()
    };

    let flags = sense_buffer.get(8).copied().unwrap_or(0);
    let mut status = ExtractionStatus::Complete;

    // Some SATLs append the full descriptor after the fixed part; prefer it
    // as the extension-register source when it is there.
    let embedded = sense_buffer
        .get(FIXED_EMBEDDED_DESCRIPTOR_OFFSET..FIXED_EMBEDDED_DESCRIPTOR_OFFSET + 14)
        .filter(|d| {
            d[0] == sense::DESCRIPTOR_TYPE_ATA_STATUS_RETURN && d[1] == ATA_STATUS_RETURN_DESC_LEN
        });
    if let Some(descriptor) = embedded {
        let raw: [u8; 14] = descriptor.try_into().unwrap();
        let parsed = AtaStatusReturnDescriptor::from_bytes(raw);
        rtfrs.count_ext = parsed.count_ext();
        rtfrs.lba_low_ext = parsed.lba_low_ext();
        rtfrs.lba_mid_ext = parsed.lba_mid_ext();
        rtfrs.lba_hi_ext = parsed.lba_hi_ext();
    } else {
        // The flags say the extension registers were non-zero, but this
        // layout cannot carry their values.
        if flags & FIXED_FLAG_COUNT_EXT_NONZERO != 0 {
            rtfrs.count_ext = 0xFF;
            status = ExtractionStatus::Incomplete;
        }
        if flags & FIXED_FLAG_LBA_EXT_NONZERO != 0 {
            rtfrs.lba_low_ext = 0xFF;
            rtfrs.lba_mid_ext = 0xFF;
            rtfrs.lba_hi_ext = 0xFF;
            status = ExtractionStatus::Incomplete;
        }
    }

    let follow_up = if status == ExtractionStatus::Incomplete {
        let log_index = flags & FIXED_LOG_INDEX_MASK;
        if log_index != 0 {
            Some(FollowUp::ResultsLog {
                parameter_index: log_index,
            })
        } else if hacks.return_response_info_supported {
            Some(FollowUp::ReturnResponseInfo)
        } else {
            Some(FollowUp::RequestSense)
        }
    } else {
        None
    };

    Extraction {
        rtfrs,
        status,
        follow_up,
        dma_retry: false,
    }
}

/// Step 4: no ATA information, only a SCSI triple; translate it back into
/// the registers the drive most likely produced.
fn from_sense_triple(triple: (u8, u8, u8), protocol: AtaProtocol) -> Extraction {
    use sense::key;

    let ready = AtaStatus::READY | AtaStatus::SEEK_COMPLETE;
    let mut rtfrs = AtaReturnTfrs::default();
    let mut status = ExtractionStatus::Complete;
    let mut dma_retry = false;

    match triple {
        (key::NO_SENSE, 0x00, 0x00) => {
            rtfrs.status = ready.bits();
        }
        (key::NOT_READY, 0x3A, 0x00) => {
            rtfrs.status = (AtaStatus::SEEK_COMPLETE | AtaStatus::ERROR).bits();
            rtfrs.error = AtaError::NO_MEDIA.bits();
        }
        (key::MEDIUM_ERROR, 0x11, 0x00) => {
            rtfrs.status = (ready | AtaStatus::ERROR).bits();
            rtfrs.error = AtaError::UNCORRECTABLE.bits();
        }
        (key::HARDWARE_ERROR, 0x44, 0x00) => {
            rtfrs.status = (ready | AtaStatus::DEVICE_FAULT).bits();
        }
        (key::ILLEGAL_REQUEST, 0x21, 0x00) => {
            rtfrs.status = (ready | AtaStatus::ERROR).bits();
            rtfrs.error = AtaError::ID_NOT_FOUND.bits();
        }
        (key::ILLEGAL_REQUEST, 0x24, 0x00) => {
            rtfrs.status = (ready | AtaStatus::ERROR).bits();
            rtfrs.error = AtaError::ABORT.bits();
            dma_retry = matches!(protocol, AtaProtocol::UdmaIn | AtaProtocol::UdmaOut);
        }
        (key::ABORTED_COMMAND, 0x47, 0x03) => {
            rtfrs.status = (ready | AtaStatus::ERROR).bits();
            rtfrs.error = AtaError::INTERFACE_CRC.bits();
        }
        (key::DATA_PROTECT, 0x27, 0x00) => {
            rtfrs.status = (ready | AtaStatus::ERROR).bits();
            rtfrs.error = AtaError::WRITE_PROTECTED.bits();
        }
        (key::UNIT_ATTENTION, 0x28, 0x00) => {
            rtfrs.status = (ready | AtaStatus::ERROR).bits();
            rtfrs.error = AtaError::MEDIA_CHANGE.bits();
        }
        (key::ABORTED_COMMAND, _, _) => {
            rtfrs.status = (ready | AtaStatus::ERROR).bits();
            rtfrs.error = AtaError::ABORT.bits();
        }
        _ => {
            status = ExtractionStatus::NotFound;
        }
    }

    Extraction {
        rtfrs,
        status,
        follow_up: None,
        dma_retry,
    }
}

/// Step 5: PIO-in and FPDMA do not produce meaningful registers on success;
/// an empty sense buffer for them means the command simply worked.
fn synthesize_quiet_success(protocol: AtaProtocol) -> Extraction {
    match protocol {
        AtaProtocol::PioIn | AtaProtocol::Fpdma => Extraction {
            rtfrs: AtaReturnTfrs {
                status: (AtaStatus::READY | AtaStatus::SEEK_COMPLETE).bits(),
                ..Default::default()
            },
            status: ExtractionStatus::Complete,
            follow_up: None,
            dma_retry: false,
        },
        _ => Extraction::not_found(),
    }
}

/// Parses one parameter of the ATA Pass-Through Results log page (16h). The
/// parameter data is the status-return descriptor layout.
pub fn from_results_log_parameter(parameter_data: &[u8]) -> Option<AtaReturnTfrs> {
    if parameter_data.len() < 14
        || parameter_data[0] != sense::DESCRIPTOR_TYPE_ATA_STATUS_RETURN
        || parameter_data[1] != ATA_STATUS_RETURN_DESC_LEN
    {
        return None;
    }

    let raw: [u8; 14] = parameter_data[..14].try_into().ok()?;
    Some(AtaStatusReturnDescriptor::from_bytes(raw).to_rtfrs())
}

/// Parses the 14-byte reply of a protocol-Fh "return response information"
/// pass-through.
pub fn from_return_response_info(
    data: &[u8],
    hacks: &PassthroughHacks,
) -> Option<AtaReturnTfrs> {
    if data.len() < 14 {
        return None;
    }

    let raw: [u8; 14] = data[..14].try_into().ok()?;
    let parsed = AtaStatusReturnDescriptor::from_bytes(raw);
    let mut rtfrs = parsed.to_rtfrs();

    if parsed.extend() == 0 && !hacks.return_response_ignore_extend_bit {
        rtfrs.count_ext = 0;
        rtfrs.lba_low_ext = 0;
        rtfrs.lba_mid_ext = 0;
        rtfrs.lba_hi_ext = 0;
    }

    Some(rtfrs)
}

/// The follow-up command for [`FollowUp::ReturnResponseInfo`].
pub fn return_response_info_command() -> crate::ata::AtaCommand {
    use crate::{
        ata::tfr::{TransferBlockKind, TransferLengthLocation},
        DataDirection,
    };

    crate::ata::AtaCommand::new(AtaProtocol::ReturnInfo, ops::opcode::NOP)
        .direction(DataDirection::FromDevice)
        .transfer(TransferLengthLocation::Tpsiu, TransferBlockKind::Bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sense::synthesize::{from_triple, SenseDescriptor};
    use crate::sense::SenseFormat;

    fn default_hacks() -> PassthroughHacks {
        PassthroughHacks::default()
    }

    #[test]
    fn descriptor_sense_yields_exact_registers() {
        let rtfrs = AtaReturnTfrs {
            status: 0x50,
            count: 0x01,
            count_ext: 0x02,
            lba_low: 0xAA,
            lba_hi_ext: 0x7F,
            device: 0x40,
            ..Default::default()
        };

        let mut buffer = [0u8; 64];
        from_triple(
            0,
            0,
            0,
            &[SenseDescriptor::AtaStatusReturn { rtfrs, extend: true }],
            SenseFormat::Descriptor,
            &mut buffer,
        );

        let extraction = extract(&buffer, AtaProtocol::NoData, &default_hacks());
        assert_eq!(extraction.status, ExtractionStatus::Complete);
        assert_eq!(extraction.rtfrs, rtfrs);
    }

    #[test]
    fn clear_extend_bit_zeroes_ext_registers() {
        let rtfrs = AtaReturnTfrs {
            status: 0x50,
            count_ext: 0x02,
            lba_mid_ext: 0x03,
            ..Default::default()
        };

        let mut buffer = [0u8; 64];
        from_triple(
            0,
            0,
            0,
            &[SenseDescriptor::AtaStatusReturn {
                rtfrs,
                extend: false,
            }],
            SenseFormat::Descriptor,
            &mut buffer,
        );

        let extraction = extract(&buffer, AtaProtocol::NoData, &default_hacks());
        assert!(extraction.rtfrs.ext_registers_zero());

        let trusting = PassthroughHacks {
            return_response_ignore_extend_bit: true,
            ..Default::default()
        };
        let extraction = extract(&buffer, AtaProtocol::NoData, &trusting);
        assert_eq!(extraction.rtfrs.count_ext, 0x02);
        assert_eq!(extraction.rtfrs.lba_mid_ext, 0x03);
    }

    /// Fixed sense, flags say the ext registers were non-zero, nothing else
    /// to go on: the registers get poisoned and the result degrades.
    #[test]
    fn fixed_sense_ext_flags_without_values() {
        let mut buffer = [0u8; 18];
        buffer[0] = 0x70;
        buffer[4] = 0x50;
        buffer[8] = FIXED_FLAG_COUNT_EXT_NONZERO | FIXED_FLAG_LBA_EXT_NONZERO;
        buffer[12] = 0x00;
        buffer[13] = 0x1D;

        let extraction = extract(&buffer, AtaProtocol::PioIn, &default_hacks());
        assert_eq!(extraction.status, ExtractionStatus::Incomplete);
        assert_eq!(extraction.rtfrs.count_ext, 0xFF);
        assert_eq!(extraction.rtfrs.lba_low_ext, 0xFF);
        assert_eq!(extraction.rtfrs.lba_mid_ext, 0xFF);
        assert_eq!(extraction.rtfrs.lba_hi_ext, 0xFF);
        assert_eq!(extraction.follow_up, Some(FollowUp::RequestSense));
    }

    #[test]
    fn fixed_sense_with_clear_flags_is_complete() {
        let mut buffer = [0u8; 18];
        buffer[0] = 0x70;
        buffer[3] = 0x00;
        buffer[4] = 0x50;
        buffer[6] = 0x01;
        buffer[9] = 0x11;
        buffer[10] = 0x22;
        buffer[11] = 0x33;
        buffer[12] = 0x00;
        buffer[13] = 0x1D;

        let extraction = extract(&buffer, AtaProtocol::NoData, &default_hacks());
        assert_eq!(extraction.status, ExtractionStatus::Complete);
        assert!(extraction.rtfrs.ext_registers_zero());
        assert_eq!(extraction.rtfrs.lba_hi, 0x11);
        assert_eq!(extraction.rtfrs.lba_low, 0x33);
    }

    #[test]
    fn fixed_sense_log_index_requests_results_log() {
        let mut buffer = [0u8; 18];
        buffer[0] = 0x70;
        buffer[4] = 0x50;
        buffer[8] = FIXED_FLAG_LBA_EXT_NONZERO | 0x05;
        buffer[12] = 0x00;
        buffer[13] = 0x1D;

        let extraction = extract(&buffer, AtaProtocol::NoData, &default_hacks());
        assert_eq!(
            extraction.follow_up,
            Some(FollowUp::ResultsLog { parameter_index: 5 })
        );
    }

    #[test]
    fn fixed_sense_prefers_embedded_descriptor() {
        let mut buffer = [0u8; 34];
        buffer[0] = 0x70;
        buffer[4] = 0x50;
        buffer[8] = FIXED_FLAG_COUNT_EXT_NONZERO;
        buffer[12] = 0x00;
        buffer[13] = 0x1D;
        buffer[18] = sense::DESCRIPTOR_TYPE_ATA_STATUS_RETURN;
        buffer[19] = ATA_STATUS_RETURN_DESC_LEN;
        buffer[22] = 0x09; // count ext

        let extraction = extract(&buffer, AtaProtocol::NoData, &default_hacks());
        assert_eq!(extraction.status, ExtractionStatus::Complete);
        assert_eq!(extraction.rtfrs.count_ext, 0x09);
        assert_eq!(extraction.follow_up, None);
    }

    #[test]
    fn return_response_info_follow_up_when_supported() {
        let mut buffer = [0u8; 18];
        buffer[0] = 0x70;
        buffer[4] = 0x50;
        buffer[8] = FIXED_FLAG_COUNT_EXT_NONZERO;
        buffer[12] = 0x00;
        buffer[13] = 0x1D;

        let hacks = PassthroughHacks {
            return_response_info_supported: true,
            ..Default::default()
        };
        let extraction = extract(&buffer, AtaProtocol::NoData, &hacks);
        assert_eq!(extraction.follow_up, Some(FollowUp::ReturnResponseInfo));
    }

    #[test]
    fn scsi_triples_synthesize_registers() {
        let mut buffer = [0u8; 32];
        from_triple(
            sense::key::NOT_READY,
            0x3A,
            0x00,
            &[],
            SenseFormat::Fixed,
            &mut buffer,
        );
        let extraction = extract(&buffer, AtaProtocol::NoData, &default_hacks());
        assert_eq!(
            extraction.rtfrs.error_flags() & AtaError::NO_MEDIA,
            AtaError::NO_MEDIA
        );

        from_triple(
            sense::key::ILLEGAL_REQUEST,
            0x24,
            0x00,
            &[],
            SenseFormat::Fixed,
            &mut buffer,
        );
        let extraction = extract(&buffer, AtaProtocol::UdmaIn, &default_hacks());
        assert!(extraction.dma_retry, "UDMA + 24h asks for DMA retry");
        let extraction = extract(&buffer, AtaProtocol::PioIn, &default_hacks());
        assert!(!extraction.dma_retry);
    }

    #[test]
    fn quiet_pio_in_success() {
        let buffer = [0u8; 32];
        let extraction = extract(&buffer, AtaProtocol::PioIn, &default_hacks());
        assert_eq!(extraction.status, ExtractionStatus::Complete);
        assert_eq!(
            extraction.rtfrs.status_flags(),
            AtaStatus::READY | AtaStatus::SEEK_COMPLETE
        );

        let extraction = extract(&buffer, AtaProtocol::Dma, &default_hacks());
        assert_eq!(extraction.status, ExtractionStatus::NotFound);
    }

    #[test]
    fn results_log_parameter_round_trip() {
        let rtfrs = AtaReturnTfrs {
            status: 0x50,
            count_ext: 0x12,
            lba_hi_ext: 0x34,
            ..Default::default()
        };
        let descriptor = AtaStatusReturnDescriptor::from_rtfrs(&rtfrs, true);

        assert_eq!(from_results_log_parameter(&descriptor.into_bytes()), Some(rtfrs));
        assert_eq!(from_results_log_parameter(&[0u8; 14]), None);
    }
}
