#![allow(dead_code)]

use std::time::Duration;

use crate::{
    ata::{AtaReturnTfrs, IdentifyDevice, ZonedKind},
    passthrough::hacks::{PassthroughHacks, SoftSatFlags, ZonedFlavor},
    sense::SPC3_SENSE_LEN,
    transport::Transport,
};

pub const ATA_PASSTHROUGH_RESULTS_RING_LEN: usize = 15;

/// One device handle: the transport plus everything the translation layer
/// has learned or cached about the drive behind it. All mutation funnels
/// through the dispatcher and translators; the handle is single-threaded.
pub struct SatDevice<T: Transport> {
    pub(crate) transport: T,
    pub hacks: PassthroughHacks,
    pub flags: SoftSatFlags,
    pub(crate) identify: Option<IdentifyDevice>,
    pub(crate) default_timeout: Duration,
    /// The drive asked for plain DMA after rejecting UDMA once.
    pub(crate) prefer_dma: bool,
    pub(crate) last_command_rtfrs: AtaReturnTfrs,
    pub(crate) last_command_sense: [u8; SPC3_SENSE_LEN],
    /// Ring backing the ATA Pass-Through Results log page (16h), parameter
    /// codes 1..=15.
    pub(crate) passthrough_results: [AtaReturnTfrs; ATA_PASSTHROUGH_RESULTS_RING_LEN],
    pub(crate) results_write_index: u8,
    /// key/asc/ascq from ATA REQUEST SENSE DATA EXT, when the drive offers
    /// sense data reporting.
    pub(crate) ata_sense_data: Option<(u8, u8, u8)>,
    /// Sanitize/self-test progress bookkeeping for REQUEST SENSE.
    pub(crate) sanitize_in_progress: bool,
    pub(crate) self_test_in_progress: bool,
}

impl<T: Transport> SatDevice<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            hacks: PassthroughHacks::default(),
            flags: SoftSatFlags::default(),
            identify: None,
            default_timeout: Duration::from_secs(15),
            prefer_dma: false,
            last_command_rtfrs: AtaReturnTfrs::default(),
            last_command_sense: [0; SPC3_SENSE_LEN],
            passthrough_results: [AtaReturnTfrs::default(); ATA_PASSTHROUGH_RESULTS_RING_LEN],
            results_write_index: 1,
            ata_sense_data: None,
            sanitize_in_progress: false,
            self_test_in_progress: false,
        }
    }

    pub fn with_hacks(transport: T, hacks: PassthroughHacks) -> Self {
        Self {
            hacks,
            ..Self::new(transport)
        }
    }

    pub fn identify(&self) -> Option<&IdentifyDevice> {
        self.identify.as_ref()
    }

    /// Installs identify data and derives the soft-SAT capability flags
    /// from it. Log-directory-backed flags are refined separately by the
    /// dispatcher once GPL reads are possible.
    pub fn install_identify(&mut self, raw: [u8; 512]) {
        let identify = IdentifyDevice::new(raw);

        self.flags.gpl_supported = identify.supports_gpl();
        self.flags.download_mode3_supported = identify.supports_download_microcode_mode3();
        self.flags.download_deferred_supported = identify.supports_deferred_download();
        self.flags.sct_write_same_supported = identify.supports_sct_write_same();
        self.flags.dsm_xl_supported = identify.supports_trim() && identify.dsm_max_blocks() > 0;
        self.flags.zero_ext_supported = identify.supports_zero_ext();
        self.flags.zoned = match identify.zoned_kind() {
            ZonedKind::NotZoned => ZonedFlavor::NotZoned,
            ZonedKind::HostAware => ZonedFlavor::HostAware,
            ZonedKind::DeviceManaged => ZonedFlavor::DeviceManaged,
        };

        self.identify = Some(identify);
    }

    pub fn logical_block_size(&self) -> u32 {
        self.identify
            .as_ref()
            .map(|id| id.logical_sector_size())
            .unwrap_or(512)
    }

    pub fn max_lba(&self) -> u64 {
        self.identify.as_ref().map(|id| id.max_lba()).unwrap_or(0)
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn set_default_timeout(&mut self, timeout: Duration) {
        self.default_timeout = timeout;
    }

    pub fn last_command_rtfrs(&self) -> &AtaReturnTfrs {
        &self.last_command_rtfrs
    }

    pub fn last_command_sense(&self) -> &[u8] {
        &self.last_command_sense
    }

    pub fn ata_sense_data(&self) -> Option<(u8, u8, u8)> {
        self.ata_sense_data
    }

    /// Called exactly once per dispatched command.
    pub(crate) fn record_result(&mut self, rtfrs: AtaReturnTfrs, sense: &[u8]) {
        self.last_command_rtfrs = rtfrs;

        let length = usize::min(sense.len(), SPC3_SENSE_LEN);
        self.last_command_sense[..length].copy_from_slice(&sense[..length]);
        self.last_command_sense[length..].fill(0);

        let slot = (self.results_write_index - 1) as usize;
        self.passthrough_results[slot] = rtfrs;
        self.results_write_index = if self.results_write_index as usize
            >= ATA_PASSTHROUGH_RESULTS_RING_LEN
        {
            1
        } else {
            self.results_write_index + 1
        };
    }

    /// Ring entry for log page 16h parameter `code` (1..=15).
    pub fn passthrough_result(&self, code: u8) -> Option<&AtaReturnTfrs> {
        if (1..=ATA_PASSTHROUGH_RESULTS_RING_LEN as u8).contains(&code) {
            Some(&self.passthrough_results[(code - 1) as usize])
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ata::identify::tests::sample_identify,
        transport::IoOutcome,
        DataDirection, Result,
    };

    struct NullTransport;

    impl Transport for NullTransport {
        fn send_cdb(
            &mut self,
            _cdb: &[u8],
            _direction: DataDirection,
            _data: &mut [u8],
            _sense: &mut [u8],
            _timeout: Duration,
        ) -> Result<IoOutcome> {
            Ok(IoOutcome::default())
        }
    }

    #[test]
    fn identify_install_derives_flags() {
        let mut device = SatDevice::new(NullTransport);
        device.install_identify(sample_identify());

        assert!(device.flags.gpl_supported);
        assert!(device.flags.sct_write_same_supported);
        assert!(device.flags.dsm_xl_supported);
        assert_eq!(device.flags.zoned, ZonedFlavor::NotZoned);
        assert_eq!(device.logical_block_size(), 512);
    }

    #[test]
    fn results_ring_rolls_over() {
        let mut device = SatDevice::new(NullTransport);

        for n in 0..20u8 {
            let rtfrs = AtaReturnTfrs {
                count: n,
                ..Default::default()
            };
            device.record_result(rtfrs, &[]);
        }

        // 20 records into a 15-slot ring: entries 16..20 overwrote 1..5.
        assert_eq!(device.passthrough_result(1).unwrap().count, 15);
        assert_eq!(device.passthrough_result(5).unwrap().count, 19);
        assert_eq!(device.passthrough_result(6).unwrap().count, 5);
        assert_eq!(device.passthrough_result(0), None);
        assert_eq!(device.passthrough_result(16), None);
    }
}
