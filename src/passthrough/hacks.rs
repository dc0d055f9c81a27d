#![allow(dead_code)]

/// Workarounds for SATLs, HBAs and OS drivers that mishandle the ATA
/// pass-through CDB or lose return task file registers. Owned by the device
/// handle and mutated by the dispatcher as it learns what actually works.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughHacks {
    /// Force T_LENGTH = TPSIU regardless of what the caller set.
    pub always_use_tpsiu: bool,
    /// The SATL rejects the 12-byte A1h CDB outright; upgrade to 16-byte.
    pub a1_never_supported: bool,
    /// Prefer the 12-byte CDB for 48-bit commands when all extension
    /// registers are zero.
    pub a1_ext_when_possible: bool,
    /// Status = 0 in returned RTFRs means the SATL did not populate them;
    /// skip the check-condition bit and recover through follow-up commands.
    pub check_condition_empty: bool,
    /// The SATL accepts protocol Fh (return response information).
    pub return_response_info_supported: bool,
    /// Trust extension registers from a response-information reply even when
    /// the extend bit is clear.
    pub return_response_ignore_extend_bit: bool,
    /// Never set the SAT check-condition bit.
    pub disable_check_condition: bool,
    /// RTFR recovery is pointless on this path; do not attempt it.
    pub no_rtfrs_possible: bool,
    /// 0 leaves the choice to the builder; 12, 16 or 32 overrides it.
    pub force_cdb_size: u8,
    /// Windows IDE-mode driver: always set the check-condition bit, and
    /// flush its stale-status cache with CHECK POWER MODE after failures.
    pub windows_ide: bool,
    /// Some libATA versions put the unaligned-write LBA in the information
    /// field instead of the RTFRs. Opt-in quirk.
    pub unaligned_write_sense_workaround: bool,
}

/// Which device-statistics log pages the drive offers.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceStatsPages {
    pub general: bool,
    pub rotating_media: bool,
    pub general_errors: bool,
    pub solid_state: bool,
    pub temperature: bool,
    pub date_time: bool,
}

/// Capabilities the software SATL has discovered about the ATA drive.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftSatFlags {
    /// Synthesize descriptor-format sense rather than fixed.
    pub prefer_descriptor_sense: bool,
    pub stats_pages: DeviceStatsPages,
    pub gpl_supported: bool,
    pub download_mode3_supported: bool,
    pub download_deferred_supported: bool,
    pub sct_write_same_supported: bool,
    pub zero_ext_supported: bool,
    pub dsm_xl_supported: bool,
    pub zoned: ZonedFlavor,
    pub identify_data_log_supported: bool,
    pub internal_status_log_supported: bool,
    pub host_vendor_logs_supported: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ZonedFlavor {
    #[default]
    NotZoned,
    HostAware,
    DeviceManaged,
}
