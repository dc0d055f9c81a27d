#![allow(dead_code)]

//! Constructors for the ATA commands the translators issue. Each returns an
//! [`AtaCommand`] ready for the CDB builder and dispatcher.

use crate::{
    ata::{
        command::AtaCommand,
        tfr::{AtaProtocol, TransferBlockKind, TransferLengthLocation},
    },
    DataDirection,
};

pub mod opcode {
    pub const NOP: u8 = 0x00;
    pub const DATA_SET_MANAGEMENT: u8 = 0x06;
    pub const DATA_SET_MANAGEMENT_XL: u8 = 0x07;
    pub const REQUEST_SENSE_DATA_EXT: u8 = 0x0B;
    pub const READ_SECTORS: u8 = 0x20;
    pub const READ_SECTORS_EXT: u8 = 0x24;
    pub const READ_DMA_EXT: u8 = 0x25;
    pub const READ_LOG_EXT: u8 = 0x2F;
    pub const WRITE_SECTORS: u8 = 0x30;
    pub const WRITE_SECTORS_EXT: u8 = 0x34;
    pub const WRITE_DMA_EXT: u8 = 0x35;
    pub const WRITE_DMA_FUA_EXT: u8 = 0x3D;
    pub const WRITE_LOG_EXT: u8 = 0x3F;
    pub const READ_VERIFY_SECTORS: u8 = 0x40;
    pub const READ_VERIFY_SECTORS_EXT: u8 = 0x42;
    pub const ZERO_EXT: u8 = 0x44;
    pub const WRITE_UNCORRECTABLE_EXT: u8 = 0x45;
    pub const READ_LOG_DMA_EXT: u8 = 0x47;
    pub const ZONE_MANAGEMENT_IN: u8 = 0x4A;
    pub const TRUSTED_NON_DATA: u8 = 0x5B;
    pub const TRUSTED_RECEIVE: u8 = 0x5C;
    pub const TRUSTED_RECEIVE_DMA: u8 = 0x5D;
    pub const TRUSTED_SEND: u8 = 0x5E;
    pub const TRUSTED_SEND_DMA: u8 = 0x5F;
    pub const READ_FPDMA_QUEUED: u8 = 0x60;
    pub const WRITE_FPDMA_QUEUED: u8 = 0x61;
    pub const SET_DATE_AND_TIME_EXT: u8 = 0x77;
    pub const EXECUTE_DEVICE_DIAGNOSTIC: u8 = 0x90;
    pub const DOWNLOAD_MICROCODE: u8 = 0x92;
    pub const DOWNLOAD_MICROCODE_DMA: u8 = 0x93;
    pub const ZONE_MANAGEMENT_OUT: u8 = 0x9F;
    pub const SMART: u8 = 0xB0;
    pub const SANITIZE: u8 = 0xB4;
    pub const READ_MULTIPLE: u8 = 0xC4;
    pub const WRITE_MULTIPLE: u8 = 0xC5;
    pub const READ_DMA: u8 = 0xC8;
    pub const WRITE_DMA: u8 = 0xCA;
    pub const STANDBY_IMMEDIATE: u8 = 0xE0;
    pub const IDLE_IMMEDIATE: u8 = 0xE1;
    pub const STANDBY: u8 = 0xE2;
    pub const IDLE: u8 = 0xE3;
    pub const READ_BUFFER: u8 = 0xE4;
    pub const CHECK_POWER_MODE: u8 = 0xE5;
    pub const SLEEP: u8 = 0xE6;
    pub const FLUSH_CACHE: u8 = 0xE7;
    pub const WRITE_BUFFER: u8 = 0xE8;
    pub const READ_BUFFER_DMA: u8 = 0xE9;
    pub const FLUSH_CACHE_EXT: u8 = 0xEA;
    pub const WRITE_BUFFER_DMA: u8 = 0xEB;
    pub const IDENTIFY: u8 = 0xEC;
    pub const MEDIA_EJECT: u8 = 0xED;
    pub const SET_FEATURES: u8 = 0xEF;
    pub const IDENTIFY_PACKET: u8 = 0xA1;
    pub const SECURITY_SET_PASSWORD: u8 = 0xF1;
    pub const SECURITY_UNLOCK: u8 = 0xF2;
    pub const SECURITY_ERASE_PREPARE: u8 = 0xF3;
    pub const SECURITY_ERASE_UNIT: u8 = 0xF4;
    pub const SECURITY_FREEZE_LOCK: u8 = 0xF5;
    pub const SECURITY_DISABLE_PASSWORD: u8 = 0xF6;
}

pub mod log_address {
    pub const DIRECTORY: u8 = 0x00;
    pub const SUMMARY_SMART_ERROR: u8 = 0x01;
    pub const COMPREHENSIVE_SMART_ERROR: u8 = 0x02;
    pub const EXT_COMPREHENSIVE_SMART_ERROR: u8 = 0x03;
    pub const DEVICE_STATISTICS: u8 = 0x04;
    pub const SMART_SELF_TEST: u8 = 0x06;
    pub const EXTENDED_SMART_SELF_TEST: u8 = 0x07;
    pub const POWER_CONDITIONS: u8 = 0x08;
    pub const ZONED_DEVICE_INFORMATION: u8 = 0x09;
    pub const IDENTIFY_DEVICE_DATA: u8 = 0x30;
    pub const CURRENT_DEVICE_INTERNAL_STATUS: u8 = 0x24;
    pub const SAVED_DEVICE_INTERNAL_STATUS: u8 = 0x25;
    pub const HOST_VENDOR_FIRST: u8 = 0x90;
    pub const HOST_VENDOR_LAST: u8 = 0x9F;
    pub const SCT_COMMAND_STATUS: u8 = 0xE0;
    pub const SCT_DATA_TRANSFER: u8 = 0xE1;
}

pub mod device_stats_page {
    pub const LIST: u8 = 0x00;
    pub const GENERAL: u8 = 0x01;
    pub const FREE_FALL: u8 = 0x02;
    pub const ROTATING_MEDIA: u8 = 0x03;
    pub const GENERAL_ERRORS: u8 = 0x04;
    pub const TEMPERATURE: u8 = 0x05;
    pub const TRANSPORT: u8 = 0x06;
    pub const SOLID_STATE: u8 = 0x07;
}

pub mod smart_feature {
    pub const READ_DATA: u8 = 0xD0;
    pub const ATTRIBUTE_AUTOSAVE: u8 = 0xD2;
    pub const EXECUTE_OFFLINE: u8 = 0xD4;
    pub const READ_LOG: u8 = 0xD5;
    pub const WRITE_LOG: u8 = 0xD6;
    pub const ENABLE: u8 = 0xD8;
    pub const DISABLE: u8 = 0xD9;
    pub const RETURN_STATUS: u8 = 0xDA;
}

pub mod set_features {
    pub const ENABLE_WRITE_CACHE: u8 = 0x02;
    pub const ENABLE_APM: u8 = 0x05;
    pub const ENABLE_EPC: u8 = 0x4A;
    pub const DISABLE_READ_LOOK_AHEAD: u8 = 0x55;
    pub const DISABLE_WRITE_CACHE: u8 = 0x82;
    pub const DISABLE_APM: u8 = 0x85;
    pub const ENABLE_READ_LOOK_AHEAD: u8 = 0xAA;
    pub const ENABLE_SENSE_DATA_REPORTING: u8 = 0xC3;
}

/// EPC subcommands carried in the count register of SET FEATURES 4Ah.
pub mod epc_subcommand {
    pub const RESTORE_POWER_CONDITION: u8 = 0x00;
    pub const GO_TO_POWER_CONDITION: u8 = 0x01;
    pub const SET_POWER_CONDITION_TIMER: u8 = 0x02;
    pub const SET_POWER_CONDITION_STATE: u8 = 0x03;
    pub const ENABLE_EPC_FEATURE_SET: u8 = 0x04;
    pub const DISABLE_EPC_FEATURE_SET: u8 = 0x05;
}

/// EPC power condition IDs, shared with the Power Conditions log.
pub mod power_condition {
    pub const STANDBY_Z: u8 = 0x00;
    pub const STANDBY_Y: u8 = 0x01;
    pub const IDLE_A: u8 = 0x81;
    pub const IDLE_B: u8 = 0x82;
    pub const IDLE_C: u8 = 0x83;
    pub const ALL: u8 = 0xFF;
}

pub mod sanitize_feature {
    pub const STATUS: u16 = 0x0000;
    pub const CRYPTO_SCRAMBLE: u16 = 0x0011;
    pub const BLOCK_ERASE: u16 = 0x0012;
    pub const OVERWRITE: u16 = 0x0014;
    pub const FREEZE_LOCK: u16 = 0x0020;
    pub const ANTI_FREEZE_LOCK: u16 = 0x0040;

    pub const CRYPTO_KEY: u32 = 0x43727970; // "Cryp"
    pub const BLOCK_ERASE_KEY: u32 = 0x426B4572; // "BkEr"
    pub const OVERWRITE_KEY: u32 = 0x4F766572; // "Over"
}

pub mod zone_action {
    pub const REPORT_ZONES: u8 = 0x00;
    pub const CLOSE_ZONE: u8 = 0x01;
    pub const FINISH_ZONE: u8 = 0x02;
    pub const OPEN_ZONE: u8 = 0x03;
    pub const RESET_WRITE_POINTERS: u8 = 0x04;
}

pub fn identify() -> AtaCommand {
    AtaCommand::new(AtaProtocol::PioIn, opcode::IDENTIFY)
        .count(1)
        .transfer(TransferLengthLocation::SectorCount, TransferBlockKind::Blocks512)
        .need_rtfrs()
}

pub fn identify_packet() -> AtaCommand {
    AtaCommand::new(AtaProtocol::PioIn, opcode::IDENTIFY_PACKET)
        .count(1)
        .transfer(TransferLengthLocation::SectorCount, TransferBlockKind::Blocks512)
        .need_rtfrs()
}

/// READ LOG EXT; `page_count` is the number of 512-byte pages.
pub fn read_log_ext(log: u8, page: u16, page_count: u16, use_dma: bool) -> AtaCommand {
    let (protocol, command) = if use_dma {
        (AtaProtocol::UdmaIn, opcode::READ_LOG_DMA_EXT)
    } else {
        (AtaProtocol::PioIn, opcode::READ_LOG_EXT)
    };

    let mut cmd = AtaCommand::new(protocol, command)
        .extended()
        .count(page_count)
        .transfer(TransferLengthLocation::SectorCount, TransferBlockKind::Blocks512);
    cmd.tfr.lba_low = log;
    cmd.tfr.lba_mid = page as u8;
    cmd.tfr.lba_hi = (page >> 8) as u8;
    cmd
}

pub fn write_log_ext(log: u8, page: u16, page_count: u16) -> AtaCommand {
    let mut cmd = AtaCommand::new(AtaProtocol::PioOut, opcode::WRITE_LOG_EXT)
        .extended()
        .count(page_count)
        .transfer(TransferLengthLocation::SectorCount, TransferBlockKind::Blocks512);
    cmd.tfr.lba_low = log;
    cmd.tfr.lba_mid = page as u8;
    cmd.tfr.lba_hi = (page >> 8) as u8;
    cmd
}

fn smart(feature: u8) -> AtaCommand {
    let mut cmd = AtaCommand::new(AtaProtocol::NoData, opcode::SMART).feature(feature as u16);
    cmd.tfr.lba_mid = 0x4F;
    cmd.tfr.lba_hi = 0xC2;
    cmd
}

pub fn smart_read_data() -> AtaCommand {
    let mut cmd = smart(smart_feature::READ_DATA)
        .count(1)
        .transfer(TransferLengthLocation::SectorCount, TransferBlockKind::Blocks512);
    cmd.protocol = AtaProtocol::PioIn;
    cmd.direction = DataDirection::FromDevice;
    cmd
}

pub fn smart_read_log(log: u8, page_count: u8) -> AtaCommand {
    let mut cmd = smart(smart_feature::READ_LOG)
        .count(page_count as u16)
        .transfer(TransferLengthLocation::SectorCount, TransferBlockKind::Blocks512);
    cmd.protocol = AtaProtocol::PioIn;
    cmd.direction = DataDirection::FromDevice;
    cmd.tfr.lba_low = log;
    cmd
}

/// SMART RETURN STATUS; the threshold-exceeded answer comes back in the
/// LBA mid/hi registers, so RTFRs are mandatory.
pub fn smart_return_status() -> AtaCommand {
    smart(smart_feature::RETURN_STATUS).need_rtfrs()
}

pub fn smart_execute_offline(subcommand: u8) -> AtaCommand {
    let mut cmd = smart(smart_feature::EXECUTE_OFFLINE);
    cmd.tfr.lba_low = subcommand;
    cmd
}

pub fn smart_enable_operations() -> AtaCommand {
    smart(smart_feature::ENABLE)
}

pub fn smart_disable_operations() -> AtaCommand {
    smart(smart_feature::DISABLE)
}

pub fn flush_cache(ext: bool) -> AtaCommand {
    if ext {
        AtaCommand::new(AtaProtocol::NoData, opcode::FLUSH_CACHE_EXT).extended()
    } else {
        AtaCommand::new(AtaProtocol::NoData, opcode::FLUSH_CACHE)
    }
}

pub fn standby_immediate() -> AtaCommand {
    AtaCommand::new(AtaProtocol::NoData, opcode::STANDBY_IMMEDIATE)
}

pub fn idle_immediate() -> AtaCommand {
    AtaCommand::new(AtaProtocol::NoData, opcode::IDLE_IMMEDIATE)
}

pub fn standby(count: u8) -> AtaCommand {
    AtaCommand::new(AtaProtocol::NoData, opcode::STANDBY).count(count as u16)
}

pub fn idle(count: u8) -> AtaCommand {
    AtaCommand::new(AtaProtocol::NoData, opcode::IDLE).count(count as u16)
}

pub fn sleep() -> AtaCommand {
    AtaCommand::new(AtaProtocol::NoData, opcode::SLEEP)
}

/// CHECK POWER MODE; the current mode is returned in the count register.
pub fn check_power_mode() -> AtaCommand {
    AtaCommand::new(AtaProtocol::NoData, opcode::CHECK_POWER_MODE).need_rtfrs()
}

pub fn media_eject() -> AtaCommand {
    AtaCommand::new(AtaProtocol::NoData, opcode::MEDIA_EJECT)
}

pub fn set_features(feature: u8, count: u8) -> AtaCommand {
    AtaCommand::new(AtaProtocol::NoData, opcode::SET_FEATURES)
        .feature(feature as u16)
        .count(count as u16)
}

/// SET FEATURES 4Ah. The EPC subcommand rides in the low nibble of the
/// count register, the power condition ID in LBA 0:7 and the timer (when
/// applicable) in LBA 8:23 with the units bit at LBA 24.
pub fn epc_command(subcommand: u8, condition: u8) -> AtaCommand {
    let mut cmd = set_features(set_features::ENABLE_EPC, subcommand);
    cmd.tfr.lba_low = condition;
    cmd.need_rtfrs = true;
    cmd
}

/// Timer value is in the 16-bit ATA unit already chosen by the caller; the
/// units bit selects 100 ms (clear) or minutes (set).
pub fn epc_set_power_condition_timer(
    condition: u8,
    timer: u16,
    units_minutes: bool,
    enable: bool,
    save: bool,
) -> AtaCommand {
    let mut cmd = epc_command(epc_subcommand::SET_POWER_CONDITION_TIMER, condition);
    cmd.tfr.lba_mid = timer as u8;
    cmd.tfr.lba_hi = (timer >> 8) as u8;
    // LBA bits 24..27 live in the device register for a 28-bit taskfile.
    if units_minutes {
        cmd.tfr.device |= 1 << 3;
    }
    if enable {
        cmd.tfr.device |= 1 << 1;
    }
    if save {
        cmd.tfr.device |= 1;
    }
    cmd
}

pub fn epc_go_to_power_condition(condition: u8, delayed_entry: bool, hold: bool) -> AtaCommand {
    let mut cmd = epc_command(epc_subcommand::GO_TO_POWER_CONDITION, condition);
    if delayed_entry {
        cmd.tfr.lba_mid |= 1 << 1;
    }
    if hold {
        cmd.tfr.lba_mid |= 1;
    }
    cmd
}

pub fn epc_set_power_condition_state(condition: u8, enable: bool, save: bool) -> AtaCommand {
    let mut cmd = epc_command(epc_subcommand::SET_POWER_CONDITION_STATE, condition);
    if enable {
        cmd.tfr.lba_mid |= 1 << 5;
    }
    if save {
        cmd.tfr.lba_mid |= 1 << 4;
    }
    cmd
}

pub fn epc_restore_power_condition(condition: u8, default: bool, save: bool) -> AtaCommand {
    let mut cmd = epc_command(epc_subcommand::RESTORE_POWER_CONDITION, condition);
    if default {
        cmd.tfr.lba_mid |= 1 << 6;
    }
    if save {
        cmd.tfr.lba_mid |= 1 << 4;
    }
    cmd
}

pub fn security_set_password() -> AtaCommand {
    security_data_out(opcode::SECURITY_SET_PASSWORD)
}

pub fn security_unlock() -> AtaCommand {
    security_data_out(opcode::SECURITY_UNLOCK)
}

pub fn security_erase_prepare() -> AtaCommand {
    AtaCommand::new(AtaProtocol::NoData, opcode::SECURITY_ERASE_PREPARE)
}

pub fn security_erase_unit() -> AtaCommand {
    security_data_out(opcode::SECURITY_ERASE_UNIT)
}

pub fn security_freeze_lock() -> AtaCommand {
    AtaCommand::new(AtaProtocol::NoData, opcode::SECURITY_FREEZE_LOCK)
}

pub fn security_disable_password() -> AtaCommand {
    security_data_out(opcode::SECURITY_DISABLE_PASSWORD)
}

fn security_data_out(command: u8) -> AtaCommand {
    AtaCommand::new(AtaProtocol::PioOut, command)
        .count(1)
        .transfer(TransferLengthLocation::SectorCount, TransferBlockKind::Blocks512)
}

pub fn trusted_receive(protocol: u8, sp_specific: u16, blocks: u16, use_dma: bool) -> AtaCommand {
    let (ata_protocol, command) = if use_dma {
        (AtaProtocol::UdmaIn, opcode::TRUSTED_RECEIVE_DMA)
    } else {
        (AtaProtocol::PioIn, opcode::TRUSTED_RECEIVE)
    };

    let mut cmd = AtaCommand::new(ata_protocol, command)
        .feature(protocol as u16)
        .transfer(TransferLengthLocation::SectorCount, TransferBlockKind::Blocks512);
    cmd.tfr.count = blocks as u8;
    cmd.tfr.lba_low = (blocks >> 8) as u8;
    cmd.tfr.lba_mid = sp_specific as u8;
    cmd.tfr.lba_hi = (sp_specific >> 8) as u8;
    cmd
}

pub fn trusted_send(protocol: u8, sp_specific: u16, blocks: u16, use_dma: bool) -> AtaCommand {
    let (ata_protocol, command) = if use_dma {
        (AtaProtocol::UdmaOut, opcode::TRUSTED_SEND_DMA)
    } else {
        (AtaProtocol::PioOut, opcode::TRUSTED_SEND)
    };

    let mut cmd = AtaCommand::new(ata_protocol, command)
        .feature(protocol as u16)
        .transfer(TransferLengthLocation::SectorCount, TransferBlockKind::Blocks512);
    cmd.tfr.count = blocks as u8;
    cmd.tfr.lba_low = (blocks >> 8) as u8;
    cmd.tfr.lba_mid = sp_specific as u8;
    cmd.tfr.lba_hi = (sp_specific >> 8) as u8;
    cmd
}

pub fn trusted_non_data(protocol: u8, sp_specific: u16) -> AtaCommand {
    let mut cmd =
        AtaCommand::new(AtaProtocol::NoData, opcode::TRUSTED_NON_DATA).feature(protocol as u16);
    cmd.tfr.lba_mid = sp_specific as u8;
    cmd.tfr.lba_hi = (sp_specific >> 8) as u8;
    cmd
}

fn sanitize(feature: u16, key: u32) -> AtaCommand {
    AtaCommand::new(AtaProtocol::NoData, opcode::SANITIZE)
        .extended()
        .feature(feature)
        .lba48(key as u64)
        .need_rtfrs()
}

/// SANITIZE STATUS EXT; progress comes back in the count registers.
pub fn sanitize_status() -> AtaCommand {
    sanitize(sanitize_feature::STATUS, 0)
}

pub fn sanitize_crypto_scramble(failure_mode: bool) -> AtaCommand {
    let mut cmd = sanitize(sanitize_feature::CRYPTO_SCRAMBLE, sanitize_feature::CRYPTO_KEY);
    if failure_mode {
        cmd.tfr.feature |= 0x10;
    }
    cmd
}

pub fn sanitize_block_erase(failure_mode: bool) -> AtaCommand {
    let mut cmd = sanitize(sanitize_feature::BLOCK_ERASE, sanitize_feature::BLOCK_ERASE_KEY);
    if failure_mode {
        cmd.tfr.feature |= 0x10;
    }
    cmd
}

pub fn sanitize_overwrite(pattern: u32, passes: u8, invert: bool, failure_mode: bool) -> AtaCommand {
    let mut cmd = AtaCommand::new(AtaProtocol::NoData, opcode::SANITIZE)
        .extended()
        .feature(sanitize_feature::OVERWRITE)
        .need_rtfrs();
    // The overwrite pattern rides in LBA 0:31, the pass count and invert
    // flag in the count register.
    cmd.tfr.lba_low = pattern as u8;
    cmd.tfr.lba_mid = (pattern >> 8) as u8;
    cmd.tfr.lba_hi = (pattern >> 16) as u8;
    cmd.tfr.lba_low_ext = (pattern >> 24) as u8;
    cmd.tfr.count = passes & 0x0F;
    if invert {
        cmd.tfr.count |= 1 << 7;
    }
    if failure_mode {
        cmd.tfr.feature |= 0x10;
    }
    cmd
}

pub fn sanitize_freeze_lock() -> AtaCommand {
    sanitize(sanitize_feature::FREEZE_LOCK, 0)
}

pub fn sanitize_anti_freeze_lock() -> AtaCommand {
    sanitize(sanitize_feature::ANTI_FREEZE_LOCK, 0)
}

/// DATA SET MANAGEMENT (TRIM); `range_blocks` counts 512-byte payload blocks.
pub fn data_set_management(range_blocks: u16, xl: bool) -> AtaCommand {
    let command = if xl {
        opcode::DATA_SET_MANAGEMENT_XL
    } else {
        opcode::DATA_SET_MANAGEMENT
    };

    AtaCommand::new(AtaProtocol::UdmaOut, command)
        .extended()
        .feature(0x0001) // TRIM
        .count(range_blocks)
        .transfer(TransferLengthLocation::SectorCount, TransferBlockKind::Blocks512)
}

pub fn write_uncorrectable(flagged: bool, lba: u64, count: u16) -> AtaCommand {
    AtaCommand::new(AtaProtocol::NoData, opcode::WRITE_UNCORRECTABLE_EXT)
        .extended()
        .feature(if flagged { 0xAA } else { 0x55 })
        .lba48(lba)
        .count(count)
}

pub fn zeros_ext(lba: u64, count: u16, trim: bool) -> AtaCommand {
    let mut cmd = AtaCommand::new(AtaProtocol::NoData, opcode::ZERO_EXT)
        .extended()
        .lba48(lba)
        .count(count);
    if trim {
        cmd.tfr.feature = 1;
    }
    cmd
}

pub fn set_date_and_time(milliseconds_since_1970: u64) -> AtaCommand {
    AtaCommand::new(AtaProtocol::NoData, opcode::SET_DATE_AND_TIME_EXT)
        .extended()
        .lba48(milliseconds_since_1970 & 0x0000_FFFF_FFFF_FFFF)
}

pub fn request_sense_data_ext() -> AtaCommand {
    AtaCommand::new(AtaProtocol::NoData, opcode::REQUEST_SENSE_DATA_EXT)
        .extended()
        .need_rtfrs()
}

pub fn read_buffer(use_dma: bool) -> AtaCommand {
    let (protocol, command) = if use_dma {
        (AtaProtocol::UdmaIn, opcode::READ_BUFFER_DMA)
    } else {
        (AtaProtocol::PioIn, opcode::READ_BUFFER)
    };

    AtaCommand::new(protocol, command)
        .count(1)
        .transfer(TransferLengthLocation::SectorCount, TransferBlockKind::Blocks512)
}

pub fn write_buffer(use_dma: bool) -> AtaCommand {
    let (protocol, command) = if use_dma {
        (AtaProtocol::UdmaOut, opcode::WRITE_BUFFER_DMA)
    } else {
        (AtaProtocol::PioOut, opcode::WRITE_BUFFER)
    };

    AtaCommand::new(protocol, command)
        .count(1)
        .transfer(TransferLengthLocation::SectorCount, TransferBlockKind::Blocks512)
}

/// DOWNLOAD MICROCODE. `mode` is the ATA subcommand (03h offsets, 07h full,
/// 0Eh deferred, 0Fh activate); `blocks`/`offset` are in 512-byte units.
pub fn download_microcode(mode: u8, blocks: u16, offset: u16, use_dma: bool) -> AtaCommand {
    let (protocol, command) = if use_dma {
        (AtaProtocol::UdmaOut, opcode::DOWNLOAD_MICROCODE_DMA)
    } else {
        (AtaProtocol::PioOut, opcode::DOWNLOAD_MICROCODE)
    };

    let mut cmd = AtaCommand::new(protocol, command)
        .feature(mode as u16)
        .transfer(TransferLengthLocation::SectorCount, TransferBlockKind::Blocks512);
    cmd.tfr.count = blocks as u8;
    cmd.tfr.lba_low = (blocks >> 8) as u8;
    cmd.tfr.lba_mid = offset as u8;
    cmd.tfr.lba_hi = (offset >> 8) as u8;
    if mode == 0x0F {
        cmd.protocol = AtaProtocol::NoData;
        cmd.direction = DataDirection::None;
        cmd.transfer_length_location = TransferLengthLocation::NoData;
    }
    cmd.need_rtfrs = true;
    cmd
}

pub fn report_zones_ext(zone_start_lba: u64, page_count: u16, reporting_options: u8) -> AtaCommand {
    let mut cmd = AtaCommand::new(AtaProtocol::UdmaIn, opcode::ZONE_MANAGEMENT_IN)
        .extended()
        .feature(zone_action::REPORT_ZONES as u16)
        .lba48(zone_start_lba)
        .count(page_count)
        .transfer(TransferLengthLocation::SectorCount, TransferBlockKind::Blocks512);
    // Partial bit and reporting options ride in the auxiliary register,
    // which forces the 32-byte CDB.
    cmd = cmd.complete32().aux((reporting_options as u32) << 16);
    cmd
}

fn zone_management_out(action: u8, zone_id: u64, all: bool) -> AtaCommand {
    let mut cmd = AtaCommand::new(AtaProtocol::NoData, opcode::ZONE_MANAGEMENT_OUT)
        .extended()
        .feature(action as u16)
        .lba48(zone_id);
    if all {
        cmd.tfr.count = 1; // count bit 0 = ALL
    }
    cmd
}

pub fn close_zone_ext(zone_id: u64, all: bool) -> AtaCommand {
    zone_management_out(zone_action::CLOSE_ZONE, zone_id, all)
}

pub fn finish_zone_ext(zone_id: u64, all: bool) -> AtaCommand {
    zone_management_out(zone_action::FINISH_ZONE, zone_id, all)
}

pub fn open_zone_ext(zone_id: u64, all: bool) -> AtaCommand {
    zone_management_out(zone_action::OPEN_ZONE, zone_id, all)
}

pub fn reset_write_pointers_ext(zone_id: u64, all: bool) -> AtaCommand {
    zone_management_out(zone_action::RESET_WRITE_POINTERS, zone_id, all)
}

/// SCT command issued through the SCT command/status log.
pub fn sct_command(use_gpl: bool) -> AtaCommand {
    if use_gpl {
        write_log_ext(log_address::SCT_COMMAND_STATUS, 0, 1)
    } else {
        let mut cmd = smart(smart_feature::WRITE_LOG)
            .count(1)
            .transfer(TransferLengthLocation::SectorCount, TransferBlockKind::Blocks512);
        cmd.protocol = AtaProtocol::PioOut;
        cmd.direction = DataDirection::ToDevice;
        cmd.tfr.lba_low = log_address::SCT_COMMAND_STATUS;
        cmd
    }
}

/// Data transfer phase for an SCT command already keyed in.
pub fn sct_data_out(use_gpl: bool, page_count: u16) -> AtaCommand {
    if use_gpl {
        write_log_ext(log_address::SCT_DATA_TRANSFER, 0, page_count)
    } else {
        let mut cmd = smart(smart_feature::WRITE_LOG)
            .count(page_count)
            .transfer(TransferLengthLocation::SectorCount, TransferBlockKind::Blocks512);
        cmd.protocol = AtaProtocol::PioOut;
        cmd.direction = DataDirection::ToDevice;
        cmd.tfr.lba_low = log_address::SCT_DATA_TRANSFER;
        cmd
    }
}

pub fn execute_device_diagnostic() -> AtaCommand {
    AtaCommand::new(AtaProtocol::DevDiag, opcode::EXECUTE_DEVICE_DIAGNOSTIC).need_rtfrs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_shape() {
        let cmd = identify();
        assert_eq!(cmd.tfr.command, 0xEC);
        assert_eq!(cmd.protocol, AtaProtocol::PioIn);
        assert_eq!(cmd.direction, DataDirection::FromDevice);
        assert_eq!(cmd.tfr.count, 1);
        assert!(!cmd.is_extended());
    }

    #[test]
    fn read_log_ext_registers() {
        let cmd = read_log_ext(log_address::EXTENDED_SMART_SELF_TEST, 0x0102, 1, false);
        assert_eq!(cmd.tfr.lba_low, 0x07);
        assert_eq!(cmd.tfr.lba_mid, 0x02);
        assert_eq!(cmd.tfr.lba_hi, 0x01);
        assert!(cmd.is_extended());
    }

    #[test]
    fn smart_signature_registers() {
        let cmd = smart_return_status();
        assert_eq!(cmd.tfr.lba_mid, 0x4F);
        assert_eq!(cmd.tfr.lba_hi, 0xC2);
        assert!(cmd.need_rtfrs);
    }

    #[test]
    fn sanitize_keys() {
        let cmd = sanitize_block_erase(false);
        assert_eq!(cmd.tfr.feature, 0x12);
        assert_eq!(cmd.tfr.lba48(), 0x426B_4572);

        let cmd = sanitize_crypto_scramble(true);
        assert_eq!(cmd.tfr.feature, 0x11 | 0x10);
    }

    #[test]
    fn deferred_activate_is_non_data() {
        let cmd = download_microcode(0x0F, 0, 0, false);
        assert_eq!(cmd.protocol, AtaProtocol::NoData);
        assert_eq!(cmd.direction, DataDirection::None);
    }
}
