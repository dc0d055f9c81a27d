#![allow(dead_code)]

//! Issues one ATA command: builds the pass-through CDB, sends it, recovers
//! the return task file registers (with follow-up commands when the first
//! answer is incomplete), and classifies the outcome.

use std::time::{Duration, Instant};

use crate::{
    ata::{ops, AtaCommand, AtaError, AtaProtocol, AtaReturnTfrs, AtaStatus},
    device::SatDevice,
    error::Completion,
    passthrough::{
        cdb,
        rtfr::{self, ExtractionStatus, FollowUp},
    },
    sense::SPC3_SENSE_LEN,
    transport::Transport,
    DataDirection, Error, Result,
};

const MINIMUM_TIMEOUT: Duration = Duration::from_secs(15);

const LOG_SENSE_OPCODE: u8 = 0x4D;
const REQUEST_SENSE_OPCODE: u8 = 0x03;
const ATA_PASSTHROUGH_RESULTS_LOG_PAGE: u8 = 0x16;

struct Attempt {
    completion: Completion,
    /// UDMA transfer aborted with ILLEGAL REQUEST/24h; worth one retry in
    /// plain DMA.
    dma_retry: bool,
    sense: [u8; SPC3_SENSE_LEN],
}

impl<T: Transport> SatDevice<T> {
    /// Issues an ATA command through the SATL. `data` carries the transfer
    /// payload (either direction); pass an empty slice for non-data
    /// commands. On return `command.rtfr` holds the best recovered
    /// registers, and the device-wide caches are updated exactly once.
    pub fn issue_ata(&mut self, command: &mut AtaCommand, data: &mut [u8]) -> Result<Completion> {
        let mut attempt_command = command.clone();
        if self.prefer_dma {
            downgrade_udma(&mut attempt_command);
        }

        let mut result = self.issue_once(&mut attempt_command, data);

        if matches!(&result, Ok(attempt) if attempt.dma_retry) {
            downgrade_udma(&mut attempt_command);
            attempt_command.rtfr = AtaReturnTfrs::default();
            result = self.issue_once(&mut attempt_command, data);

            if matches!(&result, Ok(attempt) if attempt.completion.is_success()) {
                self.prefer_dma = true;
            }
        }

        command.rtfr = attempt_command.rtfr;

        match result {
            Ok(attempt) => {
                self.record_result(command.rtfr, &attempt.sense);
                Ok(attempt.completion)
            }
            Err(error) => {
                self.record_result(command.rtfr, &[]);
                Err(error)
            }
        }
    }

    fn issue_once(&mut self, command: &mut AtaCommand, data: &mut [u8]) -> Result<Attempt> {
        let timeout = self.effective_timeout(command);
        let built = cdb::build(command, &self.hacks)?;

        let mut sense = [0u8; SPC3_SENSE_LEN];
        let started = Instant::now();
        let _outcome = self.transport.send_cdb(
            built.as_bytes(),
            command.direction,
            data,
            &mut sense,
            timeout,
        )?;

        // The OS sometimes reports success for a command that plainly ran
        // past its window; trust the clock over the return code.
        if started.elapsed() > timeout {
            return Err(Error::OsCommandTimeout);
        }

        let mut extraction = rtfr::extract(&sense, command.protocol, &self.hacks);

        if !self.hacks.no_rtfrs_possible
            && extraction.status == ExtractionStatus::Incomplete
        {
            self.run_follow_up_ladder(&mut extraction);
        }

        let mut rtfrs = extraction.rtfrs;

        // A SATL that reports all-zero registers for a command that wanted
        // them never populated anything; remember that and degrade instead
        // of claiming clean success.
        let mut degraded = false;
        if command.need_rtfrs
            && !self.hacks.no_rtfrs_possible
            && rtfrs.looks_empty()
            && extraction.status != ExtractionStatus::Complete
        {
            if self.hacks.check_condition_empty {
                self.hacks.no_rtfrs_possible = true;
            } else {
                self.hacks.check_condition_empty = true;
            }
            degraded = true;
        }

        let status = rtfrs.status_flags();

        // Windows IDE drivers keep stale status around after a failure; a
        // throwaway CHECK POWER MODE clears it.
        if self.hacks.windows_ide
            && status.intersects(AtaStatus::ERROR | AtaStatus::DEVICE_FAULT)
            && command.tfr.command != ops::opcode::CHECK_POWER_MODE
        {
            self.flush_windows_ide_status();
        }

        if status.contains(AtaStatus::SENSE_DATA_AVAILABLE)
            && command.tfr.command != ops::opcode::REQUEST_SENSE_DATA_EXT
            && self
                .identify()
                .map(|id| id.sense_data_reporting_enabled())
                .unwrap_or(false)
        {
            self.fetch_ata_sense_data();
        }

        if status.contains(AtaStatus::BUSY) {
            // All other status bits are undefined while BSY is set.
            rtfrs = AtaReturnTfrs {
                status: AtaStatus::BUSY.bits(),
                ..Default::default()
            };
            command.rtfr = rtfrs;
            return Ok(Attempt {
                completion: Completion::InProgress,
                dma_retry: false,
                sense,
            });
        }

        command.rtfr = rtfrs;

        let completion = if status.contains(AtaStatus::DEVICE_FAULT) {
            // Device fault is fatal; no retry heuristics apply.
            Completion::Failure
        } else if status.contains(AtaStatus::ERROR) {
            if rtfrs.error_flags().contains(AtaError::ABORT) {
                Completion::Aborted
            } else {
                Completion::Failure
            }
        } else if degraded || extraction.status == ExtractionStatus::Incomplete {
            Completion::WarnIncompleteRtfrs
        } else if command.need_rtfrs && extraction.status == ExtractionStatus::NotFound {
            Completion::WarnIncompleteRtfrs
        } else {
            Completion::Success
        };

        Ok(Attempt {
            completion,
            dma_retry: extraction.dma_retry && completion == Completion::Aborted,
            sense,
        })
    }

    /// Follow-up recovery, in order: results log page, REQUEST SENSE,
    /// return response information. Stops at the first rung that produces
    /// complete registers.
    fn run_follow_up_ladder(&mut self, extraction: &mut rtfr::Extraction) {
        let Some(first) = extraction.follow_up else {
            return;
        };

        if let FollowUp::ResultsLog { parameter_index } = first {
            if let Some(rtfrs) = self.follow_up_results_log(parameter_index) {
                extraction.rtfrs = rtfrs;
                extraction.status = ExtractionStatus::Complete;
                return;
            }
        }

        if let Some(replacement) = self.follow_up_request_sense() {
            if replacement.status == ExtractionStatus::Complete {
                extraction.rtfrs = replacement.rtfrs;
                extraction.status = ExtractionStatus::Complete;
                return;
            }
        }

        if self.hacks.return_response_info_supported {
            if let Some(rtfrs) = self.follow_up_return_info() {
                extraction.rtfrs = rtfrs;
                extraction.status = ExtractionStatus::Complete;
            }
        }
    }

    /// LOG SENSE 16h, parameter `index - 1`.
    fn follow_up_results_log(&mut self, index: u8) -> Option<AtaReturnTfrs> {
        let parameter = (index - 1) as u16;
        let mut cdb = [0u8; 10];
        cdb[0] = LOG_SENSE_OPCODE;
        cdb[2] = 0x40 | ATA_PASSTHROUGH_RESULTS_LOG_PAGE;
        cdb[5..7].copy_from_slice(&parameter.to_be_bytes());
        cdb[7..9].copy_from_slice(&512u16.to_be_bytes());

        let mut data = [0u8; 512];
        let mut sense = [0u8; SPC3_SENSE_LEN];
        let outcome = self
            .transport
            .send_cdb(
                &cdb,
                DataDirection::FromDevice,
                &mut data,
                &mut sense,
                self.default_timeout(),
            )
            .ok()?;
        if outcome.check_condition() {
            return None;
        }

        // Page header, then parameter headers with their descriptors.
        let mut offset = 4;
        while offset + 4 <= data.len() {
            let code = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let length = data[offset + 3] as usize;
            if length == 0 {
                return None;
            }
            if code == parameter {
                return rtfr::from_results_log_parameter(
                    data.get(offset + 4..offset + 4 + length)?,
                );
            }
            offset += 4 + length;
        }

        None
    }

    /// SCSI REQUEST SENSE asking for descriptor format, then re-extract.
    fn follow_up_request_sense(&mut self) -> Option<rtfr::Extraction> {
        let cdb = [REQUEST_SENSE_OPCODE, 0x01, 0, 0, SPC3_SENSE_LEN as u8, 0];
        let mut data = [0u8; SPC3_SENSE_LEN];
        let mut sense = [0u8; SPC3_SENSE_LEN];
        self.transport
            .send_cdb(
                &cdb,
                DataDirection::FromDevice,
                &mut data,
                &mut sense,
                self.default_timeout(),
            )
            .ok()?;

        Some(rtfr::extract(&data, AtaProtocol::NoData, &self.hacks))
    }

    /// ATA pass-through, protocol Fh, T_LENGTH = TPSIU, data-in.
    fn follow_up_return_info(&mut self) -> Option<AtaReturnTfrs> {
        let command = rtfr::return_response_info_command();
        let built = cdb::build(&command, &self.hacks).ok()?;

        let mut data = [0u8; 14];
        let mut sense = [0u8; SPC3_SENSE_LEN];
        self.transport
            .send_cdb(
                built.as_bytes(),
                DataDirection::FromDevice,
                &mut data,
                &mut sense,
                self.default_timeout(),
            )
            .ok()?;

        rtfr::from_return_response_info(&data, &self.hacks)
    }

    fn flush_windows_ide_status(&mut self) {
        let command = ops::check_power_mode();
        if let Ok(built) = cdb::build(&command, &self.hacks) {
            let mut sense = [0u8; SPC3_SENSE_LEN];
            let _ = self.transport.send_cdb(
                built.as_bytes(),
                DataDirection::None,
                &mut [],
                &mut sense,
                self.default_timeout(),
            );
        }
    }

    /// ATA REQUEST SENSE DATA EXT; the triple comes back in the LBA
    /// registers.
    fn fetch_ata_sense_data(&mut self) {
        let command = ops::request_sense_data_ext();
        let Ok(built) = cdb::build(&command, &self.hacks) else {
            return;
        };

        let mut sense = [0u8; SPC3_SENSE_LEN];
        if self
            .transport
            .send_cdb(
                built.as_bytes(),
                DataDirection::None,
                &mut [],
                &mut sense,
                self.default_timeout(),
            )
            .is_err()
        {
            return;
        }

        let extraction = rtfr::extract(&sense, AtaProtocol::NoData, &self.hacks);
        if extraction.status == ExtractionStatus::Complete {
            let rtfrs = extraction.rtfrs;
            self.ata_sense_data = Some((rtfrs.lba_hi & 0x0F, rtfrs.lba_mid, rtfrs.lba_low));
        }
    }

    fn effective_timeout(&self, command: &AtaCommand) -> Duration {
        command
            .timeout
            .unwrap_or(Duration::ZERO)
            .max(self.default_timeout())
            .max(MINIMUM_TIMEOUT)
    }
}

fn downgrade_udma(command: &mut AtaCommand) {
    command.protocol = match command.protocol {
        AtaProtocol::UdmaIn | AtaProtocol::UdmaOut => AtaProtocol::Dma,
        other => other,
    };
}
