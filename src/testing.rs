//! Scripted transport used by the dispatcher and translator tests: each
//! step describes what the "device" answers to the next CDB, and every CDB
//! sent is recorded for inspection.

use std::{collections::VecDeque, time::Duration};

use crate::{
    transport::{IoOutcome, Transport},
    DataDirection, Error, Result,
};

pub(crate) struct Step {
    pub expect_opcode: Option<u8>,
    pub scsi_status: u8,
    pub sense: Vec<u8>,
    pub data_in: Vec<u8>,
    pub error: Option<Error>,
}

impl Step {
    pub fn good() -> Self {
        Self {
            expect_opcode: None,
            scsi_status: 0,
            sense: Vec::new(),
            data_in: Vec::new(),
            error: None,
        }
    }

    pub fn expect_opcode(mut self, opcode: u8) -> Self {
        self.expect_opcode = Some(opcode);
        self
    }

    pub fn sense(mut self, sense: &[u8]) -> Self {
        self.scsi_status = 0x02;
        self.sense = sense.to_vec();
        self
    }

    pub fn data(mut self, data: &[u8]) -> Self {
        self.data_in = data.to_vec();
        self
    }

    pub fn fail(error: Error) -> Self {
        Self {
            error: Some(error),
            ..Self::good()
        }
    }
}

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    steps: VecDeque<Step>,
    /// Every CDB sent, with direction and a copy of the data-out payload.
    pub sent: Vec<(Vec<u8>, DataDirection, Vec<u8>)>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            sent: Vec::new(),
        }
    }

    pub fn sent_opcodes(&self) -> Vec<u8> {
        self.sent
            .iter()
            .map(|(cdb, _, _)| cdb.first().copied().unwrap_or(0))
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn send_cdb(
        &mut self,
        cdb: &[u8],
        direction: DataDirection,
        data: &mut [u8],
        sense: &mut [u8],
        _timeout: Duration,
    ) -> Result<IoOutcome> {
        let data_out = if direction == DataDirection::ToDevice {
            data.to_vec()
        } else {
            Vec::new()
        };
        self.sent.push((cdb.to_vec(), direction, data_out));

        let step = self.steps.pop_front().unwrap_or_else(Step::good);

        if let Some(expected) = step.expect_opcode {
            assert_eq!(
                cdb[0], expected,
                "unexpected opcode; sent so far: {:02X?}",
                self.sent_opcodes()
            );
        }

        if let Some(error) = step.error {
            return Err(error);
        }

        let sense_length = usize::min(step.sense.len(), sense.len());
        sense[..sense_length].copy_from_slice(&step.sense[..sense_length]);

        let data_length = usize::min(step.data_in.len(), data.len());
        data[..data_length].copy_from_slice(&step.data_in[..data_length]);

        Ok(IoOutcome {
            scsi_status: step.scsi_status,
            sense_length,
            transferred: data_length,
        })
    }
}
