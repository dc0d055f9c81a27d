#![allow(dead_code)]

//! Windows SCSI pass-through plumbing.

use std::{
    fs::{File, OpenOptions},
    io,
    mem::size_of_val,
    os::windows::io::AsRawHandle,
    path::{Path, PathBuf},
    time::Duration,
};

use windows::Win32::{
    Foundation::HANDLE,
    Storage::IscsiDisc::{
        IOCTL_SCSI_PASS_THROUGH_DIRECT, SCSI_IOCTL_DATA_BIDIRECTIONAL, SCSI_IOCTL_DATA_IN,
        SCSI_IOCTL_DATA_OUT, SCSI_IOCTL_DATA_UNSPECIFIED, SCSI_PASS_THROUGH_DIRECT,
    },
    System::IO::DeviceIoControl,
};

use crate::{
    sense::SPC3_SENSE_LEN,
    transport::{IoOutcome, Transport},
    DataDirection, Error, Result,
};

const MAX_COMMAND_LENGTH: usize = 16;

/// SCSI_PASS_THROUGH_DIRECT followed by the sense area it points at.
#[repr(C)]
#[derive(Default)]
struct ScsiPassThroughDirectWrapper {
    scsi_pass_through: SCSI_PASS_THROUGH_DIRECT,
    filler: u32,
    sense: [u8; SPC3_SENSE_LEN],
}

#[derive(Debug)]
pub struct WinTransport {
    path: PathBuf,
    file: File,
}

impl WinTransport {
    pub fn open<P: AsRef<Path> + ?Sized>(path: &P) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        let file = options.open(path.as_ref())?;

        Ok(Self {
            path: path.as_ref().to_owned(),
            file,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Transport for WinTransport {
    fn send_cdb(
        &mut self,
        cdb: &[u8],
        direction: DataDirection,
        data: &mut [u8],
        sense: &mut [u8],
        timeout: Duration,
    ) -> Result<IoOutcome> {
        if cdb.len() > MAX_COMMAND_LENGTH {
            // The legacy pass-through structure cannot carry a 32-byte CDB.
            return Err(Error::OsCommandNotAvailable);
        }

        let mut header = ScsiPassThroughDirectWrapper::default();
        let address_of_header = std::ptr::addr_of!(header) as usize;
        let spt = &mut header.scsi_pass_through;
        spt.Length = size_of_val(spt) as u16;
        spt.CdbLength = cdb.len() as u8;
        spt.SenseInfoLength = SPC3_SENSE_LEN as u8;
        spt.DataIn = match direction {
            DataDirection::None => SCSI_IOCTL_DATA_UNSPECIFIED,
            DataDirection::ToDevice => SCSI_IOCTL_DATA_OUT,
            DataDirection::FromDevice => SCSI_IOCTL_DATA_IN,
            DataDirection::ToFromDevice | DataDirection::Unknown => SCSI_IOCTL_DATA_BIDIRECTIONAL,
        } as u8;
        spt.DataTransferLength = data.len() as u32;
        spt.TimeOutValue = match timeout.as_secs().clamp(u32::MIN as u64, u32::MAX as u64) {
            0 => 1,
            n => n as u32,
        };
        spt.DataBuffer = if data.is_empty() {
            std::ptr::null_mut()
        } else {
            data.as_mut_ptr() as _
        };
        spt.SenseInfoOffset = (std::ptr::addr_of!(header.sense) as usize - address_of_header) as u32;
        spt.Cdb[..cdb.len()].copy_from_slice(cdb);

        let mut bytes_returned = 0;
        let success = unsafe {
            DeviceIoControl(
                HANDLE(self.file.as_raw_handle() as isize),
                IOCTL_SCSI_PASS_THROUGH_DIRECT,
                Some(&header as *const _ as _),
                size_of_val(&header) as u32,
                Some(&mut header as *mut _ as _),
                size_of_val(&header) as u32,
                Some(&mut bytes_returned),
                None,
            )
        };

        if success.is_err() {
            return Err(Error::OsPassthroughFailure(io::Error::last_os_error()));
        }

        let sense_length = usize::min(
            header.scsi_pass_through.SenseInfoLength as usize,
            sense.len(),
        );
        sense[..sense_length].copy_from_slice(&header.sense[..sense_length]);

        Ok(IoOutcome {
            scsi_status: header.scsi_pass_through.ScsiStatus,
            sense_length,
            transferred: header.scsi_pass_through.DataTransferLength as usize,
        })
    }
}
