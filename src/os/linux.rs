#![allow(dead_code)]

//! Linux SG_IO plumbing.

use std::{
    fs::{File, OpenOptions},
    io,
    os::fd::AsRawFd,
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
    time::Duration,
};

use nix::libc;

use crate::{
    transport::{IoOutcome, Transport},
    DataDirection, Error, Result,
};

const SG_IO: u32 = 0x2285;
const SG_GET_VERSION_NUM: u32 = 0x2282;

const SG_DXFER_NONE: i32 = -1;
const SG_DXFER_TO_DEV: i32 = -2;
const SG_DXFER_FROM_DEV: i32 = -3;
const SG_DXFER_TO_FROM_DEV: i32 = -4;

const SG_INFO_OK_MASK: u32 = 0x1;

/// `struct sg_io_hdr` from `<scsi/sg.h>`.
#[repr(C)]
struct SgIoHeader {
    interface_id: i32,
    data_direction: i32,
    command_length: u8,
    max_sense_buffer_length: u8,
    iovec_count: u16,
    data_length: u32,
    data: *mut libc::c_void,
    command: *const u8,
    sense_buffer: *mut u8,
    timeout: u32,
    flags: u32,
    pack_id: i32,
    user_pointer: *mut libc::c_void,
    status: u8,
    masked_status: u8,
    message_status: u8,
    sense_buffer_written: u8,
    host_status: u16,
    driver_status: u16,
    residual_count: i32,
    duration: u32,
    info: u32,
}

/// A SCSI generic device handle issuing CDBs through `SG_IO`.
#[derive(Debug)]
pub struct SgTransport {
    path: PathBuf,
    file: File,
}

impl SgTransport {
    pub fn open<P: AsRef<Path> + ?Sized>(path: &P) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        Self::open_with(path, options)
    }

    pub fn open_readonly<P: AsRef<Path> + ?Sized>(path: &P) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true);
        Self::open_with(path, options)
    }

    fn open_with<P: AsRef<Path> + ?Sized>(path: &P, options: OpenOptions) -> Result<Self> {
        let file = options.open(path.as_ref())?;

        let file_type = file.metadata()?.file_type();
        if !file_type.is_block_device() && !file_type.is_char_device() {
            return Err(Error::NotBlockDevice(path.as_ref().to_owned()));
        }

        if !Self::is_sg_device(&file)? {
            return Err(Error::NotScsiDevice(path.as_ref().to_owned()));
        }

        Ok(Self {
            path: path.as_ref().to_owned(),
            file,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn is_sg_device(file: &File) -> Result<bool> {
        let mut version = 0_i32;
        let result = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                SG_GET_VERSION_NUM.try_into().unwrap(),
                &mut version,
            )
        };

        if result != 0 {
            Err(io::Error::last_os_error())?;
        }

        Ok(version >= 30000)
    }
}

impl Transport for SgTransport {
    fn send_cdb(
        &mut self,
        cdb: &[u8],
        direction: DataDirection,
        data: &mut [u8],
        sense: &mut [u8],
        timeout: Duration,
    ) -> Result<IoOutcome> {
        let mut header = SgIoHeader {
            interface_id: b'S' as i32,
            data_direction: match direction {
                DataDirection::None => SG_DXFER_NONE,
                DataDirection::ToDevice => SG_DXFER_TO_DEV,
                DataDirection::FromDevice => SG_DXFER_FROM_DEV,
                DataDirection::ToFromDevice | DataDirection::Unknown => SG_DXFER_TO_FROM_DEV,
            },
            command_length: cdb.len() as u8,
            max_sense_buffer_length: sense.len().min(u8::MAX as usize) as u8,
            iovec_count: 0,
            data_length: data.len() as u32,
            data: if data.is_empty() {
                std::ptr::null_mut()
            } else {
                data.as_mut_ptr() as *mut libc::c_void
            },
            command: cdb.as_ptr(),
            sense_buffer: sense.as_mut_ptr(),
            timeout: timeout
                .as_millis()
                .clamp(u32::MIN as u128, u32::MAX as u128) as u32,
            flags: 0,
            pack_id: 0,
            user_pointer: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            message_status: 0,
            sense_buffer_written: 0,
            host_status: 0,
            driver_status: 0,
            residual_count: 0,
            duration: 0,
            info: 0,
        };

        let ioctl_result =
            unsafe { libc::ioctl(self.file.as_raw_fd(), SG_IO.try_into().unwrap(), &mut header) };

        if ioctl_result != 0 {
            let os_error = io::Error::last_os_error();
            return match os_error.raw_os_error() {
                Some(libc::ENOTTY) | Some(libc::EINVAL) => Err(Error::OsCommandNotAvailable),
                _ => Err(Error::OsPassthroughFailure(os_error)),
            };
        }

        // DID_TIME_OUT in the host status.
        if header.host_status == 0x03 {
            return Err(Error::OsCommandTimeout);
        }

        Ok(IoOutcome {
            scsi_status: header.status,
            sense_length: header.sense_buffer_written as usize,
            transferred: data.len().saturating_sub(header.residual_count.max(0) as usize),
        })
    }
}
