//! Raw stdout channel for the PCM stream.
//!
//! Writes go straight to the process's standard output handle with
//! `WriteFile`, bypassing Rust's line-buffered `Stdout`. When stdout is a
//! pipe it is switched to `PIPE_NOWAIT`, so a full pipe surfaces as
//! `WouldBlock` and the frame sink can bound how long it waits for the
//! reader. Files and consoles keep ordinary blocking writes.

use std::io::{self, Write};

use windows::Win32::Foundation::{ERROR_BROKEN_PIPE, ERROR_NO_DATA, ERROR_PIPE_NOT_CONNECTED, HANDLE};
use windows::Win32::Storage::FileSystem::{GetFileType, WriteFile, FILE_TYPE_PIPE};
use windows::Win32::System::Console::{GetStdHandle, STD_OUTPUT_HANDLE};
use windows::Win32::System::Pipes::{SetNamedPipeHandleState, PIPE_NOWAIT, PIPE_READMODE_BYTE};

use audio_tap_core::CaptureError;

/// Standard output as an unbuffered byte channel.
pub struct StdoutPipe {
    handle: HANDLE,
    nonblocking: bool,
}

// SAFETY: the handle is the process-wide stdout handle, which stays valid for
// the life of the process; only the capture thread writes through it.
unsafe impl Send for StdoutPipe {}

impl StdoutPipe {
    pub fn open() -> Result<Self, CaptureError> {
        let handle = unsafe { GetStdHandle(STD_OUTPUT_HANDLE) }
            .map_err(|e| CaptureError::OutputFailed(format!("GetStdHandle failed: {}", e)))?;
        if handle.is_invalid() {
            return Err(CaptureError::OutputFailed("no standard output handle".into()));
        }

        let nonblocking = unsafe { GetFileType(handle) } == FILE_TYPE_PIPE && set_nowait(handle);
        if nonblocking {
            log::debug!("stdout is a pipe, using non-blocking writes");
        }
        Ok(Self { handle, nonblocking })
    }
}

fn set_nowait(handle: HANDLE) -> bool {
    let mode = PIPE_READMODE_BYTE | PIPE_NOWAIT;
    match unsafe { SetNamedPipeHandleState(handle, Some(&mode), None, None) } {
        Ok(()) => true,
        Err(e) => {
            log::debug!("stdout pipe stays blocking: {}", e);
            false
        }
    }
}

impl Write for StdoutPipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut written: u32 = 0;
        let result = unsafe { WriteFile(self.handle, Some(buf), Some(&mut written), None) };

        match result {
            // A PIPE_NOWAIT pipe with no room accepts nothing and still succeeds.
            Ok(()) if written == 0 && self.nonblocking => Err(io::ErrorKind::WouldBlock.into()),
            Ok(()) => Ok(written as usize),
            Err(e) => {
                let code = e.code();
                if code == ERROR_BROKEN_PIPE.to_hresult()
                    || code == ERROR_NO_DATA.to_hresult()
                    || code == ERROR_PIPE_NOT_CONNECTED.to_hresult()
                {
                    Err(io::ErrorKind::BrokenPipe.into())
                } else {
                    Err(io::Error::other(e.to_string()))
                }
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
