// SPDX-License-Identifier: CEPL-1.0
//! Exclusive access to the controlling virtual console: graphics mode so the
//! kernel stops drawing text over the plane, raw mode so keys arrive
//! unbuffered. Both are undone on drop.
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read};
use std::os::fd::AsRawFd;
use std::time::Duration;

use tracing::{debug, warn};

use crate::{BackendError, Key, WindowEvent};

// linux/kd.h
const KDSETMODE: u64 = 0x4B3A;
const KD_TEXT: libc::c_int = 0x00;
const KD_GRAPHICS: libc::c_int = 0x01;

pub(crate) struct Console {
    tty: File,
    saved: libc::termios,
}

impl Console {
    pub(crate) fn acquire() -> Result<Self, BackendError> {
        let tty = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/tty")
            .map_err(|e| BackendError::Unavailable(format!("controlling console ({e})")))?;
        let fd = tty.as_raw_fd();

        // SAFETY: fd is an open descriptor owned by `tty`; termios is plain data.
        let saved = unsafe {
            if libc::isatty(fd) != 1 {
                return Err(BackendError::Unavailable("controlling console".into()));
            }
            let mut saved: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut saved) != 0 {
                return Err(io::Error::last_os_error().into());
            }
            let mut raw = saved;
            libc::cfmakeraw(&mut raw);
            if libc::tcsetattr(fd, libc::TCSANOW, &raw) != 0 {
                return Err(io::Error::last_os_error().into());
            }
            if libc::ioctl(fd, KDSETMODE as _, KD_GRAPHICS) != 0 {
                let err = io::Error::last_os_error();
                libc::tcsetattr(fd, libc::TCSANOW, &saved);
                return Err(BackendError::Unavailable(format!(
                    "VT graphics mode, not a virtual console ({err})"
                )));
            }
            saved
        };

        debug!("console switched to graphics/raw mode");
        Ok(Self { tty, saved })
    }

    /// Waits up to `timeout` for one byte of input.
    pub(crate) fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, BackendError> {
        let mut pfd = libc::pollfd {
            fd: self.tty.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        // SAFETY: one valid pollfd.
        let ready = unsafe { libc::poll(&mut pfd, 1, millis) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(err.into());
        }
        if ready == 0 {
            return Ok(None);
        }

        let mut byte = [0u8; 1];
        match self.tty.read(&mut byte) {
            Ok(1) => Ok(Some(byte[0])),
            Ok(_) => Ok(None),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        let fd = self.tty.as_raw_fd();
        // SAFETY: fd stays open until `tty` drops after this body.
        unsafe {
            if libc::ioctl(fd, KDSETMODE as _, KD_TEXT) != 0 {
                warn!("restoring VT text mode: {}", io::Error::last_os_error());
            }
            if libc::tcsetattr(fd, libc::TCSANOW, &self.saved) != 0 {
                warn!("restoring terminal mode: {}", io::Error::last_os_error());
            }
        }
        debug!("console restored");
    }
}

/// Raw-mode input byte to event. Ctrl-C arrives as 0x03 once signals are off.
pub(crate) fn event_from_byte(byte: u8) -> WindowEvent {
    match byte {
        0x03 => WindowEvent::CloseRequested,
        0x1b => WindowEvent::KeyPressed(Key::Escape),
        b'q' | b'Q' => WindowEvent::KeyPressed(Key::Q),
        b'f' | b'F' => WindowEvent::KeyPressed(Key::F),
        b'v' | b'V' => WindowEvent::KeyPressed(Key::V),
        b'o' | b'O' => WindowEvent::KeyPressed(Key::O),
        _ => WindowEvent::KeyPressed(Key::Other),
    }
}
