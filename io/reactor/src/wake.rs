//! Wake-up pipe: lets any thread make a loop return from its poll promptly.

use std::io;
use std::os::unix::io::RawFd;

/// Anonymous non-blocking pipe pair. The read end is registered with the
/// owning loop's poller; writing one byte from any thread wakes the loop.
pub(crate) struct WakePipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl WakePipe {
    pub(crate) fn new() -> io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }

    #[inline]
    pub(crate) fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Signal the owning loop. A full pipe means a wake-up is already
    /// pending, so the result is ignored.
    pub(crate) fn wake(&self) {
        let byte = 1u8;
        unsafe {
            libc::write(self.write_fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }

    /// Drain all pending wake bytes. The read end is edge-triggered, so the
    /// loop must empty it before polling again.
    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if n <= 0 {
                break;
            }
        }
    }
}

impl Drop for WakePipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_then_drain() {
        let pipe = WakePipe::new().unwrap();
        pipe.wake();
        pipe.wake();

        let mut buf = [0u8; 8];
        let n = unsafe {
            libc::read(pipe.read_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len())
        };
        assert!(n > 0);

        pipe.drain();
        let n = unsafe {
            libc::read(pipe.read_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len())
        };
        assert!(n < 0, "pipe should be empty after drain");
    }
}
