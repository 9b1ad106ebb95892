//! Descriptor wrapper: a kernel handle plus its registered event mask.

use mio::{Interest, Token};
use std::hash::{Hash, Hasher};
use std::os::unix::io::RawFd;

/// An fd together with the interest set it is (to be) registered with.
///
/// Plain value type — it never owns the descriptor. Closing the handle is
/// the job of whoever owns the socket, and happens exactly once when the
/// worker removes the connection.
#[derive(Debug, Clone, Copy)]
pub struct FdWatch {
    fd: RawFd,
    interest: Interest,
}

impl FdWatch {
    pub fn new(fd: RawFd, interest: Interest) -> Self {
        Self { fd, interest }
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// Poll token for this descriptor. The fd itself is the token, so a
    /// readiness event maps straight back to the descriptor without a
    /// side table.
    #[inline]
    pub fn token(&self) -> Token {
        Token(self.fd as usize)
    }

    /// A copy of this watch carrying a different interest set, for
    /// re-registration.
    pub fn with_interest(self, interest: Interest) -> Self {
        Self { interest, ..self }
    }
}

impl PartialEq for FdWatch {
    fn eq(&self, other: &Self) -> bool {
        self.fd == other.fd
    }
}

impl Eq for FdWatch {}

impl Hash for FdWatch {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fd.hash(state);
    }
}
