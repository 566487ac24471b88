//! Password prompt
//!
//! Reads one line from the controlling terminal with echo turned off. The
//! terminal settings are restored when the read finishes, even on error.

use crate::error::Result;
use std::io::{self, BufRead, IsTerminal, Write};

/// Whether stdin is attached to a terminal
pub fn stdin_is_terminal() -> bool {
    io::stdin().is_terminal()
}

/// Print `prompt` to stderr and read a password from stdin without echo
pub fn prompt_password(prompt: &str) -> Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "{}", prompt)?;
    stderr.flush()?;

    let _echo = EchoGuard::disable()?;
    read_line(&mut io::stdin().lock())
}

/// Read one line without its terminator
pub fn read_line(reader: &mut impl BufRead) -> Result<String> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
}

#[cfg(unix)]
struct EchoGuard {
    fd: libc::c_int,
    saved: libc::termios,
}

#[cfg(unix)]
impl EchoGuard {
    fn disable() -> Result<Self> {
        use std::os::unix::io::AsRawFd;

        let fd = io::stdin().as_raw_fd();
        let mut term = std::mem::MaybeUninit::<libc::termios>::uninit();
        // SAFETY: tcgetattr fills the struct on success, checked before use
        if unsafe { libc::tcgetattr(fd, term.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        let saved = unsafe { term.assume_init() };

        // ECHONL keeps the newline visible so the next output starts clean
        let mut quiet = saved;
        quiet.c_lflag &= !libc::ECHO;
        quiet.c_lflag |= libc::ECHONL;
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &quiet) } != 0 {
            return Err(io::Error::last_os_error().into());
        }

        Ok(Self { fd, saved })
    }
}

#[cfg(unix)]
impl Drop for EchoGuard {
    fn drop(&mut self) {
        unsafe {
            libc::tcsetattr(self.fd, libc::TCSANOW, &self.saved);
        }
    }
}

// Echo stays on where termios is unavailable
#[cfg(not(unix))]
struct EchoGuard;

#[cfg(not(unix))]
impl EchoGuard {
    fn disable() -> Result<Self> {
        Ok(Self)
    }
}
