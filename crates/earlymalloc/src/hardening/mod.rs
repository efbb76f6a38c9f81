pub mod fault;
pub mod fork;
pub mod self_check;

pub use fault::{ClientFault, Fault, InternalFault};
pub use self_check::IntegrityReport;

use core::fmt::{self, Write};

/// Abort with a diagnostic message to stderr.
/// This is used when unrecoverable corruption is detected.
#[cold]
#[inline(never)]
pub fn abort_with_message(msg: &str) -> ! {
    unsafe {
        // Write directly to stderr fd (2) -- no allocation needed
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        libc::abort();
    }
}

/// Report `fault` for `address` and terminate the process.
///
/// The line has the form
/// `earlymalloc: fault 0x0204 at 0x7f..: client fault: double free`.
#[cold]
#[inline(never)]
pub fn fatal(fault: Fault, address: usize) -> ! {
    let mut msg = MessageBuf::new();
    let _ = writeln!(
        msg,
        "earlymalloc: fault {:#06x} at {:#x}: {}",
        fault.code(),
        address,
        fault
    );
    abort_with_message(msg.as_str())
}

/// Fixed-capacity formatting target; output past the end is dropped.
struct MessageBuf {
    bytes: [u8; 256],
    len: usize,
}

impl MessageBuf {
    const fn new() -> Self {
        MessageBuf {
            bytes: [0; 256],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or("earlymalloc: fatal fault\n")
    }
}

impl Write for MessageBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.bytes.len() - self.len;
        let n = s.len().min(room);
        self.bytes[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}
