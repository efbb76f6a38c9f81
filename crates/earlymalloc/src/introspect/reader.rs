use super::IntrospectError;

/// Reads memory of the process that owns an arena, which need not be this one.
pub trait MemoryReader {
    /// Fill `buf` from `address` in the target process.
    fn read(&self, address: usize, buf: &mut [u8]) -> Result<(), IntrospectError>;
}

/// Reads this process's memory directly.
///
/// No lock is taken, so reads of a live arena may observe a mutation half
/// applied.
#[derive(Debug)]
pub struct LocalReader {
    _private: (),
}

impl LocalReader {
    /// # Safety
    /// Every address handed to `read`, with the buffer length, must be
    /// readable memory of this process. Reading an arena through its
    /// `zone_base` satisfies this.
    pub unsafe fn new() -> Self {
        LocalReader { _private: () }
    }
}

impl MemoryReader for LocalReader {
    fn read(&self, address: usize, buf: &mut [u8]) -> Result<(), IntrospectError> {
        if address == 0 || address.checked_add(buf.len()).is_none() {
            return Err(IntrospectError::Read {
                address,
                len: buf.len(),
            });
        }
        // SAFETY: guaranteed readable by the caller of `LocalReader::new`.
        unsafe {
            core::ptr::copy_nonoverlapping(address as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }
}

/// Reads another process's memory with `process_vm_readv`.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy)]
pub struct ProcessReader {
    pid: libc::pid_t,
}

#[cfg(target_os = "linux")]
impl ProcessReader {
    pub fn new(pid: libc::pid_t) -> Self {
        ProcessReader { pid }
    }
}

#[cfg(target_os = "linux")]
impl MemoryReader for ProcessReader {
    fn read(&self, address: usize, buf: &mut [u8]) -> Result<(), IntrospectError> {
        let err = IntrospectError::Read {
            address,
            len: buf.len(),
        };
        let local = libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        };
        let remote = libc::iovec {
            iov_base: address as *mut libc::c_void,
            iov_len: buf.len(),
        };
        // SAFETY: `local` covers exactly `buf`; the kernel validates `remote`.
        let n = unsafe { libc::process_vm_readv(self.pid, &local, 1, &remote, 1, 0) };
        if n < 0 || n as usize != buf.len() {
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_reader_copies() {
        let source = [1u8, 2, 3, 4];
        let reader = unsafe { LocalReader::new() };
        let mut buf = [0u8; 4];
        reader.read(source.as_ptr() as usize, &mut buf).unwrap();
        assert_eq!(buf, source);
        assert!(reader.read(0, &mut buf).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn process_reader_reads_self() {
        let source = [9u8; 32];
        let reader = ProcessReader::new(unsafe { libc::getpid() });
        let mut buf = [0u8; 32];
        // Ptrace-restricted sandboxes refuse even self reads.
        if reader.read(source.as_ptr() as usize, &mut buf).is_ok() {
            assert_eq!(buf, source);
        }
    }
}
