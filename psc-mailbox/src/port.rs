//! Word access to the mailbox register window.
//!
//! Two hardware backends exist: a direct mapping of the physical window
//! through `/dev/mem`, and the `psc_mbox` sysfs binary attribute published by
//! the mlxbf-mmio driver, which forwards positioned 4-byte reads and writes to
//! the same registers.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::str::FromStr;
use std::sync::atomic::{fence, Ordering};

use log::{debug, info, warn};
use thiserror::Error;

use crate::regs::{MBOX_BASE, MBOX_MAP_SIZE};
use crate::sim::SimPort;

/// Default path for the direct mapping backend.
pub const DEFAULT_MEM_PATH: &str = "/dev/mem";

/// Default path of the sysfs register window.
pub const DEFAULT_DEVICE_PATH: &str = "/sys/devices/platform/MLNXBF3A:00/psc_mbox";

/// 32-bit register access at byte offsets within the mailbox window.
pub trait RegisterPort {
    fn read_word(&mut self, offset: usize) -> io::Result<u32>;

    fn write_word(&mut self, offset: usize, value: u32) -> io::Result<()>;

    /// Push writes in `[offset, offset + len)` out to the device.
    fn sync(&mut self, _offset: usize, _len: usize) {}
}

impl<P: RegisterPort + ?Sized> RegisterPort for Box<P> {
    fn read_word(&mut self, offset: usize) -> io::Result<u32> {
        (**self).read_word(offset)
    }

    fn write_word(&mut self, offset: usize, value: u32) -> io::Result<()> {
        (**self).write_word(offset, value)
    }

    fn sync(&mut self, offset: usize, len: usize) {
        (**self).sync(offset, len)
    }
}

pub(crate) fn check_offset(offset: usize) -> io::Result<()> {
    if offset % 4 != 0 || offset + 4 > MBOX_MAP_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("register offset 0x{:x} outside mailbox window", offset),
        ));
    }
    Ok(())
}

/// Direct mapping of the register window.
pub struct MappedPort {
    base: NonNull<u32>,
}

impl MappedPort {
    /// Map `MBOX_MAP_SIZE` bytes of `path` starting at `phys_base`.
    pub fn open(path: &Path, phys_base: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)?;

        let offset = libc::off_t::try_from(phys_base)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        // The mapping outlives the descriptor, which is closed when `file` drops.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                MBOX_MAP_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_LOCKED,
                file.as_raw_fd(),
                offset,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let base = NonNull::new(addr as *mut u32)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
        Ok(MappedPort { base })
    }

    fn ptr(&self, offset: usize) -> io::Result<*mut u32> {
        check_offset(offset)?;
        Ok(unsafe { self.base.as_ptr().add(offset / 4) })
    }
}

impl RegisterPort for MappedPort {
    fn read_word(&mut self, offset: usize) -> io::Result<u32> {
        let ptr = self.ptr(offset)?;
        fence(Ordering::SeqCst);
        Ok(unsafe { ptr.read_volatile() })
    }

    fn write_word(&mut self, offset: usize, value: u32) -> io::Result<()> {
        let ptr = self.ptr(offset)?;
        fence(Ordering::SeqCst);
        unsafe { ptr.write_volatile(value) };
        Ok(())
    }

    fn sync(&mut self, offset: usize, len: usize) {
        // msync wants a page aligned start.
        let page = 4096;
        let start = offset & !(page - 1);
        let end = (offset + len).min(MBOX_MAP_SIZE);
        let rc = unsafe {
            libc::msync(
                (self.base.as_ptr() as *mut u8).add(start) as *mut libc::c_void,
                end - start,
                libc::MS_SYNC | libc::MS_INVALIDATE,
            )
        };
        if rc != 0 {
            debug!("msync of 0x{:x}..0x{:x} failed: {}", start, end, io::Error::last_os_error());
        }
    }
}

impl Drop for MappedPort {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, MBOX_MAP_SIZE);
        }
    }
}

/// Positioned 4-byte I/O on a device file exposing the register window.
pub struct FilePort {
    file: File,
}

impl FilePort {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)?;
        Ok(FilePort { file })
    }
}

impl RegisterPort for FilePort {
    fn read_word(&mut self, offset: usize) -> io::Result<u32> {
        check_offset(offset)?;
        fence(Ordering::SeqCst);
        let mut buf = [0u8; 4];
        self.file.read_exact_at(&mut buf, offset as u64)?;
        Ok(u32::from_ne_bytes(buf))
    }

    fn write_word(&mut self, offset: usize, value: u32) -> io::Result<()> {
        check_offset(offset)?;
        fence(Ordering::SeqCst);
        // The sysfs window reports zero bytes written even on success.
        self.file.write_at(&value.to_ne_bytes(), offset as u64)?;
        Ok(())
    }
}

/// Which register backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Direct mapping first, then the device file.
    #[default]
    Auto,
    Memory,
    File,
    /// In-process simulated PSC that echoes every message back.
    Loopback,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Backend::Auto),
            "mem" | "memory" => Ok(Backend::Memory),
            "file" | "sysfs" => Ok(Backend::File),
            "loopback" | "sim" => Ok(Backend::Loopback),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortConfig {
    pub backend: Backend,
    pub mem_path: PathBuf,
    pub base: u64,
    pub device_path: PathBuf,
}

impl Default for PortConfig {
    fn default() -> Self {
        PortConfig {
            backend: Backend::Auto,
            mem_path: PathBuf::from(DEFAULT_MEM_PATH),
            base: MBOX_BASE,
            device_path: PathBuf::from(DEFAULT_DEVICE_PATH),
        }
    }
}

#[derive(Debug, Error)]
pub enum PortError {
    #[error("cannot map {} at 0x{base:x}: {source}", .path.display())]
    Map {
        path: PathBuf,
        base: u64,
        source: io::Error,
    },
    #[error("cannot open register window {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("no mailbox backend available ({mapped}; {file})")]
    Unavailable {
        mapped: Box<PortError>,
        file: Box<PortError>,
    },
}

fn open_mapped(config: &PortConfig) -> Result<MappedPort, PortError> {
    MappedPort::open(&config.mem_path, config.base).map_err(|source| PortError::Map {
        path: config.mem_path.clone(),
        base: config.base,
        source,
    })
}

fn open_file(config: &PortConfig) -> Result<FilePort, PortError> {
    FilePort::open(&config.device_path).map_err(|source| PortError::Open {
        path: config.device_path.clone(),
        source,
    })
}

/// Open the register window selected by `config`.
pub fn open_port(config: &PortConfig) -> Result<Box<dyn RegisterPort>, PortError> {
    match config.backend {
        Backend::Memory => Ok(Box::new(open_mapped(config)?)),
        Backend::File => Ok(Box::new(open_file(config)?)),
        Backend::Loopback => {
            info!("Using simulated loopback mailbox");
            Ok(Box::new(SimPort::loopback()))
        }
        Backend::Auto => match open_mapped(config) {
            Ok(port) => {
                info!("Mapped mailbox at 0x{:x} via {}", config.base, config.mem_path.display());
                Ok(Box::new(port))
            }
            Err(mapped) => {
                warn!("{}, falling back to {}", mapped, config.device_path.display());
                match open_file(config) {
                    Ok(port) => Ok(Box::new(port)),
                    Err(file) => Err(PortError::Unavailable {
                        mapped: Box::new(mapped),
                        file: Box::new(file),
                    }),
                }
            }
        },
    }
}
