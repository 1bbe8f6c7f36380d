use core::cell::RefCell;

use embassy_sync::blocking_mutex::{Mutex, raw::RawMutex};

use super::{BlockDevice, DiskError, DiskResult, DiskStatus};

/// A [`BlockDevice`] behind a blocking mutex, for use from more than one context.
///
/// A call made while another one is still running on the same disk (for example from an
/// interrupt that preempted it) fails with [`DiskError::NotReady`] instead of re-entering the
/// driver.
pub struct SharedDisk<M: RawMutex, D> {
    disk: Mutex<M, RefCell<D>>,
}

impl<M: RawMutex, D: BlockDevice> SharedDisk<M, D> {
    pub fn new(disk: D) -> Self {
        Self {
            disk: Mutex::new(RefCell::new(disk)),
        }
    }

    /// Runs `f` with exclusive access to the disk, or returns `None` if the disk is in use.
    pub fn lock<R>(&self, f: impl FnOnce(&mut D) -> R) -> Option<R> {
        self.disk.lock(|disk| {
            let mut disk = disk.try_borrow_mut().ok()?;
            Some(f(&mut disk))
        })
    }

    pub fn status(&self) -> DiskStatus {
        self.lock(|disk| disk.status())
            .unwrap_or(DiskStatus::NOT_INITIALIZED)
    }

    pub fn initialize(&self) -> DiskStatus {
        self.lock(|disk| disk.initialize())
            .unwrap_or(DiskStatus::NOT_INITIALIZED)
    }

    pub fn read(&self, buffer: &mut [u8], sector: u32, count: usize) -> DiskResult {
        self.lock(|disk| disk.read(buffer, sector, count))
            .unwrap_or(Err(DiskError::NotReady))
    }

    #[cfg(feature = "write")]
    pub fn write(&self, buffer: &[u8], sector: u32, count: usize) -> DiskResult {
        self.lock(|disk| disk.write(buffer, sector, count))
            .unwrap_or(Err(DiskError::NotReady))
    }

    pub fn ioctl(&self, code: u8, buffer: &mut [u8]) -> DiskResult {
        self.lock(|disk| disk.ioctl(code, buffer))
            .unwrap_or(Err(DiskError::NotReady))
    }
}
