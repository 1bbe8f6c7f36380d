use super::{BlockDevice, DiskError, DiskResult, DiskStatus};

/// Physical drive number the SD card is mapped to.
pub const SD_DRIVE: u8 = 0;

/// Routes the drive-numbered calls of a filesystem to the SD card on [`SD_DRIVE`].
///
/// Other drive numbers report [`DiskStatus::NOT_INITIALIZED`] and fail with
/// [`DiskError::ParameterError`].
pub struct DiskIo<D> {
    sd: D,
}

impl<D: BlockDevice> DiskIo<D> {
    pub fn new(sd: D) -> Self {
        Self { sd }
    }

    pub fn into_inner(self) -> D {
        self.sd
    }

    fn drive(&mut self, pdrv: u8) -> DiskResult<&mut D> {
        match pdrv {
            SD_DRIVE => Ok(&mut self.sd),
            _ => Err(DiskError::ParameterError),
        }
    }

    pub fn disk_status(&self, pdrv: u8) -> DiskStatus {
        match pdrv {
            SD_DRIVE => self.sd.status(),
            _ => DiskStatus::NOT_INITIALIZED,
        }
    }

    pub fn disk_initialize(&mut self, pdrv: u8) -> DiskStatus {
        match self.drive(pdrv) {
            Ok(sd) => sd.initialize(),
            Err(_) => DiskStatus::NOT_INITIALIZED,
        }
    }

    pub fn disk_read(&mut self, pdrv: u8, buffer: &mut [u8], sector: u32, count: usize) -> DiskResult {
        self.drive(pdrv)?.read(buffer, sector, count)
    }

    #[cfg(feature = "write")]
    pub fn disk_write(&mut self, pdrv: u8, buffer: &[u8], sector: u32, count: usize) -> DiskResult {
        self.drive(pdrv)?.write(buffer, sector, count)
    }

    pub fn disk_ioctl(&mut self, pdrv: u8, code: u8, buffer: &mut [u8]) -> DiskResult {
        self.drive(pdrv)?.ioctl(code, buffer)
    }
}
