mod diskio;
#[cfg(feature = "embassy-sync")]
mod shared;

use bitflags::bitflags;

pub use diskio::*;
#[cfg(feature = "embassy-sync")]
pub use shared::*;

use crate::{CardConfiguration, CardType, Clock, Error, SECTOR_SIZE, SdSpi, Transport};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DiskStatus: u8 {
        const NOT_INITIALIZED = 1 << 0;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for DiskStatus {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "DiskStatus({=u8:#04x})", self.bits())
    }
}

/// Failure codes reported to the filesystem layer. Success is `Ok(())`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DiskError {
    /// Unrecoverable error during the operation
    Error = 1,
    /// The disk is not initialized, or did not become ready in time
    NotReady = 3,
    /// Unknown control code, bad drive number or unusable buffer
    ParameterError = 4,
}

pub type DiskResult<T = ()> = Result<T, DiskError>;

impl<E> From<Error<E>> for DiskError {
    fn from(error: Error<E>) -> Self {
        match error {
            Error::NotInitialized | Error::NotReady => DiskError::NotReady,
            Error::BufferSize => DiskError::ParameterError,
            _ => DiskError::Error,
        }
    }
}

/// Control codes understood by [`BlockDevice::ioctl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum IoctlCode {
    /// Wait until the card finished any pending write
    Sync = 0,
    /// Sector count (`u32`)
    GetSectorCount = 1,
    /// Sector size (`u16`)
    GetSectorSize = 2,
    /// Erase block size in sectors (`u32`)
    GetBlockSize = 3,
    /// Card type (1 byte)
    GetCardType = 10,
    /// Raw CSD (16 bytes)
    GetCsd = 11,
    /// Raw CID (16 bytes)
    GetCid = 12,
    /// Raw OCR (4 bytes)
    GetOcr = 13,
    /// Raw SD status (64 bytes)
    GetSdStatus = 14,
}

impl TryFrom<u8> for IoctlCode {
    type Error = DiskError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Self::Sync,
            1 => Self::GetSectorCount,
            2 => Self::GetSectorSize,
            3 => Self::GetBlockSize,
            10 => Self::GetCardType,
            11 => Self::GetCsd,
            12 => Self::GetCid,
            13 => Self::GetOcr,
            14 => Self::GetSdStatus,
            _ => return Err(DiskError::ParameterError),
        })
    }
}

/// The surface a filesystem uses to talk to a disk.
///
/// `read`, `write` and `ioctl` fail with [`DiskError::NotReady`] while the status reports
/// [`DiskStatus::NOT_INITIALIZED`].
pub trait BlockDevice {
    fn status(&self) -> DiskStatus;
    /// (Re)initializes the disk; safe to call repeatedly.
    fn initialize(&mut self) -> DiskStatus;
    fn read(&mut self, buffer: &mut [u8], sector: u32, count: usize) -> DiskResult;
    #[cfg(feature = "write")]
    fn write(&mut self, buffer: &[u8], sector: u32, count: usize) -> DiskResult;
    fn ioctl(&mut self, code: u8, buffer: &mut [u8]) -> DiskResult;
}

/// Block device backed by an SD/MMC card in SPI mode.
pub struct SdDisk<T, C> {
    card: SdSpi<T, C>,
    status: DiskStatus,
}

impl<T: Transport, C: Clock> SdDisk<T, C> {
    pub fn new(card: SdSpi<T, C>) -> Self {
        Self {
            card,
            status: DiskStatus::NOT_INITIALIZED,
        }
    }

    pub fn card_type(&self) -> CardType {
        self.card.card_type()
    }

    pub fn configuration(&self) -> &CardConfiguration {
        self.card.configuration()
    }

    pub fn card(&self) -> &SdSpi<T, C> {
        &self.card
    }

    pub fn into_inner(self) -> SdSpi<T, C> {
        self.card
    }

    fn check_ready(&self) -> DiskResult {
        if self.status.contains(DiskStatus::NOT_INITIALIZED) {
            Err(DiskError::NotReady)
        } else {
            Ok(())
        }
    }

    /// Maps a driver error for the filesystem. A card that stopped answering commands
    /// has to be initialized again.
    fn fail(&mut self, error: Error<T::Error>) -> DiskError {
        if let Error::ResponseTimeout = error {
            warn!("card stopped responding");
            self.status.insert(DiskStatus::NOT_INITIALIZED);
        }
        error.into()
    }
}

fn sectors_len(buffer_len: usize, count: usize) -> DiskResult<usize> {
    let len = count.checked_mul(SECTOR_SIZE).ok_or(DiskError::ParameterError)?;
    if count == 0 || buffer_len < len {
        return Err(DiskError::ParameterError);
    }
    Ok(len)
}

fn put(buffer: &mut [u8], bytes: &[u8]) -> DiskResult {
    buffer
        .get_mut(..bytes.len())
        .ok_or(DiskError::ParameterError)?
        .copy_from_slice(bytes);
    Ok(())
}

impl<T: Transport, C: Clock> BlockDevice for SdDisk<T, C> {
    fn status(&self) -> DiskStatus {
        self.status
    }

    fn initialize(&mut self) -> DiskStatus {
        self.status.insert(DiskStatus::NOT_INITIALIZED);
        if self.card.init_card().is_ok() && self.card.read_configuration().is_ok() {
            self.status.remove(DiskStatus::NOT_INITIALIZED);
        }
        self.status
    }

    fn read(&mut self, buffer: &mut [u8], sector: u32, count: usize) -> DiskResult {
        self.check_ready()?;
        let len = sectors_len(buffer.len(), count)?;
        self.card
            .read_sectors(sector, &mut buffer[..len])
            .map_err(|e| self.fail(e))
    }

    #[cfg(feature = "write")]
    fn write(&mut self, buffer: &[u8], sector: u32, count: usize) -> DiskResult {
        self.check_ready()?;
        let len = sectors_len(buffer.len(), count)?;
        self.card
            .write_sectors(sector, &buffer[..len])
            .map_err(|e| self.fail(e))
    }

    fn ioctl(&mut self, code: u8, buffer: &mut [u8]) -> DiskResult {
        self.check_ready()?;
        let config = self.card.configuration();
        match IoctlCode::try_from(code)? {
            IoctlCode::Sync => return self.card.sync().map_err(|e| self.fail(e)),
            IoctlCode::GetSectorCount => put(buffer, &config.sector_count.to_ne_bytes()),
            IoctlCode::GetSectorSize => put(buffer, &config.sector_size.to_ne_bytes()),
            IoctlCode::GetBlockSize => put(buffer, &config.erase_block_size.to_ne_bytes()),
            IoctlCode::GetCardType => put(buffer, &[self.card.card_type() as u8]),
            IoctlCode::GetCsd => put(buffer, &config.csd),
            IoctlCode::GetCid => put(buffer, &config.cid),
            IoctlCode::GetOcr => put(buffer, &config.ocr),
            IoctlCode::GetSdStatus => put(buffer, &config.sd_status),
        }
    }
}
