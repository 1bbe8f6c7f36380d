#![cfg_attr(not(test), no_std)]
// This mod MUST go first, so that the others see its macros.
mod fmt;

mod block;
mod card_command;
mod card_config;
mod disk;
mod init;
mod structs;
mod timer;
mod transport;

use core::ops::{Deref, DerefMut};

pub use block::*;
pub use card_command::*;
pub use card_config::*;
pub use disk::*;
use embassy_time::Duration;
pub use structs::*;
pub use timer::*;
pub use transport::*;

/// Every sector moved by the driver is this many bytes.
pub const SECTOR_SIZE: usize = 512;

/// Some errors, such as the transport error, can happen from any command.
/// Other errors are specific to one phase and never occur elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// Error from the SPI transport.
    /// If this error happens, the CS pin might still be set low
    Transport(E),
    /// The card kept the data-out line low past the ready timeout, so the command was not sent
    NotReady,
    /// No R1 (a byte with bit 7 clear) within 8 bytes of the command
    ResponseTimeout,
    /// No start block token before the read timeout, or the card stayed busy after a write
    DataTimeout,
    /// The R1 from the card is something that it should not be
    BadR1(R1),
    /// Command 8 - the card did not echo the voltage and check pattern we sent
    CheckPatternMismatch(u8),
    /// The card did not accept a data block; holds the data response token
    DataRejected(u8),
    /// The card type could not be determined
    InitializationFailed,
    /// Sector I/O attempted before a successful initialization
    NotInitialized,
    /// Buffer is not a non-empty multiple of the sector size, or too small for the request
    BufferSize,
}

impl<E> Error<E> {
    /// The status code the command layer historically reported instead of an R1 value.
    pub fn code(&self) -> Option<u8> {
        match self {
            Self::NotReady => Some(0x81),
            Self::ResponseTimeout => Some(0x82),
            _ => None,
        }
    }
}

/// Card generations, numbered as reported by the get-card-type ioctl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CardType {
    #[default]
    Unknown = 0,
    Mmc = 1,
    SdV1 = 2,
    SdV2StandardCapacity = 3,
    SdV2HighCapacity = 4,
}

impl CardType {
    /// High capacity cards take block numbers as addresses, the rest take byte offsets.
    pub fn is_block_addressed(&self) -> bool {
        *self == Self::SdV2HighCapacity
    }
}

/// Bounds for the polling loops of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// How long the card may take to leave the idle state during initialization
    pub init_timeout: Duration,
    /// How long the card may hold the data-out line low before a command
    pub ready_timeout: Duration,
    /// How long to wait for the start block token of a data block
    pub read_timeout: Duration,
    /// How long the card may stay busy after accepting a data block
    pub write_timeout: Duration,
    /// Bytes clocked with CS high before the first command (at least 74 clock cycles)
    pub idle_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_millis(1000),
            ready_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_millis(200),
            idle_bytes: 10,
        }
    }
}

/// SD/MMC card driven in SPI mode.
///
/// Owns the transport, the clock and everything learned about the card. No operation is
/// reentrant; share it between contexts only behind a lock.
pub struct SdSpi<T, C> {
    transport: T,
    clock: C,
    config: Config,
    card_type: CardType,
    card_config: CardConfiguration,
}

impl<T: Transport, C: Clock> SdSpi<T, C> {
    pub fn new(transport: T, clock: C) -> Self {
        Self::with_config(transport, clock, Config::default())
    }

    pub fn with_config(transport: T, clock: C, config: Config) -> Self {
        Self {
            transport,
            clock,
            config,
            card_type: CardType::Unknown,
            card_config: CardConfiguration::default(),
        }
    }

    pub fn card_type(&self) -> CardType {
        self.card_type
    }

    pub fn configuration(&self) -> &CardConfiguration {
        &self.card_config
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn release(self) -> (T, C) {
        (self.transport, self.clock)
    }

    fn deadline(&self, timeout: Duration) -> Deadline {
        Deadline::after(&self.clock, timeout)
    }

    /// Scope during which chip-select stays asserted. Dropping the guard releases it.
    fn chip_select(&mut self) -> ChipSelect<'_, T, C> {
        ChipSelect { card: self }
    }
}

/// Keeps the card selected for a sequence of commands and deselects it on every exit path.
struct ChipSelect<'a, T: Transport, C> {
    card: &'a mut SdSpi<T, C>,
}

impl<T: Transport, C> Deref for ChipSelect<'_, T, C> {
    type Target = SdSpi<T, C>;

    fn deref(&self) -> &Self::Target {
        self.card
    }
}

impl<T: Transport, C> DerefMut for ChipSelect<'_, T, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.card
    }
}

impl<T: Transport, C> Drop for ChipSelect<'_, T, C> {
    fn drop(&mut self) {
        if self.card.transport.select(false).is_err() {
            warn!("failed to release chip select");
        }
    }
}
