mod spi;

pub use spi::*;

/// Byte-level access to an SD card on an SPI bus.
///
/// Implementations own the chip-select line. `select(false)` must release chip-select and then
/// clock one dummy byte so the card lets go of the data-out line.
pub trait Transport {
    type Error;

    /// Sends `byte` and returns the byte clocked in at the same time.
    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error>;

    /// Fills `buffer` with bytes clocked in while sending `0xFF`.
    fn receive(&mut self, buffer: &mut [u8]) -> Result<(), Self::Error> {
        for byte in buffer {
            *byte = self.exchange(0xFF)?;
        }
        Ok(())
    }

    /// Sends `data`, discarding whatever the card returns.
    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        for &byte in data {
            self.exchange(byte)?;
        }
        Ok(())
    }

    fn select(&mut self, selected: bool) -> Result<(), Self::Error>;

    /// Called once initialization succeeded; implementations may raise the bus clock here.
    fn set_fast_clock(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    type Error = T::Error;

    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error> {
        (**self).exchange(byte)
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<(), Self::Error> {
        (**self).receive(buffer)
    }

    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        (**self).send(data)
    }

    fn select(&mut self, selected: bool) -> Result<(), Self::Error> {
        (**self).select(selected)
    }

    fn set_fast_clock(&mut self) -> Result<(), Self::Error> {
        (**self).set_fast_clock()
    }
}
