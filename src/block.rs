use crate::{
    CardType, Clock, Error, READ_MULTIPLE_BLOCK, READ_SINGLE_BLOCK, SECTOR_SIZE,
    STOP_TRANSMISSION, SdSpi, Transport,
};
#[cfg(feature = "write")]
use crate::{DataResponseToken, WRITE_BLOCK, WRITE_MULTIPLE_BLOCK};

/// Precedes a data block read from the card, and a single block written to it.
pub const START_BLOCK_TOKEN: u8 = 0xFE;
/// Precedes every data block of a multi block write.
pub const START_MULTIPLE_BLOCK_WRITE_TOKEN: u8 = 0xFC;
/// Ends a multi block write.
pub const STOP_TRAN_TOKEN: u8 = 0xFD;

fn sector_count(buffer_len: usize) -> Option<usize> {
    if buffer_len == 0 || buffer_len % SECTOR_SIZE != 0 {
        None
    } else {
        Some(buffer_len / SECTOR_SIZE)
    }
}

impl<T: Transport, C: Clock> SdSpi<T, C> {
    /// Sector number to the address argument the card expects.
    fn card_address(&self, sector: u32) -> u32 {
        if self.card_type.is_block_addressed() {
            sector
        } else {
            sector << 9
        }
    }

    /// Receives one data block into `buffer`. The CRC the card sends is discarded.
    pub(crate) fn receive_data_block(&mut self, buffer: &mut [u8]) -> Result<(), Error<T::Error>> {
        let deadline = self.deadline(self.config.read_timeout);
        loop {
            if self.transport.exchange(0xFF).map_err(Error::Transport)? == START_BLOCK_TOKEN {
                break;
            }
            if deadline.expired(&self.clock) {
                warn!("no start block token");
                return Err(Error::DataTimeout);
            }
        }
        self.transport.receive(buffer).map_err(Error::Transport)?;
        let mut crc = [0xFF; 2];
        self.transport.receive(&mut crc).map_err(Error::Transport)?;
        Ok(())
    }

    /// Sends one data block behind `token`, then waits for the card to finish programming it.
    #[cfg(feature = "write")]
    pub(crate) fn send_data_block(&mut self, data: &[u8], token: u8) -> Result<(), Error<T::Error>> {
        self.transport.send(&[token]).map_err(Error::Transport)?;
        self.transport.send(data).map_err(Error::Transport)?;
        self.transport.send(&[0xFF, 0xFF]).map_err(Error::Transport)?;

        let response = DataResponseToken(self.transport.exchange(0xFF).map_err(Error::Transport)?);
        if !response.is_accepted() {
            warn!("data block rejected: {=u8:#04x}", response.0);
            return Err(Error::DataRejected(response.0));
        }

        let deadline = self.deadline(self.config.write_timeout);
        loop {
            if self.transport.exchange(0xFF).map_err(Error::Transport)? == 0xFF {
                return Ok(());
            }
            if deadline.expired(&self.clock) {
                warn!("card busy after write");
                return Err(Error::DataTimeout);
            }
        }
    }

    /// Reads `buffer.len() / 512` sectors starting at `start_sector`.
    ///
    /// A multi sector read either fills the whole buffer or fails; the contents of `buffer` are
    /// unspecified after a failure.
    pub fn read_sectors(&mut self, start_sector: u32, buffer: &mut [u8]) -> Result<(), Error<T::Error>> {
        if self.card_type == CardType::Unknown {
            return Err(Error::NotInitialized);
        }
        let count = sector_count(buffer.len()).ok_or(Error::BufferSize)?;
        let address = self.card_address(start_sector);
        trace!("read {=usize} sectors at {=u32}", count, start_sector);

        let mut card = self.chip_select();
        if count == 1 {
            let r1 = card.send_command(READ_SINGLE_BLOCK, address, &mut [])?;
            if !r1.is_empty() {
                return Err(Error::BadR1(r1));
            }
            card.receive_data_block(buffer)
        } else {
            let r1 = card.send_command(READ_MULTIPLE_BLOCK, address, &mut [])?;
            if !r1.is_empty() {
                return Err(Error::BadR1(r1));
            }
            let mut remaining = count;
            let mut transfer = Ok(());
            for sector in buffer.chunks_exact_mut(SECTOR_SIZE) {
                if let Err(e) = card.receive_data_block(sector) {
                    transfer = Err(e);
                    break;
                }
                remaining -= 1;
            }

            // The card keeps streaming until told to stop, whatever happened above. Its R1 is
            // not checked, only that the card is ready afterwards.
            let stop = card.send_command(STOP_TRANSMISSION, 0, &mut []);
            let ready = card.wait_ready();
            transfer?;
            if let Err(Error::Transport(e)) = stop {
                return Err(Error::Transport(e));
            }
            ready?;
            if remaining != 0 {
                return Err(Error::DataTimeout);
            }
            Ok(())
        }
    }

    /// Writes `data.len() / 512` sectors starting at `start_sector`.
    #[cfg(feature = "write")]
    pub fn write_sectors(&mut self, start_sector: u32, data: &[u8]) -> Result<(), Error<T::Error>> {
        if self.card_type == CardType::Unknown {
            return Err(Error::NotInitialized);
        }
        let count = sector_count(data.len()).ok_or(Error::BufferSize)?;
        let address = self.card_address(start_sector);
        trace!("write {=usize} sectors at {=u32}", count, start_sector);

        let mut card = self.chip_select();
        if count == 1 {
            let r1 = card.send_command(WRITE_BLOCK, address, &mut [])?;
            if !r1.is_empty() {
                return Err(Error::BadR1(r1));
            }
            card.send_data_block(data, START_BLOCK_TOKEN)
        } else {
            let r1 = card.send_command(WRITE_MULTIPLE_BLOCK, address, &mut [])?;
            if !r1.is_empty() {
                return Err(Error::BadR1(r1));
            }
            let mut remaining = count;
            let mut transfer = Ok(());
            for sector in data.chunks_exact(SECTOR_SIZE) {
                if let Err(e) = card.send_data_block(sector, START_MULTIPLE_BLOCK_WRITE_TOKEN) {
                    transfer = Err(e);
                    break;
                }
                remaining -= 1;
            }

            let stop = card.transport.send(&[STOP_TRAN_TOKEN]).map_err(Error::Transport);
            let ready = card.wait_ready();
            transfer?;
            stop?;
            ready?;
            if remaining != 0 {
                return Err(Error::DataTimeout);
            }
            Ok(())
        }
    }
}
