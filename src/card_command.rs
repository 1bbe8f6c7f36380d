use crc::{CRC_7_MMC, Crc};

use crate::{Clock, CommandByte0, CommandByte5, Error, R1, SdSpi, Transport};

pub const GO_IDLE_STATE: u8 = 0;
/// MMC only
pub const SEND_OP_COND: u8 = 1;
pub const SEND_IF_COND: u8 = 8;
pub const SEND_CSD: u8 = 9;
pub const SEND_CID: u8 = 10;
pub const STOP_TRANSMISSION: u8 = 12;
pub const SET_BLOCKLEN: u8 = 16;
pub const READ_SINGLE_BLOCK: u8 = 17;
pub const READ_MULTIPLE_BLOCK: u8 = 18;
pub const WRITE_BLOCK: u8 = 24;
pub const WRITE_MULTIPLE_BLOCK: u8 = 25;
pub const APP_CMD: u8 = 55;
pub const READ_OCR: u8 = 58;

/// Application commands, only valid after [`APP_CMD`].
pub const SD_STATUS: u8 = 13;
pub const SD_SEND_OP_COND: u8 = 41;

/// Argument of [`SEND_IF_COND`]: 2.7-3.6V supply and check pattern `0xAA`.
pub const IF_COND_ARGUMENT: u32 = 0x1AA;

/// A card answers a command within this many bytes.
pub const RESPONSE_BYTES: usize = 8;

/// Trailer byte for commands whose CRC the card ignores: dummy CRC-7 and the stop bit.
const DUMMY_CRC_STOP: u8 = 0x01;

/// Builds the 6-byte command frame.
///
/// Only the commands issued before the card is in SPI mode ([`GO_IDLE_STATE`] and
/// [`SEND_IF_COND`]) carry a real CRC-7. The card ignores the CRC of everything else.
pub fn format_command(command_index: u8, argument: u32) -> [u8; 6] {
    let mut command: [u8; 6] = Default::default();
    command[0] = {
        let mut byte = CommandByte0(Default::default());
        byte.set_start_bit(false);
        byte.set_transmission_bit(true);
        byte.set_command_index(command_index);
        byte.0
    };
    command[1..5].copy_from_slice(&argument.to_be_bytes());
    command[5] = match command_index {
        GO_IDLE_STATE | SEND_IF_COND => {
            let mut byte = CommandByte5(Default::default());
            byte.set_crc7(Crc::<u8>::new(&CRC_7_MMC).checksum(&command[..5]));
            byte.set_end_bit(true);
            byte.0
        }
        _ => DUMMY_CRC_STOP,
    };

    command
}

impl<T: Transport, C: Clock> SdSpi<T, C> {
    /// Polls until the card releases the data-out line (reads `0xFF`).
    ///
    /// Does not modify CS.
    pub(crate) fn wait_ready(&mut self) -> Result<(), Error<T::Error>> {
        let deadline = self.deadline(self.config.ready_timeout);
        self.transport.exchange(0xFF).map_err(Error::Transport)?;
        loop {
            if self.transport.exchange(0xFF).map_err(Error::Transport)? == 0xFF {
                return Ok(());
            }
            if deadline.expired(&self.clock) {
                warn!("card stayed busy");
                return Err(Error::NotReady);
            }
        }
    }

    /// Waits until the card finished any pending write.
    pub fn sync(&mut self) -> Result<(), Error<T::Error>> {
        let mut card = self.chip_select();
        card.transport.select(true).map_err(Error::Transport)?;
        card.wait_ready()
    }

    /// Selects the card, sends a command and returns its R1.
    ///
    /// `response` receives the bytes following R1 (for example the OCR of [`READ_OCR`]); pass an
    /// empty slice for plain R1 commands. The card is left selected so several commands can be
    /// issued in one sequence.
    pub(crate) fn send_command(
        &mut self,
        command_index: u8,
        argument: u32,
        response: &mut [u8],
    ) -> Result<R1, Error<T::Error>> {
        self.transport.select(true).map_err(Error::Transport)?;
        self.wait_ready()?;

        self.transport
            .send(&format_command(command_index, argument))
            .map_err(Error::Transport)?;

        let mut r1 = None;
        for _ in 0..RESPONSE_BYTES {
            let byte = R1::from_bits_retain(self.transport.exchange(0xFF).map_err(Error::Transport)?);
            if !byte.contains(R1::BIT_7) {
                r1 = Some(byte);
                break;
            }
        }
        let Some(r1) = r1 else {
            warn!("CMD{=u8}: no response", command_index);
            return Err(Error::ResponseTimeout);
        };
        trace!("CMD{=u8}({=u32:#x}) -> {=u8:#04x}", command_index, argument, r1.bits());

        if !response.is_empty() {
            self.transport.receive(response).map_err(Error::Transport)?;
        }
        Ok(r1)
    }

    /// Sends [`APP_CMD`] followed by the application command `command_index`.
    ///
    /// If the card answers `APP_CMD` with anything other than idle or ready, that R1 is returned
    /// and the application command is not sent.
    pub(crate) fn send_app_command(
        &mut self,
        command_index: u8,
        argument: u32,
        response: &mut [u8],
    ) -> Result<R1, Error<T::Error>> {
        let r1 = self.send_command(APP_CMD, 0, &mut [])?;
        if r1.bits() > R1::IN_IDLE_STATE.bits() {
            return Ok(r1);
        }
        self.send_command(command_index, argument, response)
    }
}
