use crate::{
    APP_CMD, CardType, ChipSelect, Clock, Command8Argument, CommandA41Argument, Error,
    GO_IDLE_STATE, IF_COND_ARGUMENT, Ocr, R1, READ_OCR, SD_SEND_OP_COND, SECTOR_SIZE,
    SEND_IF_COND, SEND_OP_COND, SET_BLOCKLEN, SdSpi, Transport, VoltageAccepted,
};

impl<T: Transport, C: Clock> SdSpi<T, C> {
    /// Brings the card from power-on to the ready state and records its type.
    ///
    /// On failure the card type stays [`CardType::Unknown`].
    pub fn init_card(&mut self) -> Result<CardType, Error<T::Error>> {
        self.card_type = CardType::Unknown;

        // At least 74 clock cycles with CS and MOSI high
        self.transport.select(false).map_err(Error::Transport)?;
        for _ in 0..self.config.idle_bytes {
            self.transport.exchange(0xFF).map_err(Error::Transport)?;
        }

        let card_type = {
            let mut card = self.chip_select();
            card.negotiate()
        };
        let card_type = match card_type {
            Ok(card_type) => card_type,
            Err(e) => {
                error!("card initialization failed");
                return Err(e);
            }
        };
        debug!("card type: {}", card_type);
        self.card_type = card_type;

        // Init OK, the data phase may run at full speed
        self.transport.set_fast_clock().map_err(Error::Transport)?;
        Ok(card_type)
    }
}

impl<T: Transport, C: Clock> ChipSelect<'_, T, C> {
    fn negotiate(&mut self) -> Result<CardType, Error<T::Error>> {
        // CMD0 with CS low puts the card into SPI mode
        let r1 = self.send_command(GO_IDLE_STATE, 0, &mut [])?;
        if r1 != R1::IN_IDLE_STATE {
            warn!("CMD0: unexpected R1 {=u8:#04x}", r1.bits());
            return Err(Error::BadR1(r1));
        }

        let mut echo = [0xFF; 4];
        let r1 = self.send_command(SEND_IF_COND, IF_COND_ARGUMENT, &mut echo)?;
        let deadline = self.deadline(self.config.init_timeout);

        let card_type = if r1 == R1::IN_IDLE_STATE {
            // SD v2 or later: it must echo the supply voltage and check pattern
            let echo = Command8Argument(u32::from_be_bytes(echo));
            let sent = Command8Argument(IF_COND_ARGUMENT);
            if echo.get_voltage_accepted() != VoltageAccepted::_2_7V_3_6V.bits()
                || echo.get_check_pattern() != sent.get_check_pattern()
            {
                warn!("CMD8: bad echo {=u32:#010x}", echo.0);
                return Err(Error::CheckPatternMismatch(echo.get_check_pattern()));
            }

            loop {
                let r1 = self.send_app_command(
                    SD_SEND_OP_COND,
                    CommandA41Argument::HCS.bits(),
                    &mut [],
                )?;
                if r1.is_empty() {
                    break;
                }
                if r1 != R1::IN_IDLE_STATE {
                    warn!("ACMD41: unexpected R1 {=u8:#04x}", r1.bits());
                    return Err(Error::BadR1(r1));
                }
                if deadline.expired(&self.clock) {
                    warn!("ACMD41: card did not leave idle state");
                    return Err(Error::InitializationFailed);
                }
            }

            let mut ocr = [0; 4];
            let r1 = self.send_command(READ_OCR, 0, &mut ocr)?;
            if !r1.is_empty() {
                return Err(Error::BadR1(r1));
            }
            if Ocr::from_be_bytes(ocr).is_high_capacity() {
                CardType::SdV2HighCapacity
            } else {
                CardType::SdV2StandardCapacity
            }
        } else {
            // SD v1 or MMC. Only SD cards know application commands.
            let card_type = if self.rejects_app_command()? {
                CardType::Mmc
            } else {
                CardType::SdV1
            };
            loop {
                let ready = match card_type {
                    CardType::Mmc => self.poll_op_cond(SEND_OP_COND, false)?,
                    _ => self.poll_op_cond(SD_SEND_OP_COND, true)?,
                };
                if ready {
                    break;
                }
                if deadline.expired(&self.clock) {
                    warn!("card did not leave idle state");
                    return Err(Error::InitializationFailed);
                }
            }
            card_type
        };

        // High capacity cards have a fixed 512 byte block length
        if !card_type.is_block_addressed() {
            let r1 = self.send_command(SET_BLOCKLEN, SECTOR_SIZE as u32, &mut [])?;
            if !r1.is_empty() {
                warn!("CMD16: unexpected R1 {=u8:#04x}", r1.bits());
                return Err(Error::BadR1(r1));
            }
        }

        Ok(card_type)
    }

    fn rejects_app_command(&mut self) -> Result<bool, Error<T::Error>> {
        match self.send_command(APP_CMD, 0, &mut []) {
            Ok(r1) => Ok(r1.contains(R1::ILLEGAL_COMMAND)),
            Err(Error::Transport(e)) => Err(Error::Transport(e)),
            Err(_) => Ok(false),
        }
    }

    /// One round of the legacy operating condition loop. Anything but a ready R1 means "retry".
    fn poll_op_cond(&mut self, command_index: u8, app: bool) -> Result<bool, Error<T::Error>> {
        let result = if app {
            self.send_app_command(command_index, 0, &mut [])
        } else {
            self.send_command(command_index, 0, &mut [])
        };
        match result {
            Ok(r1) => Ok(r1.is_empty()),
            Err(Error::Transport(e)) => Err(Error::Transport(e)),
            Err(_) => Ok(false),
        }
    }
}
