use crate::{
    CardType, ChipSelect, Clock, Csd, CsdMmc, CsdV1, CsdV2, Error, READ_OCR, SD_STATUS,
    SECTOR_SIZE, SEND_CID, SEND_CSD, SdSpi, Transport,
};

/// Geometry and raw registers of the card, read once after initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CardConfiguration {
    pub sector_size: u16,
    pub sector_count: u32,
    /// Erase block size in sectors
    pub erase_block_size: u32,
    pub csd: [u8; 16],
    pub cid: [u8; 16],
    pub ocr: [u8; 4],
    /// SD v2 cards only
    pub sd_status: [u8; 64],
}

impl Default for CardConfiguration {
    fn default() -> Self {
        Self {
            sector_size: 0,
            sector_count: 0,
            erase_block_size: 0,
            csd: [0; 16],
            cid: [0; 16],
            ocr: [0; 4],
            sd_status: [0; 64],
        }
    }
}

/// Number of 512-byte sectors on the card described by `csd`.
pub fn csd_sector_count(csd: &[u8; 16]) -> u32 {
    let raw = u128::from_be_bytes(*csd);
    match Csd(raw).get_csd_structure() {
        1 => CsdV2(raw).card_capacity_sectors(),
        _ => CsdV1(raw).card_capacity_sectors(),
    }
}

/// Erase block size in sectors, or `None` when the card type is unknown.
///
/// SD cards report their allocation unit in the SD status; MMC and the legacy formula use the
/// erase fields of the CSD.
pub fn erase_block_sectors(card_type: CardType, csd: &[u8; 16], sd_status: &[u8; 64]) -> Option<u32> {
    let raw = u128::from_be_bytes(*csd);
    match card_type {
        CardType::SdV2StandardCapacity | CardType::SdV2HighCapacity => {
            let au_size = sd_status[10] >> 4;
            Some(16 << au_size)
        }
        CardType::SdV1 => Some(CsdV1(raw).sd_erase_sectors()),
        CardType::Mmc => Some(CsdMmc(raw).erase_sectors()),
        CardType::Unknown => None,
    }
}

impl<T: Transport, C: Clock> SdSpi<T, C> {
    /// Reads OCR, CID, CSD (and SD status on SD v2 cards) and derives the card geometry.
    pub fn read_configuration(&mut self) -> Result<&CardConfiguration, Error<T::Error>> {
        if self.card_type == CardType::Unknown {
            return Err(Error::NotInitialized);
        }
        let config = {
            let mut card = self.chip_select();
            card.read_registers()?
        };
        debug!(
            "{=u32} sectors, erase block {=u32} sectors",
            config.sector_count,
            config.erase_block_size
        );
        self.card_config = config;
        Ok(&self.card_config)
    }
}

impl<T: Transport, C: Clock> ChipSelect<'_, T, C> {
    fn read_registers(&mut self) -> Result<CardConfiguration, Error<T::Error>> {
        let mut config = CardConfiguration::default();

        let r1 = self.send_command(READ_OCR, 0, &mut config.ocr)?;
        if !r1.is_empty() {
            return Err(Error::BadR1(r1));
        }

        let r1 = self.send_command(SEND_CID, 0, &mut [])?;
        if !r1.is_empty() {
            return Err(Error::BadR1(r1));
        }
        self.receive_data_block(&mut config.cid)?;

        let r1 = self.send_command(SEND_CSD, 0, &mut [])?;
        if !r1.is_empty() {
            return Err(Error::BadR1(r1));
        }
        self.receive_data_block(&mut config.csd)?;

        config.sector_size = SECTOR_SIZE as u16;
        config.sector_count = csd_sector_count(&config.csd);

        if matches!(
            self.card_type,
            CardType::SdV2StandardCapacity | CardType::SdV2HighCapacity
        ) {
            // R2: R1 followed by one more status byte
            let mut status = [0; 1];
            let r1 = self.send_app_command(SD_STATUS, 0, &mut status)?;
            if !r1.is_empty() {
                return Err(Error::BadR1(r1));
            }
            self.receive_data_block(&mut config.sd_status)?;
        }

        config.erase_block_size =
            erase_block_sectors(self.card_type, &config.csd, &config.sd_status).ok_or_else(|| {
                warn!("unknown card type, no erase geometry");
                Error::InitializationFailed
            })?;

        Ok(config)
    }
}
