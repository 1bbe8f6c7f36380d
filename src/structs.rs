use bitfield::bitfield;
use bitflags::bitflags;

bitfield! {
    pub struct CommandByte0(u8);

    bool; pub get_start_bit, set_start_bit: 7;
    bool; pub get_transmission_bit, set_transmission_bit: 6;
    u8; pub get_command_index, set_command_index: 5, 0;
}

bitfield! {
    pub struct CommandByte5(u8);

    u8; pub get_crc7, set_crc7: 7, 1;
    bool; pub get_end_bit, set_end_bit: 0;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct R1: u8 {
        const BIT_7 = 1 << 7;
        const PARAMETER_ERROR = 1 << 6;
        const ADDRESS_ERROR = 1 << 5;
        const ERASE_SEQUENCE_ERROR = 1 << 4;
        const COM_CRC_ERROR = 1 << 3;
        const ILLEGAL_COMMAND = 1 << 2;
        const ERASE_RESET = 1 << 1;
        const IN_IDLE_STATE = 1 << 0;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for R1 {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "R1({=u8:#04x})", self.bits())
    }
}

bitfield! {
    pub struct Command8Argument(u32);

    u8; pub get_voltage_accepted, set_voltage_accepted: 11, 8;
    u8; pub get_check_pattern, set_check_pattern: 7, 0;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct VoltageAccepted: u8 {
        const _2_7V_3_6V = 1 << 0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Ocr: u32 {
        const _2_7V_2_8V = 1 << 15;
        const _2_8V_2_9V = 1 << 16;
        const _2_9V_3_0V = 1 << 17;
        const _3_0V_3_1V = 1 << 18;
        const _3_1V_3_2V = 1 << 19;
        const _3_2V_3_3V = 1 << 20;
        const _3_3V_3_4V = 1 << 21;
        const _3_4V_3_5V = 1 << 22;
        const _2_5V_3_6V = 1 << 23;
        const S18A = 1 << 24;
        const CO2T = 1 << 27;
        const UHS_II = 1 << 29;
        const CARD_CAPACITY_STATUS = 1 << 30;
        const CARD_POWER_UP_STATUS = 1 << 31;
    }
}

impl Ocr {
    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self::from_bits_retain(u32::from_be_bytes(bytes))
    }

    /// Set for SDHC/SDXC cards, which address data in 512-byte blocks.
    pub fn is_high_capacity(&self) -> bool {
        self.contains(Self::CARD_CAPACITY_STATUS)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct CommandA41Argument: u32 {
        const HCS = 1 << 30;
    }
}

bitfield! {
    pub struct DataResponseToken(u8);

    u8; pub get_response, _: 3, 0;
    u8; pub get_status, _: 3, 1;
}

impl DataResponseToken {
    /// Low nibble `0b0101`: data accepted.
    pub const ACCEPTED: u8 = 0x05;

    pub fn is_accepted(&self) -> bool {
        self.get_response() == Self::ACCEPTED
    }
}

bitfield! {
    /// Fields shared by every CSD layout.
    pub struct Csd(u128);

    u8; pub get_csd_structure, _: 127, 126;
}

bitfield! {
    /// CSD version 1.0 (standard capacity SD, MMC).
    pub struct CsdV1(u128);

    u8; pub get_read_bl_len, _: 83, 80;
    u16; pub get_c_size, _: 73, 62;
    u8; pub get_c_size_mult, _: 49, 47;
    u8; pub get_sector_size, _: 45, 39;
    u8; pub get_write_bl_len, _: 25, 22;
}

impl CsdV1 {
    pub fn card_capacity_sectors(&self) -> u32 {
        // BLOCKNR * BLOCK_LEN / 512, with BLOCKNR = (C_SIZE + 1) << (C_SIZE_MULT + 2)
        let shift = u32::from(self.get_read_bl_len()) + u32::from(self.get_c_size_mult());
        (u32::from(self.get_c_size()) + 1) << shift.saturating_sub(7)
    }

    /// Erase sector size in 512-byte units.
    pub fn sd_erase_sectors(&self) -> u32 {
        let write_blocks = u32::from(self.get_sector_size()) + 1;
        write_blocks << self.get_write_bl_len().saturating_sub(9)
    }
}

bitfield! {
    /// CSD version 2.0 (SDHC/SDXC).
    pub struct CsdV2(u128);

    u32; pub get_c_size, _: 69, 48;
}

impl CsdV2 {
    pub fn card_capacity_sectors(&self) -> u32 {
        (self.get_c_size() + 1).saturating_mul(1024)
    }
}

bitfield! {
    /// MMC erase group fields of the CSD.
    pub struct CsdMmc(u128);

    u8; pub get_erase_grp_size, _: 46, 42;
    u8; pub get_erase_grp_mult, _: 41, 37;
}

impl CsdMmc {
    pub fn erase_sectors(&self) -> u32 {
        (u32::from(self.get_erase_grp_size()) + 1) * (u32::from(self.get_erase_grp_mult()) + 1)
    }
}
