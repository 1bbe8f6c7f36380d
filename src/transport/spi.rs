use embedded_hal::{digital::OutputPin, spi::SpiBus};

use super::Transport;

/// Error from one of the two hardware resources a transport drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiError<BusError, CsError> {
    /// Error doing SPI transactions.
    /// If this happens, the CS pin might still be set low
    Bus(BusError),
    /// Error setting the level of the CS pin
    ChipSelect(CsError),
}

/// Hook that reconfigures the bus for the data-transfer phase (after initialization).
pub type SpeedSwitch<Bus> = fn(&mut Bus);

fn select<Bus: SpiBus, Cs: OutputPin>(
    bus: &mut Bus,
    cs: &mut Cs,
    selected: bool,
) -> Result<(), SpiError<Bus::Error, Cs::Error>> {
    if selected {
        cs.set_low().map_err(SpiError::ChipSelect)
    } else {
        bus.flush().map_err(SpiError::Bus)?;
        cs.set_high().map_err(SpiError::ChipSelect)?;
        // The card only releases DO after it sees a clock edge with CS high
        bus.write(&[0xFF]).map_err(SpiError::Bus)?;
        bus.flush().map_err(SpiError::Bus)
    }
}

fn exchange<Bus: SpiBus>(bus: &mut Bus, byte: u8) -> Result<u8, Bus::Error> {
    let mut buffer = [byte];
    bus.transfer_in_place(&mut buffer)?;
    Ok(buffer[0])
}

/// Transport that moves every byte in its own SPI transfer.
pub struct ByteSpi<Bus, Cs> {
    bus: Bus,
    cs: Cs,
    speed_switch: Option<SpeedSwitch<Bus>>,
}

impl<Bus, Cs> ByteSpi<Bus, Cs> {
    pub fn new(bus: Bus, cs: Cs) -> Self {
        Self {
            bus,
            cs,
            speed_switch: None,
        }
    }

    pub fn with_speed_switch(mut self, speed_switch: SpeedSwitch<Bus>) -> Self {
        self.speed_switch = Some(speed_switch);
        self
    }

    pub fn release(self) -> (Bus, Cs) {
        (self.bus, self.cs)
    }
}

impl<Bus: SpiBus, Cs: OutputPin> Transport for ByteSpi<Bus, Cs> {
    type Error = SpiError<Bus::Error, Cs::Error>;

    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error> {
        exchange(&mut self.bus, byte).map_err(SpiError::Bus)
    }

    fn select(&mut self, selected: bool) -> Result<(), Self::Error> {
        select(&mut self.bus, &mut self.cs, selected)
    }

    fn set_fast_clock(&mut self) -> Result<(), Self::Error> {
        if let Some(speed_switch) = self.speed_switch {
            speed_switch(&mut self.bus);
        }
        Ok(())
    }
}

/// Transport that moves data blocks in a single SPI transfer, letting the HAL use its FIFO.
pub struct BulkSpi<Bus, Cs> {
    bus: Bus,
    cs: Cs,
    speed_switch: Option<SpeedSwitch<Bus>>,
}

impl<Bus, Cs> BulkSpi<Bus, Cs> {
    pub fn new(bus: Bus, cs: Cs) -> Self {
        Self {
            bus,
            cs,
            speed_switch: None,
        }
    }

    pub fn with_speed_switch(mut self, speed_switch: SpeedSwitch<Bus>) -> Self {
        self.speed_switch = Some(speed_switch);
        self
    }

    pub fn release(self) -> (Bus, Cs) {
        (self.bus, self.cs)
    }
}

impl<Bus: SpiBus, Cs: OutputPin> Transport for BulkSpi<Bus, Cs> {
    type Error = SpiError<Bus::Error, Cs::Error>;

    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error> {
        exchange(&mut self.bus, byte).map_err(SpiError::Bus)
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<(), Self::Error> {
        buffer.fill(0xFF);
        self.bus.transfer_in_place(buffer).map_err(SpiError::Bus)
    }

    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.bus.write(data).map_err(SpiError::Bus)
    }

    fn select(&mut self, selected: bool) -> Result<(), Self::Error> {
        select(&mut self.bus, &mut self.cs, selected)
    }

    fn set_fast_clock(&mut self) -> Result<(), Self::Error> {
        if let Some(speed_switch) = self.speed_switch {
            speed_switch(&mut self.bus);
        }
        Ok(())
    }
}
