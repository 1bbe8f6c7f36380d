//! A simulated SD/MMC card speaking SPI mode, byte by byte.
#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::convert::Infallible;

use embassy_time::Instant;
use spi_sd_disk::{Clock, Config, SdDisk, SdSpi, Transport};

pub const SECTORS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    SdV2HighCapacity,
    SdV2StandardCapacity,
    SdV1,
    Mmc,
}

enum State {
    Command,
    ReadMultiple { next: usize },
    Write { sector: usize, multiple: bool, data: Option<Vec<u8>>, crc_left: u8 },
}

/// Clock that moves forward by `step_ms` every time it is read.
pub struct StepClock {
    now_ms: Cell<u64>,
    step_ms: u64,
}

impl StepClock {
    pub fn new(step_ms: u64) -> Self {
        Self {
            now_ms: Cell::new(0),
            step_ms,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.now_ms.get()
    }
}

impl Clock for StepClock {
    fn now(&self) -> Instant {
        let now = self.now_ms.get();
        self.now_ms.set(now + self.step_ms);
        Instant::from_millis(now)
    }
}

pub struct SimCard {
    kind: Kind,
    /// `false` simulates an empty socket: every byte reads `0xFF`
    present: bool,
    pub storage: Vec<u8>,
    pub csd: [u8; 16],
    pub cid: [u8; 16],
    pub ocr: [u8; 4],
    pub sd_status: [u8; 64],
    /// How many operating condition polls the card stays idle for, `usize::MAX` for never
    pub op_cond_polls: usize,
    /// Data response token returned for written blocks
    pub data_response: u8,
    /// R1 returned for CMD0
    pub reset_response: u8,
    /// Check pattern echoed for CMD8, `None` echoes the one sent
    pub check_pattern: Option<u8>,
    /// R1 returned for every ACMD41 instead of the idle/ready progression
    pub op_cond_error: Option<u8>,
    /// Data-out shorted low: every byte reads `0x00`
    pub data_out_low: bool,
    /// The card never finishes programming an accepted block
    pub stuck_busy: bool,
    /// CMD12 stops the stream but sends no R1
    pub silent_stop: bool,
    pub selected: bool,
    pub commands: Vec<u8>,
    idle: bool,
    busy: bool,
    app_command: bool,
    polls_left: usize,
    frame: Vec<u8>,
    out: VecDeque<u8>,
    state: State,
}

fn set_bits(raw: &mut u128, high: u32, low: u32, value: u128) {
    let mask = ((1u128 << (high - low + 1)) - 1) << low;
    *raw = (*raw & !mask) | ((value << low) & mask);
}

impl SimCard {
    pub fn new(kind: Kind) -> Self {
        let mut csd = 0u128;
        match kind {
            Kind::SdV2HighCapacity => {
                set_bits(&mut csd, 127, 126, 1);
                // (0 + 1) * 1024 sectors
                set_bits(&mut csd, 69, 48, 0);
            }
            _ => {
                // (255 + 1) << (9 + 0 - 7) = 1024 sectors
                set_bits(&mut csd, 83, 80, 9);
                set_bits(&mut csd, 73, 62, 255);
                set_bits(&mut csd, 49, 47, 0);
                set_bits(&mut csd, 25, 22, 9);
            }
        }
        match kind {
            // SECTOR_SIZE and the MMC erase group fields overlap
            Kind::Mmc => {
                set_bits(&mut csd, 46, 42, 7);
                set_bits(&mut csd, 41, 37, 3);
            }
            Kind::SdV1 | Kind::SdV2StandardCapacity => set_bits(&mut csd, 45, 39, 31),
            Kind::SdV2HighCapacity => {}
        }
        let ocr = match kind {
            Kind::SdV2HighCapacity => [0xC0, 0xFF, 0x80, 0x00],
            _ => [0x80, 0xFF, 0x80, 0x00],
        };
        let mut sd_status = [0u8; 64];
        // AU size 4: 16 << 4 sectors
        sd_status[10] = 0x40;
        let mut cid = [0u8; 16];
        cid[..3].copy_from_slice(&[0x03, b'S', b'D']);

        let storage = (0..SECTORS * 512)
            .map(|i| ((i / 512) as u8) ^ (i as u8))
            .collect();

        Self {
            kind,
            present: true,
            storage,
            csd: csd.to_be_bytes(),
            cid,
            ocr,
            sd_status,
            op_cond_polls: 3,
            data_response: 0xE5,
            reset_response: 0x01,
            check_pattern: None,
            op_cond_error: None,
            data_out_low: false,
            stuck_busy: false,
            silent_stop: false,
            selected: false,
            commands: Vec::new(),
            idle: false,
            busy: false,
            app_command: false,
            polls_left: 0,
            frame: Vec::new(),
            out: VecDeque::new(),
            state: State::Command,
        }
    }

    pub fn absent() -> Self {
        let mut card = Self::new(Kind::SdV2HighCapacity);
        card.present = false;
        card
    }

    pub fn sector(&self, sector: usize) -> &[u8] {
        &self.storage[sector * 512..(sector + 1) * 512]
    }

    fn r1(&self) -> u8 {
        if self.idle { 0x01 } else { 0x00 }
    }

    fn respond(&mut self, bytes: &[u8]) {
        self.out.clear();
        // One byte of command response latency
        self.out.push_back(0xFF);
        self.out.extend(bytes);
    }

    fn respond_data(&mut self, r1: &[u8], data: &[u8]) {
        self.respond(r1);
        self.out.extend([0xFF, 0xFE]);
        self.out.extend(data);
        self.out.extend([0x12, 0x34]);
    }

    fn sector_of(&self, argument: u32) -> Option<usize> {
        let sector = if self.kind == Kind::SdV2HighCapacity {
            argument as usize
        } else if argument % 512 == 0 {
            argument as usize / 512
        } else {
            return None;
        };
        (sector < SECTORS).then_some(sector)
    }

    fn poll_op_cond(&mut self) {
        if self.polls_left > 0 {
            self.polls_left -= 1;
        }
        if self.polls_left == 0 {
            self.idle = false;
        }
        let r1 = self.r1();
        self.respond(&[r1]);
    }

    fn command(&mut self) {
        let frame: [u8; 6] = self.frame.drain(..).collect::<Vec<_>>().try_into().unwrap();
        let index = frame[0] & 0x3F;
        let argument = u32::from_be_bytes(frame[1..5].try_into().unwrap());
        let app = std::mem::take(&mut self.app_command);
        self.commands.push(index);
        let r1 = self.r1();
        let illegal = r1 | 0x04;

        match (app, index) {
            (false, 0) => {
                if frame[5] != 0x95 {
                    self.respond(&[r1 | 0x08]);
                    return;
                }
                self.idle = true;
                self.polls_left = self.op_cond_polls;
                self.state = State::Command;
                let r1 = self.reset_response;
                self.respond(&[r1]);
            }
            (false, 8) => {
                if frame[5] != 0x87 {
                    self.respond(&[r1 | 0x08]);
                } else if matches!(self.kind, Kind::SdV1 | Kind::Mmc) {
                    self.respond(&[illegal]);
                } else {
                    let mut echo = (argument & 0xFFF).to_be_bytes();
                    if let Some(pattern) = self.check_pattern {
                        echo[3] = pattern;
                    }
                    self.respond(&[r1, echo[0], echo[1], echo[2], echo[3]]);
                }
            }
            (false, 55) => {
                if self.kind == Kind::Mmc {
                    self.respond(&[illegal]);
                } else {
                    self.app_command = true;
                    self.respond(&[r1]);
                }
            }
            (true, 41) => {
                let high_capacity_host = argument & (1 << 30) != 0;
                if let Some(r1) = self.op_cond_error {
                    self.respond(&[r1]);
                } else if self.kind == Kind::SdV2HighCapacity && !high_capacity_host {
                    // Stays idle forever without HCS
                    let r1 = self.r1();
                    self.respond(&[r1]);
                } else {
                    self.poll_op_cond();
                }
            }
            (false, 1) if self.kind == Kind::Mmc => self.poll_op_cond(),
            (false, 58) => {
                let ocr = self.ocr;
                self.respond(&[r1, ocr[0], ocr[1], ocr[2], ocr[3]]);
            }
            (false, 16) => {
                if argument == 512 {
                    self.respond(&[r1]);
                } else {
                    self.respond(&[r1 | 0x40]);
                }
            }
            (false, 9) => {
                let csd = self.csd;
                self.respond_data(&[r1], &csd);
            }
            (false, 10) => {
                let cid = self.cid;
                self.respond_data(&[r1], &cid);
            }
            (true, 13) => {
                let status = self.sd_status;
                self.respond_data(&[r1, 0x00], &status);
            }
            (false, 17) => match self.sector_of(argument) {
                Some(sector) => {
                    let data = self.sector(sector).to_vec();
                    self.respond_data(&[r1], &data);
                }
                None => self.respond(&[r1 | 0x20]),
            },
            (false, 18) => match self.sector_of(argument) {
                Some(sector) => {
                    self.state = State::ReadMultiple { next: sector };
                    self.respond(&[r1]);
                }
                None => self.respond(&[r1 | 0x20]),
            },
            (false, 12) => {
                self.state = State::Command;
                if self.silent_stop {
                    self.out.clear();
                } else {
                    // Stuff byte, then R1
                    self.respond(&[0xFF, r1]);
                }
            }
            (false, 24 | 25) => match self.sector_of(argument) {
                Some(sector) => {
                    self.state = State::Write {
                        sector,
                        multiple: index == 25,
                        data: None,
                        crc_left: 2,
                    };
                    self.respond(&[r1]);
                }
                None => self.respond(&[r1 | 0x20]),
            },
            _ => self.respond(&[illegal]),
        }
    }

    /// Only called while a write is in progress.
    fn write_byte(&mut self, byte: u8) {
        let State::Write {
            sector,
            multiple,
            data,
            crc_left,
        } = std::mem::replace(&mut self.state, State::Command)
        else {
            return;
        };
        let waiting = |data| State::Write {
            sector,
            multiple,
            data,
            crc_left,
        };
        self.state = match data {
            None => match byte {
                0xFE if !multiple => waiting(Some(Vec::new())),
                0xFC if multiple => waiting(Some(Vec::new())),
                0xFD if multiple => {
                    self.out.extend([0xFF, 0x00, 0x00]);
                    State::Command
                }
                _ => waiting(None),
            },
            Some(mut block) if block.len() < 512 => {
                block.push(byte);
                waiting(Some(block))
            }
            Some(block) if crc_left > 1 => State::Write {
                sector,
                multiple,
                data: Some(block),
                crc_left: crc_left - 1,
            },
            Some(block) => {
                let accepted = self.data_response & 0x1F == 0x05;
                self.out.push_back(self.data_response);
                if accepted {
                    self.storage[sector * 512..(sector + 1) * 512].copy_from_slice(&block);
                    self.out.extend([0x00, 0x00]);
                    self.busy = self.stuck_busy;
                }
                if multiple {
                    let next = if accepted && sector + 1 < SECTORS {
                        sector + 1
                    } else {
                        sector
                    };
                    State::Write {
                        sector: next,
                        multiple,
                        data: None,
                        crc_left: 2,
                    }
                } else {
                    State::Command
                }
            }
        };
    }
}

impl Transport for SimCard {
    type Error = Infallible;

    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error> {
        if self.data_out_low {
            return Ok(0x00);
        }
        if !self.present || !self.selected {
            return Ok(0xFF);
        }

        if self.out.is_empty() {
            if let State::ReadMultiple { next } = self.state {
                if next < SECTORS {
                    let data = self.sector(next).to_vec();
                    self.out.extend([0xFF, 0xFF, 0xFE]);
                    self.out.extend(data);
                    self.out.extend([0x12, 0x34]);
                    self.state = State::ReadMultiple { next: next + 1 };
                }
            }
        }
        let idle_level = if self.busy { 0x00 } else { 0xFF };
        let response = self.out.pop_front().unwrap_or(idle_level);

        if matches!(self.state, State::Write { .. }) && self.frame.is_empty() {
            self.write_byte(byte);
        } else if !self.frame.is_empty() || byte & 0xC0 == 0x40 {
            self.frame.push(byte);
            if self.frame.len() == 6 {
                self.command();
            }
        }
        Ok(response)
    }

    fn select(&mut self, selected: bool) -> Result<(), Self::Error> {
        self.selected = selected;
        if !selected {
            self.frame.clear();
            self.out.clear();
        }
        Ok(())
    }
}

pub type SimDisk = SdDisk<SimCard, StepClock>;

pub fn disk(card: SimCard) -> SimDisk {
    SdDisk::new(SdSpi::with_config(card, StepClock::new(1), Config::default()))
}

pub fn sim(disk: &SimDisk) -> &SimCard {
    disk.card().transport()
}

pub fn pattern(seed: u8) -> [u8; 512] {
    let mut block = [0u8; 512];
    for (i, byte) in block.iter_mut().enumerate() {
        *byte = seed.wrapping_mul(31).wrapping_add(i as u8) ^ (i >> 8) as u8;
    }
    block
}
