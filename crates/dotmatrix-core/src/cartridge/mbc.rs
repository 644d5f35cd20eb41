//! Bank controller state machines.
//!
//! Every variant resolves a CPU address to a physical ROM/RAM offset. Bank
//! numbers are always reduced modulo the number of banks actually present,
//! so no register value can index past the image.

use super::header::MapperKind;
use super::rtc::Rtc;
use crate::error::StateError;
use crate::state::{Snapshot, StateReader, StateWriter};

pub const ROM_BANK_SIZE: usize = 0x4000;
pub const RAM_BANK_SIZE: usize = 0x2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mapper {
    None,
    Mbc1 {
        /// BANK1, 5 bits; 0 reads as 1.
        rom_bank: u8,
        /// BANK2, 2 bits: RAM bank or ROM bits 5-6.
        upper: u8,
        /// MODE: when set BANK2 also applies to 0x0000-0x3FFF and to RAM.
        advanced: bool,
        ram_enable: bool,
    },
    Mbc2 {
        rom_bank: u8,
        ram_enable: bool,
    },
    Mbc3 {
        rom_bank: u8,
        /// 0x00-0x07 RAM bank, 0x08-0x0C RTC register.
        select: u8,
        ram_enable: bool,
        latch_armed: bool,
        rtc: Option<Rtc>,
    },
    Mbc5 {
        rom_bank: u16,
        ram_bank: u8,
        ram_enable: bool,
    },
}

impl Mapper {
    pub fn new(kind: MapperKind, has_rtc: bool) -> Self {
        match kind {
            MapperKind::None => Mapper::None,
            MapperKind::Mbc1 => Mapper::Mbc1 {
                rom_bank: 1,
                upper: 0,
                advanced: false,
                ram_enable: false,
            },
            MapperKind::Mbc2 => Mapper::Mbc2 {
                rom_bank: 1,
                ram_enable: false,
            },
            MapperKind::Mbc3 => Mapper::Mbc3 {
                rom_bank: 1,
                select: 0,
                ram_enable: false,
                latch_armed: false,
                rtc: has_rtc.then(Rtc::new),
            },
            MapperKind::Mbc5 => Mapper::Mbc5 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enable: false,
            },
        }
    }

    pub fn kind(&self) -> MapperKind {
        match self {
            Mapper::None => MapperKind::None,
            Mapper::Mbc1 { .. } => MapperKind::Mbc1,
            Mapper::Mbc2 { .. } => MapperKind::Mbc2,
            Mapper::Mbc3 { .. } => MapperKind::Mbc3,
            Mapper::Mbc5 { .. } => MapperKind::Mbc5,
        }
    }

    pub fn rtc(&self) -> Option<&Rtc> {
        match self {
            Mapper::Mbc3 { rtc, .. } => rtc.as_ref(),
            _ => None,
        }
    }

    pub fn rtc_mut(&mut self) -> Option<&mut Rtc> {
        match self {
            Mapper::Mbc3 { rtc, .. } => rtc.as_mut(),
            _ => None,
        }
    }

    /// Requested bank for the 0x0000-0x3FFF window, before masking.
    fn low_rom_bank(&self) -> usize {
        match *self {
            Mapper::Mbc1 {
                upper,
                advanced: true,
                ..
            } => (upper as usize) << 5,
            _ => 0,
        }
    }

    /// Requested bank for the 0x4000-0x7FFF window, before masking.
    pub fn high_rom_bank(&self) -> usize {
        match *self {
            Mapper::None => 1,
            Mapper::Mbc1 {
                rom_bank, upper, ..
            } => {
                let low = if rom_bank & 0x1F == 0 { 1 } else { rom_bank & 0x1F };
                ((upper as usize) << 5) | low as usize
            }
            Mapper::Mbc2 { rom_bank, .. } => {
                let bank = rom_bank & 0x0F;
                if bank == 0 { 1 } else { bank as usize }
            }
            Mapper::Mbc3 { rom_bank, .. } => {
                if rom_bank == 0 { 1 } else { rom_bank as usize }
            }
            Mapper::Mbc5 { rom_bank, .. } => rom_bank as usize,
        }
    }

    /// Requested external RAM bank, before masking.
    fn ram_bank(&self) -> usize {
        match *self {
            Mapper::Mbc1 {
                upper,
                advanced: true,
                ..
            } => upper as usize,
            Mapper::Mbc3 { select, .. } => (select & 0x07) as usize,
            Mapper::Mbc5 { ram_bank, .. } => ram_bank as usize,
            _ => 0,
        }
    }

    fn ram_enabled(&self) -> bool {
        match *self {
            Mapper::None => true,
            Mapper::Mbc1 { ram_enable, .. }
            | Mapper::Mbc2 { ram_enable, .. }
            | Mapper::Mbc3 { ram_enable, .. }
            | Mapper::Mbc5 { ram_enable, .. } => ram_enable,
        }
    }

    pub fn read_rom(&self, rom: &[u8], addr: u16) -> u8 {
        let banks = (rom.len() / ROM_BANK_SIZE).max(1);
        let (bank, offset) = if addr < 0x4000 {
            (self.low_rom_bank(), addr as usize)
        } else {
            (self.high_rom_bank(), addr as usize - 0x4000)
        };
        let bank = bank % banks;
        rom.get(bank * ROM_BANK_SIZE + offset)
            .copied()
            .unwrap_or(0xFF)
    }

    fn ram_offset(&self, ram_len: usize, addr: u16) -> Option<usize> {
        if ram_len == 0 {
            return None;
        }
        let rel = addr as usize - 0xA000;
        if let Mapper::Mbc2 { .. } = self {
            return Some(rel & 0x01FF);
        }
        let banks = ram_len.div_ceil(RAM_BANK_SIZE);
        let bank = self.ram_bank() % banks;
        Some((bank * RAM_BANK_SIZE + rel) % ram_len)
    }

    pub fn read_ram(&self, ram: &[u8], addr: u16) -> u8 {
        if !self.ram_enabled() {
            return 0xFF;
        }
        if let Mapper::Mbc3 { select, rtc, .. } = self
            && *select > 0x07
        {
            return match (*select, rtc) {
                (0x08..=0x0C, Some(rtc)) => rtc.read_latched(*select),
                _ => 0xFF,
            };
        }
        match self.ram_offset(ram.len(), addr) {
            Some(idx) => match self {
                Mapper::Mbc2 { .. } => 0xF0 | (ram[idx] & 0x0F),
                _ => ram[idx],
            },
            None => 0xFF,
        }
    }

    pub fn write_ram(&mut self, ram: &mut [u8], addr: u16, val: u8) {
        if !self.ram_enabled() {
            return;
        }
        if let Mapper::Mbc3 { select, rtc, .. } = self
            && *select > 0x07
        {
            if let (0x08..=0x0C, Some(rtc)) = (*select, rtc.as_mut()) {
                rtc.write_register(*select, val);
            }
            return;
        }
        if let Some(idx) = self.ram_offset(ram.len(), addr) {
            ram[idx] = match self {
                Mapper::Mbc2 { .. } => val & 0x0F,
                _ => val,
            };
        }
    }

    /// Register write in 0x0000-0x7FFF.
    pub fn write_control(&mut self, addr: u16, val: u8) {
        match self {
            Mapper::None => {}
            Mapper::Mbc1 {
                rom_bank,
                upper,
                advanced,
                ram_enable,
            } => match addr {
                0x0000..=0x1FFF => *ram_enable = val & 0x0F == 0x0A,
                0x2000..=0x3FFF => *rom_bank = val & 0x1F,
                0x4000..=0x5FFF => *upper = val & 0x03,
                _ => *advanced = val & 0x01 != 0,
            },
            Mapper::Mbc2 {
                rom_bank,
                ram_enable,
            } => {
                // Address bit 8 picks RAMG (clear) or ROMB (set).
                if addr < 0x4000 {
                    if addr & 0x0100 == 0 {
                        *ram_enable = val & 0x0F == 0x0A;
                    } else {
                        *rom_bank = val & 0x0F;
                    }
                }
            }
            Mapper::Mbc3 {
                rom_bank,
                select,
                ram_enable,
                latch_armed,
                rtc,
            } => match addr {
                0x0000..=0x1FFF => *ram_enable = val & 0x0F == 0x0A,
                0x2000..=0x3FFF => *rom_bank = val,
                0x4000..=0x5FFF => *select = val & 0x0F,
                _ => {
                    // 0x00 then 0x01 latches the clock.
                    if val == 0x01 && *latch_armed
                        && let Some(rtc) = rtc.as_mut()
                    {
                        rtc.latch();
                    }
                    *latch_armed = val == 0x00;
                }
            },
            Mapper::Mbc5 {
                rom_bank,
                ram_bank,
                ram_enable,
            } => match addr {
                0x0000..=0x1FFF => *ram_enable = val & 0x0F == 0x0A,
                0x2000..=0x2FFF => *rom_bank = (*rom_bank & 0x100) | val as u16,
                0x3000..=0x3FFF => *rom_bank = (*rom_bank & 0xFF) | (((val & 0x01) as u16) << 8),
                0x4000..=0x5FFF => *ram_bank = val & 0x0F,
                _ => {}
            },
        }
    }
}

impl Snapshot for Mapper {
    fn save_state(&self, w: &mut StateWriter) {
        match self {
            Mapper::None => {}
            Mapper::Mbc1 {
                rom_bank,
                upper,
                advanced,
                ram_enable,
            } => {
                w.write_u8(*rom_bank);
                w.write_u8(*upper);
                w.write_bool(*advanced);
                w.write_bool(*ram_enable);
            }
            Mapper::Mbc2 {
                rom_bank,
                ram_enable,
            } => {
                w.write_u8(*rom_bank);
                w.write_bool(*ram_enable);
            }
            Mapper::Mbc3 {
                rom_bank,
                select,
                ram_enable,
                latch_armed,
                rtc,
            } => {
                w.write_u8(*rom_bank);
                w.write_u8(*select);
                w.write_bool(*ram_enable);
                w.write_bool(*latch_armed);
                if let Some(rtc) = rtc {
                    rtc.save_state(w);
                }
            }
            Mapper::Mbc5 {
                rom_bank,
                ram_bank,
                ram_enable,
            } => {
                w.write_u16(*rom_bank);
                w.write_u8(*ram_bank);
                w.write_bool(*ram_enable);
            }
        }
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        match self {
            Mapper::None => {}
            Mapper::Mbc1 {
                rom_bank,
                upper,
                advanced,
                ram_enable,
            } => {
                *rom_bank = r.read_u8()? & 0x1F;
                *upper = r.read_u8()? & 0x03;
                *advanced = r.read_bool()?;
                *ram_enable = r.read_bool()?;
            }
            Mapper::Mbc2 {
                rom_bank,
                ram_enable,
            } => {
                *rom_bank = r.read_u8()? & 0x0F;
                *ram_enable = r.read_bool()?;
            }
            Mapper::Mbc3 {
                rom_bank,
                select,
                ram_enable,
                latch_armed,
                rtc,
            } => {
                *rom_bank = r.read_u8()?;
                *select = r.read_u8()? & 0x0F;
                *ram_enable = r.read_bool()?;
                *latch_armed = r.read_bool()?;
                if let Some(rtc) = rtc {
                    rtc.load_state(r)?;
                }
            }
            Mapper::Mbc5 {
                rom_bank,
                ram_bank,
                ram_enable,
            } => {
                *rom_bank = r.read_u16()? & 0x01FF;
                *ram_bank = r.read_u8()? & 0x0F;
                *ram_enable = r.read_bool()?;
            }
        }
        Ok(())
    }
}
