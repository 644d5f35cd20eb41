//! OAM DMA and colour-mode VRAM DMA (general purpose and HBlank).
//!
//! Both engines only sequence the transfer; the bus performs the actual
//! byte copies since it owns every memory region involved.

use crate::error::StateError;
use crate::state::{Snapshot, StateReader, StateWriter};

pub const OAM_DMA_LEN: u16 = 0xA0;
const OAM_DMA_START_DELAY: u8 = 2;
pub const HDMA_BLOCK_LEN: u16 = 0x10;

/// FF46 transfer into the sprite table, one byte per M-cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OamDma {
    register: u8,
    source: u16,
    pending_delay: u8,
    index: u16,
    active: bool,
}

impl OamDma {
    pub fn new() -> Self {
        Self {
            register: 0xFF,
            ..Self::default()
        }
    }

    pub fn register(&self) -> u8 {
        self.register
    }

    /// Schedule a transfer from `val << 8`. A running transfer keeps going
    /// until the new one takes over after the start delay.
    pub fn start(&mut self, val: u8) {
        self.register = val;
        self.pending_delay = OAM_DMA_START_DELAY;
    }

    /// OAM is owned by the transfer.
    pub fn blocking(&self) -> bool {
        self.active
    }

    /// Advance one M-cycle; returns the (source address, OAM index) to copy.
    pub fn step(&mut self) -> Option<(u16, usize)> {
        if self.pending_delay > 0 {
            self.pending_delay -= 1;
            if self.pending_delay == 0 {
                let base = (self.register as u16) << 8;
                // Sources above the echo area alias work RAM.
                self.source = if base >= 0xE000 { base - 0x2000 } else { base };
                self.index = 0;
                self.active = true;
            }
        }
        if !self.active {
            return None;
        }
        let idx = self.index;
        self.index += 1;
        if self.index == OAM_DMA_LEN {
            self.active = false;
        }
        Some((self.source.wrapping_add(idx), idx as usize))
    }
}

impl Snapshot for OamDma {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_u8(self.register);
        w.write_u16(self.source);
        w.write_u8(self.pending_delay);
        w.write_u16(self.index);
        w.write_bool(self.active);
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.register = r.read_u8()?;
        self.source = r.read_u16()?;
        self.pending_delay = r.read_bounded("OAM DMA delay", OAM_DMA_START_DELAY + 1)?;
        self.index = r.read_u16()?;
        if self.index > OAM_DMA_LEN {
            return Err(StateError::InvalidValue {
                field: "OAM DMA index",
                value: self.index as u32,
            });
        }
        self.active = r.read_bool()?;
        Ok(())
    }
}

/// What a write to HDMA5 asks the bus to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HdmaTrigger {
    /// Copy this many blocks right now, stalling the CPU.
    General(u8),
    /// An HBlank-gated transfer was armed.
    HBlank,
    Cancelled,
    None,
}

/// HDMA1-HDMA5 (FF51-FF55).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hdma {
    src: u16,
    dst: u16,
    /// Blocks left minus one; the transfer ends when this underflows.
    length: u8,
    active: bool,
}

impl Default for Hdma {
    fn default() -> Self {
        Self::new()
    }
}

impl Hdma {
    pub fn new() -> Self {
        Self {
            src: 0,
            dst: 0x8000,
            length: 0x7F,
            active: false,
        }
    }

    #[inline]
    fn sanitize_dest(addr: u16) -> u16 {
        0x8000 | (addr & 0x1FF0)
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF55 if self.active => self.length & 0x7F,
            0xFF55 => 0x80 | self.length,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) -> HdmaTrigger {
        match addr {
            0xFF51 => self.src = (val as u16) << 8 | (self.src & 0x00FF),
            0xFF52 => self.src = (self.src & 0xFF00) | (val & 0xF0) as u16,
            0xFF53 => {
                let raw = ((val as u16 & 0x1F) << 8) | (self.dst & 0x00F0);
                self.dst = Self::sanitize_dest(raw);
            }
            0xFF54 => {
                let raw = (self.dst & 0x1F00) | (val as u16 & 0x00F0);
                self.dst = Self::sanitize_dest(raw);
            }
            0xFF55 => {
                if self.active && val & 0x80 == 0 {
                    self.active = false;
                    log::debug!("HDMA cancelled, {} blocks left", self.length as u16 + 1);
                    return HdmaTrigger::Cancelled;
                }
                self.length = val & 0x7F;
                if val & 0x80 == 0 {
                    log::debug!(
                        "GDMA {:04X}->{:04X} {} blocks",
                        self.src,
                        self.dst,
                        self.length as u16 + 1
                    );
                    return HdmaTrigger::General(self.length + 1);
                }
                self.active = true;
                log::debug!(
                    "HDMA {:04X}->{:04X} {} blocks",
                    self.src,
                    self.dst,
                    self.length as u16 + 1
                );
                return HdmaTrigger::HBlank;
            }
            _ => {}
        }
        HdmaTrigger::None
    }

    /// Claim the next 16-byte block as (source, VRAM destination) and
    /// advance the pointers and the block counter.
    pub fn take_block(&mut self) -> (u16, u16) {
        let block = (self.src, self.dst);
        self.src = self.src.wrapping_add(HDMA_BLOCK_LEN);
        self.dst = Self::sanitize_dest(self.dst.wrapping_add(HDMA_BLOCK_LEN));
        if self.length == 0 {
            self.length = 0x7F;
            self.active = false;
        } else {
            self.length -= 1;
        }
        block
    }
}

impl Snapshot for Hdma {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_u16(self.src);
        w.write_u16(self.dst);
        w.write_u8(self.length);
        w.write_bool(self.active);
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.src = r.read_u16()?;
        self.dst = Self::sanitize_dest(r.read_u16()?);
        self.length = r.read_u8()? & 0x7F;
        self.active = r.read_bool()?;
        Ok(())
    }
}
