//! Volume envelope and length counter shared by the channels.

use crate::error::StateError;
use crate::state::{Snapshot, StateReader, StateWriter};

/// NRx2 volume envelope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    initial: u8,
    period: u8,
    add: bool,
    volume: u8,
    timer: u8,
}

impl Envelope {
    /// Latch the NRx2 parameters. The running volume only changes on trigger.
    pub fn write(&mut self, val: u8) {
        self.initial = val >> 4;
        self.add = val & 0x08 != 0;
        self.period = val & 0x07;
    }

    /// Upper five bits of NRx2 gate the channel DAC.
    pub fn dac_enabled(val: u8) -> bool {
        val & 0xF8 != 0
    }

    pub fn trigger(&mut self) {
        self.volume = self.initial;
        self.timer = if self.period == 0 { 8 } else { self.period };
    }

    /// 64 Hz frame sequencer step.
    pub fn clock(&mut self) {
        if self.period == 0 {
            return;
        }
        if self.timer > 0 {
            self.timer -= 1;
        }
        if self.timer == 0 {
            self.timer = self.period;
            if self.add && self.volume < 15 {
                self.volume += 1;
            } else if !self.add && self.volume > 0 {
                self.volume -= 1;
            }
        }
    }

    #[inline]
    pub fn volume(&self) -> u8 {
        self.volume
    }
}

impl Snapshot for Envelope {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_u8(self.initial);
        w.write_u8(self.period);
        w.write_bool(self.add);
        w.write_u8(self.volume);
        w.write_u8(self.timer);
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.initial = r.read_bounded("envelope initial", 16)?;
        self.period = r.read_bounded("envelope period", 8)?;
        self.add = r.read_bool()?;
        self.volume = r.read_bounded("envelope volume", 16)?;
        self.timer = r.read_u8()?;
        Ok(())
    }
}

/// Length counter; `max` is 64 for pulse/noise and 256 for wave.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LengthCounter {
    max: u16,
    remaining: u16,
    enabled: bool,
}

impl LengthCounter {
    pub fn new(max: u16) -> Self {
        Self {
            max,
            remaining: 0,
            enabled: false,
        }
    }

    /// Load from the NRx1 length field.
    pub fn load(&mut self, raw: u8) {
        self.remaining = self.max - (raw as u16 & (self.max - 1));
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn trigger(&mut self) {
        if self.remaining == 0 {
            self.remaining = self.max;
        }
    }

    /// 256 Hz frame sequencer step; true when the counter just expired.
    pub fn clock(&mut self) -> bool {
        if self.enabled && self.remaining > 0 {
            self.remaining -= 1;
            return self.remaining == 0;
        }
        false
    }
}

impl Snapshot for LengthCounter {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_u16(self.remaining);
        w.write_bool(self.enabled);
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.remaining = r.read_u16()?;
        if self.remaining > self.max {
            return Err(StateError::InvalidValue {
                field: "length",
                value: self.remaining as u32,
            });
        }
        self.enabled = r.read_bool()?;
        Ok(())
    }
}
