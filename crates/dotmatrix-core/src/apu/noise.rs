//! Channel 4: LFSR noise.

use super::envelope::{Envelope, LengthCounter};
use crate::error::StateError;
use crate::state::{Snapshot, StateReader, StateWriter};

const LFSR_SEED: u16 = 0x7FFF;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoiseChannel {
    enabled: bool,
    dac_enabled: bool,
    length: LengthCounter,
    envelope: Envelope,
    clock_shift: u8,
    width7: bool,
    divisor_code: u8,
    timer: u32,
    lfsr: u16,
}

impl Default for NoiseChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl NoiseChannel {
    pub fn new() -> Self {
        Self {
            enabled: false,
            dac_enabled: false,
            length: LengthCounter::new(64),
            envelope: Envelope::default(),
            clock_shift: 0,
            width7: false,
            divisor_code: 0,
            timer: 0,
            lfsr: LFSR_SEED,
        }
    }

    /// Dots between LFSR shifts: linear divisor scaled by 2^shift.
    fn period(&self) -> u32 {
        let divisor = match self.divisor_code {
            0 => 8,
            n => n as u32 * 16,
        };
        divisor << self.clock_shift
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn dac_enabled(&self) -> bool {
        self.dac_enabled
    }

    pub fn lfsr(&self) -> u16 {
        self.lfsr
    }

    /// Register write; `reg` is 1-4 for NR41-NR44.
    pub fn write(&mut self, reg: u8, val: u8) {
        match reg {
            1 => self.length.load(val & 0x3F),
            2 => {
                self.envelope.write(val);
                self.dac_enabled = Envelope::dac_enabled(val);
                if !self.dac_enabled {
                    self.enabled = false;
                }
            }
            3 => {
                self.clock_shift = val >> 4;
                self.width7 = val & 0x08 != 0;
                self.divisor_code = val & 0x07;
            }
            4 => {
                self.length.set_enabled(val & 0x40 != 0);
                if val & 0x80 != 0 {
                    self.trigger();
                }
            }
            _ => {}
        }
    }

    fn trigger(&mut self) {
        self.enabled = self.dac_enabled;
        self.lfsr = LFSR_SEED;
        self.timer = self.period();
        self.envelope.trigger();
        self.length.trigger();
    }

    /// Advance one dot.
    pub fn clock(&mut self) {
        // Shifts 14 and 15 stop the generator.
        if !self.enabled || self.clock_shift >= 14 {
            return;
        }
        self.timer = self.timer.saturating_sub(1);
        if self.timer > 0 {
            return;
        }
        self.timer = self.period();
        let bit = (self.lfsr ^ (self.lfsr >> 1)) & 1;
        self.lfsr = (self.lfsr >> 1) | (bit << 14);
        if self.width7 {
            self.lfsr = (self.lfsr & !0x40) | (bit << 6);
        }
    }

    /// Current output level 0-15; bit 0 of the LFSR low means "on".
    pub fn sample(&self) -> u8 {
        if !self.enabled || !self.dac_enabled || self.lfsr & 1 != 0 {
            return 0;
        }
        self.envelope.volume()
    }

    pub fn clock_length(&mut self) {
        if self.length.clock() {
            self.enabled = false;
        }
    }

    pub fn clock_envelope(&mut self) {
        self.envelope.clock();
    }
}

impl Snapshot for NoiseChannel {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_bool(self.enabled);
        w.write_bool(self.dac_enabled);
        self.length.save_state(w);
        self.envelope.save_state(w);
        w.write_u8(self.clock_shift);
        w.write_bool(self.width7);
        w.write_u8(self.divisor_code);
        w.write_u32(self.timer);
        w.write_u16(self.lfsr);
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.enabled = r.read_bool()?;
        self.dac_enabled = r.read_bool()?;
        self.length.load_state(r)?;
        self.envelope.load_state(r)?;
        self.clock_shift = r.read_bounded("noise shift", 16)?;
        self.width7 = r.read_bool()?;
        self.divisor_code = r.read_bounded("noise divisor", 8)?;
        self.timer = r.read_u32()?;
        self.lfsr = r.read_u16()? & 0x7FFF;
        Ok(())
    }
}
