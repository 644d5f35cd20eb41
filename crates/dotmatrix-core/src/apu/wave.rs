//! Channel 3: 32 four-bit samples from wave RAM.

use super::envelope::LengthCounter;
use crate::error::StateError;
use crate::state::{Snapshot, StateReader, StateWriter};

pub const WAVE_RAM_SIZE: usize = 0x10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WaveChannel {
    enabled: bool,
    dac_enabled: bool,
    length: LengthCounter,
    volume_code: u8,
    frequency: u16,
    timer: u32,
    position: u8,
    sample_buffer: u8,
    ram: [u8; WAVE_RAM_SIZE],
}

impl Default for WaveChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl WaveChannel {
    pub fn new() -> Self {
        Self {
            enabled: false,
            dac_enabled: false,
            length: LengthCounter::new(256),
            volume_code: 0,
            frequency: 0,
            timer: 0,
            position: 0,
            sample_buffer: 0,
            ram: [0; WAVE_RAM_SIZE],
        }
    }

    /// Half the pulse period: the sample index moves twice as fast.
    fn period(&self) -> u32 {
        (2048 - self.frequency as u32) * 2
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn dac_enabled(&self) -> bool {
        self.dac_enabled
    }

    /// Clear everything but wave RAM, which survives APU power-off.
    pub fn power_off(&mut self) {
        let ram = self.ram;
        *self = Self::new();
        self.ram = ram;
    }

    /// Wave RAM is only reachable while the channel is idle.
    pub fn read_ram(&self, index: usize) -> u8 {
        if self.enabled {
            0xFF
        } else {
            self.ram[index & (WAVE_RAM_SIZE - 1)]
        }
    }

    pub fn write_ram(&mut self, index: usize, val: u8) {
        if !self.enabled {
            self.ram[index & (WAVE_RAM_SIZE - 1)] = val;
        }
    }

    /// Register write; `reg` is 0-4 for NR30-NR34.
    pub fn write(&mut self, reg: u8, val: u8) {
        match reg {
            0 => {
                self.dac_enabled = val & 0x80 != 0;
                if !self.dac_enabled {
                    self.enabled = false;
                }
            }
            1 => self.length.load(val),
            2 => self.volume_code = (val >> 5) & 0x03,
            3 => self.frequency = (self.frequency & 0x0700) | val as u16,
            4 => {
                self.frequency = (self.frequency & 0x00FF) | ((val as u16 & 0x07) << 8);
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
        self.position = 0;
        self.timer = self.period();
        self.length.trigger();
    }

    /// Advance one dot.
    pub fn clock(&mut self) {
        if !self.enabled {
            return;
        }
        self.timer = self.timer.saturating_sub(1);
        if self.timer == 0 {
            self.timer = self.period();
            self.position = (self.position + 1) & 0x1F;
            let byte = self.ram[(self.position / 2) as usize];
            self.sample_buffer = if self.position & 1 == 0 {
                byte >> 4
            } else {
                byte & 0x0F
            };
        }
    }

    /// Current output level 0-15 after the NR32 volume shift.
    pub fn sample(&self) -> u8 {
        if !self.enabled || !self.dac_enabled {
            return 0;
        }
        match self.volume_code {
            0 => 0,
            1 => self.sample_buffer,
            2 => self.sample_buffer >> 1,
            _ => self.sample_buffer >> 2,
        }
    }

    pub fn clock_length(&mut self) {
        if self.length.clock() {
            self.enabled = false;
        }
    }
}

impl Snapshot for WaveChannel {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_bool(self.enabled);
        w.write_bool(self.dac_enabled);
        self.length.save_state(w);
        w.write_u8(self.volume_code);
        w.write_u16(self.frequency);
        w.write_u32(self.timer);
        w.write_u8(self.position);
        w.write_u8(self.sample_buffer);
        w.write_bytes(&self.ram);
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.enabled = r.read_bool()?;
        self.dac_enabled = r.read_bool()?;
        self.length.load_state(r)?;
        self.volume_code = r.read_bounded("wave volume", 4)?;
        self.frequency = r.read_u16()? & 0x07FF;
        self.timer = r.read_u32()?;
        self.position = r.read_bounded("wave position", 32)?;
        self.sample_buffer = r.read_bounded("wave sample", 16)?;
        r.read_into(&mut self.ram)?;
        Ok(())
    }
}
