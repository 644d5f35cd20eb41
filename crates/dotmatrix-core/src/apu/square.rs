//! Pulse channels 1 and 2. Only channel 1 carries a frequency sweep.

use super::envelope::{Envelope, LengthCounter};
use crate::error::StateError;
use crate::state::{Snapshot, StateReader, StateWriter};

// Duty table for pulse channels. Index (0..3) corresponds to duty selector in NRx1:
// 12.5%, 25%, 50%, 75%.
const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 0, 0, 1],
    [1, 0, 0, 0, 0, 1, 1, 1],
    [0, 1, 1, 1, 1, 1, 1, 0],
];

const MAX_FREQUENCY: u16 = 2047;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Sweep {
    period: u8,
    negate: bool,
    shift: u8,
    timer: u8,
    shadow: u16,
    enabled: bool,
}

impl Sweep {
    fn write(&mut self, val: u8) {
        self.period = (val >> 4) & 0x07;
        self.negate = val & 0x08 != 0;
        self.shift = val & 0x07;
    }

    fn calculate(&self) -> u16 {
        let delta = self.shadow >> self.shift;
        if self.negate {
            self.shadow.wrapping_sub(delta)
        } else {
            self.shadow + delta
        }
    }

    fn reload_timer(&mut self) {
        self.timer = if self.period == 0 { 8 } else { self.period };
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SquareChannel {
    enabled: bool,
    dac_enabled: bool,
    duty: u8,
    duty_pos: u8,
    frequency: u16,
    timer: u32,
    length: LengthCounter,
    envelope: Envelope,
    sweep: Option<Sweep>,
}

impl SquareChannel {
    pub fn new(with_sweep: bool) -> Self {
        Self {
            enabled: false,
            dac_enabled: false,
            duty: 0,
            duty_pos: 0,
            frequency: 0,
            timer: 0,
            length: LengthCounter::new(64),
            envelope: Envelope::default(),
            sweep: with_sweep.then(Sweep::default),
        }
    }

    fn period(&self) -> u32 {
        (2048 - self.frequency as u32) * 4
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn dac_enabled(&self) -> bool {
        self.dac_enabled
    }

    pub fn frequency(&self) -> u16 {
        self.frequency
    }

    /// Register write; `reg` is 0-4 for NRx0-NRx4.
    pub fn write(&mut self, reg: u8, val: u8) {
        match reg {
            0 => {
                if let Some(sweep) = self.sweep.as_mut() {
                    sweep.write(val);
                }
            }
            1 => {
                self.duty = val >> 6;
                self.length.load(val & 0x3F);
            }
            2 => {
                self.envelope.write(val);
                self.dac_enabled = Envelope::dac_enabled(val);
                if !self.dac_enabled {
                    self.enabled = false;
                }
            }
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
        self.timer = self.period();
        self.envelope.trigger();
        self.length.trigger();
        let frequency = self.frequency;
        if let Some(sweep) = self.sweep.as_mut() {
            sweep.shadow = frequency;
            sweep.reload_timer();
            sweep.enabled = sweep.period != 0 || sweep.shift != 0;
            if sweep.shift != 0 && sweep.calculate() > MAX_FREQUENCY {
                self.enabled = false;
            }
        }
    }

    /// Advance one dot.
    pub fn clock(&mut self) {
        if !self.enabled {
            return;
        }
        self.timer = self.timer.saturating_sub(1);
        if self.timer == 0 {
            self.timer = self.period();
            self.duty_pos = (self.duty_pos + 1) & 7;
        }
    }

    /// Current output level 0-15.
    pub fn sample(&self) -> u8 {
        if !self.enabled || !self.dac_enabled {
            return 0;
        }
        DUTY_TABLE[self.duty as usize][self.duty_pos as usize] * self.envelope.volume()
    }

    pub fn clock_length(&mut self) {
        if self.length.clock() {
            self.enabled = false;
        }
    }

    pub fn clock_envelope(&mut self) {
        self.envelope.clock();
    }

    /// 128 Hz sweep step. Returns the new frequency when it changed so the
    /// register mirror can follow.
    pub fn clock_sweep(&mut self) -> Option<u16> {
        let sweep = self.sweep.as_mut()?;
        if sweep.timer > 0 {
            sweep.timer -= 1;
        }
        if sweep.timer != 0 {
            return None;
        }
        sweep.reload_timer();
        if !sweep.enabled || sweep.period == 0 {
            return None;
        }
        let next = sweep.calculate();
        if next > MAX_FREQUENCY {
            self.enabled = false;
            return None;
        }
        if sweep.shift == 0 {
            return None;
        }
        sweep.shadow = next;
        self.frequency = next;
        // A second overflow check runs against the freshly written value.
        if sweep.calculate() > MAX_FREQUENCY {
            self.enabled = false;
        }
        Some(next)
    }
}

impl Snapshot for SquareChannel {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_bool(self.enabled);
        w.write_bool(self.dac_enabled);
        w.write_u8(self.duty);
        w.write_u8(self.duty_pos);
        w.write_u16(self.frequency);
        w.write_u32(self.timer);
        self.length.save_state(w);
        self.envelope.save_state(w);
        if let Some(s) = &self.sweep {
            w.write_u8(s.period);
            w.write_bool(s.negate);
            w.write_u8(s.shift);
            w.write_u8(s.timer);
            w.write_u16(s.shadow);
            w.write_bool(s.enabled);
        }
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.enabled = r.read_bool()?;
        self.dac_enabled = r.read_bool()?;
        self.duty = r.read_bounded("duty", 4)?;
        self.duty_pos = r.read_bounded("duty position", 8)?;
        self.frequency = r.read_u16()? & 0x07FF;
        self.timer = r.read_u32()?;
        self.length.load_state(r)?;
        self.envelope.load_state(r)?;
        if let Some(s) = self.sweep.as_mut() {
            s.period = r.read_bounded("sweep period", 8)?;
            s.negate = r.read_bool()?;
            s.shift = r.read_bounded("sweep shift", 8)?;
            s.timer = r.read_u8()?;
            s.shadow = r.read_u16()?;
            s.enabled = r.read_bool()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triggered(with_sweep: bool, freq: u16) -> SquareChannel {
        let mut ch = SquareChannel::new(with_sweep);
        ch.write(1, 0x80);
        ch.write(2, 0xF0);
        ch.write(3, (freq & 0xFF) as u8);
        ch.write(4, 0x80 | (freq >> 8) as u8);
        ch
    }

    #[test]
    fn duty_step_every_period() {
        let mut ch = triggered(false, 2047);
        // Period is 4 dots at the highest frequency; 50% duty is 10000111.
        let mut levels = Vec::new();
        for _ in 0..32 {
            ch.clock();
            levels.push(ch.sample());
        }
        let steps: Vec<u8> = levels.iter().step_by(4).copied().collect();
        assert_eq!(steps, vec![15, 0, 0, 0, 0, 15, 15, 15]);
    }

    #[test]
    fn dac_off_silences_channel() {
        let mut ch = triggered(false, 1000);
        assert!(ch.enabled());
        ch.write(2, 0x00);
        assert!(!ch.enabled());
        ch.write(4, 0x80);
        assert!(!ch.enabled());
    }

    #[test]
    fn sweep_overflow_disables() {
        let mut ch = SquareChannel::new(true);
        ch.write(0, 0x11);
        ch.write(2, 0xF0);
        ch.write(3, 0x00);
        ch.write(4, 0x84);
        assert!(ch.enabled());
        assert_eq!(ch.clock_sweep(), Some(0x600));
        assert!(!ch.enabled());
    }

    #[test]
    fn sweep_overflow_on_trigger() {
        let mut ch = SquareChannel::new(true);
        ch.write(0, 0x11);
        ch.write(2, 0xF0);
        ch.write(4, 0x86);
        assert!(!ch.enabled());
    }

    #[test]
    fn sweep_downward_settles() {
        let mut ch = SquareChannel::new(true);
        ch.write(0, 0x19);
        ch.write(2, 0xF0);
        ch.write(3, 0x00);
        ch.write(4, 0x84);
        assert_eq!(ch.clock_sweep(), Some(0x200));
        assert_eq!(ch.clock_sweep(), Some(0x100));
        assert!(ch.enabled());
    }
}
