//! Audio processing unit.
//!
//! Channels are clocked once per dot (4 MiHz) and the frame sequencer is
//! stepped by the bus on the falling edge of the DIV bit that yields 512 Hz.
//! Output frames are box-averaged down to the configured sample rate and
//! then filtered by the [`mixer::Mixer`].

pub mod envelope;
pub mod mixer;
pub mod noise;
pub mod square;
pub mod wave;

use crate::error::StateError;
use crate::state::{Snapshot, StateReader, StateWriter};
use mixer::{MASTER_CLOCK_HZ, Mixer, dac_output, route};
use noise::NoiseChannel;
use square::SquareChannel;
use wave::WaveChannel;

const REG_COUNT: usize = 0x17;

/// Register values left behind by the boot ROM, FF10-FF26.
const POWER_ON_REGS: [u8; REG_COUNT] = [
    0x80, 0xBF, 0xF3, 0xFF, 0xBF, 0xFF, 0x3F, 0x00, 0xFF, 0xBF, 0x7F, 0xFF, 0x9F, 0xFF, 0xBF,
    0xFF, 0xFF, 0x00, 0x00, 0xBF, 0x77, 0xF3, 0xF1,
];

fn read_mask(addr: u16) -> u8 {
    match addr {
        0xFF10 => 0x80,
        0xFF11 | 0xFF16 => 0x3F,
        0xFF13 | 0xFF18 | 0xFF1B | 0xFF1D => 0xFF,
        0xFF14 | 0xFF19 | 0xFF1E | 0xFF23 => 0xBF,
        0xFF1A => 0x7F,
        0xFF1C => 0x9F,
        0xFF20 => 0xFF,
        0xFF26 => 0x70,
        0xFF15 | 0xFF1F => 0xFF,
        _ => 0x00,
    }
}

pub struct Apu {
    ch1: SquareChannel,
    ch2: SquareChannel,
    ch3: WaveChannel,
    ch4: NoiseChannel,
    regs: [u8; REG_COUNT],
    nr50: u8,
    nr51: u8,
    powered: bool,
    sequencer_step: u8,
    cgb: bool,
    mixer: Mixer,
    sample_rate: u32,
    /// Downsampling phase, in units of sample_rate per dot.
    phase: u32,
    acc: [i64; 2],
    acc_count: u32,
    samples: Vec<(f32, f32)>,
}

impl Apu {
    pub fn new(cgb: bool, sample_rate: u32, low_pass: bool) -> Self {
        let sample_rate = sample_rate.max(1);
        let mut apu = Self {
            ch1: SquareChannel::new(true),
            ch2: SquareChannel::new(false),
            ch3: WaveChannel::new(),
            ch4: NoiseChannel::new(),
            regs: [0; REG_COUNT],
            nr50: 0,
            nr51: 0,
            powered: true,
            sequencer_step: 0,
            cgb,
            mixer: Mixer::new(sample_rate, low_pass),
            sample_rate,
            phase: 0,
            acc: [0; 2],
            acc_count: 0,
            samples: Vec::new(),
        };
        for (i, &val) in POWER_ON_REGS.iter().enumerate() {
            let addr = 0xFF10 + i as u16;
            if addr == 0xFF26 {
                continue;
            }
            // Restore the registers without replaying any trigger.
            let val = match addr {
                0xFF14 | 0xFF19 | 0xFF1E | 0xFF23 => val & 0x7F,
                _ => val,
            };
            apu.write_reg(addr, val);
        }
        apu
    }

    pub fn powered(&self) -> bool {
        self.powered
    }

    /// Channel enable flags as reported in NR52 bits 0-3.
    pub fn channel_status(&self) -> u8 {
        u8::from(self.ch1.enabled())
            | u8::from(self.ch2.enabled()) << 1
            | u8::from(self.ch3.enabled()) << 2
            | u8::from(self.ch4.enabled()) << 3
    }

    pub fn read_reg(&self, addr: u16) -> u8 {
        match addr {
            0xFF26 => 0x70 | (u8::from(self.powered) << 7) | self.channel_status(),
            0xFF30..=0xFF3F => self.ch3.read_ram((addr - 0xFF30) as usize),
            0xFF10..=0xFF25 => self.regs[(addr - 0xFF10) as usize] | read_mask(addr),
            _ => 0xFF,
        }
    }

    /// PCM12/PCM34: live channel levels, colour hardware only.
    pub fn read_pcm(&self, addr: u16) -> u8 {
        if !self.cgb {
            return 0xFF;
        }
        match addr {
            0xFF76 => self.ch2.sample() << 4 | self.ch1.sample(),
            0xFF77 => self.ch4.sample() << 4 | self.ch3.sample(),
            _ => 0xFF,
        }
    }

    pub fn write_reg(&mut self, addr: u16, val: u8) {
        #[cfg(feature = "apu-trace")]
        log::trace!("APU {addr:04X} <- {val:02X}");
        match addr {
            0xFF26 => {
                let on = val & 0x80 != 0;
                if self.powered && !on {
                    self.power_off();
                } else if !self.powered && on {
                    self.powered = true;
                    self.sequencer_step = 0;
                }
                return;
            }
            0xFF30..=0xFF3F => {
                self.ch3.write_ram((addr - 0xFF30) as usize, val);
                return;
            }
            0xFF10..=0xFF25 if self.powered => {}
            _ => return,
        }
        self.regs[(addr - 0xFF10) as usize] = val;
        match addr {
            0xFF10..=0xFF14 => self.ch1.write((addr - 0xFF10) as u8, val),
            0xFF16..=0xFF19 => self.ch2.write((addr - 0xFF15) as u8, val),
            0xFF1A..=0xFF1E => self.ch3.write((addr - 0xFF1A) as u8, val),
            0xFF20..=0xFF23 => self.ch4.write((addr - 0xFF1F) as u8, val),
            0xFF24 => self.nr50 = val,
            0xFF25 => self.nr51 = val,
            _ => {}
        }
    }

    fn power_off(&mut self) {
        self.ch1 = SquareChannel::new(true);
        self.ch2 = SquareChannel::new(false);
        self.ch3.power_off();
        self.ch4 = NoiseChannel::new();
        self.regs = [0; REG_COUNT];
        self.nr50 = 0;
        self.nr51 = 0;
        self.powered = false;
    }

    /// One 512 Hz frame sequencer step.
    pub fn clock_frame_sequencer(&mut self) {
        if !self.powered {
            return;
        }
        let step = self.sequencer_step;
        self.sequencer_step = (step + 1) & 7;
        if step & 1 == 0 {
            self.ch1.clock_length();
            self.ch2.clock_length();
            self.ch3.clock_length();
            self.ch4.clock_length();
        }
        if step == 2 || step == 6 {
            let _swept = self.ch1.clock_sweep();
            #[cfg(feature = "apu-trace")]
            if let Some(freq) = _swept {
                log::trace!("CH1 sweep -> {freq:03X}");
            }
        }
        if step == 7 {
            self.ch1.clock_envelope();
            self.ch2.clock_envelope();
            self.ch4.clock_envelope();
        }
    }

    fn any_dac_enabled(&self) -> bool {
        self.ch1.dac_enabled()
            || self.ch2.dac_enabled()
            || self.ch3.dac_enabled()
            || self.ch4.dac_enabled()
    }

    /// Advance one dot.
    pub fn dot(&mut self) {
        if self.powered {
            self.ch1.clock();
            self.ch2.clock();
            self.ch3.clock();
            self.ch4.clock();
        }

        let dacs = [
            dac_output(self.ch1.sample(), self.ch1.dac_enabled()),
            dac_output(self.ch2.sample(), self.ch2.dac_enabled()),
            dac_output(self.ch3.sample(), self.ch3.dac_enabled()),
            dac_output(self.ch4.sample(), self.ch4.dac_enabled()),
        ];
        let (left, right) = route(dacs, self.nr50, self.nr51);
        self.acc[0] += left as i64;
        self.acc[1] += right as i64;
        self.acc_count += 1;

        self.phase += self.sample_rate;
        if self.phase >= MASTER_CLOCK_HZ {
            self.phase -= MASTER_CLOCK_HZ;
            let n = self.acc_count.max(1) as f32;
            let frame = if self.any_dac_enabled() {
                self.mixer.filter(self.acc[0] as f32 / n, self.acc[1] as f32 / n)
            } else {
                self.mixer.reset();
                (0.0, 0.0)
            };
            self.samples.push(frame);
            self.acc = [0; 2];
            self.acc_count = 0;
        }
    }

    /// Filtered stereo frames produced since the last drain.
    pub fn drain_samples(&mut self) -> std::vec::Drain<'_, (f32, f32)> {
        self.samples.drain(..)
    }
}

impl Snapshot for Apu {
    fn save_state(&self, w: &mut StateWriter) {
        self.ch1.save_state(w);
        self.ch2.save_state(w);
        self.ch3.save_state(w);
        self.ch4.save_state(w);
        w.write_bytes(&self.regs);
        w.write_u8(self.nr50);
        w.write_u8(self.nr51);
        w.write_bool(self.powered);
        w.write_u8(self.sequencer_step);
        self.mixer.save_state(w);
        w.write_u32(self.phase);
        w.write_u64(self.acc[0] as u64);
        w.write_u64(self.acc[1] as u64);
        w.write_u32(self.acc_count);
        w.write_u32(self.samples.len() as u32);
        for &(l, r) in &self.samples {
            w.write_f32(l);
            w.write_f32(r);
        }
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.ch1.load_state(r)?;
        self.ch2.load_state(r)?;
        self.ch3.load_state(r)?;
        self.ch4.load_state(r)?;
        r.read_into(&mut self.regs)?;
        self.nr50 = r.read_u8()?;
        self.nr51 = r.read_u8()?;
        self.powered = r.read_bool()?;
        self.sequencer_step = r.read_bounded("frame sequencer step", 8)?;
        self.mixer.load_state(r)?;
        self.phase = r.read_u32()?;
        if self.phase >= MASTER_CLOCK_HZ {
            return Err(StateError::InvalidValue {
                field: "sample phase",
                value: self.phase,
            });
        }
        self.acc[0] = r.read_u64()? as i64;
        self.acc[1] = r.read_u64()? as i64;
        self.acc_count = r.read_u32()?;
        let pending = r.read_u32()? as usize;
        if pending > r.remaining() / 8 {
            return Err(StateError::Truncated);
        }
        self.samples.clear();
        for _ in 0..pending {
            let l = r.read_f32()?;
            let rt = r.read_f32()?;
            self.samples.push((l, rt));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apu() -> Apu {
        Apu::new(false, 48_000, false)
    }

    #[test]
    fn boot_registers() {
        let apu = apu();
        assert_eq!(apu.read_reg(0xFF24), 0x77);
        assert_eq!(apu.read_reg(0xFF25), 0xF3);
        assert_eq!(apu.read_reg(0xFF26), 0xF0);
        assert_eq!(apu.read_reg(0xFF11), 0xBF);
    }

    #[test]
    fn trigger_sets_status_bit() {
        let mut apu = apu();
        apu.write_reg(0xFF17, 0xF0);
        apu.write_reg(0xFF19, 0x87);
        assert_eq!(apu.read_reg(0xFF26) & 0x0F, 0x02);
    }

    #[test]
    fn power_off_clears_and_blocks_writes() {
        let mut apu = apu();
        apu.write_reg(0xFF30, 0x12);
        apu.write_reg(0xFF26, 0x00);
        assert_eq!(apu.read_reg(0xFF26), 0x70);
        assert_eq!(apu.read_reg(0xFF24), 0x00);
        apu.write_reg(0xFF24, 0x77);
        assert_eq!(apu.read_reg(0xFF24), 0x00);
        assert_eq!(apu.read_reg(0xFF30), 0x12);
        apu.write_reg(0xFF26, 0x80);
        apu.write_reg(0xFF24, 0x77);
        assert_eq!(apu.read_reg(0xFF24), 0x77);
    }

    #[test]
    fn length_expiry_through_frame_sequencer() {
        let mut apu = apu();
        apu.write_reg(0xFF21, 0xF0);
        apu.write_reg(0xFF20, 0x3E);
        apu.write_reg(0xFF23, 0xC0);
        assert_eq!(apu.channel_status() & 0x08, 0x08);
        for _ in 0..4 {
            apu.clock_frame_sequencer();
        }
        assert_eq!(apu.channel_status() & 0x08, 0);
    }

    #[test]
    fn produces_samples_at_configured_rate() {
        let mut apu = apu();
        for _ in 0..MASTER_CLOCK_HZ / 8 {
            apu.dot();
        }
        assert_eq!(apu.drain_samples().count(), 6000);
        assert_eq!(apu.drain_samples().count(), 0);
    }

    #[test]
    fn pcm_registers_colour_only() {
        let dmg = apu();
        assert_eq!(dmg.read_pcm(0xFF76), 0xFF);
        let mut cgb = Apu::new(true, 48_000, false);
        cgb.write_reg(0xFF17, 0xF0);
        cgb.write_reg(0xFF16, 0xC0);
        cgb.write_reg(0xFF19, 0x87);
        let mut seen = 0;
        for _ in 0..64 {
            cgb.dot();
            seen |= cgb.read_pcm(0xFF76);
        }
        assert_eq!(seen & 0xF0, 0xF0);
        assert_eq!(seen & 0x0F, 0);
    }
}
