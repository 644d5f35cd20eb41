//! Stereo mixer, DC-blocking high-pass and optional low-pass stage.

use crate::error::StateError;
use crate::state::{Snapshot, StateReader, StateWriter};

pub const MASTER_CLOCK_HZ: u32 = 4_194_304;
const VOLUME_FACTOR: i32 = 64;
const LOW_PASS_CUTOFF_HZ: f32 = 12_000.0;

/// Channel DAC: level 0-15 maps to a signed swing; a disabled DAC is silent.
#[inline]
pub fn dac_output(level: u8, dac_enabled: bool) -> i32 {
    if dac_enabled {
        15 - 2 * level as i32
    } else {
        0
    }
}

/// Route four DAC outputs through NR51 and scale by the NR50 volumes.
pub fn route(dacs: [i32; 4], nr50: u8, nr51: u8) -> (i32, i32) {
    let mut left = 0;
    let mut right = 0;
    for (i, out) in dacs.iter().enumerate() {
        if nr51 & (0x10 << i) != 0 {
            left += out;
        }
        if nr51 & (0x01 << i) != 0 {
            right += out;
        }
    }
    let left_vol = ((nr50 >> 4) & 0x07) as i32 + 1;
    let right_vol = (nr50 & 0x07) as i32 + 1;
    (
        left * left_vol * VOLUME_FACTOR,
        right * right_vol * VOLUME_FACTOR,
    )
}

#[derive(Clone, Debug, PartialEq)]
pub struct Mixer {
    hp_coef: f32,
    lp_alpha: Option<f32>,
    hp_prev_input: [f32; 2],
    hp_prev_output: [f32; 2],
    lp_state: [f32; 2],
}

impl Mixer {
    pub fn new(sample_rate: u32, low_pass: bool) -> Self {
        let rate = sample_rate.max(1) as f32;
        let lp_alpha = low_pass.then(|| {
            let cutoff = LOW_PASS_CUTOFF_HZ.min(rate / 2.0);
            1.0 - (-2.0 * std::f32::consts::PI * cutoff / rate).exp()
        });
        Self {
            hp_coef: 0.999_958_f32.powf(MASTER_CLOCK_HZ as f32 / rate),
            lp_alpha,
            hp_prev_input: [0.0; 2],
            hp_prev_output: [0.0; 2],
            lp_state: [0.0; 2],
        }
    }

    pub fn reset(&mut self) {
        self.hp_prev_input = [0.0; 2];
        self.hp_prev_output = [0.0; 2];
        self.lp_state = [0.0; 2];
    }

    /// Filter one stereo frame at the output rate.
    pub fn filter(&mut self, left: f32, right: f32) -> (f32, f32) {
        let mut out = [left, right];
        for (side, sample) in out.iter_mut().enumerate() {
            let input = *sample;
            let hp = input - self.hp_prev_input[side] + self.hp_coef * self.hp_prev_output[side];
            self.hp_prev_input[side] = input;
            self.hp_prev_output[side] = hp;
            *sample = match self.lp_alpha {
                Some(alpha) => {
                    self.lp_state[side] += alpha * (hp - self.lp_state[side]);
                    self.lp_state[side]
                }
                None => hp,
            };
        }
        (out[0], out[1])
    }
}

impl Snapshot for Mixer {
    fn save_state(&self, w: &mut StateWriter) {
        for side in 0..2 {
            w.write_f32(self.hp_prev_input[side]);
            w.write_f32(self.hp_prev_output[side]);
            w.write_f32(self.lp_state[side]);
        }
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        for side in 0..2 {
            self.hp_prev_input[side] = r.read_f32()?;
            self.hp_prev_output[side] = r.read_f32()?;
            self.lp_state[side] = r.read_f32()?;
        }
        Ok(())
    }
}
