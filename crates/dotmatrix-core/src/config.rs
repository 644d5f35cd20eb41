//! Caller-supplied machine configuration.
//!
//! The core never reads configuration files; front-ends build an
//! [`EmulatorConfig`] and hand it to [`crate::GameBoy::new`].

/// Which hardware model to emulate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ModelPreference {
    /// Colour mode when the cartridge header advertises CGB support.
    #[default]
    Auto,
    Dmg,
    Cgb,
}

/// Default legacy shades as 15-bit colours (lightest first).
pub const DEFAULT_DMG_PALETTE: [u16; 4] = [0x7FFF, 0x56B5, 0x294A, 0x0000];

#[derive(Clone, Debug, PartialEq)]
pub struct EmulatorConfig {
    pub model: ModelPreference,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Stereo frames per [`crate::Event::AudioBufferReady`].
    pub audio_buffer_frames: usize,
    /// Per-side master volume, 0..=15 (15 = unity).
    pub output_volume: (u8, u8),
    /// Enables the one-pole low-pass stage after DC removal.
    pub low_pass: bool,
    pub dmg_palette: [u16; 4],
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            model: ModelPreference::Auto,
            sample_rate: 48_000,
            audio_buffer_frames: 1024,
            output_volume: (15, 15),
            low_pass: false,
            dmg_palette: DEFAULT_DMG_PALETTE,
        }
    }
}

impl EmulatorConfig {
    pub fn with_model(mut self, model: ModelPreference) -> Self {
        self.model = model;
        self
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate.max(1);
        self
    }

    pub fn with_audio_buffer_frames(mut self, frames: usize) -> Self {
        self.audio_buffer_frames = frames.max(1);
        self
    }

    pub fn with_output_volume(mut self, left: u8, right: u8) -> Self {
        self.output_volume = (left.min(15), right.min(15));
        self
    }

    pub fn with_low_pass(mut self, enabled: bool) -> Self {
        self.low_pass = enabled;
        self
    }

    pub fn with_dmg_palette(mut self, palette: [u16; 4]) -> Self {
        self.dmg_palette = palette.map(|c| c & 0x7FFF);
        self
    }
}
