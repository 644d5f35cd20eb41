//! The machine as seen by a front-end.

use std::collections::VecDeque;
use std::time::SystemTime;

use crate::cartridge::Cartridge;
use crate::config::{EmulatorConfig, ModelPreference};
use crate::cpu::Cpu;
use crate::error::{CpuError, LoadError, StateError};
use crate::hardware::Model;
use crate::joypad::Button;
use crate::mmu::Mmu;
use crate::ppu::ColorMode;
use crate::ppu::timing::FRAME_DOTS;
use crate::serial::LinkPort;
use crate::state::{Snapshot, StateReader, StateWriter};

/// Notifications queued during stepping, drained by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Vertical blank was entered; [`GameBoy::frame`] holds the new picture.
    FrameReady,
    /// `audio_buffer_frames` interleaved stereo samples.
    AudioBufferReady(Vec<i16>),
    SerialTransfer { sent: u8, received: u8 },
}

pub struct GameBoy {
    config: EmulatorConfig,
    model: Model,
    pub cpu: Cpu,
    pub mmu: Mmu,
    events: VecDeque<Event>,
    /// Interleaved L/R samples not yet handed out.
    audio: Vec<i16>,
    /// Dots the previous `run_frame` overshot by.
    frame_carry: u64,
    fault: Option<CpuError>,
}

fn build_mmu(model: Model, mode: ColorMode, config: &EmulatorConfig) -> Mmu {
    Mmu::new(
        model,
        mode,
        config.dmg_palette,
        config.sample_rate,
        config.low_pass,
    )
}

impl GameBoy {
    /// A powered machine with no cartridge inserted.
    pub fn new(config: EmulatorConfig) -> Self {
        let model = match config.model {
            ModelPreference::Cgb => Model::Cgb,
            ModelPreference::Auto | ModelPreference::Dmg => Model::Dmg,
        };
        let mode = if model.is_cgb() {
            ColorMode::Cgb
        } else {
            ColorMode::Dmg
        };
        let mmu = build_mmu(model, mode, &config);
        let audio = Vec::with_capacity(config.audio_buffer_frames * 2);
        Self {
            config,
            model,
            cpu: Cpu::new(model),
            mmu,
            events: VecDeque::new(),
            audio,
            frame_carry: 0,
            fault: None,
        }
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn cartridge(&self) -> Option<&Cartridge> {
        self.mmu.cartridge()
    }

    /// Validate `rom` and power the machine up with it. On failure the
    /// machine is left exactly as it was.
    pub fn load_cartridge(&mut self, rom: Vec<u8>) -> Result<(), LoadError> {
        let cart = Cartridge::from_bytes(rom)?;
        self.model = match self.config.model {
            ModelPreference::Auto if cart.cgb_supported() => Model::Cgb,
            ModelPreference::Auto | ModelPreference::Dmg => Model::Dmg,
            ModelPreference::Cgb => Model::Cgb,
        };
        self.power_cycle(Some(cart));
        log::info!("running as {:?}", self.model);
        Ok(())
    }

    /// Back to the post-boot state, keeping the cartridge and its RAM.
    pub fn reset(&mut self) {
        let cart = self.mmu.take_cartridge();
        self.power_cycle(cart);
    }

    fn power_cycle(&mut self, cart: Option<Cartridge>) {
        let mode = match (self.model, cart.as_ref()) {
            (Model::Dmg, _) => ColorMode::Dmg,
            (Model::Cgb, Some(c)) if !c.cgb_supported() => ColorMode::Compat,
            (Model::Cgb, _) => ColorMode::Cgb,
        };
        let link = self.mmu.serial.disconnect();
        self.cpu = Cpu::new(self.model);
        self.mmu = build_mmu(self.model, mode, &self.config);
        self.mmu.serial.connect(link);
        if let Some(cart) = cart {
            self.mmu.insert_cartridge(cart);
        }
        self.events.clear();
        self.audio.clear();
        self.frame_carry = 0;
        self.fault = None;
    }

    /// Merge a previously saved battery blob into cartridge RAM.
    pub fn load_battery(&mut self, data: &[u8]) {
        if let Some(cart) = self.mmu.cartridge_mut() {
            cart.load_battery_ram(data);
        }
    }

    pub fn battery_ram(&self) -> Option<Vec<u8>> {
        self.mmu.cartridge().and_then(Cartridge::battery_ram)
    }

    /// Identifier under which the battery blob should be persisted.
    pub fn save_key(&self) -> Option<String> {
        self.mmu.cartridge().map(Cartridge::save_key)
    }

    /// Advance the cartridge clock to wall-clock time `now`.
    pub fn update_rtc(&mut self, now: SystemTime) {
        if let Some(cart) = self.mmu.cartridge_mut() {
            cart.update_rtc(now);
        }
    }

    pub fn connect_link(&mut self, port: Box<dyn LinkPort>) {
        self.mmu.serial.connect(port);
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.mmu.set_button(button, pressed);
    }

    /// Debug read that ignores PPU and DMA access locks.
    pub fn peek(&self, addr: u16) -> u8 {
        self.mmu.peek(addr)
    }

    pub fn poke(&mut self, addr: u16, val: u8) {
        self.mmu.poke(addr, val);
    }

    /// The last completed frame, 160×144 BGR555.
    pub fn frame(&self) -> &[u16] {
        self.mmu.ppu.framebuffer()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = Event> + '_ {
        self.events.drain(..)
    }

    /// Execute one instruction and return the M-cycles it took. Without a
    /// cartridge this does nothing. A processor fault is sticky until the
    /// next reset or cartridge load.
    pub fn step(&mut self) -> Result<u32, CpuError> {
        if let Some(err) = self.fault {
            return Err(err);
        }
        if self.mmu.cartridge().is_none() {
            return Ok(0);
        }
        let cycles = match self.cpu.step(&mut self.mmu) {
            Ok(cycles) => cycles,
            Err(err) => {
                self.fault = Some(err);
                return Err(err);
            }
        };
        self.collect_events();
        Ok(cycles)
    }

    /// Advance one update tick: 70 224 dots, less whatever the previous
    /// tick overshot.
    pub fn run_frame(&mut self) -> Result<(), CpuError> {
        if let Some(err) = self.fault {
            return Err(err);
        }
        if self.mmu.cartridge().is_none() {
            return Ok(());
        }
        let target = (FRAME_DOTS as u64).saturating_sub(self.frame_carry);
        let start = self.mmu.dots();
        while self.mmu.dots() - start < target {
            self.step()?;
        }
        self.frame_carry = self.mmu.dots() - start - target;
        Ok(())
    }

    fn collect_events(&mut self) {
        if self.mmu.take_frame_ready() {
            self.events.push_back(Event::FrameReady);
        }
        for t in self.mmu.serial.take_completed() {
            self.events.push_back(Event::SerialTransfer {
                sent: t.sent,
                received: t.received,
            });
        }

        let (left_vol, right_vol) = self.config.output_volume;
        let left_gain = left_vol.min(15) as f32 / 15.0;
        let right_gain = right_vol.min(15) as f32 / 15.0;
        let frames = self.config.audio_buffer_frames.max(1);
        for (left, right) in self.mmu.apu.drain_samples() {
            self.audio.push(clip(left * left_gain));
            self.audio.push(clip(right * right_gain));
            if self.audio.len() >= frames * 2 {
                let buffer = std::mem::replace(&mut self.audio, Vec::with_capacity(frames * 2));
                self.events.push_back(Event::AudioBufferReady(buffer));
            }
        }
    }

    /// Serialize the whole machine. Only valid with a cartridge inserted.
    pub fn save_state(&self) -> Result<Vec<u8>, StateError> {
        let cart = self.mmu.cartridge().ok_or(StateError::NoCartridge)?;
        let mut w = StateWriter::new();
        w.write_u8(self.model.to_byte());
        self.cpu.save_state(&mut w);
        self.mmu.save_state(&mut w);
        w.write_u32(self.audio.len() as u32);
        for &sample in &self.audio {
            w.write_u16(sample as u16);
        }
        w.write_u64(self.frame_carry);
        cart.save_state(&mut w);
        Ok(w.finish())
    }

    /// Restore a blob from [`GameBoy::save_state`]. A rejected blob leaves
    /// the machine untouched.
    pub fn load_state(&mut self, blob: &[u8]) -> Result<(), StateError> {
        let backup = match self.save_state() {
            Ok(backup) => backup,
            Err(err) => {
                log::warn!("save state rejected: {err}");
                return Err(err);
            }
        };
        match self.restore(blob) {
            Ok(()) => {
                self.events.clear();
                self.fault = None;
                log::info!("restored save state ({} bytes)", blob.len());
                Ok(())
            }
            Err(err) => {
                log::warn!("save state rejected: {err}");
                if let Err(rollback) = self.restore(&backup) {
                    log::error!("failed to roll back rejected save state: {rollback}");
                }
                Err(err)
            }
        }
    }

    fn restore(&mut self, blob: &[u8]) -> Result<(), StateError> {
        let mut r = StateReader::open(blob)?;
        if r.read_u8()? != self.model.to_byte() {
            return Err(StateError::ModelMismatch);
        }
        self.cpu.load_state(&mut r)?;
        self.mmu.load_state(&mut r)?;

        let samples = r.read_u32()? as usize;
        let limit = self.config.audio_buffer_frames.max(1) * 2;
        if samples >= limit {
            return Err(StateError::InvalidValue {
                field: "audio buffer length",
                value: samples as u32,
            });
        }
        self.audio.clear();
        for _ in 0..samples {
            self.audio.push(r.read_u16()? as i16);
        }
        self.frame_carry = r.read_u64()?;

        self.mmu
            .cartridge_mut()
            .ok_or(StateError::NoCartridge)?
            .load_state(&mut r)?;
        r.finish()
    }
}

fn clip(sample: f32) -> i16 {
    sample.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::compute_header_checksum;

    fn rom_with_program(program: &[u8], cgb_flag: u8) -> Vec<u8> {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0100..0x0100 + program.len()].copy_from_slice(program);
        rom[0x0134..0x0138].copy_from_slice(b"TEST");
        rom[0x0143] = cgb_flag;
        rom[0x014D] = compute_header_checksum(&rom);
        rom
    }

    /// JR -2 forever.
    const SPIN: [u8; 2] = [0x18, 0xFE];

    fn machine(config: EmulatorConfig, program: &[u8], cgb_flag: u8) -> GameBoy {
        let mut gb = GameBoy::new(config);
        gb.load_cartridge(rom_with_program(program, cgb_flag)).unwrap();
        gb
    }

    #[test]
    fn bad_checksum_keeps_previous_cartridge() {
        let mut gb = machine(EmulatorConfig::default(), &SPIN, 0x00);
        let before = gb.save_state().unwrap();
        let mut bad = rom_with_program(&[0x00], 0x80);
        bad[0x014D] ^= 0xFF;
        assert!(matches!(
            gb.load_cartridge(bad),
            Err(LoadError::HeaderChecksum { .. })
        ));
        assert_eq!(gb.model(), Model::Dmg);
        assert_eq!(gb.save_state().unwrap(), before);
    }

    #[test]
    fn model_follows_preference_and_header() {
        let gb = machine(EmulatorConfig::default(), &SPIN, 0x80);
        assert_eq!(gb.model(), Model::Cgb);
        assert_eq!(gb.mmu.ppu.color_mode(), ColorMode::Cgb);

        let gb = machine(
            EmulatorConfig::default().with_model(ModelPreference::Dmg),
            &SPIN,
            0x80,
        );
        assert_eq!(gb.model(), Model::Dmg);

        let gb = machine(
            EmulatorConfig::default().with_model(ModelPreference::Cgb),
            &SPIN,
            0x00,
        );
        assert_eq!(gb.mmu.ppu.color_mode(), ColorMode::Compat);
    }

    #[test]
    fn no_cartridge_is_inert() {
        let mut gb = GameBoy::new(EmulatorConfig::default());
        assert_eq!(gb.step(), Ok(0));
        assert_eq!(gb.run_frame(), Ok(()));
        assert_eq!(gb.save_state(), Err(StateError::NoCartridge));
        assert_eq!(gb.peek(0x0100), 0xFF);
    }

    #[test]
    fn run_frame_advances_one_frame_of_dots() {
        let mut gb = machine(EmulatorConfig::default(), &SPIN, 0x00);
        let start = gb.mmu.dots();
        gb.run_frame().unwrap();
        gb.run_frame().unwrap();
        let elapsed = gb.mmu.dots() - start;
        assert!(elapsed >= 2 * FRAME_DOTS as u64);
        assert!(elapsed < 2 * FRAME_DOTS as u64 + 24);
        let frames = gb
            .drain_events()
            .filter(|e| *e == Event::FrameReady)
            .count();
        assert_eq!(frames, 2);
    }

    #[test]
    fn illegal_opcode_latches() {
        let mut gb = machine(EmulatorConfig::default(), &[0x00, 0xFD], 0x00);
        assert_eq!(gb.step(), Ok(1));
        let err = CpuError::IllegalOpcode {
            opcode: 0xFD,
            pc: 0x0101,
        };
        assert_eq!(gb.step(), Err(err));
        assert_eq!(gb.run_frame(), Err(err));
        gb.reset();
        assert_eq!(gb.step(), Ok(1));
    }

    #[test]
    fn audio_buffers_have_configured_size() {
        let config = EmulatorConfig::default()
            .with_sample_rate(32_768)
            .with_audio_buffer_frames(128);
        let mut gb = machine(config, &SPIN, 0x00);
        gb.run_frame().unwrap();
        let buffers: Vec<_> = gb
            .drain_events()
            .filter_map(|e| match e {
                Event::AudioBufferReady(buf) => Some(buf),
                _ => None,
            })
            .collect();
        // 70224 dots at 32768 Hz is 548 frames.
        assert_eq!(buffers.len(), 4);
        assert!(buffers.iter().all(|b| b.len() == 256));
    }

    #[test]
    fn serial_transfer_is_reported() {
        // LD A,$42; LDH (SB),A; LD A,$81; LDH (SC),A; JR -2
        let program = [0x3E, 0x42, 0xE0, 0x01, 0x3E, 0x81, 0xE0, 0x02, 0x18, 0xFE];
        let mut gb = machine(EmulatorConfig::default(), &program, 0x00);
        gb.run_frame().unwrap();
        let transfers: Vec<_> = std::iter::from_fn(|| gb.poll_event())
            .filter(|e| matches!(e, Event::SerialTransfer { .. }))
            .collect();
        assert_eq!(
            transfers,
            vec![Event::SerialTransfer {
                sent: 0x42,
                received: 0xFF
            }]
        );
        assert_eq!(gb.peek(0xFF01), 0xFF);
    }

    #[test]
    fn state_roundtrip_is_deterministic() {
        // INC A; LD (HL+),A; JR -4 : keeps writing through work RAM.
        let program = [0x21, 0x00, 0xC0, 0x3C, 0x22, 0x18, 0xFC];
        let mut gb = machine(EmulatorConfig::default(), &program, 0x00);
        gb.run_frame().unwrap();
        let blob = gb.save_state().unwrap();

        for _ in 0..3 {
            gb.run_frame().unwrap();
        }
        let expected = gb.save_state().unwrap();

        gb.load_state(&blob).unwrap();
        for _ in 0..3 {
            gb.run_frame().unwrap();
        }
        assert_eq!(gb.save_state().unwrap(), expected);
    }

    #[test]
    fn rejected_state_leaves_machine_untouched() {
        let mut gb = machine(EmulatorConfig::default(), &SPIN, 0x00);
        gb.run_frame().unwrap();
        let good = gb.save_state().unwrap();

        let mut bad_magic = good.clone();
        bad_magic[0] = b'X';
        assert_eq!(gb.load_state(&bad_magic), Err(StateError::BadMagic));

        let mut short = good.clone();
        short.truncate(good.len() - 1);
        assert!(gb.load_state(&short).is_err());

        // Same length, different cartridge: fails late, after most
        // components were already overwritten.
        let mut rom = rom_with_program(&SPIN, 0x00);
        rom[0x0134] = b'X';
        rom[0x014D] = compute_header_checksum(&rom);
        let mut other = GameBoy::new(EmulatorConfig::default());
        other.load_cartridge(rom).unwrap();
        other.run_frame().unwrap();
        let foreign = other.save_state().unwrap();
        assert_eq!(gb.load_state(&foreign), Err(StateError::CartridgeMismatch));
        assert_eq!(gb.save_state().unwrap(), good);
    }

    #[test]
    fn state_from_other_model_is_rejected() {
        let dmg = machine(EmulatorConfig::default(), &SPIN, 0x00);
        let blob = dmg.save_state().unwrap();
        let mut cgb = machine(
            EmulatorConfig::default().with_model(ModelPreference::Cgb),
            &SPIN,
            0x00,
        );
        assert_eq!(cgb.load_state(&blob), Err(StateError::ModelMismatch));
    }

    #[test]
    fn reset_keeps_link_and_cartridge() {
        let mut gb = machine(EmulatorConfig::default(), &SPIN, 0x00);
        gb.connect_link(Box::new(crate::serial::NullLinkPort::new(true)));
        gb.poke(0xC000, 0x12);
        gb.reset();
        assert!(gb.cartridge().is_some());
        assert_eq!(gb.peek(0xC000), 0x00);
        assert_eq!(gb.cpu.pc, 0x0100);
    }
}
