//! Pixel processing unit.
//!
//! [`Ppu::dot`] advances the pipeline by one 4 MiHz dot: it composites the
//! pixel under the cursor during draw mode, steps the [`timing`] scheduler,
//! and feeds the resulting transition to the STAT line, the object scanner
//! and the renderer. The caller learns about blanking entries through the
//! returned [`DotEvents`].

pub mod objects;
pub mod palette;
pub mod renderer;
pub mod stat;
pub mod tiles;
pub mod timing;

use crate::error::StateError;
use crate::interrupt::{Interrupt, InterruptController};
use crate::state::{Snapshot, StateReader, StateWriter};
use objects::ObjectManager;
use palette::Palettes;
use renderer::{LineRegs, PixelSources, Renderer};
use stat::StatDispatcher;
use timing::{LcdTiming, Mode, OAM_SCAN_DOTS};

pub use renderer::{SCREEN_HEIGHT, SCREEN_WIDTH};
pub use timing::FRAME_DOTS;

pub const VRAM_BANK_SIZE: usize = 0x2000;
pub const OAM_SIZE: usize = 0xA0;

pub type Vram = [[u8; VRAM_BANK_SIZE]; 2];

const LCDC_ENABLE: u8 = 0x80;
const LCDC_OBJ_TALL: u8 = 0x04;

/// How pixels are coloured.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorMode {
    /// Monochrome hardware: shades from BGP/OBP0/OBP1.
    Dmg,
    /// Colour hardware running a monochrome cartridge: shades routed
    /// through colour palette RAM, no tile attributes.
    Compat,
    /// Colour hardware running a colour cartridge.
    Cgb,
}

impl ColorMode {
    /// Colour-only registers (VBK, palette RAM, OPRI) exist.
    pub fn has_cgb_registers(self) -> bool {
        self != ColorMode::Dmg
    }

    fn to_byte(self) -> u8 {
        match self {
            ColorMode::Dmg => 0,
            ColorMode::Compat => 1,
            ColorMode::Cgb => 2,
        }
    }
}

/// Blanking transitions that happened during one dot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DotEvents {
    pub hblank: bool,
    pub vblank: bool,
}

pub struct Ppu {
    vram: Box<Vram>,
    vram_bank: usize,
    oam: [u8; OAM_SIZE],
    mode: ColorMode,

    lcdc: u8,
    scy: u8,
    scx: u8,
    wy: u8,
    wx: u8,
    /// Object priority mode register (OPRI)
    opri: u8,

    timing: LcdTiming,
    stat: StatDispatcher,
    palettes: Palettes,
    objects: ObjectManager,
    renderer: Renderer,
    frames: u64,
}

impl Ppu {
    pub fn new(mode: ColorMode, dmg_colors: [u16; 4]) -> Self {
        let mut palettes = Palettes::new(dmg_colors);
        if mode == ColorMode::Compat {
            palettes.apply_compat();
        }
        let mut ppu = Self {
            vram: Box::new([[0; VRAM_BANK_SIZE]; 2]),
            vram_bank: 0,
            oam: [0; OAM_SIZE],
            mode,
            lcdc: 0,
            scy: 0,
            scx: 0,
            wy: 0,
            wx: 0,
            opri: u8::from(mode != ColorMode::Cgb),
            timing: LcdTiming::off(),
            stat: StatDispatcher::new(),
            palettes,
            objects: ObjectManager::new(),
            renderer: Renderer::new(0x7FFF),
            frames: 0,
        };
        // Post-boot LCDC with the display on.
        ppu.write_reg(0xFF40, 0x91, &mut InterruptController::new());
        ppu
    }

    pub fn color_mode(&self) -> ColorMode {
        self.mode
    }

    pub fn set_dmg_colors(&mut self, colors: [u16; 4]) {
        self.palettes.set_dmg_colors(colors);
    }

    #[inline]
    pub fn lcd_enabled(&self) -> bool {
        self.lcdc & LCDC_ENABLE != 0
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.timing.mode()
    }

    #[inline]
    pub fn ly(&self) -> u8 {
        self.timing.line()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn window_line_counter(&self) -> u8 {
        self.renderer.window_line()
    }

    /// Last frame presented at vertical-blank entry, BGR555, row major.
    pub fn framebuffer(&self) -> &[u16] {
        self.renderer.front()
    }

    pub fn vram_accessible(&self) -> bool {
        !(self.lcd_enabled() && self.mode() == Mode::Draw)
    }

    pub fn oam_accessible(&self) -> bool {
        !(self.lcd_enabled() && matches!(self.mode(), Mode::OamScan | Mode::Draw))
    }

    pub fn vram_bank(&self) -> usize {
        self.vram_bank
    }

    /// Raw VRAM access in the selected bank, ignoring mode locks.
    pub fn read_vram(&self, addr: u16) -> u8 {
        self.vram[self.vram_bank][addr as usize & (VRAM_BANK_SIZE - 1)]
    }

    pub fn write_vram(&mut self, addr: u16, val: u8) {
        self.vram[self.vram_bank][addr as usize & (VRAM_BANK_SIZE - 1)] = val;
    }

    pub fn read_oam(&self, index: usize) -> u8 {
        self.oam.get(index).copied().unwrap_or(0xFF)
    }

    pub fn write_oam(&mut self, index: usize, val: u8) {
        if let Some(slot) = self.oam.get_mut(index) {
            *slot = val;
        }
    }

    fn read_stat(&self) -> u8 {
        let mode = if self.lcd_enabled() {
            self.mode().bits()
        } else {
            0
        };
        0x80 | self.stat.read_bits() | mode
    }

    pub fn read_reg(&self, addr: u16) -> u8 {
        let cgb_regs = self.mode.has_cgb_registers();
        match addr {
            0xFF40 => self.lcdc,
            0xFF41 => self.read_stat(),
            0xFF42 => self.scy,
            0xFF43 => self.scx,
            0xFF44 => self.ly(),
            0xFF45 => self.stat.lyc(),
            0xFF47..=0xFF49 => self.palettes.read(addr),
            0xFF4A => self.wy,
            0xFF4B => self.wx,
            0xFF4F if cgb_regs => 0xFE | self.vram_bank as u8,
            0xFF68..=0xFF6B if cgb_regs => self.palettes.read_cgb(addr),
            0xFF6C if cgb_regs => 0xFE | self.opri,
            _ => 0xFF,
        }
    }

    pub fn write_reg(&mut self, addr: u16, val: u8, ic: &mut InterruptController) {
        let cgb_regs = self.mode.has_cgb_registers();
        match addr {
            0xFF40 => self.write_lcdc(val, ic),
            0xFF41 => {
                self.stat.write_sources(val);
                if self.lcd_enabled() {
                    self.stat.update(self.ly(), self.mode(), ic);
                }
            }
            0xFF42 => self.scy = val,
            0xFF43 => self.scx = val,
            0xFF45 => {
                self.stat.set_lyc(val);
                if self.lcd_enabled() {
                    self.stat.update(self.ly(), self.mode(), ic);
                }
            }
            0xFF47..=0xFF49 => self.palettes.write(addr, val),
            0xFF4A => self.wy = val,
            0xFF4B => self.wx = val,
            0xFF4F if cgb_regs => self.vram_bank = (val & 0x01) as usize,
            0xFF68..=0xFF6B if cgb_regs => self.palettes.write_cgb(addr, val),
            0xFF6C if cgb_regs => self.opri = val & 0x01,
            _ => {}
        }
    }

    fn write_lcdc(&mut self, val: u8, ic: &mut InterruptController) {
        let was_on = self.lcd_enabled();
        self.lcdc = val;
        let on = self.lcd_enabled();
        if was_on && !on {
            self.timing = LcdTiming::off();
            self.stat.disable();
            self.objects.clear();
            self.renderer.blank(self.blank_color());
            #[cfg(feature = "ppu-trace")]
            log::trace!("LCD off");
        } else if !was_on && on {
            self.timing = LcdTiming::new();
            self.renderer.begin_frame();
            self.renderer.begin_line(0, self.wy);
            self.stat.update(0, Mode::OamScan, ic);
            #[cfg(feature = "ppu-trace")]
            log::trace!("LCD on");
        }
    }

    fn blank_color(&self) -> u16 {
        match self.mode {
            ColorMode::Dmg => self.palettes.lightest(),
            ColorMode::Compat | ColorMode::Cgb => 0x7FFF,
        }
    }

    /// Advance one dot.
    pub fn dot(&mut self, ic: &mut InterruptController) -> DotEvents {
        let mut events = DotEvents::default();
        if !self.lcd_enabled() {
            return events;
        }

        if self.mode() == Mode::Draw {
            let x = (self.timing.dot() - OAM_SCAN_DOTS) as u8;
            let src = PixelSources {
                regs: LineRegs {
                    lcdc: self.lcdc,
                    scx: self.scx,
                    scy: self.scy,
                    wx: self.wx,
                    ly: self.ly(),
                },
                vram: &self.vram,
                objects: &self.objects,
                palettes: &self.palettes,
                mode: self.mode,
            };
            self.renderer.draw_pixel(x, &src);
        }

        let t = self.timing.advance();
        if let Some(mode) = t.entered {
            #[cfg(feature = "ppu-trace")]
            log::trace!("LY {} mode {:?}", self.ly(), mode);
            match mode {
                Mode::OamScan => {
                    if self.ly() == 0 {
                        self.renderer.begin_frame();
                    }
                    self.renderer.begin_line(self.ly(), self.wy);
                }
                Mode::Draw => {
                    let tall = self.lcdc & LCDC_OBJ_TALL != 0;
                    let oam_priority = self.mode == ColorMode::Cgb && self.opri & 0x01 == 0;
                    self.objects.scan(&self.oam, self.ly(), tall, oam_priority);
                }
                Mode::HBlank => {
                    self.renderer.end_line();
                    events.hblank = true;
                }
                Mode::VBlank => {
                    self.renderer.present();
                    self.frames += 1;
                    ic.request(Interrupt::VBlank);
                    events.vblank = true;
                }
            }
        }
        self.stat.update(self.ly(), self.mode(), ic);
        events
    }
}

impl Snapshot for Ppu {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_u8(self.mode.to_byte());
        w.write_bytes(&self.vram[0]);
        w.write_bytes(&self.vram[1]);
        w.write_u8(self.vram_bank as u8);
        w.write_bytes(&self.oam);
        w.write_u8(self.lcdc);
        w.write_u8(self.scy);
        w.write_u8(self.scx);
        w.write_u8(self.wy);
        w.write_u8(self.wx);
        w.write_u8(self.opri);
        w.write_u64(self.frames);
        self.timing.save_state(w);
        self.stat.save_state(w);
        self.palettes.save_state(w);
        self.objects.save_state(w);
        self.renderer.save_state(w);
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        if r.read_u8()? != self.mode.to_byte() {
            return Err(StateError::ModelMismatch);
        }
        r.read_into(&mut self.vram[0])?;
        r.read_into(&mut self.vram[1])?;
        self.vram_bank = r.read_bounded("VBK", 2)? as usize;
        r.read_into(&mut self.oam)?;
        self.lcdc = r.read_u8()?;
        self.scy = r.read_u8()?;
        self.scx = r.read_u8()?;
        self.wy = r.read_u8()?;
        self.wx = r.read_u8()?;
        self.opri = r.read_u8()? & 0x01;
        self.frames = r.read_u64()?;
        self.timing.load_state(r)?;
        self.stat.load_state(r)?;
        self.palettes.load_state(r)?;
        self.objects.load_state(r)?;
        self.renderer.load_state(r)?;
        Ok(())
    }
}
