//! Per-dot compositor and framebuffer owner.

use super::objects::ObjectManager;
use super::palette::Palettes;
use super::tiles::{self, BgPixel};
use super::{ColorMode, Vram};
use crate::error::StateError;
use crate::state::{Snapshot, StateReader, StateWriter};

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;
const FRAME_PIXELS: usize = SCREEN_WIDTH * SCREEN_HEIGHT;

// Window X position is clipped if greater than this value
const WINDOW_X_MAX: u8 = 166;

const LCDC_BG_ENABLE: u8 = 0x01;
const LCDC_OBJ_ENABLE: u8 = 0x02;
const LCDC_WINDOW_ENABLE: u8 = 0x20;

/// Registers the compositor samples for every pixel.
#[derive(Clone, Copy, Debug)]
pub struct LineRegs {
    pub lcdc: u8,
    pub scx: u8,
    pub scy: u8,
    pub wx: u8,
    pub ly: u8,
}

/// Read-only view of everything that feeds a pixel.
pub struct PixelSources<'a> {
    pub regs: LineRegs,
    pub vram: &'a Vram,
    pub objects: &'a ObjectManager,
    pub palettes: &'a Palettes,
    pub mode: ColorMode,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Renderer {
    back: Vec<u16>,
    front: Vec<u16>,
    window_line: u8,
    window_active: bool,
    window_drawn: bool,
}

impl Renderer {
    pub fn new(clear: u16) -> Self {
        Self {
            back: vec![clear; FRAME_PIXELS],
            front: vec![clear; FRAME_PIXELS],
            window_line: 0,
            window_active: false,
            window_drawn: false,
        }
    }

    /// Last presented frame.
    pub fn front(&self) -> &[u16] {
        &self.front
    }

    pub fn window_line(&self) -> u8 {
        self.window_line
    }

    pub fn begin_frame(&mut self) {
        self.window_line = 0;
        self.window_active = false;
    }

    /// Reset the per-line cursor state. The window becomes eligible for the
    /// rest of the frame once LY has matched WY.
    pub fn begin_line(&mut self, ly: u8, wy: u8) {
        if ly == wy {
            self.window_active = true;
        }
        self.window_drawn = false;
    }

    pub fn end_line(&mut self) {
        if self.window_drawn {
            self.window_line = self.window_line.wrapping_add(1);
        }
    }

    pub fn present(&mut self) {
        self.front.copy_from_slice(&self.back);
    }

    /// Fill both buffers, as when the LCD is switched off.
    pub fn blank(&mut self, color: u16) {
        self.back.fill(color);
        self.front.fill(color);
    }

    fn bg_pixel(&mut self, x: u8, src: &PixelSources<'_>) -> BgPixel {
        let r = &src.regs;
        let cgb_attrs = src.mode == ColorMode::Cgb;
        if !cgb_attrs && r.lcdc & LCDC_BG_ENABLE == 0 {
            return BgPixel::default();
        }
        let in_window = r.lcdc & LCDC_WINDOW_ENABLE != 0
            && self.window_active
            && r.wx <= WINDOW_X_MAX
            && x as u16 + 7 >= r.wx as u16;
        if in_window {
            self.window_drawn = true;
            tiles::window_pixel(src.vram, r.lcdc, r.wx, x, self.window_line, cgb_attrs)
        } else {
            tiles::background_pixel(src.vram, r.lcdc, r.scx, r.scy, x, r.ly, cgb_attrs)
        }
    }

    /// Composite the pixel at column `x` of the current line.
    pub fn draw_pixel(&mut self, x: u8, src: &PixelSources<'_>) {
        let r = src.regs;
        if x as usize >= SCREEN_WIDTH || r.ly as usize >= SCREEN_HEIGHT {
            return;
        }
        let cgb_attrs = src.mode == ColorMode::Cgb;
        let bg = self.bg_pixel(x, src);

        let obj = if r.lcdc & LCDC_OBJ_ENABLE != 0 {
            src.objects.pixel_at(src.vram, x, r.ly, cgb_attrs)
        } else {
            None
        };

        let obj = obj.filter(|o| {
            if bg.color == 0 {
                true
            } else if cgb_attrs && r.lcdc & LCDC_BG_ENABLE == 0 {
                // LCDC.0 clear removes all background priority in colour mode.
                true
            } else {
                !(cgb_attrs && bg.priority) && !o.behind_bg
            }
        });

        let p = src.palettes;
        let color = match (obj, src.mode) {
            (Some(o), ColorMode::Dmg) => p.dmg_obj(o.palette, o.color),
            (Some(o), ColorMode::Compat) => p.compat_obj(o.palette, o.color),
            (Some(o), ColorMode::Cgb) => p.cgb_obj(o.palette, o.color),
            (None, ColorMode::Dmg) => p.dmg_bg(bg.color),
            (None, ColorMode::Compat) => p.compat_bg(bg.color),
            (None, ColorMode::Cgb) => p.cgb_bg(bg.palette, bg.color),
        };
        self.back[r.ly as usize * SCREEN_WIDTH + x as usize] = color;
    }
}

impl Snapshot for Renderer {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_u8(self.window_line);
        w.write_bool(self.window_active);
        w.write_bool(self.window_drawn);
        w.write_u16_slice(&self.back);
        w.write_u16_slice(&self.front);
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.window_line = r.read_u8()?;
        self.window_active = r.read_bool()?;
        self.window_drawn = r.read_bool()?;
        r.read_u16_into(&mut self.back)?;
        r.read_u16_into(&mut self.front)?;
        Ok(())
    }
}
