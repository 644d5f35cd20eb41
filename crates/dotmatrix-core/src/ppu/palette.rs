//! Palette provider: legacy shade registers and colour palette RAM.
//!
//! Every lookup yields a 15-bit BGR555 colour, the format stored in the
//! framebuffer.

use crate::error::StateError;
use crate::state::{Snapshot, StateReader, StateWriter};

const PAL_RAM_SIZE: usize = 0x40;
const PAL_INDEX_MASK: u8 = 0x3F;
const PAL_UNUSED_BIT: u8 = 0x40;
const PAL_AUTO_INCREMENT_BIT: u8 = 0x80;

/// Boot ROM colours for monochrome cartridges on colour hardware.
const COMPAT_OBJ_PALETTE: [u16; 4] = [0x7FFF, 0x421F, 0x1CF2, 0x0000];
const COMPAT_BG_PALETTE: [u16; 4] = [0x7FFF, 0x1BEF, 0x6180, 0x0000];

#[inline(always)]
pub(crate) fn dmg_shade(palette: u8, color_id: u8) -> u8 {
    (palette >> (color_id * 2)) & 0x03
}

fn sanitize_index(value: u8) -> u8 {
    (value & (PAL_AUTO_INCREMENT_BIT | PAL_INDEX_MASK)) | PAL_UNUSED_BIT
}

fn step_index(index: &mut u8) {
    let current = *index;
    let mut idx = current & PAL_INDEX_MASK;
    if current & PAL_AUTO_INCREMENT_BIT != 0 {
        idx = idx.wrapping_add(1) & PAL_INDEX_MASK;
    }
    *index = (current & PAL_AUTO_INCREMENT_BIT) | PAL_UNUSED_BIT | idx;
}

fn write_palette(ram: &mut [u8], colors: [u16; 4]) {
    for (i, c) in colors.iter().enumerate() {
        ram[i * 2] = (c & 0xFF) as u8;
        ram[i * 2 + 1] = (c >> 8) as u8;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Palettes {
    bgp: u8,
    obp0: u8,
    obp1: u8,
    bgpi: u8,
    obpi: u8,
    bg_ram: [u8; PAL_RAM_SIZE],
    obj_ram: [u8; PAL_RAM_SIZE],
    dmg_colors: [u16; 4],
}

impl Palettes {
    pub fn new(dmg_colors: [u16; 4]) -> Self {
        Self {
            bgp: 0xFC,
            obp0: 0xFF,
            obp1: 0xFF,
            bgpi: PAL_UNUSED_BIT,
            obpi: PAL_UNUSED_BIT,
            bg_ram: [0xFF; PAL_RAM_SIZE],
            obj_ram: [0xFF; PAL_RAM_SIZE],
            dmg_colors,
        }
    }

    /// Palette state the colour boot ROM leaves behind for a monochrome
    /// cartridge.
    pub fn apply_compat(&mut self) {
        let (obj0, rest) = self.obj_ram.split_at_mut(8);
        write_palette(obj0, COMPAT_OBJ_PALETTE);
        write_palette(&mut rest[..8], COMPAT_OBJ_PALETTE);
        write_palette(&mut self.bg_ram[..8], COMPAT_BG_PALETTE);
        self.bgp = 0xE4;
        self.obp0 = 0xD0;
        self.obp1 = 0xE0;
    }

    pub fn set_dmg_colors(&mut self, colors: [u16; 4]) {
        self.dmg_colors = colors;
    }

    /// Shade 0 of the monochrome palette, shown while the LCD is off.
    pub fn lightest(&self) -> u16 {
        self.dmg_colors[0]
    }

    fn ram_color(ram: &[u8; PAL_RAM_SIZE], palette: u8, color_id: u8) -> u16 {
        let off = (palette as usize & 7) * 8 + (color_id as usize & 3) * 2;
        u16::from_le_bytes([ram[off], ram[off + 1]]) & 0x7FFF
    }

    pub fn dmg_bg(&self, color_id: u8) -> u16 {
        self.dmg_colors[dmg_shade(self.bgp, color_id) as usize]
    }

    pub fn dmg_obj(&self, palette: u8, color_id: u8) -> u16 {
        let reg = if palette & 1 != 0 { self.obp1 } else { self.obp0 };
        self.dmg_colors[dmg_shade(reg, color_id) as usize]
    }

    pub fn cgb_bg(&self, palette: u8, color_id: u8) -> u16 {
        Self::ram_color(&self.bg_ram, palette, color_id)
    }

    pub fn cgb_obj(&self, palette: u8, color_id: u8) -> u16 {
        Self::ram_color(&self.obj_ram, palette, color_id)
    }

    /// Monochrome shade routed through colour palette 0 (or OBJ palette 1).
    pub fn compat_bg(&self, color_id: u8) -> u16 {
        self.cgb_bg(0, dmg_shade(self.bgp, color_id))
    }

    pub fn compat_obj(&self, palette: u8, color_id: u8) -> u16 {
        let reg = if palette & 1 != 0 { self.obp1 } else { self.obp0 };
        self.cgb_obj(palette & 1, dmg_shade(reg, color_id))
    }

    /// Reads FF47-FF49. Colour registers go through [`Palettes::read_cgb`].
    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF47 => self.bgp,
            0xFF48 => self.obp0,
            0xFF49 => self.obp1,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF47 => self.bgp = val,
            0xFF48 => self.obp0 = val,
            0xFF49 => self.obp1 = val,
            _ => {}
        }
    }

    /// Reads FF68-FF6B. Data reads do not advance the index.
    pub fn read_cgb(&self, addr: u16) -> u8 {
        match addr {
            0xFF68 => self.bgpi,
            0xFF69 => self.bg_ram[(self.bgpi & PAL_INDEX_MASK) as usize],
            0xFF6A => self.obpi,
            0xFF6B => self.obj_ram[(self.obpi & PAL_INDEX_MASK) as usize],
            _ => 0xFF,
        }
    }

    pub fn write_cgb(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF68 => self.bgpi = sanitize_index(val),
            0xFF69 => {
                self.bg_ram[(self.bgpi & PAL_INDEX_MASK) as usize] = val;
                step_index(&mut self.bgpi);
            }
            0xFF6A => self.obpi = sanitize_index(val),
            0xFF6B => {
                self.obj_ram[(self.obpi & PAL_INDEX_MASK) as usize] = val;
                step_index(&mut self.obpi);
            }
            _ => {}
        }
    }
}

impl Snapshot for Palettes {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_u8(self.bgp);
        w.write_u8(self.obp0);
        w.write_u8(self.obp1);
        w.write_u8(self.bgpi);
        w.write_u8(self.obpi);
        w.write_bytes(&self.bg_ram);
        w.write_bytes(&self.obj_ram);
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.bgp = r.read_u8()?;
        self.obp0 = r.read_u8()?;
        self.obp1 = r.read_u8()?;
        self.bgpi = sanitize_index(r.read_u8()?);
        self.obpi = sanitize_index(r.read_u8()?);
        r.read_into(&mut self.bg_ram)?;
        r.read_into(&mut self.obj_ram)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_auto_increment_wraps() {
        let mut p = Palettes::new([0; 4]);
        p.write_cgb(0xFF68, 0xBF);
        assert_eq!(p.read_cgb(0xFF68), 0xFF);
        p.write_cgb(0xFF69, 0x12);
        assert_eq!(p.read_cgb(0xFF68), 0xC0);
        p.write_cgb(0xFF69, 0x34);
        assert_eq!(p.read_cgb(0xFF68), 0xC1);
        p.write_cgb(0xFF68, 0x00);
        assert_eq!(p.cgb_bg(0, 0), 0x3412 & 0x7FFF);
    }

    #[test]
    fn no_increment_without_flag() {
        let mut p = Palettes::new([0; 4]);
        p.write_cgb(0xFF6A, 0x02);
        p.write_cgb(0xFF6B, 0xAA);
        p.write_cgb(0xFF6B, 0xBB);
        assert_eq!(p.read_cgb(0xFF6A), 0x42);
        assert_eq!(p.read_cgb(0xFF6B), 0xBB);
    }

    #[test]
    fn compat_palettes_route_shades() {
        let mut p = Palettes::new([0; 4]);
        p.apply_compat();
        assert_eq!(p.compat_bg(0), 0x7FFF);
        assert_eq!(p.compat_bg(3), 0x0000);
        assert_eq!(p.compat_obj(1, 1), COMPAT_OBJ_PALETTE[0]);
        assert_eq!(p.compat_obj(0, 3), COMPAT_OBJ_PALETTE[3]);
        assert_eq!(p.read(0xFF48), 0xD0);
    }

    #[test]
    fn dmg_shades_follow_bgp() {
        let colors = [0x7FFF, 0x56B5, 0x294A, 0x0000];
        let mut p = Palettes::new(colors);
        p.write(0xFF47, 0xE4);
        assert_eq!(p.dmg_bg(0), colors[0]);
        assert_eq!(p.dmg_bg(2), colors[2]);
        p.write(0xFF47, 0x1B);
        assert_eq!(p.dmg_bg(0), colors[3]);
    }
}
