//! Object (sprite) selection and per-pixel lookup.

use super::Vram;
use super::tiles::row_color;
use crate::error::StateError;
use crate::state::{Snapshot, StateReader, StateWriter};

pub const MAX_SPRITES_PER_LINE: usize = 10;
const TOTAL_SPRITES: usize = 40;

const FLAG_CGB_PALETTE: u8 = 0x07;
const FLAG_BANK: u8 = 0x08;
const FLAG_DMG_PALETTE: u8 = 0x10;
const FLAG_XFLIP: u8 = 0x20;
const FLAG_YFLIP: u8 = 0x40;
const FLAG_BEHIND_BG: u8 = 0x80;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Sprite {
    x: i16,
    y: i16,
    tile: u8,
    flags: u8,
    oam_index: u8,
}

/// Opaque object pixel that won the per-column priority contest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjPixel {
    pub color: u8,
    /// OBP0/OBP1 selector on monochrome hardware, colour palette 0-7 otherwise.
    pub palette: u8,
    pub behind_bg: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectManager {
    line: [Sprite; MAX_SPRITES_PER_LINE],
    count: usize,
    /// Object height latched by the last scan; LCDC.2 may change mid-line.
    tall: bool,
}

impl ObjectManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn clear(&mut self) {
        self.count = 0;
    }

    /// Select up to ten objects overlapping `ly`, in OAM order, then order
    /// them by drawing priority: X coordinate first unless `oam_priority`.
    pub fn scan(&mut self, oam: &[u8; 0xA0], ly: u8, tall: bool, oam_priority: bool) {
        let height: i16 = if tall { 16 } else { 8 };
        self.tall = tall;
        self.count = 0;
        for i in 0..TOTAL_SPRITES {
            if self.count >= MAX_SPRITES_PER_LINE {
                break;
            }
            let base = i * 4;
            let y = oam[base] as i16 - 16;
            let ly = ly as i16;
            if ly >= y && ly < y + height {
                self.line[self.count] = Sprite {
                    x: oam[base + 1] as i16 - 8,
                    y,
                    tile: oam[base + 2],
                    flags: oam[base + 3],
                    oam_index: i as u8,
                };
                self.count += 1;
            }
        }
        let selected = &mut self.line[..self.count];
        if oam_priority {
            selected.sort_by_key(|s| s.oam_index);
        } else {
            selected.sort_by_key(|s| (s.x, s.oam_index));
        }
    }

    /// Highest-priority opaque object pixel at screen column `x`, using the
    /// object height the line was scanned with.
    pub fn pixel_at(&self, vram: &Vram, x: u8, ly: u8, cgb: bool) -> Option<ObjPixel> {
        let height: i16 = if self.tall { 16 } else { 8 };
        let x = x as i16;
        self.line[..self.count].iter().find_map(|s| {
            if x < s.x || x >= s.x + 8 {
                return None;
            }
            let mut row = ly as i16 - s.y;
            if !(0..height).contains(&row) {
                return None;
            }
            if s.flags & FLAG_YFLIP != 0 {
                row = height - 1 - row;
            }
            let tile = if self.tall { s.tile & 0xFE } else { s.tile };
            let bank = usize::from(cgb && s.flags & FLAG_BANK != 0);
            let addr = tile as usize * 16 + row as usize * 2;
            let mut col = (x - s.x) as u8;
            if s.flags & FLAG_XFLIP != 0 {
                col = 7 - col;
            }
            let color = row_color(vram[bank][addr], vram[bank][addr + 1], col);
            if color == 0 {
                return None;
            }
            let palette = if cgb {
                s.flags & FLAG_CGB_PALETTE
            } else {
                u8::from(s.flags & FLAG_DMG_PALETTE != 0)
            };
            Some(ObjPixel {
                color,
                palette,
                behind_bg: s.flags & FLAG_BEHIND_BG != 0,
            })
        })
    }
}

impl Snapshot for ObjectManager {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_u8(self.count as u8);
        w.write_bool(self.tall);
        for s in &self.line {
            w.write_u16(s.x as u16);
            w.write_u16(s.y as u16);
            w.write_u8(s.tile);
            w.write_u8(s.flags);
            w.write_u8(s.oam_index);
        }
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.count = r.read_bounded("sprite count", MAX_SPRITES_PER_LINE as u8 + 1)? as usize;
        self.tall = r.read_bool()?;
        for s in &mut self.line {
            s.x = r.read_u16()? as i16;
            s.y = r.read_u16()? as i16;
            s.tile = r.read_u8()?;
            s.flags = r.read_u8()?;
            s.oam_index = r.read_u8()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(oam: &mut [u8; 0xA0], index: usize, y: u8, x: u8, tile: u8, flags: u8) {
        oam[index * 4..index * 4 + 4].copy_from_slice(&[y, x, tile, flags]);
    }

    fn solid_tiles() -> Box<Vram> {
        let mut vram = Box::new([[0u8; 0x2000]; 2]);
        // Tile 1 colour 1, tile 2 colour 2, across all rows.
        for row in 0..8 {
            vram[0][16 + row * 2] = 0xFF;
            vram[0][32 + row * 2 + 1] = 0xFF;
        }
        vram
    }

    #[test]
    fn ten_sprite_limit_in_oam_order() {
        let mut oam = [0u8; 0xA0];
        for i in 0..12 {
            put(&mut oam, i, 16, 100 - i as u8, 1, 0);
        }
        let mut objs = ObjectManager::new();
        objs.scan(&oam, 0, false, false);
        assert_eq!(objs.count(), 10);
        assert!(objs.line[..10].iter().all(|s| s.oam_index < 10));
    }

    #[test]
    fn lower_index_wins_x_tie() {
        let vram = solid_tiles();
        let mut oam = [0u8; 0xA0];
        put(&mut oam, 0, 16, 8, 2, 0);
        put(&mut oam, 1, 16, 8, 1, 0);
        let mut objs = ObjectManager::new();
        objs.scan(&oam, 0, false, false);
        assert_eq!(
            objs.pixel_at(&vram, 0, 0, false).map(|p| p.color),
            Some(2)
        );
    }

    #[test]
    fn smaller_x_wins_on_monochrome_only() {
        let vram = solid_tiles();
        let mut oam = [0u8; 0xA0];
        put(&mut oam, 0, 16, 12, 2, 0);
        put(&mut oam, 1, 16, 10, 1, 0);
        let mut objs = ObjectManager::new();
        objs.scan(&oam, 0, false, false);
        assert_eq!(objs.pixel_at(&vram, 5, 0, false).map(|p| p.color), Some(1));
        objs.scan(&oam, 0, false, true);
        assert_eq!(objs.pixel_at(&vram, 5, 0, true).map(|p| p.color), Some(2));
    }

    #[test]
    fn transparent_pixels_fall_through() {
        let mut vram = solid_tiles();
        vram[0][16] = 0x0F;
        let mut oam = [0u8; 0xA0];
        put(&mut oam, 0, 16, 8, 1, 0);
        put(&mut oam, 1, 16, 8, 2, FLAG_DMG_PALETTE | FLAG_BEHIND_BG);
        let mut objs = ObjectManager::new();
        objs.scan(&oam, 0, false, false);
        let px = objs.pixel_at(&vram, 0, 0, false);
        assert_eq!(
            px,
            Some(ObjPixel {
                color: 2,
                palette: 1,
                behind_bg: true
            })
        );
        assert_eq!(objs.pixel_at(&vram, 7, 0, false).map(|p| p.color), Some(1));
    }

    #[test]
    fn height_is_latched_at_scan() {
        let mut vram = solid_tiles();
        // Tile 3 (lower half of the 2/3 pair) colour 3 on every row.
        for row in 0..8 {
            vram[0][48 + row * 2] = 0xFF;
            vram[0][48 + row * 2 + 1] = 0xFF;
        }
        let mut oam = [0u8; 0xA0];
        put(&mut oam, 0, 16, 8, 2, FLAG_YFLIP);
        let mut objs = ObjectManager::new();
        // Line 12 is the fifth row of the flipped tall object: tile 2 row 3.
        objs.scan(&oam, 12, true, false);
        assert_eq!(objs.pixel_at(&vram, 0, 12, false).map(|p| p.color), Some(2));
        // Rows past the object's latched height never match.
        assert_eq!(objs.pixel_at(&vram, 0, 16, false), None);
    }
}
