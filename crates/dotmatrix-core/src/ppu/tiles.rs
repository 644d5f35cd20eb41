//! Background and window tile lookup.

use super::Vram;

const BG_MAP_0_BASE: usize = 0x1800;
const BG_MAP_1_BASE: usize = 0x1C00;
const BG_MAP_SELECT: u8 = 0x08;
const WINDOW_MAP_SELECT: u8 = 0x40;
const TILE_DATA_UNSIGNED: u8 = 0x10;

const ATTR_BANK: u8 = 0x08;
const ATTR_XFLIP: u8 = 0x20;
const ATTR_YFLIP: u8 = 0x40;
const ATTR_PRIORITY: u8 = 0x80;

/// Resolved background or window pixel before palette lookup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BgPixel {
    /// Colour index 0-3 from tile data.
    pub color: u8,
    /// Colour palette number from the tile attributes (colour mode only).
    pub palette: u8,
    /// Tile attribute bit 7: draw over objects.
    pub priority: bool,
}

/// Colour index of column `col` (0 = leftmost) in a decoded tile row.
#[inline(always)]
pub(crate) fn row_color(lo: u8, hi: u8, col: u8) -> u8 {
    let bit = 7 - (col & 7);
    (((hi >> bit) & 1) << 1) | ((lo >> bit) & 1)
}

/// Byte offset of a tile inside a VRAM bank, honoring LCDC.4 addressing.
pub fn tile_data_address(lcdc: u8, tile: u8) -> usize {
    if lcdc & TILE_DATA_UNSIGNED != 0 {
        tile as usize * 16
    } else {
        (0x1000 + (tile as i8 as i32) * 16) as usize
    }
}

fn map_pixel(vram: &Vram, lcdc: u8, map_select: u8, x: u8, y: u8, cgb: bool) -> BgPixel {
    let map_base = if lcdc & map_select != 0 {
        BG_MAP_1_BASE
    } else {
        BG_MAP_0_BASE
    };
    let map_index = map_base + (y as usize / 8) * 32 + x as usize / 8;
    let tile = vram[0][map_index];
    let attr = if cgb { vram[1][map_index] } else { 0 };

    let bank = usize::from(attr & ATTR_BANK != 0);
    let row = if attr & ATTR_YFLIP != 0 { 7 - (y & 7) } else { y & 7 };
    let col = if attr & ATTR_XFLIP != 0 { 7 - (x & 7) } else { x & 7 };
    let addr = tile_data_address(lcdc, tile) + row as usize * 2;

    BgPixel {
        color: row_color(vram[bank][addr], vram[bank][addr + 1], col),
        palette: attr & 0x07,
        priority: attr & ATTR_PRIORITY != 0,
    }
}

/// Background pixel under screen coordinate (`x`, `ly`) after scrolling.
pub fn background_pixel(
    vram: &Vram,
    lcdc: u8,
    scx: u8,
    scy: u8,
    x: u8,
    ly: u8,
    cgb: bool,
) -> BgPixel {
    map_pixel(
        vram,
        lcdc,
        BG_MAP_SELECT,
        x.wrapping_add(scx),
        ly.wrapping_add(scy),
        cgb,
    )
}

/// Window pixel at screen column `x`; the caller guarantees `x + 7 >= wx`.
pub fn window_pixel(vram: &Vram, lcdc: u8, wx: u8, x: u8, window_line: u8, cgb: bool) -> BgPixel {
    let wx_col = (x as u16 + 7 - wx as u16) as u8;
    map_pixel(vram, lcdc, WINDOW_MAP_SELECT, wx_col, window_line, cgb)
}
