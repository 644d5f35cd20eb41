//! Scanline/dot scheduler.
//!
//! Durations are fixed: OAM scan 80 dots, draw 160 dots, the rest of the
//! 456-dot line in horizontal blank, and ten full blanking lines.

use crate::error::StateError;
use crate::state::{Snapshot, StateReader, StateWriter};

pub const OAM_SCAN_DOTS: u16 = 80;
pub const DRAW_DOTS: u16 = 160;
pub const LINE_DOTS: u16 = 456;
pub const HBLANK_DOTS: u16 = LINE_DOTS - OAM_SCAN_DOTS - DRAW_DOTS;
pub const VISIBLE_LINES: u8 = 144;
pub const TOTAL_LINES: u8 = 154;
pub const FRAME_DOTS: u32 = LINE_DOTS as u32 * TOTAL_LINES as u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    HBlank,
    VBlank,
    OamScan,
    Draw,
}

impl Mode {
    /// STAT bits 0-1.
    pub const fn bits(self) -> u8 {
        match self {
            Mode::HBlank => 0,
            Mode::VBlank => 1,
            Mode::OamScan => 2,
            Mode::Draw => 3,
        }
    }

    pub const fn from_bits(bits: u8) -> Mode {
        match bits & 0x03 {
            0 => Mode::HBlank,
            1 => Mode::VBlank,
            2 => Mode::OamScan,
            _ => Mode::Draw,
        }
    }
}

/// Dot at which a visible line switches into `mode`.
const VISIBLE_LINE_SCHEDULE: [(u16, Mode); 3] = [
    (0, Mode::OamScan),
    (OAM_SCAN_DOTS, Mode::Draw),
    (OAM_SCAN_DOTS + DRAW_DOTS, Mode::HBlank),
];

/// What changed on one dot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Transition {
    /// Mode entered on this dot, if any.
    pub entered: Option<Mode>,
    /// LY changed on this dot.
    pub new_line: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LcdTiming {
    line: u8,
    dot: u16,
    mode: Mode,
}

impl Default for LcdTiming {
    fn default() -> Self {
        Self::new()
    }
}

impl LcdTiming {
    /// Line 0, dot 0, scanning OAM: the state right after the LCD turns on.
    pub fn new() -> Self {
        Self {
            line: 0,
            dot: 0,
            mode: Mode::OamScan,
        }
    }

    /// Idle state held while the LCD is off.
    pub fn off() -> Self {
        Self {
            line: 0,
            dot: 0,
            mode: Mode::HBlank,
        }
    }

    #[inline]
    pub fn line(&self) -> u8 {
        self.line
    }

    #[inline]
    pub fn dot(&self) -> u16 {
        self.dot
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    fn scheduled_mode(line: u8, dot: u16) -> Mode {
        if line >= VISIBLE_LINES {
            return Mode::VBlank;
        }
        VISIBLE_LINE_SCHEDULE
            .iter()
            .rev()
            .find(|(start, _)| dot >= *start)
            .map(|(_, mode)| *mode)
            .unwrap_or(Mode::OamScan)
    }

    /// Advance one dot.
    pub fn advance(&mut self) -> Transition {
        let mut t = Transition::default();
        self.dot += 1;
        if self.dot == LINE_DOTS {
            self.dot = 0;
            self.line = (self.line + 1) % TOTAL_LINES;
            t.new_line = true;
        }
        let next = Self::scheduled_mode(self.line, self.dot);
        if next != self.mode {
            self.mode = next;
            t.entered = Some(next);
        }
        t
    }
}

impl Snapshot for LcdTiming {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_u8(self.line);
        w.write_u16(self.dot);
        w.write_u8(self.mode.bits());
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.line = r.read_bounded("LY", TOTAL_LINES)?;
        self.dot = r.read_u16()?;
        if self.dot >= LINE_DOTS {
            return Err(StateError::InvalidValue {
                field: "dot",
                value: self.dot as u32,
            });
        }
        let bits = r.read_u8()?;
        self.mode = Mode::from_bits(bits);
        // Either the parked LCD-off state or the mode the schedule implies.
        if *self != Self::off() && self.mode != Self::scheduled_mode(self.line, self.dot) {
            return Err(StateError::InvalidValue {
                field: "PPU mode",
                value: bits as u32,
            });
        }
        Ok(())
    }
}
