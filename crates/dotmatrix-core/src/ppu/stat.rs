//! STAT interrupt line.
//!
//! All enabled sources are OR-ed into a single internal line and the
//! interrupt is requested only when that line goes from low to high, so a
//! condition that stays true across many dots fires exactly once.

use super::timing::Mode;
use crate::error::StateError;
use crate::interrupt::{Interrupt, InterruptController};
use crate::state::{Snapshot, StateReader, StateWriter};

const HBLANK_SOURCE: u8 = 0x08;
const VBLANK_SOURCE: u8 = 0x10;
const OAM_SOURCE: u8 = 0x20;
const LYC_SOURCE: u8 = 0x40;
const SOURCE_MASK: u8 = HBLANK_SOURCE | VBLANK_SOURCE | OAM_SOURCE | LYC_SOURCE;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatDispatcher {
    sources: u8,
    lyc: u8,
    coincidence: bool,
    line: bool,
}

impl StatDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bits 2-6 of STAT; the caller adds bit 7 and the mode.
    pub fn read_bits(&self) -> u8 {
        self.sources | if self.coincidence { 0x04 } else { 0 }
    }

    pub fn write_sources(&mut self, val: u8) {
        self.sources = val & SOURCE_MASK;
    }

    pub fn lyc(&self) -> u8 {
        self.lyc
    }

    pub fn set_lyc(&mut self, val: u8) {
        self.lyc = val;
    }

    pub fn coincidence(&self) -> bool {
        self.coincidence
    }

    /// Drop the line while the LCD is off, keeping the last coincidence flag.
    pub fn disable(&mut self) {
        self.line = false;
    }

    /// Re-evaluate the line for the current LY and mode.
    pub fn update(&mut self, ly: u8, mode: Mode, ic: &mut InterruptController) {
        self.coincidence = ly == self.lyc;
        let mode_source = match mode {
            Mode::HBlank => HBLANK_SOURCE,
            Mode::VBlank => VBLANK_SOURCE,
            Mode::OamScan => OAM_SOURCE,
            Mode::Draw => 0,
        };
        let mut line = self.sources & mode_source != 0;
        // Line 144 also raises the OAM source on entry to vertical blank.
        if mode == Mode::VBlank && ly == 144 && self.sources & OAM_SOURCE != 0 {
            line = true;
        }
        if self.coincidence && self.sources & LYC_SOURCE != 0 {
            line = true;
        }
        if line && !self.line {
            ic.request(Interrupt::Stat);
        }
        self.line = line;
    }
}

impl Snapshot for StatDispatcher {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_u8(self.sources);
        w.write_u8(self.lyc);
        w.write_bool(self.coincidence);
        w.write_bool(self.line);
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.sources = r.read_u8()? & SOURCE_MASK;
        self.lyc = r.read_u8()?;
        self.coincidence = r.read_bool()?;
        self.line = r.read_bool()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lyc_match_fires_once_while_held() {
        let mut ic = InterruptController::new();
        let mut stat = StatDispatcher::new();
        stat.write_sources(LYC_SOURCE);
        stat.set_lyc(5);
        for _ in 0..456 {
            stat.update(5, Mode::HBlank, &mut ic);
            if ic.read_if() & Interrupt::Stat.bit() != 0 {
                ic.acknowledge(Interrupt::Stat);
                stat.update(5, Mode::HBlank, &mut ic);
                assert_eq!(ic.read_if() & Interrupt::Stat.bit(), 0);
            }
        }
        assert!(stat.coincidence());
    }

    #[test]
    fn overlapping_sources_do_not_retrigger() {
        let mut ic = InterruptController::new();
        let mut stat = StatDispatcher::new();
        stat.write_sources(HBLANK_SOURCE | LYC_SOURCE);
        stat.set_lyc(3);
        stat.update(3, Mode::Draw, &mut ic);
        assert_ne!(ic.read_if() & Interrupt::Stat.bit(), 0);
        ic.acknowledge(Interrupt::Stat);
        // HBlank begins while the LYC match still holds the line high.
        stat.update(3, Mode::HBlank, &mut ic);
        assert_eq!(ic.read_if() & Interrupt::Stat.bit(), 0);
    }

    #[test]
    fn mode_entry_fires() {
        let mut ic = InterruptController::new();
        let mut stat = StatDispatcher::new();
        stat.write_sources(OAM_SOURCE);
        stat.set_lyc(0xFF);
        stat.update(10, Mode::HBlank, &mut ic);
        assert_eq!(ic.read_if() & Interrupt::Stat.bit(), 0);
        stat.update(11, Mode::OamScan, &mut ic);
        assert_ne!(ic.read_if() & Interrupt::Stat.bit(), 0);
    }
}
