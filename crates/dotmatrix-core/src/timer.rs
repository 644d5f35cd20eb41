use crate::error::StateError;
use crate::interrupt::{Interrupt, InterruptController};
use crate::state::{Snapshot, StateReader, StateWriter};

/// T-cycles between a TIMA overflow and the TMA reload + interrupt.
const RELOAD_DELAY: u8 = 3;

#[derive(Debug, Clone, Default)]
pub struct Timer {
    /// 16-bit internal divider counter. DIV register is the upper 8 bits.
    div: u16,
    tima: u8,
    tma: u8,
    tac: u8,
    last_signal: bool,
    /// TMA before a write in the current cycle, used if a reload lands on it.
    tma_latch: Option<u8>,
    pending_reload: Option<u8>,
    reload_delay: u8,
    /// Set during the cycle in which TIMA is reloaded; TIMA writes are ignored.
    reloading: bool,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post-boot divider phase.
    pub fn with_div(div: u16) -> Self {
        Self {
            div,
            ..Self::default()
        }
    }

    #[inline]
    pub fn div(&self) -> u16 {
        self.div
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF04 => (self.div >> 8) as u8,
            0xFF05 => self.tima,
            0xFF06 => self.tma,
            0xFF07 => self.tac | 0xF8,
            _ => 0xFF,
        }
    }

    /// Register write. DIV writes are routed through [`Self::reset_div`] by
    /// the bus so other divider consumers see the edge.
    pub fn write(&mut self, addr: u16, val: u8, ic: &mut InterruptController) {
        match addr {
            0xFF04 => self.reset_div(ic),
            0xFF05 => {
                if self.reloading || (self.pending_reload.is_some() && self.reload_delay == 0) {
                    return;
                }
                self.tima = val;
                // A write inside the overflow delay cancels the reload.
                self.pending_reload = None;
                self.reload_delay = 0;
            }
            0xFF06 => {
                self.tma_latch = Some(self.tma);
                self.tma = val;
                if self.pending_reload.is_some() {
                    self.pending_reload = Some(val);
                }
                if self.reloading {
                    self.tima = val;
                }
            }
            0xFF07 => {
                let prev = Self::signal_with(self.div, self.tac);
                self.tac = val & 0x07;
                let new = Self::signal_with(self.div, self.tac);
                if prev && !new {
                    let tma_old = self.tma_latch.take();
                    self.increment(tma_old);
                }
                self.last_signal = new;
            }
            _ => {}
        }
    }

    /// Advance one T-cycle.
    pub fn tick(&mut self, ic: &mut InterruptController) {
        self.apply_reload(ic);
        let tma_old = self.tma_latch.take();
        self.div = self.div.wrapping_add(1);
        let new = Self::signal_with(self.div, self.tac);
        if self.last_signal && !new {
            self.increment(tma_old);
        }
        self.last_signal = new;
    }

    /// Reset the internal divider counter, applying TIMA edge logic.
    pub fn reset_div(&mut self, ic: &mut InterruptController) {
        self.apply_reload(ic);
        let prev = Self::signal_with(self.div, self.tac);
        self.div = 0;
        if prev {
            let tma_old = self.tma_latch.take();
            self.increment(tma_old);
        }
        self.last_signal = false;
    }

    fn apply_reload(&mut self, ic: &mut InterruptController) {
        self.reloading = false;
        if let Some(val) = self.pending_reload {
            if self.reload_delay == 0 {
                self.tima = val;
                ic.request(Interrupt::Timer);
                self.pending_reload = None;
                self.reloading = true;
            } else {
                self.reload_delay -= 1;
            }
        }
    }

    fn increment(&mut self, tma_old: Option<u8>) {
        if self.tima == 0xFF {
            self.tima = 0;
            self.pending_reload = Some(tma_old.unwrap_or(self.tma));
            self.reload_delay = RELOAD_DELAY;
        } else {
            self.tima = self.tima.wrapping_add(1);
        }
    }

    fn signal_with(div: u16, tac: u8) -> bool {
        if tac & 0x04 == 0 {
            return false;
        }
        let bit = match tac & 0x03 {
            0x00 => 9,
            0x01 => 3,
            0x02 => 5,
            _ => 7,
        };
        (div >> bit) & 1 != 0
    }
}

impl Snapshot for Timer {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_u16(self.div);
        w.write_u8(self.tima);
        w.write_u8(self.tma);
        w.write_u8(self.tac);
        w.write_bool(self.last_signal);
        w.write_bool(self.tma_latch.is_some());
        w.write_u8(self.tma_latch.unwrap_or(0));
        w.write_bool(self.pending_reload.is_some());
        w.write_u8(self.pending_reload.unwrap_or(0));
        w.write_u8(self.reload_delay);
        w.write_bool(self.reloading);
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.div = r.read_u16()?;
        self.tima = r.read_u8()?;
        self.tma = r.read_u8()?;
        self.tac = r.read_u8()? & 0x07;
        self.last_signal = r.read_bool()?;
        let has_latch = r.read_bool()?;
        let latch = r.read_u8()?;
        self.tma_latch = has_latch.then_some(latch);
        let has_reload = r.read_bool()?;
        let reload = r.read_u8()?;
        self.pending_reload = has_reload.then_some(reload);
        self.reload_delay = r.read_bounded("timer reload delay", RELOAD_DELAY + 1)?;
        self.reloading = r.read_bool()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ic() -> InterruptController {
        let mut ic = InterruptController::new();
        ic.write_ie(0x1F);
        ic
    }

    #[test]
    fn div_increments_every_256_cycles() {
        let mut ic = ic();
        let mut t = Timer::new();
        for _ in 0..255 {
            t.tick(&mut ic);
        }
        assert_eq!(t.read(0xFF04), 0);
        t.tick(&mut ic);
        assert_eq!(t.read(0xFF04), 1);
    }

    #[test]
    fn tima_overflow_reloads_after_delay() {
        let mut ic = ic();
        let mut t = Timer::new();
        t.write(0xFF06, 0xAB, &mut ic);
        t.write(0xFF05, 0xFF, &mut ic);
        t.write(0xFF07, 0x05, &mut ic);
        // 16-cycle period.
        for _ in 0..16 {
            t.tick(&mut ic);
        }
        assert_eq!(t.read(0xFF05), 0x00);
        assert!(!ic.is_pending());
        for _ in 0..4 {
            t.tick(&mut ic);
        }
        assert_eq!(t.read(0xFF05), 0xAB);
        assert_eq!(ic.highest_pending(), Some(Interrupt::Timer));
    }

    #[test]
    fn div_reset_on_high_bit_increments_tima() {
        let mut ic = ic();
        let mut t = Timer::new();
        t.write(0xFF07, 0x05, &mut ic);
        for _ in 0..8 {
            t.tick(&mut ic);
        }
        assert_eq!(t.read(0xFF05), 0);
        t.reset_div(&mut ic);
        assert_eq!(t.read(0xFF05), 1);
        assert_eq!(t.div(), 0);
    }

    #[test]
    fn disabling_timer_on_high_bit_increments_tima() {
        let mut ic = ic();
        let mut t = Timer::new();
        t.write(0xFF07, 0x05, &mut ic);
        for _ in 0..8 {
            t.tick(&mut ic);
        }
        t.write(0xFF07, 0x01, &mut ic);
        assert_eq!(t.read(0xFF05), 1);
    }

    #[test]
    fn tima_write_during_delay_cancels_reload() {
        let mut ic = ic();
        let mut t = Timer::new();
        t.write(0xFF06, 0x50, &mut ic);
        t.write(0xFF05, 0xFF, &mut ic);
        t.write(0xFF07, 0x05, &mut ic);
        for _ in 0..17 {
            t.tick(&mut ic);
        }
        t.write(0xFF05, 0x10, &mut ic);
        for _ in 0..8 {
            t.tick(&mut ic);
        }
        assert_eq!(t.read(0xFF05), 0x10);
        assert!(!ic.is_pending());
    }
}
