use crate::error::StateError;
use crate::state::{Snapshot, StateReader, StateWriter};

/// Interrupt sources in priority order (gbdev.io/pandocs/Interrupts.html).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    VBlank,
    Stat,
    Timer,
    Serial,
    Joypad,
}

impl Interrupt {
    /// Highest priority first.
    pub const ALL: [Interrupt; 5] = [
        Interrupt::VBlank,
        Interrupt::Stat,
        Interrupt::Timer,
        Interrupt::Serial,
        Interrupt::Joypad,
    ];

    #[inline]
    pub const fn bit(self) -> u8 {
        match self {
            Interrupt::VBlank => 0x01,
            Interrupt::Stat => 0x02,
            Interrupt::Timer => 0x04,
            Interrupt::Serial => 0x08,
            Interrupt::Joypad => 0x10,
        }
    }

    /// Service routine address.
    #[inline]
    pub const fn vector(self) -> u16 {
        match self {
            Interrupt::VBlank => 0x40,
            Interrupt::Stat => 0x48,
            Interrupt::Timer => 0x50,
            Interrupt::Serial => 0x58,
            Interrupt::Joypad => 0x60,
        }
    }

    /// Highest-priority source whose bit is set in `mask`.
    pub fn highest(mask: u8) -> Option<Interrupt> {
        Self::ALL.into_iter().find(|i| mask & i.bit() != 0)
    }
}

/// The IF/IE register pair.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterruptController {
    /// IF, low five bits.
    requested: u8,
    /// IE, all eight bits are writable and read back.
    enabled: u8,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn request(&mut self, interrupt: Interrupt) {
        self.requested |= interrupt.bit();
    }

    /// Enabled and requested sources.
    #[inline]
    pub fn pending(&self) -> u8 {
        self.requested & self.enabled & 0x1F
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending() != 0
    }

    pub fn highest_pending(&self) -> Option<Interrupt> {
        Interrupt::highest(self.pending())
    }

    /// Clears a request bit once the CPU has committed to servicing it.
    #[inline]
    pub fn acknowledge(&mut self, interrupt: Interrupt) {
        self.requested &= !interrupt.bit();
    }

    #[inline]
    pub fn enabled(&self) -> u8 {
        self.enabled
    }

    pub fn read_if(&self) -> u8 {
        self.requested | 0xE0
    }

    pub fn write_if(&mut self, val: u8) {
        self.requested = val & 0x1F;
    }

    pub fn read_ie(&self) -> u8 {
        self.enabled
    }

    pub fn write_ie(&mut self, val: u8) {
        self.enabled = val;
    }
}

impl Snapshot for InterruptController {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_u8(self.requested);
        w.write_u8(self.enabled);
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.requested = r.read_u8()? & 0x1F;
        self.enabled = r.read_u8()?;
        Ok(())
    }
}
