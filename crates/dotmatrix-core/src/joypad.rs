use crate::error::StateError;
use crate::interrupt::{Interrupt, InterruptController};
use crate::state::{Snapshot, StateReader, StateWriter};

/// Buttons as wired into the P1 matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Button {
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Select,
    Start,
}

impl Button {
    pub const ALL: [Button; 8] = [
        Button::Right,
        Button::Left,
        Button::Up,
        Button::Down,
        Button::A,
        Button::B,
        Button::Select,
        Button::Start,
    ];

    /// Bit in the internal pressed mask: directions low nibble, actions high.
    const fn mask(self) -> u8 {
        match self {
            Button::Right => 0x01,
            Button::Left => 0x02,
            Button::Up => 0x04,
            Button::Down => 0x08,
            Button::A => 0x10,
            Button::B => 0x20,
            Button::Select => 0x40,
            Button::Start => 0x80,
        }
    }
}

/// P1/JOYP register.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Joypad {
    /// Set bit = button held.
    pressed: u8,
    /// P14/P15 select lines as written (bits 4-5, active low).
    select: u8,
}

impl Joypad {
    pub fn new() -> Self {
        Self {
            pressed: 0,
            select: 0x30,
        }
    }

    pub fn read(&self) -> u8 {
        let mut low = 0x0F;
        if self.select & 0x10 == 0 {
            low &= !(self.pressed & 0x0F);
        }
        if self.select & 0x20 == 0 {
            low &= !(self.pressed >> 4);
        }
        0xC0 | self.select | low
    }

    pub fn write(&mut self, val: u8, ic: &mut InterruptController) {
        let before = self.read();
        self.select = val & 0x30;
        self.raise_on_fall(before, ic);
    }

    /// Update one button. A newly pressed line that is currently selected
    /// requests the joypad interrupt.
    pub fn set(&mut self, button: Button, pressed: bool, ic: &mut InterruptController) {
        let before = self.read();
        if pressed {
            self.pressed |= button.mask();
        } else {
            self.pressed &= !button.mask();
        }
        self.raise_on_fall(before, ic);
    }

    pub fn any_pressed(&self) -> bool {
        self.pressed != 0
    }

    fn raise_on_fall(&self, before: u8, ic: &mut InterruptController) {
        let fell = before & !self.read() & 0x0F;
        if fell != 0 {
            ic.request(Interrupt::Joypad);
        }
    }
}

impl Snapshot for Joypad {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_u8(self.pressed);
        w.write_u8(self.select);
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.pressed = r.read_u8()?;
        self.select = r.read_u8()? & 0x30;
        Ok(())
    }
}
