use crate::error::StateError;
use crate::interrupt::{Interrupt, InterruptController};
use crate::state::{Snapshot, StateReader, StateWriter};

pub trait LinkPort: Send {
    /// Exchange a byte with the partner and return the partner's byte.
    fn transfer(&mut self, byte: u8) -> u8;
}

/// Port used when no cable is attached.
/// By default the line is dead (all 1 bits), so any transfer receives 0xFF.
/// With `loopback` the sent byte is echoed back instead.
#[derive(Default)]
pub struct NullLinkPort {
    loopback: bool,
}

impl NullLinkPort {
    pub fn new(loopback: bool) -> Self {
        Self { loopback }
    }
}

impl LinkPort for NullLinkPort {
    fn transfer(&mut self, byte: u8) -> u8 {
        if self.loopback { byte } else { 0xFF }
    }
}

/// A finished byte exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialTransfer {
    pub sent: u8,
    pub received: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TransferState {
    remaining_bits: u8,
    outgoing: u8,
    incoming: Option<u8>,
    internal_clock: bool,
    fast_clock: bool,
}

impl TransferState {
    fn new(outgoing: u8, sc: u8) -> Self {
        Self {
            remaining_bits: 8,
            outgoing,
            incoming: None,
            internal_clock: sc & 0x01 != 0,
            fast_clock: sc & 0x02 != 0,
        }
    }

    /// Shift one bit of the partner byte into SB. True on the last bit.
    fn shift(&mut self, sb: &mut u8) -> bool {
        let incoming = self.incoming.unwrap_or(0xFF);
        let bit = (incoming >> (self.remaining_bits - 1)) & 1;
        *sb = (*sb << 1) | bit;
        self.remaining_bits -= 1;
        self.remaining_bits == 0
    }
}

/// SB/SC registers and the shift clock.
pub struct Serial {
    sb: u8,
    sc: u8,
    cgb: bool,
    port: Box<dyn LinkPort>,
    transfer: Option<TransferState>,
    completed: Vec<SerialTransfer>,
}

impl Serial {
    pub fn new(cgb: bool) -> Self {
        Self {
            sb: 0,
            sc: if cgb { 0x7F } else { 0x7E },
            cgb,
            port: Box::new(NullLinkPort::default()),
            transfer: None,
            completed: Vec::new(),
        }
    }

    pub fn connect(&mut self, port: Box<dyn LinkPort>) {
        self.port = port;
    }

    /// Detach the current port, leaving the line dead.
    pub fn disconnect(&mut self) -> Box<dyn LinkPort> {
        std::mem::replace(&mut self.port, Box::new(NullLinkPort::default()))
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF01 => self.sb,
            0xFF02 => {
                if self.cgb {
                    self.sc | 0x7C
                } else {
                    self.sc | 0x7E
                }
            }
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF01 => self.sb = val,
            0xFF02 => {
                self.sc = if self.cgb { val & 0x83 } else { val & 0x81 };
                // Clearing bit 7 cancels; setting it (re)starts with current SB.
                self.transfer = (val & 0x80 != 0).then(|| TransferState::new(self.sb, self.sc));
            }
            _ => {}
        }
    }

    /// Advance across divider values `prev_div` → `curr_div`.
    pub fn step(&mut self, prev_div: u16, curr_div: u16, ic: &mut InterruptController) {
        let Some(state) = self.transfer.as_mut() else {
            return;
        };
        if !state.internal_clock {
            return;
        }
        if state.incoming.is_none() {
            state.incoming = Some(self.port.transfer(state.outgoing));
        }
        // Falling edges of CPU-rate divider bit 8 (8192 Hz), bit 3 on the CGB fast clock.
        let clock_bit = if self.cgb && state.fast_clock { 3 } else { 8 };
        let mut div = prev_div;
        let mut prev_clock = (div >> clock_bit) & 1 != 0;
        let mut complete = false;
        for _ in 0..curr_div.wrapping_sub(prev_div) {
            div = div.wrapping_add(1);
            let clock = (div >> clock_bit) & 1 != 0;
            if prev_clock && !clock && state.shift(&mut self.sb) {
                complete = true;
                break;
            }
            prev_clock = clock;
        }
        if complete {
            self.finish(ic);
        }
    }

    /// Clock pulses supplied by a partner in external-clock mode.
    pub fn external_clock_pulse(&mut self, count: u8, ic: &mut InterruptController) {
        let Some(state) = self.transfer.as_mut() else {
            return;
        };
        if state.internal_clock {
            return;
        }
        if state.incoming.is_none() {
            state.incoming = Some(self.port.transfer(state.outgoing));
        }
        let mut complete = false;
        for _ in 0..count {
            if state.shift(&mut self.sb) {
                complete = true;
                break;
            }
        }
        if complete {
            self.finish(ic);
        }
    }

    fn finish(&mut self, ic: &mut InterruptController) {
        if let Some(state) = self.transfer.take() {
            self.completed.push(SerialTransfer {
                sent: state.outgoing,
                received: self.sb,
            });
        }
        self.sc &= 0x7F;
        ic.request(Interrupt::Serial);
    }

    /// Transfers finished since the last call.
    pub fn take_completed(&mut self) -> impl Iterator<Item = SerialTransfer> + '_ {
        self.completed.drain(..)
    }

    pub fn is_transferring(&self) -> bool {
        self.transfer.is_some()
    }
}

impl Snapshot for Serial {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_u8(self.sb);
        w.write_u8(self.sc);
        match &self.transfer {
            Some(t) => {
                w.write_bool(true);
                w.write_u8(t.remaining_bits);
                w.write_u8(t.outgoing);
                w.write_bool(t.incoming.is_some());
                w.write_u8(t.incoming.unwrap_or(0));
                w.write_bool(t.internal_clock);
                w.write_bool(t.fast_clock);
            }
            None => {
                w.write_bool(false);
                w.write_bytes(&[0; 6]);
            }
        }
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.sb = r.read_u8()?;
        self.sc = r.read_u8()?;
        let active = r.read_bool()?;
        let remaining_bits = r.read_u8()?;
        let outgoing = r.read_u8()?;
        let has_incoming = r.read_u8()? != 0;
        let incoming = r.read_u8()?;
        let internal_clock = r.read_u8()? != 0;
        let fast_clock = r.read_u8()? != 0;
        self.transfer = if active {
            if remaining_bits == 0 || remaining_bits > 8 {
                return Err(StateError::InvalidValue {
                    field: "serial bits",
                    value: remaining_bits as u32,
                });
            }
            Some(TransferState {
                remaining_bits,
                outgoing,
                incoming: has_incoming.then_some(incoming),
                internal_clock,
                fast_clock,
            })
        } else {
            None
        };
        self.completed.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedInLinkPort {
        ret: u8,
    }

    impl LinkPort for FixedInLinkPort {
        fn transfer(&mut self, _byte: u8) -> u8 {
            self.ret
        }
    }

    fn serial(cgb: bool, ret: u8) -> Serial {
        let mut serial = Serial::new(cgb);
        serial.connect(Box::new(FixedInLinkPort { ret }));
        serial
    }

    #[test]
    fn clearing_sc_cancels_transfer() {
        let mut serial = serial(false, 0x34);
        let mut ic = InterruptController::new();
        serial.write(0xFF01, 0x12);
        serial.write(0xFF02, 0x81);
        serial.write(0xFF02, 0x00);
        serial.step(0, 4096, &mut ic);
        assert_eq!(serial.read(0xFF02) & 0x80, 0);
        assert_eq!(ic.read_if() & 0x08, 0);
    }

    #[test]
    fn internal_clock_irq_only_on_final_bit() {
        let mut serial = serial(false, 0x34);
        let mut ic = InterruptController::new();
        serial.write(0xFF01, 0x12);
        serial.write(0xFF02, 0x81);

        serial.step(0, 3584, &mut ic);
        assert_ne!(serial.read(0xFF02) & 0x80, 0);
        assert_eq!(ic.read_if() & 0x08, 0);

        serial.step(3584, 4096, &mut ic);
        assert_eq!(serial.read(0xFF02) & 0x80, 0);
        assert_ne!(ic.read_if() & 0x08, 0);
        assert_eq!(serial.read(0xFF01), 0x34);
        let done: Vec<_> = serial.take_completed().collect();
        assert_eq!(
            done,
            vec![SerialTransfer {
                sent: 0x12,
                received: 0x34
            }]
        );
    }

    #[test]
    fn cgb_fast_clock_rate() {
        let mut serial = serial(true, 0x34);
        let mut ic = InterruptController::new();
        serial.write(0xFF01, 0x12);
        serial.write(0xFF02, 0x83);
        serial.step(0, 127, &mut ic);
        assert!(serial.is_transferring());
        serial.step(127, 128, &mut ic);
        assert!(!serial.is_transferring());
        assert_eq!(serial.read(0xFF01), 0x34);
    }

    #[test]
    fn external_clock_stalls_without_pulses() {
        let mut serial = serial(false, 0x34);
        let mut ic = InterruptController::new();
        serial.write(0xFF01, 0x12);
        serial.write(0xFF02, 0x80);
        serial.step(0, 60000, &mut ic);
        assert!(serial.is_transferring());

        serial.external_clock_pulse(7, &mut ic);
        assert!(serial.is_transferring());
        serial.external_clock_pulse(1, &mut ic);
        assert!(!serial.is_transferring());
        assert_eq!(serial.read(0xFF01), 0x34);
        assert_ne!(ic.read_if() & 0x08, 0);
    }

    #[test]
    fn no_partner_receives_ff() {
        let mut serial = Serial::new(false);
        let mut ic = InterruptController::new();
        serial.write(0xFF01, 0x12);
        serial.write(0xFF02, 0x81);
        serial.step(0, 4096, &mut ic);
        assert_eq!(serial.read(0xFF01), 0xFF);
    }

    #[test]
    fn restart_uses_current_sb() {
        let mut serial = serial(false, 0x34);
        let mut ic = InterruptController::new();
        serial.write(0xFF01, 0x12);
        serial.write(0xFF02, 0x81);
        serial.step(0, 512, &mut ic);
        serial.write(0xFF01, 0x55);
        serial.write(0xFF02, 0x81);
        serial.step(512, 512 + 4096, &mut ic);
        let done: Vec<_> = serial.take_completed().collect();
        assert_eq!(done.last().map(|t| t.sent), Some(0x55));
    }
}
