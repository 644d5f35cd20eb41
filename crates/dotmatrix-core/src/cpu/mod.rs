//! LR35902 instruction interpreter.
//!
//! The CPU only sees the machine through [`CpuBus`]; every `read`, `write`
//! and `idle` on the bus is one M-cycle, so instruction timing falls out of
//! the memory accesses each opcode performs.

mod alu;

use alu::{FLAG_C, FLAG_H, FLAG_N, FLAG_Z};

use crate::error::{CpuError, StateError};
use crate::hardware::{BootRegisters, Model};
use crate::interrupt::Interrupt;
use crate::state::{Snapshot, StateReader, StateWriter};

/// What the processor needs from the rest of the machine.
pub trait CpuBus {
    /// One M-cycle read.
    fn read(&mut self, addr: u16) -> u8;
    /// One M-cycle write.
    fn write(&mut self, addr: u16, val: u8);
    /// One M-cycle without a bus access.
    fn idle(&mut self);

    /// `IE & IF`, low five bits.
    fn pending_interrupts(&self) -> u8;
    fn enabled_interrupts(&self) -> u8;
    fn acknowledge(&mut self, interrupt: Interrupt);

    /// STOP was executed. Resets the divider and performs an armed speed
    /// switch; returns `true` when the speed changed.
    fn stop(&mut self) -> bool;
    /// M-cycles the CPU must sit out for a VRAM DMA it started.
    fn take_stall(&mut self) -> u32;
    fn joypad_pressed(&self) -> bool;
}

/// Opcodes with no defined behaviour; executing one locks up real hardware.
const ILLEGAL_OPCODES: [u8; 11] = [
    0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD,
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cpu {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub pc: u16,
    pub sp: u16,
    /// M-cycles executed since power-on.
    pub cycles: u64,
    pub ime: bool,
    pub halted: bool,
    pub stopped: bool,
    /// Instructions left before a pending EI takes effect.
    ime_delay: u8,
    /// Next opcode fetch does not advance PC.
    halt_bug: bool,
}

impl Cpu {
    /// Post-boot register state for `model`.
    pub fn new(model: Model) -> Self {
        let regs = BootRegisters::for_model(model);
        let mut cpu = Self {
            a: 0,
            f: 0,
            b: 0,
            c: 0,
            d: 0,
            e: 0,
            h: 0,
            l: 0,
            pc: regs.pc,
            sp: regs.sp,
            cycles: 0,
            ime: false,
            halted: false,
            stopped: false,
            ime_delay: 0,
            halt_bug: false,
        };
        cpu.set_af(regs.af);
        cpu.set_bc(regs.bc);
        cpu.set_de(regs.de);
        cpu.set_hl(regs.hl);
        cpu
    }

    pub fn af(&self) -> u16 {
        ((self.a as u16) << 8) | self.f as u16
    }

    fn set_af(&mut self, val: u16) {
        self.a = (val >> 8) as u8;
        self.f = val as u8 & 0xF0;
    }

    pub fn bc(&self) -> u16 {
        ((self.b as u16) << 8) | self.c as u16
    }

    fn set_bc(&mut self, val: u16) {
        self.b = (val >> 8) as u8;
        self.c = val as u8;
    }

    pub fn de(&self) -> u16 {
        ((self.d as u16) << 8) | self.e as u16
    }

    fn set_de(&mut self, val: u16) {
        self.d = (val >> 8) as u8;
        self.e = val as u8;
    }

    pub fn hl(&self) -> u16 {
        ((self.h as u16) << 8) | self.l as u16
    }

    fn set_hl(&mut self, val: u16) {
        self.h = (val >> 8) as u8;
        self.l = val as u8;
    }

    /// Formatted CPU state string for debugging.
    pub fn debug_state(&self) -> String {
        format!(
            "AF:{:04X} BC:{:04X} DE:{:04X} HL:{:04X} PC:{:04X} SP:{:04X} CY:{}",
            self.af(),
            self.bc(),
            self.de(),
            self.hl(),
            self.pc,
            self.sp,
            self.cycles
        )
    }

    #[inline(always)]
    fn read8<B: CpuBus>(&mut self, bus: &mut B, addr: u16) -> u8 {
        self.cycles += 1;
        bus.read(addr)
    }

    #[inline(always)]
    fn write8<B: CpuBus>(&mut self, bus: &mut B, addr: u16, val: u8) {
        self.cycles += 1;
        bus.write(addr, val);
    }

    #[inline(always)]
    fn idle<B: CpuBus>(&mut self, bus: &mut B) {
        self.cycles += 1;
        bus.idle();
    }

    #[inline(always)]
    fn fetch8<B: CpuBus>(&mut self, bus: &mut B) -> u8 {
        let val = self.read8(bus, self.pc);
        self.pc = self.pc.wrapping_add(1);
        val
    }

    #[inline(always)]
    fn fetch16<B: CpuBus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.fetch8(bus) as u16;
        let hi = self.fetch8(bus) as u16;
        (hi << 8) | lo
    }

    fn push_stack<B: CpuBus>(&mut self, bus: &mut B, val: u16) {
        self.sp = self.sp.wrapping_sub(1);
        self.write8(bus, self.sp, (val >> 8) as u8);
        self.sp = self.sp.wrapping_sub(1);
        self.write8(bus, self.sp, val as u8);
    }

    fn pop_stack<B: CpuBus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.read8(bus, self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        let hi = self.read8(bus, self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        (hi << 8) | lo
    }

    /// Operand encoding shared by most groups: B C D E H L (HL) A.
    fn read_reg<B: CpuBus>(&mut self, bus: &mut B, index: u8) -> u8 {
        match index & 0x07 {
            0 => self.b,
            1 => self.c,
            2 => self.d,
            3 => self.e,
            4 => self.h,
            5 => self.l,
            6 => self.read8(bus, self.hl()),
            _ => self.a,
        }
    }

    fn write_reg<B: CpuBus>(&mut self, bus: &mut B, index: u8, val: u8) {
        match index & 0x07 {
            0 => self.b = val,
            1 => self.c = val,
            2 => self.d = val,
            3 => self.e = val,
            4 => self.h = val,
            5 => self.l = val,
            6 => self.write8(bus, self.hl(), val),
            _ => self.a = val,
        }
    }

    /// BC DE HL SP, from bits 4-5.
    fn pair(&self, index: u8) -> u16 {
        match index & 0x03 {
            0 => self.bc(),
            1 => self.de(),
            2 => self.hl(),
            _ => self.sp,
        }
    }

    fn set_pair(&mut self, index: u8, val: u16) {
        match index & 0x03 {
            0 => self.set_bc(val),
            1 => self.set_de(val),
            2 => self.set_hl(val),
            _ => self.sp = val,
        }
    }

    /// (BC) (DE) (HL+) (HL-), from bits 4-5.
    fn indirect_addr(&mut self, index: u8) -> u16 {
        match index & 0x03 {
            0 => self.bc(),
            1 => self.de(),
            2 => {
                let hl = self.hl();
                self.set_hl(hl.wrapping_add(1));
                hl
            }
            _ => {
                let hl = self.hl();
                self.set_hl(hl.wrapping_sub(1));
                hl
            }
        }
    }

    /// NZ Z NC C, from bits 3-4.
    fn condition(&self, index: u8) -> bool {
        match index & 0x03 {
            0 => self.f & FLAG_Z == 0,
            1 => self.f & FLAG_Z != 0,
            2 => self.f & FLAG_C == 0,
            _ => self.f & FLAG_C != 0,
        }
    }

    fn service_interrupt<B: CpuBus>(&mut self, bus: &mut B) {
        self.ime = false;
        self.idle(bus);
        self.idle(bus);

        // The upper-byte push can land on IE and change (or cancel) which
        // interrupt gets dispatched.
        self.sp = self.sp.wrapping_sub(1);
        self.write8(bus, self.sp, (self.pc >> 8) as u8);
        let pending = bus.pending_interrupts();
        self.sp = self.sp.wrapping_sub(1);
        self.write8(bus, self.sp, self.pc as u8);

        match Interrupt::highest(pending) {
            Some(interrupt) => {
                bus.acknowledge(interrupt);
                self.pc = interrupt.vector();
            }
            None => self.pc = 0x0000,
        }
        self.idle(bus);
    }

    /// Run one instruction (or one halted/stopped M-cycle, or one interrupt
    /// dispatch) and return the M-cycles it took.
    pub fn step<B: CpuBus>(&mut self, bus: &mut B) -> Result<u32, CpuError> {
        let start = self.cycles;

        let stall = bus.take_stall();
        if stall > 0 {
            for _ in 0..stall {
                self.idle(bus);
            }
            return Ok((self.cycles - start) as u32);
        }

        if self.stopped {
            if !bus.joypad_pressed() {
                self.idle(bus);
                return Ok(1);
            }
            self.stopped = false;
        }

        if self.halted {
            if bus.pending_interrupts() == 0 {
                self.idle(bus);
                return Ok(1);
            }
            self.halted = false;
            self.idle(bus);
        }

        if self.ime && bus.pending_interrupts() != 0 {
            self.service_interrupt(bus);
            return Ok((self.cycles - start) as u32);
        }

        let pc = self.pc;
        let opcode = self.read8(bus, pc);
        if self.halt_bug {
            self.halt_bug = false;
        } else {
            self.pc = pc.wrapping_add(1);
        }

        #[cfg(feature = "cpu-trace")]
        log::trace!("{:04X}: {:02X} {}", pc, opcode, self.debug_state());

        self.execute(bus, opcode, pc)?;

        if self.ime_delay > 0 {
            self.ime_delay -= 1;
            if self.ime_delay == 0 {
                self.ime = true;
            }
        }
        Ok((self.cycles - start) as u32)
    }

    fn execute<B: CpuBus>(&mut self, bus: &mut B, opcode: u8, pc: u16) -> Result<(), CpuError> {
        match opcode {
            0x00 => {}
            0x01 | 0x11 | 0x21 | 0x31 => {
                let val = self.fetch16(bus);
                self.set_pair(opcode >> 4, val);
            }
            0x02 | 0x12 | 0x22 | 0x32 => {
                let addr = self.indirect_addr(opcode >> 4);
                self.write8(bus, addr, self.a);
            }
            0x0A | 0x1A | 0x2A | 0x3A => {
                let addr = self.indirect_addr(opcode >> 4);
                self.a = self.read8(bus, addr);
            }
            0x03 | 0x13 | 0x23 | 0x33 => {
                let val = self.pair(opcode >> 4).wrapping_add(1);
                self.set_pair(opcode >> 4, val);
                self.idle(bus);
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                let val = self.pair(opcode >> 4).wrapping_sub(1);
                self.set_pair(opcode >> 4, val);
                self.idle(bus);
            }
            0x09 | 0x19 | 0x29 | 0x39 => {
                let (res, f) = alu::add16(self.hl(), self.pair(opcode >> 4), self.f);
                self.set_hl(res);
                self.f = f;
                self.idle(bus);
            }
            op if op & 0xC7 == 0x04 => {
                let r = op >> 3;
                let val = self.read_reg(bus, r);
                let (res, f) = alu::inc(val, self.f);
                self.f = f;
                self.write_reg(bus, r, res);
            }
            op if op & 0xC7 == 0x05 => {
                let r = op >> 3;
                let val = self.read_reg(bus, r);
                let (res, f) = alu::dec(val, self.f);
                self.f = f;
                self.write_reg(bus, r, res);
            }
            op if op & 0xC7 == 0x06 => {
                let val = self.fetch8(bus);
                self.write_reg(bus, op >> 3, val);
            }
            0x07 | 0x0F | 0x17 | 0x1F => {
                // RLCA RRCA RLA RRA: the CB forms with Z forced clear.
                let (res, f) = alu::shift(opcode >> 3, self.a, self.f);
                self.a = res;
                self.f = f & FLAG_C;
            }
            0x08 => {
                let addr = self.fetch16(bus);
                self.write8(bus, addr, self.sp as u8);
                self.write8(bus, addr.wrapping_add(1), (self.sp >> 8) as u8);
            }
            0x10 => {
                let _ = self.fetch8(bus);
                if bus.stop() {
                    log::debug!("STOP at {pc:04X}: speed switch");
                } else if !bus.joypad_pressed() {
                    log::debug!("STOP at {pc:04X}: waiting for joypad");
                    self.stopped = true;
                }
            }
            0x18 => {
                let offset = self.fetch8(bus) as i8;
                self.pc = self.pc.wrapping_add(offset as u16);
                self.idle(bus);
            }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let offset = self.fetch8(bus) as i8;
                if self.condition(opcode >> 3) {
                    self.pc = self.pc.wrapping_add(offset as u16);
                    self.idle(bus);
                }
            }
            0x27 => {
                let (res, f) = alu::daa(self.a, self.f);
                self.a = res;
                self.f = f;
            }
            0x2F => {
                self.a = !self.a;
                self.f |= FLAG_N | FLAG_H;
            }
            0x37 => self.f = (self.f & FLAG_Z) | FLAG_C,
            0x3F => self.f = (self.f & FLAG_Z) | ((self.f & FLAG_C) ^ FLAG_C),
            0x76 => self.halt(bus),
            0x40..=0x7F => {
                let val = self.read_reg(bus, opcode);
                self.write_reg(bus, opcode >> 3, val);
            }
            0x80..=0xBF => {
                let val = self.read_reg(bus, opcode);
                let (res, f) = alu::accumulate(opcode >> 3, self.a, val, self.f);
                self.a = res;
                self.f = f;
            }
            op if op & 0xC7 == 0xC6 => {
                let val = self.fetch8(bus);
                let (res, f) = alu::accumulate(op >> 3, self.a, val, self.f);
                self.a = res;
                self.f = f;
            }
            0xC0 | 0xC8 | 0xD0 | 0xD8 => {
                self.idle(bus);
                if self.condition(opcode >> 3) {
                    self.pc = self.pop_stack(bus);
                    self.idle(bus);
                }
            }
            0xC9 | 0xD9 => {
                self.pc = self.pop_stack(bus);
                self.idle(bus);
                if opcode == 0xD9 {
                    self.ime = true;
                    self.ime_delay = 0;
                }
            }
            0xC1 | 0xD1 | 0xE1 => {
                let val = self.pop_stack(bus);
                self.set_pair((opcode >> 4) & 0x03, val);
            }
            0xF1 => {
                let val = self.pop_stack(bus);
                self.set_af(val);
            }
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                let val = match opcode {
                    0xF5 => self.af(),
                    _ => self.pair((opcode >> 4) & 0x03),
                };
                self.idle(bus);
                self.push_stack(bus, val);
            }
            0xC2 | 0xCA | 0xD2 | 0xDA => {
                let addr = self.fetch16(bus);
                if self.condition(opcode >> 3) {
                    self.pc = addr;
                    self.idle(bus);
                }
            }
            0xC3 => {
                self.pc = self.fetch16(bus);
                self.idle(bus);
            }
            0xE9 => self.pc = self.hl(),
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xCD => {
                let addr = self.fetch16(bus);
                if opcode == 0xCD || self.condition(opcode >> 3) {
                    self.idle(bus);
                    self.push_stack(bus, self.pc);
                    self.pc = addr;
                }
            }
            op if op & 0xC7 == 0xC7 => {
                self.idle(bus);
                self.push_stack(bus, self.pc);
                self.pc = (op & 0x38) as u16;
            }
            0xCB => {
                let cb = self.fetch8(bus);
                self.execute_cb(bus, cb);
            }
            0xE0 => {
                let offset = self.fetch8(bus);
                self.write8(bus, 0xFF00 | offset as u16, self.a);
            }
            0xF0 => {
                let offset = self.fetch8(bus);
                self.a = self.read8(bus, 0xFF00 | offset as u16);
            }
            0xE2 => self.write8(bus, 0xFF00 | self.c as u16, self.a),
            0xF2 => self.a = self.read8(bus, 0xFF00 | self.c as u16),
            0xEA => {
                let addr = self.fetch16(bus);
                self.write8(bus, addr, self.a);
            }
            0xFA => {
                let addr = self.fetch16(bus);
                self.a = self.read8(bus, addr);
            }
            0xE8 => {
                let offset = self.fetch8(bus);
                let (res, f) = alu::add_sp(self.sp, offset);
                self.sp = res;
                self.f = f;
                self.idle(bus);
                self.idle(bus);
            }
            0xF8 => {
                let offset = self.fetch8(bus);
                let (res, f) = alu::add_sp(self.sp, offset);
                self.set_hl(res);
                self.f = f;
                self.idle(bus);
            }
            0xF9 => {
                self.sp = self.hl();
                self.idle(bus);
            }
            0xF3 => {
                self.ime = false;
                self.ime_delay = 0;
            }
            0xFB => {
                if !self.ime && self.ime_delay == 0 {
                    self.ime_delay = 2;
                }
            }
            _ => {
                debug_assert!(ILLEGAL_OPCODES.contains(&opcode));
                log::error!("illegal opcode {opcode:02X} at {pc:04X}");
                return Err(CpuError::IllegalOpcode { opcode, pc });
            }
        }
        Ok(())
    }

    fn execute_cb<B: CpuBus>(&mut self, bus: &mut B, opcode: u8) {
        let r = opcode & 0x07;
        let index = (opcode >> 3) & 0x07;
        let val = self.read_reg(bus, r);
        match opcode >> 6 {
            0 => {
                let (res, f) = alu::shift(index, val, self.f);
                self.f = f;
                self.write_reg(bus, r, res);
            }
            1 => self.f = alu::bit(index, val, self.f),
            2 => self.write_reg(bus, r, val & !(1 << index)),
            _ => self.write_reg(bus, r, val | (1 << index)),
        }
    }

    fn halt<B: CpuBus>(&mut self, bus: &mut B) {
        if bus.enabled_interrupts() & 0x1F == 0 {
            // Nothing could ever wake the CPU; execution just carries on.
            return;
        }
        if !self.ime && self.ime_delay == 0 && bus.pending_interrupts() != 0 {
            log::debug!("halt bug at {:04X}", self.pc.wrapping_sub(1));
            self.halt_bug = true;
            return;
        }
        self.halted = true;
    }
}

impl Snapshot for Cpu {
    fn save_state(&self, w: &mut StateWriter) {
        for reg in [
            self.a, self.f, self.b, self.c, self.d, self.e, self.h, self.l,
        ] {
            w.write_u8(reg);
        }
        w.write_u16(self.pc);
        w.write_u16(self.sp);
        w.write_u64(self.cycles);
        w.write_bool(self.ime);
        w.write_bool(self.halted);
        w.write_bool(self.stopped);
        w.write_u8(self.ime_delay);
        w.write_bool(self.halt_bug);
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.a = r.read_u8()?;
        self.f = r.read_u8()? & 0xF0;
        self.b = r.read_u8()?;
        self.c = r.read_u8()?;
        self.d = r.read_u8()?;
        self.e = r.read_u8()?;
        self.h = r.read_u8()?;
        self.l = r.read_u8()?;
        self.pc = r.read_u16()?;
        self.sp = r.read_u16()?;
        self.cycles = r.read_u64()?;
        self.ime = r.read_bool()?;
        self.halted = r.read_bool()?;
        self.stopped = r.read_bool()?;
        self.ime_delay = r.read_bounded("EI delay", 3)?;
        self.halt_bug = r.read_bool()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat 64 KiB bus with IE/IF at their usual addresses.
    struct TestBus {
        mem: Vec<u8>,
        cycles: u32,
        stall: u32,
        pressed: bool,
    }

    impl TestBus {
        fn with_program(program: &[u8]) -> Self {
            let mut mem = vec![0; 0x10000];
            mem[0x0100..0x0100 + program.len()].copy_from_slice(program);
            Self {
                mem,
                cycles: 0,
                stall: 0,
                pressed: false,
            }
        }
    }

    impl CpuBus for TestBus {
        fn read(&mut self, addr: u16) -> u8 {
            self.cycles += 1;
            self.mem[addr as usize]
        }

        fn write(&mut self, addr: u16, val: u8) {
            self.cycles += 1;
            self.mem[addr as usize] = val;
        }

        fn idle(&mut self) {
            self.cycles += 1;
        }

        fn pending_interrupts(&self) -> u8 {
            self.mem[0xFF0F] & self.mem[0xFFFF] & 0x1F
        }

        fn enabled_interrupts(&self) -> u8 {
            self.mem[0xFFFF]
        }

        fn acknowledge(&mut self, interrupt: Interrupt) {
            self.mem[0xFF0F] &= !interrupt.bit();
        }

        fn stop(&mut self) -> bool {
            false
        }

        fn take_stall(&mut self) -> u32 {
            std::mem::take(&mut self.stall)
        }

        fn joypad_pressed(&self) -> bool {
            self.pressed
        }
    }

    fn run(cpu: &mut Cpu, bus: &mut TestBus, steps: usize) -> Vec<u32> {
        (0..steps)
            .map(|_| cpu.step(bus).expect("legal opcode"))
            .collect()
    }

    #[test]
    fn boot_registers() {
        let cpu = Cpu::new(Model::Dmg);
        assert_eq!(cpu.af(), 0x01B0);
        assert_eq!(cpu.hl(), 0x014D);
        assert_eq!(cpu.pc, 0x0100);
        let cgb = Cpu::new(Model::Cgb);
        assert_eq!(cgb.a, 0x11);
    }

    #[test]
    fn instruction_timings() {
        // LD BC,d16; PUSH BC; POP DE; CALL a16; (at 0x0200) RET; INC (HL); BIT 0,(HL); SET 0,(HL)
        let mut bus = TestBus::with_program(&[
            0x01, 0x34, 0x12, 0xC5, 0xD1, 0xCD, 0x00, 0x02, 0x34, 0xCB, 0x46, 0xCB, 0xC6,
        ]);
        bus.mem[0x0200] = 0xC9;
        let mut cpu = Cpu::new(Model::Dmg);
        cpu.set_hl(0xC000);
        let cycles = run(&mut cpu, &mut bus, 8);
        assert_eq!(cycles, vec![3, 4, 3, 6, 4, 3, 3, 4]);
        assert_eq!(cpu.de(), 0x1234);
        assert_eq!(bus.cycles, cycles.iter().sum::<u32>());
    }

    #[test]
    fn conditional_branch_timings() {
        // XOR A (Z set); JR NZ,+2; JR Z,+0; RET NZ; RET Z (stack holds 0x0150)
        let mut bus = TestBus::with_program(&[0xAF, 0x20, 0x02, 0x28, 0x00, 0xC0, 0xC8]);
        bus.mem[0xFFFC] = 0x50;
        bus.mem[0xFFFD] = 0x01;
        let mut cpu = Cpu::new(Model::Dmg);
        cpu.sp = 0xFFFC;
        let cycles = run(&mut cpu, &mut bus, 5);
        assert_eq!(cycles, vec![1, 2, 3, 2, 5]);
        assert_eq!(cpu.pc, 0x0150);
    }

    #[test]
    fn interrupt_dispatch_takes_five_cycles() {
        let mut bus = TestBus::with_program(&[0x00]);
        bus.mem[0xFFFF] = 0x05;
        bus.mem[0xFF0F] = 0x04;
        let mut cpu = Cpu::new(Model::Dmg);
        cpu.ime = true;
        assert_eq!(cpu.step(&mut bus), Ok(5));
        assert_eq!(cpu.pc, 0x0050);
        assert_eq!(bus.mem[0xFF0F], 0x00);
        assert!(!cpu.ime);
        assert_eq!(bus.mem[0xFFFD], 0x01);
        assert_eq!(bus.mem[0xFFFC], 0x00);
    }

    #[test]
    fn interrupt_priority() {
        let mut bus = TestBus::with_program(&[0x00]);
        bus.mem[0xFFFF] = 0x1F;
        bus.mem[0xFF0F] = 0x12;
        let mut cpu = Cpu::new(Model::Dmg);
        cpu.ime = true;
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.pc, 0x0048);
        assert_eq!(bus.mem[0xFF0F], 0x10);
    }

    #[test]
    fn push_onto_ie_cancels_dispatch() {
        let mut bus = TestBus::with_program(&[0x00]);
        bus.mem[0xFFFF] = 0x01;
        bus.mem[0xFF0F] = 0x01;
        let mut cpu = Cpu::new(Model::Dmg);
        // The return address high byte (0x00) is pushed onto IE.
        cpu.pc = 0x0010;
        cpu.sp = 0x0000;
        cpu.ime = true;
        cpu.step(&mut bus).unwrap();
        assert_eq!(bus.mem[0xFFFF], 0x00);
        assert_eq!(cpu.pc, 0x0000);
        assert_eq!(bus.mem[0xFF0F], 0x01);
    }

    #[test]
    fn ei_takes_effect_after_next_instruction() {
        // EI; NOP; NOP
        let mut bus = TestBus::with_program(&[0xFB, 0x00, 0x00]);
        bus.mem[0xFFFF] = 0x01;
        bus.mem[0xFF0F] = 0x01;
        let mut cpu = Cpu::new(Model::Dmg);
        cpu.step(&mut bus).unwrap();
        assert!(!cpu.ime);
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.pc, 0x0102);
        assert!(cpu.ime);
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.pc, 0x0040);
    }

    #[test]
    fn di_cancels_pending_ei() {
        let mut bus = TestBus::with_program(&[0xFB, 0xF3, 0x00]);
        let mut cpu = Cpu::new(Model::Dmg);
        run(&mut cpu, &mut bus, 3);
        assert!(!cpu.ime);
    }

    #[test]
    fn halt_without_enabled_interrupts_falls_through() {
        let mut bus = TestBus::with_program(&[0x76, 0x3C]);
        let mut cpu = Cpu::new(Model::Dmg);
        cpu.a = 0;
        run(&mut cpu, &mut bus, 2);
        assert!(!cpu.halted);
        assert_eq!(cpu.a, 1);
    }

    #[test]
    fn halt_waits_for_interrupt() {
        let mut bus = TestBus::with_program(&[0x76, 0x3C]);
        bus.mem[0xFFFF] = 0x04;
        let mut cpu = Cpu::new(Model::Dmg);
        cpu.a = 0;
        run(&mut cpu, &mut bus, 4);
        assert!(cpu.halted);
        assert_eq!(cpu.pc, 0x0101);

        bus.mem[0xFF0F] = 0x04;
        run(&mut cpu, &mut bus, 1);
        assert!(!cpu.halted);
        // IME clear: execution resumes after HALT without dispatching.
        assert_eq!(cpu.a, 1);
        assert_eq!(bus.mem[0xFF0F], 0x04);
    }

    #[test]
    fn halt_bug_repeats_next_byte() {
        // HALT; INC A -> INC A runs twice.
        let mut bus = TestBus::with_program(&[0x76, 0x3C, 0x00]);
        bus.mem[0xFFFF] = 0x01;
        bus.mem[0xFF0F] = 0x01;
        let mut cpu = Cpu::new(Model::Dmg);
        cpu.a = 0;
        run(&mut cpu, &mut bus, 3);
        assert!(!cpu.halted);
        assert_eq!(cpu.a, 2);
        assert_eq!(cpu.pc, 0x0102);
    }

    #[test]
    fn stop_waits_for_joypad() {
        let mut bus = TestBus::with_program(&[0x10, 0x00, 0x3C]);
        let mut cpu = Cpu::new(Model::Dmg);
        cpu.a = 0;
        run(&mut cpu, &mut bus, 3);
        assert!(cpu.stopped);
        assert_eq!(cpu.a, 0);
        bus.pressed = true;
        run(&mut cpu, &mut bus, 1);
        assert!(!cpu.stopped);
        assert_eq!(cpu.a, 1);
    }

    #[test]
    fn stall_consumes_cycles_before_next_instruction() {
        let mut bus = TestBus::with_program(&[0x00]);
        bus.stall = 16;
        let mut cpu = Cpu::new(Model::Dmg);
        assert_eq!(cpu.step(&mut bus), Ok(16));
        assert_eq!(cpu.pc, 0x0100);
    }

    #[test]
    fn illegal_opcode_is_an_error() {
        let mut bus = TestBus::with_program(&[0xDD]);
        let mut cpu = Cpu::new(Model::Dmg);
        assert_eq!(
            cpu.step(&mut bus),
            Err(CpuError::IllegalOpcode {
                opcode: 0xDD,
                pc: 0x0100
            })
        );
    }

    #[test]
    fn pop_af_masks_low_nibble() {
        let mut bus = TestBus::with_program(&[0xF1]);
        bus.mem[0xC000] = 0xFF;
        bus.mem[0xC001] = 0x12;
        let mut cpu = Cpu::new(Model::Dmg);
        cpu.sp = 0xC000;
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.af(), 0x12F0);
    }

    #[test]
    fn hl_post_increment_and_decrement() {
        // LD (HL+),A; LD (HL-),A; LD A,(HL+)
        let mut bus = TestBus::with_program(&[0x22, 0x32, 0x2A]);
        let mut cpu = Cpu::new(Model::Dmg);
        cpu.set_hl(0xC000);
        cpu.a = 0x5A;
        run(&mut cpu, &mut bus, 3);
        assert_eq!(bus.mem[0xC000], 0x5A);
        assert_eq!(bus.mem[0xC001], 0x5A);
        assert_eq!(cpu.hl(), 0xC001);
    }

    #[test]
    fn snapshot_restores_registers() {
        let mut cpu = Cpu::new(Model::Cgb);
        cpu.ime_delay = 1;
        cpu.cycles = 1234;
        let mut w = StateWriter::new();
        cpu.save_state(&mut w);
        let bytes = w.into_inner();
        let mut other = Cpu::new(Model::Dmg);
        other.load_state(&mut StateReader::new(&bytes)).unwrap();
        assert_eq!(other, cpu);
    }
}
