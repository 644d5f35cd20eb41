//! Memory map and hardware plumbing.
//!
//! The [`Mmu`] owns every memory-mapped component and is the only thing the
//! CPU talks to. Each bus access costs one M-cycle, during which the timer
//! receives four CPU clocks and the PPU/APU receive four dots (two in double
//! speed).

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::cpu::CpuBus;
use crate::dma::{HDMA_BLOCK_LEN, Hdma, HdmaTrigger, OamDma};
use crate::error::StateError;
use crate::hardware::Model;
use crate::interrupt::{Interrupt, InterruptController};
use crate::joypad::{Button, Joypad};
use crate::ppu::timing::Mode;
use crate::ppu::{ColorMode, Ppu};
use crate::serial::Serial;
use crate::state::{Snapshot, StateReader, StateWriter};
use crate::timer::Timer;

const WRAM_BANK_SIZE: usize = 0x1000;
const HRAM_SIZE: usize = 0x7F;

/// Post-boot divider phase.
const BOOT_DIV_DMG: u16 = 0xABCC;
const BOOT_DIV_CGB: u16 = 0x1EA0;

/// M-cycles the CPU is held for each 16-byte VRAM DMA block.
const HDMA_BLOCK_STALL: u32 = 8;

pub struct Mmu {
    model: Model,
    cart: Option<Cartridge>,
    wram: Box<[[u8; WRAM_BANK_SIZE]; 8]>,
    wram_bank: usize,
    hram: [u8; HRAM_SIZE],
    pub(crate) ic: InterruptController,
    pub(crate) timer: Timer,
    pub(crate) serial: Serial,
    pub(crate) joypad: Joypad,
    pub(crate) oam_dma: OamDma,
    pub(crate) hdma: Hdma,
    pub(crate) ppu: Ppu,
    pub(crate) apu: Apu,
    /// KEY1 bit 0: a speed switch is armed for the next STOP.
    speed_armed: bool,
    double_speed: bool,
    /// CPU M-cycles owed to VRAM DMA.
    stall: u32,
    frame_ready: bool,
    dots: u64,
}

impl Mmu {
    pub fn new(
        model: Model,
        color_mode: ColorMode,
        dmg_palette: [u16; 4],
        sample_rate: u32,
        low_pass: bool,
    ) -> Self {
        let cgb = model.is_cgb();
        let boot_div = if cgb { BOOT_DIV_CGB } else { BOOT_DIV_DMG };
        let mut ic = InterruptController::new();
        ic.write_if(0x01);
        Self {
            model,
            cart: None,
            wram: Box::new([[0; WRAM_BANK_SIZE]; 8]),
            wram_bank: 1,
            hram: [0; HRAM_SIZE],
            ic,
            timer: Timer::with_div(boot_div),
            serial: Serial::new(cgb),
            joypad: Joypad::new(),
            oam_dma: OamDma::new(),
            hdma: Hdma::new(),
            ppu: Ppu::new(color_mode, dmg_palette),
            apu: Apu::new(cgb, sample_rate, low_pass),
            speed_armed: false,
            double_speed: false,
            stall: 0,
            frame_ready: false,
            dots: 0,
        }
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn insert_cartridge(&mut self, cart: Cartridge) {
        self.cart = Some(cart);
    }

    pub fn take_cartridge(&mut self) -> Option<Cartridge> {
        self.cart.take()
    }

    pub fn cartridge(&self) -> Option<&Cartridge> {
        self.cart.as_ref()
    }

    pub fn cartridge_mut(&mut self) -> Option<&mut Cartridge> {
        self.cart.as_mut()
    }

    pub fn double_speed(&self) -> bool {
        self.double_speed
    }

    /// KEY1: bit 7 current speed, bit 0 switch armed.
    fn key1(&self) -> u8 {
        0x7E | (u8::from(self.double_speed) << 7) | u8::from(self.speed_armed)
    }

    /// Dots delivered to the PPU/APU since power-on.
    pub fn dots(&self) -> u64 {
        self.dots
    }

    /// True once per vertical-blank entry.
    pub fn take_frame_ready(&mut self) -> bool {
        std::mem::take(&mut self.frame_ready)
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.joypad.set(button, pressed, &mut self.ic);
    }

    /// Debug read: ignores VRAM/OAM locks and OAM DMA.
    pub fn peek(&self, addr: u16) -> u8 {
        self.read_internal(addr, true)
    }

    /// Debug write: ignores VRAM/OAM locks and OAM DMA. I/O side effects
    /// still happen.
    pub fn poke(&mut self, addr: u16, val: u8) {
        match addr {
            0x8000..=0x9FFF => self.ppu.write_vram(addr, val),
            0xFE00..=0xFE9F => self.ppu.write_oam((addr - 0xFE00) as usize, val),
            _ => self.write_internal(addr, val),
        }
    }

    fn vram_readable(&self, ignore_locks: bool) -> bool {
        ignore_locks || (self.ppu.vram_accessible() && !self.oam_dma.blocking())
    }

    fn oam_readable(&self, ignore_locks: bool) -> bool {
        ignore_locks || (self.ppu.oam_accessible() && !self.oam_dma.blocking())
    }

    fn read_internal(&self, addr: u16, ignore_locks: bool) -> u8 {
        let cgb = self.model.is_cgb();
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                self.cart.as_ref().map(|c| c.read(addr)).unwrap_or(0xFF)
            }
            0x8000..=0x9FFF if self.vram_readable(ignore_locks) => self.ppu.read_vram(addr),
            0x8000..=0x9FFF => 0xFF,
            0xC000..=0xCFFF => self.wram[0][(addr - 0xC000) as usize],
            0xD000..=0xDFFF => self.wram[self.wram_bank][(addr - 0xD000) as usize],
            0xE000..=0xEFFF => self.wram[0][(addr - 0xE000) as usize],
            0xF000..=0xFDFF => self.wram[self.wram_bank][(addr - 0xF000) as usize],
            0xFE00..=0xFE9F if self.oam_readable(ignore_locks) => {
                self.ppu.read_oam((addr - 0xFE00) as usize)
            }
            0xFE00..=0xFEFF => 0xFF,
            0xFF00 => self.joypad.read(),
            0xFF01 | 0xFF02 => self.serial.read(addr),
            0xFF04..=0xFF07 => self.timer.read(addr),
            0xFF0F => self.ic.read_if(),
            0xFF10..=0xFF3F => self.apu.read_reg(addr),
            0xFF46 => self.oam_dma.register(),
            0xFF40..=0xFF4B | 0xFF4F | 0xFF68..=0xFF6C => self.ppu.read_reg(addr),
            0xFF4D if cgb => self.key1(),
            0xFF51..=0xFF55 if cgb => self.hdma.read(addr),
            0xFF70 if cgb => 0xF8 | self.wram_bank as u8,
            0xFF76 | 0xFF77 => self.apu.read_pcm(addr),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            0xFFFF => self.ic.read_ie(),
            _ => 0xFF,
        }
    }

    fn write_internal(&mut self, addr: u16, val: u8) {
        let cgb = self.model.is_cgb();
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => {
                if let Some(cart) = self.cart.as_mut() {
                    cart.write(addr, val);
                }
            }
            0x8000..=0x9FFF => {
                if self.vram_readable(false) {
                    self.ppu.write_vram(addr, val);
                }
            }
            0xC000..=0xCFFF => self.wram[0][(addr - 0xC000) as usize] = val,
            0xD000..=0xDFFF => self.wram[self.wram_bank][(addr - 0xD000) as usize] = val,
            0xE000..=0xEFFF => self.wram[0][(addr - 0xE000) as usize] = val,
            0xF000..=0xFDFF => self.wram[self.wram_bank][(addr - 0xF000) as usize] = val,
            0xFE00..=0xFE9F => {
                if self.oam_readable(false) {
                    self.ppu.write_oam((addr - 0xFE00) as usize, val);
                }
            }
            0xFF00 => self.joypad.write(val, &mut self.ic),
            0xFF01 | 0xFF02 => self.serial.write(addr, val),
            0xFF04 => self.reset_div(),
            0xFF05..=0xFF07 => self.timer.write(addr, val, &mut self.ic),
            0xFF0F => self.ic.write_if(val),
            0xFF10..=0xFF3F => self.apu.write_reg(addr, val),
            0xFF46 => self.oam_dma.start(val),
            0xFF40..=0xFF4B | 0xFF4F | 0xFF68..=0xFF6C => {
                self.ppu.write_reg(addr, val, &mut self.ic)
            }
            0xFF4D if cgb => self.speed_armed = val & 0x01 != 0,
            0xFF51..=0xFF55 if cgb => self.write_hdma(addr, val),
            0xFF70 if cgb => {
                let bank = (val & 0x07) as usize;
                self.wram_bank = if bank == 0 { 1 } else { bank };
            }
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            0xFFFF => self.ic.write_ie(val),
            _ => {}
        }
    }

    fn write_hdma(&mut self, addr: u16, val: u8) {
        match self.hdma.write(addr, val) {
            HdmaTrigger::General(blocks) => {
                for _ in 0..blocks {
                    self.copy_hdma_block();
                }
            }
            HdmaTrigger::HBlank => {
                if !self.ppu.lcd_enabled() || self.ppu.mode() == Mode::HBlank {
                    self.copy_hdma_block();
                }
            }
            HdmaTrigger::Cancelled | HdmaTrigger::None => {}
        }
    }

    /// Source read for DMA engines: the regular map without PPU locks.
    fn dma_source_read(&self, addr: u16) -> u8 {
        match addr {
            0x8000..=0x9FFF => self.ppu.read_vram(addr),
            _ => self.read_internal(addr, true),
        }
    }

    fn copy_hdma_block(&mut self) {
        let (src, dst) = self.hdma.take_block();
        for i in 0..HDMA_BLOCK_LEN {
            let byte = self.dma_source_read(src.wrapping_add(i));
            self.ppu.write_vram(dst.wrapping_add(i), byte);
        }
        self.stall += if self.double_speed {
            HDMA_BLOCK_STALL * 2
        } else {
            HDMA_BLOCK_STALL
        };
    }

    #[inline]
    fn sequencer_bit(&self) -> u16 {
        if self.double_speed { 1 << 13 } else { 1 << 12 }
    }

    fn reset_div(&mut self) {
        // Resetting DIV with the sequencer bit high is a falling edge.
        if self.timer.div() & self.sequencer_bit() != 0 {
            self.apu.clock_frame_sequencer();
        }
        self.timer.reset_div(&mut self.ic);
    }

    fn dot(&mut self) {
        let events = self.ppu.dot(&mut self.ic);
        if events.hblank && self.hdma.active() {
            self.copy_hdma_block();
        }
        if events.vblank {
            self.frame_ready = true;
        }
        self.apu.dot();
        self.dots += 1;
    }

    /// Advance the machine by one M-cycle.
    pub fn tick(&mut self) {
        let start_div = self.timer.div();
        let seq_bit = self.sequencer_bit();
        for _ in 0..4 {
            let before = self.timer.div();
            self.timer.tick(&mut self.ic);
            if before & seq_bit != 0 && self.timer.div() & seq_bit == 0 {
                self.apu.clock_frame_sequencer();
            }
        }
        self.serial.step(start_div, self.timer.div(), &mut self.ic);

        if let Some((src, index)) = self.oam_dma.step() {
            let byte = self.dma_source_read(src);
            self.ppu.write_oam(index, byte);
        }

        let dots = if self.double_speed { 2 } else { 4 };
        for _ in 0..dots {
            self.dot();
        }
    }
}

impl CpuBus for Mmu {
    fn read(&mut self, addr: u16) -> u8 {
        let val = self.read_internal(addr, false);
        self.tick();
        val
    }

    fn write(&mut self, addr: u16, val: u8) {
        self.write_internal(addr, val);
        self.tick();
    }

    fn idle(&mut self) {
        self.tick();
    }

    fn pending_interrupts(&self) -> u8 {
        self.ic.pending()
    }

    fn enabled_interrupts(&self) -> u8 {
        self.ic.enabled()
    }

    fn acknowledge(&mut self, interrupt: Interrupt) {
        self.ic.acknowledge(interrupt);
    }

    fn stop(&mut self) -> bool {
        self.reset_div();
        if !self.model.is_cgb() || !self.speed_armed {
            return false;
        }
        self.speed_armed = false;
        self.double_speed = !self.double_speed;
        log::debug!(
            "speed switch: {} speed",
            if self.double_speed { "double" } else { "normal" }
        );
        true
    }

    fn take_stall(&mut self) -> u32 {
        std::mem::take(&mut self.stall)
    }

    fn joypad_pressed(&self) -> bool {
        self.joypad.any_pressed()
    }
}

impl Snapshot for Mmu {
    fn save_state(&self, w: &mut StateWriter) {
        self.ic.save_state(w);
        for bank in self.wram.iter() {
            w.write_bytes(bank);
        }
        w.write_u8(self.wram_bank as u8);
        w.write_bytes(&self.hram);
        w.write_bool(self.speed_armed);
        w.write_bool(self.double_speed);
        w.write_u32(self.stall);
        w.write_bool(self.frame_ready);
        w.write_u64(self.dots);
        self.timer.save_state(w);
        self.serial.save_state(w);
        self.joypad.save_state(w);
        self.oam_dma.save_state(w);
        self.hdma.save_state(w);
        self.ppu.save_state(w);
        self.apu.save_state(w);
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.ic.load_state(r)?;
        for bank in self.wram.iter_mut() {
            r.read_into(bank)?;
        }
        let bank = r.read_bounded("SVBK", 8)? as usize;
        self.wram_bank = bank.max(1);
        r.read_into(&mut self.hram)?;
        self.speed_armed = r.read_bool()?;
        self.double_speed = r.read_bool()?;
        self.stall = r.read_u32()?;
        self.frame_ready = r.read_bool()?;
        self.dots = r.read_u64()?;
        self.timer.load_state(r)?;
        self.serial.load_state(r)?;
        self.joypad.load_state(r)?;
        self.oam_dma.load_state(r)?;
        self.hdma.load_state(r)?;
        self.ppu.load_state(r)?;
        self.apu.load_state(r)?;
        Ok(())
    }
}
