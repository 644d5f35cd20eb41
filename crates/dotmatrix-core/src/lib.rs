//! Cycle-accurate Game Boy / Game Boy Color emulation core.
//!
//! This crate contains the platform-agnostic machine (CPU/bus/PPU/APU/etc) and
//! a small polling API on [`gameboy::GameBoy`]. Window management, input
//! polling and file persistence are left to the embedding front-end, which
//! reacts to the [`gameboy::Event`]s the core queues.

#![allow(non_snake_case)]

/// Audio Processing Unit (APU) emulation.
pub mod apu;

/// Cartridge mappers (MBC) and ROM/RAM/RTC handling.
pub mod cartridge;

/// Emulator configuration supplied by the embedding front-end.
pub mod config;

/// LR35902 CPU core.
pub mod cpu;

/// OAM DMA and CGB HDMA engines.
pub mod dma;

/// Error types surfaced to callers.
pub mod error;

/// Top-level machine that owns every subsystem and advances the master clock.
pub mod gameboy;

/// Hardware models and their post-boot register state.
pub mod hardware;

/// Interrupt request/enable registers and priority arbitration.
pub mod interrupt;

/// Joypad matrix register.
pub mod joypad;

/// Memory map and hardware plumbing.
pub mod mmu;

/// Pixel Processing Unit (PPU) emulation.
pub mod ppu;

/// Serial unit and link cable plumbing.
pub mod serial;

/// Deterministic save-state encoding.
pub mod state;

/// Divider/timer unit.
pub mod timer;

pub use config::{EmulatorConfig, ModelPreference};
pub use error::{CpuError, LoadError, StateError};
pub use gameboy::{Event, GameBoy};
pub use joypad::Button;
