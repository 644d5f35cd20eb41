//! Cartridge ROM/RAM and bank controllers.

mod header;
mod mbc;
mod rtc;

use std::{fs, path::Path, time::SystemTime};

pub use header::{Header, MapperKind, compute_header_checksum};
pub use mbc::{Mapper, RAM_BANK_SIZE, ROM_BANK_SIZE};
pub use rtc::{RTC_TRAILER_LEN, Rtc, RtcRegisters};

use crate::error::{LoadError, StateError};
use crate::state::{Snapshot, StateReader, StateWriter};

#[derive(Debug, Clone)]
pub struct Cartridge {
    rom: Vec<u8>,
    ram: Vec<u8>,
    header: Header,
    mapper: Mapper,
}

impl Cartridge {
    /// Validate the header and build the matching bank controller.
    pub fn from_bytes(rom: Vec<u8>) -> Result<Self, LoadError> {
        let header = Header::parse(&rom)?;
        let kind = header.mapper_kind();
        let mapper = Mapper::new(kind, kind == MapperKind::Mbc3 && header.has_rtc());
        let ram = vec![0; header.ram_size()];
        log::info!(
            "loaded cartridge \"{}\" ({:?}, {} KiB ROM, {} bytes RAM, CGB: {})",
            header.title,
            kind,
            rom.len() / 1024,
            ram.len(),
            if header.cgb_supported() { "yes" } else { "no" }
        );
        Ok(Self {
            rom,
            ram,
            header,
            mapper,
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let data = fs::read(path)?;
        Self::from_bytes(data)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn title(&self) -> &str {
        &self.header.title
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    pub fn cgb_supported(&self) -> bool {
        self.header.cgb_supported()
    }

    pub fn has_battery(&self) -> bool {
        self.header.has_battery()
    }

    pub fn has_rtc(&self) -> bool {
        self.mapper.rtc().is_some()
    }

    pub fn rtc(&self) -> Option<&Rtc> {
        self.mapper.rtc()
    }

    /// Key a front-end can file battery saves under.
    pub fn save_key(&self) -> String {
        let title: String = self
            .header
            .title
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{}-{:04X}", title, self.header.global_checksum)
    }

    /// Advance the real-time clock to `now`. No-op without a clock.
    pub fn update_rtc(&mut self, now: SystemTime) {
        if let Some(rtc) = self.mapper.rtc_mut() {
            rtc.sync(now);
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF => self.mapper.read_rom(&self.rom, addr),
            0xA000..=0xBFFF => self.mapper.read_ram(&self.ram, addr),
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF => self.mapper.write_control(addr, val),
            0xA000..=0xBFFF => self.mapper.write_ram(&mut self.ram, addr, val),
            _ => {}
        }
    }

    /// Battery-backed contents: RAM followed by the clock trailer on RTC
    /// carts. `None` when nothing is battery-backed.
    pub fn battery_ram(&self) -> Option<Vec<u8>> {
        if !self.has_battery() {
            return None;
        }
        let mut out = self.ram.clone();
        if let Some(rtc) = self.mapper.rtc() {
            out.extend_from_slice(&rtc.to_trailer());
        }
        Some(out)
    }

    /// Merge a blob produced by [`Self::battery_ram`]. Short blobs fill what
    /// they cover; a missing clock trailer leaves the clock untouched.
    pub fn load_battery_ram(&mut self, data: &[u8]) {
        let ram_len = self.ram.len();
        let expected = ram_len + if self.has_rtc() { RTC_TRAILER_LEN } else { 0 };
        if data.len() != expected {
            log::warn!(
                "battery blob is {} bytes, expected {}; loading what fits",
                data.len(),
                expected
            );
        }
        let n = data.len().min(ram_len);
        self.ram[..n].copy_from_slice(&data[..n]);

        if let Some(rtc) = self.mapper.rtc_mut()
            && let Some(trailer) = data.get(ram_len..ram_len + RTC_TRAILER_LEN)
        {
            let mut buf = [0u8; RTC_TRAILER_LEN];
            buf.copy_from_slice(trailer);
            rtc.load_trailer(&buf);
        }
    }

    /// Identity written ahead of the dynamic state so blobs from another
    /// image are rejected.
    fn save_identity(&self, w: &mut StateWriter) {
        w.write_u32(self.rom.len() as u32);
        w.write_u8(self.header.header_checksum);
        w.write_u16(self.header.global_checksum);
        w.write_u32(self.ram.len() as u32);
    }

    fn check_identity(&self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        let rom_len = r.read_u32()? as usize;
        let header_checksum = r.read_u8()?;
        let global_checksum = r.read_u16()?;
        let ram_len = r.read_u32()? as usize;
        if rom_len != self.rom.len()
            || header_checksum != self.header.header_checksum
            || global_checksum != self.header.global_checksum
            || ram_len != self.ram.len()
        {
            return Err(StateError::CartridgeMismatch);
        }
        Ok(())
    }
}

impl Snapshot for Cartridge {
    fn save_state(&self, w: &mut StateWriter) {
        self.save_identity(w);
        w.write_bytes(&self.ram);
        self.mapper.save_state(w);
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        self.check_identity(r)?;
        r.read_into(&mut self.ram)?;
        self.mapper.load_state(r)
    }
}
