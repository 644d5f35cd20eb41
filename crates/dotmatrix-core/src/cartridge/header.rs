use crate::error::LoadError;

pub const TITLE_START: usize = 0x0134;
pub const TITLE_END: usize = 0x0143;
pub const CGB_FLAG: usize = 0x0143;
pub const CART_TYPE: usize = 0x0147;
pub const ROM_SIZE: usize = 0x0148;
pub const RAM_SIZE: usize = 0x0149;
pub const HEADER_CHECKSUM: usize = 0x014D;
pub const GLOBAL_CHECKSUM: usize = 0x014E;
/// Smallest image that still contains a full header.
pub const HEADER_END: usize = 0x0150;

/// Bank controller family selected by the cartridge-type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperKind {
    None,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
}

/// Parsed cartridge header (gbdev.io/pandocs/The_Cartridge_Header.html).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub title: String,
    pub cgb_flag: u8,
    pub cart_type: u8,
    pub rom_size_code: u8,
    pub ram_size_code: u8,
    pub header_checksum: u8,
    pub global_checksum: u16,
}

/// `x = x - rom[i] - 1` over 0x0134..=0x014C.
pub fn compute_header_checksum(rom: &[u8]) -> u8 {
    rom[TITLE_START..HEADER_CHECKSUM]
        .iter()
        .fold(0u8, |x, &b| x.wrapping_sub(b).wrapping_sub(1))
}

impl Header {
    /// Parse and validate the header. Fails on short images and on a header
    /// checksum mismatch.
    pub fn parse(rom: &[u8]) -> Result<Self, LoadError> {
        if rom.len() < HEADER_END {
            return Err(LoadError::TooSmall { len: rom.len() });
        }
        let computed = compute_header_checksum(rom);
        let expected = rom[HEADER_CHECKSUM];
        if computed != expected {
            return Err(LoadError::HeaderChecksum { expected, computed });
        }

        let mut title = &rom[TITLE_START..TITLE_END];
        if let Some(pos) = title.iter().position(|&b| b == 0) {
            title = &title[..pos];
        }
        let title = String::from_utf8_lossy(title).trim().to_string();

        Ok(Self {
            title,
            cgb_flag: rom[CGB_FLAG],
            cart_type: rom[CART_TYPE],
            rom_size_code: rom[ROM_SIZE],
            ram_size_code: rom[RAM_SIZE],
            header_checksum: expected,
            global_checksum: u16::from_be_bytes([rom[GLOBAL_CHECKSUM], rom[GLOBAL_CHECKSUM + 1]]),
        })
    }

    /// Bit 7 of 0x0143 marks colour support (0x80 dual-mode, 0xC0 colour-only).
    pub fn cgb_supported(&self) -> bool {
        self.cgb_flag & 0x80 != 0
    }

    /// Unknown type bytes fall back to a plain ROM.
    pub fn mapper_kind(&self) -> MapperKind {
        match self.cart_type {
            0x00 | 0x08 | 0x09 => MapperKind::None,
            0x01..=0x03 => MapperKind::Mbc1,
            0x05 | 0x06 => MapperKind::Mbc2,
            0x0F..=0x13 => MapperKind::Mbc3,
            0x19..=0x1E => MapperKind::Mbc5,
            other => {
                log::warn!("unsupported cartridge type {other:#04X}, treating as ROM only");
                MapperKind::None
            }
        }
    }

    pub fn has_battery(&self) -> bool {
        matches!(
            self.cart_type,
            0x03 | 0x06 | 0x09 | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E
        )
    }

    pub fn has_rtc(&self) -> bool {
        matches!(self.cart_type, 0x0F | 0x10)
    }

    /// External RAM size in bytes.
    ///
    /// MBC2 carries 512 nibbles on-chip regardless of the header. Codes other
    /// than the documented sizes (including the 2 KiB code 0x01) fall back to
    /// 128 KiB.
    pub fn ram_size(&self) -> usize {
        if self.mapper_kind() == MapperKind::Mbc2 {
            return 0x200;
        }
        match self.ram_size_code {
            0x00 => 0,
            0x02 => 0x2000,
            0x03 => 0x8000,
            0x04 => 0x20000,
            0x05 => 0x10000,
            code => {
                log::warn!("unrecognised RAM size code {code:#04X}, assuming 128 KiB");
                0x20000
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_rom() -> Vec<u8> {
        let mut rom = vec![0u8; 0x8000];
        rom[TITLE_START..TITLE_START + 4].copy_from_slice(b"TEST");
        rom[HEADER_CHECKSUM] = compute_header_checksum(&rom);
        rom
    }

    #[test]
    fn parses_title_and_flags() {
        let mut rom = blank_rom();
        rom[CGB_FLAG] = 0x80;
        rom[CART_TYPE] = 0x13;
        rom[HEADER_CHECKSUM] = compute_header_checksum(&rom);
        let header = Header::parse(&rom).unwrap();
        assert_eq!(header.title, "TEST");
        assert!(header.cgb_supported());
        assert_eq!(header.mapper_kind(), MapperKind::Mbc3);
        assert!(header.has_battery());
        assert!(!header.has_rtc());
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let mut rom = blank_rom();
        rom[HEADER_CHECKSUM] ^= 0xFF;
        assert!(matches!(
            Header::parse(&rom),
            Err(LoadError::HeaderChecksum { .. })
        ));
    }

    #[test]
    fn short_image_is_rejected() {
        assert!(matches!(
            Header::parse(&[0u8; 0x100]),
            Err(LoadError::TooSmall { len: 0x100 })
        ));
    }

    #[test]
    fn ram_size_codes() {
        let mut rom = blank_rom();
        let cases = [
            (0x00, 0),
            (0x01, 0x20000),
            (0x02, 0x2000),
            (0x03, 0x8000),
            (0x04, 0x20000),
            (0x05, 0x10000),
            (0x42, 0x20000),
        ];
        for (code, size) in cases {
            rom[RAM_SIZE] = code;
            rom[HEADER_CHECKSUM] = compute_header_checksum(&rom);
            assert_eq!(Header::parse(&rom).unwrap().ram_size(), size, "code {code:#04X}");
        }
    }

    #[test]
    fn mbc2_ram_ignores_size_code() {
        let mut rom = blank_rom();
        rom[CART_TYPE] = 0x06;
        rom[RAM_SIZE] = 0x03;
        rom[HEADER_CHECKSUM] = compute_header_checksum(&rom);
        assert_eq!(Header::parse(&rom).unwrap().ram_size(), 0x200);
    }
}
