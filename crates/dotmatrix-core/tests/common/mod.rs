use once_cell::sync::OnceCell;
use std::fs;
use std::path::{Path, PathBuf};

use dotmatrix_core::cartridge::{ROM_BANK_SIZE, compute_header_checksum};

#[allow(dead_code)]
static INIT: OnceCell<()> = OnceCell::new();
#[allow(dead_code)]
static LOGGER: OnceCell<()> = OnceCell::new();

#[allow(dead_code)]
pub fn init_logger() {
    LOGGER.get_or_init(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

#[allow(dead_code)]
fn ensure_test_roms() {
    INIT.get_or_init(|| {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("test_roms");
        fs::create_dir_all(&dir).expect("failed to create test_roms directory");

        // ROM binaries are not checked in; fetch the public bundle on demand.
        if dir.join("blargg").exists() {
            return;
        }
        let url = "https://github.com/c-sp/game-boy-test-roms/releases/download/v7.0/game-boy-test-roms-v7.0.zip";
        let resp = reqwest::blocking::get(url).expect("failed to download test roms");
        let status = resp.status();
        if !status.is_success() {
            panic!("failed to download test roms: {status}");
        }
        let bytes = resp.bytes().expect("failed to read rom bytes");
        let reader = std::io::Cursor::new(bytes);
        let mut archive = zip::ZipArchive::new(reader).expect("failed to open zip archive");
        archive.extract(&dir).expect("failed to extract test roms");
    });
}

#[allow(dead_code)]
pub fn rom_path<P: AsRef<Path>>(relative: P) -> PathBuf {
    ensure_test_roms();
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("test_roms")
        .join(relative)
}

/// Header fields for a synthetic cartridge.
#[allow(dead_code)]
#[derive(Clone, Copy)]
pub struct RomSpec<'a> {
    pub title: &'a [u8],
    pub cart_type: u8,
    pub ram_code: u8,
    pub banks: usize,
    pub cgb_flag: u8,
}

impl Default for RomSpec<'_> {
    fn default() -> Self {
        Self {
            title: b"SYNTH",
            cart_type: 0x00,
            ram_code: 0x00,
            banks: 2,
            cgb_flag: 0x00,
        }
    }
}

/// Build an image with a valid header. Byte 0 of every bank after the first
/// holds its bank number so tests can see which bank is mapped.
#[allow(dead_code)]
pub fn build_rom(spec: RomSpec<'_>) -> Vec<u8> {
    let mut rom = vec![0u8; spec.banks * ROM_BANK_SIZE];
    for bank in 1..spec.banks {
        rom[bank * ROM_BANK_SIZE] = bank as u8;
        rom[bank * ROM_BANK_SIZE + 1] = (bank >> 8) as u8;
    }
    rom[0x0134..0x0134 + spec.title.len()].copy_from_slice(spec.title);
    rom[0x0143] = spec.cgb_flag;
    rom[0x0147] = spec.cart_type;
    rom[0x0149] = spec.ram_code;
    rom[0x014D] = compute_header_checksum(&rom);
    let sum = rom
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 0x014E && *i != 0x014F)
        .fold(0u16, |acc, (_, &b)| acc.wrapping_add(b as u16));
    rom[0x014E..0x0150].copy_from_slice(&sum.to_be_bytes());
    rom
}

/// Place `code` at `addr` and refresh the checksums.
#[allow(dead_code)]
pub fn with_code(mut rom: Vec<u8>, addr: usize, code: &[u8]) -> Vec<u8> {
    rom[addr..addr + code.len()].copy_from_slice(code);
    rom[0x014D] = compute_header_checksum(&rom);
    rom
}

/// Background patterns drawn by [`pattern_rom`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(dead_code)]
pub enum Pattern {
    /// 8×8 checkerboard, static.
    Checker,
    /// Horizontal 8-pixel stripes; the VBlank handler also scrolls SCX.
    Stripes,
}

/// A DMG program that fills the background map with `pattern`, enables the
/// VBlank interrupt and counts frames in HRAM 0xFF80 from the handler.
#[allow(dead_code)]
pub fn pattern_rom(pattern: Pattern) -> Vec<u8> {
    let tile_select: [u8; 3] = match pattern {
        Pattern::Checker => [0x83, 0xE6, 0x01], // ADD A,E; AND 1
        Pattern::Stripes => [0xE6, 0x01, 0x00], // AND 1; NOP
    };
    #[rustfmt::skip]
    let mut main = vec![
        0xF3,                   // 0150 DI
        0xF0, 0x44,             // 0151 LDH A,(LY)
        0xFE, 0x90,             // 0153 CP 144
        0x38, 0xFA,             // 0155 JR C,0151
        0xAF,                   // 0157 XOR A
        0xE0, 0x40,             // 0158 LDH (LCDC),A
        0x21, 0x10, 0x80,       // 015A LD HL,8010
        0x06, 0x10,             // 015D LD B,16
        0x3E, 0xFF,             // 015F LD A,FF
        0x22,                   // 0161 LD (HL+),A
        0x05,                   // 0162 DEC B
        0x20, 0xFC,             // 0163 JR NZ,0161
        0x21, 0x00, 0x98,       // 0165 LD HL,9800
        0x16, 0x00,             // 0168 LD D,0
        0x1E, 0x00,             // 016A LD E,0
        0x7A,                   // 016C LD A,D
    ];
    main.extend_from_slice(&tile_select); // 016D
    #[rustfmt::skip]
    let tail = [
        0x22,                   // 0170 LD (HL+),A
        0x1C,                   // 0171 INC E
        0x7B,                   // 0172 LD A,E
        0xFE, 0x20,             // 0173 CP 32
        0x20, 0xF5,             // 0175 JR NZ,016C
        0x14,                   // 0177 INC D
        0x7A,                   // 0178 LD A,D
        0xFE, 0x20,             // 0179 CP 32
        0x20, 0xED,             // 017B JR NZ,016A
        0x3E, 0xE4,             // 017D LD A,E4
        0xE0, 0x47,             // 017F LDH (BGP),A
        0x3E, 0x91,             // 0181 LD A,91
        0xE0, 0x40,             // 0183 LDH (LCDC),A
        0x3E, 0x01,             // 0185 LD A,1
        0xE0, 0xFF,             // 0187 LDH (IE),A
        0xAF,                   // 0189 XOR A
        0xE0, 0x0F,             // 018A LDH (IF),A
        0xFB,                   // 018C EI
        0x76,                   // 018D HALT
        0x00,                   // 018E NOP
        0x18, 0xFC,             // 018F JR 018D
    ];
    main.extend_from_slice(&tail);
    let handler: &[u8] = match pattern {
        // PUSH AF; LDH A,(80); INC A; LDH (80),A; POP AF; RETI
        Pattern::Checker => &[0xF5, 0xF0, 0x80, 0x3C, 0xE0, 0x80, 0xF1, 0xD9],
        // ... plus LDH (SCX),A
        Pattern::Stripes => &[0xF5, 0xF0, 0x80, 0x3C, 0xE0, 0x80, 0xE0, 0x43, 0xF1, 0xD9],
    };
    let title: &[u8] = match pattern {
        Pattern::Checker => b"CHECKER",
        Pattern::Stripes => b"STRIPES",
    };
    let rom = build_rom(RomSpec {
        title,
        ..RomSpec::default()
    });
    let rom = with_code(rom, 0x0040, handler);
    let rom = with_code(rom, 0x0100, &[0x00, 0xC3, 0x50, 0x01]);
    with_code(rom, 0x0150, &main)
}

/// FNV-1a over the framebuffer's little-endian bytes.
#[allow(dead_code)]
pub fn frame_hash(frame: &[u16]) -> u64 {
    frame
        .iter()
        .flat_map(|px| px.to_le_bytes())
        .fold(0xCBF2_9CE4_8422_2325u64, |hash, b| {
            (hash ^ b as u64).wrapping_mul(0x0000_0100_0000_01B3)
        })
}

#[allow(dead_code)]
pub fn serial_contains_result(serial: &[u8], checked_up_to: &mut usize) -> bool {
    const PASSED: &[u8] = b"Passed";
    const FAILED: &[u8] = b"Failed";

    let lookbehind = PASSED.len().max(FAILED.len()).saturating_sub(1);
    let start = checked_up_to.saturating_sub(lookbehind).min(serial.len());
    let window = &serial[start..];

    let found = window.windows(PASSED.len()).any(|chunk| chunk == PASSED)
        || window.windows(FAILED.len()).any(|chunk| chunk == FAILED);

    *checked_up_to = serial.len();
    found
}
