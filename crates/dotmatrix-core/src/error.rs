use thiserror::Error;

/// Cartridge image rejected at load time. The machine keeps whatever cartridge
/// (or lack of one) it had before the failed call.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("ROM image is {len} bytes, too small to contain a cartridge header")]
    TooSmall { len: usize },

    #[error("header checksum mismatch: header says {expected:#04X}, computed {computed:#04X}")]
    HeaderChecksum { expected: u8, computed: u8 },

    #[error("failed to read ROM image: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal processor condition. Emulation cannot continue past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("illegal opcode {opcode:#04X} at {pc:#06X}")]
    IllegalOpcode { opcode: u8, pc: u16 },
}

/// Save-state blob that does not fit the running machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("not a save state (bad magic)")]
    BadMagic,

    #[error("save state is truncated")]
    Truncated,

    #[error("save state body length mismatch: header says {expected}, decoded {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("save state is missing its end marker")]
    MissingEndMarker,

    #[error("save state was taken on a different hardware model")]
    ModelMismatch,

    #[error("save state belongs to a different cartridge")]
    CartridgeMismatch,

    #[error("no cartridge loaded")]
    NoCartridge,

    #[error("invalid value {value:#X} for {field}")]
    InvalidValue { field: &'static str, value: u32 },
}
