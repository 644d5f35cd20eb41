#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
/// Emulated console model.
///
/// Fixed when a cartridge is loaded; it decides which register blocks exist
/// (VRAM/WRAM banking, colour palettes, speed switch) and the post-boot CPU
/// register values.
pub enum Model {
    #[default]
    Dmg,
    Cgb,
}

impl Model {
    #[inline]
    pub const fn is_cgb(self) -> bool {
        matches!(self, Model::Cgb)
    }

    pub(crate) const fn to_byte(self) -> u8 {
        match self {
            Model::Dmg => 0,
            Model::Cgb => 1,
        }
    }
}

/// CPU registers as left by the boot ROM (gbdev.io/pandocs/Power_Up_State.html).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootRegisters {
    pub af: u16,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub sp: u16,
    pub pc: u16,
}

const DMG_BOOT: BootRegisters = BootRegisters {
    af: 0x01B0,
    bc: 0x0013,
    de: 0x00D8,
    hl: 0x014D,
    sp: 0xFFFE,
    pc: 0x0100,
};

const CGB_BOOT: BootRegisters = BootRegisters {
    af: 0x1180,
    bc: 0x0000,
    de: 0xFF56,
    hl: 0x000D,
    sp: 0xFFFE,
    pc: 0x0100,
};

impl BootRegisters {
    pub const fn for_model(model: Model) -> Self {
        match model {
            Model::Dmg => DMG_BOOT,
            Model::Cgb => CGB_BOOT,
        }
    }
}
