use dotmatrix_core::config::DEFAULT_DMG_PALETTE;
use dotmatrix_core::cpu::CpuBus;
use dotmatrix_core::hardware::Model;
use dotmatrix_core::mmu::Mmu;
use dotmatrix_core::ppu::{ColorMode, FRAME_DOTS};

fn mmu(model: Model) -> Mmu {
    let mode = if model.is_cgb() {
        ColorMode::Cgb
    } else {
        ColorMode::Dmg
    };
    Mmu::new(model, mode, DEFAULT_DMG_PALETTE, 48_000, false)
}

fn stat_mode(mmu: &Mmu) -> u8 {
    mmu.peek(0xFF41) & 0x03
}

/// Dots between consecutive VBlank requests.
fn vblank_period(mmu: &mut Mmu) -> u64 {
    let mut seen = Vec::new();
    mmu.poke(0xFF0F, 0x00);
    while seen.len() < 3 {
        mmu.idle();
        if mmu.peek(0xFF0F) & 0x01 != 0 {
            seen.push(mmu.dots());
            mmu.poke(0xFF0F, 0x00);
        }
    }
    assert_eq!(seen[2] - seen[1], seen[1] - seen[0]);
    seen[1] - seen[0]
}

#[test]
fn frame_period_is_70224_dots() {
    assert_eq!(vblank_period(&mut mmu(Model::Dmg)), FRAME_DOTS as u64);
    assert_eq!(vblank_period(&mut mmu(Model::Cgb)), FRAME_DOTS as u64);
}

#[test]
fn frame_period_holds_in_double_speed() {
    let mut m = mmu(Model::Cgb);
    m.write(0xFF4D, 0x01);
    assert!(m.stop());
    assert!(m.double_speed());
    assert_eq!(vblank_period(&mut m), FRAME_DOTS as u64);
}

#[test]
fn visible_line_mode_durations() {
    let mut m = mmu(Model::Dmg);
    let mut counts = [0u32; 4];
    // The LCD starts at line 0, dot 0; one sample per M-cycle.
    for _ in 0..114 {
        counts[stat_mode(&m) as usize] += 1;
        m.idle();
    }
    assert_eq!(counts, [54, 0, 20, 40]);
    assert_eq!(m.peek(0xFF44), 1);
    assert_eq!(stat_mode(&m), 2);
}

#[test]
fn vblank_spans_lines_144_to_153() {
    let mut m = mmu(Model::Dmg);
    for _ in 0..(144 * 456 / 4) {
        m.idle();
    }
    assert_eq!(m.peek(0xFF44), 144);
    assert_eq!(stat_mode(&m), 1);
    for _ in 0..(9 * 456 / 4) {
        m.idle();
    }
    assert_eq!(m.peek(0xFF44), 153);
    assert_eq!(stat_mode(&m), 1);
    for _ in 0..(456 / 4) {
        m.idle();
    }
    assert_eq!(m.peek(0xFF44), 0);
    assert_eq!(stat_mode(&m), 2);
}

#[test]
fn lcd_off_parks_at_line_zero_and_restarts() {
    let mut m = mmu(Model::Dmg);
    for _ in 0..1000 {
        m.idle();
    }
    m.write(0xFF40, 0x11);
    assert_eq!(m.peek(0xFF44), 0);
    assert_eq!(stat_mode(&m), 0);
    for _ in 0..1000 {
        m.idle();
    }
    assert_eq!(m.peek(0xFF44), 0);
    m.poke(0xFF0F, 0x00);
    for _ in 0..1000 {
        m.idle();
    }
    assert_eq!(m.peek(0xFF0F) & 0x01, 0, "no VBlank while the LCD is off");

    m.write(0xFF40, 0x91);
    assert_eq!(m.peek(0xFF44), 0);
    assert_eq!(stat_mode(&m), 2);
}
