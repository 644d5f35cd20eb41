//! Flag arithmetic shared by the opcode groups.
//!
//! Every helper takes the operands plus the current F register and returns the
//! result together with the new F (gbdev.io/pandocs/CPU_Instruction_Set.html).

pub const FLAG_Z: u8 = 0x80;
pub const FLAG_N: u8 = 0x40;
pub const FLAG_H: u8 = 0x20;
pub const FLAG_C: u8 = 0x10;

#[inline]
fn z(val: u8) -> u8 {
    if val == 0 { FLAG_Z } else { 0 }
}

#[inline]
fn flag(cond: bool, bit: u8) -> u8 {
    if cond { bit } else { 0 }
}

/// The eight accumulator operations encoded in bits 3-5 of `0x80..=0xBF` and
/// `0xC6..=0xFE`: ADD, ADC, SUB, SBC, AND, XOR, OR, CP.
pub fn accumulate(op: u8, a: u8, val: u8, f: u8) -> (u8, u8) {
    let carry = f & FLAG_C != 0;
    match op & 0x07 {
        0 => add(a, val, false),
        1 => add(a, val, carry),
        2 => sub(a, val, false),
        3 => sub(a, val, carry),
        4 => {
            let res = a & val;
            (res, z(res) | FLAG_H)
        }
        5 => {
            let res = a ^ val;
            (res, z(res))
        }
        6 => {
            let res = a | val;
            (res, z(res))
        }
        _ => (a, sub(a, val, false).1),
    }
}

fn add(a: u8, val: u8, carry: bool) -> (u8, u8) {
    let c = carry as u16;
    let sum = a as u16 + val as u16 + c;
    let res = sum as u8;
    let half = (a & 0x0F) as u16 + (val & 0x0F) as u16 + c > 0x0F;
    (res, z(res) | flag(half, FLAG_H) | flag(sum > 0xFF, FLAG_C))
}

fn sub(a: u8, val: u8, carry: bool) -> (u8, u8) {
    let c = carry as i16;
    let diff = a as i16 - val as i16 - c;
    let res = diff as u8;
    let half = (a & 0x0F) as i16 - (val & 0x0F) as i16 - c < 0;
    (
        res,
        z(res) | FLAG_N | flag(half, FLAG_H) | flag(diff < 0, FLAG_C),
    )
}

pub fn inc(val: u8, f: u8) -> (u8, u8) {
    let res = val.wrapping_add(1);
    (res, (f & FLAG_C) | z(res) | flag(val & 0x0F == 0x0F, FLAG_H))
}

pub fn dec(val: u8, f: u8) -> (u8, u8) {
    let res = val.wrapping_sub(1);
    (
        res,
        (f & FLAG_C) | FLAG_N | z(res) | flag(val & 0x0F == 0, FLAG_H),
    )
}

/// ADD HL,rr: Z is preserved, H/C come from bits 11/15.
pub fn add16(hl: u16, val: u16, f: u8) -> (u16, u8) {
    let (res, carry) = hl.overflowing_add(val);
    let half = (hl & 0x0FFF) + (val & 0x0FFF) > 0x0FFF;
    (res, (f & FLAG_Z) | flag(half, FLAG_H) | flag(carry, FLAG_C))
}

/// SP plus a signed byte, as used by ADD SP,e and LD HL,SP+e. Flags come
/// from the unsigned low-byte addition.
pub fn add_sp(sp: u16, offset: u8) -> (u16, u8) {
    let res = sp.wrapping_add(offset as i8 as u16);
    let half = (sp & 0x000F) + (offset as u16 & 0x000F) > 0x000F;
    let carry = (sp & 0x00FF) + offset as u16 > 0x00FF;
    (res, flag(half, FLAG_H) | flag(carry, FLAG_C))
}

pub fn daa(a: u8, f: u8) -> (u8, u8) {
    let mut correction = 0u8;
    let mut carry = false;
    let subtract = f & FLAG_N != 0;
    if f & FLAG_H != 0 || (!subtract && a & 0x0F > 0x09) {
        correction |= 0x06;
    }
    if f & FLAG_C != 0 || (!subtract && a > 0x99) {
        correction |= 0x60;
        carry = true;
    }
    let res = if subtract {
        a.wrapping_sub(correction)
    } else {
        a.wrapping_add(correction)
    };
    (res, z(res) | (f & FLAG_N) | flag(carry, FLAG_C))
}

/// The CB-prefixed rotate/shift group selected by bits 3-5: RLC, RRC, RL, RR,
/// SLA, SRA, SWAP, SRL.
pub fn shift(kind: u8, val: u8, f: u8) -> (u8, u8) {
    let carry_in = f & FLAG_C != 0;
    let (res, carry) = match kind & 0x07 {
        0 => (val.rotate_left(1), val & 0x80 != 0),
        1 => (val.rotate_right(1), val & 0x01 != 0),
        2 => ((val << 1) | carry_in as u8, val & 0x80 != 0),
        3 => ((val >> 1) | ((carry_in as u8) << 7), val & 0x01 != 0),
        4 => (val << 1, val & 0x80 != 0),
        5 => ((val >> 1) | (val & 0x80), val & 0x01 != 0),
        6 => (val.rotate_left(4), false),
        _ => (val >> 1, val & 0x01 != 0),
    };
    (res, z(res) | flag(carry, FLAG_C))
}

pub fn bit(index: u8, val: u8, f: u8) -> u8 {
    (f & FLAG_C) | FLAG_H | z(val & (1 << index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adc_half_carry_includes_carry_in() {
        let (res, f) = accumulate(1, 0x0F, 0x00, FLAG_C);
        assert_eq!(res, 0x10);
        assert_eq!(f, FLAG_H);
    }

    #[test]
    fn sbc_borrow_chain() {
        let (res, f) = accumulate(3, 0x00, 0x00, FLAG_C);
        assert_eq!(res, 0xFF);
        assert_eq!(f, FLAG_N | FLAG_H | FLAG_C);
    }

    #[test]
    fn cp_leaves_accumulator() {
        let (res, f) = accumulate(7, 0x42, 0x42, 0);
        assert_eq!(res, 0x42);
        assert_eq!(f, FLAG_Z | FLAG_N);
    }

    #[test]
    fn daa_after_bcd_add_and_sub() {
        // 0x45 + 0x38 = 0x7D -> 0x83
        let (sum, f) = accumulate(0, 0x45, 0x38, 0);
        assert_eq!(daa(sum, f).0, 0x83);
        // 0x83 - 0x38 = 0x4B -> 0x45
        let (diff, f) = accumulate(2, 0x83, 0x38, 0);
        assert_eq!(daa(diff, f).0, 0x45);
        // 0x99 + 0x01 wraps to 0x00 with carry.
        let (sum, f) = accumulate(0, 0x99, 0x01, 0);
        assert_eq!(daa(sum, f), (0x00, FLAG_Z | FLAG_C));
    }

    #[test]
    fn add_sp_uses_low_byte_flags() {
        assert_eq!(add_sp(0x00FF, 0x01), (0x0100, FLAG_H | FLAG_C));
        assert_eq!(add_sp(0x1000, 0xFF), (0x0FFF, 0));
        assert_eq!(add_sp(0x000F, 0xFF), (0x000E, FLAG_H | FLAG_C));
    }

    #[test]
    fn add16_preserves_zero() {
        assert_eq!(add16(0x0FFF, 0x0001, FLAG_Z), (0x1000, FLAG_Z | FLAG_H));
        assert_eq!(add16(0xFFFF, 0x0001, 0), (0x0000, FLAG_H | FLAG_C));
    }

    #[test]
    fn shift_group() {
        assert_eq!(shift(0, 0x80, 0), (0x01, FLAG_C));
        assert_eq!(shift(3, 0x01, 0), (0x00, FLAG_Z | FLAG_C));
        assert_eq!(shift(5, 0x81, 0), (0xC0, FLAG_C));
        assert_eq!(shift(6, 0xA5, FLAG_C), (0x5A, 0));
    }
}
