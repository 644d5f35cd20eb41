//! MBC3 real-time clock.
//!
//! The clock runs on wall time, not on emulated cycles: the owner feeds it
//! caller-supplied timestamps through [`Rtc::sync`] and the counters advance by
//! the delta since the previous timestamp.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::StateError;
use crate::state::{Snapshot, StateReader, StateWriter};

const NANOS_PER_SECOND: u32 = 1_000_000_000;
const DAY_MASK: u16 = 0x01FF;

/// Size of the clock trailer appended to battery RAM: current and latched
/// registers as five little-endian `u32`s each, then the last sync time as a
/// little-endian `u64` of UNIX seconds.
pub const RTC_TRAILER_LEN: usize = 48;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtcRegisters {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    /// 9-bit day counter.
    pub days: u16,
    pub halt: bool,
    pub carry: bool,
}

impl RtcRegisters {
    /// RTC DH: bit 0 day bit 8, bit 6 halt, bit 7 day carry.
    pub fn control_byte(&self) -> u8 {
        let mut out = ((self.days >> 8) as u8) & 0x01;
        if self.halt {
            out |= 0x40;
        }
        if self.carry {
            out |= 0x80;
        }
        out
    }

    fn raw(&self) -> [u8; 5] {
        [
            self.seconds,
            self.minutes,
            self.hours,
            self.days as u8,
            self.control_byte(),
        ]
    }

    /// Count `seconds` forward, carrying into minutes, hours and days. The
    /// day carry flag sticks once the 9-bit day counter overflows.
    fn add_seconds(&mut self, seconds: u64) {
        let minutes = roll(&mut self.seconds, 60, 0x3F, seconds);
        let hours = roll(&mut self.minutes, 60, 0x3F, minutes);
        let days = roll(&mut self.hours, 24, 0x1F, hours);
        let total = self.days as u64 + days;
        if total > DAY_MASK as u64 {
            self.carry = true;
        }
        self.days = (total & DAY_MASK as u64) as u16;
    }

    fn from_raw(raw: [u8; 5]) -> Self {
        Self {
            seconds: raw[0] & 0x3F,
            minutes: raw[1] & 0x3F,
            hours: raw[2] & 0x1F,
            days: raw[3] as u16 | (((raw[4] & 0x01) as u16) << 8),
            halt: raw[4] & 0x40 != 0,
            carry: raw[4] & 0x80 != 0,
        }
    }
}

/// Add `n` to a counter that rolls over at `modulus` and return the number
/// of rollovers. A value already past `modulus` (games can write one) first
/// runs up to its register width and wraps to zero with no carry out.
fn roll(field: &mut u8, modulus: u64, mask: u8, mut n: u64) -> u64 {
    let mut value = *field as u64;
    if value >= modulus {
        let to_wrap = mask as u64 + 1 - value;
        if n < to_wrap {
            *field = (value + n) as u8;
            return 0;
        }
        n -= to_wrap;
        value = 0;
    }
    let total = value + n;
    *field = (total % modulus) as u8;
    total / modulus
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rtc {
    regs: RtcRegisters,
    latched: RtcRegisters,
    /// Timestamp of the previous sync; `None` until the first one.
    last_update: Option<SystemTime>,
    subsecond_nanos: u32,
}

impl Default for Rtc {
    fn default() -> Self {
        Self::new()
    }
}

impl Rtc {
    pub fn new() -> Self {
        Self {
            regs: RtcRegisters::default(),
            latched: RtcRegisters::default(),
            last_update: None,
            subsecond_nanos: 0,
        }
    }

    pub fn registers(&self) -> RtcRegisters {
        self.regs
    }

    pub fn latched(&self) -> RtcRegisters {
        self.latched
    }

    pub fn latch(&mut self) {
        self.latched = self.regs;
    }

    pub fn read_latched(&self, reg: u8) -> u8 {
        match reg {
            0x08 => self.latched.seconds & 0x3F,
            0x09 => self.latched.minutes & 0x3F,
            0x0A => self.latched.hours & 0x1F,
            0x0B => (self.latched.days & 0x00FF) as u8,
            0x0C => self.latched.control_byte() | 0x3E,
            _ => 0xFF,
        }
    }

    pub fn write_register(&mut self, reg: u8, value: u8) {
        match reg {
            0x08 => {
                self.regs.seconds = value & 0x3F;
                self.subsecond_nanos = 0;
            }
            0x09 => self.regs.minutes = value & 0x3F,
            0x0A => self.regs.hours = value & 0x1F,
            0x0B => self.regs.days = (self.regs.days & 0x0100) | value as u16,
            0x0C => {
                self.regs.days = (self.regs.days & 0x00FF) | (((value & 0x01) as u16) << 8);
                self.regs.halt = value & 0x40 != 0;
                self.regs.carry = value & 0x80 != 0;
            }
            _ => {}
        }
    }

    /// Advance by the wall time elapsed since the previous sync. Time that
    /// passes while halted is dropped; a clock going backwards is ignored.
    pub fn sync(&mut self, now: SystemTime) {
        let Some(prev) = self.last_update.replace(now) else {
            return;
        };
        if self.regs.halt {
            return;
        }
        let elapsed = now.duration_since(prev).unwrap_or_default();
        self.advance(elapsed);
    }

    pub fn advance(&mut self, elapsed: Duration) {
        if self.regs.halt {
            return;
        }
        let mut seconds = elapsed.as_secs();
        let mut sub = self.subsecond_nanos + elapsed.subsec_nanos();
        if sub >= NANOS_PER_SECOND {
            sub -= NANOS_PER_SECOND;
            seconds += 1;
        }
        self.subsecond_nanos = sub;
        if seconds > 0 {
            self.regs.add_seconds(seconds);
        }
    }

    pub fn to_trailer(&self) -> [u8; RTC_TRAILER_LEN] {
        let mut out = [0u8; RTC_TRAILER_LEN];
        for (i, b) in self.regs.raw().into_iter().enumerate() {
            out[i * 4] = b;
        }
        for (i, b) in self.latched.raw().into_iter().enumerate() {
            out[20 + i * 4] = b;
        }
        let secs = self
            .last_update
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        out[40..48].copy_from_slice(&secs.to_le_bytes());
        out
    }

    pub fn load_trailer(&mut self, data: &[u8; RTC_TRAILER_LEN]) {
        let pick = |base: usize| {
            let mut raw = [0u8; 5];
            for (i, r) in raw.iter_mut().enumerate() {
                *r = data[base + i * 4];
            }
            raw
        };
        self.regs = RtcRegisters::from_raw(pick(0));
        self.latched = RtcRegisters::from_raw(pick(20));
        let mut secs = [0u8; 8];
        secs.copy_from_slice(&data[40..48]);
        let secs = u64::from_le_bytes(secs);
        self.last_update = match secs {
            0 => None,
            _ => {
                let time = UNIX_EPOCH.checked_add(Duration::from_secs(secs));
                if time.is_none() {
                    log::warn!("battery clock timestamp {secs} out of range; clock restarts");
                }
                time
            }
        };
        self.subsecond_nanos = 0;
    }
}

impl Snapshot for Rtc {
    fn save_state(&self, w: &mut StateWriter) {
        w.write_bytes(&self.regs.raw());
        w.write_bytes(&self.latched.raw());
        match self.last_update.and_then(|t| t.duration_since(UNIX_EPOCH).ok()) {
            Some(d) => {
                w.write_bool(true);
                w.write_u64(d.as_secs());
                w.write_u32(d.subsec_nanos());
            }
            None => {
                w.write_bool(false);
                w.write_u64(0);
                w.write_u32(0);
            }
        }
        w.write_u32(self.subsecond_nanos);
    }

    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError> {
        let mut raw = [0u8; 5];
        r.read_into(&mut raw)?;
        self.regs = RtcRegisters::from_raw(raw);
        r.read_into(&mut raw)?;
        self.latched = RtcRegisters::from_raw(raw);
        let has_time = r.read_bool()?;
        let secs = r.read_u64()?;
        let nanos = r.read_u32()?.min(NANOS_PER_SECOND - 1);
        self.last_update = if has_time {
            let time = UNIX_EPOCH.checked_add(Duration::new(secs, nanos));
            Some(time.ok_or(StateError::InvalidValue {
                field: "rtc timestamp",
                value: secs.min(u32::MAX as u64) as u32,
            })?)
        } else {
            None
        };
        self.subsecond_nanos = r.read_u32()?.min(NANOS_PER_SECOND - 1);
        Ok(())
    }
}
