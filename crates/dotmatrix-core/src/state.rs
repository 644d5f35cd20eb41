//! Deterministic save-state encoding.
//!
//! Every stateful component implements [`Snapshot`] and writes its fields in a
//! fixed order. The blob is framed as:
//!
//! ```text
//! "DMXS" | body length (u32 LE) | body | "END!"
//! ```
//!
//! The framing is only there to reject foreign or damaged blobs; the body
//! itself is not self-describing, so a restore requires the same layout that
//! produced it.

use crate::error::StateError;

pub const STATE_MAGIC: &[u8; 4] = b"DMXS";
pub const STATE_END: &[u8; 4] = b"END!";

/// Ordered field-by-field (de)serialization.
pub trait Snapshot {
    fn save_state(&self, w: &mut StateWriter);
    fn load_state(&mut self, r: &mut StateReader<'_>) -> Result<(), StateError>;
}

#[derive(Default)]
pub struct StateWriter {
    buf: Vec<u8>,
}

impl StateWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Bit-exact, so filter state survives a round trip unchanged.
    pub fn write_f32(&mut self, v: f32) {
        self.write_u32(v.to_bits());
    }

    /// Raw bytes; the reader must know the length.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u16_slice(&mut self, values: &[u16]) {
        for &v in values {
            self.write_u16(v);
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Wrap the body in the magic/length/end-marker frame.
    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.buf.len() + 12);
        out.extend_from_slice(STATE_MAGIC);
        out.extend_from_slice(&(self.buf.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.buf);
        out.extend_from_slice(STATE_END);
        out
    }
}

pub struct StateReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StateReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Validate the frame written by [`StateWriter::finish`] and return a
    /// reader over the body.
    pub fn open(blob: &'a [u8]) -> Result<Self, StateError> {
        if blob.len() < 4 || &blob[..4] != STATE_MAGIC {
            return Err(StateError::BadMagic);
        }
        if blob.len() < 8 {
            return Err(StateError::Truncated);
        }
        let len = u32::from_le_bytes([blob[4], blob[5], blob[6], blob[7]]) as usize;
        let body_end = 8usize.checked_add(len).ok_or(StateError::Truncated)?;
        if blob.len() < body_end + STATE_END.len() {
            return Err(StateError::Truncated);
        }
        if &blob[body_end..body_end + STATE_END.len()] != STATE_END {
            return Err(StateError::MissingEndMarker);
        }
        if blob.len() != body_end + STATE_END.len() {
            return Err(StateError::LengthMismatch {
                expected: len,
                actual: blob.len() - 8 - STATE_END.len(),
            });
        }
        Ok(Self::new(&blob[8..body_end]))
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Errors unless the whole body was consumed.
    pub fn finish(&self) -> Result<(), StateError> {
        if self.remaining() != 0 {
            return Err(StateError::LengthMismatch {
                expected: self.data.len(),
                actual: self.pos,
            });
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], StateError> {
        if self.remaining() < n {
            return Err(StateError::Truncated);
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn read_u8(&mut self) -> Result<u8, StateError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, StateError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(StateError::InvalidValue {
                field: "bool",
                value: v as u32,
            }),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, StateError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, StateError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, StateError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn read_f32(&mut self) -> Result<f32, StateError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Fill `dst` from the stream; its length is the field's fixed size.
    pub fn read_into(&mut self, dst: &mut [u8]) -> Result<(), StateError> {
        let src = self.take(dst.len())?;
        dst.copy_from_slice(src);
        Ok(())
    }

    pub fn read_u16_into(&mut self, dst: &mut [u16]) -> Result<(), StateError> {
        for v in dst.iter_mut() {
            *v = self.read_u16()?;
        }
        Ok(())
    }

    /// Reads a `u8` that must be below `limit`.
    pub fn read_bounded(&mut self, field: &'static str, limit: u8) -> Result<u8, StateError> {
        let v = self.read_u8()?;
        if v >= limit {
            return Err(StateError::InvalidValue {
                field,
                value: v as u32,
            });
        }
        Ok(v)
    }
}
