use std::fmt::{self, Display};

use serde::Serialize;

use crate::addr::Addr;
use crate::errors::{AnalysisError, Result};

/// How the bytes of an [`ArgValue`] are meant to be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValueClass {
    Integer,
    Float,
}

/// A machine value of 1, 2, 4 or 8 bytes, or an unknown value of size 0
///
/// The bytes are kept in target byte order. Accessors check the class and size instead of
/// reinterpreting bits, a deliberate reinterpretation goes through [`ArgValue::into_float`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ArgValue {
    bytes: [u8; 8],
    size: u8,
    class: ValueClass,
}

impl ArgValue {
    pub fn unknown() -> Self {
        Self {
            bytes: [0; 8],
            size: 0,
            class: ValueClass::Integer,
        }
    }

    fn from_raw(raw: &[u8], class: ValueClass) -> Self {
        if !matches!(raw.len(), 1 | 2 | 4 | 8) {
            return Self::unknown();
        }
        let mut bytes = [0u8; 8];
        bytes[..raw.len()].copy_from_slice(raw);
        Self {
            bytes,
            size: raw.len() as u8,
            class,
        }
    }

    /// An integer from its raw target bytes
    pub fn integer(raw: &[u8]) -> Self {
        Self::from_raw(raw, ValueClass::Integer)
    }

    /// A `float` (4 bytes) or `double` (8 bytes) from its raw target bytes
    pub fn float(raw: &[u8]) -> Self {
        match raw.len() {
            4 | 8 => Self::from_raw(raw, ValueClass::Float),
            _ => Self::unknown(),
        }
    }

    pub fn word(value: usize) -> Self {
        Self::integer(&value.to_ne_bytes())
    }

    pub fn double(value: f64) -> Self {
        Self::float(&value.to_ne_bytes())
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    pub fn class(&self) -> ValueClass {
        self.class
    }

    pub fn is_unknown(&self) -> bool {
        self.size == 0
    }

    /// The significant bytes
    pub fn raw(&self) -> &[u8] {
        &self.bytes[..self.size()]
    }

    /// The same bytes, to be read as a floating point value
    pub fn into_float(self) -> Self {
        Self::float(self.raw())
    }

    /// The integer value, zero extended
    ///
    /// # Errors
    ///
    /// Fails for unknown and floating point values.
    pub fn as_u64(&self) -> Result<u64> {
        if self.class != ValueClass::Integer || self.is_unknown() {
            return Err(self.mismatch("an integer"));
        }
        Ok(match self.size {
            1 => u64::from(self.bytes[0]),
            2 => u64::from(u16::from_ne_bytes([self.bytes[0], self.bytes[1]])),
            4 => u64::from(u32::from_ne_bytes([
                self.bytes[0],
                self.bytes[1],
                self.bytes[2],
                self.bytes[3],
            ])),
            _ => u64::from_ne_bytes(self.bytes),
        })
    }

    /// The integer value, sign extended
    ///
    /// # Errors
    ///
    /// Fails for unknown and floating point values.
    pub fn as_i64(&self) -> Result<i64> {
        let value = self.as_u64()?;
        let shift = 64 - 8 * u32::from(self.size);
        Ok(((value << shift) as i64) >> shift)
    }

    /// The value as a pointer
    ///
    /// # Errors
    ///
    /// Fails for unknown and floating point values.
    pub fn as_addr(&self) -> Result<Addr> {
        Ok(Addr::from(self.as_u64()?))
    }

    /// The floating point value, widened to `f64`
    ///
    /// # Errors
    ///
    /// Fails for unknown and integer values.
    pub fn as_f64(&self) -> Result<f64> {
        match (self.class, self.size) {
            (ValueClass::Float, 8) => Ok(f64::from_ne_bytes(self.bytes)),
            (ValueClass::Float, 4) => Ok(f64::from(f32::from_ne_bytes([
                self.bytes[0],
                self.bytes[1],
                self.bytes[2],
                self.bytes[3],
            ]))),
            _ => Err(self.mismatch("a floating point number")),
        }
    }

    fn mismatch(&self, requested: &'static str) -> AnalysisError {
        AnalysisError::ValueTag {
            size: self.size(),
            requested,
        }
    }
}

impl Default for ArgValue {
    fn default() -> Self {
        Self::unknown()
    }
}

impl Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            return write!(f, "<unknown>");
        }
        match (self.class, self.as_f64(), self.as_u64()) {
            (ValueClass::Float, Ok(value), _) => write!(f, "{value:.6}"),
            (_, _, Ok(value)) => write!(f, "{value:#x}"),
            _ => write!(f, "<unknown>"),
        }
    }
}
