use std::fmt::Display;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::Serialize;

use crate::{Word, WORD_BYTES};

/// A virtual address inside the analyzed process
#[derive(Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
pub struct Addr(usize);

impl Addr {
    pub const NULL: Addr = Addr(0);
    pub const MAX: Addr = Addr(usize::MAX);

    pub fn usize(&self) -> usize {
        self.0
    }
    pub fn u64(&self) -> u64 {
        self.0 as u64
    }
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Whether the address sits on a machine word boundary
    pub fn is_word_aligned(&self) -> bool {
        self.0 & (WORD_BYTES - 1) == 0
    }

    /// Adds a signed displacement, wrapping like the target's own pointer arithmetic
    pub fn offset(&self, displacement: i64) -> Addr {
        Addr(self.0.wrapping_add(displacement as usize))
    }

    pub fn checked_add(&self, rhs: usize) -> Option<Addr> {
        self.0.checked_add(rhs).map(Addr)
    }

    pub fn checked_sub(&self, rhs: usize) -> Option<Addr> {
        self.0.checked_sub(rhs).map(Addr)
    }

    /// Address of the `index`-th machine word after this one
    pub fn word(&self, index: usize) -> Addr {
        Addr(self.0.wrapping_add(index.wrapping_mul(WORD_BYTES)))
    }
}

impl Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", { self.0 })
    }
}

impl std::fmt::Debug for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl std::fmt::LowerHex for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add for Addr {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl Add<usize> for Addr {
    type Output = Self;
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<usize> for Addr {
    fn add_assign(&mut self, rhs: usize) {
        self.0 = self.0.wrapping_add(rhs)
    }
}

impl SubAssign<usize> for Addr {
    fn sub_assign(&mut self, rhs: usize) {
        self.0 = self.0.wrapping_sub(rhs)
    }
}

impl Sub for Addr {
    type Output = usize;
    fn sub(self, rhs: Self) -> Self::Output {
        self.0.wrapping_sub(rhs.0)
    }
}

impl Sub<usize> for Addr {
    type Output = Self;
    fn sub(self, rhs: usize) -> Self::Output {
        Self(self.0.wrapping_sub(rhs))
    }
}

impl From<usize> for Addr {
    fn from(value: usize) -> Self {
        Addr(value)
    }
}

impl From<u64> for Addr {
    fn from(value: u64) -> Self {
        Addr(value as usize)
    }
}

impl From<Addr> for u64 {
    fn from(value: Addr) -> Self {
        value.0 as u64
    }
}

impl From<Addr> for Word {
    fn from(value: Addr) -> Self {
        value.0
    }
}
