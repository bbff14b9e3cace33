use serde::Serialize;

use crate::addr::Addr;

/// Known extent of a thread's stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StackBounds {
    pub base: Addr,
    pub size: usize,
}

/// The registers of one thread that the unwinder starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Thread {
    pub id: i32,
    pub fp: Addr,
    pub sp: Addr,
    pub ip: Addr,
    pub stack: Option<StackBounds>,
}

impl Thread {
    pub fn new(id: i32, fp: Addr, sp: Addr, ip: Addr) -> Self {
        Self {
            id,
            fp,
            sp,
            ip,
            stack: None,
        }
    }

    /// First address above the stack, or the end of the address space if unknown
    pub fn stack_limit(&self) -> Addr {
        match self.stack {
            Some(bounds) => bounds.base + bounds.size,
            None => Addr::MAX,
        }
    }
}
