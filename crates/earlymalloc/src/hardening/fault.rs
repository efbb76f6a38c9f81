//! Fault taxonomy for the fatal paths.
//!
//! Every corruption or misuse the arena detects is one of these values. The
//! algorithms return them as `Err`; the public entry points hand them to
//! [`super::fatal`], which never returns.

use thiserror::Error;

/// The caller misused the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClientFault {
    #[error("pointer being freed was not allocated by the early arena")]
    NotOwned,
    #[error("pointer being freed is not aligned to the arena quantum")]
    Misaligned,
    #[error("pointer being freed was never allocated")]
    NotAllocated,
    #[error("double free")]
    DoubleFree,
}

impl ClientFault {
    pub const fn code(self) -> u16 {
        match self {
            ClientFault::NotOwned => 0x0201,
            ClientFault::Misaligned => 0x0202,
            ClientFault::NotAllocated => 0x0203,
            ClientFault::DoubleFree => 0x0204,
        }
    }
}

/// The arena's own invariants no longer hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InternalFault {
    #[error("block metadata is inconsistent")]
    BitmapCorrupted,
    #[error("block changed while waiting for the arena lock")]
    StateChanged,
    #[error("free list link points outside the arena")]
    LinkOutOfBounds,
    #[error("free list links are inconsistent")]
    FreeListCorrupted,
    #[error("failed to reserve the arena")]
    ReserveFailed,
}

impl InternalFault {
    pub const fn code(self) -> u16 {
        match self {
            InternalFault::BitmapCorrupted => 0x0101,
            InternalFault::StateChanged => 0x0102,
            InternalFault::LinkOutOfBounds => 0x0103,
            InternalFault::FreeListCorrupted => 0x0104,
            InternalFault::ReserveFailed => 0x0105,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("internal fault: {0}")]
    Internal(#[from] InternalFault),
    #[error("client fault: {0}")]
    Client(#[from] ClientFault),
}

impl Fault {
    /// Stable diagnostic code: 0x01xx for internal faults, 0x02xx for client faults.
    pub const fn code(self) -> u16 {
        match self {
            Fault::Internal(f) => f.code(),
            Fault::Client(f) => f.code(),
        }
    }

    pub const fn is_client(self) -> bool {
        matches!(self, Fault::Client(_))
    }
}
