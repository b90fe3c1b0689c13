//! Flat kernel error taxonomy.
//!
//! Every fallible kernel operation returns one of these as a small
//! non-negative tag (see the syscall ABI in the design notes); `NO_ERR`
//! is the zero value. Unlike a payload-carrying error type, variants here
//! carry no fields -- debugging context belongs in a `log::warn!`/
//! `log::error!` call at the failure site, not in the error value itself.

use core::fmt;

/// Kernel-wide error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Error {
    /// Success. Not normally constructed directly; `KResult<T>` uses `Ok(T)`.
    NoErr = 0,
    NullPointer,
    IncorrectValue,
    OutOfBound,
    Align,
    Malloc,
    NoMoreFreeMem,
    NoSuchId,
    NoSuchIrq,
    InterruptAlreadyRegistered,
    InterruptNotRegistered,
    UnauthorizedInterruptLine,
    ForbiddenPriority,
    UnauthorizedAction,
    NotInitialized,
    MemoryNotMapped,
    MappingAlreadyExists,
    SyscallUnknown,
    ChecksumFailed,
    WrongSignature,
    NotSupported,
    /// Futex-level signal: the owning thread died while this waiter was
    /// blocked.
    OwnerDied,
}

/// Result alias used throughout the kernel.
pub type KResult<T> = Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoErr => write!(f, "success"),
            Self::NullPointer => write!(f, "null pointer"),
            Self::IncorrectValue => write!(f, "incorrect value"),
            Self::OutOfBound => write!(f, "out of bound"),
            Self::Align => write!(f, "misaligned"),
            Self::Malloc => write!(f, "allocation failed"),
            Self::NoMoreFreeMem => write!(f, "no more free memory"),
            Self::NoSuchId => write!(f, "no such id"),
            Self::NoSuchIrq => write!(f, "no such irq"),
            Self::InterruptAlreadyRegistered => write!(f, "interrupt already registered"),
            Self::InterruptNotRegistered => write!(f, "interrupt not registered"),
            Self::UnauthorizedInterruptLine => write!(f, "unauthorized interrupt line"),
            Self::ForbiddenPriority => write!(f, "forbidden priority"),
            Self::UnauthorizedAction => write!(f, "unauthorized action"),
            Self::NotInitialized => write!(f, "subsystem not initialized"),
            Self::MemoryNotMapped => write!(f, "memory not mapped"),
            Self::MappingAlreadyExists => write!(f, "mapping already exists"),
            Self::SyscallUnknown => write!(f, "unknown syscall"),
            Self::ChecksumFailed => write!(f, "checksum failed"),
            Self::WrongSignature => write!(f, "wrong signature"),
            Self::NotSupported => write!(f, "not supported"),
            Self::OwnerDied => write!(f, "owner died"),
        }
    }
}

/// Converts an `Error` to its wire-level non-negative integer tag.
impl From<Error> for u32 {
    fn from(e: Error) -> u32 {
        e as u32
    }
}
