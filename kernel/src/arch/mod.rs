//! Architecture support. Only 32-bit x86 is implemented; the boot stub in
//! `x86::entry` is the sole entry point.

pub mod x86;
