//! x86-64 target description, restricted to the 32-bit integer register file.

use derive_more::Display;

/// Physical registers, in register-file order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
pub enum PhysReg {
    #[display("eax")]
    Eax,
    #[display("ebx")]
    Ebx,
    #[display("ecx")]
    Ecx,
    #[display("edx")]
    Edx,
    #[display("esi")]
    Esi,
    #[display("edi")]
    Edi,
    #[display("ebp")]
    Ebp,
    #[display("esp")]
    Esp,
    #[display("r8d")]
    R8d,
    #[display("r9d")]
    R9d,
    #[display("r10d")]
    R10d,
    #[display("r11d")]
    R11d,
    #[display("r12d")]
    R12d,
    #[display("r13d")]
    R13d,
    #[display("r14d")]
    R14d,
    #[display("r15d")]
    R15d,
}

use PhysReg::*;

/// General-purpose registers the allocator may hand out.  The base and stack
/// pointers are reserved for the frame.
pub const ALLOCATABLE: [PhysReg; 14] = [
    Eax, Ebx, Ecx, Edx, Esi, Edi, R8d, R9d, R10d, R11d, R12d, R13d, R14d, R15d,
];

/// The color a precolored vertex for `reg` is seeded with, if allocatable.
pub fn color_of(reg: PhysReg) -> Option<usize> {
    ALLOCATABLE.iter().position(|r| *r == reg)
}

pub fn register_for_color(color: usize) -> Option<PhysReg> {
    ALLOCATABLE.get(color).copied()
}
