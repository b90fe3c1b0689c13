//! Interrupt Descriptor Table: 256 gates, all pointing at a common assembly
//! trampoline that builds the `cpu_state`/`stack_state` frame described in
//! component E and hands off to `crate::irq::dispatch`.
//!
//! Exception vectors that push a hardware error code (8, 10-14, 17) get a
//! stub that skips the extra `push 0`; every other vector's stub pushes a
//! dummy zero so the common trampoline sees a uniform frame layout.

use lazy_static::lazy_static;
use spin::Mutex;
use x86::dtables::{lidt, DescriptorTablePointer};

const IDT_ENTRIES: usize = 256;

const HAS_ERROR_CODE: [bool; 32] = {
    let mut table = [false; 32];
    table[8] = true;
    table[10] = true;
    table[11] = true;
    table[12] = true;
    table[13] = true;
    table[14] = true;
    table[17] = true;
    table
};

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct Gate {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl Gate {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn new(handler: u32) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector: super::gdt::KERNEL_CODE_SELECTOR.bits(),
            zero: 0,
            type_attr: 0x8E, // present, ring0, 32-bit interrupt gate
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

struct Idt([Gate; IDT_ENTRIES]);

unsafe impl Send for Idt {}
unsafe impl Sync for Idt {}

lazy_static! {
    static ref IDT: Mutex<Idt> = Mutex::new(Idt([Gate::missing(); IDT_ENTRIES]));
}

extern "C" {
    /// Base address of the 256 generated interrupt stubs; stub `n` lives at
    /// `isr_stub_table + n * ISR_STUB_SIZE` (see `global_asm!` below).
    static isr_stub_table: u8;
}

const ISR_STUB_SIZE: u32 = 16;

pub fn init() {
    let base = &raw const isr_stub_table as u32;
    let mut idt = IDT.lock();
    for (vector, gate) in idt.0.iter_mut().enumerate() {
        *gate = Gate::new(base + vector as u32 * ISR_STUB_SIZE);
    }
    let ptr = DescriptorTablePointer::new(&idt.0);
    unsafe {
        lidt(&ptr);
    }
}

/// Whether vector `v` pushes a hardware error code (only meaningful for the
/// 0-31 exception range).
pub fn has_error_code(v: u8) -> bool {
    (v as usize) < 32 && HAS_ERROR_CODE[v as usize]
}

core::arch::global_asm!(
    r#"
.align 16
.global isr_stub_table
isr_stub_table:
.set i, 0
.rept 256
.align 16
.if i == 8 || i == 10 || i == 11 || i == 12 || i == 13 || i == 14 || i == 17
    push i
.else
    push 0
    push i
.endif
    jmp isr_common_stub
.set i, i + 1
.endr

isr_common_stub:
    pushad
    mov eax, esp
    push eax
    call isr_dispatch
    pop eax
    popad
    add esp, 8
    iretd
"#
);

#[no_mangle]
extern "C" fn isr_dispatch(frame: *mut u32) {
    crate::irq::dispatch(frame);
}
