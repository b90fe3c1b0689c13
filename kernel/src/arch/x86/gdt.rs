//! Flat 32-bit Global Descriptor Table: kernel code/data, user code/data, TSS.
//!
//! No segmentation is used for protection (everything is base 0, limit 4
//! GiB); rings and page-level protection bits do the real work. The TSS
//! exists solely to hold `esp0`, the ring-0 stack pointer loaded on every
//! ring 3 -> ring 0 transition.

use core::mem::size_of;

use lazy_static::lazy_static;
use spin::Mutex;
use x86::dtables::{lgdt, DescriptorTablePointer};
use x86::segmentation::SegmentSelector;
use x86::Ring;

pub const KERNEL_CODE_SELECTOR: SegmentSelector = SegmentSelector::new(1, Ring::Ring0);
pub const KERNEL_DATA_SELECTOR: SegmentSelector = SegmentSelector::new(2, Ring::Ring0);
pub const USER_CODE_SELECTOR: SegmentSelector = SegmentSelector::new(3, Ring::Ring3);
pub const USER_DATA_SELECTOR: SegmentSelector = SegmentSelector::new(4, Ring::Ring3);
pub const TSS_SELECTOR: SegmentSelector = SegmentSelector::new(5, Ring::Ring0);

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct RawDescriptor {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl RawDescriptor {
    const fn null() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_mid: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }

    const fn flat(access: u8, granularity: u8) -> Self {
        Self {
            limit_low: 0xFFFF,
            base_low: 0,
            base_mid: 0,
            access,
            granularity: granularity | 0x0F,
            base_high: 0,
        }
    }

    fn tss(base: u32, limit: u32) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access: 0x89, // present, ring0, 32-bit TSS (available)
            granularity: (((limit >> 16) & 0x0F) as u8) | 0x00,
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

/// 32-bit Task State Segment. Only `esp0`/`ss0` are kept up to date by this
/// kernel; the rest of the fields are present for hardware-mandated layout.
#[repr(C, packed)]
pub struct Tss {
    prev_tss: u32,
    pub esp0: u32,
    pub ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldt: u32,
    trap: u16,
    iomap_base: u16,
}

impl Tss {
    const fn new() -> Self {
        Self {
            prev_tss: 0,
            esp0: 0,
            ss0: 0,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            fs: 0,
            gs: 0,
            ldt: 0,
            trap: 0,
            iomap_base: size_of::<Tss>() as u16,
        }
    }
}

static TSS: Mutex<Tss> = Mutex::new(Tss::new());

const GDT_ENTRIES: usize = 6;

struct Gdt([RawDescriptor; GDT_ENTRIES]);

unsafe impl Send for Gdt {}
unsafe impl Sync for Gdt {}

lazy_static! {
    static ref GDT: Gdt = {
        let tss = TSS.lock();
        let tss_base = &*tss as *const Tss as u32;
        let tss_limit = size_of::<Tss>() as u32 - 1;
        Gdt([
            RawDescriptor::null(),
            RawDescriptor::flat(0x9A, 0xC0), // kernel code: present, ring0, exec/read
            RawDescriptor::flat(0x92, 0xC0), // kernel data: present, ring0, read/write
            RawDescriptor::flat(0xFA, 0xC0), // user code: present, ring3, exec/read
            RawDescriptor::flat(0xF2, 0xC0), // user data: present, ring3, read/write
            RawDescriptor::tss(tss_base, tss_limit),
        ])
    };
}

pub fn init() {
    let ptr = DescriptorTablePointer::new(&GDT.0);
    unsafe {
        lgdt(&ptr);
        reload_segments();
        load_tss();
    }
}

unsafe fn reload_segments() {
    core::arch::asm!(
        "push {code_sel}",
        "lea {tmp}, [1f + rip]",
        "push {tmp}",
        "retf",
        "1:",
        "mov ax, {data_sel:x}",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "mov ss, ax",
        code_sel = in(reg) KERNEL_CODE_SELECTOR.bits() as u32,
        data_sel = in(reg) KERNEL_DATA_SELECTOR.bits(),
        tmp = out(reg) _,
    );
}

unsafe fn load_tss() {
    core::arch::asm!("ltr {0:x}", in(reg) TSS_SELECTOR.bits(), options(nomem, nostack));
}

/// Updates `esp0` in the TSS; called by the scheduler on every context
/// switch so the next ring 3 -> ring 0 transition lands on the incoming
/// thread's kernel stack.
pub fn set_kernel_stack(esp0: u32) {
    TSS.lock().esp0 = esp0;
}

pub fn get_kernel_stack() -> u32 {
    TSS.lock().esp0
}
