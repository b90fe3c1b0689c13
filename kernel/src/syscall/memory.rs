//! PAGE_ALLOC: maps one fresh page at a caller-given virtual address.

use crate::error::Error;
use crate::mm::{vmm, VirtAddr, PAGE_SIZE};

const FLAG_READ_ONLY: u32 = 0x1;
const FLAG_EXEC: u32 = 0x2;

pub fn sys_page_alloc(vaddr: u32, flags: u32) -> Result<u32, Error> {
    if vaddr == 0 {
        return Err(Error::NullPointer);
    }
    let virt = VirtAddr::new(vaddr);
    if virt.page_offset() != 0 {
        return Err(Error::Align);
    }
    vmm::kmap(virt, PAGE_SIZE, flags & FLAG_READ_ONLY != 0, flags & FLAG_EXEC != 0)?;
    Ok(0)
}
