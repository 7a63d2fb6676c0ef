//! Volatile cell that conforms to the RAL's register API
//!
//! Backs the peripheral registers and the 16-bit words of packet memory.
//! Every access is a single volatile load or store of `T`, which is what
//! the packet memory requires: it can't be touched with byte accesses.

use core::cell::UnsafeCell;

#[repr(transparent)]
pub struct VCell<T>(UnsafeCell<T>);

impl<T: Copy> VCell<T> {
    pub fn read(&self) -> T {
        // Safety: the cell is only ever accessed through these two methods,
        // and `T: Copy` rules out tearing ownership.
        unsafe { self.0.get().read_volatile() }
    }
    pub fn write(&self, val: T) {
        unsafe { self.0.get().write_volatile(val) }
    }
}
