//! Raw memory access
//!
//! [`Pointer`] is an address with no ownership or bounds knowledge. Reads and
//! writes on it are only as sound as the address the caller supplied; the
//! only check performed is the null check.

mod allocator;
mod pointer;

pub use allocator::usable_size;
pub use pointer::Pointer;
