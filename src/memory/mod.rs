//! Accounted heap arena and the mark/sweep collector core.

pub mod heap;

pub use heap::Heap;
