mod arrayvec;
#[macro_use]
mod assert;

pub use arrayvec::{ArrayStr, ArrayVec};
