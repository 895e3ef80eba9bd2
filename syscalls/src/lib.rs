#![no_std]

pub mod defs;

pub use defs::*;
