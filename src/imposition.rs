//! Print imposition: fitting cards onto fixed-size sheets.

pub mod assembler;
pub mod layout;
