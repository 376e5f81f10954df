//! Duet virtual machine library.
//!
//! Provides the register machine, its two-machine driver and the ambient
//! logging and configuration used around them.

pub mod config;
pub mod utils;
pub mod virtual_machine;
