#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod config;
pub mod msc;
pub mod storage;
pub mod usb;
pub mod vcp;

#[cfg(test)]
pub(crate) mod testutil;
