//! Census and school district map explorer library
//!
//! Re-exports modules for use by the binary and tools.

pub mod config;
pub mod controller;
pub mod describe;
pub mod explorer;
pub mod export;
pub mod features;
pub mod fips;
pub mod focus;
pub mod format;
pub mod gradient;
pub mod index;
pub mod layers;
pub mod records;
pub mod session;
pub mod sources;
pub mod surface;
