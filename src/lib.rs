//! Reelsmith - assembles generated scene clips and narration into one
//! advertisement video.
//!
//! This library crate exposes config and manifest loading for the binary and
//! its integration tests.

pub mod config;
pub mod manifest;
