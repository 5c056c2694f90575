//! Core logic for the Telegram media fetcher.
//!
//! Target resolution, download admission and `/download` orchestration live
//! here. The Telegram client SDK and the chat frontends sit behind ports
//! ([`source::MediaSource`], [`messaging::port::MessagingPort`]) implemented in
//! adapter crates.

pub mod admission;
pub mod config;
pub mod domain;
pub mod download;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod progress;
pub mod security;
pub mod source;
pub mod target;
pub mod utils;

pub use errors::{Error, Result};
