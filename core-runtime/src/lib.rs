//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the playback core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Player event bus
//!
//! ## Overview
//!
//! This crate holds the ambient pieces every other crate leans on: the
//! `tracing-subscriber` setup, the [`CoreConfig`](config::CoreConfig) builder
//! that wires host bridges into the core, and the broadcast channel the player
//! uses to notify UI and session collaborators.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
