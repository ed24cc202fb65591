//! Workspace façade crate.
//!
//! Re-exports the individual workspace crates so a host application can depend
//! on `tome-workspace` alone. The `desktop-shims` feature pulls in the
//! `reqwest`-backed adapters from `bridge-desktop`.

pub use bridge_traits;
pub use core_playback;
pub use core_runtime;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;

pub use core_playback::{Book, Player, PlaybackError, PlaybackState};
