//! # Jukebox Player Library
//!
//! Shared playback queue and the loop that plays it through an external
//! player.
//!
//! - [`queue`]: ordered queue store with slug allocation and pluggable scheduling
//! - [`player`]: player process lifecycle and correlated JSON IPC
//! - [`playback`]: dequeue / stage / start gate / play cycle
//! - [`collaborators`]: metadata resolver, asset renderer, start prompts
//! - [`api`]: HTTP control surface

pub mod api;
pub mod collaborators;
pub mod playback;
pub mod player;
pub mod queue;

pub use jukebox_common::{Error, Result};
