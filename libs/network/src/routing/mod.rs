//! Peer Routing Module
//!
//! Peer target selection for the lifecycle operations.

pub mod selector;

pub use selector::{select_random_with, PeerSelector};
