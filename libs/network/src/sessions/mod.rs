//! Session Brokering
//!
//! Session construction performs network handshakes, so sessions are
//! memoized per identity and per (identity, channel) for the lifetime of
//! the broker that owns them.

pub mod broker;
pub mod cache;
pub mod clients;

pub use broker::SessionBroker;
pub use cache::KeyedCache;
pub use clients::{ChannelClient, ResourceMgmtClient};
