//! Push channel for live collection updates.
//!
//! One [`PushChannelManager`] owns the single physical connection of a
//! process and fans every inbound event out to its subscribers:
//! - Connection lifecycle `Offline -> Connecting -> Online`
//! - Exponential backoff after failures, reset once online
//! - Heartbeat check that tears down silently stalled connections
//! - Grace window before closing once the last subscriber leaves
//!
//! # Example
//!
//! ```ignore
//! let manager = PushChannelManager::new(config, transport, clock);
//! let handle = manager.subscribe_channel(256);
//!
//! // In the host loop
//! manager.pump();
//! manager.tick();
//! for event in handle.drain() {
//!     comments.apply(&event);
//! }
//! ```

mod manager;
mod transport;
mod types;

pub use manager::PushChannelManager;
pub use transport::{ChannelConnection, MemoryTransport, PushConnection, Transport, TransportFrame};
pub use types::{
    ChannelStats, ConnectionState, PushAction, PushEvent, PushHandler, PushRecord,
    SubscriptionHandle, SubscriptionId,
};
