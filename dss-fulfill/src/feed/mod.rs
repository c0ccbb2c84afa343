//! Live feed
//!
//! Push channel delivering fulfillment patches from the backend.

pub mod connection;
pub mod message;
pub mod task;
pub mod transport;

pub use connection::{spawn, FeedConfig, LiveFeedHandle};
pub use message::{parse_message, FeedUpdate};
pub use transport::{ChannelTransport, FeedTransport, WsTransport};
