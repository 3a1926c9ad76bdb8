//! Channel contract and the gateway that multiplexes I/O across channels.

pub mod allow;
pub mod channel;
pub mod error;
pub mod gateway;

pub use allow::is_allowed;
pub use channel::Channel;
pub use error::ChannelError;
pub use gateway::{ChannelGateway, MessageProcessor};
