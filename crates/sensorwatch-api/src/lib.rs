// sensorwatch-api: transports and wire formats for sensor feed servers

pub mod channel;
pub mod error;
pub mod poll;
pub mod transport;
pub mod wire;

pub use channel::{ChannelEvent, ChannelEventKind, ChannelSink, CloseCode, PushChannel};
pub use error::Error;
pub use poll::PollClient;
pub use transport::{TlsMode, TransportConfig};
