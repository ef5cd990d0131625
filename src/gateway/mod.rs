//! Gateway Module
//!
//! Persistent real-time connection: websocket transport, handshake and
//! reconnect state machine, heartbeating, session resume bookkeeping and
//! event fan-out.

pub mod backoff;
pub mod connection;
pub mod dispatch;
pub mod heartbeat;
pub mod messages;
pub mod session;
pub mod transport;

pub use connection::{ConnectionStatus, GatewayConfig, GatewayConnection};
pub use dispatch::{Dispatcher, Event, ListenerHandle};
pub use messages::{GatewayFrame, GatewayMessage, IdentifyProperties, OpCode};
pub use session::Session;
pub use transport::{Connector, Transport, TransportEvent, TungsteniteConnector};
