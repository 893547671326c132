//! Push connection
//!
//! One persistent bidirectional connection carries live updates for every
//! thread: new messages, new threads and the agent's typing state.
//!
//! ## Protocol
//!
//! 1. Open the link (WebSocket upgrade, bearer token if configured)
//! 2. Join the user's personal room and every subscribed thread room
//! 3. Exchange named JSON events until the link drops
//! 4. Reconnect and join again; the server forgets rooms with the link
//!
//! ## Usage
//!
//! ```ignore
//! let transport = Arc::new(WebSocketTransport::new("wss://support.example.com/ws", token));
//! let connection = ConnectionManager::new(transport, config.connection_config());
//! connection.join_thread("t-1");
//! connection.connect();
//! ```

mod manager;
mod message;
mod transport;

pub use manager::{ConnectionConfig, ConnectionManager, ConnectionState, Handler, Subscription};
pub use message::{events, ClientEvent, Envelope, ServerEvent};
pub use transport::{ConnectionError, Link, Transport, WebSocketTransport};

/// Outgoing event sink
///
/// Implemented by [`ConnectionManager`]; components that only emit (the
/// typing coordinator) depend on this instead of the whole manager.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ClientEvent);
}
