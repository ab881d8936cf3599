pub mod error;
pub mod events;
pub mod keys;
pub mod link;
pub mod retry;
pub mod transport;

pub use error::{LinkError, LinkResult};
pub use events::{EventKind, LinkEvent, ListenerId, Listeners};
pub use keys::{Key, MenuCursor};
pub use link::{LinkPhase, RemoteLink};
pub use retry::RetryPolicy;
pub use transport::{Connection, Connector, Incoming, WsConnector};
