//! Admin-side client for the branch chat backend: the push channel, the REST
//! gateway, and the conversation store that a front end renders from.

pub mod connection;
pub mod conversations;
pub mod error;
pub mod event_bus;
pub mod message_log;
pub mod persistence;
pub mod presence;
pub mod rest;
pub mod settings;
pub mod store;
pub mod transport;
pub mod typing;

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

pub use connection::{ConnectionManager, ConnectionState, RealtimeChannel};
pub use error::{ConnectionError, GatewayError, StoreError};
pub use event_bus::{EventBus, EventFilter, EventHandler, Subscription};
pub use persistence::{MemorySelectionStore, Selection, SelectionStore};
pub use rest::{BranchOverview, ChatBackend, Page, RestGateway};
pub use settings::{load_settings, ClientSettings, ConnectionSettings, StoreSettings};
pub use store::{ChatSnapshot, ConversationRow, ConversationStore, LoadState, OpenConversation, StoreHandle};
pub use transport::{Connector, Credential, WsConnector};
