pub mod manager;
pub mod outbox;

pub use manager::{
    ConnectionConfig, ConnectionHandler, ConnectionManager, DEFAULT_RECONNECT_DELAY,
    DEFAULT_TIMEOUT, MAX_CONSECUTIVE_BAD_MESSAGES,
};
pub use outbox::{Outbox, OutboxReceiver};
