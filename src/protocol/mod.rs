//! Wire protocol spoken by the hassmic Android app
//!
//! Every frame starts with a single line of JSON. The header may announce
//! extra JSON data (`data_length`) and a raw binary payload
//! (`payload_length`) that follow it on the stream.

pub mod codec;
pub mod message;

pub use codec::{
    recv_message, ProtocolError, DEFAULT_EXTRA_DATA_TIMEOUT, MAX_HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
pub use message::{Message, MessageType, OutgoingMessage};
