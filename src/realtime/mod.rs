pub mod client;
pub mod messages;

pub use client::{
    Credentials, Endpoint, RealtimeTransport, TransportConnector, TransportError,
    WebSocketConnector, WebSocketTransport,
};
pub use messages::{ClientEvent, ConversationItem, ErrorDetail, ServerEvent, SessionUpdate, Voice};
