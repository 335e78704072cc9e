pub mod client;
pub mod correlator;
pub mod injected;
pub mod message;
pub mod push;
pub mod transport;

pub use client::{ProtocolClient, ScriptInjector};
pub use correlator::{CorrelatorConfig, RequestCorrelator};
pub use injected::InjectedRelay;
pub use message::{
    MessageKind, Operation, PREVIEW_CONTAINER_ID, PushMessage, RequestMessage, ResponseMessage,
};
pub use push::PushChannel;
pub use transport::{Endpoint, Envelope, PageGlobals, PageWindow, Subscription, Transport};
