// netrules-api: wire types and transports for virtual-router command batches

pub mod command;
pub mod error;
pub mod http;
pub mod recording;
pub mod transport;

pub use command::{CommandBody, RouterCommand, RoutingMetadata, ZoneNetworkType};
pub use error::Error;
pub use http::HttpTransport;
pub use recording::{FailureMode, RecordingTransport};
pub use transport::{
    CommandAnswer, CommandBatch, OnError, RouterEndpoint, RouterTransport, TlsMode,
    TransportConfig, ensure_success,
};
