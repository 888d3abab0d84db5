pub mod cli;
pub mod config;
pub mod error;
pub mod protocol;
pub mod rpc;
pub mod transport;

pub use config::{MalformedPolicy, ServerCommand, SessionConfig, SessionOptions};
pub use error::ClientError;
pub use rpc::{Session, SessionState};
