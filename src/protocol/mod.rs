pub mod codec;
pub mod jsonrpc;
pub mod tools;

pub use codec::{decode, decode_incoming, encode, encode_notification, MalformedMessage};
pub use jsonrpc::{
    Incoming, Notification, Params, Request, Response, RpcError, ServerRequest, JSONRPC_VERSION,
};
pub use tools::{CallToolParams, ClientInfo};
