use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::jsonrpc::Params;

pub const INITIALIZE: &str = "initialize";
pub const INITIALIZED: &str = "notifications/initialized";
pub const TOOLS_LIST: &str = "tools/list";
pub const TOOLS_CALL: &str = "tools/call";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl CallToolParams {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    pub fn into_params(self) -> Params {
        let mut params = Params::new();
        params.insert("name".to_string(), Value::String(self.name));
        params.insert("arguments".to_string(), Value::Object(self.arguments));
        params
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

pub fn initialize_params(protocol_version: &str, client: &ClientInfo) -> Params {
    let value = json!({
        "protocolVersion": protocol_version,
        "capabilities": {},
        "clientInfo": client,
    });
    match value {
        Value::Object(params) => params,
        _ => Params::new(),
    }
}
