use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client metadata captured at connection time and attached to edit records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// One accepted edit, appended to the durable edit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRecord {
    pub document_id: String,
    pub user_id: String,
    pub operations: Vec<Value>,
    pub version: u64,
    pub meta: ClientMeta,
}
