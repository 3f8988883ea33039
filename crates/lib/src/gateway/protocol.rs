//! Widget socket protocol types.
//!
//! Clients send requests (`{"type":"req","id","method","params"}`) and get a response with
//! the same id. The server pushes event frames (`message`, `typing`, `shutdown`) at any time.

use serde::{Deserialize, Serialize};

use crate::channels::web::WebQuery;

pub const PROTOCOL_VERSION: u32 = 1;

/// Wire request: `{ "type": "req", "id", "method", "params" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsRequest {
    #[serde(rename = "type")]
    pub typ: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Wire response: `{ "type": "res", "id", "ok", "payload" or "error" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsResponse {
    #[serde(rename = "type")]
    pub typ: String,
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Methods a widget socket may call.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketMethod {
    /// Creates or refreshes the subscriber and returns profile plus recent history.
    Subscribe(WebQuery),
    /// Widget settings (window title, upload limits...).
    Settings,
    /// A raw widget event, same body as `POST /webhook/web`.
    Message(serde_json::Value),
}

impl SocketMethod {
    pub fn parse(req: &WsRequest) -> Result<Self, String> {
        match req.method.as_str() {
            "subscribe" => {
                let query = if req.params.is_null() {
                    WebQuery::default()
                } else {
                    serde_json::from_value(req.params.clone())
                        .map_err(|e| format!("invalid subscribe params: {}", e))?
                };
                Ok(Self::Subscribe(query))
            }
            "settings" => Ok(Self::Settings),
            "message" => Ok(Self::Message(req.params.clone())),
            other => Err(format!("unknown method `{}`", other)),
        }
    }
}

impl WsResponse {
    pub fn ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            typ: "res".to_string(),
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            typ: "res".to_string(),
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn req(method: &str, params: serde_json::Value) -> WsRequest {
        serde_json::from_value(json!({"type": "req", "id": "1", "method": method, "params": params}))
            .unwrap()
    }

    #[test]
    fn parses_socket_methods() {
        assert_eq!(
            SocketMethod::parse(&req("subscribe", json!({"first_name": "Ada"}))).unwrap(),
            SocketMethod::Subscribe(WebQuery {
                first_name: Some("Ada".to_string()),
                ..Default::default()
            })
        );
        assert_eq!(
            SocketMethod::parse(&req("settings", serde_json::Value::Null)).unwrap(),
            SocketMethod::Settings
        );
        assert!(SocketMethod::parse(&req("agent", json!({}))).is_err());
    }

    #[test]
    fn error_response_omits_payload() {
        let raw = serde_json::to_value(WsResponse::err("7", "nope")).unwrap();
        assert_eq!(raw, json!({"type": "res", "id": "7", "ok": false, "error": "nope"}));
    }
}
