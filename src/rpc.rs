use serde_json::Value;
use thiserror::Error;

/// JSON-RPC "method not found".
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("POST {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: Value },

    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("invalid JSON-RPC response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// True when the node does not implement the requested method.
    pub fn is_method_unsupported(&self) -> bool {
        match self {
            RpcError::Rpc { code, message, .. } => {
                let message = message.to_lowercase();
                // Some nodes answer with a generic code but name the method.
                let names_simulate = message.contains("eth_simulatev1")
                    && (message.contains("does not exist") || message.contains("not supported"));
                *code == METHOD_NOT_FOUND || message.contains("method not found") || names_simulate
            }
            _ => false,
        }
    }
}

/// Minimal JSON-RPC 2.0 over HTTP client.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    url: String,
    http: reqwest::Client,
}

impl JsonRpcClient {
    pub fn new(url: String) -> Self {
        Self {
            url,
            http: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let transport = |source| RpcError::Transport {
            url: self.url.clone(),
            source,
        };

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        let body: Value = resp.json().await.map_err(transport)?;

        tracing::debug!(method, status = status.as_u16(), "json-rpc response");
        parse_response(status.as_u16(), body)
    }
}

/// Some providers answer errors with a non-2xx status and a JSON-RPC error
/// body; the error object wins over the HTTP status when present.
pub fn parse_response(status: u16, body: Value) -> Result<Value, RpcError> {
    if let Some(err) = body.get("error") {
        return Err(RpcError::Rpc {
            code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            data: err.get("data").cloned(),
        });
    }

    if !(200..300).contains(&status) {
        return Err(RpcError::Http { status, body });
    }

    body.get("result")
        .cloned()
        .ok_or_else(|| RpcError::InvalidResponse("missing result field".to_string()))
}
