//! JSON-RPC line-protocol dispatcher.
//!
//! One JSON object per line on stdin and stdout, no framing beyond the
//! newline. Parse errors produce `-32700`; unknown methods `-32601`;
//! internal failures `-32603` with the exception text. Requests without an
//! `id` are notifications and never receive a reply.

pub mod methods;

use std::io::BufRead;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::state::AppState;

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

fn error_response(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() },
    })
}

fn success_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Read one JSON-RPC request per stdin line until EOF or shutdown is
/// requested, dispatching each to [`methods`] and writing one reply per
/// non-notification request.
pub fn run(state: Arc<AppState>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                log::error!("stdin read error: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let parsed: Result<RpcRequest, _> = serde_json::from_str(&line);
        let request = match parsed {
            Ok(r) => r,
            Err(e) => {
                let _ = state.stdout.write_line(&error_response(Value::Null, PARSE_ERROR, e.to_string()));
                continue;
            }
        };

        let id = request.id.clone();
        let is_notification = id.is_none();

        let outcome = methods::dispatch(&state, &request.method, request.params);

        if is_notification {
            if request.method == "shutdown" {
                break;
            }
            continue;
        }
        let id = id.unwrap_or(Value::Null);

        match outcome {
            Ok(result) => {
                let _ = state.stdout.write_line(&success_response(id, result));
            }
            Err(DispatchError::MethodNotFound) => {
                let _ = state.stdout.write_line(&error_response(
                    id,
                    METHOD_NOT_FOUND,
                    format!("unknown method: {}", request.method),
                ));
            }
            Err(DispatchError::Internal(message)) => {
                let _ = state.stdout.write_line(&error_response(id, INTERNAL_ERROR, message));
            }
        }

        if request.method == "shutdown" {
            break;
        }
    }
    log::info!("dispatcher loop exiting (EOF or shutdown)");
}

#[derive(Debug)]
pub enum DispatchError {
    MethodNotFound,
    Internal(String),
}
