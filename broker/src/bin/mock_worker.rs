//! Scriptable stdio worker used by the integration tests.
//!
//! Speaks line-delimited JSON-RPC 2.0 on stdin/stdout and answers requests
//! concurrently, so responses may come back in any order.
//!
//! Flags:
//!   --noise               print non-protocol lines on stdout first
//!   --fail-initialize     answer `initialize` with an error
//!   --hang-initialize     never answer `initialize`
//!   --exit-immediately    exit before reading anything
//!
//! Tools: echo, sleep {ms}, never, crash, fail, pid, env {var}.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::Mutex;

#[derive(Debug, Default, Clone, Copy)]
struct Flags {
    noise: bool,
    fail_initialize: bool,
    hang_initialize: bool,
    exit_immediately: bool,
}

impl Flags {
    fn from_args() -> Self {
        let mut flags = Self::default();
        for arg in std::env::args().skip(1) {
            match arg.as_str() {
                "--noise" => flags.noise = true,
                "--fail-initialize" => flags.fail_initialize = true,
                "--hang-initialize" => flags.hang_initialize = true,
                "--exit-immediately" => flags.exit_immediately = true,
                other => eprintln!("mock-worker: ignoring unknown flag {}", other),
            }
        }
        flags
    }
}

type SharedStdout = Arc<Mutex<Stdout>>;

async fn write_line(stdout: &SharedStdout, line: &str) {
    let mut out = stdout.lock().await;
    let _ = out.write_all(line.as_bytes()).await;
    let _ = out.write_all(b"\n").await;
    let _ = out.flush().await;
}

async fn reply(stdout: &SharedStdout, id: Value, outcome: Result<Value, (i64, String)>) {
    let message = match outcome {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err((code, message)) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message}
        }),
    };
    write_line(stdout, &message.to_string()).await;
}

fn tools() -> Value {
    let names = ["echo", "sleep", "never", "crash", "fail", "pid", "env"];
    let tools: Vec<Value> = names
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "description": format!("mock {} tool", name),
                "inputSchema": {"type": "object"}
            })
        })
        .collect();
    json!({ "tools": tools })
}

fn text(value: impl Into<String>) -> Value {
    json!({"content": [{"type": "text", "text": value.into()}]})
}

async fn call_tool(stdout: &SharedStdout, params: &Value) -> Option<Result<Value, (i64, String)>> {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let args = params.get("arguments").cloned().unwrap_or(Value::Null);

    let outcome = match name {
        "echo" => Ok(json!({ "echo": args })),
        "sleep" => {
            let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!({ "slept": ms }))
        }
        "never" => return None,
        "crash" => {
            let _ = stdout.lock().await.flush().await;
            std::process::exit(1);
        }
        "fail" => Err((-32000, "tool failed on purpose".to_string())),
        "pid" => Ok(json!({ "pid": std::process::id() })),
        "env" => {
            let var = args.get("var").and_then(Value::as_str).unwrap_or_default();
            Ok(text(std::env::var(var).unwrap_or_default()))
        }
        other => Err((-32601, format!("Unknown tool: {}", other))),
    };
    Some(outcome)
}

async fn handle(stdout: SharedStdout, flags: Flags, request: Value) {
    let Some(id) = request.get("id").cloned() else {
        return;
    };
    let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    let outcome = match method {
        "initialize" if flags.hang_initialize => return,
        "initialize" if flags.fail_initialize => Err((-32603, "initialize refused".to_string())),
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "mock-worker", "version": env!("CARGO_PKG_VERSION")}
        })),
        "tools/list" => Ok(tools()),
        "tools/call" => match call_tool(&stdout, &params).await {
            Some(outcome) => outcome,
            None => return,
        },
        other => Err((-32601, format!("Method not found: {}", other))),
    };

    reply(&stdout, id, outcome).await;
}

#[tokio::main]
async fn main() {
    let flags = Flags::from_args();
    if flags.exit_immediately {
        std::process::exit(2);
    }

    let stdout: SharedStdout = Arc::new(Mutex::new(tokio::io::stdout()));
    if flags.noise {
        write_line(&stdout, "mock-worker starting up").await;
        write_line(&stdout, "{not json at all").await;
        write_line(&stdout, r#"{"jsonrpc":"2.0","method":"notifications/message"}"#).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(request) = serde_json::from_str::<Value>(&line) else {
            eprintln!("mock-worker: unparseable request: {}", line);
            continue;
        };
        tokio::spawn(handle(Arc::clone(&stdout), flags, request));
    }
}
