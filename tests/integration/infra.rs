//! In-process chain stub.
//!
//! Speaks the JSON-RPC subset the client uses:
//!
//!   system_chain                → chain name
//!   oss_register                → signed; tx hash
//!   fileBank_queryFile [root]   → declaration or null
//!   fileBank_uploadDeclaration  → signed; tx hash
//!
//! Signed calls are verified before they are accepted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use cairn_core::config::CairnConfig;
use cairn_core::crypto;
use cairn_core::{Policy, Role};
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const CHAIN_NAME: &str = "cairn-testnet";
pub const MNEMONIC: &str = "bottom drive obey lake curtain smoke basket hold race lonely fit walk";
pub const ALICE: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";

const ERR_REJECTED: i64 = 1010;
const ERR_BAD_SIGNATURE: i64 = 1011;
const ERR_UNKNOWN_METHOD: i64 = -32601;

// ── Stub state ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct StubState {
    pub reject_register: AtomicBool,
    pub reject_order: AtomicBool,
    /// Accepted registrations: (signer hex, call params).
    pub registrations: DashMap<String, Value>,
    /// Accepted declarations keyed on content root hex.
    pub declarations: DashMap<String, Value>,
    pub requests: AtomicUsize,
    next_tx: AtomicU64,
}

impl StubState {
    fn tx_hash(&self) -> String {
        let n = self.next_tx.fetch_add(1, Ordering::Relaxed);
        format!("0x{}", hex::encode(crypto::hash(&n.to_le_bytes())))
    }
}

pub struct ChainStub {
    pub addr: SocketAddr,
    pub state: Arc<StubState>,
    task: JoinHandle<()>,
}

impl ChainStub {
    pub async fn spawn() -> Result<Self> {
        let state = Arc::new(StubState::default());
        let app = Router::new()
            .route("/", post(handle_rpc))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind chain stub")?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { addr, state, task })
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }
}

impl Drop for ChainStub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A loopback URL nothing is listening on.
pub async fn dead_endpoint() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}"))
}

// ── Handler ───────────────────────────────────────────────────────────────────

async fn handle_rpc(State(state): State<Arc<StubState>>, Json(request): Json<Value>) -> Json<Value> {
    state.requests.fetch_add(1, Ordering::Relaxed);
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    let outcome = match method {
        "system_chain" => Ok(json!(CHAIN_NAME)),
        "oss_register" => verify_signed(&params).and_then(|(signer, call)| {
            if state.reject_register.load(Ordering::Relaxed) {
                return Err((ERR_REJECTED, "registration rejected".to_string()));
            }
            state.registrations.insert(signer, call);
            Ok(json!(state.tx_hash()))
        }),
        "fileBank_queryFile" => {
            let root = params.get(0).and_then(Value::as_str).unwrap_or_default();
            Ok(state
                .declarations
                .get(root)
                .map(|d| d.value().clone())
                .unwrap_or(Value::Null))
        }
        "fileBank_uploadDeclaration" => verify_signed(&params).and_then(|(_, call)| {
            if state.reject_order.load(Ordering::Relaxed) {
                return Err((ERR_REJECTED, "insufficient space".to_string()));
            }
            let root = call["root"].as_str().unwrap_or_default().to_string();
            state.declarations.insert(root, call);
            Ok(json!(state.tx_hash()))
        }),
        other => Err((ERR_UNKNOWN_METHOD, format!("method {other} not found"))),
    };

    Json(match outcome {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err((code, message)) => {
            json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
        }
    })
}

/// Check the signature on a signed call. Returns (signer hex, call).
fn verify_signed(params: &Value) -> Result<(String, Value), (i64, String)> {
    let bad = |what: &str| (ERR_BAD_SIGNATURE, format!("bad signed call: {what}"));

    let call = params.get("call").cloned().ok_or_else(|| bad("missing call"))?;
    let signer_hex = params["signer"].as_str().ok_or_else(|| bad("missing signer"))?;
    let signer: [u8; 32] = hex::decode(signer_hex)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| bad("signer"))?;
    let signature: [u8; 64] = params["signature"]
        .as_str()
        .and_then(|s| hex::decode(s).ok())
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| bad("signature"))?;

    let encoded = serde_json::to_vec(&call).map_err(|_| bad("encoding"))?;
    crypto::verify(&signer, &crypto::hash(&encoded), &signature).map_err(|_| bad("verification"))?;
    Ok((signer_hex.to_string(), call))
}

// ── Fixtures ──────────────────────────────────────────────────────────────────

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fresh directory under the system temp dir.
pub fn temp_dir(tag: &str) -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("cairn-it-{tag}-{}-{}", std::process::id(), id));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// A workflow configuration pointed at `endpoints`, with a sample file and
/// its own workspace.
pub fn workflow_config(endpoints: Vec<String>, role: Role, policy: Policy) -> CairnConfig {
    let dir = temp_dir("workflow");
    let file = dir.join("sample.pdf");
    std::fs::write(&file, b"%PDF-1.4\nsample document body\n".repeat(40)).unwrap();

    let mut config = CairnConfig::default();
    config.chain.role = role;
    config.chain.rpc_addrs = endpoints;
    config.chain.mnemonic = MNEMONIC.to_string();
    config.chain.timeout_secs = 5;
    config.network.listen_ip = [127, 0, 0, 1].into();
    config.network.listen_port = 0;
    config.network.workspace = dir.join("workspace");
    config.network.dial_timeout_secs = 1;
    config.upload.file = file;
    config.upload.owner_address = ALICE.to_string();
    config.upload.segment_size = 256;
    config.workflow.policy = policy;
    config
}
