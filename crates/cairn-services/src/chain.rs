//! Chain client: connection, registration and storage orders.
//!
//! The chain is reached over JSON-RPC 2.0 on HTTP. WebSocket endpoints are
//! contacted through their HTTP equivalents on the same host and port.
//!
//! State-changing calls are signed. The submitted params are:
//!
//!   { "call": <params>, "signer": hex(pubkey), "signature": hex(sig) }
//!
//! where `sig = Ed25519(BLAKE3(json(params)))` under the account key derived
//! from the client credential.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use cairn_core::crypto::{self, AccountSigner};
use cairn_core::{AccountId, ClientConfig, ConfigurationError, Role};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::segment::{ContentRoot, SegmentDescriptor};

pub const METHOD_CHAIN_NAME: &str = "system_chain";
pub const METHOD_REGISTER: &str = "oss_register";
pub const METHOD_QUERY_FILE: &str = "fileBank_queryFile";
pub const METHOD_UPLOAD_DECLARATION: &str = "fileBank_uploadDeclaration";

// ── Requests and results ──────────────────────────────────────────────────────

/// Registration of a node's peer identity on chain.
#[derive(Debug, Clone)]
pub struct Registration {
    pub role: Role,
    pub peer_public_key: [u8; 32],
    /// Optional public domain of the service. Empty = none.
    pub domain: String,
    /// Optional stake. 0 = none.
    pub stake: u128,
}

/// Everything needed to order storage for one processed file.
#[derive(Debug, Clone)]
pub struct FileSubmission {
    pub path: PathBuf,
    pub segments: Vec<SegmentDescriptor>,
    pub root: ContentRoot,
    pub owner: AccountId,
    pub file_name: String,
    pub bucket_name: String,
    pub declared_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderReceipt {
    /// Declaration submitted in the given transaction.
    Submitted { tx_hash: String },
    /// The content root was already declared; nothing was submitted.
    AlreadyDeclared { root: ContentRoot },
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{method} failed ({code}): {message}")]
    Remote {
        method: String,
        code: i64,
        message: String,
    },
    #[error("{0} returned no result")]
    MissingResult(String),
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("role {0:?} does not register on chain")]
    UnsupportedRole(&'static str),
    #[error("registration rejected: {0}")]
    Rpc(#[from] RpcError),
}

#[derive(Debug, thiserror::Error)]
pub enum OrderSubmissionError {
    #[error("nothing to declare: file has no segments")]
    NoSegments,
    #[error("file name is empty")]
    EmptyFileName,
    #[error("invalid bucket name {0:?}")]
    InvalidBucketName(String),
    #[error("storage order failed: {0}")]
    Rpc(#[from] RpcError),
}

// ── Service seam ──────────────────────────────────────────────────────────────

/// The chain operations the workflow depends on.
pub trait StorageChain: Sync {
    /// Role this handle was built for.
    fn role(&self) -> Role;

    /// Canonical on-chain name of [`StorageChain::role`].
    fn role_name(&self) -> &'static str {
        self.role().name()
    }

    fn register(
        &self,
        registration: &Registration,
    ) -> impl Future<Output = Result<String, RegistrationError>> + Send;

    fn generate_storage_order(
        &self,
        submission: &FileSubmission,
    ) -> impl Future<Output = Result<OrderReceipt, OrderSubmissionError>> + Send;
}

// ── Factory ───────────────────────────────────────────────────────────────────

/// Builds connected chain handles from a validated [`ClientConfig`].
pub struct ClientFactory;

impl ClientFactory {
    /// Connect to the first endpoint that answers `system_chain`.
    ///
    /// Each endpoint is attempted exactly once, in configured order.
    pub async fn connect(config: ClientConfig) -> Result<RpcClient, ConfigurationError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ConfigurationError::Transport(e.to_string()))?;

        let mut last = String::from("no endpoints");
        for endpoint in config.endpoints() {
            let url = http_endpoint(endpoint);
            let client = RpcClient {
                http: http.clone(),
                endpoint: url.clone(),
                role: config.role(),
                signer: AccountSigner::from_phrase(config.credential()),
                chain: String::new(),
                next_id: AtomicU64::new(1),
            };

            match client.call::<String>(METHOD_CHAIN_NAME, json!([])).await {
                Ok(chain) => {
                    tracing::info!(
                        endpoint = %url,
                        chain = %chain,
                        role = config.role().name(),
                        account = hex::encode(client.signer.public()),
                        "connected to chain"
                    );
                    return Ok(RpcClient { chain, ..client });
                }
                Err(e) => {
                    tracing::warn!(endpoint = %url, error = %e, "chain endpoint unreachable");
                    last = e.to_string();
                }
            }
        }

        Err(ConfigurationError::Unreachable {
            tried: config.endpoints().len(),
            last,
        })
    }
}

/// Map `ws`/`wss` to `http`/`https`; leave other schemes unchanged.
pub fn http_endpoint(endpoint: &Url) -> Url {
    let scheme = match endpoint.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => other,
    }
    .to_string();
    let mut url = endpoint.clone();
    if url.set_scheme(&scheme).is_err() {
        tracing::warn!(endpoint = %endpoint, scheme = %scheme, "cannot switch endpoint scheme, using as given");
    }
    url
}

// ── JSON-RPC client ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse<R> {
    result: Option<R>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Connected chain handle. Owns its HTTP transport; dropping the handle
/// releases it.
pub struct RpcClient {
    http: reqwest::Client,
    endpoint: Url,
    role: Role,
    signer: AccountSigner,
    chain: String,
    next_id: AtomicU64,
}

impl RpcClient {
    /// The endpoint this handle settled on.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Chain name reported at connect time.
    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Public key of the signing account.
    pub fn account_public_key(&self) -> [u8; 32] {
        self.signer.public()
    }

    /// Issue a JSON-RPC call and decode its result.
    pub async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R, RpcError> {
        self.call_optional(method, params)
            .await?
            .ok_or_else(|| RpcError::MissingResult(method.to_string()))
    }

    /// Like [`RpcClient::call`], but a `null` result is `Ok(None)`.
    pub async fn call_optional<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<R>, RpcError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response: RpcResponse<R> = self
            .http
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(RpcError::Remote {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            });
        }
        Ok(response.result)
    }

    /// Sign `params` and submit them as a state-changing call. Returns the
    /// transaction hash.
    pub async fn submit(&self, method: &str, params: Value) -> Result<String, RpcError> {
        let digest = crypto::hash(&serde_json::to_vec(&params)?);
        let signature = self.signer.sign(&digest);
        let signed = json!({
            "call": params,
            "signer": hex::encode(self.signer.public()),
            "signature": hex::encode(signature),
        });
        let tx_hash: String = self.call(method, signed).await?;
        tracing::debug!(method, tx_hash = %tx_hash, "transaction submitted");
        Ok(tx_hash)
    }
}

impl StorageChain for RpcClient {
    fn role(&self) -> Role {
        self.role
    }

    async fn register(&self, registration: &Registration) -> Result<String, RegistrationError> {
        if registration.role != Role::GatewayService {
            return Err(RegistrationError::UnsupportedRole(registration.role.name()));
        }

        let params = json!({
            "role": registration.role.name(),
            "peer_public_key": hex::encode(registration.peer_public_key),
            "domain": registration.domain,
            "stake": registration.stake.to_string(),
        });
        Ok(self.submit(METHOD_REGISTER, params).await?)
    }

    async fn generate_storage_order(
        &self,
        submission: &FileSubmission,
    ) -> Result<OrderReceipt, OrderSubmissionError> {
        if submission.segments.is_empty() {
            return Err(OrderSubmissionError::NoSegments);
        }
        if submission.file_name.trim().is_empty() {
            return Err(OrderSubmissionError::EmptyFileName);
        }
        if !is_valid_bucket_name(&submission.bucket_name) {
            return Err(OrderSubmissionError::InvalidBucketName(
                submission.bucket_name.clone(),
            ));
        }

        let existing: Option<Value> = self
            .call_optional(METHOD_QUERY_FILE, json!([submission.root.to_hex()]))
            .await?;
        if existing.is_some() {
            tracing::info!(root = %submission.root, "content root already declared");
            return Ok(OrderReceipt::AlreadyDeclared {
                root: submission.root,
            });
        }

        let params = json!({
            "root": submission.root,
            "segments": submission.segments,
            "owner": submission.owner.to_ss58(),
            "file_name": submission.file_name,
            "bucket_name": submission.bucket_name,
            "size": submission.declared_size,
        });
        let tx_hash = self.submit(METHOD_UPLOAD_DECLARATION, params).await?;
        Ok(OrderReceipt::Submitted { tx_hash })
    }
}

/// Bucket names: 3–63 characters of lowercase letters, digits, `-` and `.`,
/// starting and ending with a letter or digit.
pub fn is_valid_bucket_name(name: &str) -> bool {
    let len_ok = (3..=63).contains(&name.len());
    let chars_ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    let edges_ok = name
        .chars()
        .next()
        .zip(name.chars().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());
    len_ok && chars_ok && edges_ok && !name.contains("..")
}
