//! The client workflow: connect → register → process file → parse owner →
//! submit order.
//!
//! Every step settles into a [`StepOutcome`]. Whether a failure is
//! recoverable depends on the step and the configured [`Policy`]:
//!
//!   step          lenient       strict
//!   connect       fatal         fatal
//!   register      recoverable   fatal
//!   process file  fatal         fatal
//!   parse owner   fatal         fatal
//!   submit order  recoverable   fatal
//!
//! The run stops at the first fatal outcome.

use std::fmt;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::time::Duration;

use cairn_core::{AccountId, AddressParseError, CairnConfig, ConfigurationError, Policy};

use crate::chain::{
    ClientFactory, FileSubmission, OrderReceipt, OrderSubmissionError, Registration,
    RegistrationError, StorageChain,
};
use crate::peer_addr::{DnsTxtResolver, PeerAddressList, SkippedPeer};
use crate::peer_node::{NetworkStartupError, PeerNode, PeerNodeConfig};
use crate::segment::{FileProcessingError, ProcessedFile, Segmenter};
use crate::store::FragmentStore;

// ── Steps and policy ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Connect,
    Register,
    ProcessFile,
    ParseOwner,
    SubmitOrder,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Step::Connect => "connect",
            Step::Register => "register",
            Step::ProcessFile => "process-file",
            Step::ParseOwner => "parse-owner",
            Step::SubmitOrder => "submit-order",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Recoverable,
    Fatal,
}

impl Step {
    /// Severity of a failure of this step under `policy`.
    pub fn severity(self, policy: Policy) -> Severity {
        match (self, policy) {
            (Step::Register | Step::SubmitOrder, Policy::Lenient) => Severity::Recoverable,
            _ => Severity::Fatal,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    NetworkStartup(#[from] NetworkStartupError),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    FileProcessing(#[from] FileProcessingError),
    #[error(transparent)]
    AddressParse(#[from] AddressParseError),
    #[error(transparent)]
    OrderSubmission(#[from] OrderSubmissionError),
}

/// Result of one step after the policy table has been applied.
#[derive(Debug)]
pub enum StepOutcome<T> {
    Completed(T),
    /// Failed, logged, and the run continued.
    Recovered(StepError),
    /// Failed and ended the run.
    Fatal(StepError),
}

impl<T> StepOutcome<T> {
    pub fn classify<E: Into<StepError>>(step: Step, policy: Policy, result: Result<T, E>) -> Self {
        match result {
            Ok(value) => StepOutcome::Completed(value),
            Err(e) => match step.severity(policy) {
                Severity::Recoverable => StepOutcome::Recovered(e.into()),
                Severity::Fatal => StepOutcome::Fatal(e.into()),
            },
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StepOutcome::Completed(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StepOutcome::Fatal(_))
    }

    pub fn error(&self) -> Option<&StepError> {
        match self {
            StepOutcome::Completed(_) => None,
            StepOutcome::Recovered(e) | StepOutcome::Fatal(e) => Some(e),
        }
    }
}

#[derive(Debug)]
pub struct StepRecord {
    pub step: Step,
    pub outcome: StepOutcome<()>,
}

/// Everything a run produced, in step order.
#[derive(Debug, Default)]
pub struct WorkflowReport {
    pub records: Vec<StepRecord>,
    /// Chain name reported at connect.
    pub chain: Option<String>,
    /// Bootstrap peers that answered the greeting at node startup.
    pub bootstrap_connected: usize,
    /// Bootstrap candidates that yielded no address.
    pub skipped_peers: Vec<SkippedPeer>,
    pub registration_tx: Option<String>,
    pub processed: Option<ProcessedFile>,
    pub owner: Option<AccountId>,
    pub order: Option<OrderReceipt>,
}

impl WorkflowReport {
    /// The error that ended the run, if any.
    pub fn fatal(&self) -> Option<&StepError> {
        self.records
            .iter()
            .find(|r| r.outcome.is_fatal())
            .and_then(|r| r.outcome.error())
    }

    /// Outcome recorded for `step`, if the run got that far.
    pub fn outcome(&self, step: Step) -> Option<&StepOutcome<()>> {
        self.records.iter().find(|r| r.step == step).map(|r| &r.outcome)
    }

    /// True when the run reached the order step and nothing failed.
    pub fn is_success(&self) -> bool {
        self.records.last().is_some_and(|r| r.step == Step::SubmitOrder)
            && self.records.iter().all(|r| r.outcome.is_completed())
    }

    /// Record an outcome. Breaks on fatal; continues with the value when
    /// the step completed and with `None` when it was recovered.
    fn settle<T>(&mut self, step: Step, outcome: StepOutcome<T>) -> ControlFlow<(), Option<T>> {
        let (recorded, flow) = match outcome {
            StepOutcome::Completed(value) => {
                (StepOutcome::Completed(()), ControlFlow::Continue(Some(value)))
            }
            StepOutcome::Recovered(e) => {
                tracing::warn!(%step, error = %e, "step failed, continuing");
                (StepOutcome::Recovered(e), ControlFlow::Continue(None))
            }
            StepOutcome::Fatal(e) => {
                tracing::error!(%step, error = %e, "step failed, stopping");
                (StepOutcome::Fatal(e), ControlFlow::Break(()))
            }
        };
        self.records.push(StepRecord {
            step,
            outcome: recorded,
        });
        flow
    }
}

// ── Runner ────────────────────────────────────────────────────────────────────

/// Per-run inputs after the chain is connected and the peer node is up.
#[derive(Debug, Clone)]
pub struct WorkflowInput {
    pub peer_public_key: [u8; 32],
    pub file: PathBuf,
    /// Owner account as an SS58 string.
    pub owner_address: String,
    /// None = the file's own name.
    pub file_name: Option<String>,
    pub bucket_name: String,
    /// None = the file's actual size.
    pub declared_size: Option<u64>,
    pub domain: String,
}

impl WorkflowInput {
    pub fn from_config(config: &CairnConfig, peer_public_key: [u8; 32]) -> Self {
        let upload = &config.upload;
        Self {
            peer_public_key,
            file: upload.file.clone(),
            owner_address: upload.owner_address.clone(),
            file_name: (!upload.file_name.is_empty()).then(|| upload.file_name.clone()),
            bucket_name: upload.bucket_name.clone(),
            declared_size: (upload.declared_size != 0).then_some(upload.declared_size),
            domain: upload.domain.clone(),
        }
    }
}

/// Runs the post-connect steps against a connected chain.
pub struct WorkflowRunner<'a, C: StorageChain> {
    chain: &'a C,
    segmenter: Segmenter,
    policy: Policy,
}

impl<'a, C: StorageChain> WorkflowRunner<'a, C> {
    pub fn new(chain: &'a C, segmenter: Segmenter, policy: Policy) -> Self {
        Self {
            chain,
            segmenter,
            policy,
        }
    }

    /// Run register → process file → parse owner → submit order.
    pub async fn run(&self, input: &WorkflowInput) -> WorkflowReport {
        let mut report = WorkflowReport::default();
        self.run_into(&mut report, input).await;
        report
    }

    async fn run_into(&self, report: &mut WorkflowReport, input: &WorkflowInput) {
        let registration = Registration {
            role: self.chain.role(),
            peer_public_key: input.peer_public_key,
            domain: input.domain.clone(),
            stake: 0,
        };
        let result = self.chain.register(&registration).await;
        if let Ok(tx_hash) = &result {
            tracing::info!(role = self.chain.role_name(), tx_hash = %tx_hash, "node registered");
        }
        let ControlFlow::Continue(tx_hash) = report.settle(
            Step::Register,
            StepOutcome::classify(Step::Register, self.policy, result),
        ) else {
            return;
        };
        report.registration_tx = tx_hash;

        let result = self.segmenter.process(&input.file);
        let ControlFlow::Continue(Some(processed)) = report.settle(
            Step::ProcessFile,
            StepOutcome::classify(Step::ProcessFile, self.policy, result),
        ) else {
            return;
        };
        tracing::info!(
            path = %processed.path.display(),
            segments = processed.segments.len(),
            root = %processed.root,
            "file processed"
        );

        let result = AccountId::parse(&input.owner_address);
        let ControlFlow::Continue(Some(owner)) = report.settle(
            Step::ParseOwner,
            StepOutcome::classify(Step::ParseOwner, self.policy, result),
        ) else {
            report.processed = Some(processed);
            return;
        };
        tracing::info!(
            address_bytes = hex::encode(input.owner_address.trim().as_bytes()),
            public_key = hex::encode(owner.public_key()),
            prefix = owner.prefix(),
            "owner parsed"
        );

        let submission = FileSubmission {
            path: processed.path.clone(),
            segments: processed.segments.clone(),
            root: processed.root,
            owner,
            file_name: input.file_name.clone().unwrap_or_else(|| {
                processed
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            }),
            bucket_name: input.bucket_name.clone(),
            declared_size: input.declared_size.unwrap_or(processed.total_bytes),
        };
        report.processed = Some(processed);
        report.owner = Some(owner);

        let result = self.chain.generate_storage_order(&submission).await;
        if let Ok(receipt) = &result {
            tracing::info!(?receipt, file = %submission.file_name, "storage order settled");
        }
        if let ControlFlow::Continue(receipt) = report.settle(
            Step::SubmitOrder,
            StepOutcome::classify(Step::SubmitOrder, self.policy, result),
        ) {
            report.order = receipt;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Run the whole workflow from configuration.
///
/// Invalid configuration and peer node startup failures are returned as
/// errors. Everything from connect onward is recorded in the report.
pub async fn execute(config: &CairnConfig) -> Result<WorkflowReport, StepError> {
    let client_config = config.client_config()?;
    let policy = config.workflow.policy;
    let workspace = &config.network.workspace;

    let store = FragmentStore::new(workspace.join("fragments")).map_err(FileProcessingError::from)?;
    let segmenter = Segmenter::new(config.upload.segment_size)?.with_store(store.clone());

    let mut report = WorkflowReport::default();
    let connected = ClientFactory::connect(client_config).await;
    let ControlFlow::Continue(Some(chain)) = report.settle(
        Step::Connect,
        StepOutcome::classify(Step::Connect, policy, connected),
    ) else {
        return Ok(report);
    };
    report.chain = Some(chain.chain().to_string());

    let bootstrap =
        PeerAddressList::resolve(&config.network.bootstrap_nodes, &DnsTxtResolver::new()).await;
    if !bootstrap.skipped().is_empty() {
        tracing::warn!(skipped = bootstrap.skipped().len(), "some bootstrap candidates were unusable");
    }
    report.skipped_peers = bootstrap.skipped().to_vec();

    let node = PeerNode::start(PeerNodeConfig {
        listen_ip: config.network.listen_ip,
        listen_port: config.network.listen_port,
        workspace: workspace.clone(),
        bootstrap: bootstrap.into_addrs(),
        dial_timeout: Duration::from_secs(config.network.dial_timeout_secs),
    })
    .await?;
    report.bootstrap_connected = node.bootstrap_connected();
    tracing::info!(
        peer_id = %node.peer_id(),
        addrs = ?node.addrs(),
        bootstrap = node.bootstrap_connected(),
        "peer node ready"
    );

    let input = WorkflowInput::from_config(config, node.public_key());
    WorkflowRunner::new(&chain, segmenter, policy)
        .run_into(&mut report, &input)
        .await;

    tracing::debug!(root = %store.root().display(), fragments = store.count(), "fragment store");
    node.shutdown().await;
    Ok(report)
}
