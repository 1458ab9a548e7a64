//! cairn-services: the storage client workflow and the pieces it runs on
//! (chain client, peer node, bootstrap parsing, file segmentation).

pub mod chain;
pub mod peer_addr;
pub mod peer_node;
pub mod segment;
pub mod store;
pub mod workflow;

pub use chain::{
    ClientFactory, FileSubmission, OrderReceipt, OrderSubmissionError, Registration,
    RegistrationError, RpcClient, RpcError, StorageChain,
};
pub use peer_addr::{
    parse_peer_addresses, resolve_peer_addresses, DnsTxtResolver, PeerAddressList, SkippedPeer,
    TxtResolver,
};
pub use peer_node::{NetworkStartupError, PeerNode, PeerNodeConfig};
pub use segment::{ContentRoot, Digest, FileProcessingError, ProcessedFile, SegmentDescriptor, Segmenter};
pub use store::{FragmentStore, StoreError};
pub use workflow::{
    execute, Severity, Step, StepError, StepOutcome, StepRecord, WorkflowInput, WorkflowReport,
    WorkflowRunner,
};
