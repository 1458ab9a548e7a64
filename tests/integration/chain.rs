//! Chain client against the stub: connect, failover, signed calls, orders.

use std::sync::atomic::Ordering;
use std::time::Duration;

use cairn_core::{AccountId, ClientConfig, ConfigurationError, Role};
use cairn_services::{
    ClientFactory, FileSubmission, OrderReceipt, OrderSubmissionError, Registration,
    RegistrationError, RpcClient, RpcError, Segmenter, StorageChain,
};

use crate::infra::{dead_endpoint, temp_dir, ChainStub, ALICE, CHAIN_NAME, MNEMONIC};

fn client_config(role: Role, endpoints: Vec<String>) -> ClientConfig {
    ClientConfig::new(role, endpoints, MNEMONIC, Duration::from_secs(5)).unwrap()
}

async fn connect(stub: &ChainStub, role: Role) -> RpcClient {
    ClientFactory::connect(client_config(role, vec![stub.http_url()]))
        .await
        .unwrap()
}

fn submission(bucket: &str) -> FileSubmission {
    let dir = temp_dir("order");
    let path = dir.join("notes.txt");
    std::fs::write(&path, b"storage order payload").unwrap();
    let processed = Segmenter::new(64).unwrap().process(&path).unwrap();

    FileSubmission {
        path: processed.path,
        segments: processed.segments,
        root: processed.root,
        owner: AccountId::parse(ALICE).unwrap(),
        file_name: "notes.txt".into(),
        bucket_name: bucket.into(),
        declared_size: processed.total_bytes,
    }
}

#[tokio::test]
async fn connect_records_chain_name() {
    let stub = ChainStub::spawn().await.unwrap();
    let client = connect(&stub, Role::Client).await;

    assert_eq!(client.chain(), CHAIN_NAME);
    assert_eq!(client.role_name(), "client");
    assert_eq!(client.endpoint().as_str(), format!("{}/", stub.http_url()));
}

#[tokio::test]
async fn connect_fails_over_past_dead_endpoint() {
    let stub = ChainStub::spawn().await.unwrap();
    let dead = dead_endpoint().await.unwrap();

    let client = ClientFactory::connect(client_config(
        Role::Client,
        vec![dead, stub.http_url()],
    ))
    .await
    .unwrap();

    assert_eq!(client.endpoint().port(), Some(stub.addr.port()));
    assert_eq!(stub.state.requests.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn connect_reports_unreachable_after_one_attempt_each() {
    let first = dead_endpoint().await.unwrap();
    let second = dead_endpoint().await.unwrap();

    let result = ClientFactory::connect(client_config(Role::Client, vec![first, second])).await;
    match result {
        Err(ConfigurationError::Unreachable { tried, .. }) => assert_eq!(tried, 2),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("connect should fail"),
    }
}

#[tokio::test]
async fn websocket_endpoint_is_reached_over_http() {
    let stub = ChainStub::spawn().await.unwrap();
    let client = ClientFactory::connect(client_config(Role::Client, vec![stub.ws_url()]))
        .await
        .unwrap();

    assert_eq!(client.endpoint().scheme(), "http");
    assert_eq!(client.chain(), CHAIN_NAME);
}

#[tokio::test]
async fn gateway_registration_is_signed_and_accepted() {
    let stub = ChainStub::spawn().await.unwrap();
    let client = connect(&stub, Role::GatewayService).await;

    let tx_hash = client
        .register(&Registration {
            role: Role::GatewayService,
            peer_public_key: [0x42; 32],
            domain: "gw.example.net".into(),
            stake: 0,
        })
        .await
        .unwrap();
    assert!(tx_hash.starts_with("0x"));

    let signer = hex::encode(client.account_public_key());
    let call = stub.state.registrations.get(&signer).unwrap().value().clone();
    assert_eq!(call["role"], "deoss");
    assert_eq!(call["peer_public_key"], hex::encode([0x42; 32]));
    assert_eq!(call["domain"], "gw.example.net");
}

#[tokio::test]
async fn client_role_does_not_register() {
    let stub = ChainStub::spawn().await.unwrap();
    let client = connect(&stub, Role::Client).await;
    let before = stub.state.requests.load(Ordering::Relaxed);

    let result = client
        .register(&Registration {
            role: Role::Client,
            peer_public_key: [1; 32],
            domain: String::new(),
            stake: 0,
        })
        .await;

    assert!(matches!(result, Err(RegistrationError::UnsupportedRole("client"))));
    assert_eq!(stub.state.requests.load(Ordering::Relaxed), before);
}

#[tokio::test]
async fn rejected_registration_carries_remote_error() {
    let stub = ChainStub::spawn().await.unwrap();
    stub.state.reject_register.store(true, Ordering::Relaxed);
    let client = connect(&stub, Role::GatewayService).await;

    let result = client
        .register(&Registration {
            role: Role::GatewayService,
            peer_public_key: [1; 32],
            domain: String::new(),
            stake: 0,
        })
        .await;

    match result {
        Err(RegistrationError::Rpc(RpcError::Remote { code, .. })) => assert_eq!(code, 1010),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn storage_order_is_declared_once() {
    let stub = ChainStub::spawn().await.unwrap();
    let client = connect(&stub, Role::Client).await;
    let submission = submission("test1");

    let first = client.generate_storage_order(&submission).await.unwrap();
    assert!(matches!(first, OrderReceipt::Submitted { .. }));

    let declared = stub
        .state
        .declarations
        .get(&submission.root.to_hex())
        .unwrap()
        .value()
        .clone();
    assert_eq!(declared["owner"], ALICE);
    assert_eq!(declared["bucket_name"], "test1");
    assert_eq!(declared["size"], submission.declared_size);
    assert_eq!(declared["segments"].as_array().unwrap().len(), 1);

    let second = client.generate_storage_order(&submission).await.unwrap();
    assert_eq!(
        second,
        OrderReceipt::AlreadyDeclared {
            root: submission.root
        }
    );
    assert_eq!(stub.state.declarations.len(), 1);
}

#[tokio::test]
async fn invalid_bucket_is_rejected_before_any_request() {
    let stub = ChainStub::spawn().await.unwrap();
    let client = connect(&stub, Role::Client).await;
    let before = stub.state.requests.load(Ordering::Relaxed);

    let result = client.generate_storage_order(&submission("No_Caps")).await;

    assert!(matches!(result, Err(OrderSubmissionError::InvalidBucketName(_))));
    assert_eq!(stub.state.requests.load(Ordering::Relaxed), before);
}
