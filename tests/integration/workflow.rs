//! End-to-end workflow runs against the chain stub.

use cairn_core::{ConfigurationError, Policy, Role};
use cairn_services::{
    execute, OrderReceipt, PeerNode, PeerNodeConfig, RegistrationError, Step, StepError,
    StepOutcome,
};

use crate::infra::{dead_endpoint, temp_dir, workflow_config, ChainStub, ALICE, CHAIN_NAME};

#[tokio::test]
async fn gateway_run_completes_every_step() {
    let stub = ChainStub::spawn().await.unwrap();
    let config = workflow_config(vec![stub.http_url()], Role::GatewayService, Policy::Lenient);

    let report = execute(&config).await.unwrap();

    assert!(report.is_success(), "report: {report:?}");
    assert_eq!(report.records.len(), 5);
    assert_eq!(report.chain.as_deref(), Some(CHAIN_NAME));
    assert!(report.registration_tx.is_some());
    assert_eq!(report.owner.unwrap().to_ss58(), ALICE);

    let processed = report.processed.as_ref().unwrap();
    assert!(matches!(report.order, Some(OrderReceipt::Submitted { .. })));
    let declared = stub
        .state
        .declarations
        .get(&processed.root.to_hex())
        .unwrap()
        .value()
        .clone();
    assert_eq!(declared["file_name"], "sample.pdf");
    assert_eq!(declared["size"], processed.total_bytes);

    assert_eq!(report.bootstrap_connected, 0);
    assert!(report.skipped_peers.is_empty());
    assert!(config.network.workspace.join("peer.key").exists());
    assert!(config.network.workspace.join("fragments").is_dir());
}

#[tokio::test]
async fn client_role_registration_is_recovered() {
    let stub = ChainStub::spawn().await.unwrap();
    let config = workflow_config(vec![stub.http_url()], Role::Client, Policy::Lenient);

    let report = execute(&config).await.unwrap();

    assert!(matches!(
        report.outcome(Step::Register),
        Some(StepOutcome::Recovered(StepError::Registration(
            RegistrationError::UnsupportedRole(_)
        )))
    ));
    assert!(report.fatal().is_none());
    assert!(matches!(report.order, Some(OrderReceipt::Submitted { .. })));
}

#[tokio::test]
async fn rejected_registration_does_not_halt_lenient_run() {
    let stub = ChainStub::spawn().await.unwrap();
    stub.state.reject_register.store(true, std::sync::atomic::Ordering::Relaxed);
    let config = workflow_config(vec![stub.http_url()], Role::GatewayService, Policy::Lenient);

    let report = execute(&config).await.unwrap();

    assert!(report.registration_tx.is_none());
    assert!(report.outcome(Step::SubmitOrder).unwrap().is_completed());
    assert_eq!(stub.state.declarations.len(), 1);
}

#[tokio::test]
async fn strict_policy_stops_at_rejected_registration() {
    let stub = ChainStub::spawn().await.unwrap();
    stub.state.reject_register.store(true, std::sync::atomic::Ordering::Relaxed);
    let config = workflow_config(vec![stub.http_url()], Role::GatewayService, Policy::Strict);

    let report = execute(&config).await.unwrap();

    assert!(matches!(report.fatal(), Some(StepError::Registration(_))));
    assert!(report.outcome(Step::ProcessFile).is_none());
    assert!(stub.state.declarations.is_empty());
}

#[tokio::test]
async fn rejected_order_is_logged_only() {
    let stub = ChainStub::spawn().await.unwrap();
    stub.state.reject_order.store(true, std::sync::atomic::Ordering::Relaxed);
    let config = workflow_config(vec![stub.http_url()], Role::GatewayService, Policy::Lenient);

    let report = execute(&config).await.unwrap();

    assert!(matches!(
        report.outcome(Step::SubmitOrder),
        Some(StepOutcome::Recovered(StepError::OrderSubmission(_)))
    ));
    assert!(report.fatal().is_none());
    assert!(report.processed.is_some());
}

#[tokio::test]
async fn second_run_finds_order_already_declared() {
    let stub = ChainStub::spawn().await.unwrap();
    let config = workflow_config(vec![stub.http_url()], Role::GatewayService, Policy::Lenient);

    let first = execute(&config).await.unwrap();
    let second = execute(&config).await.unwrap();

    let root = first.processed.as_ref().unwrap().root;
    assert_eq!(second.processed.as_ref().unwrap().root, root);
    assert_eq!(second.order, Some(OrderReceipt::AlreadyDeclared { root }));
    assert_eq!(stub.state.declarations.len(), 1);
}

#[tokio::test]
async fn bad_owner_address_is_fatal() {
    let stub = ChainStub::spawn().await.unwrap();
    let mut config = workflow_config(vec![stub.http_url()], Role::GatewayService, Policy::Lenient);
    config.upload.owner_address = "cXnotAnAddress".into();

    let report = execute(&config).await.unwrap();

    assert!(matches!(report.fatal(), Some(StepError::AddressParse(_))));
    assert!(report.processed.is_some());
    assert!(stub.state.declarations.is_empty());
}

#[tokio::test]
async fn unreachable_chain_is_fatal_connect() {
    let dead = dead_endpoint().await.unwrap();
    let config = workflow_config(vec![dead], Role::GatewayService, Policy::Lenient);

    let report = execute(&config).await.unwrap();

    assert_eq!(report.records.len(), 1);
    assert!(matches!(
        report.fatal(),
        Some(StepError::Configuration(ConfigurationError::Unreachable { tried: 1, .. }))
    ));
}

#[tokio::test]
async fn joins_through_bootstrap_peer_and_skips_garbage() {
    let stub = ChainStub::spawn().await.unwrap();
    let bootstrap = PeerNode::start(PeerNodeConfig {
        listen_ip: [127, 0, 0, 1].into(),
        listen_port: 0,
        workspace: temp_dir("bootstrap"),
        bootstrap: Vec::new(),
        dial_timeout: std::time::Duration::from_secs(1),
    })
    .await
    .unwrap();

    let mut config = workflow_config(vec![stub.http_url()], Role::GatewayService, Policy::Lenient);
    config.network.bootstrap_nodes = vec![
        "garbage//entry".to_string(),
        bootstrap.addrs()[0].to_string(),
    ];

    let report = execute(&config).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.bootstrap_connected, 1);
    assert_eq!(report.skipped_peers.len(), 1);
    assert_eq!(report.skipped_peers[0].candidate, "garbage//entry");

    bootstrap.shutdown().await;
}
