//! Local peer node.
//!
//! Binds a TCP listener, loads (or creates) a persistent X25519 identity
//! from the workspace, and joins the network by dialing bootstrap peers.
//!
//! Peers greet each other by exchanging their 32-byte public keys:
//!
//!   → HELLO_MAGIC (4) || public_key (32)
//!   ← HELLO_MAGIC (4) || public_key (32)
//!
//! Bootstrap dialing is best-effort: failures are logged and counted, never
//! returned. Only workspace, identity, and bind failures stop startup.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cairn_core::crypto::Keypair;
use dashmap::DashMap;
use multiaddr::{Multiaddr, Protocol};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

const HELLO_MAGIC: [u8; 4] = *b"CRN1";
const IDENTITY_FILE: &str = "peer.key";

/// Peers discovered by this node, keyed on public key.
pub type PeerTable = Arc<DashMap<[u8; 32], SocketAddr>>;

#[derive(Debug, Clone)]
pub struct PeerNodeConfig {
    pub listen_ip: IpAddr,
    /// 0 = OS-assigned.
    pub listen_port: u16,
    pub workspace: PathBuf,
    pub bootstrap: Vec<Multiaddr>,
    pub dial_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkStartupError {
    #[error("failed to prepare workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("peer identity at {path} is corrupt: expected 32 bytes, found {len}")]
    CorruptIdentity { path: PathBuf, len: usize },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// A running peer node. Dropping it stops the accept loop.
pub struct PeerNode {
    keypair: Arc<Keypair>,
    local_addr: SocketAddr,
    peers: PeerTable,
    bootstrap_connected: usize,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: Option<JoinHandle<()>>,
}

impl PeerNode {
    /// Start the node: prepare the workspace, load the identity, bind, then
    /// dial every bootstrap address once.
    pub async fn start(config: PeerNodeConfig) -> Result<Self, NetworkStartupError> {
        std::fs::create_dir_all(&config.workspace).map_err(|source| {
            NetworkStartupError::Workspace {
                path: config.workspace.clone(),
                source,
            }
        })?;
        let keypair = Arc::new(load_or_create_identity(&config.workspace)?);

        let bind_addr = SocketAddr::new(config.listen_ip, config.listen_port);
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| NetworkStartupError::Bind {
                addr: bind_addr,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| NetworkStartupError::Bind {
                addr: bind_addr,
                source,
            })?;

        tracing::info!(
            addr = %local_addr,
            public_key = hex::encode(keypair.public),
            "peer node listening"
        );

        let peers: PeerTable = Arc::new(DashMap::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            keypair.public,
            peers.clone(),
            config.dial_timeout,
            shutdown_rx,
        ));

        let mut node = Self {
            keypair,
            local_addr,
            peers,
            bootstrap_connected: 0,
            shutdown_tx,
            accept_task: Some(accept_task),
        };

        if config.bootstrap.is_empty() {
            tracing::warn!("no bootstrap peers configured, running standalone");
        }
        for addr in &config.bootstrap {
            match node.dial(addr, config.dial_timeout).await {
                Ok(peer_key) => {
                    node.bootstrap_connected += 1;
                    tracing::info!(%addr, peer = hex::encode(&peer_key[..8]), "bootstrap peer connected");
                }
                Err(e) => tracing::warn!(%addr, error = %e, "bootstrap dial failed"),
            }
        }

        Ok(node)
    }

    async fn dial(&self, addr: &Multiaddr, timeout: Duration) -> std::io::Result<[u8; 32]> {
        let target = socket_target(addr)?;
        let mut stream = tokio::time::timeout(timeout, TcpStream::connect(target.as_str()))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timed out"))??;
        let remote = stream.peer_addr()?;
        let peer_key = tokio::time::timeout(timeout, exchange_hello(&mut stream, self.keypair.public))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "hello timed out"))??;
        self.peers.insert(peer_key, remote);
        Ok(peer_key)
    }

    /// Listen addresses as multiaddrs. An unspecified listen IP is reported
    /// as loopback.
    pub fn addrs(&self) -> Vec<Multiaddr> {
        let ip = if self.local_addr.ip().is_unspecified() {
            match self.local_addr.ip() {
                IpAddr::V4(_) => IpAddr::from([127, 0, 0, 1]),
                IpAddr::V6(_) => IpAddr::from([0, 0, 0, 0, 0, 0, 0, 1]),
            }
        } else {
            self.local_addr.ip()
        };
        let ip_proto = match ip {
            IpAddr::V4(v4) => Protocol::Ip4(v4),
            IpAddr::V6(v6) => Protocol::Ip6(v6),
        };
        vec![Multiaddr::empty()
            .with(ip_proto)
            .with(Protocol::Tcp(self.local_addr.port()))]
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stable network identity: the hex-encoded public key.
    pub fn peer_id(&self) -> String {
        hex::encode(self.keypair.public)
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public
    }

    /// Number of bootstrap peers that answered the greeting at startup.
    pub fn bootstrap_connected(&self) -> usize {
        self.bootstrap_connected
    }

    /// Snapshot of every peer greeted so far, inbound or outbound.
    pub fn known_peers(&self) -> Vec<([u8; 32], SocketAddr)> {
        self.peers.iter().map(|e| (*e.key(), *e.value())).collect()
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "accept loop ended abnormally");
            }
        }
        tracing::info!(addr = %self.local_addr, "peer node stopped");
    }
}

impl Drop for PeerNode {
    fn drop(&mut self) {
        if let Some(task) = &self.accept_task {
            task.abort();
        }
    }
}

/// Accept inbound peers until shutdown. Each greeting runs in a task owned
/// by the loop and is bounded by `greeting_timeout`; pending greetings are
/// aborted when the loop ends or is dropped.
async fn accept_loop(
    listener: TcpListener,
    public: [u8; 32],
    peers: PeerTable,
    greeting_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut greetings = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            Some(_) = greetings.join_next(), if !greetings.is_empty() => {}
            accepted = listener.accept() => {
                let (mut stream, remote) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let peers = peers.clone();
                greetings.spawn(async move {
                    match tokio::time::timeout(greeting_timeout, exchange_hello(&mut stream, public)).await {
                        Ok(Ok(peer_key)) => {
                            tracing::debug!(%remote, peer = hex::encode(&peer_key[..8]), "inbound peer greeted");
                            peers.insert(peer_key, remote);
                        }
                        Ok(Err(e)) => tracing::debug!(%remote, error = %e, "inbound greeting failed"),
                        Err(_) => tracing::debug!(%remote, "inbound greeting timed out"),
                    }
                });
            }
        }
    }
    greetings.shutdown().await;
}

async fn exchange_hello(stream: &mut TcpStream, public: [u8; 32]) -> std::io::Result<[u8; 32]> {
    let mut hello = [0u8; 36];
    hello[..4].copy_from_slice(&HELLO_MAGIC);
    hello[4..].copy_from_slice(&public);
    stream.write_all(&hello).await?;

    let mut reply = [0u8; 36];
    stream.read_exact(&mut reply).await?;
    if reply[..4] != HELLO_MAGIC {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "peer greeting has wrong magic",
        ));
    }
    let mut peer_key = [0u8; 32];
    peer_key.copy_from_slice(&reply[4..]);
    Ok(peer_key)
}

/// Render the dialable `host:port` portion of a multiaddr.
fn socket_target(addr: &Multiaddr) -> std::io::Result<String> {
    let mut host = None;
    let mut port = None;
    for proto in addr.iter() {
        match proto {
            Protocol::Ip4(ip) => host = Some(ip.to_string()),
            Protocol::Ip6(ip) => host = Some(format!("[{ip}]")),
            Protocol::Dns(name) | Protocol::Dns4(name) | Protocol::Dns6(name) => {
                host = Some(name.to_string())
            }
            Protocol::Tcp(p) => port = Some(p),
            _ => {}
        }
    }
    match (host, port) {
        (Some(host), Some(port)) => Ok(format!("{host}:{port}")),
        _ => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{addr} has no dialable ip/tcp component"),
        )),
    }
}

fn load_or_create_identity(workspace: &Path) -> Result<Keypair, NetworkStartupError> {
    let path = workspace.join(IDENTITY_FILE);
    let io_err = |source| NetworkStartupError::Workspace {
        path: path.clone(),
        source,
    };

    if path.exists() {
        let bytes = std::fs::read(&path).map_err(io_err)?;
        let private: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| NetworkStartupError::CorruptIdentity {
                path: path.clone(),
                len: bytes.len(),
            })?;
        return Ok(Keypair::from_private(private));
    }

    let keypair = Keypair::generate();
    std::fs::write(&path, *keypair.private_bytes()).map_err(io_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).map_err(io_err)?;
    }
    tracing::info!(path = %path.display(), "generated new peer identity");
    Ok(keypair)
}
