//! Bootstrap peer address parsing.
//!
//! Candidates arrive as a whitespace-separated list. Each candidate expands
//! to zero or more multiaddrs; candidates that cannot be parsed or resolved
//! are set aside as skipped entries and never fail the whole list. Output
//! order follows input order and duplicates are kept.
//!
//! Accepted candidate forms:
//!   - a literal multiaddr (`/ip4/1.2.3.4/tcp/4001/p2p/...`)
//!   - a `/dnsaddr/{domain}` multiaddr, expanded via `_dnsaddr.{domain}` TXT
//!   - a bare domain name, expanded via its own TXT records
//!
//! TXT records of the form `dnsaddr=<multiaddr>` are followed, recursively
//! for nested `/dnsaddr/` values.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use multiaddr::{Multiaddr, Protocol};

const MAX_DNS_RECURSION_DEPTH: usize = 4;
const DNSADDR_RECORD_PREFIX: &str = "dnsaddr=";

/// A candidate that produced no usable addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPeer {
    pub candidate: String,
    pub reason: String,
}

/// Best-effort collection of parsed bootstrap addresses.
#[derive(Debug, Clone, Default)]
pub struct PeerAddressList {
    addrs: Vec<Multiaddr>,
    skipped: Vec<SkippedPeer>,
}

impl PeerAddressList {
    /// Parse a whitespace-separated list of literal multiaddrs.
    ///
    /// Domain and `/dnsaddr/` candidates are not resolved here; use
    /// [`PeerAddressList::resolve`] for that.
    pub fn parse(text: &str) -> Self {
        Self::from_candidates(text.split_whitespace())
    }

    /// Parse already-split candidates as literal multiaddrs.
    pub fn from_candidates<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for candidate in candidates {
            let candidate = candidate.as_ref();
            match candidate.parse::<Multiaddr>() {
                Ok(addr) => list.addrs.push(addr),
                Err(e) => list.skip(candidate, e.to_string()),
            }
        }
        list
    }

    /// Parse candidates, expanding domains and `/dnsaddr/` entries through
    /// `resolver`.
    pub async fn resolve<I, S, R>(candidates: I, resolver: &R) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        R: TxtResolver,
    {
        let mut list = Self::default();

        for candidate in candidates {
            let candidate = candidate.as_ref();
            // Guards recursion cycles within one candidate only.
            let mut seen = HashSet::new();
            let expanded = match candidate.parse::<Multiaddr>() {
                Ok(addr) => expand_multiaddr(addr, resolver, &mut seen, 0).await,
                Err(parse_err) if looks_like_domain(candidate) => {
                    expand_domain(candidate, resolver, &mut seen, 0)
                        .await
                        .map_err(|e| format!("{parse_err}; {e}"))
                }
                Err(parse_err) => Err(parse_err.to_string()),
            };

            match expanded {
                Ok(addrs) => {
                    tracing::debug!(candidate, resolved = addrs.len(), "bootstrap candidate parsed");
                    list.addrs.extend(addrs);
                }
                Err(reason) => list.skip(candidate, reason),
            }
        }
        list
    }

    fn skip(&mut self, candidate: &str, reason: String) {
        tracing::warn!(candidate, %reason, "skipping bootstrap candidate");
        self.skipped.push(SkippedPeer {
            candidate: candidate.to_string(),
            reason,
        });
    }

    pub fn addrs(&self) -> &[Multiaddr] {
        &self.addrs
    }

    pub fn skipped(&self) -> &[SkippedPeer] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn into_addrs(self) -> Vec<Multiaddr> {
        self.addrs
    }
}

/// Parse a whitespace-separated list of literal multiaddrs.
pub fn parse_peer_addresses(list: &str) -> PeerAddressList {
    PeerAddressList::parse(list)
}

/// Parse a whitespace-separated list, expanding DNS candidates through
/// `resolver`.
pub async fn resolve_peer_addresses<R: TxtResolver>(list: &str, resolver: &R) -> PeerAddressList {
    PeerAddressList::resolve(list.split_whitespace(), resolver).await
}

// ── TXT resolution ────────────────────────────────────────────────────────────

/// Source of DNS TXT records.
pub trait TxtResolver: Sync {
    fn txt_records(&self, name: &str) -> impl Future<Output = Result<Vec<String>, String>> + Send;
}

/// System DNS resolver.
pub struct DnsTxtResolver {
    inner: TokioResolver,
}

impl DnsTxtResolver {
    pub fn new() -> Self {
        Self {
            inner: TokioResolver::builder_with_config(
                ResolverConfig::default(),
                TokioConnectionProvider::default(),
            )
            .with_options(ResolverOpts::default())
            .build(),
        }
    }
}

impl Default for DnsTxtResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TxtResolver for DnsTxtResolver {
    async fn txt_records(&self, name: &str) -> Result<Vec<String>, String> {
        let lookup = self
            .inner
            .txt_lookup(name)
            .await
            .map_err(|e| format!("TXT lookup for {name} failed: {e}"))?;

        let mut records = Vec::new();
        for record in lookup.iter() {
            for txt in record.txt_data() {
                records.push(String::from_utf8_lossy(txt).into_owned());
            }
        }
        Ok(records)
    }
}

type Expansion<'a> = Pin<Box<dyn Future<Output = Result<Vec<Multiaddr>, String>> + Send + 'a>>;

fn expand_multiaddr<'a, R: TxtResolver>(
    addr: Multiaddr,
    resolver: &'a R,
    seen: &'a mut HashSet<String>,
    depth: usize,
) -> Expansion<'a> {
    Box::pin(async move {
        let domain = addr.iter().find_map(|p| match p {
            Protocol::Dnsaddr(domain) => Some(domain.to_string()),
            _ => None,
        });
        match domain {
            Some(domain) => {
                let name = format!("_dnsaddr.{domain}");
                expand_domain(&name, resolver, seen, depth).await
            }
            None => Ok(vec![addr]),
        }
    })
}

fn expand_domain<'a, R: TxtResolver>(
    name: &'a str,
    resolver: &'a R,
    seen: &'a mut HashSet<String>,
    depth: usize,
) -> Expansion<'a> {
    Box::pin(async move {
        if depth > MAX_DNS_RECURSION_DEPTH {
            return Err(format!("dnsaddr recursion deeper than {MAX_DNS_RECURSION_DEPTH}"));
        }
        if !seen.insert(name.to_string()) {
            return Ok(Vec::new());
        }

        let records = resolver.txt_records(name).await?;
        let mut addrs = Vec::new();
        for record in records {
            let Some(value) = record.strip_prefix(DNSADDR_RECORD_PREFIX) else {
                continue;
            };
            match value.parse::<Multiaddr>() {
                Ok(addr) => addrs.extend(expand_multiaddr(addr, resolver, seen, depth + 1).await?),
                Err(e) => tracing::warn!(value, error = %e, "ignoring malformed dnsaddr record"),
            }
        }
        Ok(addrs)
    })
}

fn looks_like_domain(candidate: &str) -> bool {
    candidate.contains('.')
        && !candidate.contains('/')
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}
