//! IP reputation for botsense.
//!
//! Two layers feed the `malicious_ip` signal: static allow/block lists held
//! in prefix tries, and an optional remote reputation service consulted
//! with a bounded timeout. A failing or slow remote never stalls scoring;
//! the configured [`FailurePolicy`] decides what its silence means.

mod remote;
mod trie;

use std::io::BufRead;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use botsense_common::{FailurePolicy, IpReputationConfig};
use dashmap::DashMap;
use ipnet::IpNet;
use tracing::{debug, info, warn};

pub use crate::remote::{parse_verdict, HttpReputationSource, ReputationSource};
use crate::trie::PrefixSet;

/// The result of checking an IP address against the static lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpAction {
    /// The IP is explicitly allowed (present in the allowlist).
    Allow,
    /// The IP is blocked (present in the blocklist).
    Block,
    /// The IP is not in any list; no opinion.
    None,
}

/// Static allow/block lists backed by prefix tries.
///
/// Uses `ArcSwap` for lock-free reads, so lists can be hot-reloaded without
/// blocking lookups in the request path.
pub struct IpReputation {
    blocklist: ArcSwap<PrefixSet>,
    allowlist: ArcSwap<PrefixSet>,
}

impl IpReputation {
    pub fn new() -> Self {
        Self {
            blocklist: ArcSwap::from_pointee(PrefixSet::new()),
            allowlist: ArcSwap::from_pointee(PrefixSet::new()),
        }
    }

    /// Load a blocklist from a file.
    ///
    /// One IP address or CIDR range per line; empty lines and `#` comments
    /// are skipped, bare addresses become host routes. The new set is
    /// swapped in atomically. Returns the number of entries loaded.
    pub fn load_blocklist(&self, path: &Path) -> anyhow::Result<usize> {
        let set = load_prefixes_from_file(path)?;
        let count = set.len();
        self.blocklist.store(Arc::new(set));
        info!(path = %path.display(), count, "loaded blocklist");
        Ok(count)
    }

    /// Load an allowlist from a file. Same format as the blocklist.
    pub fn load_allowlist(&self, path: &Path) -> anyhow::Result<usize> {
        let set = load_prefixes_from_file(path)?;
        let count = set.len();
        self.allowlist.store(Arc::new(set));
        info!(path = %path.display(), count, "loaded allowlist");
        Ok(count)
    }

    pub fn is_blocked(&self, addr: IpAddr) -> bool {
        self.blocklist.load().contains(addr)
    }

    pub fn is_allowed(&self, addr: IpAddr) -> bool {
        self.allowlist.load().contains(addr)
    }

    /// Check an IP address against both lists. The allowlist wins.
    pub fn check(&self, addr: IpAddr) -> IpAction {
        if self.is_allowed(addr) {
            IpAction::Allow
        } else if self.is_blocked(addr) {
            IpAction::Block
        } else {
            IpAction::None
        }
    }

    /// Reload both lists. `None` clears the list; a failing load leaves the
    /// existing list in place and returns the error.
    pub fn reload_from_config(
        &self,
        blocklist_path: Option<&Path>,
        allowlist_path: Option<&Path>,
    ) -> anyhow::Result<()> {
        match blocklist_path {
            Some(path) => {
                self.load_blocklist(path)?;
            }
            None => {
                self.blocklist.store(Arc::new(PrefixSet::new()));
                debug!("cleared blocklist (no path configured)");
            }
        }

        match allowlist_path {
            Some(path) => {
                self.load_allowlist(path)?;
            }
            None => {
                self.allowlist.store(Arc::new(PrefixSet::new()));
                debug!("cleared allowlist (no path configured)");
            }
        }

        Ok(())
    }
}

impl Default for IpReputation {
    fn default() -> Self {
        Self::new()
    }
}

fn load_prefixes_from_file(path: &Path) -> anyhow::Result<PrefixSet> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", path.display(), e))?;
    let reader = std::io::BufReader::new(file);

    let mut set = PrefixSet::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if let Ok(network) = trimmed.parse::<IpNet>() {
            set.insert(network);
        } else if let Ok(addr) = trimmed.parse::<IpAddr>() {
            set.insert(IpNet::from(addr));
        } else {
            warn!(
                path = %path.display(),
                line = line_num + 1,
                content = trimmed,
                "skipping unparseable line"
            );
        }
    }

    Ok(set)
}

/// Where a [`ReputationVerdict`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    Allowlist,
    Blocklist,
    Remote,
    Cache,
    /// The remote lookup failed or timed out and the failure policy decided.
    Fallback,
    /// No list matched and no remote is configured.
    NoOpinion,
}

impl VerdictSource {
    pub fn as_str(self) -> &'static str {
        match self {
            VerdictSource::Allowlist => "allowlist",
            VerdictSource::Blocklist => "blocklist",
            VerdictSource::Remote => "remote",
            VerdictSource::Cache => "cache",
            VerdictSource::Fallback => "fallback",
            VerdictSource::NoOpinion => "no_opinion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReputationVerdict {
    pub malicious: bool,
    pub source: VerdictSource,
}

struct RemoteLookup {
    source: Arc<dyn ReputationSource>,
    timeout: Duration,
    cache_ttl: Duration,
}

/// Combines the static lists with the optional remote source.
pub struct ReputationChecker {
    lists: Arc<IpReputation>,
    remote: Option<RemoteLookup>,
    failure_policy: FailurePolicy,
    cache: DashMap<IpAddr, (bool, Instant)>,
}

impl ReputationChecker {
    pub fn new(lists: Arc<IpReputation>, failure_policy: FailurePolicy) -> Self {
        Self {
            lists,
            remote: None,
            failure_policy,
            cache: DashMap::new(),
        }
    }

    /// Attach a remote source. Each lookup is bounded by `timeout`; answers
    /// are cached for `cache_ttl`.
    pub fn with_remote(
        mut self,
        source: Arc<dyn ReputationSource>,
        timeout: Duration,
        cache_ttl: Duration,
    ) -> Self {
        self.remote = Some(RemoteLookup {
            source,
            timeout,
            cache_ttl,
        });
        self
    }

    /// Build from configuration. Unreadable list files are logged and
    /// skipped; an unbuildable HTTP client is an error.
    pub fn from_config(config: &IpReputationConfig) -> anyhow::Result<Self> {
        let lists = Arc::new(IpReputation::new());
        if let Some(ref path) = config.blocklist {
            if let Err(e) = lists.load_blocklist(path) {
                warn!(error = %e, "failed to load IP blocklist");
            }
        }
        if let Some(ref path) = config.allowlist {
            if let Err(e) = lists.load_allowlist(path) {
                warn!(error = %e, "failed to load IP allowlist");
            }
        }

        let mut checker = Self::new(lists, config.failure_policy);
        if let Some(ref remote) = config.remote {
            let timeout = Duration::from_millis(remote.timeout_ms);
            let source = HttpReputationSource::new(&remote.endpoint, timeout)?;
            info!(
                endpoint = %remote.endpoint,
                timeout_ms = remote.timeout_ms,
                failure_policy = ?config.failure_policy,
                "remote IP reputation enabled"
            );
            checker = checker.with_remote(
                Arc::new(source),
                timeout,
                Duration::from_secs(remote.cache_ttl_secs),
            );
        }
        Ok(checker)
    }

    pub fn lists(&self) -> &Arc<IpReputation> {
        &self.lists
    }

    /// Decide whether `addr` is malicious. Never fails: list hits answer
    /// immediately, remote failures fall back to the failure policy.
    pub async fn check(&self, addr: IpAddr) -> ReputationVerdict {
        match self.lists.check(addr) {
            IpAction::Allow => {
                return ReputationVerdict {
                    malicious: false,
                    source: VerdictSource::Allowlist,
                }
            }
            IpAction::Block => {
                return ReputationVerdict {
                    malicious: true,
                    source: VerdictSource::Blocklist,
                }
            }
            IpAction::None => {}
        }

        let Some(remote) = &self.remote else {
            return ReputationVerdict {
                malicious: false,
                source: VerdictSource::NoOpinion,
            };
        };

        if let Some(cached) = self.cache.get(&addr) {
            let (malicious, stored_at) = *cached;
            if stored_at.elapsed() < remote.cache_ttl {
                return ReputationVerdict {
                    malicious,
                    source: VerdictSource::Cache,
                };
            }
        }

        let outcome = tokio::time::timeout(remote.timeout, remote.source.is_malicious(addr)).await;
        match outcome {
            Ok(Ok(malicious)) => {
                self.cache.insert(addr, (malicious, Instant::now()));
                ReputationVerdict {
                    malicious,
                    source: VerdictSource::Remote,
                }
            }
            Ok(Err(e)) => {
                warn!(ip = %addr, error = %e, policy = ?self.failure_policy, "reputation lookup failed");
                self.fallback()
            }
            Err(_) => {
                warn!(
                    ip = %addr,
                    timeout_ms = remote.timeout.as_millis() as u64,
                    policy = ?self.failure_policy,
                    "reputation lookup timed out"
                );
                self.fallback()
            }
        }
    }

    fn fallback(&self) -> ReputationVerdict {
        ReputationVerdict {
            malicious: self.failure_policy == FailurePolicy::Closed,
            source: VerdictSource::Fallback,
        }
    }

    /// Drop cached answers older than the cache TTL.
    pub fn purge_cache(&self) {
        let Some(remote) = &self.remote else {
            return;
        };
        self.cache
            .retain(|_, (_, stored_at)| stored_at.elapsed() < remote.cache_ttl);
        debug!(remaining = self.cache.len(), "reputation cache purge complete");
    }
}
