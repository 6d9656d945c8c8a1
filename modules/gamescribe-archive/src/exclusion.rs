use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tracing::info;

use crate::error::Result;
use crate::model::DomainQuality;
use crate::store::SourceStore;

/// Why a domain was filtered before fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionReason {
    Static,
    Global(String),
    Provider { provider: String, reason: String },
}

/// Static plus learned domain exclusions. Shared between the cache (reads)
/// and the background writer (updates after each recompute).
#[derive(Debug, Default)]
pub struct ExclusionSet {
    static_domains: HashSet<String>,
    learned: RwLock<Learned>,
}

#[derive(Debug, Default)]
struct Learned {
    global: HashMap<String, String>,
    /// provider -> domain -> reason
    per_provider: HashMap<String, HashMap<String, String>>,
}

impl ExclusionSet {
    pub fn new<I, S>(static_domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            static_domains: static_domains
                .into_iter()
                .map(|d| d.as_ref().trim().to_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
            learned: RwLock::new(Learned::default()),
        }
    }

    /// Build the set and seed its learned part from previously stored exclusions.
    pub async fn load<I, S>(static_domains: I, store: &dyn SourceStore) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = Self::new(static_domains);
        let rows = store.excluded_domains().await?;
        for row in &rows {
            set.apply(row);
        }
        info!(
            static_count = set.static_domains.len(),
            learned_count = rows.len(),
            "Loaded domain exclusions"
        );
        Ok(set)
    }

    /// Check a domain (and its parent domains) for `provider`.
    pub fn check(&self, domain: &str, provider: &str) -> Option<ExclusionReason> {
        let learned = self.read();
        for candidate in domain_suffixes(domain) {
            if self.static_domains.contains(candidate) {
                return Some(ExclusionReason::Static);
            }
            if let Some(reason) = learned.global.get(candidate) {
                return Some(ExclusionReason::Global(reason.clone()));
            }
            if let Some(reason) = learned
                .per_provider
                .get(provider)
                .and_then(|domains| domains.get(candidate))
            {
                return Some(ExclusionReason::Provider {
                    provider: provider.to_string(),
                    reason: reason.clone(),
                });
            }
        }
        None
    }

    pub fn is_excluded(&self, domain: &str, provider: &str) -> bool {
        self.check(domain, provider).is_some()
    }

    /// Replace everything learned about one domain with the fresh aggregate.
    pub fn apply(&self, quality: &DomainQuality) {
        let mut learned = self.write();
        let domain = quality.domain.as_str();

        if quality.is_excluded {
            let reason = quality
                .exclusion_reason
                .clone()
                .unwrap_or_else(|| "excluded".to_string());
            if learned.global.insert(domain.to_string(), reason).is_none() {
                info!(domain, "Domain auto-excluded");
            }
        } else {
            learned.global.remove(domain);
        }

        for stats in &quality.provider_stats {
            let domains = learned.per_provider.entry(stats.provider.clone()).or_default();
            if stats.is_excluded {
                let reason = stats
                    .exclusion_reason
                    .clone()
                    .unwrap_or_else(|| "excluded".to_string());
                if domains.insert(domain.to_string(), reason).is_none() {
                    info!(domain, provider = stats.provider.as_str(), "Domain excluded for provider");
                }
            } else {
                domains.remove(domain);
            }
        }
    }

    pub fn learned_count(&self) -> usize {
        let learned = self.read();
        learned.global.len() + learned.per_provider.values().map(HashMap::len).sum::<usize>()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Learned> {
        self.learned.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Learned> {
        self.learned.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// `a.b.example.com` -> `a.b.example.com`, `b.example.com`, `example.com`.
fn domain_suffixes(domain: &str) -> impl Iterator<Item = &str> {
    let domain = domain.trim_end_matches('.');
    std::iter::successors(Some(domain), |&d| {
        d.split_once('.')
            .map(|(_, rest)| rest)
            .filter(|rest| rest.contains('.'))
    })
}
