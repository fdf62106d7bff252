//! Blacklist and in-run duplicate filtering of candidate links.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, instrument, warn};

use crate::db::{self, Pool};
use crate::model::CandidateLink;

/// What to do with a candidate when the blacklist lookup itself fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlacklistPolicy {
    /// Treat the host as not blacklisted and keep going.
    #[default]
    FailOpen,
    /// Drop the candidate.
    FailClosed,
}

/// Membership check against the durable blacklist.
#[async_trait]
pub trait Blacklist: Send + Sync {
    async fn contains(&self, host: &str) -> anyhow::Result<bool>;
}

#[async_trait]
impl Blacklist for Pool {
    async fn contains(&self, host: &str) -> anyhow::Result<bool> {
        db::is_blacklisted(self, host).await
    }
}

/// Drop blacklisted candidates, then keep only the first candidate per host.
#[instrument(skip_all, fields(candidates = candidates.len()))]
pub async fn schedule(
    blacklist: &dyn Blacklist,
    policy: BlacklistPolicy,
    candidates: Vec<CandidateLink>,
) -> Vec<CandidateLink> {
    let mut allowed = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let host = candidate.host();
        let blocked = match blacklist.contains(&host).await {
            Ok(found) => found,
            Err(err) => {
                warn!(
                    ?err,
                    %host,
                    ?policy,
                    "error checking if candidate has already been discovered"
                );
                policy == BlacklistPolicy::FailClosed
            }
        };
        if blocked {
            debug!(%host, "skipping blacklisted host");
            continue;
        }
        allowed.push(candidate);
    }
    dedup_by_host(allowed)
}

/// Keep the first candidate for every host, preserving order.
pub fn dedup_by_host(candidates: Vec<CandidateLink>) -> Vec<CandidateLink> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.host()))
        .collect()
}
