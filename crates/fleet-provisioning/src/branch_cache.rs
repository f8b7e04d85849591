//! Process-wide cache of each database project's default branch

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

pub const DEFAULT_BRANCH_TTL: Duration = Duration::from_secs(300);

struct CachedBranch {
    branch_id: String,
    expires_at: Instant,
}

/// Read-through cache of `project id -> default branch id` with TTL expiry.
///
/// Construct one per process and share it. Two callers resolving the same
/// project at once may both hit the provider; the later write wins.
pub struct BranchIdCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedBranch>>,
}

impl Default for BranchIdCache {
    fn default() -> Self {
        Self::new(DEFAULT_BRANCH_TTL)
    }
}

impl BranchIdCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Expired entries are evicted on the way out.
    pub async fn get(&self, project_id: &str) -> Option<String> {
        {
            let entries = self.entries.read().await;
            match entries.get(project_id) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.branch_id.clone())
                }
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().await;
        if entries
            .get(project_id)
            .is_some_and(|entry| entry.expires_at <= Instant::now())
        {
            entries.remove(project_id);
        }
        None
    }

    /// Also drops every other expired entry.
    pub async fn insert(&self, project_id: &str, branch_id: String) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            project_id.to_string(),
            CachedBranch {
                branch_id,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Return the cached branch or run `resolve` and cache its result.
    pub async fn get_or_resolve<F, Fut, E>(&self, project_id: &str, resolve: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        if let Some(branch_id) = self.get(project_id).await {
            return Ok(branch_id);
        }

        let branch_id = resolve().await?;
        self.insert(project_id, branch_id.clone()).await;
        Ok(branch_id)
    }
}
