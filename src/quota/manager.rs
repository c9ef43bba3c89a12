use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use super::policy::{plan_eviction, EvictionCandidate};
use crate::config::QuotaConfig;
use crate::domain::model::{ComputationId, ContentHash, OwnerScope, QuotaReport};
use crate::error::{Error, Result};
use crate::store::fs::{self as store_fs, EntryInfo};
use crate::store::{parse_stored_name, StorageLayout};

/// Proof that the caller holds the mutation lock of one owner scope.
pub struct ScopeGuard {
    scope: OwnerScope,
    _guard: OwnedMutexGuard<()>,
}

impl ScopeGuard {
    pub fn scope(&self) -> &OwnerScope {
        &self.scope
    }
}

impl std::fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeGuard").field("scope", &self.scope).finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvictedFile {
    pub content_hash: ContentHash,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvictedComputation {
    pub id: ComputationId,
    pub size_bytes: u64,
}

/// Usage accounting and eviction per owner scope.
///
/// Usage is always measured from disk. Every measure, decide and mutate
/// sequence runs under the scope's [`ScopeGuard`].
pub struct QuotaManager {
    layout: StorageLayout,
    config: QuotaConfig,
    locks: DashMap<OwnerScope, Arc<Mutex<()>>>,
}

impl QuotaManager {
    pub fn new(layout: StorageLayout, config: QuotaConfig) -> Self {
        Self {
            layout,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Serialize mutation of one scope.
    pub async fn lock_scope(&self, scope: &OwnerScope) -> ScopeGuard {
        let lock = self
            .locks
            .entry(scope.clone())
            .or_default()
            .value()
            .clone();
        ScopeGuard {
            scope: scope.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Total quota reported for a scope.
    pub fn quota_for(&self, scope: &OwnerScope) -> u64 {
        match scope {
            OwnerScope::User(_) => self.config.user_quota,
            OwnerScope::Guest => self
                .config
                .guest_file_quota
                .saturating_add(self.config.guest_compute_quota),
        }
    }

    /// Bytes under the scope root, files and computations together.
    pub async fn usage(&self, scope: &OwnerScope) -> Result<u64> {
        measure(self.layout.scope_root(scope)).await
    }

    pub async fn report(&self, scope: &OwnerScope) -> Result<QuotaReport> {
        let used = self.usage(scope).await?;
        Ok(QuotaReport::new(scope.clone(), used, self.quota_for(scope)))
    }

    /// Make room for `incoming` bytes of files.
    ///
    /// User scopes are never evicted: the request is rejected when it does
    /// not fit. The guest pool evicts its oldest files first, skipping
    /// `protected` ones, and nothing is removed unless the eviction is
    /// enough.
    #[instrument(skip(self, guard, protected), fields(scope = %guard.scope()))]
    pub async fn ensure_headroom(
        &self,
        guard: &ScopeGuard,
        incoming: u64,
        protected: &HashSet<ContentHash>,
    ) -> Result<Vec<EvictedFile>> {
        let scope = guard.scope();
        if let OwnerScope::User(_) = scope {
            let used = self.usage(scope).await?;
            let quota = self.config.user_quota;
            if used.saturating_add(incoming) > quota {
                return Err(Error::QuotaExceeded {
                    used,
                    requested: incoming,
                    quota,
                });
            }
            return Ok(Vec::new());
        }

        let quota = self.config.guest_file_quota;
        if incoming > quota {
            return Err(Error::CapacityExceeded {
                requested: incoming,
                quota,
            });
        }

        let files_dir = self.layout.files_dir(scope);
        let used = measure(files_dir.clone()).await?;
        if used.saturating_add(incoming) <= quota {
            debug!(used, incoming, quota, "Guest file space is sufficient");
            return Ok(Vec::new());
        }

        let candidates: Vec<EvictionCandidate<(ContentHash, PathBuf)>> = entries(files_dir)
            .await?
            .into_iter()
            .filter_map(|entry| {
                let (hash, _) = parse_stored_name(&entry.name)?;
                if protected.contains(&hash) {
                    return None;
                }
                Some(EvictionCandidate {
                    key: (hash, entry.path),
                    size: entry.size,
                    modified: entry.modified,
                })
            })
            .collect();

        let plan = plan_eviction(used, incoming, quota, &candidates);
        if !plan.sufficient {
            return Err(Error::CapacityExceeded {
                requested: incoming,
                quota,
            });
        }

        let mut evicted = Vec::with_capacity(plan.victims.len());
        for victim in plan.victims {
            let (hash, path) = victim.key;
            remove(path).await?;
            warn!(hash = %hash, size = victim.size, "Evicted guest file");
            evicted.push(EvictedFile {
                content_hash: hash,
                size_bytes: victim.size,
            });
        }
        info!(evicted = evicted.len(), freed = plan.freed, "Freed guest file space");
        Ok(evicted)
    }

    /// Bring guest computation storage back within its quota, oldest
    /// computation directories first. `keep` is only evicted when nothing
    /// else is left and it alone exceeds the quota. User scopes are untouched.
    #[instrument(skip(self, guard), fields(scope = %guard.scope()))]
    pub async fn reclaim_compute_space(
        &self,
        guard: &ScopeGuard,
        keep: Option<ComputationId>,
    ) -> Result<Vec<EvictedComputation>> {
        let scope = guard.scope();
        if !scope.is_guest() {
            return Ok(Vec::new());
        }

        let quota = self.config.guest_compute_quota;
        let dir = self.layout.computations_dir(scope);
        let used = measure(dir.clone()).await?;
        if used <= quota {
            debug!(used, quota, "Guest compute space is sufficient");
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        let mut kept = None;
        for entry in entries(dir).await? {
            let Ok(id) = ComputationId::parse(&entry.name) else {
                continue;
            };
            let candidate = EvictionCandidate {
                key: (id, entry.path),
                size: entry.size,
                modified: entry.modified,
            };
            if Some(id) == keep {
                kept = Some(candidate);
            } else {
                candidates.push(candidate);
            }
        }

        let mut plan = plan_eviction(used, 0, quota, &candidates);
        if !plan.sufficient {
            if let Some(current) = kept {
                warn!(computation = %current.key.0, "Current computation alone exceeds the guest compute quota");
                plan.victims.push(current);
            }
        }

        let mut evicted = Vec::with_capacity(plan.victims.len());
        for victim in plan.victims {
            let (id, path) = victim.key;
            remove(path).await?;
            warn!(computation = %id, size = victim.size, "Evicted guest computation");
            evicted.push(EvictedComputation {
                id,
                size_bytes: victim.size,
            });
        }
        Ok(evicted)
    }
}

async fn measure(path: PathBuf) -> Result<u64> {
    Ok(tokio::task::spawn_blocking(move || store_fs::dir_size(&path)).await??)
}

async fn entries(dir: PathBuf) -> Result<Vec<EntryInfo>> {
    Ok(tokio::task::spawn_blocking(move || store_fs::list_entries(&dir)).await??)
}

async fn remove(path: PathBuf) -> Result<()> {
    Ok(tokio::task::spawn_blocking(move || store_fs::remove_path(&path)).await??)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn manager(root: &std::path::Path, file_quota: u64, compute_quota: u64) -> QuotaManager {
        QuotaManager::new(
            StorageLayout::new(root),
            QuotaConfig {
                user_quota: 1000,
                guest_file_quota: file_quota,
                guest_compute_quota: compute_quota,
            },
        )
    }

    fn put_file(layout: &StorageLayout, scope: &OwnerScope, fill: char, size: usize) -> ContentHash {
        let hash = ContentHash::parse(&fill.to_string().repeat(64)).unwrap();
        let dir = layout.files_dir(scope);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{}_f.sdf", hash)), vec![b'x'; size]).unwrap();
        hash
    }

    #[tokio::test]
    async fn test_user_scope_rejects_without_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 1000, 1000);
        let alice = OwnerScope::user("alice").unwrap();
        put_file(&StorageLayout::new(dir.path()), &alice, 'a', 900);

        let guard = manager.lock_scope(&alice).await;
        assert_matches!(
            manager.ensure_headroom(&guard, 200, &HashSet::new()).await,
            Err(Error::QuotaExceeded { used: 900, requested: 200, quota: 1000 })
        );
        assert_eq!(manager.usage(&alice).await.unwrap(), 900);
    }

    #[tokio::test]
    async fn test_guest_evicts_oldest_file() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let manager = manager(dir.path(), 1000, 1000);
        let guest = OwnerScope::Guest;

        let f1 = put_file(&layout, &guest, 'a', 300);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let f2 = put_file(&layout, &guest, 'b', 300);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let f3 = put_file(&layout, &guest, 'c', 300);

        let guard = manager.lock_scope(&guest).await;
        let evicted = manager.ensure_headroom(&guard, 200, &HashSet::new()).await.unwrap();

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].content_hash, f1);
        assert_eq!(manager.usage(&guest).await.unwrap(), 600);
        let _ = (f2, f3);
    }

    #[tokio::test]
    async fn test_guest_protected_files_survive() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let manager = manager(dir.path(), 1000, 1000);
        let guest = OwnerScope::Guest;

        let f1 = put_file(&layout, &guest, 'a', 600);
        let guard = manager.lock_scope(&guest).await;

        let protected = HashSet::from([f1]);
        assert_matches!(
            manager.ensure_headroom(&guard, 500, &protected).await,
            Err(Error::CapacityExceeded { requested: 500, quota: 1000 })
        );
        assert_eq!(manager.usage(&guest).await.unwrap(), 600);
    }

    #[tokio::test]
    async fn test_guest_item_larger_than_quota() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 1000, 1000);
        let guard = manager.lock_scope(&OwnerScope::Guest).await;

        assert_matches!(
            manager.ensure_headroom(&guard, 1001, &HashSet::new()).await,
            Err(Error::CapacityExceeded { .. })
        );
    }

    #[tokio::test]
    async fn test_reclaim_compute_space_keeps_current() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let manager = manager(dir.path(), 1000, 500);
        let guest = OwnerScope::Guest;

        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = ComputationId::new();
            let path = layout.charges_dir(&guest, &id);
            std::fs::create_dir_all(&path).unwrap();
            std::fs::write(path.join("out.chg"), vec![b'1'; 200]).unwrap();
            ids.push(id);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let guard = manager.lock_scope(&guest).await;
        let evicted = manager
            .reclaim_compute_space(&guard, Some(ids[0]))
            .await
            .unwrap();

        // 600 bytes over a 500 byte quota: the oldest non-current one goes.
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, ids[1]);
        assert!(layout.computation_dir(&guest, &ids[0]).exists());
    }

    #[tokio::test]
    async fn test_report() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), 2000, 3000);

        let report = manager.report(&OwnerScope::Guest).await.unwrap();
        assert_eq!(report.quota, 5000);
        assert_eq!(report.used, 0);
        assert_eq!(report.available, 5000);
    }

    #[tokio::test]
    async fn test_scope_lock_serializes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(manager(dir.path(), 1000, 1000));

        let guard = manager.lock_scope(&OwnerScope::Guest).await;
        let other = manager.clone();
        let waiter = tokio::spawn(async move {
            let _guard = other.lock_scope(&OwnerScope::Guest).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // Another scope is not blocked.
        let _user = manager.lock_scope(&OwnerScope::user("bob").unwrap()).await;

        drop(guard);
        waiter.await.unwrap();
    }
}
