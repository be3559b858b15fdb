//! Distributed lock manager for session and ingress mutations.
//!
//! Locks are lease-bound records in the consistent KV store:
//! - **Acquisition** is a transactional create-if-absent of the lock key,
//!   bound to a freshly granted lease — only one holder can commit.
//! - **Liveness** comes from a background renewer task that keeps the lease
//!   alive while the holder runs. If the renewer fails, renewal stops and the
//!   lease expires server-side, releasing the lock after at most the TTL.
//! - **Release** cancels the renewer exactly once, then revokes the lease,
//!   which deletes the lock key.
//!
//! A lock record exists in the KV iff exactly one holder believes it owns the
//! lock.
//!
//! # Ordering discipline
//!
//! Locks are **not reentrant**. Callers that need both a session lock and the
//! shared ingress lock must acquire the session lock first, then the ingress
//! lock, and release in reverse order. Deviating risks deadlock under
//! concurrent create/delete on different sessions.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::kv::{KvStore, LeaseId};

/// Opaque value stored under a held lock key.
const LOCK_SENTINEL: &[u8] = b"1";

/// Key layout for lock records.
///
/// Lock keys live under their own prefix so they can never collide with
/// session records, which share the same KV keyspace.
pub mod paths {
    /// Prefix under which all lock records are stored.
    pub const LOCK_PREFIX: &str = "locks/";

    /// Returns the KV key for the lock named `name`.
    #[must_use]
    pub fn lock_key(name: &str) -> String {
        format!("{LOCK_PREFIX}{name}")
    }
}

/// Tunable parameters for lock acquisition and renewal.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Lease TTL granted per acquisition.
    pub ttl: Duration,
    /// Sleep between keep-alives; must stay below `ttl`.
    pub renew_interval: Duration,
    /// Deadline for a single keep-alive call.
    pub keep_alive_timeout: Duration,
    /// First backoff sleep on contention.
    pub initial_backoff: Duration,
    /// Cap applied to each backoff sleep.
    pub max_backoff: Duration,
    /// Acquisition fails once the doubled backoff exceeds
    /// `max_backoff * budget_factor`.
    pub budget_factor: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
            renew_interval: Duration::from_secs(8),
            keep_alive_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
            budget_factor: 8,
        }
    }
}

/// Leased mutual-exclusion primitive keyed by string.
pub struct LockManager {
    kv: Arc<dyn KvStore>,
    config: LockConfig,
}

impl LockManager {
    /// Creates a lock manager with default timings (10 s TTL, 8 s renewal).
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self::with_config(kv, LockConfig::default())
    }

    /// Creates a lock manager with explicit timings (primarily for tests).
    #[must_use]
    pub fn with_config(kv: Arc<dyn KvStore>, config: LockConfig) -> Self {
        Self { kv, config }
    }

    /// Acquires the lock named `name`, retrying with exponential backoff
    /// while another holder exists.
    ///
    /// # Errors
    ///
    /// Returns `Error::Contention` once the backoff budget is exhausted, and
    /// propagates KV transport failures immediately.
    pub async fn acquire(&self, name: &str) -> Result<LockGuard> {
        let budget = self.config.max_backoff * self.config.budget_factor;
        let mut backoff = self.config.initial_backoff;
        loop {
            match self.try_acquire(name).await {
                Ok(guard) => return Ok(guard),
                Err(Error::Contention { .. }) => {
                    let delay = backoff.min(self.config.max_backoff);
                    tracing::debug!(lock = name, ?delay, "lock held by another process, backing off");
                    tokio::time::sleep(delay).await;
                    backoff = backoff.saturating_mul(2);
                    if backoff > budget {
                        return Err(Error::Contention {
                            name: name.to_string(),
                            message: "backoff budget exhausted".into(),
                        });
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Attempts to acquire the lock once (no retries).
    async fn try_acquire(&self, name: &str) -> Result<LockGuard> {
        let lease = self.kv.grant(self.config.ttl).await?;
        let key = paths::lock_key(name);

        let committed = match self
            .kv
            .put_if_absent(&key, Bytes::from_static(LOCK_SENTINEL), lease)
            .await
        {
            Ok(committed) => committed,
            Err(e) => {
                let _ = self.kv.revoke(lease).await;
                return Err(e);
            }
        };

        if !committed {
            // The lease never guarded anything; drop it now rather than at TTL.
            if let Err(e) = self.kv.revoke(lease).await {
                tracing::debug!(lock = name, error = %e, "failed to drop unused lease");
            }
            return Err(Error::Contention {
                name: name.to_string(),
                message: "held by another process".into(),
            });
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let renewer = tokio::spawn(renew_lease(
            Arc::clone(&self.kv),
            lease,
            name.to_string(),
            self.config.renew_interval,
            self.config.keep_alive_timeout,
            cancel_rx,
        ));

        tracing::info!(lock = name, lease = %lease, "lock acquired");
        Ok(LockGuard {
            name: name.to_string(),
            lease,
            kv: Arc::clone(&self.kv),
            cancel: Some(cancel_tx),
            renewer: Some(renewer),
            released: false,
        })
    }
}

/// Keeps `lease` alive until cancelled or until a renewal fails.
///
/// A renewal failure stops renewal; the lease then expires server-side,
/// releasing the lock after at most the TTL. The holder is never panicked.
async fn renew_lease(
    kv: Arc<dyn KvStore>,
    lease: LeaseId,
    name: String,
    interval: Duration,
    call_timeout: Duration,
    mut cancel: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut cancel => return,
            () = tokio::time::sleep(interval) => {
                match tokio::time::timeout(call_timeout, kv.keep_alive(lease)).await {
                    Ok(Ok(())) => tracing::debug!(lock = %name, "lease renewed"),
                    Ok(Err(e)) => {
                        tracing::warn!(lock = %name, error = %e, "lease renewal failed, letting the lease expire");
                        return;
                    }
                    Err(_) => {
                        tracing::warn!(lock = %name, "lease renewal timed out, letting the lease expire");
                        return;
                    }
                }
            }
        }
    }
}

/// A held lock. Call [`LockGuard::release`] when done.
///
/// Dropping the guard without releasing performs a best-effort background
/// revoke; the lease TTL covers the remaining failure modes.
pub struct LockGuard {
    name: String,
    lease: LeaseId,
    kv: Arc<dyn KvStore>,
    cancel: Option<oneshot::Sender<()>>,
    renewer: Option<JoinHandle<()>>,
    released: bool,
}

impl LockGuard {
    /// Returns the lock name this guard holds.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Terminates the renewer and revokes the lease, deleting the lock key.
    ///
    /// A lease that already expired counts as released.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the revoke call fails in transit.
    pub async fn release(mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        // The cancel signal is delivered exactly once.
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(renewer) = self.renewer.take() {
            let _ = renewer.await;
        }

        match self.kv.revoke(self.lease).await {
            Ok(()) | Err(Error::NotFound(_)) => {
                tracing::info!(lock = %self.name, lease = %self.lease, "lock released");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        // Best-effort async revoke in destructor; prefer calling release().
        // Outside a runtime the lease TTL handles eventual cleanup.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let kv = Arc::clone(&self.kv);
        let lease = self.lease;
        let name = std::mem::take(&mut self.name);
        handle.spawn(async move {
            if let Err(e) = kv.revoke(lease).await {
                if !e.is_not_found() {
                    tracing::warn!(lock = %name, error = %e, "dropped lock guard failed to revoke lease");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn fast_manager(kv: Arc<MemoryKv>) -> LockManager {
        LockManager::with_config(
            kv,
            LockConfig {
                ttl: ms(100),
                renew_interval: ms(40),
                keep_alive_timeout: ms(50),
                initial_backoff: ms(10),
                max_backoff: ms(20),
                budget_factor: 2,
            },
        )
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let kv = Arc::new(MemoryKv::new());
        let manager = fast_manager(kv.clone());

        let guard = manager.acquire("session-abc").await.expect("acquire");
        assert!(kv.get(&paths::lock_key("session-abc")).await.is_ok());

        guard.release().await.expect("release");
        assert!(kv
            .get(&paths::lock_key("session-abc"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_contention_exhausts_backoff_budget() {
        let kv = Arc::new(MemoryKv::new());
        let manager = fast_manager(kv.clone());
        let other = fast_manager(kv.clone());

        let held = manager.acquire("ingress").await.expect("first acquire");

        let result = other.acquire("ingress").await;
        assert!(matches!(result, Err(Error::Contention { .. })));

        held.release().await.expect("release");
    }

    #[tokio::test]
    async fn test_release_allows_reacquire() {
        let kv = Arc::new(MemoryKv::new());
        let manager = fast_manager(kv.clone());

        let first = manager.acquire("session-x").await.expect("first");
        first.release().await.expect("release");

        let second = manager.acquire("session-x").await.expect("second");
        second.release().await.expect("release2");
    }

    #[tokio::test]
    async fn test_renewer_keeps_lock_alive_past_ttl() {
        let kv = Arc::new(MemoryKv::new());
        let manager = fast_manager(kv.clone());

        let guard = manager.acquire("session-y").await.expect("acquire");

        // Hold across several TTL windows; the renewer must keep the key.
        tokio::time::sleep(ms(300)).await;
        assert!(kv.get(&paths::lock_key("session-y")).await.is_ok());

        guard.release().await.expect("release");
    }

    #[tokio::test]
    async fn test_dead_renewer_lets_another_holder_acquire() {
        let kv = Arc::new(MemoryKv::new());
        let manager = fast_manager(kv.clone());

        let guard = manager.acquire("session-z").await.expect("acquire");

        // Kill renewal; the holder must not crash and the lease must lapse.
        kv.inject_keep_alive_failure(true);
        tokio::time::sleep(ms(250)).await;
        kv.inject_keep_alive_failure(false);

        let other = fast_manager(kv.clone());
        let stolen = other.acquire("session-z").await.expect("acquire after expiry");
        stolen.release().await.expect("release stolen");

        // Releasing the original holder is still safe.
        guard.release().await.expect("release original");
    }

    #[tokio::test]
    async fn test_drop_releases_in_background() {
        let kv = Arc::new(MemoryKv::new());
        let manager = fast_manager(kv.clone());

        {
            let _guard = manager.acquire("session-drop").await.expect("acquire");
        }
        tokio::time::sleep(ms(50)).await;
        assert!(kv
            .get(&paths::lock_key("session-drop"))
            .await
            .unwrap_err()
            .is_not_found());
    }
}
