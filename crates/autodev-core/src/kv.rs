//! Consistent key-value store abstraction.
//!
//! The session records and lock records live in a strongly-consistent KV
//! store with lease support. This module defines the narrow contract the
//! engine and the lock manager consume:
//! - **Plain reads/writes**: session records keyed by session ID
//! - **Lease-bound conditional writes**: lock acquisition is a transactional
//!   create-if-absent of a key attached to a lease
//! - **Lease lifecycle**: grant, single keep-alive, revoke
//!
//! Two backends are provided: [`EtcdKv`] for real deployments and
//! [`MemoryKv`] for tests and debug runs. `MemoryKv` models lease expiry with
//! wall-clock deadlines so lock TTL behavior is observable in tests.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use etcd_client::{Client, Compare, CompareOp, PutOptions, Txn, TxnOp};

use crate::error::{Error, Result};

/// Identifier of a lease granted by the KV store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(
    /// Raw lease identifier as issued by the store.
    pub i64,
);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contract for the consistent KV store backing session records and locks.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Reads the value at `key`.
    ///
    /// Returns `Error::NotFound` if the key is absent.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Writes `value` at `key` unconditionally, without a lease.
    async fn put(&self, key: &str, value: Bytes) -> Result<()>;

    /// Deletes `key`. Succeeds even if the key is absent (idempotent).
    async fn delete(&self, key: &str) -> Result<()>;

    /// Grants a lease with the given TTL.
    async fn grant(&self, ttl: Duration) -> Result<LeaseId>;

    /// Transactionally writes `value` at `key` bound to `lease`, only if the
    /// key does not exist (create-revision == 0).
    ///
    /// Returns `true` when the write committed, `false` when the key already
    /// existed. Never reports the existing-key case as an error.
    async fn put_if_absent(&self, key: &str, value: Bytes, lease: LeaseId) -> Result<bool>;

    /// Issues a single keep-alive for `lease`, resetting its TTL.
    ///
    /// Returns `Error::NotFound` if the lease has already expired.
    async fn keep_alive(&self, lease: LeaseId) -> Result<()>;

    /// Revokes `lease`, deleting every key attached to it.
    ///
    /// Returns `Error::NotFound` if the lease has already expired.
    async fn revoke(&self, lease: LeaseId) -> Result<()>;
}

// ============================================================================
// etcd backend
// ============================================================================

/// KV backend speaking the etcd v3 API.
#[derive(Clone)]
pub struct EtcdKv {
    client: Client,
}

impl EtcdKv {
    /// Connects to the given etcd endpoints.
    ///
    /// # Errors
    ///
    /// Returns a transport error when no endpoint is reachable.
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|e| Error::transport_with_source("failed to connect to etcd", e))?;
        Ok(Self { client })
    }
}

impl fmt::Debug for EtcdKv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtcdKv").finish_non_exhaustive()
    }
}

fn etcd_err(op: &str, e: etcd_client::Error) -> Error {
    // etcd reports revoking an already-expired lease as an error; callers
    // treat that as NotFound.
    if e.to_string().contains("lease not found") {
        return Error::NotFound(format!("{op}: lease not found"));
    }
    Error::transport_with_source(format!("etcd {op} failed"), e)
}

#[async_trait]
impl KvStore for EtcdKv {
    async fn get(&self, key: &str) -> Result<Bytes> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await.map_err(|e| etcd_err("get", e))?;
        resp.kvs()
            .first()
            .map(|kv| Bytes::copy_from_slice(kv.value()))
            .ok_or_else(|| Error::NotFound(format!("key not found: {key}")))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let mut client = self.client.clone();
        client
            .put(key, value.to_vec(), None)
            .await
            .map_err(|e| etcd_err("put", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut client = self.client.clone();
        client
            .delete(key, None)
            .await
            .map_err(|e| etcd_err("delete", e))?;
        Ok(())
    }

    async fn grant(&self, ttl: Duration) -> Result<LeaseId> {
        let mut client = self.client.clone();
        let secs = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);
        let resp = client
            .lease_grant(secs, None)
            .await
            .map_err(|e| etcd_err("lease_grant", e))?;
        Ok(LeaseId(resp.id()))
    }

    async fn put_if_absent(&self, key: &str, value: Bytes, lease: LeaseId) -> Result<bool> {
        let mut client = self.client.clone();
        let txn = Txn::new()
            .when(vec![Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(
                key,
                value.to_vec(),
                Some(PutOptions::new().with_lease(lease.0)),
            )]);
        let resp = client.txn(txn).await.map_err(|e| etcd_err("txn", e))?;
        Ok(resp.succeeded())
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<()> {
        let mut client = self.client.clone();
        let (mut keeper, mut stream) = client
            .lease_keep_alive(lease.0)
            .await
            .map_err(|e| etcd_err("lease_keep_alive", e))?;
        keeper
            .keep_alive()
            .await
            .map_err(|e| etcd_err("lease_keep_alive", e))?;
        match stream
            .message()
            .await
            .map_err(|e| etcd_err("lease_keep_alive", e))?
        {
            Some(resp) if resp.ttl() > 0 => Ok(()),
            _ => Err(Error::NotFound(format!("lease {lease} expired"))),
        }
    }

    async fn revoke(&self, lease: LeaseId) -> Result<()> {
        let mut client = self.client.clone();
        client
            .lease_revoke(lease.0)
            .await
            .map_err(|e| etcd_err("lease_revoke", e))?;
        Ok(())
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// In-memory KV backend for testing.
///
/// Thread-safe via `Mutex`. Leases expire against wall-clock deadlines and
/// expired leases take their keys with them, so lock TTL semantics can be
/// exercised without a real etcd.
#[derive(Debug, Default)]
pub struct MemoryKv {
    inner: Mutex<Inner>,
    fail_keep_alive: AtomicBool,
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    leases: HashMap<i64, Lease>,
    next_lease: i64,
}

#[derive(Debug)]
struct Entry {
    value: Bytes,
    lease: Option<LeaseId>,
}

#[derive(Debug)]
struct Lease {
    ttl: Duration,
    expires_at: Instant,
}

impl MemoryKv {
    /// Creates a new empty in-memory KV.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `keep_alive` calls fail with a transport error.
    ///
    /// Used by tests to simulate a dying lease renewer.
    pub fn inject_keep_alive_failure(&self, fail: bool) {
        self.fail_keep_alive.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| Error::Internal {
            message: "kv lock poisoned".into(),
        })
    }
}

fn sweep(inner: &mut Inner) {
    let now = Instant::now();
    let expired: Vec<i64> = inner
        .leases
        .iter()
        .filter(|(_, lease)| lease.expires_at <= now)
        .map(|(id, _)| *id)
        .collect();
    for id in expired {
        inner.leases.remove(&id);
        inner.entries.retain(|_, entry| entry.lease != Some(LeaseId(id)));
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Bytes> {
        let mut inner = self.lock()?;
        sweep(&mut inner);
        inner
            .entries
            .get(key)
            .map(|entry| entry.value.clone())
            .ok_or_else(|| Error::NotFound(format!("key not found: {key}")))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let mut inner = self.lock()?;
        sweep(&mut inner);
        inner.entries.insert(key.to_string(), Entry { value, lease: None });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.lock()?;
        sweep(&mut inner);
        inner.entries.remove(key);
        Ok(())
    }

    async fn grant(&self, ttl: Duration) -> Result<LeaseId> {
        let mut inner = self.lock()?;
        sweep(&mut inner);
        inner.next_lease += 1;
        let id = inner.next_lease;
        inner.leases.insert(
            id,
            Lease {
                ttl,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(LeaseId(id))
    }

    async fn put_if_absent(&self, key: &str, value: Bytes, lease: LeaseId) -> Result<bool> {
        let mut inner = self.lock()?;
        sweep(&mut inner);
        if !inner.leases.contains_key(&lease.0) {
            return Err(Error::NotFound(format!("lease {lease} expired")));
        }
        if inner.entries.contains_key(key) {
            return Ok(false);
        }
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                lease: Some(lease),
            },
        );
        Ok(true)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<()> {
        if self.fail_keep_alive.load(Ordering::SeqCst) {
            return Err(Error::transport("injected keep-alive failure"));
        }
        let mut inner = self.lock()?;
        sweep(&mut inner);
        match inner.leases.get_mut(&lease.0) {
            Some(entry) => {
                entry.expires_at = Instant::now() + entry.ttl;
                Ok(())
            }
            None => Err(Error::NotFound(format!("lease {lease} expired"))),
        }
    }

    async fn revoke(&self, lease: LeaseId) -> Result<()> {
        let mut inner = self.lock()?;
        sweep(&mut inner);
        if inner.leases.remove(&lease.0).is_none() {
            return Err(Error::NotFound(format!("lease {lease} expired")));
        }
        inner.entries.retain(|_, entry| entry.lease != Some(lease));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete_roundtrip() {
        let kv = MemoryKv::new();
        kv.put("session-a", Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(kv.get("session-a").await.unwrap(), Bytes::from_static(b"{}"));

        kv.delete("session-a").await.unwrap();
        assert!(kv.get("session-a").await.unwrap_err().is_not_found());

        // delete is idempotent
        kv.delete("session-a").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_if_absent_refuses_existing_key() {
        let kv = MemoryKv::new();
        let lease = kv.grant(Duration::from_secs(10)).await.unwrap();
        assert!(kv
            .put_if_absent("lock", Bytes::from_static(b"1"), lease)
            .await
            .unwrap());

        let second = kv.grant(Duration::from_secs(10)).await.unwrap();
        assert!(!kv
            .put_if_absent("lock", Bytes::from_static(b"1"), second)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_lease_expiry_removes_attached_keys() {
        let kv = MemoryKv::new();
        let lease = kv.grant(Duration::from_millis(20)).await.unwrap();
        kv.put_if_absent("lock", Bytes::from_static(b"1"), lease)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(kv.get("lock").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_keep_alive_extends_lease() {
        let kv = MemoryKv::new();
        let lease = kv.grant(Duration::from_millis(60)).await.unwrap();
        kv.put_if_absent("lock", Bytes::from_static(b"1"), lease)
            .await
            .unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            kv.keep_alive(lease).await.unwrap();
        }
        assert!(kv.get("lock").await.is_ok());
    }

    #[tokio::test]
    async fn test_revoke_deletes_keys_and_is_not_found_afterwards() {
        let kv = MemoryKv::new();
        let lease = kv.grant(Duration::from_secs(10)).await.unwrap();
        kv.put_if_absent("lock", Bytes::from_static(b"1"), lease)
            .await
            .unwrap();

        kv.revoke(lease).await.unwrap();
        assert!(kv.get("lock").await.unwrap_err().is_not_found());
        assert!(kv.revoke(lease).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_injected_keep_alive_failure() {
        let kv = MemoryKv::new();
        let lease = kv.grant(Duration::from_secs(10)).await.unwrap();
        kv.inject_keep_alive_failure(true);
        assert!(kv.keep_alive(lease).await.is_err());
    }
}
