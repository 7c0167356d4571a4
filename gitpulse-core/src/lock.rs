//! Per-repository harvest lock backed by the distributed cache.
//!
//! At most one holder per repository key at any instant; the TTL bounds
//! how long a crashed holder can wedge a repository. The value is a
//! random per-holder token and release is compare-and-delete, so a
//! stale releaser cannot evict a newer holder's lock.

use crate::error::Result;
use async_trait::async_trait;
use gitpulse_model::RepoName;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Proof of lock ownership, consumed on release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    key: String,
    token: String,
}

impl LockToken {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Advisory mutual exclusion per repository. Holders must tolerate the
/// lock expiring mid-harvest.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepositoryLock: Send + Sync {
    /// Set-if-absent with TTL; `None` when another holder owns the key.
    async fn acquire(&self, repo: &RepoName, ttl: Duration) -> Result<Option<LockToken>>;

    /// Compare-and-delete; `false` when the lock already expired or was
    /// taken over by a newer holder.
    async fn release(&self, token: &LockToken) -> Result<bool>;
}

fn lock_key(repo: &RepoName) -> String {
    format!("lock:{}.{}", repo.owner(), repo.name())
}

#[derive(Clone)]
pub struct RedisRepositoryLock {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisRepositoryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRepositoryLock").finish_non_exhaustive()
    }
}

impl RedisRepositoryLock {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("connecting to redis");
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RepositoryLock for RedisRepositoryLock {
    async fn acquire(&self, repo: &RepoName, ttl: Duration) -> Result<Option<LockToken>> {
        let key = lock_key(repo);
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        match reply {
            Some(_) => {
                debug!(%key, "lock acquired");
                Ok(Some(LockToken { key, token }))
            }
            None => {
                debug!(%key, "lock held elsewhere");
                Ok(None)
            }
        }
    }

    async fn release(&self, token: &LockToken) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&token.key)
            .arg(&token.token)
            .invoke_async(&mut conn)
            .await?;
        debug!(key = %token.key, released = deleted == 1, "lock released");
        Ok(deleted == 1)
    }
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory lock with the same semantics, for pipeline tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Debug, Default)]
    pub struct InMemoryLock {
        held: Mutex<HashMap<String, (String, Instant)>>,
    }

    #[async_trait]
    impl RepositoryLock for InMemoryLock {
        async fn acquire(&self, repo: &RepoName, ttl: Duration) -> Result<Option<LockToken>> {
            let key = lock_key(repo);
            let token = Uuid::new_v4().to_string();
            let mut held = self.held.lock().unwrap();
            let now = Instant::now();
            match held.get(&key) {
                Some((_, deadline)) if *deadline > now => Ok(None),
                _ => {
                    held.insert(key.clone(), (token.clone(), now + ttl));
                    Ok(Some(LockToken { key, token }))
                }
            }
        }

        async fn release(&self, token: &LockToken) -> Result<bool> {
            let mut held = self.held.lock().unwrap();
            match held.get(&token.key) {
                Some((held_token, _)) if *held_token == token.token => {
                    held.remove(&token.key);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryLock;
    use super::*;

    const TTL: Duration = Duration::from_secs(600);

    fn repo() -> RepoName {
        "octocat/hello-world".parse().unwrap()
    }

    #[tokio::test]
    async fn second_acquire_on_held_key_fails() {
        let lock = InMemoryLock::default();
        let held = lock.acquire(&repo(), TTL).await.unwrap();
        assert!(held.is_some());
        assert!(lock.acquire(&repo(), TTL).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lock_can_be_reacquired() {
        let lock = InMemoryLock::default();
        let stale = lock.acquire(&repo(), TTL).await.unwrap().unwrap();

        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        let fresh = lock.acquire(&repo(), TTL).await.unwrap();
        assert!(fresh.is_some());

        // The stale holder's release must not evict the new holder.
        assert!(!lock.release(&stale).await.unwrap());
        assert!(lock.release(&fresh.unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn release_frees_the_key() {
        let lock = InMemoryLock::default();
        let token = lock.acquire(&repo(), TTL).await.unwrap().unwrap();
        assert!(lock.release(&token).await.unwrap());
        assert!(lock.acquire(&repo(), TTL).await.unwrap().is_some());
    }

    #[test]
    fn lock_key_uses_dotted_form() {
        assert_eq!(lock_key(&repo()), "lock:octocat.hello-world");
    }
}
