//! Single-writer in-memory user cache and change feed (C4).
//!
//! Ported from `original_source/persistence/cache.go`'s `UserCache`
//! goroutine, widened from a single `byId` map to the three indexes
//! (`byId`, `byEmail`, `byTokenSecret`) spec.md §4.4 requires, and from a
//! bare insert/delete to full retract-then-install semantics so token
//! rotation evicts stale secrets. The request/reply and detached-publish
//! shape follows the teacher's `chat_worker::run_worker`.

use std::collections::HashMap;
use std::sync::Arc;

use preflight_core::{diff, User, UserDelta};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Which index a read should be served from. Exactly one variant is ever
/// constructed per request.
#[derive(Debug, Clone)]
pub enum Lookup {
    Id(String),
    Email(String),
    TokenSecret(String),
}

struct ReadRequest {
    lookup: Lookup,
    reply: oneshot::Sender<Option<Arc<User>>>,
}

struct WriteRequest {
    user: Arc<User>,
    remove: bool,
    only_if_cached: bool,
}

/// A handle to the running cache actor. Cloning shares the same underlying
/// channels; the actor itself lives for the life of the process (spec.md
/// §4.4: "cancellation is out of scope").
#[derive(Clone)]
pub struct CacheHandle {
    read_tx: mpsc::UnboundedSender<ReadRequest>,
    write_tx: mpsc::UnboundedSender<WriteRequest>,
}

impl CacheHandle {
    async fn lookup(&self, lookup: Lookup) -> Option<Arc<User>> {
        let (reply, rx) = oneshot::channel();
        if self.read_tx.send(ReadRequest { lookup, reply }).is_err() {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    pub async fn get_by_id(&self, id: impl Into<String>) -> Option<Arc<User>> {
        self.lookup(Lookup::Id(id.into())).await
    }

    pub async fn get_by_email(&self, email: impl Into<String>) -> Option<Arc<User>> {
        self.lookup(Lookup::Email(email.into())).await
    }

    pub async fn get_by_token(&self, secret: impl Into<String>) -> Option<Arc<User>> {
        self.lookup(Lookup::TokenSecret(secret.into())).await
    }

    /// Install (or refresh) `user` in the cache. Fire-and-forget: the delta
    /// this produces is published asynchronously on the update feed.
    pub fn put(&self, user: User) {
        let _ = self.write_tx.send(WriteRequest { user: Arc::new(user), remove: false, only_if_cached: false });
    }

    /// Install `user` only if an entry with the same id already exists
    /// (spec.md §4.4's `onlyIfCached`), otherwise a no-op write that still
    /// retracts nothing because there was nothing to retract.
    pub fn put_if_cached(&self, user: User) {
        let _ = self.write_tx.send(WriteRequest { user: Arc::new(user), remove: false, only_if_cached: true });
    }

    /// Evict `user` (matched by id) from all three indexes.
    pub fn remove(&self, user: User) {
        let _ = self.write_tx.send(WriteRequest { user: Arc::new(user), remove: true, only_if_cached: false });
    }
}

fn token_secrets(user: &User) -> impl Iterator<Item = &str> {
    user.security.tokens.iter().map(|t| t.secret.as_str())
}

/// Spawn the cache actor. Returns a handle for reads/writes and the
/// receiving half of the update feed (deltas published by the actor); the
/// caller (the scheduler loop, C6) owns consuming it.
pub fn spawn() -> (CacheHandle, mpsc::UnboundedReceiver<UserDelta>) {
    let (read_tx, mut read_rx) = mpsc::unbounded_channel::<ReadRequest>();
    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<WriteRequest>();
    let (update_tx, update_rx) = mpsc::unbounded_channel::<UserDelta>();

    tokio::spawn(async move {
        let mut by_id: HashMap<String, Arc<User>> = HashMap::new();
        let mut by_email: HashMap<String, Arc<User>> = HashMap::new();
        let mut by_token: HashMap<String, Arc<User>> = HashMap::new();

        loop {
            tokio::select! {
                Some(write) = write_rx.recv() => {
                    let id = write.user.id.0.clone();
                    let prior = by_id.remove(&id);
                    if let Some(prior) = &prior {
                        by_email.remove(&prior.email);
                        for secret in token_secrets(prior) {
                            by_token.remove(secret);
                        }
                    }

                    let install = !write.remove && (!write.only_if_cached || prior.is_some());
                    if install {
                        by_id.insert(id.clone(), write.user.clone());
                        by_email.insert(write.user.email.clone(), write.user.clone());
                        for secret in token_secrets(&write.user) {
                            by_token.insert(secret.to_string(), write.user.clone());
                        }
                    }

                    trace!(user_id = %id, install, removed = write.remove, "cache write");

                    let old = prior.as_deref();
                    let new = if write.remove { None } else if install { Some(write.user.as_ref()) } else { None };
                    let delta = diff(old, new);
                    if let Some(delta) = delta {
                        let update_tx = update_tx.clone();
                        tokio::spawn(async move {
                            if update_tx.send(delta).is_err() {
                                debug!("cache update feed has no receiver; dropping delta");
                            }
                        });
                    }
                }
                Some(read) = read_rx.recv() => {
                    let found = match &read.lookup {
                        Lookup::Id(id) => by_id.get(id),
                        Lookup::Email(email) => by_email.get(email),
                        Lookup::TokenSecret(secret) => by_token.get(secret),
                    };
                    let _ = read.reply.send(found.cloned());
                }
                else => break,
            }
        }
    });

    (CacheHandle { read_tx, write_tx }, update_rx)
}
