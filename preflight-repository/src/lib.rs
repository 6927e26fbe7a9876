//! Narrow contracts to the durable store and the external task/kanban
//! back-ends (C7, spec.md §4.8). No concrete HTTP/DB implementation lives
//! here — only the interfaces the scheduling core depends on, so that the
//! core stays testable without a real document database or network.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use preflight_core::{ChecklistId, User, UserId};
use preflight_errors::PreflightError;
use uuid::Uuid;

/// What a job writes back through the repository on completion (or partial
/// completion — spec.md §4.7 leaves the record "partially cleared" on a
/// mid-run remove failure). An add always refreshes `add_time`; a remove
/// never does, since it isn't materializing anything new.
#[derive(Debug, Clone)]
pub enum ChecklistUpdate {
    Add { ids: Vec<String> },
    Remove { remaining_ids: Vec<String> },
}

/// The durable store's user-facing surface. Implementations back this with
/// whatever document database the deployment uses; this crate only
/// specifies the shape.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Construct and persist a new user from an email + password pair
    /// (spec.md §6's `addUser(email, password) -> user | conflict(409)`),
    /// returning the constructed user. A pre-existing email is
    /// `ErrorKind::Conflict`, not a generic failure.
    async fn add_user(&self, email: &str, password: &str) -> Result<User, PreflightError>;
    async fn update_user(&self, user: &User) -> Result<(), PreflightError>;
    async fn delete_user(&self, id: &UserId) -> Result<(), PreflightError>;
    async fn get_user(&self, id: &UserId) -> Result<Option<User>, PreflightError>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, PreflightError>;
    async fn get_user_by_token(&self, secret: &str) -> Result<Option<User>, PreflightError>;

    /// Persist a job's (possibly partial) result against `checklist_id`
    /// within `user_id`, stamping `time` as the instant of this action.
    async fn record_checklist_update(
        &self,
        user_id: &UserId,
        checklist_id: &ChecklistId,
        update: ChecklistUpdate,
        time: DateTime<Utc>,
    ) -> Result<(), PreflightError>;

    /// Mint a shared secret authenticating a peer node process and persist
    /// it, writing the plaintext secret once to `out` for the operator to
    /// copy onto the peer (never re-readable afterward).
    async fn register_node(&self, node_id: &str, out: &mut dyn std::io::Write) -> Result<(), PreflightError>;

    async fn validate_node_secret(&self, node_id: &str, secret: &str) -> Result<(), PreflightError>;
}

/// The task-service back-end a literal or kanban-sourced checklist
/// materializes tasks into.
#[async_trait]
pub trait TaskServiceClient: Send + Sync {
    /// Post `text` as a new task; an idempotency key is generated fresh per
    /// call from a secure RNG and echoed in the request envelope so retries
    /// at the transport layer can't double-create.
    async fn post_task(&self, text: &str) -> Result<String, PreflightError>;
    async fn delete_task(&self, external_id: &str) -> Result<(), PreflightError>;
}

/// Board/list identity passed to the kanban client, re-exported here rather
/// than duplicated so callers don't need both crates for one call.
pub use preflight_core::KanbanRef;

#[async_trait]
pub trait KanbanClient: Send + Sync {
    /// Names of open cards in `(board, list)`; closed cards are filtered out
    /// by the implementation before this returns.
    async fn open_cards(&self, reference: &KanbanRef) -> Result<Vec<String>, PreflightError>;
}

/// Generate a fresh idempotency key for one `post_task` call.
pub fn idempotency_key() -> Uuid {
    Uuid::new_v4()
}

// Blanket impls so callers can hand an `Arc<dyn Repository>` (etc) to
// anything generic over these traits — handy for sharing one back-end
// across the executor and a test harness that also wants to inspect it.
#[async_trait]
impl<T: Repository + ?Sized> Repository for std::sync::Arc<T> {
    async fn add_user(&self, email: &str, password: &str) -> Result<User, PreflightError> {
        (**self).add_user(email, password).await
    }
    async fn update_user(&self, user: &User) -> Result<(), PreflightError> {
        (**self).update_user(user).await
    }
    async fn delete_user(&self, id: &UserId) -> Result<(), PreflightError> {
        (**self).delete_user(id).await
    }
    async fn get_user(&self, id: &UserId) -> Result<Option<User>, PreflightError> {
        (**self).get_user(id).await
    }
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, PreflightError> {
        (**self).get_user_by_email(email).await
    }
    async fn get_user_by_token(&self, secret: &str) -> Result<Option<User>, PreflightError> {
        (**self).get_user_by_token(secret).await
    }
    async fn record_checklist_update(
        &self,
        user_id: &UserId,
        checklist_id: &ChecklistId,
        update: ChecklistUpdate,
        time: DateTime<Utc>,
    ) -> Result<(), PreflightError> {
        (**self).record_checklist_update(user_id, checklist_id, update, time).await
    }
    async fn register_node(&self, node_id: &str, out: &mut dyn std::io::Write) -> Result<(), PreflightError> {
        (**self).register_node(node_id, out).await
    }
    async fn validate_node_secret(&self, node_id: &str, secret: &str) -> Result<(), PreflightError> {
        (**self).validate_node_secret(node_id, secret).await
    }
}
