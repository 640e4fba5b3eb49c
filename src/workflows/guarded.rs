// Guarded local update: apply locally, commit remotely, roll back on failure

use std::collections::HashMap;
use std::future::Future;

use crate::model::{EntityKind, EntityState};

/// Run `commit_remote` between a local optimistic change and its rollback.
///
/// `apply_local` mutates the caller's state and returns whatever it needs to
/// undo that mutation. If the remote commit fails, `rollback_local` receives
/// that value and the error is returned unchanged. On success the local state
/// is left as applied; confirming it is the caller's job.
pub async fn guarded_update<L, S, T, E, A, C, Fut, R>(
    local: &mut L,
    apply_local: A,
    commit_remote: C,
    rollback_local: R,
) -> Result<T, E>
where
    A: FnOnce(&mut L) -> S,
    C: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnOnce(&mut L, S),
{
    let undo = apply_local(local);
    match commit_remote().await {
        Ok(value) => Ok(value),
        Err(err) => {
            rollback_local(local, undo);
            Err(err)
        }
    }
}

/// Optimistic states shown in place of cached ones while a commit is in flight
#[derive(Debug, Default, Clone)]
pub struct OptimisticOverlay {
    pending: HashMap<(EntityKind, String), EntityState>,
}

impl OptimisticOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an optimistic state, returning whatever it displaced
    pub fn apply(
        &mut self,
        kind: EntityKind,
        business_id: &str,
        state: EntityState,
    ) -> Option<EntityState> {
        self.pending.insert((kind, business_id.to_string()), state)
    }

    /// Put back the pre-call snapshot taken by [`apply`](Self::apply)
    pub fn restore(&mut self, kind: EntityKind, business_id: &str, previous: Option<EntityState>) {
        let key = (kind, business_id.to_string());
        match previous {
            Some(state) => {
                self.pending.insert(key, state);
            }
            None => {
                self.pending.remove(&key);
            }
        }
    }

    /// Drop the optimistic entry once the store has confirmed
    pub fn confirm(&mut self, kind: EntityKind, business_id: &str) {
        self.pending.remove(&(kind, business_id.to_string()));
    }

    pub fn get(&self, kind: EntityKind, business_id: &str) -> Option<&EntityState> {
        self.pending.get(&(kind, business_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
