//! Concurrent writers against one shared store
//!
//! Two `WorkspaceService` instances stand in for two sessions editing the
//! same workspace. Optimistic versioning must let exactly one of two
//! conflicting writes through and surface the other as a stale-state error.

use phasegate::store::{MemoryStateStore, StateStore};
use phasegate::{
    ApprovalError, ApprovalStatus, DocumentSeed, EntityKind, Phase, WorkspaceService,
};
use std::sync::Arc;

async fn two_sessions() -> (WorkspaceService, WorkspaceService, Arc<MemoryStateStore>) {
    let store = Arc::new(MemoryStateStore::new());
    let first = WorkspaceService::new("shared", store.clone());
    first
        .reconcile_documents(vec![DocumentSeed::new(EntityKind::Capability, "CAP-1", "Payments")])
        .await
        .unwrap();

    let second = WorkspaceService::new("shared", store.clone());
    second.fetch_workspace_state().await.unwrap();
    (first, second, store)
}

#[tokio::test]
async fn test_exactly_one_of_two_concurrent_writes_wins() {
    let (first, second, store) = two_sessions().await;
    let cached_first = first.cache().get(EntityKind::Capability, "CAP-1").await.unwrap();
    let cached_second = second.cache().get(EntityKind::Capability, "CAP-1").await.unwrap();
    assert_eq!(cached_first.version, cached_second.version);

    let (a, b) = futures::join!(
        first.approve_item(EntityKind::Capability, "CAP-1", Phase::Specification),
        second.reject_item(EntityKind::Capability, "CAP-1", Phase::Specification, "scope unclear"),
    );

    let winners = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(winners, 1);

    let loser = if a.is_ok() { b.unwrap_err() } else { a.unwrap_err() };
    assert!(loser.is_stale());
    match loser {
        ApprovalError::StaleState {
            expected_version,
            actual_version,
            ..
        } => {
            assert_eq!(expected_version, cached_first.version);
            assert_eq!(actual_version, cached_first.version + 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let stored = store
        .fetch("shared", EntityKind::Capability, "CAP-1")
        .await
        .unwrap();
    assert_eq!(stored.version, cached_first.version + 1);
}

#[tokio::test]
async fn test_stale_session_refetches_and_retries() {
    let (first, second, store) = two_sessions().await;

    first
        .approve_item(EntityKind::Capability, "CAP-1", Phase::Specification)
        .await
        .unwrap();

    let err = second
        .reject_item(EntityKind::Capability, "CAP-1", Phase::Specification, "scope unclear")
        .await
        .unwrap_err();
    assert!(err.is_stale());
    assert!(err.to_string().contains("refresh"));
    assert_eq!(second.metrics().get_stats().conflicts, 1);

    let conflict = second.last_conflict().await.unwrap();
    assert_eq!(conflict.kind, EntityKind::Capability);
    assert_eq!(conflict.business_id, "CAP-1");

    // the loser's view stays put until it refetches
    let stale = second.cache().get(EntityKind::Capability, "CAP-1").await.unwrap();
    assert_eq!(stale.state.approval_status, ApprovalStatus::Pending);

    let fresh = second.resolve_conflict().await.unwrap().unwrap();
    assert_eq!(fresh.state.approval_status, ApprovalStatus::Approved);
    assert!(second.last_conflict().await.is_none());
    assert!(second.resolve_conflict().await.unwrap().is_none());

    let retried = second
        .reject_item(EntityKind::Capability, "CAP-1", Phase::Specification, "scope unclear")
        .await
        .unwrap();
    assert_eq!(retried.version, fresh.version + 1);
    assert_eq!(retried.state.approval_status, ApprovalStatus::Rejected);

    let stored = store
        .fetch("shared", EntityKind::Capability, "CAP-1")
        .await
        .unwrap();
    assert_eq!(stored.version, retried.version);
}

#[tokio::test]
async fn test_phase_approval_is_visible_across_sessions() {
    let store = Arc::new(MemoryStateStore::new());
    let first = WorkspaceService::new("shared", store.clone());
    let second = WorkspaceService::new("shared", store.clone());

    first
        .approve_item(EntityKind::StoryCard, "STORY-1", Phase::Intent)
        .await
        .unwrap();
    first.approve_phase(Phase::Intent).await.unwrap();

    assert!(!second.is_phase_approved(Phase::Intent).await);
    second.fetch_workspace_state().await.unwrap();
    assert!(second.is_phase_approved(Phase::Intent).await);
}

#[tokio::test]
async fn test_reapproving_after_remote_revoke_writes_again() {
    let store = Arc::new(MemoryStateStore::new());
    let first = WorkspaceService::new("shared", store.clone());
    let second = WorkspaceService::new("shared", store.clone());

    first
        .approve_item(EntityKind::StoryCard, "STORY-1", Phase::Intent)
        .await
        .unwrap();
    first.approve_phase(Phase::Intent).await.unwrap();

    second.fetch_workspace_state().await.unwrap();
    second.revoke_phase(Phase::Intent).await.unwrap();

    // first still has the approved record cached
    let approval = first.approve_phase(Phase::Intent).await.unwrap();
    assert!(approval.approved);

    let snapshot = store.fetch_workspace_snapshot("shared").await.unwrap();
    let stored = snapshot.phase_approval(Phase::Intent).unwrap();
    assert!(stored.approved);
    assert_eq!(stored.approved_at, approval.approved_at);
}
