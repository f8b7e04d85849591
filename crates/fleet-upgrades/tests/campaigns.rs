mod common;

use common::Fleet;
use fleet_entities::types::{CampaignStatus, ExecutionStatus, TenantStatus};
use fleet_upgrades::{NewCampaign, UpgradeError};
use serde_json::json;

fn campaign(batch_size: i32, threshold: i32) -> NewCampaign {
    NewCampaign {
        batch_size: Some(batch_size),
        failure_threshold_percent: Some(threshold),
        ..NewCampaign::new("tenant:v2", "stable")
    }
}

#[tokio::test]
async fn test_create_queues_only_active_tenants_on_channel() {
    let fleet = Fleet::new().await;
    let active = fleet.active_tenants("stable", 2).await;
    fleet.tenant("stable", TenantStatus::Suspended).await;
    fleet.tenant("stable", TenantStatus::Provisioning).await;
    fleet.tenant("beta", TenantStatus::Active).await;

    let created = fleet
        .scheduler
        .create_campaign(NewCampaign::new("tenant:v2", "stable"))
        .await
        .unwrap();

    assert_eq!(created.status, CampaignStatus::Pending);
    assert_eq!(created.batch_size, 10);
    assert_eq!(created.failure_threshold_percent, 10);

    let executions = fleet.executions(created.id).await;
    assert_eq!(executions.len(), 2);
    assert!(executions.iter().all(|e| e.status == ExecutionStatus::Queued));
    for tenant in &active {
        assert!(executions.iter().any(|e| e.tenant_id == tenant.id));
    }
}

#[tokio::test]
async fn test_channel_without_tenants_yields_empty_campaign() {
    let fleet = Fleet::new().await;
    fleet.active_tenants("beta", 1).await;

    let created = fleet
        .scheduler
        .create_campaign(NewCampaign::new("tenant:v2", "stable"))
        .await
        .unwrap();

    assert!(fleet.executions(created.id).await.is_empty());
    let next = fleet.scheduler.get_next_batch(created.id, 10).await.unwrap();
    assert!(next.batch.is_empty());
    assert_eq!(next.campaign_status, CampaignStatus::Running);
}

#[tokio::test]
async fn test_create_rejects_invalid_parameters() {
    let fleet = Fleet::new().await;

    for request in [
        NewCampaign::new("", "stable"),
        NewCampaign::new("tenant:v2", " "),
        campaign(0, 10),
        campaign(5, 101),
    ] {
        let err = fleet.scheduler.create_campaign(request).await.unwrap_err();
        assert!(matches!(err, UpgradeError::Validation(_)));
    }
}

#[tokio::test]
async fn test_first_batch_starts_campaign_and_reports_tags() {
    let fleet = Fleet::new().await;
    let tenants = fleet.active_tenants("stable", 2).await;
    let created = fleet.scheduler.create_campaign(campaign(10, 10)).await.unwrap();

    let next = fleet.scheduler.get_next_batch(created.id, 10).await.unwrap();

    assert_eq!(next.campaign_status, CampaignStatus::Running);
    assert_eq!(next.batch.len(), 2);
    for item in &next.batch {
        assert!(tenants.iter().any(|t| t.id == item.tenant_id));
        assert_eq!(item.target_image_tag, "tenant:v2");
        assert_eq!(item.current_image_tag.as_deref(), Some("tenant:v1"));
    }
    let executions = fleet.executions(created.id).await;
    assert!(executions
        .iter()
        .all(|e| e.status == ExecutionStatus::Snapshotting && e.started_at.is_some()));

    let summary = fleet.scheduler.summary(created.id).await.unwrap();
    assert_eq!(summary.status, CampaignStatus::Running);
}

#[tokio::test]
async fn test_full_ceiling_returns_empty_batch() {
    let fleet = Fleet::new().await;
    fleet.active_tenants("stable", 5).await;
    let created = fleet.scheduler.create_campaign(campaign(2, 10)).await.unwrap();

    let first = fleet.scheduler.get_next_batch(created.id, 10).await.unwrap();
    assert_eq!(first.batch.len(), 2);

    let second = fleet.scheduler.get_next_batch(created.id, 10).await.unwrap();
    assert!(second.batch.is_empty());
    assert_eq!(second.campaign_status, CampaignStatus::Running);
    assert_eq!(fleet.count_with(created.id, ExecutionStatus::Queued).await, 3);
}

#[tokio::test]
async fn test_claim_is_bounded_by_available_slots() {
    let fleet = Fleet::new().await;
    fleet.active_tenants("stable", 5).await;
    let created = fleet.scheduler.create_campaign(campaign(3, 10)).await.unwrap();

    let next = fleet.scheduler.get_next_batch(created.id, 10).await.unwrap();

    assert_eq!(next.batch.len(), 3);
    assert_eq!(
        fleet.count_with(created.id, ExecutionStatus::Snapshotting).await,
        3
    );
    assert_eq!(fleet.count_with(created.id, ExecutionStatus::Queued).await, 2);
}

#[tokio::test]
async fn test_claim_is_bounded_by_requested_size() {
    let fleet = Fleet::new().await;
    fleet.active_tenants("stable", 4).await;
    let created = fleet.scheduler.create_campaign(campaign(10, 10)).await.unwrap();

    let next = fleet.scheduler.get_next_batch(created.id, 1).await.unwrap();

    assert_eq!(next.batch.len(), 1);
    assert_eq!(fleet.count_with(created.id, ExecutionStatus::Queued).await, 3);
}

#[tokio::test]
async fn test_finished_executions_free_their_slots() {
    let fleet = Fleet::new().await;
    fleet.active_tenants("stable", 3).await;
    let created = fleet.scheduler.create_campaign(campaign(1, 50)).await.unwrap();
    let scheduler = &fleet.scheduler;

    let first = scheduler.get_next_batch(created.id, 10).await.unwrap();
    assert!(scheduler.get_next_batch(created.id, 10).await.unwrap().batch.is_empty());

    scheduler
        .update_execution_status(first.batch[0].execution_id, ExecutionStatus::Completed, None)
        .await
        .unwrap();

    let second = scheduler.get_next_batch(created.id, 10).await.unwrap();
    assert_eq!(second.batch.len(), 1);
    assert_ne!(second.batch[0].execution_id, first.batch[0].execution_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fetchers_never_share_an_execution() {
    let fleet = Fleet::pooled(4).await;
    fleet.active_tenants("stable", 6).await;
    let created = fleet.scheduler.create_campaign(campaign(10, 10)).await.unwrap();
    let campaign_id = created.id;

    let fetchers: Vec<_> = (0..4)
        .map(|_| {
            let scheduler = fleet.scheduler.clone();
            tokio::spawn(async move { scheduler.get_next_batch(campaign_id, 3).await })
        })
        .collect();

    let mut claimed = Vec::new();
    for fetcher in fetchers {
        let batch = fetcher.await.unwrap().unwrap();
        claimed.extend(batch.batch.into_iter().map(|item| item.execution_id));
    }
    let total = claimed.len();
    claimed.sort();
    claimed.dedup();

    assert_eq!(total, 6);
    assert_eq!(claimed.len(), total);
    assert_eq!(
        fleet.count_with(created.id, ExecutionStatus::Snapshotting).await,
        6
    );
}

#[tokio::test]
async fn test_consecutive_fetches_hand_out_disjoint_batches() {
    let fleet = Fleet::new().await;
    fleet.active_tenants("stable", 5).await;
    let created = fleet.scheduler.create_campaign(campaign(10, 10)).await.unwrap();

    let first = fleet.scheduler.get_next_batch(created.id, 3).await.unwrap();
    let second = fleet.scheduler.get_next_batch(created.id, 3).await.unwrap();
    let third = fleet.scheduler.get_next_batch(created.id, 3).await.unwrap();

    assert_eq!(first.batch.len(), 3);
    assert_eq!(second.batch.len(), 2);
    assert!(third.batch.is_empty());
    assert!(second
        .batch
        .iter()
        .all(|item| first.batch.iter().all(|f| f.execution_id != item.execution_id)));
}

#[tokio::test]
async fn test_completion_moves_tenant_to_target_tag() {
    let fleet = Fleet::new().await;
    let tenant = fleet.tenant("stable", TenantStatus::Active).await;
    let created = fleet.scheduler.create_campaign(campaign(10, 10)).await.unwrap();
    let next = fleet.scheduler.get_next_batch(created.id, 10).await.unwrap();
    let execution_id = next.batch[0].execution_id;

    let updated = fleet
        .scheduler
        .update_execution_status(
            execution_id,
            ExecutionStatus::Completed,
            Some(json!({ "durationSecs": 42 })),
        )
        .await
        .unwrap();

    assert!(updated.finished_at.is_some());
    assert_eq!(updated.logs, Some(json!({ "durationSecs": 42 })));
    assert_eq!(
        fleet.reload_tenant(tenant.id).await.current_image_tag.as_deref(),
        Some("tenant:v2")
    );
}

#[tokio::test]
async fn test_intermediate_status_keeps_tenant_tag() {
    let fleet = Fleet::new().await;
    let tenant = fleet.tenant("stable", TenantStatus::Active).await;
    let created = fleet.scheduler.create_campaign(campaign(10, 10)).await.unwrap();
    let next = fleet.scheduler.get_next_batch(created.id, 10).await.unwrap();

    let updated = fleet
        .scheduler
        .update_execution_status(next.batch[0].execution_id, ExecutionStatus::Deploying, None)
        .await
        .unwrap();

    assert!(updated.finished_at.is_none());
    assert_eq!(
        fleet.reload_tenant(tenant.id).await.current_image_tag.as_deref(),
        Some("tenant:v1")
    );
}

#[tokio::test]
async fn test_failure_rate_above_threshold_halts_campaign() {
    let fleet = Fleet::new().await;
    fleet.active_tenants("stable", 4).await;
    let created = fleet.scheduler.create_campaign(campaign(2, 20)).await.unwrap();
    let next = fleet.scheduler.get_next_batch(created.id, 10).await.unwrap();

    fleet
        .scheduler
        .update_execution_status(
            next.batch[0].execution_id,
            ExecutionStatus::Failed,
            Some(json!({ "error": "migration failed" })),
        )
        .await
        .unwrap();

    let summary = fleet.scheduler.summary(created.id).await.unwrap();
    assert_eq!(summary.status, CampaignStatus::Failed);
    assert_eq!(summary.counts.get("failed"), Some(&1));
    assert_eq!(summary.total, 4);

    let halted = fleet.scheduler.get_next_batch(created.id, 10).await.unwrap();
    assert!(halted.batch.is_empty());
    assert_eq!(halted.campaign_status, CampaignStatus::Failed);
    assert_eq!(fleet.count_with(created.id, ExecutionStatus::Queued).await, 2);
}

#[tokio::test]
async fn test_failure_rate_within_threshold_keeps_running() {
    let fleet = Fleet::new().await;
    fleet.active_tenants("stable", 4).await;
    let created = fleet.scheduler.create_campaign(campaign(10, 25)).await.unwrap();
    let next = fleet.scheduler.get_next_batch(created.id, 10).await.unwrap();

    fleet
        .scheduler
        .update_execution_status(next.batch[0].execution_id, ExecutionStatus::Failed, None)
        .await
        .unwrap();

    let summary = fleet.scheduler.summary(created.id).await.unwrap();
    assert_eq!(summary.status, CampaignStatus::Running);
}

#[tokio::test]
async fn test_unknown_execution_is_not_found() {
    let fleet = Fleet::new().await;

    let err = fleet
        .scheduler
        .update_execution_status(uuid::Uuid::new_v4(), ExecutionStatus::Completed, None)
        .await
        .unwrap_err();

    assert!(matches!(err, UpgradeError::ExecutionNotFound(_)));
}

#[tokio::test]
async fn test_pause_and_resume_gate_batches() {
    let fleet = Fleet::new().await;
    fleet.active_tenants("stable", 2).await;
    let created = fleet.scheduler.create_campaign(campaign(10, 10)).await.unwrap();

    let paused = fleet.scheduler.pause(created.id).await.unwrap();
    assert_eq!(paused.status, CampaignStatus::Paused);
    let next = fleet.scheduler.get_next_batch(created.id, 10).await.unwrap();
    assert!(next.batch.is_empty());
    assert_eq!(next.campaign_status, CampaignStatus::Paused);

    let resumed = fleet.scheduler.resume(created.id).await.unwrap();
    assert_eq!(resumed.status, CampaignStatus::Running);
    let next = fleet.scheduler.get_next_batch(created.id, 10).await.unwrap();
    assert_eq!(next.batch.len(), 2);
}

#[tokio::test]
async fn test_complete_requires_drained_campaign() {
    let fleet = Fleet::new().await;
    fleet.active_tenants("stable", 1).await;
    let created = fleet.scheduler.create_campaign(campaign(10, 10)).await.unwrap();

    let err = fleet.scheduler.complete(created.id).await.unwrap_err();
    assert!(matches!(err, UpgradeError::NotDrained { remaining: 1 }));

    let next = fleet.scheduler.get_next_batch(created.id, 10).await.unwrap();
    fleet
        .scheduler
        .update_execution_status(next.batch[0].execution_id, ExecutionStatus::Completed, None)
        .await
        .unwrap();

    let completed = fleet.scheduler.complete(created.id).await.unwrap();
    assert_eq!(completed.status, CampaignStatus::Completed);

    let err = fleet.scheduler.resume(created.id).await.unwrap_err();
    assert!(matches!(err, UpgradeError::InvalidTransition { .. }));
}
