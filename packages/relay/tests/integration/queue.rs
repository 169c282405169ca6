use chrono::{Duration, Utc};
use sea_orm::{EntityTrait, PaginatorTrait, QueryOrder};

use relay::entity::{audit_record, notification_job};
use relay::error::EnqueueError;
use relay::processor::{
    self, DEFAULT_MAX_ATTEMPTS, PollOutcome, QueueProcessor, QueueStats, ReplayResult,
};

use crate::support::*;

fn build_processor(
    db: &sea_orm::DatabaseConnection,
    providers: common::provider::Providers,
) -> QueueProcessor {
    QueueProcessor::new(
        db.clone(),
        providers,
        test_pipeline_config(),
        test_alerts_config(),
    )
}

#[tokio::test]
async fn enqueue_creates_immediately_eligible_job() {
    let db = setup_db().await;

    let job = processor::enqueue(&db, sample_notification("a@example.com"))
        .await
        .unwrap();

    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);
    assert!(job.next_run_at <= Utc::now());
    assert!(job.last_error.is_none());
}

#[tokio::test]
async fn enqueue_rejects_empty_recipient() {
    let db = setup_db().await;

    let result = processor::enqueue(&db, sample_notification("  ")).await;
    assert!(matches!(result, Err(EnqueueError::EmptyRecipient)));

    let count = notification_job::Entity::find().count(&db).await.unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn delivers_and_deletes_job_on_success() {
    let db = setup_db().await;
    let primary = ScriptedProvider::new("primary");
    let processor = build_processor(&db, providers(primary.clone()));

    let job = processor::enqueue(&db, sample_notification("a@example.com"))
        .await
        .unwrap();

    let outcome = processor.run_once().await.unwrap();
    assert_eq!(outcome.delivered, 1);

    assert!(fetch_job(&db, job.id).await.is_none());

    let records = audit_record::Entity::find().all(&db).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    assert_eq!(records[0].provider, "primary");
    assert_eq!(records[0].actor_email, "a@example.com");
    assert_eq!(records[0].delivery, "email");
}

// Scenario A: four failed polls, then success on the fifth. The job is
// deleted, five audit records exist (4 failed, 1 success), and no breach
// alert was sent.
#[tokio::test]
async fn recovers_after_transient_outage() {
    let db = setup_db().await;
    let primary = ScriptedProvider::new("primary");
    let processor = build_processor(&db, providers(primary.clone()));

    let job = processor::enqueue(&db, sample_notification("a@example.com"))
        .await
        .unwrap();

    primary.set_failing(true);
    for _ in 0..4 {
        let outcome = processor.run_once().await.unwrap();
        assert_eq!(outcome.rescheduled, 1);
        make_due(&db, job.id).await;
    }

    primary.set_failing(false);
    let outcome = processor.run_once().await.unwrap();
    assert_eq!(outcome.delivered, 1);

    assert!(fetch_job(&db, job.id).await.is_none());

    let records = audit_record::Entity::find()
        .order_by_asc(audit_record::Column::Id)
        .all(&db)
        .await
        .unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(records.iter().filter(|r| r.success).count(), 1);
    assert!(records[4].success);

    assert_eq!(primary.sent_to(OPERATOR), 0);
}

// Scenario B: all five attempts fail. The row is retained with attempts=5,
// five failed audit records exist, and the breach alert went out exactly
// once.
#[tokio::test]
async fn terminal_failure_retains_row_and_alerts_once() {
    let db = setup_db().await;
    let primary = ScriptedProvider::new("primary");
    let processor = build_processor(&db, providers(primary.clone()));

    let job = processor::enqueue(&db, sample_notification("b@example.com"))
        .await
        .unwrap();

    primary.set_failing(true);
    for attempt in 1..=5 {
        let outcome = processor.run_once().await.unwrap();
        if attempt < 5 {
            assert_eq!(outcome.rescheduled, 1);
            make_due(&db, job.id).await;
        } else {
            assert_eq!(outcome.terminal, 1);
        }
    }

    let row = fetch_job(&db, job.id).await.expect("terminal row retained");
    assert_eq!(row.attempts, 5);
    assert!(row.last_error.is_some());

    let records = audit_record::Entity::find().all(&db).await.unwrap();
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| !r.success));

    assert_eq!(primary.sent_to(OPERATOR), 1);
    assert_eq!(primary.sent_to("b@example.com"), 5);

    // Terminal jobs are out of rotation: another poll touches nothing.
    make_due(&db, job.id).await;
    let outcome = processor.run_once().await.unwrap();
    assert_eq!(outcome, PollOutcome::default());
    assert_eq!(primary.sent_to(OPERATOR), 1);
}

// P2: consecutive reschedules follow [0, 60, 300, 900, 3600] indexed by
// attempt count.
#[tokio::test]
async fn backoff_follows_schedule() {
    let db = setup_db().await;
    let primary = ScriptedProvider::new("primary");
    let processor = build_processor(&db, providers(primary.clone()));

    let job = processor::enqueue(&db, sample_notification("a@example.com"))
        .await
        .unwrap();

    primary.set_failing(true);
    let expected = [60_i64, 300, 900, 3600];
    for (i, expected_secs) in expected.iter().enumerate() {
        let before = Utc::now();
        processor.run_once().await.unwrap();

        let row = fetch_job(&db, job.id).await.unwrap();
        assert_eq!(row.attempts as usize, i + 1);

        let delay = (row.next_run_at - before).num_seconds();
        assert!(
            delay >= expected_secs - 1 && delay <= expected_secs + 5,
            "attempt {}: delay {delay}s, expected ~{expected_secs}s",
            i + 1
        );

        make_due(&db, job.id).await;
    }
}

#[tokio::test]
async fn fails_over_to_secondary_channel() {
    let db = setup_db().await;
    let primary = ScriptedProvider::new("primary");
    let fallback = ScriptedProvider::new("webhook");
    let processor = build_processor(&db, providers_with_fallback(primary.clone(), fallback.clone()));

    let job = processor::enqueue(&db, sample_notification("a@example.com"))
        .await
        .unwrap();

    primary.set_failing(true);
    let outcome = processor.run_once().await.unwrap();
    assert_eq!(outcome.delivered, 1);

    assert!(fetch_job(&db, job.id).await.is_none());
    assert_eq!(fallback.calls(), 1);

    let records = audit_record::Entity::find().all(&db).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    assert_eq!(records[0].provider, "secondary");
}

#[tokio::test]
async fn missing_failover_is_recorded_as_failure() {
    let db = setup_db().await;
    let primary = ScriptedProvider::new("primary");
    let processor = build_processor(&db, providers(primary.clone()));

    let job = processor::enqueue(&db, sample_notification("a@example.com"))
        .await
        .unwrap();

    primary.push_transient("connection reset");
    let outcome = processor.run_once().await.unwrap();
    assert_eq!(outcome.rescheduled, 1);

    let row = fetch_job(&db, job.id).await.unwrap();
    let last_error = row.last_error.unwrap();
    assert!(last_error.contains("no failover configured"));
    assert!(last_error.contains("connection reset"));
}

#[tokio::test]
async fn permanent_error_skips_inner_retries() {
    let db = setup_db().await;
    let primary = ScriptedProvider::new("primary");
    let mut pipeline = test_pipeline_config();
    pipeline.provider_retry = fast_retry(3);
    let processor = QueueProcessor::new(
        db.clone(),
        providers(primary.clone()),
        pipeline,
        test_alerts_config(),
    );

    let job = processor::enqueue(&db, sample_notification("a@example.com"))
        .await
        .unwrap();

    primary.push_permanent("recipient address rejected");
    let outcome = processor.run_once().await.unwrap();
    assert_eq!(outcome.rescheduled, 1);

    // Exactly one provider call: the permanent error short-circuited the
    // three-try inner budget.
    assert_eq!(primary.calls(), 1);

    let row = fetch_job(&db, job.id).await.unwrap();
    assert_eq!(row.attempts, 1);
}

#[tokio::test]
async fn transient_errors_consume_inner_retry_budget() {
    let db = setup_db().await;
    let primary = ScriptedProvider::new("primary");
    let mut pipeline = test_pipeline_config();
    pipeline.provider_retry = fast_retry(3);
    let processor = QueueProcessor::new(
        db.clone(),
        providers(primary.clone()),
        pipeline,
        test_alerts_config(),
    );

    let job = processor::enqueue(&db, sample_notification("a@example.com"))
        .await
        .unwrap();

    primary.set_failing(true);
    processor.run_once().await.unwrap();

    // Three inner tries, but a single queue-level attempt.
    assert_eq!(primary.calls(), 3);
    assert_eq!(fetch_job(&db, job.id).await.unwrap().attempts, 1);
}

#[tokio::test]
async fn drains_oldest_jobs_first() {
    let db = setup_db().await;
    let primary = ScriptedProvider::new("primary");
    let processor = build_processor(&db, providers(primary.clone()));

    let base = Utc::now() - Duration::minutes(10);
    for (i, to) in ["first@example.com", "second@example.com", "third@example.com"]
        .iter()
        .enumerate()
    {
        let job = processor::enqueue(&db, sample_notification(to)).await.unwrap();
        set_created_at(&db, job.id, base + Duration::seconds(i as i64)).await;
    }

    processor.run_once().await.unwrap();

    let sent: Vec<String> = primary.sent().into_iter().map(|m| m.to).collect();
    assert_eq!(
        sent,
        vec![
            "first@example.com".to_string(),
            "second@example.com".to_string(),
            "third@example.com".to_string(),
        ]
    );
}

#[tokio::test]
async fn poll_respects_batch_size() {
    let db = setup_db().await;
    let primary = ScriptedProvider::new("primary");
    let mut pipeline = test_pipeline_config();
    pipeline.batch_size = 2;
    let processor = QueueProcessor::new(
        db.clone(),
        providers(primary.clone()),
        pipeline,
        test_alerts_config(),
    );

    for i in 0..3 {
        processor::enqueue(&db, sample_notification(&format!("user{i}@example.com")))
            .await
            .unwrap();
    }

    let outcome = processor.run_once().await.unwrap();
    assert_eq!(outcome.delivered, 2);

    let outcome = processor.run_once().await.unwrap();
    assert_eq!(outcome.delivered, 1);
}

#[tokio::test]
async fn stats_and_manual_replay() {
    let db = setup_db().await;

    let fresh = processor::enqueue(&db, sample_notification("fresh@example.com"))
        .await
        .unwrap();
    let struggling = processor::enqueue(&db, sample_notification("struggling@example.com"))
        .await
        .unwrap();
    let terminal = processor::enqueue(&db, sample_notification("terminal@example.com"))
        .await
        .unwrap();

    set_attempts(&db, struggling.id, 3).await;
    set_attempts(&db, terminal.id, 5).await;

    let stats = processor::queue_stats(&db, 3).await.unwrap();
    assert_eq!(
        stats,
        QueueStats {
            pending: 2,
            struggling: 1,
            terminal: 1,
        }
    );

    let retained = processor::terminal_jobs(&db).await.unwrap();
    assert_eq!(retained.len(), 1);
    assert_eq!(retained[0].id, terminal.id);

    assert_eq!(
        processor::retry_terminal(&db, fresh.id).await.unwrap(),
        ReplayResult::NotTerminal
    );
    assert_eq!(
        processor::retry_terminal(&db, 9999).await.unwrap(),
        ReplayResult::NotFound
    );
    assert_eq!(
        processor::retry_terminal(&db, terminal.id).await.unwrap(),
        ReplayResult::Reset
    );

    let row = fetch_job(&db, terminal.id).await.unwrap();
    assert_eq!(row.attempts, 0);
    assert!(row.last_error.is_none());
    assert!(row.next_run_at <= Utc::now());
}
