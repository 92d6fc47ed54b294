mod common;

use std::time::Duration;

use chrono::Utc;
use common::{Notification, ScriptedProber, harness, next_outcome, settle};
use knocker::{
    LastResult, ProbeResponse, RetryPolicy, Site, SiteId, SiteStatus, SiteStore, ValidationMode,
    ValidationOutcome,
};

fn site(id: i64) -> Site {
    Site::new(SiteId(id), "Test", "https://test.com")
        .with_interval_ms(60_000)
        .with_retry_policy(RetryPolicy::new(2, 1))
}

#[tokio::test(start_paused = true)]
async fn test_retries_then_failure_then_recovery() {
    let h = harness(ScriptedProber::statuses(&[500, 500, 500, 200]));
    let site = site(1);
    h.store.put_site(site.clone());
    let mut rx = h.store.subscribe();

    h.scheduler.schedule_validation(&site, true, false).await;

    for expected_attempt in 1..=2 {
        let record = next_outcome(&mut rx).await;
        match record.outcome {
            ValidationOutcome::RetryScheduled { attempt, next_attempt_at, reason } => {
                assert_eq!(attempt, expected_attempt);
                assert_eq!(reason, "status 500");
                assert_eq!(next_attempt_at - record.timestamp, chrono::Duration::minutes(1));
            }
            other => panic!("expected a retry, got {other:?}"),
        }
    }

    let failed = next_outcome(&mut rx).await;
    assert_eq!(failed.outcome, ValidationOutcome::Failed { reason: "status 500".to_string() });

    let recovered = next_outcome(&mut rx).await;
    assert_eq!(recovered.outcome, ValidationOutcome::Success);

    settle(Duration::from_millis(10)).await;
    assert_eq!(
        h.notifier.sent(),
        vec![
            Notification::Failure(SiteId(1), "status 500".to_string()),
            Notification::Success(SiteId(1)),
        ]
    );
    assert_eq!(h.prober.calls(), 4);

    let entry = h.scheduler.entry(SiteId(1)).await.unwrap();
    assert_eq!(entry.consecutive_failures, 0);
    let last = h.store.site(SiteId(1)).unwrap().last_result.unwrap();
    assert_eq!(last.status, SiteStatus::Ok);
}

#[tokio::test(start_paused = true)]
async fn test_empty_search_term_fails_without_retrying() {
    let h = harness(ScriptedProber::statuses(&[200]));
    let site = site(1)
        .with_validation(ValidationMode::TermSearch, Some(String::new()))
        .with_retry_policy(RetryPolicy::new(3, 1));
    h.store.put_site(site.clone());
    let mut rx = h.store.subscribe();

    h.scheduler.schedule_validation(&site, true, false).await;

    let record = next_outcome(&mut rx).await;
    assert_eq!(
        record.outcome,
        ValidationOutcome::Failed { reason: "configuration error: empty search term".to_string() }
    );
    assert_eq!(h.prober.calls(), 0);
    assert_eq!(h.scheduler.entry(SiteId(1)).await.unwrap().consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_retries_fails_on_first_error() {
    let h = harness(ScriptedProber::new(vec![Err("connection refused".to_string())]));
    let site = site(1).with_retry_policy(RetryPolicy::new(0, 1));
    let mut rx = h.store.subscribe();

    h.scheduler.schedule_validation(&site, true, false).await;

    let record = next_outcome(&mut rx).await;
    assert_eq!(
        record.outcome,
        ValidationOutcome::Failed { reason: "network error: connection refused".to_string() }
    );
}

#[tokio::test(start_paused = true)]
async fn test_term_search_mismatch_is_retried() {
    let h = harness(ScriptedProber::new(vec![Ok(ProbeResponse::new(200, "Service Unavailable"))]));
    let site = site(1).with_validation(ValidationMode::TermSearch, Some("Welcome".to_string()));
    let mut rx = h.store.subscribe();

    h.scheduler.schedule_validation(&site, true, false).await;

    let record = next_outcome(&mut rx).await;
    match record.outcome {
        ValidationOutcome::RetryScheduled { attempt, reason, .. } => {
            assert_eq!(attempt, 1);
            assert!(reason.contains("Welcome"), "unexpected reason: {reason}");
        }
        other => panic!("expected a retry, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_success_is_not_notified() {
    let h = harness(ScriptedProber::statuses(&[200]));
    let site = site(1);
    let mut rx = h.store.subscribe();

    h.scheduler.schedule_validation(&site, true, false).await;
    assert_eq!(next_outcome(&mut rx).await.outcome, ValidationOutcome::Success);

    settle(Duration::from_millis(10)).await;
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_recovery_from_stored_error_is_notified() {
    let h = harness(ScriptedProber::statuses(&[200]));
    let mut site = site(1);
    site.last_result = Some(LastResult::new(
        SiteStatus::Error,
        Some("status 502".to_string()),
        Utc::now() - chrono::Duration::minutes(5),
    ));
    h.store.put_site(site);
    let mut rx = h.store.subscribe();

    h.scheduler.ensure_scheduled_validations().await.unwrap();
    assert_eq!(next_outcome(&mut rx).await.outcome, ValidationOutcome::Success);

    settle(Duration::from_millis(10)).await;
    assert_eq!(h.notifier.sent(), vec![Notification::Success(SiteId(1))]);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_after_restart_during_retry_is_notified() {
    let before = harness(ScriptedProber::statuses(&[200]));
    before.store.put_site(site(1));
    let now = Utc::now();
    let failed = ValidationOutcome::Failed { reason: "status 500".to_string() };
    before.store.record_result(SiteId(1), &failed, now - chrono::Duration::minutes(10)).await.unwrap();
    let retry = ValidationOutcome::RetryScheduled {
        attempt: 1,
        next_attempt_at: now - chrono::Duration::minutes(4),
        reason: "status 500".to_string(),
    };
    before.store.record_result(SiteId(1), &retry, now - chrono::Duration::minutes(5)).await.unwrap();
    before.store.mark_checking(SiteId(1)).await.unwrap();

    // The process died while the retry was running
    let stored = before.store.site(SiteId(1)).unwrap();
    assert_eq!(stored.last_result.as_ref().unwrap().status, SiteStatus::Checking);

    let after = harness(ScriptedProber::statuses(&[200]));
    after.store.put_site(stored);
    let mut rx = after.store.subscribe();

    after.scheduler.ensure_scheduled_validations().await.unwrap();
    assert_eq!(next_outcome(&mut rx).await.outcome, ValidationOutcome::Success);

    settle(Duration::from_millis(10)).await;
    assert_eq!(after.notifier.sent(), vec![Notification::Success(SiteId(1))]);
}

#[tokio::test(start_paused = true)]
async fn test_restart_resumes_pending_retry() {
    let before = harness(ScriptedProber::statuses(&[500]));
    let site = site(1).with_interval_ms(86_400_000);
    before.store.put_site(site);
    let retry_at = Utc::now() + chrono::Duration::minutes(1);
    let retry = ValidationOutcome::RetryScheduled {
        attempt: 1,
        next_attempt_at: retry_at,
        reason: "status 500".to_string(),
    };
    before.store.record_result(SiteId(1), &retry, Utc::now()).await.unwrap();

    let after = harness(ScriptedProber::statuses(&[500]));
    after.store.put_site(before.store.site(SiteId(1)).unwrap());
    let mut rx = after.store.subscribe();

    after.scheduler.ensure_scheduled_validations().await.unwrap();
    let entry = after.scheduler.entry(SiteId(1)).await.unwrap();
    assert_eq!(entry.next_fire_at, retry_at);
    assert_eq!(entry.consecutive_failures, 1);

    match next_outcome(&mut rx).await.outcome {
        ValidationOutcome::RetryScheduled { attempt, .. } => assert_eq!(attempt, 2),
        other => panic!("expected a retry, got {other:?}"),
    }
    assert_eq!(
        next_outcome(&mut rx).await.outcome,
        ValidationOutcome::Failed { reason: "status 500".to_string() }
    );
    assert_eq!(after.prober.calls(), 2);
}

#[tokio::test]
async fn test_throwing_script_is_retried_like_any_failure() {
    let h = harness(ScriptedProber::statuses(&[200]));
    let site = site(1)
        .with_validation(ValidationMode::JavaScript, Some("throw new Error('bad payload')".to_string()))
        .with_retry_policy(RetryPolicy::new(1, 0));
    let mut rx = h.store.subscribe();

    h.scheduler.schedule_validation(&site, true, false).await;

    let first = next_outcome(&mut rx).await;
    match first.outcome {
        ValidationOutcome::RetryScheduled { attempt, reason, .. } => {
            assert_eq!(attempt, 1);
            assert!(reason.starts_with("script error:"), "unexpected reason: {reason}");
        }
        other => panic!("expected a retry, got {other:?}"),
    }

    let second = next_outcome(&mut rx).await;
    assert!(matches!(second.outcome, ValidationOutcome::Failed { ref reason } if reason.contains("bad payload")));

    h.scheduler.shutdown().await;
}
