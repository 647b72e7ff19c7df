use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use relayq::{
    config::Config,
    history::DeliveryOutcome,
    job::{Enqueue, FallbackPayload, Job, JobStatus},
    service::{FailureDisposition, Service},
    transport::{PushChannel, Transport, TransportError},
    worker::Worker,
};
use tempfile::TempDir;

struct TmpService {
    svc: Arc<Service>,
    #[allow(unused)]
    tmpdir: TempDir,
}

impl Deref for TmpService {
    type Target = Service;

    fn deref(&self) -> &Self::Target {
        &self.svc
    }
}

async fn setup_with(configure: impl FnOnce(&mut Config)) -> TmpService {
    let path = tempfile::tempdir().unwrap();

    let mut config = Config {
        db_path: Some(path.path().join("relayq.db").to_string_lossy().to_string()),
        ..Config::default()
    };
    configure(&mut config);

    TmpService {
        svc: Arc::new(Service::connect_with(config).await.unwrap()),
        tmpdir: path,
    }
}

async fn setup() -> TmpService {
    setup_with(|_| {}).await
}

/// Transport fake: pops scripted outcomes, defaults to success, and records
/// every send it sees.
#[derive(Clone, Default)]
struct ScriptedTransport {
    outcomes: Arc<Mutex<VecDeque<Result<(), String>>>>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl ScriptedTransport {
    fn failing(times: usize, message: &str) -> Self {
        let transport = Self::default();
        for _ in 0..times {
            transport
                .outcomes
                .lock()
                .unwrap()
                .push_back(Err(message.to_owned()));
        }
        transport
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, to: &str, body: &str) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_owned(), body.to_owned()));

        match self.outcomes.lock().unwrap().pop_front() {
            Some(Err(detail)) => Err(TransportError::Provider { status: 500, detail }),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
struct RecordingPush {
    notified: Arc<Mutex<Vec<FallbackPayload>>>,
}

impl PushChannel for RecordingPush {
    async fn notify(&self, payload: &FallbackPayload) -> eyre::Result<()> {
        self.notified.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

#[tokio::test]
async fn enqueue_is_idempotent() {
    let service = setup().await;

    assert_eq!(
        service
            .enqueue("appt123_approved", Some("972501234567"), "first", None)
            .await
            .unwrap(),
        Enqueue::Queued
    );

    // Second call with the same key and a different body is a silent no-op.
    assert_eq!(
        service
            .enqueue("appt123_approved", Some("972509999999"), "second", None)
            .await
            .unwrap(),
        Enqueue::Duplicate
    );

    let jobs = service.list_jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].body, "first");
    assert_eq!(jobs[0].to_addr.as_deref(), Some("972501234567"));
}

#[tokio::test]
async fn enqueue_stores_destination_verbatim() {
    let service = setup().await;

    service
        .enqueue("appt1_reminder", Some("972501234567"), "see you at 10", None)
        .await
        .unwrap();

    let job = service.get_job("appt1_reminder").await.unwrap().unwrap();
    assert_eq!(job.id, "appt1_reminder");
    assert_eq!(job.to_addr.as_deref(), Some("972501234567"));
    assert_eq!(job.body, "see you at 10");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.next_attempt_at, job.created_at);
}

#[tokio::test]
async fn enqueue_rejects_empty_key() {
    let service = setup().await;

    assert!(service
        .enqueue("", Some("972501234567"), "hello", None)
        .await
        .is_err());
}

#[tokio::test]
async fn at_most_one_claim_succeeds() {
    let service = setup().await;

    service
        .enqueue("contested", Some("972501234567"), "hello", None)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let svc = service.svc.clone();
        handles.push(tokio::spawn(async move {
            svc.try_claim("contested", &format!("worker-{i}")).await.unwrap()
        }));
    }

    let mut claimed = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            claimed += 1;
        }
    }

    assert_eq!(claimed, 1);

    let job = service.get_job("contested").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert!(job.locked_by.is_some());
    assert!(job.lock_expires_at.unwrap() > job.locked_at.unwrap());
}

#[tokio::test]
async fn claimed_job_is_not_claimable() {
    let service = setup().await;

    service
        .enqueue("k1", Some("972501234567"), "hello", None)
        .await
        .unwrap();

    assert_eq!(service.claimable(10).await.unwrap(), vec!["k1".to_owned()]);

    service.try_claim("k1", "worker-a").await.unwrap().unwrap();

    assert!(service.claimable(10).await.unwrap().is_empty());
    assert!(service.try_claim("k1", "worker-b").await.unwrap().is_none());
}

#[tokio::test]
async fn failure_schedules_future_retry() {
    let service = setup().await;

    service
        .enqueue("k1", Some("972501234567"), "hello", None)
        .await
        .unwrap();

    let job = service.try_claim("k1", "worker-a").await.unwrap().unwrap();

    let disposition = service
        .record_failure(&job, "worker-a", "provider returned status 503")
        .await
        .unwrap();

    let FailureDisposition::Retrying { next_attempt_at } = disposition else {
        panic!("first failure should reschedule, got {disposition:?}");
    };

    let job = service.get_job("k1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Retrying);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.last_error.as_deref(), Some("provider returned status 503"));
    assert!(job.locked_by.is_none());
    assert!(job.lock_expires_at.is_none());
    assert!(next_attempt_at > job.created_at);
    assert_eq!(job.next_attempt_at, next_attempt_at);

    // Not due yet, so not claimable.
    assert!(service.claimable(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn stale_lease_cannot_resolve_job() {
    let service = setup().await;

    service
        .enqueue("k1", Some("972501234567"), "hello", None)
        .await
        .unwrap();

    let job = service.try_claim("k1", "worker-a").await.unwrap().unwrap();

    // Simulate the reclaimer having reset the job out from under worker-a.
    {
        let mut conn = service.db().acquire().await.unwrap();
        sqlx::query(
            "UPDATE jobs SET status = 'pending', locked_by = NULL, locked_at = NULL, lock_expires_at = NULL WHERE id = 'k1'",
        )
        .execute(&mut *conn)
        .await
        .unwrap();
    }

    let disposition = service
        .record_failure(&job, "worker-a", "timed out")
        .await
        .unwrap();

    assert_eq!(disposition, FailureDisposition::LeaseLost);

    let job = service.get_job("k1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
}

#[tokio::test]
async fn worker_delivers_and_logs() {
    let service = setup().await;

    service
        .enqueue("k1", Some("972501234567"), "hello", None)
        .await
        .unwrap();

    let transport = ScriptedTransport::default();
    let worker = Worker::new(
        service.svc.clone(),
        transport.clone(),
        RecordingPush::default(),
        "worker-a",
    );

    worker.tick().await.unwrap();

    assert_eq!(
        transport.sent.lock().unwrap().as_slice(),
        &[("972501234567".to_owned(), "hello".to_owned())]
    );

    // Success removes the job and appends exactly one audit entry.
    assert!(service.get_job("k1").await.unwrap().is_none());

    let history = service.history(10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].job_id, "k1");
    assert_eq!(history[0].outcome, DeliveryOutcome::Sent);
    assert_eq!(history[0].body, "hello");
    assert_eq!(history[0].to_addr.as_deref(), Some("972501234567"));
    assert!(history[0].fallback.is_none());
    assert!(history[0].last_error.is_none());
}

#[tokio::test]
async fn three_failures_reach_terminal_state() {
    let service = setup_with(|c| c.base_backoff_secs = Some(0)).await;

    service
        .enqueue("k1", Some("972501234567"), "hello", None)
        .await
        .unwrap();

    let transport = ScriptedTransport::failing(3, "rate limited");
    let worker = Worker::new(
        service.svc.clone(),
        transport,
        RecordingPush::default(),
        "worker-a",
    );

    for _ in 0..3 {
        // Zero base backoff still schedules 1ms into the future.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        worker.tick().await.unwrap();
    }

    let job = service.get_job("k1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(
        job.last_error.as_deref(),
        Some("provider returned status 500: rate limited")
    );
    assert!(job.locked_by.is_none());

    // Terminal jobs are never selected again.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert!(service.claimable(10).await.unwrap().is_empty());
    assert!(service.history(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_job_can_be_reset_by_operator() {
    let service = setup_with(|c| {
        c.base_backoff_secs = Some(0);
        c.max_attempts = Some(1);
    })
    .await;

    service
        .enqueue("k1", Some("972501234567"), "hello", None)
        .await
        .unwrap();

    let job = service.try_claim("k1", "worker-a").await.unwrap().unwrap();
    service
        .record_failure(&job, "worker-a", "boom")
        .await
        .unwrap();

    assert_eq!(
        service.get_job("k1").await.unwrap().unwrap().status,
        JobStatus::Failed
    );

    assert!(service.reset_failed("k1").await.unwrap());
    assert!(!service.reset_failed("k1").await.unwrap());
    assert!(!service.reset_failed("missing").await.unwrap());

    let job = service.get_job("k1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert!(job.last_error.is_none());
}

#[tokio::test]
async fn missing_destination_routes_to_fallback() {
    let service = setup().await;

    let fallback = FallbackPayload {
        entity_id: "client-7".to_owned(),
        title: "Appointment approved".to_owned(),
        body: "See you Sunday".to_owned(),
        data: Default::default(),
    };

    service
        .enqueue("appt7_approved", None, "See you Sunday", Some(&fallback))
        .await
        .unwrap();

    let transport = ScriptedTransport::default();
    let push = RecordingPush::default();
    let worker = Worker::new(
        service.svc.clone(),
        transport.clone(),
        push.clone(),
        "worker-a",
    );

    worker.tick().await.unwrap();

    // The primary transport is never attempted.
    assert!(transport.sent.lock().unwrap().is_empty());
    assert_eq!(push.notified.lock().unwrap().as_slice(), &[fallback.clone()]);

    // Resolved terminally, never retried.
    assert!(service.get_job("appt7_approved").await.unwrap().is_none());

    // The audit entry carries the full job data, fallback content included,
    // so the log alone shows which entity was notified and with what.
    let history = service.history(10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, DeliveryOutcome::SentViaFallback);
    assert_eq!(history[0].job_id, "appt7_approved");
    assert_eq!(history[0].body, "See you Sunday");
    assert_eq!(history[0].to_addr, None);
    assert_eq!(history[0].fallback.as_deref(), Some(&fallback));
}

#[tokio::test]
async fn reclaimer_rescues_expired_leases_only() {
    let service = setup_with(|c| c.lease_duration_secs = Some(0)).await;

    service
        .enqueue("stuck", Some("972501234567"), "hello", None)
        .await
        .unwrap();

    let claimed = service.try_claim("stuck", "worker-dead").await.unwrap().unwrap();
    assert_eq!(claimed.status, JobStatus::Processing);

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    assert_eq!(service.reclaim_expired().await.unwrap(), 1);

    let job = service.get_job("stuck").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.locked_by.is_none());
    assert!(job.locked_at.is_none());
    assert!(job.lock_expires_at.is_none());
    // Attempts and schedule are untouched by the reclaimer.
    assert_eq!(job.attempts, claimed.attempts);
    assert_eq!(job.next_attempt_at, claimed.next_attempt_at);

    // Back in the claimable pool.
    assert!(service.try_claim("stuck", "worker-b").await.unwrap().is_some());
}

#[tokio::test]
async fn reclaimer_leaves_live_leases_alone() {
    let service = setup().await;

    service
        .enqueue("live", Some("972501234567"), "hello", None)
        .await
        .unwrap();

    service.try_claim("live", "worker-a").await.unwrap().unwrap();

    // Default two-minute lease is nowhere near expiry.
    assert_eq!(service.reclaim_expired().await.unwrap(), 0);
    assert_eq!(
        service.get_job("live").await.unwrap().unwrap().status,
        JobStatus::Processing
    );
}

#[tokio::test]
async fn fallback_payload_round_trips() {
    let service = setup().await;

    let fallback = FallbackPayload {
        entity_id: "client-1".to_owned(),
        title: "title".to_owned(),
        body: "body".to_owned(),
        data: [("screen".to_owned(), "appointments".to_owned())].into(),
    };

    service
        .enqueue("k1", Some("972501234567"), "hello", Some(&fallback))
        .await
        .unwrap();

    let job: Job = service.get_job("k1").await.unwrap().unwrap();
    assert_eq!(job.fallback.as_deref(), Some(&fallback));
}
