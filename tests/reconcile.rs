//! End-to-end reconciliation scenarios driving the controller against
//! in-memory fakes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{ep, sidecar, FakeProvider, FakeSource};
use external_dns_docker::endpoint::RecordType;
use external_dns_docker::plan::DEFAULT_OWNER_ID;
use external_dns_docker::{Controller, ControllerConfig};

fn once_config() -> ControllerConfig {
    ControllerConfig {
        once: true,
        ..Default::default()
    }
}

fn controller(
    source: &Arc<FakeSource>,
    provider: &Arc<FakeProvider>,
    cfg: ControllerConfig,
) -> Controller {
    Controller::new(source.clone(), provider.clone(), cfg)
}

#[tokio::test]
async fn test_once_creates_record_and_ownership_sidecar() {
    let source = FakeSource::new(vec![ep(
        "app.example.com",
        &["1.2.3.4"],
        RecordType::A,
        300,
    )]);
    let provider = FakeProvider::new(vec![]);
    let ctrl = controller(&source, &provider, once_config());

    ctrl.run(CancellationToken::new()).await.unwrap();

    assert_eq!(provider.record_count(), 2);
    let record = provider.get("app.example.com", RecordType::A).unwrap();
    assert_eq!(record.targets, vec!["1.2.3.4"]);

    let txt = provider
        .get(
            "external-dns-docker-owner.app.example.com",
            RecordType::Txt,
        )
        .unwrap();
    assert_eq!(
        txt.targets,
        vec!["heritage=external-dns-docker,external-dns-docker/owner=external-dns-docker"]
    );
    assert!(ctrl.is_ready());
}

#[tokio::test]
async fn test_once_noop_when_converged() {
    let source = FakeSource::new(vec![ep(
        "app.example.com",
        &["1.2.3.4"],
        RecordType::A,
        300,
    )]);
    let provider = FakeProvider::new(vec![
        ep("app.example.com", &["1.2.3.4"], RecordType::A, 300),
        sidecar("app.example.com", DEFAULT_OWNER_ID),
    ]);
    let ctrl = controller(&source, &provider, once_config());

    ctrl.run(CancellationToken::new()).await.unwrap();

    assert!(provider.history().is_empty());
    assert!(ctrl.is_ready());
}

#[tokio::test]
async fn test_once_updates_changed_record() {
    let source = FakeSource::new(vec![ep(
        "app.example.com",
        &["5.6.7.8"],
        RecordType::A,
        300,
    )]);
    let provider = FakeProvider::new(vec![
        ep("app.example.com", &["1.2.3.4"], RecordType::A, 300),
        sidecar("app.example.com", DEFAULT_OWNER_ID),
    ]);
    let ctrl = controller(&source, &provider, once_config());

    ctrl.run(CancellationToken::new()).await.unwrap();

    let history = provider.history();
    assert_eq!(history.len(), 1);
    assert!(history[0].create.is_empty());
    assert!(history[0].delete.is_empty());
    assert_eq!(history[0].update_old.len(), 1);

    let record = provider.get("app.example.com", RecordType::A).unwrap();
    assert_eq!(record.targets, vec!["5.6.7.8"]);
}

#[tokio::test]
async fn test_once_deletes_removed_record_with_sidecar() {
    let source = FakeSource::new(vec![]);
    let provider = FakeProvider::new(vec![
        ep("app.example.com", &["1.2.3.4"], RecordType::A, 300),
        sidecar("app.example.com", DEFAULT_OWNER_ID),
    ]);
    let ctrl = controller(&source, &provider, once_config());

    ctrl.run(CancellationToken::new()).await.unwrap();

    assert_eq!(provider.record_count(), 0);
}

#[tokio::test]
async fn test_foreign_record_untouched() {
    let source = FakeSource::new(vec![]);
    let provider = FakeProvider::new(vec![ep(
        "manual.example.com",
        &["1.2.3.4"],
        RecordType::A,
        300,
    )]);
    let ctrl = controller(&source, &provider, once_config());

    ctrl.run(CancellationToken::new()).await.unwrap();

    assert_eq!(provider.record_count(), 1);
    assert!(provider.history().is_empty());
}

#[tokio::test]
async fn test_wrong_owner_not_deleted() {
    let source = FakeSource::new(vec![]);
    let provider = FakeProvider::new(vec![
        ep("app.example.com", &["1.2.3.4"], RecordType::A, 300),
        sidecar("app.example.com", "other"),
    ]);
    let ctrl = controller(
        &source,
        &provider,
        ControllerConfig {
            once: true,
            owner_id: "mine".into(),
            ..Default::default()
        },
    );

    ctrl.run(CancellationToken::new()).await.unwrap();

    assert_eq!(provider.record_count(), 2);
    assert!(provider.history().is_empty());
}

#[tokio::test]
async fn test_once_propagates_source_error() {
    let source = FakeSource::new(vec![]);
    source.fail_next(1);
    let provider = FakeProvider::new(vec![]);
    let ctrl = controller(&source, &provider, once_config());

    let err = ctrl.run(CancellationToken::new()).await.unwrap_err();

    assert!(
        err.to_string().contains("fetch desired endpoints"),
        "got: {err}"
    );
    assert!(!ctrl.is_ready());
}

#[tokio::test]
async fn test_once_propagates_provider_error() {
    let source = FakeSource::new(vec![]);
    let provider = FakeProvider::new(vec![]);
    provider.fail_records_next(1);
    let ctrl = controller(&source, &provider, once_config());

    let err = ctrl.run(CancellationToken::new()).await.unwrap_err();

    assert!(
        err.to_string().contains("fetch current records"),
        "got: {err}"
    );
}

#[tokio::test]
async fn test_once_wraps_apply_error() {
    let source = FakeSource::new(vec![ep(
        "app.example.com",
        &["1.2.3.4"],
        RecordType::A,
        300,
    )]);
    let provider = FakeProvider::new(vec![]);
    provider.fail_apply_next(1);
    let ctrl = controller(&source, &provider, once_config());

    let err = ctrl.run(CancellationToken::new()).await.unwrap_err();

    assert!(err.to_string().contains("apply changes"), "got: {err}");
    assert!(!ctrl.is_ready());
}

#[tokio::test]
async fn test_dry_run_skips_apply() {
    let source = FakeSource::new(vec![ep(
        "app.example.com",
        &["1.2.3.4"],
        RecordType::A,
        300,
    )]);
    let provider = FakeProvider::new(vec![]);
    let ctrl = controller(
        &source,
        &provider,
        ControllerConfig {
            once: true,
            dry_run: true,
            ..Default::default()
        },
    );

    ctrl.run(CancellationToken::new()).await.unwrap();

    assert!(provider.history().is_empty());
    assert_eq!(provider.record_count(), 0);
    assert!(ctrl.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_loop_survives_error_and_readiness_recovers() {
    let source = FakeSource::new(vec![ep(
        "app.example.com",
        &["1.2.3.4"],
        RecordType::A,
        300,
    )]);
    source.fail_next(1);
    let provider = FakeProvider::new(vec![]);
    let ctrl = controller(&source, &provider, ControllerConfig::default());
    let ready = ctrl.ready_flag();

    let shutdown = CancellationToken::new();
    let handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { ctrl.run(shutdown).await })
    };

    // First cycle fires immediately and fails.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.calls(), 1);
    assert!(!ready.load(std::sync::atomic::Ordering::SeqCst));

    // Backoff after one failure is the 5s base; the retry succeeds and
    // readiness flips true.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(source.calls(), 2);
    assert!(ready.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(provider.record_count(), 2);

    // A successful cycle restores the normal interval cadence.
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(source.calls(), 3);

    shutdown.cancel();
    let err = handle.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_debounce_coalesces_event_bursts() {
    let source = FakeSource::new(vec![ep(
        "app.example.com",
        &["1.2.3.4"],
        RecordType::A,
        300,
    )]);
    let provider = FakeProvider::new(vec![]);
    let ctrl = controller(
        &source,
        &provider,
        ControllerConfig {
            // Long interval so only events can trigger further cycles.
            interval: Duration::from_secs(3600),
            debounce: Duration::from_secs(5),
            ..Default::default()
        },
    );

    let shutdown = CancellationToken::new();
    let handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { ctrl.run(shutdown).await })
    };

    // Initial cycle.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.calls(), 1);

    // A burst of notifications less than the debounce apart coalesces
    // into exactly one cycle, 5s after the last event.
    for _ in 0..4 {
        source.fire_event();
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(source.calls(), 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(source.calls(), 2);

    // A later single event triggers one more cycle.
    source.fire_event();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(source.calls(), 3);

    shutdown.cancel();
    let _ = handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_event_picks_up_new_endpoints() {
    let source = FakeSource::new(vec![]);
    let provider = FakeProvider::new(vec![]);
    let ctrl = controller(
        &source,
        &provider,
        ControllerConfig {
            interval: Duration::from_secs(3600),
            debounce: Duration::from_secs(5),
            ..Default::default()
        },
    );

    let shutdown = CancellationToken::new();
    let handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { ctrl.run(shutdown).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(provider.record_count(), 0);

    // A container starts: the source changes and fires its handlers.
    source.set_endpoints(vec![ep("new.example.com", &["9.9.9.9"], RecordType::A, 300)]);
    source.fire_event();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(provider.record_count(), 2);
    assert!(provider.get("new.example.com", RecordType::A).is_some());

    shutdown.cancel();
    let _ = handle.await.unwrap();
}

#[tokio::test]
async fn test_cancellation_stops_loop() {
    let source = FakeSource::new(vec![]);
    let provider = FakeProvider::new(vec![]);
    let ctrl = controller(&source, &provider, ControllerConfig::default());

    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let err = ctrl.run(shutdown).await.unwrap_err();
    assert!(err.is_cancelled());
}
