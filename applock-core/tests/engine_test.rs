use applock_core::platform::scripted::{RecordingGatePresenter, ScriptedForegroundProvider};
use applock_core::{
    ApplockConfig, Engine, ForegroundEventKind, ForegroundProvider, GateOutcome, GatePresenter,
    LockError,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn fast_config(dir: &TempDir) -> ApplockConfig {
    ApplockConfig {
        data_dir: dir.path().to_path_buf(),
        self_package: "com.applockd.host".to_string(),
        poll_interval_ms: 5,
        permission_backoff_ms: 5,
        foreground_window_secs: 10,
        unlock_ttl_secs: 300,
        gate_queue_depth: 16,
    }
}

struct Harness {
    engine: Engine,
    provider: Arc<ScriptedForegroundProvider>,
    presenter: Arc<RecordingGatePresenter>,
}

fn start_engine(dir: &TempDir) -> Harness {
    let provider = Arc::new(ScriptedForegroundProvider::new());
    let presenter = Arc::new(RecordingGatePresenter::new());
    let engine = Engine::start(
        fast_config(dir),
        Arc::clone(&provider) as Arc<dyn ForegroundProvider>,
        Arc::clone(&presenter) as Arc<dyn GatePresenter>,
    )
    .expect("start engine");
    Harness {
        engine,
        provider,
        presenter,
    }
}

async fn wait_for_presentations(presenter: &RecordingGatePresenter, count: usize) {
    for _ in 0..200 {
        if presenter.presented().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {count} presentations, saw {:?}",
        presenter.presented()
    );
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn full_polling_pipeline() {
    let dir = TempDir::new().expect("create temp dir");
    let h = start_engine(&dir);

    h.engine.enable("1234").await.expect("enable");
    h.engine
        .add_protected("Messages", "com.example.messages")
        .expect("add");

    h.provider.set_foreground("com.example.messages");
    wait_for_presentations(&h.presenter, 1).await;
    assert_eq!(h.presenter.presented(), vec!["com.example.messages"]);

    let status = h.engine.status().expect("status");
    assert!(status.enforcing);
    assert!(status.watcher_running);
    assert_eq!(status.active_gate.as_deref(), Some("com.example.messages"));

    // Unlocking exempts the app: no second gate while it stays put.
    h.engine
        .resolve_gate("com.example.messages", GateOutcome::Unlocked);
    assert!(h.engine.is_temporarily_unlocked("com.example.messages"));
    settle().await;
    assert_eq!(h.presenter.presented().len(), 1);

    h.engine.shutdown();
}

#[tokio::test]
async fn event_path_matches_polling_decision() {
    let dir = TempDir::new().expect("create temp dir");
    let h = start_engine(&dir);

    h.engine.enable("1234").await.expect("enable");
    h.engine.add_protected("Bank", "com.bank").expect("add");

    // Unprotected and own-package events stay silent.
    h.engine
        .handle_foreground_event("com.other", ForegroundEventKind::WindowForeground);
    h.engine
        .handle_foreground_event("com.applockd.host", ForegroundEventKind::WindowForeground);
    settle().await;
    assert!(h.presenter.presented().is_empty());

    h.engine
        .handle_foreground_event("com.bank", ForegroundEventKind::WindowForeground);
    wait_for_presentations(&h.presenter, 1).await;
    assert_eq!(h.presenter.presented(), vec!["com.bank"]);

    h.engine.shutdown();
}

#[tokio::test]
async fn both_detectors_dedupe_through_one_gate() {
    let dir = TempDir::new().expect("create temp dir");
    let h = start_engine(&dir);

    h.engine.enable("1234").await.expect("enable");
    h.engine.add_protected("Bank", "com.bank").expect("add");

    // The same foreground transition observed by both detectors produces
    // one visible gate.
    h.provider.set_foreground("com.bank");
    h.engine
        .handle_foreground_event("com.bank", ForegroundEventKind::WindowForeground);
    wait_for_presentations(&h.presenter, 1).await;
    settle().await;
    assert_eq!(h.presenter.presented(), vec!["com.bank"]);

    h.engine.shutdown();
}

#[tokio::test]
async fn dismissed_gate_represents_on_next_entry() {
    let dir = TempDir::new().expect("create temp dir");
    let h = start_engine(&dir);

    h.engine.enable("1234").await.expect("enable");
    h.engine.add_protected("Bank", "com.bank").expect("add");

    h.engine
        .handle_foreground_event("com.bank", ForegroundEventKind::WindowForeground);
    wait_for_presentations(&h.presenter, 1).await;

    h.engine.resolve_gate("com.bank", GateOutcome::Dismissed);
    assert!(!h.engine.is_temporarily_unlocked("com.bank"));

    // The app re-enters the foreground: gate again.
    h.engine
        .handle_foreground_event("com.bank", ForegroundEventKind::WindowForeground);
    wait_for_presentations(&h.presenter, 2).await;

    h.engine.shutdown();
}

#[tokio::test]
async fn disable_stops_both_paths() {
    let dir = TempDir::new().expect("create temp dir");
    let h = start_engine(&dir);

    h.engine.enable("1234").await.expect("enable");
    h.engine.add_protected("Bank", "com.bank").expect("add");
    h.engine.disable("1234").await.expect("disable");

    let status = h.engine.status().expect("status");
    assert!(!status.enforcing);
    assert!(!status.watcher_running);

    h.provider.set_foreground("com.bank");
    h.engine
        .handle_foreground_event("com.bank", ForegroundEventKind::WindowForeground);
    settle().await;
    assert!(h.presenter.presented().is_empty());

    h.engine.shutdown();
}

#[tokio::test]
async fn wrong_pin_keeps_enforcement_running() {
    let dir = TempDir::new().expect("create temp dir");
    let h = start_engine(&dir);

    h.engine.enable("1234").await.expect("enable");
    h.engine.add_protected("Bank", "com.bank").expect("add");

    let err = h.engine.disable("0000").await.expect_err("wrong pin");
    assert!(matches!(err, LockError::IncorrectPin));

    h.provider.set_foreground("com.bank");
    wait_for_presentations(&h.presenter, 1).await;

    h.engine.shutdown();
}

#[tokio::test]
async fn enforcement_survives_restart() {
    let dir = TempDir::new().expect("create temp dir");
    {
        let h = start_engine(&dir);
        h.engine.enable("1234").await.expect("enable");
        h.engine.add_protected("Bank", "com.bank").expect("add");
        h.engine.shutdown();
    }

    // A fresh engine over the same data dir picks up the persisted
    // settings and protected list.
    let h = start_engine(&dir);
    let status = h.engine.status().expect("status");
    assert!(status.enforcing);
    assert!(status.pin_set);
    assert_eq!(status.protected_count, 1);
    assert!(status.watcher_running);

    h.provider.set_foreground("com.bank");
    wait_for_presentations(&h.presenter, 1).await;

    h.engine.shutdown();
}

#[tokio::test]
async fn removing_app_stops_gating_it() {
    let dir = TempDir::new().expect("create temp dir");
    let h = start_engine(&dir);

    h.engine.enable("1234").await.expect("enable");
    h.engine
        .add_protected_many(&[
            ("Bank".to_string(), "com.bank".to_string()),
            ("Chat".to_string(), "com.chat".to_string()),
        ])
        .expect("add many");
    assert_eq!(h.engine.protected_apps().expect("list").len(), 2);

    assert!(h.engine.remove_protected("com.bank").expect("remove"));
    h.engine
        .handle_foreground_event("com.bank", ForegroundEventKind::WindowForeground);
    settle().await;
    assert!(h.presenter.presented().is_empty());

    h.engine
        .handle_foreground_event("com.chat", ForegroundEventKind::WindowForeground);
    wait_for_presentations(&h.presenter, 1).await;

    h.engine.shutdown();
}
