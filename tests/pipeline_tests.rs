use ftpdrop::*;
use ftpdrop_ftp::testing::FakeFtpServer;
use ftpdrop_ftp::DataChannelMode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};

struct Harness {
    tmp: TempDir,
    controller: PipelineController,
    events: UnboundedReceiver<PipelineEvent>,
}

impl Harness {
    fn source(&self) -> PathBuf {
        self.tmp.path().join("source")
    }

    fn target(&self) -> PathBuf {
        self.tmp.path().join("target")
    }

    async fn next_event(&mut self) -> PipelineEvent {
        timeout(Duration::from_secs(10), self.events.recv())
            .await
            .expect("no pipeline event within 10s")
            .expect("sink closed")
    }

    async fn assert_quiet(&mut self) {
        sleep(Duration::from_millis(500)).await;
        assert!(self.events.try_recv().is_err());
    }
}

fn test_options() -> PipelineOptions {
    PipelineOptions {
        workers: 3,
        queue_capacity: 16,
        stop_timeout: Duration::from_secs(5),
        retry: RetryPolicy::none(),
        settle: SettlePolicy {
            interval: Duration::from_millis(50),
            max_checks: 10,
        },
    }
}

fn write_settings(dir: &Path, host: &str, port: u16) {
    std::fs::write(
        dir.join("settings.ini"),
        format!(
            "HOSTNAME={}\nUSER=user\nPASSWORD=pw\nSOURCE=source\nTARGET=target\nDESTINATION=/\nPORT={}\n",
            host, port
        ),
    )
    .unwrap();
}

fn harness(host: &str, port: u16, options: PipelineOptions) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    write_settings(tmp.path(), host, port);
    let store = SettingsStore::new(tmp.path().join("settings.ini"), tmp.path());
    store.load().unwrap();

    let (sink, events) = ChannelSink::new();
    let controller = PipelineController::new(
        Arc::new(store),
        Arc::new(sink),
        ftp_uploader_factory(DataChannelMode::Passive),
        options,
    );
    Harness {
        tmp,
        controller,
        events,
    }
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..250 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_new_file_is_uploaded_and_archived() {
    let server = FakeFtpServer::start("user", "pw").await.unwrap();
    let mut h = harness(&server.host(), server.port(), test_options());
    h.controller.start().await.unwrap();
    assert_eq!(h.controller.state(), MonitorState::Active);

    let content = b"id,amount\n1,9.99\n2,15.00\n";
    std::fs::write(h.source().join("report.csv"), content).unwrap();

    match h.next_event().await {
        PipelineEvent::UploadSucceeded {
            path, archived_to, ..
        } => {
            assert_eq!(path.file_name().unwrap(), "report.csv");
            assert_eq!(archived_to, h.target().join("report.csv"));
        }
        other => panic!("unexpected {:?}", other),
    }

    assert_eq!(server.file("/report.csv").unwrap(), content);
    assert!(!h.source().join("report.csv").exists());
    assert_eq!(std::fs::read(h.target().join("report.csv")).unwrap(), content);

    h.controller.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreachable_host_leaves_file_in_source() {
    let mut h = harness("127.0.0.1", closed_port(), test_options());
    h.controller.start().await.unwrap();

    std::fs::write(h.source().join("x.txt"), b"payload").unwrap();

    match h.next_event().await {
        PipelineEvent::UploadFailed { error, .. } => {
            assert!(matches!(error, UploadError::Connect(_)), "{:?}", error)
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(h.source().join("x.txt").exists());
    assert!(!h.target().join("x.txt").exists());

    h.controller.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_several_files_are_all_uploaded() {
    let server = FakeFtpServer::start("user", "pw").await.unwrap();
    let mut h = harness(&server.host(), server.port(), test_options());
    h.controller.start().await.unwrap();

    for i in 0..5 {
        std::fs::write(h.source().join(format!("f{}.dat", i)), format!("data {}", i)).unwrap();
    }
    for _ in 0..5 {
        assert!(matches!(
            h.next_event().await,
            PipelineEvent::UploadSucceeded { .. }
        ));
    }

    assert_eq!(server.file_names().len(), 5);
    assert_eq!(std::fs::read_dir(h.source()).unwrap().count(), 0);
    assert_eq!(std::fs::read_dir(h.target()).unwrap().count(), 5);
    h.controller.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_is_idempotent_and_inactive_ignores_files() {
    let server = FakeFtpServer::start("user", "pw").await.unwrap();
    let mut h = harness(&server.host(), server.port(), test_options());

    h.controller.stop().await.unwrap();
    h.controller.start().await.unwrap();
    h.controller.start().await.unwrap();
    h.controller.stop().await.unwrap();
    h.controller.stop().await.unwrap();
    assert_eq!(h.controller.state(), MonitorState::Inactive);

    std::fs::write(h.source().join("ignored.txt"), b"x").unwrap();
    h.assert_quiet().await;
    assert_eq!(server.stor_attempts(), 0);
    assert!(h.source().join("ignored.txt").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_toggle_pauses_and_resumes() {
    let server = FakeFtpServer::start("user", "pw").await.unwrap();
    let mut h = harness(&server.host(), server.port(), test_options());

    assert_eq!(h.controller.toggle().await.unwrap(), MonitorState::Active);
    assert_eq!(h.controller.toggle().await.unwrap(), MonitorState::Inactive);
    std::fs::write(h.source().join("paused.txt"), b"x").unwrap();
    h.assert_quiet().await;

    assert_eq!(h.controller.toggle().await.unwrap(), MonitorState::Active);
    std::fs::write(h.source().join("resumed.txt"), b"y").unwrap();
    match h.next_event().await {
        PipelineEvent::UploadSucceeded { path, .. } => {
            assert_eq!(path.file_name().unwrap(), "resumed.txt")
        }
        other => panic!("unexpected {:?}", other),
    }
    // Created while paused: not replayed.
    assert!(h.source().join("paused.txt").exists());
    h.controller.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_apply_settings_restarts_on_new_source_dir() {
    let server = FakeFtpServer::start("user", "pw").await.unwrap();
    server.add_dir("/inbox");
    let mut h = harness(&server.host(), server.port(), test_options());
    h.controller.start().await.unwrap();

    let mut settings = (*h.controller.settings()).clone();
    let new_source = h.tmp.path().join("source2");
    settings.source_dir = new_source.clone();
    settings.remote_dir = "/inbox".into();
    h.controller.apply_settings(settings).await.unwrap();
    assert_eq!(h.controller.state(), MonitorState::Active);
    assert!(new_source.is_dir());

    let saved = std::fs::read_to_string(h.tmp.path().join("settings.ini")).unwrap();
    assert!(saved.contains("DESTINATION=/inbox"));

    std::fs::write(new_source.join("new.txt"), b"new").unwrap();
    match h.next_event().await {
        PipelineEvent::UploadSucceeded { path, .. } => {
            assert_eq!(path, new_source.join("new.txt"))
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(server.file("/inbox/new.txt").unwrap(), b"new");

    std::fs::write(h.source().join("old.txt"), b"old").unwrap();
    h.assert_quiet().await;
    assert!(h.source().join("old.txt").exists());

    h.controller.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_waits_for_in_flight_upload() {
    let server = FakeFtpServer::start("user", "pw").await.unwrap();
    server.delay_stores(Duration::from_millis(300));
    let mut h = harness(&server.host(), server.port(), test_options());
    h.controller.start().await.unwrap();

    std::fs::write(h.source().join("slow.bin"), b"slow").unwrap();
    wait_for(|| server.stor_attempts() == 1).await;

    h.controller.stop().await.unwrap();
    assert!(matches!(
        h.events.try_recv().unwrap(),
        PipelineEvent::UploadSucceeded { .. }
    ));
    assert!(h.target().join("slow.bin").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_timeout_cancels_and_reports() {
    let server = FakeFtpServer::start("user", "pw").await.unwrap();
    server.delay_stores(Duration::from_secs(5));
    let mut options = test_options();
    options.stop_timeout = Duration::from_millis(300);
    let mut h = harness(&server.host(), server.port(), options);
    h.controller.start().await.unwrap();

    std::fs::write(h.source().join("stuck.bin"), b"stuck").unwrap();
    wait_for(|| server.stor_attempts() == 1).await;

    let err = h.controller.stop().await.unwrap_err();
    assert!(matches!(err, LifecycleError::MonitorStopTimeout(_)), "{:?}", err);
    assert_eq!(h.controller.state(), MonitorState::Inactive);

    match h.events.try_recv().unwrap() {
        PipelineEvent::UploadFailed { error, .. } => {
            assert!(matches!(error, UploadError::Cancelled(_)), "{:?}", error)
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(h.events.try_recv().is_err());
    assert!(h.source().join("stuck.bin").exists());
    assert!(!h.target().join("stuck.bin").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handle_event_runs_one_job_directly() {
    let server = FakeFtpServer::start("user", "pw").await.unwrap();
    let h = harness(&server.host(), server.port(), test_options());
    let file = h.source().join("manual.txt");
    std::fs::write(&file, b"manual").unwrap();

    let outcome = h.controller.handle_event(FileCreated(file.clone())).await;
    assert_eq!(
        outcome,
        JobOutcome::Uploaded {
            archived_to: h.target().join("manual.txt")
        }
    );
    assert_eq!(server.file("/manual.txt").unwrap(), b"manual");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pause_with_stuck_upload_reports_timeout() {
    let server = FakeFtpServer::start("user", "pw").await.unwrap();
    server.delay_stores(Duration::from_secs(5));
    let mut options = test_options();
    options.stop_timeout = Duration::from_millis(300);
    let mut h = harness(&server.host(), server.port(), options);
    assert_eq!(h.controller.toggle().await.unwrap(), MonitorState::Active);

    std::fs::write(h.source().join("stuck.bin"), b"stuck").unwrap();
    wait_for(|| server.stor_attempts() == 1).await;

    let err = h.controller.toggle().await.unwrap_err();
    assert!(matches!(err, LifecycleError::MonitorStopTimeout(_)), "{:?}", err);
    assert_eq!(h.controller.state(), MonitorState::Inactive);
    assert!(matches!(
        h.events.try_recv().unwrap(),
        PipelineEvent::UploadFailed {
            error: UploadError::Cancelled(_),
            ..
        }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_after_stuck_stop_runs_but_reports_timeout() {
    let server = FakeFtpServer::start("user", "pw").await.unwrap();
    server.delay_stores(Duration::from_secs(5));
    let mut options = test_options();
    options.stop_timeout = Duration::from_millis(300);
    let mut h = harness(&server.host(), server.port(), options);
    h.controller.start().await.unwrap();

    std::fs::write(h.source().join("stuck.bin"), b"stuck").unwrap();
    wait_for(|| server.stor_attempts() == 1).await;

    let settings = (*h.controller.settings()).clone();
    let err = h.controller.apply_settings(settings).await.unwrap_err();
    assert!(matches!(err, LifecycleError::MonitorStopTimeout(_)), "{:?}", err);
    assert_eq!(h.controller.state(), MonitorState::Active);

    h.controller.stop().await.unwrap();
}

fn quick_retry_options() -> PipelineOptions {
    PipelineOptions {
        retry: RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
        },
        ..test_options()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_refused_store_is_attempted_once() {
    let server = FakeFtpServer::start("user", "pw").await.unwrap();
    server.refuse_next_stores(5);
    let h = harness(&server.host(), server.port(), quick_retry_options());
    let file = h.source().join("locked.txt");
    std::fs::write(&file, b"locked").unwrap();

    let outcome = h.controller.handle_event(FileCreated(file.clone())).await;
    assert!(
        matches!(outcome, JobOutcome::UploadFailed(UploadError::Rejected(_))),
        "{:?}",
        outcome
    );
    assert_eq!(server.stor_attempts(), 1);
    assert!(file.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transient_store_failure_is_retried() {
    let server = FakeFtpServer::start("user", "pw").await.unwrap();
    server.fail_next_stores(1);
    let h = harness(&server.host(), server.port(), quick_retry_options());
    let file = h.source().join("flaky.txt");
    std::fs::write(&file, b"flaky").unwrap();

    let outcome = h.controller.handle_event(FileCreated(file)).await;
    assert!(matches!(outcome, JobOutcome::Uploaded { .. }), "{:?}", outcome);
    assert_eq!(server.stor_attempts(), 2);
    assert_eq!(server.file("/flaky.txt").unwrap(), b"flaky");
}
