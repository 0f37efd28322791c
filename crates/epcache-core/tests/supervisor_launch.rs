//! Integration test: supervisor launch, commit and stop paths with a shell
//! script standing in for the worker process.

mod common;

use std::path::Path;
use std::time::{Duration, Instant};

use common::http_server::{Route, TestServer};
use epcache_core::config::EpcacheConfig;
use epcache_core::protocol::WorkerJob;
use epcache_core::store::{Task, TaskDb};
use epcache_core::supervisor::{LaunchOutcome, Supervisor, WorkerCommand};
use tempfile::{tempdir, TempDir};

const DETAIL: &str = r#"{
    "id": 42,
    "title": "Show",
    "poster": "http://img.local/p.jpg",
    "year": 2024,
    "desc": "plot",
    "class": "drama",
    "type_name": "series",
    "source": "src",
    "episodes": ["http://media.local/1.mp4", "http://media.local/2.mp4"]
}"#;

struct Fixture {
    _tmp: TempDir,
    base: std::path::PathBuf,
    state: std::path::PathBuf,
    server: TestServer,
}

fn fixture(detail: &str) -> Fixture {
    let tmp = tempdir().unwrap();
    let base = tmp.path().join("media");
    let state = tmp.path().join("state");
    let server = TestServer::start(vec![("/detail", Route::ok(detail.to_string()))]);
    Fixture {
        _tmp: tmp,
        base,
        state,
        server,
    }
}

async fn supervisor(fx: &Fixture, script: &str) -> Supervisor {
    let db = TaskDb::open_at(fx.state.join("epcache.db")).await.unwrap();
    let cfg = EpcacheConfig {
        download_path: fx.base.clone(),
        detail_url: format!("{}?source={{source}}&id={{id}}", fx.server.url("/detail")),
        stop_grace_secs: 1,
        ..EpcacheConfig::default()
    };
    let worker = WorkerCommand::new("sh", vec!["-c".to_string(), script.to_string()]);
    Supervisor::new(db, &cfg, &fx.state, worker)
}

fn task() -> Task {
    let mut t = Task::new("t1".into(), "Show".into(), "src".into(), "42".into(), "0 2 * * *".into());
    t.total_episodes = 2;
    t
}

async fn wait_idle(sup: &Supervisor, limit: Duration) {
    let start = Instant::now();
    while !sup.running_task_ids().is_empty() {
        assert!(start.elapsed() < limit, "worker still registered after {:?}", limit);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn due_task_is_launched_and_completion_committed() {
    let fx = fixture(DETAIL);
    let job_file = fx.state.join("job.json");
    let file_path = fx.base.join("Show_E01.mp4");
    let script = format!(
        "read job; printf '%s' \"$job\" > '{}'; \
         echo '{{\"type\":\"info\",\"data\":\"hello\"}}'; \
         echo '{{\"type\":\"download_complete\",\"data\":{{\"episodeNumber\":1,\"filePath\":\"{}\",\"taskTitle\":\"Show\"}}}}'; \
         echo '{{\"type\":\"download_error\",\"data\":{{\"episodeNumber\":2,\"taskTitle\":\"Show\"}}}}'",
        job_file.display(),
        file_path.display()
    );
    let sup = supervisor(&fx, &script).await;
    sup.db().save_task(&task()).await.unwrap();

    let outcomes = sup.run_due_tasks().await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0].1, LaunchOutcome::Launched { episodes: 2, .. }), "{:?}", outcomes);

    wait_idle(&sup, Duration::from_secs(10)).await;
    assert!(!sup.markers().is_held("t1"));

    let job: WorkerJob = serde_json::from_str(&std::fs::read_to_string(&job_file).unwrap()).unwrap();
    assert_eq!(job.task_id, "t1");
    assert_eq!(job.download_dir, fx.base);
    let numbers: Vec<u32> = job.episodes.iter().map(|e| e.episode_number).collect();
    assert_eq!(numbers, vec![1, 2]);

    let cached = sup.db().list_cached(Some("t1")).await.unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].unique_key, "t1_1");
    assert_eq!(cached[0].episode_path, "Show_E01.mp4");
    assert_eq!(cached[0].year, "2024");
    assert_eq!(cached[0].category, "drama");
    let stored = sup.db().get_task("t1").await.unwrap().unwrap();
    assert_eq!(stored.start_episode, 2);
    assert!(stored.enabled);
}

#[tokio::test]
async fn relative_download_path_reaches_worker_as_absolute() {
    let fx = fixture(DETAIL);
    let rel = tempfile::Builder::new().prefix("epcache-rel").tempdir_in(".").unwrap();
    let relative_base = rel.path().join("media");
    assert!(relative_base.is_relative());

    let job_file = fx.state.join("job.json");
    let script = format!("read job; printf '%s' \"$job\" > '{}'", job_file.display());
    let db = TaskDb::open_at(fx.state.join("epcache.db")).await.unwrap();
    let cfg = EpcacheConfig {
        download_path: relative_base.clone(),
        detail_url: format!("{}?source={{source}}&id={{id}}", fx.server.url("/detail")),
        ..EpcacheConfig::default()
    };
    let worker = WorkerCommand::new("sh", vec!["-c".to_string(), script]);
    let sup = Supervisor::new(db, &cfg, &fx.state, worker);
    sup.db().save_task(&task()).await.unwrap();

    let outcome = sup.execute_task("t1").await.unwrap();
    assert!(matches!(outcome, LaunchOutcome::Launched { .. }), "{:?}", outcome);
    wait_idle(&sup, Duration::from_secs(10)).await;

    let job: WorkerJob = serde_json::from_str(&std::fs::read_to_string(&job_file).unwrap()).unwrap();
    assert!(job.download_dir.is_absolute(), "{}", job.download_dir.display());
    assert!(job.download_dir.starts_with(std::env::current_dir().unwrap()));
    assert!(job.download_dir.ends_with("media"));
}

#[tokio::test]
async fn cached_episodes_are_not_sent_again() {
    let fx = fixture(DETAIL);
    let job_file = fx.state.join("job.json");
    let script = format!("read job; printf '%s' \"$job\" > '{}'", job_file.display());
    let sup = supervisor(&fx, &script).await;
    sup.db().save_task(&task()).await.unwrap();
    let done = epcache_core::store::CachedEpisode {
        unique_key: "t1_1".into(),
        task_id: "t1".into(),
        episode_number: 1,
        episode_path: "Show_E01.mp4".into(),
        title: "Show".into(),
        poster: String::new(),
        year: String::new(),
        description: String::new(),
        category: String::new(),
        type_name: String::new(),
        total_episodes: 2,
        origin_source: String::new(),
        origin_id: String::new(),
        downloaded_at: 1,
    };
    sup.db().save_cached(&done).await.unwrap();

    let outcome = sup.execute_task("t1").await.unwrap();
    assert!(matches!(outcome, LaunchOutcome::Launched { episodes: 1, .. }), "{:?}", outcome);
    wait_idle(&sup, Duration::from_secs(10)).await;
    let job: WorkerJob = serde_json::from_str(&std::fs::read_to_string(&job_file).unwrap()).unwrap();
    assert_eq!(job.episodes.len(), 1);
    assert_eq!(job.episodes[0].episode_number, 2);
}

#[tokio::test]
async fn nothing_pending_reschedules_without_spawning() {
    let fx = fixture(r#"{"id": "42", "episodes": []}"#);
    let sup = supervisor(&fx, "exit 3").await;
    sup.db().save_task(&task()).await.unwrap();

    let outcome = sup.execute_task("t1").await.unwrap();
    let LaunchOutcome::NothingPending { next_run } = outcome else {
        panic!("unexpected {:?}", outcome);
    };
    assert!(sup.running_task_ids().is_empty());
    assert!(!sup.markers().is_held("t1"));
    let stored = sup.db().get_task("t1").await.unwrap().unwrap();
    assert_eq!(stored.next_run, Some(next_run));
    assert!(sup.run_due_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn second_launch_while_running_is_skipped() {
    let fx = fixture(DETAIL);
    let sup = supervisor(&fx, "read job; while read line; do [ \"$line\" = terminate ] && exit 0; done").await;
    sup.db().save_task(&task()).await.unwrap();

    assert!(matches!(sup.execute_task("t1").await.unwrap(), LaunchOutcome::Launched { .. }));
    assert_eq!(sup.execute_task("t1").await.unwrap(), LaunchOutcome::AlreadyRunning);
    assert_eq!(sup.running_task_ids(), vec!["t1".to_string()]);

    assert!(sup.stop_task("t1"));
    wait_idle(&sup, Duration::from_secs(10)).await;
    assert!(!sup.markers().is_held("t1"));
}

#[tokio::test]
async fn worker_ignoring_terminate_is_killed_after_grace() {
    let fx = fixture(DETAIL);
    let sup = supervisor(&fx, "read job; exec sleep 30").await;
    sup.db().save_task(&task()).await.unwrap();

    let LaunchOutcome::Launched { pid, .. } = sup.execute_task("t1").await.unwrap() else {
        panic!("not launched");
    };
    assert!(pid.is_some());
    assert_eq!(sup.markers().read("t1").unwrap().worker_pid, pid);

    let started = Instant::now();
    assert!(sup.stop_task("t1"));
    wait_idle(&sup, Duration::from_secs(10)).await;
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert!(!Path::new(&sup.markers().path_for("t1")).exists());
}

#[tokio::test]
async fn missing_worker_binary_is_a_launch_error() {
    let fx = fixture(DETAIL);
    let db = TaskDb::open_at(fx.state.join("epcache.db")).await.unwrap();
    let cfg = EpcacheConfig {
        download_path: fx.base.clone(),
        detail_url: format!("{}?source={{source}}&id={{id}}", fx.server.url("/detail")),
        ..EpcacheConfig::default()
    };
    let sup = Supervisor::new(db, &cfg, &fx.state, WorkerCommand::new("/nonexistent/epcache-worker", vec![]));
    sup.db().save_task(&task()).await.unwrap();

    let err = sup.execute_task("t1").await.unwrap_err();
    assert!(matches!(err, epcache_core::error::LaunchError::ProcessLaunch(_)), "{:?}", err);
    assert!(sup.running_task_ids().is_empty());
    assert!(!sup.markers().is_held("t1"));
}
