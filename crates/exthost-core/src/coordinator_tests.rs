use super::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use exthost_mcp::{McpRequest, McpResponse, Transport, TransportError};
use exthost_protocols::{HookSpec, McpServerSpec};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::connection::Connector;

#[derive(Clone)]
enum Behavior {
    Ready(Vec<&'static str>),
    Refuse,
    Gated(Arc<Notify>, Vec<&'static str>),
    /// Tool calls never answer, and closing waits for the pending call the
    /// way a serialized pipe does.
    Stuck(Vec<&'static str>),
}

struct FakeTransport {
    tools: Vec<&'static str>,
    closed: Arc<AtomicBool>,
    stuck: Option<Arc<Notify>>,
    busy: tokio::sync::Mutex<()>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: McpRequest) -> Result<McpResponse, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if let (Some(started), "tools/call") = (&self.stuck, request.method.as_str()) {
            let _busy = self.busy.lock().await;
            started.notify_one();
            std::future::pending::<()>().await;
        }
        let result = match request.method.as_str() {
            "tools/list" => serde_json::json!({
                "tools": self.tools.iter().map(|t| serde_json::json!({"name": t})).collect::<Vec<_>>()
            }),
            "tools/call" => serde_json::json!({"content": [{"type": "text", "text": "ok"}]}),
            _ => serde_json::json!({}),
        };
        Ok(McpResponse::success(request.id, result))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let _busy = self.busy.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FakeConnector {
    behaviors: Mutex<HashMap<String, Behavior>>,
    opened: Mutex<Vec<(String, Arc<AtomicBool>)>>,
    /// Signalled when a `Stuck` server starts a tool call.
    call_started: Arc<Notify>,
}

impl FakeConnector {
    fn set(&self, server: &str, behavior: Behavior) {
        self.behaviors.lock().insert(server.to_string(), behavior);
    }

    /// Closed flag of every transport opened for `server`, oldest first.
    fn closed_flags(&self, server: &str) -> Vec<bool> {
        self.opened
            .lock()
            .iter()
            .filter(|(s, _)| s == server)
            .map(|(_, flag)| flag.load(Ordering::SeqCst))
            .collect()
    }

    fn open(&self, server: &str, tools: Vec<&'static str>, stuck: bool) -> Arc<dyn Transport> {
        let closed = Arc::new(AtomicBool::new(false));
        self.opened.lock().push((server.to_string(), closed.clone()));
        Arc::new(FakeTransport {
            tools,
            closed,
            stuck: stuck.then(|| self.call_started.clone()),
            busy: tokio::sync::Mutex::new(()),
        })
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, spec: &McpServerSpec) -> Result<Arc<dyn Transport>, TransportError> {
        let behavior = self
            .behaviors
            .lock()
            .get(&spec.name)
            .cloned()
            .unwrap_or(Behavior::Refuse);
        match behavior {
            Behavior::Ready(tools) => Ok(self.open(&spec.name, tools, false)),
            Behavior::Refuse => Err(TransportError::Http("connection refused".to_string())),
            Behavior::Gated(gate, tools) => {
                gate.notified().await;
                Ok(self.open(&spec.name, tools, false))
            }
            Behavior::Stuck(tools) => Ok(self.open(&spec.name, tools, true)),
        }
    }
}

#[derive(Default)]
struct FakeSource {
    manifests: Mutex<HashMap<String, ExtensionManifest>>,
}

impl FakeSource {
    fn publish(&self, manifest: ExtensionManifest) {
        self.manifests.lock().insert(SOURCE.to_string(), manifest);
    }
}

#[async_trait]
impl ManifestSource for FakeSource {
    async fn fetch(&self, source: &ExtensionSource) -> Result<ExtensionManifest, ExtensionError> {
        self.manifests
            .lock()
            .get(&source.to_string())
            .cloned()
            .ok_or_else(|| ExtensionError::Source(format!("nothing at {}", source)))
    }
}

const SOURCE: &str = "/exts/ext";

struct Harness {
    store: Arc<RecordStore>,
    connections: Arc<ConnectionManager>,
    hooks: Arc<HookBindingTable>,
    tracker: Arc<TransactionTracker>,
    status: Arc<StatusPublisher>,
    connector: Arc<FakeConnector>,
    source: Arc<FakeSource>,
}

impl Harness {
    fn new() -> Self {
        let connector = Arc::new(FakeConnector::default());
        let store = Arc::new(RecordStore::in_memory());
        let connections = Arc::new(ConnectionManager::new(
            connector.clone(),
            Duration::from_secs(5),
        ));
        let hooks = Arc::new(HookBindingTable::new());
        let tracker = Arc::new(TransactionTracker::new());
        let status = Arc::new(StatusPublisher::new(
            store.clone(),
            connections.clone(),
            hooks.clone(),
            tracker.clone(),
        ));
        Self {
            store,
            connections,
            hooks,
            tracker,
            status,
            connector,
            source: Arc::new(FakeSource::default()),
        }
    }

    fn coordinator(&self) -> ReloadCoordinator {
        ReloadCoordinator::new(
            self.store.clone(),
            self.connections.clone(),
            self.hooks.clone(),
            self.source.clone(),
            self.tracker.clone(),
            self.status.clone(),
        )
    }

    async fn installed(&self, manifest: ExtensionManifest) -> ReloadCoordinator {
        self.source.publish(manifest);
        let coordinator = self.coordinator();
        coordinator
            .install(ExtensionSource::parse(SOURCE))
            .await
            .unwrap();
        coordinator
    }

    fn active_tools(&self) -> Vec<(String, String)> {
        self.connections
            .resolve_active("ext")
            .map(|set| set.tool_names())
            .unwrap_or_default()
    }
}

fn manifest(version: &str) -> ExtensionManifest {
    ExtensionManifest::new("ext", semver::Version::parse(version).unwrap())
}

fn server(name: &str) -> McpServerSpec {
    McpServerSpec::http(name, format!("http://localhost:1/{}", name))
}

fn tool(server: &str, name: &str) -> (String, String) {
    (server.to_string(), name.to_string())
}

#[tokio::test]
async fn test_install_commits_generation_one() {
    let h = Harness::new();
    h.connector.set("srv", Behavior::Ready(vec!["hello"]));
    h.source.publish(
        manifest("0.0.1")
            .with_server(server("srv"))
            .with_hook(HookSpec::new("BeforeAgent", "echo hi")),
    );

    let outcome = h
        .coordinator()
        .install(ExtensionSource::parse(SOURCE))
        .await
        .unwrap();

    match outcome {
        ReloadOutcome::Committed {
            from_version,
            to_version,
            generation,
            ref warnings,
            ..
        } => {
            assert_eq!(from_version, None);
            assert_eq!(to_version, "0.0.1");
            assert_eq!(generation, 1);
            assert!(warnings.is_empty());
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let record = h.store.get("ext").unwrap();
    assert_eq!(record.generation, 1);
    assert_eq!(h.active_tools(), vec![tool("srv", "hello")]);
    assert_eq!(h.hooks.active_generation("ext"), Some(1));
    assert!(!h.tracker.is_in_flight("ext"));
    assert_eq!(
        h.status.latest_notice("ext").unwrap().message,
        "installed 0.0.1"
    );
}

#[tokio::test]
async fn test_install_twice_is_rejected() {
    let h = Harness::new();
    h.connector.set("srv", Behavior::Ready(vec!["hello"]));
    let coordinator = h.installed(manifest("0.0.1").with_server(server("srv"))).await;

    let err = coordinator
        .install(ExtensionSource::parse(SOURCE))
        .await
        .unwrap_err();
    assert!(matches!(err, ExtensionError::AlreadyInstalled(ref n) if n == "ext"));
    assert_eq!(h.store.get("ext").unwrap().generation, 1);
}

#[tokio::test]
async fn test_update_swaps_to_next_generation() {
    let h = Harness::new();
    h.connector.set("srv", Behavior::Ready(vec!["hello"]));
    let coordinator = h.installed(manifest("0.0.1").with_server(server("srv"))).await;

    h.connector.set("srv", Behavior::Ready(vec!["goodbye"]));
    let candidate = manifest("0.0.2").with_server(server("srv"));
    h.source.publish(candidate.clone());

    let outcome = coordinator.update("ext").await.unwrap();
    assert!(outcome.is_committed());
    assert_eq!(outcome.to_string(), "ext: updated 0.0.1 → 0.0.2");

    let record = h.store.get("ext").unwrap();
    assert_eq!(record.generation, 2);
    assert_eq!(*record.manifest, candidate);
    assert_eq!(h.active_tools(), vec![tool("srv", "goodbye")]);

    // The first generation's connection is closed, the second is live.
    assert_eq!(h.connector.closed_flags("srv"), vec![true, false]);
    assert_eq!(
        h.status.latest_notice("ext").unwrap().message,
        "successfully updated: 0.0.1 → 0.0.2"
    );
}

#[tokio::test]
async fn test_update_without_change_is_up_to_date() {
    let h = Harness::new();
    h.connector.set("srv", Behavior::Ready(vec!["hello"]));
    let coordinator = h.installed(manifest("0.0.1").with_server(server("srv"))).await;

    let outcome = coordinator.update("ext").await.unwrap();
    assert!(matches!(outcome, ReloadOutcome::UpToDate { ref version, .. } if version == "0.0.1"));
    assert_eq!(h.store.get("ext").unwrap().generation, 1);
    assert_eq!(h.connector.closed_flags("srv"), vec![false]);
}

#[tokio::test]
async fn test_older_candidate_is_not_applied() {
    let h = Harness::new();
    h.connector.set("srv", Behavior::Ready(vec!["hello"]));
    let coordinator = h.installed(manifest("1.0.0").with_server(server("srv"))).await;

    h.source.publish(manifest("0.9.0").with_server(server("srv")));
    let outcome = coordinator.update("ext").await.unwrap();
    assert!(matches!(outcome, ReloadOutcome::UpToDate { .. }));
    assert_eq!(h.store.get("ext").unwrap().installed_version, "1.0.0");
}

#[tokio::test]
async fn test_total_failure_rolls_back() {
    let h = Harness::new();
    h.connector.set("srv", Behavior::Ready(vec!["hello"]));
    let coordinator = h
        .installed(
            manifest("0.0.1")
                .with_server(server("srv"))
                .with_hook(HookSpec::new("BeforeAgent", "echo one")),
        )
        .await;

    h.connector.set("srv", Behavior::Refuse);
    h.source.publish(
        manifest("0.0.2")
            .with_server(server("srv"))
            .with_hook(HookSpec::new("BeforeAgent", "echo two")),
    );

    let err = coordinator.update("ext").await.unwrap_err();
    match err {
        ExtensionError::ActivationFailed { ref failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].starts_with("srv: "));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let record = h.store.get("ext").unwrap();
    assert_eq!(record.generation, 1);
    assert_eq!(record.installed_version, "0.0.1");
    assert_eq!(h.active_tools(), vec![tool("srv", "hello")]);
    assert_eq!(h.connector.closed_flags("srv"), vec![false]);

    let hooks = h.hooks.lookup("BeforeAgent");
    assert_eq!(hooks.len(), 1);
    assert_eq!(hooks[0].command(), "echo one");
    assert!(!h.tracker.is_in_flight("ext"));
    assert!(h.status.latest_notice("ext").unwrap().message.contains("rolled back"));
}

#[tokio::test]
async fn test_partial_activation_commits_with_warning() {
    let h = Harness::new();
    h.connector.set("a", Behavior::Ready(vec!["one"]));
    let coordinator = h.installed(manifest("0.0.1").with_server(server("a"))).await;

    h.connector.set("b", Behavior::Refuse);
    h.source
        .publish(manifest("0.0.2").with_server(server("a")).with_server(server("b")));

    let outcome = coordinator.update("ext").await.unwrap();
    let ReloadOutcome::Committed { warnings, report, .. } = outcome else {
        panic!("expected commit");
    };
    assert_eq!(
        warnings,
        vec![ExtensionWarning::PartialActivation {
            failed: vec!["b".to_string()]
        }]
    );
    assert_eq!(report.ready_count(), 1);
    assert_eq!(h.store.get("ext").unwrap().warnings, warnings);

    let snapshot = h.status.snapshot();
    assert!(snapshot.connection("ext", "a").unwrap().state == crate::connection::ConnectionState::Ready);
    assert!(matches!(
        snapshot.connection("ext", "b").unwrap().state,
        crate::connection::ConnectionState::Error(_)
    ));
}

#[tokio::test]
async fn test_all_ready_policy_rejects_partial() {
    let h = Harness::new();
    h.connector.set("a", Behavior::Ready(vec!["one"]));
    h.installed(manifest("0.0.1").with_server(server("a"))).await;
    let coordinator = h.coordinator().with_policy(PartialActivationPolicy::AllReady);

    h.connector.set("b", Behavior::Refuse);
    h.source
        .publish(manifest("0.0.2").with_server(server("a")).with_server(server("b")));

    let err = coordinator.update("ext").await.unwrap_err();
    assert!(matches!(err, ExtensionError::ActivationFailed { .. }));
    assert_eq!(h.store.get("ext").unwrap().generation, 1);
    // The staged connection to `a` was closed, the active one was not.
    assert_eq!(h.connector.closed_flags("a"), vec![false, true]);
}

#[tokio::test]
async fn test_concurrent_update_is_rejected() {
    let h = Harness::new();
    h.connector.set("srv", Behavior::Ready(vec!["hello"]));
    h.installed(manifest("0.0.1").with_server(server("srv"))).await;

    let gate = Arc::new(Notify::new());
    h.connector
        .set("srv", Behavior::Gated(gate.clone(), vec!["goodbye"]));
    h.source.publish(manifest("0.0.2").with_server(server("srv")));

    let coordinator = Arc::new(h.coordinator());
    let first = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.update("ext").await })
    };

    let snapshot = h
        .status
        .wait_for(|s| s.is_in_flight("ext"), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(snapshot.extension("ext").unwrap().status, ExtensionStatus::Reloading);

    let second = coordinator.update("ext").await.unwrap_err();
    assert!(matches!(second, ExtensionError::AlreadyInProgress(ref n) if n == "ext"));

    gate.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert!(outcome.is_committed());
    assert_eq!(h.store.get("ext").unwrap().generation, 2);
}

#[tokio::test]
async fn test_hot_reload_disabled_persists_only() {
    let h = Harness::new();
    h.connector.set("srv", Behavior::Ready(vec!["hello"]));
    h.installed(manifest("0.0.1").with_server(server("srv"))).await;
    let coordinator = h.coordinator().with_hot_reload(false);

    h.source.publish(manifest("0.0.2").with_server(server("srv")));
    let outcome = coordinator.update("ext").await.unwrap();
    assert!(matches!(
        outcome,
        ReloadOutcome::RestartRequired { ref to_version, .. } if to_version == "0.0.2"
    ));

    // The running generation is untouched.
    assert_eq!(h.store.get("ext").unwrap().generation, 1);
    assert_eq!(h.active_tools(), vec![tool("srv", "hello")]);
    assert_eq!(h.connector.closed_flags("srv"), vec![false]);
}

#[tokio::test]
async fn test_invalid_hook_matcher_is_rejected() {
    let h = Harness::new();
    h.connector.set("srv", Behavior::Ready(vec!["hello"]));
    let coordinator = h.installed(manifest("0.0.1").with_server(server("srv"))).await;

    let candidate = manifest("0.0.2")
        .with_server(server("srv"))
        .with_hook(HookSpec::new("BeforeTool", "true").with_matcher("(unclosed"));
    let err = coordinator.reload("ext", candidate).await.unwrap_err();
    assert!(matches!(err, ExtensionError::InvalidManifest { .. }));
    assert_eq!(h.store.get("ext").unwrap().generation, 1);
    assert_eq!(h.connector.closed_flags("srv"), vec![false]);
}

#[tokio::test]
async fn test_reload_rejects_other_extension_manifest() {
    let h = Harness::new();
    h.connector.set("srv", Behavior::Ready(vec!["hello"]));
    let coordinator = h.installed(manifest("0.0.1").with_server(server("srv"))).await;

    let other = ExtensionManifest::new("other", semver::Version::new(9, 0, 0));
    let err = coordinator.reload("ext", other).await.unwrap_err();
    assert!(matches!(
        err,
        ExtensionError::InvalidManifest {
            source: ManifestError::NameMismatch { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn test_update_unknown_extension() {
    let h = Harness::new();
    let err = h.coordinator().update("missing").await.unwrap_err();
    assert!(matches!(err, ExtensionError::NotFound(_)));
    assert!(!h.tracker.is_in_flight("missing"));
}

#[tokio::test]
async fn test_uninstall_releases_everything() {
    let h = Harness::new();
    h.connector.set("srv", Behavior::Ready(vec!["hello"]));
    let coordinator = h
        .installed(
            manifest("0.0.1")
                .with_server(server("srv"))
                .with_hook(HookSpec::new("BeforeAgent", "echo hi")),
        )
        .await;

    let removed = coordinator.uninstall("ext").await.unwrap();
    assert_eq!(removed.generation, 1);
    assert!(!h.store.contains("ext"));
    assert!(h.connections.resolve_active("ext").is_none());
    assert!(h.hooks.lookup("BeforeAgent").is_empty());
    assert_eq!(h.connector.closed_flags("srv"), vec![true]);

    let err = coordinator.uninstall("ext").await.unwrap_err();
    assert!(matches!(err, ExtensionError::NotFound(_)));
}

#[tokio::test]
async fn test_update_all_is_independent() {
    let h = Harness::new();
    h.connector.set("srv", Behavior::Ready(vec!["hello"]));
    let coordinator = h.installed(manifest("0.0.1").with_server(server("srv"))).await;
    h.source.publish(manifest("0.0.2").with_server(server("srv")));

    let results = coordinator.update_all().await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "ext");
    assert!(results[0].1.as_ref().unwrap().is_committed());
}

#[tokio::test]
async fn test_restore_flags_source_drift() {
    let h = Harness::new();
    h.connector.set("srv", Behavior::Ready(vec!["hello"]));
    let persisted = ExtensionRecord::new(
        manifest("0.0.1").with_server(server("srv")),
        ExtensionSource::parse(SOURCE),
        0,
    );
    h.store.upsert(persisted).await.unwrap();
    h.source.publish(manifest("0.0.2").with_server(server("srv")));

    let reports = h.coordinator().restore().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].ready_count(), 1);

    let snapshot = h.status.snapshot();
    let record = snapshot.extension("ext").unwrap();
    assert_eq!(record.installed_version, "0.0.1");
    assert_eq!(record.status, ExtensionStatus::Active);
    assert!(record.update_available);
    assert_eq!(
        record.warnings,
        vec![ExtensionWarning::SourceDrift {
            source_version: "0.0.2".to_string()
        }]
    );
    assert_eq!(h.active_tools(), vec![tool("srv", "hello")]);
}

#[tokio::test]
async fn test_restore_with_every_server_down_marks_failed() {
    let h = Harness::new();
    let persisted = ExtensionRecord::new(
        manifest("0.0.1").with_server(server("srv")),
        ExtensionSource::parse(SOURCE),
        0,
    );
    h.store.upsert(persisted).await.unwrap();
    h.source.publish(manifest("0.0.1").with_server(server("srv")));

    h.coordinator().restore().await;

    let record = h.store.get("ext").unwrap();
    assert_eq!(record.status, ExtensionStatus::Failed);
    assert!(!h.status.snapshot().extension("ext").unwrap().update_available);
    assert!(h.status.latest_notice("ext").unwrap().message.starts_with("failed to start"));
}

#[tokio::test]
async fn test_old_generation_serves_while_new_one_connects() {
    let h = Harness::new();
    h.connector.set("srv", Behavior::Ready(vec!["hello"]));
    h.installed(
        manifest("0.0.1")
            .with_server(server("srv"))
            .with_hook(HookSpec::new("BeforeAgent", "echo one")),
    )
    .await;

    let gate = Arc::new(Notify::new());
    h.connector
        .set("srv", Behavior::Gated(gate.clone(), vec!["goodbye"]));
    h.source.publish(
        manifest("0.0.2")
            .with_server(server("srv"))
            .with_hook(HookSpec::new("BeforeAgent", "echo two")),
    );

    let coordinator = Arc::new(h.coordinator());
    let update = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.update("ext").await })
    };
    h.status
        .wait_for(
            |s| s.in_flight.iter().any(|t| t.phase == ReloadPhase::Connecting),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    // Generation 1 keeps answering while generation 2 is gated.
    let result = h
        .connections
        .call_tool("ext", "srv", "hello", serde_json::json!({}))
        .await;
    assert!(result.is_ok());
    assert_eq!(h.active_tools(), vec![tool("srv", "hello")]);
    assert_eq!(h.hooks.lookup("BeforeAgent")[0].command(), "echo one");

    gate.notify_one();
    assert!(update.await.unwrap().unwrap().is_committed());
    assert_eq!(h.active_tools(), vec![tool("srv", "goodbye")]);
    assert_eq!(h.hooks.lookup("BeforeAgent")[0].command(), "echo two");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readers_never_see_mixed_generations() {
    let h = Harness::new();
    h.connector.set("a", Behavior::Ready(vec!["one"]));
    h.connector.set("b", Behavior::Ready(vec!["two"]));
    let versioned = |version: &str| {
        manifest(version)
            .with_server(server("a"))
            .with_server(server("b"))
            .with_hook(HookSpec::new("BeforeAgent", format!("echo {}", version)))
    };
    let coordinator = h.installed(versioned("0.0.1")).await;

    let stop = Arc::new(AtomicBool::new(false));
    let reader = {
        let stop = stop.clone();
        let status = h.status.clone();
        let connections = h.connections.clone();
        let hooks = h.hooks.clone();
        tokio::spawn(async move {
            let mut observed = 0usize;
            while !stop.load(Ordering::SeqCst) {
                let snapshot = status.snapshot();
                let generation = snapshot.extension("ext").unwrap().generation;
                for server in ["a", "b"] {
                    assert_eq!(snapshot.connection("ext", server).unwrap().generation, generation);
                }
                assert!(snapshot.hooks_for("ext").all(|hook| hook.generation == generation));

                let set = connections.resolve_active("ext").unwrap();
                assert!(set.iter().all(|conn| conn.generation() == set.generation()));
                let bindings = hooks.lookup("BeforeAgent");
                assert_eq!(bindings.len(), 1);

                observed += 1;
                tokio::task::yield_now().await;
            }
            observed
        })
    };

    for version in ["0.0.2", "0.0.3", "0.0.4"] {
        h.source.publish(versioned(version));
        assert!(coordinator.update("ext").await.unwrap().is_committed());
    }
    stop.store(true, Ordering::SeqCst);

    assert!(reader.await.unwrap() > 0);
    assert_eq!(h.store.get("ext").unwrap().generation, 4);
}

#[tokio::test]
async fn test_stuck_call_does_not_wedge_update() {
    let h = Harness::new();
    h.connector.set("srv", Behavior::Stuck(vec!["hello"]));
    h.installed(manifest("0.0.1").with_server(server("srv"))).await;
    let coordinator = h.coordinator().with_drain_timeout(Duration::from_millis(100));

    let stuck_call = {
        let connections = h.connections.clone();
        tokio::spawn(async move {
            connections
                .call_tool("ext", "srv", "hello", serde_json::json!({}))
                .await
        })
    };
    h.connector.call_started.notified().await;

    h.connector.set("srv", Behavior::Ready(vec!["goodbye"]));
    h.source.publish(manifest("0.0.2").with_server(server("srv")));
    let outcome = tokio::time::timeout(Duration::from_secs(5), coordinator.update("ext"))
        .await
        .expect("update must finish while an old call hangs")
        .unwrap();
    assert!(outcome.is_committed());

    assert!(!h.tracker.is_in_flight("ext"));
    let snapshot = h.status.snapshot();
    assert_eq!(snapshot.extension("ext").unwrap().status, ExtensionStatus::Active);
    assert_eq!(snapshot.extension("ext").unwrap().installed_version, "0.0.2");
    assert_eq!(
        h.status.latest_notice("ext").unwrap().message,
        "successfully updated: 0.0.1 → 0.0.2"
    );

    // The name is free again.
    let again = coordinator.update("ext").await.unwrap();
    assert!(matches!(again, ReloadOutcome::UpToDate { .. }));
    stuck_call.abort();
}

#[tokio::test]
async fn test_cancelled_update_discards_staged_generation() {
    let h = Harness::new();
    h.connector.set("srv", Behavior::Ready(vec!["hello"]));
    h.installed(
        manifest("0.0.1")
            .with_server(server("srv"))
            .with_hook(HookSpec::new("BeforeAgent", "echo one")),
    )
    .await;

    let gate = Arc::new(Notify::new());
    h.connector
        .set("srv", Behavior::Gated(gate.clone(), vec!["goodbye"]));
    h.source.publish(
        manifest("0.0.2")
            .with_server(server("srv"))
            .with_hook(HookSpec::new("BeforeAgent", "echo two")),
    );

    let coordinator = Arc::new(h.coordinator());
    let update = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.update("ext").await })
    };
    h.status
        .wait_for(
            |s| s.in_flight.iter().any(|t| t.phase == ReloadPhase::Connecting),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    update.abort();
    assert!(update.await.unwrap_err().is_cancelled());

    // Nothing of generation 2 is left staged, and generation 1 still serves.
    assert!(!h.tracker.is_in_flight("ext"));
    assert!(!h.hooks.promote("ext", 2));
    assert!(h.connections.discard_staged("ext", 2).is_none());
    assert_eq!(h.hooks.lookup("BeforeAgent")[0].command(), "echo one");
    assert_eq!(h.active_tools(), vec![tool("srv", "hello")]);

    h.connector.set("srv", Behavior::Ready(vec!["goodbye"]));
    let outcome = coordinator.update("ext").await.unwrap();
    assert!(outcome.is_committed());
    assert_eq!(h.hooks.lookup("BeforeAgent")[0].command(), "echo two");
}

#[tokio::test]
async fn test_unpublished_stage_is_discarded_on_drop() {
    let h = Harness::new();
    h.connector.set("srv", Behavior::Ready(vec!["hello"]));
    h.hooks
        .bind("ext", 2, 0, &[HookSpec::new("BeforeAgent", "echo two")])
        .unwrap();
    h.connections.activate("ext", 2, &[server("srv")]).await;

    drop(StagedGeneration {
        connections: &h.connections,
        hooks: &h.hooks,
        name: "ext".to_string(),
        generation: 2,
        published: false,
    });

    assert!(!h.hooks.promote("ext", 2));
    assert!(h.connections.discard_staged("ext", 2).is_none());

    // The withdrawn set is closed on the runtime.
    for _ in 0..50 {
        if h.connector.closed_flags("srv") == vec![true] {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.connector.closed_flags("srv"), vec![true]);
}
