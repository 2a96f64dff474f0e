//! Property tests for the record status machine, the rate gate, and
//! workspace path normalization.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;

use appforge::core::path::workspace_relative;
use appforge::core::rate_limit::RateGate;
use appforge::agents::tools::RUN_COMMAND;
use appforge::core::types::{
    Completion, FileMap, RecordUpdate, TaskRecord, TaskStatus, VerificationReport,
};
use appforge::io::config::AppConfig;
use appforge::io::model::{ModelError, ModelResponse};
use appforge::io::store::{DirTaskStore, MemoryTaskStore, TaskStore};
use appforge::lifecycle::AdmissionRequest;
use appforge::test_support::{
    FakeSandboxProvider, FakeWorkspace, Harness, ManualClock, ScriptedModel, test_config,
    text_response, tool_call,
};

const ROOT: &str = "/home/user";

fn completion(title: &str) -> Completion {
    Completion {
        url: Some("https://3000-sbx.test".to_string()),
        title: title.to_string(),
        summary: Some("done".to_string()),
        files: FileMap::new(),
        verification: VerificationReport {
            verified: true,
            reason: "custom".to_string(),
        },
    }
}

fn arb_update() -> impl Strategy<Value = RecordUpdate> {
    prop_oneof![
        "[a-z ]{1,20}".prop_map(RecordUpdate::Note),
        "[a-z ]{1,20}".prop_map(|title| RecordUpdate::Complete(completion(&title))),
        "[a-z ]{1,20}".prop_map(|message| RecordUpdate::Fail { message }),
    ]
}

/// Apply `updates` through `store` and return every status observed.
fn replay(store: &dyn TaskStore, updates: Vec<RecordUpdate>) -> Vec<TaskStatus> {
    store
        .create(&TaskRecord::pending("rec", "evt", "prompt", Utc::now()))
        .expect("create");
    let mut seen = vec![TaskStatus::Pending];
    for update in updates {
        let before = store.find_by_id("rec").expect("find").expect("record");
        match store.update("rec", update) {
            Ok(after) => {
                assert!(!before.status.is_terminal(), "terminal record accepted an update");
                seen.push(after.status);
            }
            Err(_) => {
                assert!(before.status.is_terminal(), "pending record rejected an update");
                let unchanged = store.find_by_id("rec").expect("find").expect("record");
                assert_eq!(unchanged, before);
            }
        }
    }
    seen
}

fn assert_single_exit(seen: &[TaskStatus]) {
    let mut distinct = seen.to_vec();
    distinct.dedup();
    assert!(distinct.len() <= 2, "{distinct:?}");
    assert_eq!(distinct[0], TaskStatus::Pending);
    if let [from, to] = distinct[..] {
        assert!(from.can_transition_to(to));
    }
}

/// One scripted model turn.
#[derive(Debug, Clone, Copy)]
enum Turn {
    Summary,
    Throttled,
    Malformed,
    Busy,
}

impl Turn {
    fn response(self) -> Result<ModelResponse, ModelError> {
        match self {
            Turn::Summary => text_response("<task_summary>A counter page.</task_summary>"),
            Turn::Throttled => Err(ModelError::Throttled {
                status: 429,
                message: "Rate limit reached".to_string(),
            }),
            Turn::Malformed => Err(ModelError::Malformed {
                detail: "HTTP 502: body is not JSON".to_string(),
                body: "<html>Bad Gateway</html>".to_string(),
            }),
            Turn::Busy => Ok(ModelResponse {
                text: None,
                tool_calls: vec![tool_call(RUN_COMMAND, serde_json::json!({"command": "ls"}))],
            }),
        }
    }
}

fn arb_turn() -> impl Strategy<Value = Turn> {
    prop_oneof![
        Just(Turn::Summary),
        Just(Turn::Throttled),
        Just(Turn::Malformed),
        Just(Turn::Busy),
    ]
}

#[derive(Debug, Clone)]
enum Op {
    /// Admit a fresh task, or re-deliver one with a fixed record id.
    Admit(Option<u8>),
    /// Run (or re-run) one of the admitted records.
    Run(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        prop::option::of(0u8..3).prop_map(Op::Admit),
        (0usize..8).prop_map(Op::Run),
    ]
}

/// Drive the controller through `ops` and return each record's observed statuses.
fn drive(turns: Vec<Turn>, ops: Vec<Op>) -> BTreeMap<String, Vec<TaskStatus>> {
    let mut config: AppConfig = test_config();
    config.rate_limit.max_requests = 1000;
    let harness = Harness::new(
        config,
        ScriptedModel::new(turns.into_iter().map(Turn::response).collect()),
        FakeSandboxProvider::new(Arc::new(FakeWorkspace::new())),
    );
    let mut admitted: Vec<String> = Vec::new();
    let mut seen: BTreeMap<String, Vec<TaskStatus>> = BTreeMap::new();

    for op in ops {
        match op {
            Op::Admit(slot) => {
                let admission = harness
                    .controller
                    .admit(&AdmissionRequest {
                        prompt: "build a counter app".to_string(),
                        record_id: slot.map(|slot| format!("rec-{slot}")),
                        client_id: None,
                    })
                    .expect("admit");
                if !admission.reused {
                    admitted.push(admission.record_id.clone());
                }
            }
            Op::Run(index) => {
                if let Some(id) = admitted.get(index % admitted.len().max(1)) {
                    let outcome = harness.controller.run(id).expect("run");
                    assert_ne!(outcome.record.status, TaskStatus::Pending);
                }
            }
        }
        for id in &admitted {
            let record = harness.store.find_by_id(id).expect("find").expect("record");
            seen.entry(id.clone()).or_default().push(record.status);
        }
    }
    seen
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Admitting, running, and re-running through the controller moves each
    /// record out of `pending` at most once, whatever the model answers.
    #[test]
    fn controller_runs_move_status_once(
        turns in prop::collection::vec(arb_turn(), 0..10),
        ops in prop::collection::vec(arb_op(), 1..16),
    ) {
        for statuses in drive(turns, ops).values() {
            assert_single_exit(statuses);
        }
    }
}

proptest! {
    /// A record leaves `pending` at most once and never returns.
    #[test]
    fn memory_store_status_moves_once(updates in prop::collection::vec(arb_update(), 0..12)) {
        let store = MemoryTaskStore::new();
        assert_single_exit(&replay(&store, updates));
    }

    #[test]
    fn dir_store_status_moves_once(updates in prop::collection::vec(arb_update(), 0..8)) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = DirTaskStore::open(temp.path()).expect("open");
        assert_single_exit(&replay(&store, updates));
    }

    /// Within one window exactly `min(n, max)` requests get through.
    #[test]
    fn gate_admits_at_most_max_per_window(max in 1u32..6, requests in 0usize..20) {
        let clock = Arc::new(ManualClock::default());
        let gate = RateGate::with_clock(clock.clone());
        let window = Duration::from_secs(120);
        let admitted = (0..requests).filter(|_| gate.admit("client", max, window)).count();
        prop_assert_eq!(admitted, requests.min(max as usize));

        clock.advance(window + Duration::from_millis(1));
        prop_assert!(gate.admit("client", max, window));
    }

    /// Normalized paths never escape the workspace.
    #[test]
    fn normalized_paths_stay_inside_root(segments in prop::collection::vec("[a-z.]{1,4}", 1..5)) {
        let input = segments.join("/");
        if let Ok(rel) = workspace_relative(ROOT, &input) {
            prop_assert!(!rel.starts_with('/'));
            prop_assert!(rel.split('/').all(|part| part != ".." && !part.is_empty()));
        }
        let absolute = format!("{ROOT}/{input}");
        if let Ok(rel) = workspace_relative(ROOT, &absolute) {
            prop_assert!(rel.split('/').all(|part| part != ".."));
        }
    }
}
