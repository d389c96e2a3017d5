use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use aaflow_core::error::AaflowError;
use aaflow_core::types::{NodeResult, FLOW_COMPLETED};
use aaflow_engine::{BuildEnv, FlowDefinition, Runner};
use aaflow_store::SqliteContextStore;

const ONBOARDING: &str = r#"
id = "onboarding"
start = "route"

[[nodes]]
id = "route"
type = "decision"
otherwise = "standard"
rules = [{ when = 'plan == "enterprise"', action = "priority" }]

[[nodes]]
id = "priority"
type = "set"
values = { owner = "account-team", welcome = "Welcome aboard, {{company}}" }

[[nodes]]
id = "standard"
type = "set"
values = { owner = "self-serve" }

[[nodes]]
id = "visits"
type = "set"
values = { visited = true }

[[transitions]]
from = "route"
action = "priority"
to = "priority"

[[transitions]]
from = "route"
action = "standard"
to = "standard"

[[transitions]]
from = "priority"
to = "visits"

[context.data]
company = "Initech"
plan = "enterprise"
"#;

fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create temp file");
    tmp.write_all(content.as_bytes()).expect("write flow");
    tmp
}

#[tokio::test]
async fn test_toml_flow_file_runs_end_to_end() {
    let file = write_temp(".toml", ONBOARDING);
    let definition = FlowDefinition::load(file.path()).expect("load flow");
    let flow = definition.build(&BuildEnv::new()).expect("build flow");
    let mut ctx = definition.initial_context();

    let result = Runner::new().run_flow(&flow, &mut ctx, None).await.unwrap();

    assert_eq!(result, NodeResult::success(FLOW_COMPLETED));
    assert_eq!(ctx.get_str("owner"), Some("account-team"));
    assert_eq!(ctx.get_str("welcome"), Some("Welcome aboard, Initech"));
    assert_eq!(ctx.get("visited"), Some(&json!(true)));
}

#[tokio::test]
async fn test_json_flow_file_with_persisted_context() {
    let file = write_temp(
        ".json",
        r#"{
            "id": "tally",
            "start": "bump",
            "nodes": [
                { "id": "bump", "type": "set", "values": { "last": "{{current}}", "current": "run" } }
            ],
            "context": { "data": { "current": "first" } }
        }"#,
    );
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteContextStore::open(&dir.path().join("ctx.db")).unwrap());
    let runner = Runner::with_retries(0, Duration::ZERO).with_store(store);

    let definition = FlowDefinition::load(file.path()).unwrap();
    let flow = definition.build(&BuildEnv::new()).unwrap();

    let mut ctx = definition.initial_context();
    runner.run_flow(&flow, &mut ctx, Some("tally")).await.unwrap();
    assert_eq!(ctx.get_str("last"), Some("first"));

    let mut fresh = definition.initial_context();
    runner.run_flow(&flow, &mut fresh, Some("tally")).await.unwrap();
    assert_eq!(fresh.get_str("last"), Some("run"));
}

#[test]
fn test_parse_error_names_the_file() {
    let file = write_temp(".toml", "id = \"oops\"\n[[nodes]]\nid = 3\n");
    let err = FlowDefinition::load(file.path()).unwrap_err();

    assert!(matches!(err, AaflowError::FlowDefinition(_)));
    assert!(err.to_string().contains(&file.path().display().to_string()));
}

#[test]
fn test_missing_flow_file_is_io_error() {
    let err = FlowDefinition::load(std::path::Path::new("/nonexistent/flow.toml")).unwrap_err();
    assert!(matches!(err, AaflowError::Io(_)));
}

#[test]
fn test_describe_lists_node_types() {
    let definition = FlowDefinition::from_toml_str(ONBOARDING).unwrap();
    let flow = definition.build(&BuildEnv::new()).unwrap();
    let description = serde_json::to_value(flow.describe()).unwrap();

    assert_eq!(description["start"], "route");
    assert_eq!(description["nodes"][0], json!({ "id": "priority", "type": "action" }));
    assert_eq!(description["transitions"]["route"]["priority"], "priority");
    assert_eq!(description["transitions"]["priority"]["default"], "visits");
}
