//! End-to-end conversation flows against a scripted chat model and in-memory
//! stores: no network, no database file.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use opsdesk_agent::llm::{ChatModel, ChatResponse};
use opsdesk_agent::orchestrator::{Caller, Orchestrator, MAX_ROUNDS};
use opsdesk_agent::sandbox::ScriptSandbox;
use opsdesk_agent::workflow::ActionWorkflow;
use opsdesk_agent::ToolGateway;
use opsdesk_core::audit::InMemoryAuditSink;
use opsdesk_core::config::SandboxConfig;
use opsdesk_core::domain::action::PendingStatus;
use opsdesk_core::domain::conversation::{ConversationTurn, Role, ToolCall};
use opsdesk_core::errors::TransportError;
use opsdesk_core::store::Row;
use opsdesk_db::repositories::memory::{
    InMemoryPendingActionStore, InMemoryReadOnlyStore, InMemoryRecordStore,
};

/// Replays a fixed sequence of responses and records every turn window it
/// was handed.
struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ChatResponse, TransportError>>>,
    seen_windows: Mutex<Vec<Vec<ConversationTurn>>>,
}

impl ScriptedModel {
    fn new(responses: Vec<Result<ChatResponse, TransportError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            seen_windows: Mutex::new(Vec::new()),
        }
    }

    fn windows(&self) -> Vec<Vec<ConversationTurn>> {
        self.seen_windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(
        &self,
        turns: &[ConversationTurn],
        _tools: &[Value],
    ) -> Result<ChatResponse, TransportError> {
        self.seen_windows.lock().unwrap().push(turns.to_vec());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(answer("I'm out of scripted responses.")))
    }
}

fn answer(content: &str) -> ChatResponse {
    ChatResponse { content: content.to_string(), tool_calls: Vec::new() }
}

fn tool_round(calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse { content: String::new(), tool_calls: calls }
}

fn caller() -> Caller {
    Caller { name: "marta".to_string(), role: "sales".to_string() }
}

fn sandbox() -> ScriptSandbox {
    ScriptSandbox::new(SandboxConfig {
        timeout_secs: 2,
        max_operations: 1_000_000,
        max_result_bytes: 50 * 1024,
    })
}

struct Harness {
    model: Arc<ScriptedModel>,
    orchestrator: Orchestrator,
    gateway: Arc<ToolGateway>,
    pending: Arc<InMemoryPendingActionStore>,
    records: Arc<InMemoryRecordStore>,
}

fn harness(
    responses: Vec<Result<ChatResponse, TransportError>>,
    read_rows: Vec<Row>,
) -> Harness {
    let model = Arc::new(ScriptedModel::new(responses));
    let pending = Arc::new(InMemoryPendingActionStore::default());
    let records = Arc::new(InMemoryRecordStore::default());
    let gateway = Arc::new(ToolGateway::new(
        Arc::new(InMemoryReadOnlyStore::with_rows(read_rows)),
        Arc::clone(&pending) as _,
        Arc::clone(&records) as _,
        None,
        sandbox(),
    ));
    let orchestrator =
        Orchestrator::new(Arc::clone(&model) as _, Arc::clone(&gateway));
    Harness { model, orchestrator, gateway, pending, records }
}

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs.iter().map(|(key, value)| (key.to_string(), value.clone())).collect()
}

#[tokio::test]
async fn count_flow_feeds_tool_result_back_and_answers() {
    let h = harness(
        vec![
            Ok(tool_round(vec![ToolCall::from_raw_arguments(
                "count_records",
                json!({"table": "partners"}),
            )])),
            Ok(answer("You currently have 3 partners on file.")),
        ],
        vec![row(&[("count", json!(3))])],
    );

    let outcome = h.orchestrator.process("how many partners do we have?", &caller(), None, &[]).await;

    assert_eq!(outcome.message, "You currently have 3 partners on file.");
    assert!(!outcome.needs_confirmation);
    assert_eq!(outcome.tool_call_log.len(), 1);
    assert_eq!(outcome.tool_call_log[0].tool, "count_records");
    assert!(outcome.tool_call_log[0].success);

    // The second model round must have seen the serialized tool result.
    let windows = h.model.windows();
    assert_eq!(windows.len(), 2);
    let tool_turn = windows[1]
        .iter()
        .rev()
        .find(|turn| turn.role == Role::Tool)
        .expect("tool turn in second window");
    assert!(tool_turn.content.contains("\"count\":3"));
}

#[tokio::test]
async fn write_request_is_staged_never_executed() {
    let h = harness(
        vec![
            Ok(tool_round(vec![ToolCall::from_raw_arguments(
                "create_project",
                json!({"name": "Acme Widget"}),
            )])),
            Ok(answer("I've staged the project for your confirmation.")),
        ],
        vec![],
    );

    let outcome =
        h.orchestrator.process("create a project for Acme Widget", &caller(), None, &[]).await;

    assert!(outcome.needs_confirmation);
    assert_eq!(outcome.actions.len(), 1);
    assert_eq!(outcome.actions[0].description, "Create project: Acme Widget");
    assert_eq!(outcome.actions[0].status, PendingStatus::Pending);
    assert_eq!(outcome.actions[0].requested_by, "marta");
    // Staging must not touch the record store.
    assert!(h.records.projects().is_empty());
}

#[tokio::test]
async fn staged_action_executes_only_after_confirm() {
    let h = harness(
        vec![
            Ok(tool_round(vec![ToolCall::from_raw_arguments(
                "create_project",
                json!({"name": "Hall B"}),
            )])),
            Ok(answer("Staged, awaiting confirmation.")),
        ],
        vec![],
    );

    let outcome = h.orchestrator.process("new project Hall B", &caller(), None, &[]).await;
    let action_id = outcome.actions[0].id.clone();
    assert!(h.records.projects().is_empty());

    let workflow = ActionWorkflow::new(
        Arc::clone(&h.pending) as _,
        Arc::clone(&h.gateway),
        Arc::new(InMemoryAuditSink::default()),
    );
    let done = workflow.confirm(&action_id, "marta").await.unwrap();

    assert_eq!(done.status, PendingStatus::Confirmed);
    assert_eq!(h.records.projects().len(), 1);
    assert_eq!(h.records.projects()[0].id, 1);
}

#[tokio::test]
async fn transport_failure_returns_apology_not_raw_error() {
    let h = harness(vec![Err(TransportError::ModelTimeout { seconds: 120 })], vec![]);

    let outcome = h.orchestrator.process("hello", &caller(), None, &[]).await;

    assert!(outcome.message.contains("try again"));
    assert!(!outcome.message.contains("120"));
    assert!(outcome.tool_call_log.is_empty());
}

#[tokio::test]
async fn rounds_exhaust_with_fixed_message() {
    let looping: Vec<_> = (0..MAX_ROUNDS + 3)
        .map(|_| {
            Ok(tool_round(vec![ToolCall::from_raw_arguments(
                "list_projects",
                json!({}),
            )]))
        })
        .collect();
    let h = harness(looping, vec![]);

    let outcome = h.orchestrator.process("audit everything", &caller(), None, &[]).await;

    assert!(outcome.message.contains("too complex"));
    assert_eq!(h.model.windows().len(), MAX_ROUNDS);
    assert_eq!(outcome.tool_call_log.len(), MAX_ROUNDS);
}

#[tokio::test]
async fn oversized_tool_result_is_truncated_in_context() {
    let rows: Vec<Row> = (0..500)
        .map(|i| row(&[("id", json!(i)), ("name", json!(format!("partner-{i}")))]))
        .collect();
    let h = harness(
        vec![
            Ok(tool_round(vec![ToolCall::from_raw_arguments(
                "search_partners",
                json!({"search": "partner"}),
            )])),
            Ok(answer("That matched a lot of partners; here is a sample.")),
        ],
        rows,
    );

    let outcome = h.orchestrator.process("find all partners", &caller(), None, &[]).await;
    assert!(outcome.tool_call_log[0].success);

    let windows = h.model.windows();
    let tool_turn = windows[1]
        .iter()
        .rev()
        .find(|turn| turn.role == Role::Tool)
        .expect("tool turn in second window");
    assert!(tool_turn.content.len() <= 4000);
    assert!(tool_turn.content.contains("\"_truncated\":true"));
    assert!(tool_turn.content.contains("\"_total\":500"));
}

#[tokio::test]
async fn history_is_windowed_to_last_twenty_turns() {
    let h = harness(vec![Ok(answer("Noted."))], vec![]);
    let history: Vec<ConversationTurn> =
        (0..30).map(|i| ConversationTurn::user(format!("message {i}"))).collect();

    h.orchestrator.process("and one more", &caller(), None, &history).await;

    let windows = h.model.windows();
    // system + 20 history turns + the new user turn
    assert_eq!(windows[0].len(), 22);
    assert_eq!(windows[0][1].content, "message 10");
    assert_eq!(windows[0].last().map(|t| t.content.as_str()), Some("and one more"));
}

#[tokio::test]
async fn reasoning_markup_never_reaches_the_user() {
    let h = harness(
        vec![Ok(answer("<think>they want the stock figures</think>Stock looks healthy."))],
        vec![],
    );

    let outcome = h.orchestrator.process("how is stock?", &caller(), None, &[]).await;
    assert_eq!(outcome.message, "Stock looks healthy.");
}
