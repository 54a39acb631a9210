//! Conversation orchestrator.
//!
//! Drives the primary chat model through bounded tool rounds. Each round the
//! model either answers in prose (done) or emits tool calls, which are
//! executed strictly in emission order so every result is context for the
//! next round. Rounds of one conversation never overlap.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;
use tracing::{error, info, warn};

use opsdesk_core::domain::action::PendingAction;
use opsdesk_core::domain::conversation::ConversationTurn;
use opsdesk_core::tools;

use crate::gateway::ToolGateway;
use crate::llm::ChatModel;

/// How many model rounds one request may consume before giving up.
pub const MAX_ROUNDS: usize = 5;
/// How many trailing history turns are replayed to the model.
pub const HISTORY_WINDOW: usize = 20;
/// Serialized tool results are cut to this many chars before re-submission.
pub const TOOL_RESULT_CEILING: usize = 4000;

const APOLOGY_MESSAGE: &str = "I'm sorry, I couldn't reach the assistant service just now. \
     Please try again in a moment.";
const EXHAUSTED_MESSAGE: &str = "That request turned out to be too complex to finish in one \
     go. Please retry with a simpler or more specific request.";

/// Who is talking to the assistant. Write actions staged during the
/// conversation are owned by this caller.
#[derive(Clone, Debug)]
pub struct Caller {
    pub name: String,
    pub role: String,
}

/// One executed tool call, kept for operator-facing transparency.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub arguments: Value,
    pub success: bool,
}

/// Everything the outer layer needs to render one assistant reply.
#[derive(Clone, Debug)]
pub struct ChatOutcome {
    pub message: String,
    pub actions: Vec<PendingAction>,
    pub needs_confirmation: bool,
    pub suggested_commands: Vec<String>,
    pub tool_call_log: Vec<ToolCallRecord>,
}

pub struct Orchestrator {
    model: Arc<dyn ChatModel>,
    gateway: Arc<ToolGateway>,
}

impl Orchestrator {
    pub fn new(model: Arc<dyn ChatModel>, gateway: Arc<ToolGateway>) -> Self {
        Self { model, gateway }
    }

    /// Process one user message to a final reply.
    pub async fn process(
        &self,
        message: &str,
        caller: &Caller,
        context_project: Option<&str>,
        history: &[ConversationTurn],
    ) -> ChatOutcome {
        let mut turns = Vec::with_capacity(history.len().min(HISTORY_WINDOW) + 2);
        turns.push(ConversationTurn::system(system_prompt(caller, context_project)));
        let window_start = history.len().saturating_sub(HISTORY_WINDOW);
        turns.extend(history[window_start..].iter().cloned());
        turns.push(ConversationTurn::user(message));

        let catalogue = tools::catalogue();
        let mut actions: Vec<PendingAction> = Vec::new();
        let mut tool_call_log: Vec<ToolCallRecord> = Vec::new();

        for round in 1..=MAX_ROUNDS {
            let response = match self.model.chat(&turns, &catalogue).await {
                Ok(response) => response,
                Err(err) => {
                    error!(event_name = "orchestrator.model_failed", round, error = %err);
                    return outcome(APOLOGY_MESSAGE.to_string(), actions, tool_call_log);
                }
            };

            if response.tool_calls.is_empty() {
                let answer = strip_reasoning(&response.content);
                info!(event_name = "orchestrator.answered", round, tools_used = tool_call_log.len());
                return outcome(answer, actions, tool_call_log);
            }

            info!(
                event_name = "orchestrator.tool_round",
                round,
                requested = response.tool_calls.len(),
            );
            turns.push(ConversationTurn::assistant(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            // Emission order is load-bearing: each result is context for the
            // calls after it.
            for call in &response.tool_calls {
                let result = self.gateway.invoke(call, &caller.name).await;
                tool_call_log.push(ToolCallRecord {
                    tool: call.name.clone(),
                    arguments: Value::Object(call.arguments.clone()),
                    success: result.success,
                });
                if let Some(action) = &result.pending_action {
                    actions.push(action.clone());
                }
                turns.push(ConversationTurn::tool(result.serialize_bounded(TOOL_RESULT_CEILING)));
            }
        }

        warn!(event_name = "orchestrator.rounds_exhausted", rounds = MAX_ROUNDS);
        outcome(EXHAUSTED_MESSAGE.to_string(), actions, tool_call_log)
    }
}

fn outcome(
    message: String,
    actions: Vec<PendingAction>,
    tool_call_log: Vec<ToolCallRecord>,
) -> ChatOutcome {
    let needs_confirmation = !actions.is_empty();
    let suggested_commands = suggest_commands(&message);
    ChatOutcome { message, actions, needs_confirmation, suggested_commands, tool_call_log }
}

fn system_prompt(caller: &Caller, context_project: Option<&str>) -> String {
    let today = chrono::Utc::now().format("%Y-%m-%d");
    let mut prompt = format!(
        "You are the operations desk assistant for a small manufacturing company.\n\
         Today is {today}. You are talking to {name} ({role}).\n\
         Use the provided tools to look up partners, projects, orders, quotes, \
         invoices, stock and emails. Never invent data: if a lookup returns \
         nothing, say so.\n\
         Write operations are staged for human confirmation; tell the user what \
         you staged and that it awaits their approval.\n\
         Answer concisely, in the user's language.",
        name = caller.name,
        role = caller.role,
    );
    if let Some(project) = context_project {
        prompt.push_str(&format!(
            "\nThe user is currently working in project {project}; prefer it \
             when a request is ambiguous."
        ));
    }
    prompt
}

/// Remove chain-of-thought markup some local models emit before the answer.
fn strip_reasoning(content: &str) -> String {
    static THINK: OnceLock<Regex> = OnceLock::new();
    let pattern = THINK
        .get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("static think-tag pattern"));
    pattern.replace_all(content, "").trim().to_string()
}

const SUGGESTION_KEYWORDS: &[(&str, &str)] = &[
    ("project", "show project details"),
    ("partner", "search partners"),
    ("order", "search recent orders"),
    ("quote", "search open quotes"),
    ("invoice", "show unpaid invoices"),
    ("stock", "check stock levels"),
    ("email", "list new emails"),
];

const FALLBACK_SUGGESTIONS: &[&str] =
    &["list projects", "list new emails", "search partners"];

/// Up to four follow-up commands keyed on what the answer talked about.
fn suggest_commands(answer: &str) -> Vec<String> {
    let lowered = answer.to_lowercase();
    let mut suggestions: Vec<String> = SUGGESTION_KEYWORDS
        .iter()
        .filter(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, command)| command.to_string())
        .take(4)
        .collect();
    if suggestions.is_empty() {
        suggestions = FALLBACK_SUGGESTIONS.iter().map(|s| s.to_string()).collect();
    }
    suggestions
}
