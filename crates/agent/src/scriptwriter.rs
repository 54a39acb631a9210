//! Escalation path: a second model authors read-only SQL or analysis scripts
//! on demand. Everything it produces is statically checked before execution.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use opsdesk_core::config::ScriptwriterConfig;
use opsdesk_core::errors::{SafetyViolation, TransportError};
use opsdesk_core::safety;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Error)]
pub enum ScriptwriterError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Safety(#[from] SafetyViolation),
    #[error("the model reply contained no usable {kind}")]
    NothingExtracted { kind: &'static str },
    #[error("scriptwriter is not configured (missing api key)")]
    NotConfigured,
}

/// Single-prompt completion against the authoring model.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, TransportError>;
}

/// Client for the Anthropic messages endpoint.
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout_secs: u64,
}

impl AnthropicClient {
    pub fn new(config: &ScriptwriterConfig) -> Result<Self, ScriptwriterError> {
        let api_key = config
            .api_key
            .as_ref()
            .map(|key| key.expose_secret().to_string())
            .ok_or(ScriptwriterError::NotConfigured)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| TransportError::Model(err.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl CompletionModel for AnthropicClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, TransportError> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    TransportError::ModelTimeout { seconds: self.timeout_secs }
                } else {
                    TransportError::Model(err.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(TransportError::Model(format!(
                "messages endpoint returned {}",
                response.status()
            )));
        }

        let wire: MessagesResponse = response
            .json()
            .await
            .map_err(|err| TransportError::MalformedResponse(err.to_string()))?;

        let text: String = wire
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect();
        if text.trim().is_empty() {
            return Err(TransportError::MalformedResponse("empty completion".to_string()));
        }
        Ok(text)
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Authors report queries and analysis scripts, then vets them.
pub struct Scriptwriter {
    model: Box<dyn CompletionModel>,
}

impl Scriptwriter {
    pub fn new(model: impl CompletionModel + 'static) -> Self {
        Self { model: Box::new(model) }
    }

    /// Produce a vetted, row-capped SELECT for an ad-hoc report request.
    pub async fn author_report_query(
        &self,
        task_description: &str,
        context: &str,
    ) -> Result<String, ScriptwriterError> {
        let prompt = format!(
            "Write a single SQLite SELECT statement for this reporting task.\n\n\
             Task: {task_description}\n\nConversation context: {context}\n\n\
             Reply with the statement in a ```sql fenced block and nothing else."
        );
        let reply = self.model.complete(SQL_SYSTEM_PROMPT, &prompt).await?;
        debug!(event_name = "scriptwriter.sql_reply", chars = reply.len());

        let statement = extract_sql(&reply)
            .ok_or(ScriptwriterError::NothingExtracted { kind: "SQL statement" })?;
        let prepared =
            safety::prepare_read_statement(&statement, safety::ANALYSIS_ROW_CEILING)?;
        info!(event_name = "scriptwriter.sql_authored", chars = prepared.len());
        Ok(prepared)
    }

    /// Produce a vetted analysis script for the sandbox.
    pub async fn author_analysis_script(
        &self,
        task_description: &str,
        context: &str,
    ) -> Result<String, ScriptwriterError> {
        let prompt = format!(
            "Write a Rhai script for this data-analysis task.\n\n\
             Task: {task_description}\n\nConversation context: {context}\n\n\
             Reply with the script in a ```rhai fenced block and nothing else."
        );
        let reply = self.model.complete(SCRIPT_SYSTEM_PROMPT, &prompt).await?;
        debug!(event_name = "scriptwriter.script_reply", chars = reply.len());

        let script = extract_script(&reply)
            .ok_or(ScriptwriterError::NothingExtracted { kind: "analysis script" })?;
        safety::check_script(&script)?;
        info!(event_name = "scriptwriter.script_authored", chars = script.len());
        Ok(script)
    }
}

const SQL_SYSTEM_PROMPT: &str = "You write read-only SQLite queries against a \
back-office database with tables: partners, contact_persons, projects, \
project_timeline, sales_orders, quotes, invoices, stock_items, emails, \
work_orders. Only SELECT statements are permitted; never mutate data. Prefer \
explicit column lists and include a LIMIT.";

const SCRIPT_SYSTEM_PROMPT: &str = "You write Rhai analysis scripts. The host \
provides query_db(sql) which runs a read-only SELECT and returns an array of \
row maps. Do not import modules. The script's final expression is its result; \
keep results small (aggregates, not raw dumps). print() output is captured \
for diagnostics.";

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[a-zA-Z]*\s*\n(.*?)```").expect("static fence pattern")
    })
}

/// First fenced block if present, otherwise the lines from the first SELECT
/// onward. Prose-only replies yield `None`.
pub fn extract_sql(reply: &str) -> Option<String> {
    if let Some(captures) = fence_regex().captures(reply) {
        let block = captures[1].trim();
        if !block.is_empty() {
            return Some(block.to_string());
        }
    }

    let mut lines = Vec::new();
    for line in reply.lines() {
        if lines.is_empty() {
            if line.trim_start().to_ascii_uppercase().starts_with("SELECT") {
                lines.push(line);
            }
        } else {
            lines.push(line);
        }
    }
    if lines.is_empty() {
        return None;
    }
    Some(lines.join("\n").trim().to_string())
}

/// First fenced block if present, otherwise the lines from the first thing
/// that looks like script code (`let`, `fn`, or a `query_db` call).
pub fn extract_script(reply: &str) -> Option<String> {
    if let Some(captures) = fence_regex().captures(reply) {
        let block = captures[1].trim();
        if !block.is_empty() {
            return Some(block.to_string());
        }
    }

    let mut lines = Vec::new();
    for line in reply.lines() {
        if lines.is_empty() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("let ")
                || trimmed.starts_with("fn ")
                || trimmed.contains("query_db(")
            {
                lines.push(line);
            }
        } else {
            lines.push(line);
        }
    }
    if lines.is_empty() {
        return None;
    }
    Some(lines.join("\n").trim().to_string())
}
