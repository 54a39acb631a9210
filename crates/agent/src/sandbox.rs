//! Sandboxed execution of authored analysis scripts.
//!
//! The engine starts with no file, network, or process access; the only door
//! back into the system is the registered `query_db` function, which revalidates
//! every statement it is handed. Time and operation budgets are enforced inside
//! the engine, with an outer task timeout as backstop.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, EvalAltResult};
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{info, warn};

use opsdesk_core::config::SandboxConfig;
use opsdesk_core::errors::{PreconditionError, ResourceError, SafetyViolation};
use opsdesk_core::safety;
use opsdesk_core::store::ReadOnlyStore;

/// Captured print output is bounded so a print loop cannot grow memory.
const STDOUT_CAP: usize = 2000;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    Safety(#[from] SafetyViolation),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error("script failed: {0}")]
    Script(String),
}

/// Value of the script's final expression plus captured print output.
#[derive(Clone, Debug, PartialEq)]
pub struct SandboxRunResult {
    pub value: Value,
    pub stdout: String,
}

/// Synchronous query door exposed to scripts as `query_db`.
pub trait QueryBridge: Send + Sync + 'static {
    fn query(&self, statement: &str) -> Result<Vec<Value>, String>;
}

/// Bridges script queries onto the async read-only store.
///
/// Statements are validated and row-capped here again; the bridge does not
/// trust that its caller vetted the script.
pub struct StoreQueryBridge {
    store: Arc<dyn ReadOnlyStore>,
    handle: Handle,
}

impl StoreQueryBridge {
    /// Must be called from within a tokio runtime.
    pub fn new(store: Arc<dyn ReadOnlyStore>) -> Self {
        Self { store, handle: Handle::current() }
    }
}

impl QueryBridge for StoreQueryBridge {
    fn query(&self, statement: &str) -> Result<Vec<Value>, String> {
        let prepared = safety::prepare_read_statement(statement, safety::ANALYSIS_ROW_CEILING)
            .map_err(|violation| violation.to_string())?;
        let rows = self
            .handle
            .block_on(self.store.query(&prepared, &[]))
            .map_err(|err| err.to_string())?;
        Ok(rows.into_iter().map(Value::Object).collect())
    }
}

pub struct ScriptSandbox {
    config: SandboxConfig,
}

impl ScriptSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Statically vet, then execute a script to completion or rejection.
    pub async fn run(
        &self,
        script: &str,
        bridge: Arc<dyn QueryBridge>,
    ) -> Result<SandboxRunResult, SandboxError> {
        safety::check_script(script)?;

        let config = self.config.clone();
        let script = script.to_string();
        let timeout = Duration::from_secs(config.timeout_secs);

        let execution =
            tokio::task::spawn_blocking(move || execute_blocking(&config, &script, bridge));

        // The engine's own deadline fires first; the outer timeout only
        // triggers if the blocking thread is wedged outside script code.
        match tokio::time::timeout(timeout + Duration::from_secs(2), execution).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(SandboxError::Script(join_error.to_string())),
            Err(_) => {
                warn!(event_name = "sandbox.outer_timeout", timeout_secs = timeout.as_secs());
                Err(ResourceError::ScriptTimeout { seconds: self.config.timeout_secs }.into())
            }
        }
    }
}

fn execute_blocking(
    config: &SandboxConfig,
    script: &str,
    bridge: Arc<dyn QueryBridge>,
) -> Result<SandboxRunResult, SandboxError> {
    let mut engine = Engine::new();
    engine.disable_symbol("eval");
    // Second line behind the static import vetting: no module ever resolves.
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.set_max_operations(config.max_operations);

    let deadline = Instant::now() + Duration::from_secs(config.timeout_secs);
    engine.on_progress(move |_operations| {
        if Instant::now() >= deadline {
            Some(Dynamic::UNIT)
        } else {
            None
        }
    });

    let stdout: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
    let stdout_sink = Arc::clone(&stdout);
    engine.on_print(move |line| {
        if let Ok(mut captured) = stdout_sink.lock() {
            if captured.len() < STDOUT_CAP {
                let remaining = STDOUT_CAP - captured.len();
                let mut chunk: String = line.chars().take(remaining).collect();
                chunk.push('\n');
                captured.push_str(&chunk);
            }
        }
    });

    engine.register_fn(
        "query_db",
        move |statement: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let rows = bridge.query(statement).map_err(|message| -> Box<EvalAltResult> {
                message.into()
            })?;
            rhai::serde::to_dynamic(Value::Array(rows))
        },
    );

    let timeout_secs = config.timeout_secs;
    let outcome = engine
        .eval::<Dynamic>(script)
        .map_err(|err| map_eval_error(*err, timeout_secs))?;

    let value: Value = rhai::serde::from_dynamic(&outcome)
        .map_err(|err| SandboxError::Script(format!("unserializable script result: {err}")))?;

    let serialized_len = serde_json::to_string(&value).map(|text| text.len()).unwrap_or(0);
    if serialized_len > config.max_result_bytes {
        return Err(PreconditionError::ResultTooLarge {
            actual: serialized_len,
            limit: config.max_result_bytes,
        }
        .into());
    }

    let stdout = stdout.lock().map(|captured| captured.clone()).unwrap_or_default();
    info!(event_name = "sandbox.script_completed", result_bytes = serialized_len);
    Ok(SandboxRunResult { value, stdout })
}

fn map_eval_error(err: EvalAltResult, timeout_secs: u64) -> SandboxError {
    match err {
        EvalAltResult::ErrorTerminated(..) => {
            ResourceError::ScriptTimeout { seconds: timeout_secs }.into()
        }
        EvalAltResult::ErrorTooManyOperations(..) => ResourceError::OperationBudget.into(),
        other => SandboxError::Script(other.to_string()),
    }
}
