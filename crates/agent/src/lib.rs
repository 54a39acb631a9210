//! Agent layer: conversation orchestration and safety-gated tool execution.
//!
//! The flow through this crate:
//!
//! 1. [`orchestrator::Orchestrator`] drives the primary chat model through
//!    bounded tool rounds, feeding each tool result back as context.
//! 2. [`gateway::ToolGateway`] dispatches every tool call by registry
//!    category: read tools run immediately against the read-only store,
//!    write tools are staged as pending actions, escalation tools delegate
//!    to the scriptwriter.
//! 3. [`workflow::ActionWorkflow`] is where a human confirms or rejects a
//!    staged write; only a confirmed action ever touches the record store.
//! 4. [`scriptwriter::Scriptwriter`] asks the secondary model to author SQL
//!    or analysis scripts, and [`sandbox::ScriptSandbox`] executes the
//!    latter inside a restricted engine.
//!
//! The safety rule underneath all of it: nothing a model emits mutates the
//! database without an explicit human confirmation, and nothing a model
//! authors executes without passing the static safety checks first.

pub mod gateway;
pub mod llm;
pub mod orchestrator;
pub mod sandbox;
pub mod scriptwriter;
pub mod workflow;

pub use gateway::ToolGateway;
pub use llm::{ChatModel, ChatResponse, OllamaChatClient};
pub use orchestrator::{Caller, ChatOutcome, Orchestrator, ToolCallRecord};
pub use sandbox::{QueryBridge, SandboxError, SandboxRunResult, ScriptSandbox, StoreQueryBridge};
pub use scriptwriter::{AnthropicClient, CompletionModel, Scriptwriter, ScriptwriterError};
pub use workflow::{ActionWorkflow, WorkflowError};
