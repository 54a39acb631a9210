//! Static tool registry.
//!
//! Tools are a closed set: [`ToolName`] enumerates every tool the model may
//! request, and the [`ToolSpec`] table is the single source of truth for
//! routing. Category is carried in the spec entry and never inferred from the
//! tool name at request time; a name that does not resolve here is rejected
//! by the gateway before any dispatch.

use serde_json::{json, Value};

use crate::domain::conversation::ToolCall;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolCategory {
    /// Executes immediately against the read-only store.
    Read,
    /// Never executes directly; stages a pending action for confirmation.
    Write,
    /// Delegates to the secondary model which authors a query or script.
    Escalation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolName {
    // Read
    SearchPartners,
    GetPartnerDetails,
    ListProjects,
    GetProjectDetails,
    SearchOrders,
    SearchQuotes,
    GetInvoices,
    GetStockLevels,
    CountRecords,
    ListEmails,
    GetEmailDetails,
    RunCustomQuery,
    // Write
    CreateProject,
    UpdateProject,
    CreateWorkOrder,
    AssignEmailToProject,
    // Escalation
    RequestCustomReport,
    RequestDataAnalysis,
}

impl ToolName {
    pub fn resolve(name: &str) -> Option<Self> {
        REGISTRY.iter().find(|spec| spec.name == name).map(|spec| spec.tool)
    }

    pub fn as_str(&self) -> &'static str {
        self.spec().name
    }

    pub fn category(&self) -> ToolCategory {
        self.spec().category
    }

    pub fn spec(&self) -> &'static ToolSpec {
        REGISTRY.iter().find(|spec| spec.tool == *self).expect("every tool has a registry entry")
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct ToolSpec {
    pub tool: ToolName,
    pub name: &'static str,
    pub category: ToolCategory,
    pub description: &'static str,
    /// JSON schema for the chat-protocol tool catalogue.
    parameters: fn() -> Value,
}

/// Tables the counting tool may touch, mirroring what the read tools expose.
/// Matched case-insensitively so the model may say `Partners` or `partners`.
pub const COUNTABLE_TABLES: &[&str] = &[
    "partners",
    "projects",
    "sales_orders",
    "quotes",
    "invoices",
    "stock_items",
    "emails",
    "work_orders",
];

/// Canonical table name for the counting tool, or `None` when not allowlisted.
pub fn countable_table(requested: &str) -> Option<&'static str> {
    let requested = requested.trim();
    COUNTABLE_TABLES.iter().copied().find(|table| table.eq_ignore_ascii_case(requested))
}

pub static REGISTRY: &[ToolSpec] = &[
    ToolSpec {
        tool: ToolName::SearchPartners,
        name: "search_partners",
        category: ToolCategory::Read,
        description: "Search business partners (customers, suppliers) by name, code, or city.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "search": {"type": "string", "description": "Name fragment, code, or city"},
                    "limit": {"type": "integer", "description": "Maximum results (default 20)", "default": 20}
                },
                "required": ["search"]
            })
        },
    },
    ToolSpec {
        tool: ToolName::GetPartnerDetails,
        name: "get_partner_details",
        category: ToolCategory::Read,
        description: "Partner details by id, including contact persons.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "partner_id": {"type": "integer", "description": "Partner id"}
                },
                "required": ["partner_id"]
            })
        },
    },
    ToolSpec {
        tool: ToolName::ListProjects,
        name: "list_projects",
        category: ToolCategory::Read,
        description: "List projects, optionally filtered by phase, status, or a name search.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "phase": {"type": "string", "enum": ["RFQ", "Quote", "Order", "Production", "Delivery", "Closed"]},
                    "status": {"type": "string", "enum": ["Active", "OnHold", "Completed", "Cancelled"]},
                    "search": {"type": "string", "description": "Search by name or project code"},
                    "limit": {"type": "integer", "default": 20}
                }
            })
        },
    },
    ToolSpec {
        tool: ToolName::GetProjectDetails,
        name: "get_project_details",
        category: ToolCategory::Read,
        description: "Project details including its timeline and work orders.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "project_id": {"type": "integer", "description": "Project id"}
                },
                "required": ["project_id"]
            })
        },
    },
    ToolSpec {
        tool: ToolName::SearchOrders,
        name: "search_orders",
        category: ToolCategory::Read,
        description: "Search sales orders filtered by partner, status, or date range.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "partner_id": {"type": "integer"},
                    "partner_name": {"type": "string"},
                    "status": {"type": "string"},
                    "date_from": {"type": "string", "description": "ISO date, inclusive"},
                    "date_to": {"type": "string", "description": "ISO date, inclusive"},
                    "limit": {"type": "integer", "default": 20}
                }
            })
        },
    },
    ToolSpec {
        tool: ToolName::SearchQuotes,
        name: "search_quotes",
        category: ToolCategory::Read,
        description: "Search sales quotes filtered by partner, status, or date range.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "partner_id": {"type": "integer"},
                    "partner_name": {"type": "string"},
                    "status": {"type": "string"},
                    "date_from": {"type": "string"},
                    "date_to": {"type": "string"},
                    "limit": {"type": "integer", "default": 20}
                }
            })
        },
    },
    ToolSpec {
        tool: ToolName::GetInvoices,
        name: "get_invoices",
        category: ToolCategory::Read,
        description: "List invoices filtered by partner or date range.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "partner_id": {"type": "integer"},
                    "date_from": {"type": "string"},
                    "date_to": {"type": "string"},
                    "limit": {"type": "integer", "default": 20}
                }
            })
        },
    },
    ToolSpec {
        tool: ToolName::GetStockLevels,
        name: "get_stock_levels",
        category: ToolCategory::Read,
        description: "Current stock levels, optionally filtered by article name or warehouse.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "article_search": {"type": "string"},
                    "warehouse": {"type": "string"},
                    "limit": {"type": "integer", "default": 20}
                }
            })
        },
    },
    ToolSpec {
        tool: ToolName::CountRecords,
        name: "count_records",
        category: ToolCategory::Read,
        description: "Count rows in an allowlisted table, with an optional simple WHERE filter.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "table": {"type": "string", "enum": COUNTABLE_TABLES},
                    "where_clause": {"type": "string", "description": "Optional simple filter, e.g. status = 'Active'"}
                },
                "required": ["table"]
            })
        },
    },
    ToolSpec {
        tool: ToolName::ListEmails,
        name: "list_emails",
        category: ToolCategory::Read,
        description: "List ingested emails, newest first; defaults to unprocessed mail.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string", "enum": ["New", "Read", "Assigned", "Processed"]},
                    "all_statuses": {"type": "boolean", "default": false},
                    "category": {"type": "string", "enum": ["RFQ", "Order", "Change", "Documentation", "Complaint"]},
                    "project_id": {"type": "integer"},
                    "own_only": {"type": "boolean", "default": false, "description": "Only mail addressed to the current user."},
                    "limit": {"type": "integer", "default": 20}
                }
            })
        },
    },
    ToolSpec {
        tool: ToolName::GetEmailDetails,
        name: "get_email_details",
        category: ToolCategory::Read,
        description: "Full detail of one ingested email by id.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "email_id": {"type": "integer"}
                },
                "required": ["email_id"]
            })
        },
    },
    ToolSpec {
        tool: ToolName::RunCustomQuery,
        name: "run_custom_query",
        category: ToolCategory::Read,
        description: "Run a read-only SELECT statement. Mutating operations are rejected and a row ceiling is enforced.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "A single SELECT statement"}
                },
                "required": ["query"]
            })
        },
    },
    ToolSpec {
        tool: ToolName::CreateProject,
        name: "create_project",
        category: ToolCategory::Write,
        description: "Create a new project. Requires user confirmation before anything is written.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Project name"},
                    "customer_id": {"type": "integer", "description": "Partner id of the customer"},
                    "phase": {"type": "string", "default": "RFQ"},
                    "notes": {"type": "string"}
                },
                "required": ["name"]
            })
        },
    },
    ToolSpec {
        tool: ToolName::UpdateProject,
        name: "update_project",
        category: ToolCategory::Write,
        description: "Update a project's phase, status, or notes. Requires user confirmation.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "project_id": {"type": "integer"},
                    "phase": {"type": "string"},
                    "status": {"type": "string"},
                    "notes": {"type": "string"}
                },
                "required": ["project_id"]
            })
        },
    },
    ToolSpec {
        tool: ToolName::CreateWorkOrder,
        name: "create_work_order",
        category: ToolCategory::Write,
        description: "Create a work order for a project. Requires user confirmation.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "project_id": {"type": "integer"},
                    "article": {"type": "string"},
                    "quantity": {"type": "integer"}
                },
                "required": ["project_id", "quantity"]
            })
        },
    },
    ToolSpec {
        tool: ToolName::AssignEmailToProject,
        name: "assign_email_to_project",
        category: ToolCategory::Write,
        description: "Link an email to a project and mark it assigned. Requires user confirmation.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "email_id": {"type": "integer"},
                    "project_id": {"type": "integer"}
                },
                "required": ["email_id", "project_id"]
            })
        },
    },
    ToolSpec {
        tool: ToolName::RequestCustomReport,
        name: "request_custom_report",
        category: ToolCategory::Escalation,
        description: "Escalate to the report writer when no predefined read tool fits: it authors a read-only query, which is safety-checked and executed.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "task_description": {"type": "string", "description": "What the report should answer"},
                    "context": {"type": "string", "description": "Extra context from the conversation"}
                },
                "required": ["task_description"]
            })
        },
    },
    ToolSpec {
        tool: ToolName::RequestDataAnalysis,
        name: "request_data_analysis",
        category: ToolCategory::Escalation,
        description: "Escalate to the analysis writer for computations beyond SQL: it authors a sandboxed script, which is safety-checked and executed with a time limit.",
        parameters: || {
            json!({
                "type": "object",
                "properties": {
                    "task_description": {"type": "string"},
                    "context": {"type": "string"}
                },
                "required": ["task_description"]
            })
        },
    },
];

/// Render the full tool catalogue in the chat-protocol function format.
pub fn catalogue() -> Vec<Value> {
    REGISTRY
        .iter()
        .map(|spec| {
            json!({
                "type": "function",
                "function": {
                    "name": spec.name,
                    "description": spec.description,
                    "parameters": (spec.parameters)(),
                }
            })
        })
        .collect()
}

/// Deterministic approver-facing summary for a write tool.
///
/// Built from the call arguments alone so it can be shown before anything
/// executes; missing arguments render as `?` rather than failing.
pub fn write_description(tool: ToolName, call: &ToolCall) -> String {
    let text = |key: &str| call.arg_str(key).unwrap_or_else(|| "?".to_string());
    let num = |key: &str| {
        call.arg_i64(key).map(|v| v.to_string()).unwrap_or_else(|| "?".to_string())
    };
    match tool {
        ToolName::CreateProject => format!("Create project: {}", text("name")),
        ToolName::UpdateProject => format!("Update project #{}", num("project_id")),
        ToolName::CreateWorkOrder => {
            format!("Create work order for project #{}", num("project_id"))
        }
        ToolName::AssignEmailToProject => {
            format!("Assign email #{} to project #{}", num("email_id"), num("project_id"))
        }
        other => format!("Execute {}", other.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{catalogue, write_description, ToolCategory, ToolName, REGISTRY};
    use crate::domain::conversation::ToolCall;

    #[test]
    fn every_tool_resolves_by_name_and_back() {
        for spec in REGISTRY {
            let resolved = ToolName::resolve(spec.name).unwrap();
            assert_eq!(resolved, spec.tool);
            assert_eq!(resolved.as_str(), spec.name);
        }
    }

    #[test]
    fn unknown_name_does_not_resolve() {
        assert!(ToolName::resolve("drop_all_tables").is_none());
    }

    #[test]
    fn category_comes_from_the_registry_not_the_name() {
        assert_eq!(ToolName::RunCustomQuery.category(), ToolCategory::Read);
        assert_eq!(ToolName::CreateProject.category(), ToolCategory::Write);
        assert_eq!(ToolName::RequestDataAnalysis.category(), ToolCategory::Escalation);
    }

    #[test]
    fn catalogue_is_chat_protocol_shaped() {
        let tools = catalogue();
        assert_eq!(tools.len(), REGISTRY.len());
        for tool in &tools {
            assert_eq!(tool["type"], json!("function"));
            assert!(tool["function"]["name"].is_string());
            assert!(tool["function"]["parameters"].is_object());
        }
    }

    #[test]
    fn countable_table_matching_is_case_insensitive() {
        assert_eq!(super::countable_table("Partners"), Some("partners"));
        assert_eq!(super::countable_table(" sales_orders "), Some("sales_orders"));
        assert_eq!(super::countable_table("sqlite_master"), None);
    }

    #[test]
    fn create_project_description_uses_template() {
        let call = ToolCall::from_raw_arguments("create_project", json!({"name": "Acme Widget"}));
        assert_eq!(
            write_description(ToolName::CreateProject, &call),
            "Create project: Acme Widget"
        );
    }

    #[test]
    fn missing_arguments_render_as_placeholder() {
        let call = ToolCall::from_raw_arguments("assign_email_to_project", json!({}));
        assert_eq!(
            write_description(ToolName::AssignEmailToProject, &call),
            "Assign email #? to project #?"
        );
    }
}
