//! Tool dispatch gateway.
//!
//! Every model-requested tool call enters here. Read tools execute against
//! the read-only store, write tools are staged for human confirmation and
//! never executed directly, escalation tools delegate to the scriptwriter.
//! `invoke` never returns an error: every failure becomes a `ToolResult`
//! the conversation can continue from.

use std::cmp::min;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use opsdesk_core::domain::action::{NewPendingAction, PendingAction};
use opsdesk_core::domain::conversation::ToolCall;
use opsdesk_core::domain::tool::ToolResult;
use opsdesk_core::safety;
use opsdesk_core::store::{PendingActionStore, QueryParam, ReadOnlyStore, RecordStore};
use opsdesk_core::tools::{self, ToolCategory, ToolName};

use crate::sandbox::{ScriptSandbox, StoreQueryBridge};
use crate::scriptwriter::Scriptwriter;

pub struct ToolGateway {
    read_store: Arc<dyn ReadOnlyStore>,
    pending_store: Arc<dyn PendingActionStore>,
    record_store: Arc<dyn RecordStore>,
    scriptwriter: Option<Scriptwriter>,
    sandbox: ScriptSandbox,
}

impl ToolGateway {
    pub fn new(
        read_store: Arc<dyn ReadOnlyStore>,
        pending_store: Arc<dyn PendingActionStore>,
        record_store: Arc<dyn RecordStore>,
        scriptwriter: Option<Scriptwriter>,
        sandbox: ScriptSandbox,
    ) -> Self {
        Self { read_store, pending_store, record_store, scriptwriter, sandbox }
    }

    /// Dispatch one tool call on behalf of `requested_by`.
    pub async fn invoke(&self, call: &ToolCall, requested_by: &str) -> ToolResult {
        let Some(tool) = ToolName::resolve(&call.name) else {
            warn!(event_name = "gateway.unknown_tool", tool = %call.name);
            return ToolResult::failure(format!("unknown tool `{}`", call.name));
        };

        info!(
            event_name = "gateway.tool_invoked",
            tool = %tool,
            category = ?tool.category(),
            requested_by,
        );

        match tool.category() {
            ToolCategory::Read => self.invoke_read(tool, call, requested_by).await,
            ToolCategory::Write => self.stage_write(tool, call, requested_by).await,
            ToolCategory::Escalation => self.escalate(tool, call).await,
        }
    }

    async fn invoke_read(&self, tool: ToolName, call: &ToolCall, requested_by: &str) -> ToolResult {
        match tool {
            ToolName::SearchPartners => self.search_partners(call).await,
            ToolName::GetPartnerDetails => self.get_partner_details(call).await,
            ToolName::ListProjects => self.list_projects(call).await,
            ToolName::GetProjectDetails => self.get_project_details(call).await,
            ToolName::SearchOrders => {
                self.search_documents(call, "sales_orders", "order_date").await
            }
            ToolName::SearchQuotes => self.search_documents(call, "quotes", "quote_date").await,
            ToolName::GetInvoices => self.get_invoices(call).await,
            ToolName::GetStockLevels => self.get_stock_levels(call).await,
            ToolName::CountRecords => self.count_records(call).await,
            ToolName::ListEmails => self.list_emails(call, requested_by).await,
            ToolName::GetEmailDetails => self.get_email_details(call).await,
            ToolName::RunCustomQuery => self.run_custom_query(call).await,
            _ => ToolResult::failure(format!("`{tool}` is not a read tool")),
        }
    }

    fn limit_of(&self, call: &ToolCall) -> i64 {
        min(call.arg_i64_or("limit", 20, 1), safety::READ_ROW_CEILING)
    }

    async fn rows_result(&self, statement: &str, params: Vec<QueryParam>) -> ToolResult {
        match self.read_store.query(statement, &params).await {
            Ok(rows) => ToolResult::rows(rows.into_iter().map(Value::Object).collect()),
            Err(err) => ToolResult::failure(format!("query failed: {err}")),
        }
    }

    async fn search_partners(&self, call: &ToolCall) -> ToolResult {
        let Some(search) = call.arg_str("search") else {
            return ToolResult::failure("search_partners requires a `search` argument");
        };
        let pattern = format!("%{search}%");
        self.rows_result(
            "SELECT id, code, name, kind, city, country FROM partners
             WHERE name LIKE ? OR code LIKE ? OR city LIKE ?
             ORDER BY name
             LIMIT ?",
            vec![
                pattern.clone().into(),
                pattern.clone().into(),
                pattern.into(),
                self.limit_of(call).into(),
            ],
        )
        .await
    }

    async fn get_partner_details(&self, call: &ToolCall) -> ToolResult {
        let Some(partner_id) = call.arg_i64("partner_id") else {
            return ToolResult::failure("get_partner_details requires a `partner_id` argument");
        };

        let partner = match self
            .read_store
            .query(
                "SELECT id, code, name, kind, city, country, tax_number, created_at
                 FROM partners WHERE id = ?",
                &[partner_id.into()],
            )
            .await
        {
            Ok(mut rows) if !rows.is_empty() => rows.remove(0),
            Ok(_) => return ToolResult::failure(format!("partner {partner_id} not found")),
            Err(err) => return ToolResult::failure(format!("query failed: {err}")),
        };

        let contacts = match self
            .read_store
            .query(
                "SELECT name, email, phone FROM contact_persons WHERE partner_id = ?",
                &[partner_id.into()],
            )
            .await
        {
            Ok(rows) => rows.into_iter().map(Value::Object).collect::<Vec<_>>(),
            Err(err) => return ToolResult::failure(format!("query failed: {err}")),
        };

        ToolResult::ok(json!({"partner": partner, "contacts": contacts}))
    }

    async fn list_projects(&self, call: &ToolCall) -> ToolResult {
        let mut conditions = Vec::new();
        let mut params: Vec<QueryParam> = Vec::new();

        if let Some(phase) = call.arg_str("phase") {
            conditions.push("phase = ?");
            params.push(phase.into());
        }
        if let Some(status) = call.arg_str("status") {
            conditions.push("status = ?");
            params.push(status.into());
        }
        if let Some(search) = call.arg_str("search") {
            conditions.push("(name LIKE ? OR code LIKE ?)");
            let pattern = format!("%{search}%");
            params.push(pattern.clone().into());
            params.push(pattern.into());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        params.push(self.limit_of(call).into());

        let statement = format!(
            "SELECT id, code, name, customer_id, phase, status, notes, created_at
             FROM projects{where_clause}
             ORDER BY created_at DESC
             LIMIT ?"
        );
        self.rows_result(&statement, params).await
    }

    async fn get_project_details(&self, call: &ToolCall) -> ToolResult {
        let Some(project_id) = call.arg_i64("project_id") else {
            return ToolResult::failure("get_project_details requires a `project_id` argument");
        };

        let project = match self
            .read_store
            .query(
                "SELECT id, code, name, customer_id, phase, status, notes, created_at, updated_at
                 FROM projects WHERE id = ?",
                &[project_id.into()],
            )
            .await
        {
            Ok(mut rows) if !rows.is_empty() => rows.remove(0),
            Ok(_) => return ToolResult::failure(format!("project {project_id} not found")),
            Err(err) => return ToolResult::failure(format!("query failed: {err}")),
        };

        let timeline = match self
            .read_store
            .query(
                "SELECT entry, actor, created_at FROM project_timeline
                 WHERE project_id = ? ORDER BY created_at ASC",
                &[project_id.into()],
            )
            .await
        {
            Ok(rows) => rows.into_iter().map(Value::Object).collect::<Vec<_>>(),
            Err(err) => return ToolResult::failure(format!("query failed: {err}")),
        };

        let work_orders = match self
            .read_store
            .query(
                "SELECT id, article, quantity, status, created_at FROM work_orders
                 WHERE project_id = ? ORDER BY created_at ASC",
                &[project_id.into()],
            )
            .await
        {
            Ok(rows) => rows.into_iter().map(Value::Object).collect::<Vec<_>>(),
            Err(err) => return ToolResult::failure(format!("query failed: {err}")),
        };

        ToolResult::ok(json!({
            "project": project,
            "timeline": timeline,
            "work_orders": work_orders,
        }))
    }

    /// Shared shape of order and quote search: same filters, different table.
    async fn search_documents(
        &self,
        call: &ToolCall,
        table: &str,
        date_column: &str,
    ) -> ToolResult {
        let mut conditions = Vec::new();
        let mut params: Vec<QueryParam> = Vec::new();

        if let Some(partner_id) = call.arg_i64("partner_id") {
            conditions.push("d.partner_id = ?".to_string());
            params.push(partner_id.into());
        } else if let Some(partner_name) = call.arg_str("partner_name") {
            conditions.push("p.name LIKE ?".to_string());
            params.push(format!("%{partner_name}%").into());
        }
        if let Some(status) = call.arg_str("status") {
            conditions.push("d.status = ?".to_string());
            params.push(status.into());
        }
        if let Some(date_from) = call.arg_date_from() {
            conditions.push(format!("d.{date_column} >= ?"));
            params.push(date_from.into());
        }
        if let Some(date_to) = call.arg_date_to() {
            conditions.push(format!("d.{date_column} <= ?"));
            params.push(date_to.into());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        params.push(self.limit_of(call).into());

        let statement = format!(
            "SELECT d.id, d.document_number, p.name AS partner_name, d.status,
                    d.{date_column}, d.total_amount, d.currency
             FROM {table} d
             JOIN partners p ON p.id = d.partner_id{where_clause}
             ORDER BY d.{date_column} DESC
             LIMIT ?"
        );
        self.rows_result(&statement, params).await
    }

    async fn get_invoices(&self, call: &ToolCall) -> ToolResult {
        let mut conditions = Vec::new();
        let mut params: Vec<QueryParam> = Vec::new();

        if let Some(partner_id) = call.arg_i64("partner_id") {
            conditions.push("i.partner_id = ?".to_string());
            params.push(partner_id.into());
        }
        if let Some(date_from) = call.arg_date_from() {
            conditions.push("i.invoice_date >= ?".to_string());
            params.push(date_from.into());
        }
        if let Some(date_to) = call.arg_date_to() {
            conditions.push("i.invoice_date <= ?".to_string());
            params.push(date_to.into());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        params.push(self.limit_of(call).into());

        let statement = format!(
            "SELECT i.id, i.document_number, p.name AS partner_name, i.invoice_date,
                    i.due_date, i.total_amount, i.currency, i.paid
             FROM invoices i
             JOIN partners p ON p.id = i.partner_id{where_clause}
             ORDER BY i.invoice_date DESC
             LIMIT ?"
        );
        self.rows_result(&statement, params).await
    }

    async fn get_stock_levels(&self, call: &ToolCall) -> ToolResult {
        let mut conditions = Vec::new();
        let mut params: Vec<QueryParam> = Vec::new();

        if let Some(search) = call.arg_str("article_search") {
            conditions.push("(article_name LIKE ? OR article_code LIKE ?)");
            let pattern = format!("%{search}%");
            params.push(pattern.clone().into());
            params.push(pattern.into());
        }
        if let Some(warehouse) = call.arg_str("warehouse") {
            conditions.push("warehouse = ?");
            params.push(warehouse.into());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        params.push(self.limit_of(call).into());

        let statement = format!(
            "SELECT article_code, article_name, warehouse, quantity, unit
             FROM stock_items{where_clause}
             ORDER BY article_name
             LIMIT ?"
        );
        self.rows_result(&statement, params).await
    }

    async fn count_records(&self, call: &ToolCall) -> ToolResult {
        let Some(requested) = call.arg_str("table") else {
            return ToolResult::failure("count_records requires a `table` argument");
        };
        let Some(table) = tools::countable_table(&requested) else {
            return ToolResult::failure(format!(
                "table `{requested}` is not countable (allowed: {})",
                tools::COUNTABLE_TABLES.join(", ")
            ));
        };

        let mut statement = format!("SELECT COUNT(*) AS count FROM {table}");
        if let Some(clause) = call.arg_str("where_clause") {
            if let Err(violation) = safety::validate_where_clause(&clause) {
                return ToolResult::failure(violation.to_string());
            }
            statement.push_str(&format!(" WHERE {clause}"));
        }

        match self.read_store.query(&statement, &[]).await {
            Ok(rows) => {
                let count = rows
                    .first()
                    .and_then(|row| row.get("count"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                ToolResult::ok(json!({"table": table, "count": count}))
            }
            Err(err) => ToolResult::failure(format!("query failed: {err}")),
        }
    }

    async fn list_emails(&self, call: &ToolCall, requested_by: &str) -> ToolResult {
        let mut conditions = Vec::new();
        let mut params: Vec<QueryParam> = Vec::new();

        if let Some(status) = call.arg_str("status") {
            conditions.push("status = ?".to_string());
            params.push(status.into());
        } else if !call.arg_bool("all_statuses") {
            // Unfiltered listings default to unprocessed mail.
            conditions.push("status = 'New'".to_string());
        }
        if call.arg_bool("own_only") {
            conditions.push("recipient = ?".to_string());
            params.push(requested_by.to_string().into());
        }
        if let Some(category) = call.arg_str("category") {
            conditions.push("category = ?".to_string());
            params.push(category.into());
        }
        if let Some(project_id) = call.arg_i64("project_id") {
            conditions.push("project_id = ?".to_string());
            params.push(project_id.into());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        params.push(self.limit_of(call).into());

        let statement = format!(
            "SELECT id, sender, recipient, subject, category, status, project_id, received_at
             FROM emails{where_clause}
             ORDER BY received_at DESC
             LIMIT ?"
        );
        self.rows_result(&statement, params).await
    }

    async fn get_email_details(&self, call: &ToolCall) -> ToolResult {
        let Some(email_id) = call.arg_i64("email_id") else {
            return ToolResult::failure("get_email_details requires an `email_id` argument");
        };

        match self
            .read_store
            .query(
                "SELECT id, sender, recipient, subject, body, category, status, project_id, received_at
                 FROM emails WHERE id = ?",
                &[email_id.into()],
            )
            .await
        {
            Ok(mut rows) if !rows.is_empty() => ToolResult::ok(Value::Object(rows.remove(0))),
            Ok(_) => ToolResult::failure(format!("email {email_id} not found")),
            Err(err) => ToolResult::failure(format!("query failed: {err}")),
        }
    }

    async fn run_custom_query(&self, call: &ToolCall) -> ToolResult {
        let Some(query) = call.arg_str("query") else {
            return ToolResult::failure("run_custom_query requires a `query` argument");
        };

        let statement = match safety::prepare_read_statement(&query, safety::READ_ROW_CEILING) {
            Ok(statement) => statement,
            Err(violation) => {
                warn!(event_name = "gateway.query_rejected", reason = %violation);
                return ToolResult::failure(violation.to_string());
            }
        };

        self.rows_result(&statement, Vec::new()).await
    }

    async fn stage_write(&self, tool: ToolName, call: &ToolCall, requested_by: &str) -> ToolResult {
        if let Some(missing) = missing_write_argument(tool, call) {
            return ToolResult::failure(format!("{tool} requires a `{missing}` argument"));
        }

        let action = NewPendingAction {
            tool_name: tool.as_str().to_string(),
            arguments: call.arguments.clone(),
            description: tools::write_description(tool, call),
            requested_by: requested_by.to_string(),
        };

        match self.pending_store.create(action).await {
            Ok(staged) => {
                info!(
                    event_name = "gateway.action_staged",
                    action_id = %staged.id,
                    tool = %tool,
                );
                ToolResult::staged(staged)
            }
            Err(err) => ToolResult::failure(format!("could not stage action: {err}")),
        }
    }

    async fn escalate(&self, tool: ToolName, call: &ToolCall) -> ToolResult {
        let Some(scriptwriter) = &self.scriptwriter else {
            return ToolResult::failure("escalation tools are not configured");
        };
        let Some(task) = call.arg_str("task_description") else {
            return ToolResult::failure(format!("{tool} requires a `task_description` argument"));
        };
        let context = call.arg_str("context").unwrap_or_default();

        match tool {
            ToolName::RequestCustomReport => {
                let statement = match scriptwriter.author_report_query(&task, &context).await {
                    Ok(statement) => statement,
                    Err(err) => return ToolResult::failure(err.to_string()),
                };
                match self.read_store.query(&statement, &[]).await {
                    Ok(rows) => {
                        let count = rows.len();
                        ToolResult::ok(json!({
                            "query": statement,
                            "rows": rows,
                            "count": count,
                        }))
                    }
                    Err(err) => ToolResult::failure(format!("report query failed: {err}")),
                }
            }
            ToolName::RequestDataAnalysis => {
                let script = match scriptwriter.author_analysis_script(&task, &context).await {
                    Ok(script) => script,
                    Err(err) => return ToolResult::failure(err.to_string()),
                };
                let bridge = Arc::new(StoreQueryBridge::new(Arc::clone(&self.read_store)));
                match self.sandbox.run(&script, bridge).await {
                    Ok(run) => ToolResult::ok(json!({
                        "result": run.value,
                        "stdout": run.stdout,
                    })),
                    Err(err) => ToolResult::failure(err.to_string()),
                }
            }
            _ => ToolResult::failure(format!("`{tool}` is not an escalation tool")),
        }
    }

    /// Execute an already-confirmed action against the record store.
    ///
    /// Callers guarantee the confirm transition happened; this does not check
    /// status again.
    pub async fn execute_confirmed(&self, action: &PendingAction) -> ToolResult {
        let Some(tool) = ToolName::resolve(&action.tool_name) else {
            return ToolResult::failure(format!("unknown tool `{}`", action.tool_name));
        };
        let call = ToolCall::new(action.tool_name.clone(), action.arguments.clone());

        match tool {
            ToolName::CreateProject => {
                let Some(name) = call.arg_str("name") else {
                    return ToolResult::failure("create_project requires a `name` argument");
                };
                let phase = call.arg_str("phase").unwrap_or_else(|| "RFQ".to_string());
                let notes = call.arg_str("notes").unwrap_or_default();
                match self
                    .record_store
                    .create_project(&name, call.arg_i64("customer_id"), &phase, &notes)
                    .await
                {
                    Ok(project) => ToolResult::ok(json!({
                        "project_id": project.id,
                        "code": project.code,
                    })),
                    Err(err) => ToolResult::failure(err.to_string()),
                }
            }
            ToolName::UpdateProject => {
                let Some(project_id) = call.arg_i64("project_id") else {
                    return ToolResult::failure("update_project requires a `project_id` argument");
                };
                let mut changes: Map<String, Value> = call.arguments.clone();
                changes.remove("project_id");
                match self.record_store.update_project(project_id, &changes).await {
                    Ok(applied) => ToolResult::ok(json!({
                        "project_id": project_id,
                        "applied": applied,
                    })),
                    Err(err) => ToolResult::failure(err.to_string()),
                }
            }
            ToolName::CreateWorkOrder => {
                let Some(project_id) = call.arg_i64("project_id") else {
                    return ToolResult::failure(
                        "create_work_order requires a `project_id` argument",
                    );
                };
                let Some(quantity) = call.arg_i64("quantity") else {
                    return ToolResult::failure("create_work_order requires a `quantity` argument");
                };
                match self
                    .record_store
                    .create_work_order(project_id, call.arg_str("article"), quantity)
                    .await
                {
                    Ok(work_order_id) => ToolResult::ok(json!({"work_order_id": work_order_id})),
                    Err(err) => ToolResult::failure(err.to_string()),
                }
            }
            ToolName::AssignEmailToProject => {
                let (Some(email_id), Some(project_id)) =
                    (call.arg_i64("email_id"), call.arg_i64("project_id"))
                else {
                    return ToolResult::failure(
                        "assign_email_to_project requires `email_id` and `project_id` arguments",
                    );
                };
                match self.record_store.assign_email_to_project(email_id, project_id).await {
                    Ok(()) => ToolResult::ok(json!({
                        "email_id": email_id,
                        "project_id": project_id,
                    })),
                    Err(err) => ToolResult::failure(err.to_string()),
                }
            }
            other => ToolResult::failure(format!("`{other}` is not a confirmable write tool")),
        }
    }
}

fn missing_write_argument(tool: ToolName, call: &ToolCall) -> Option<&'static str> {
    match tool {
        ToolName::CreateProject if call.arg_str("name").is_none() => Some("name"),
        ToolName::UpdateProject if call.arg_i64("project_id").is_none() => Some("project_id"),
        ToolName::CreateWorkOrder if call.arg_i64("project_id").is_none() => Some("project_id"),
        ToolName::CreateWorkOrder if call.arg_i64("quantity").is_none() => Some("quantity"),
        ToolName::AssignEmailToProject if call.arg_i64("email_id").is_none() => Some("email_id"),
        ToolName::AssignEmailToProject if call.arg_i64("project_id").is_none() => {
            Some("project_id")
        }
        _ => None,
    }
}
