use rmcp::ErrorData as McpError;
use rmcp::model::CallToolResult;

use super::*;
use crate::action::ActionId;
use crate::replay::ReplayReport;

pub(super) fn handle_list_history(server: &MetaRemoteServer) -> Result<CallToolResult, McpError> {
    let actions = server.engine().list_actions();
    json_result(&serde_json::json!({
        "count": actions.len(),
        "max_items": server.engine().max_history_items(),
        "actions": actions,
    }))
}

pub(super) fn handle_get_history_action(
    server: &MetaRemoteServer,
    params: ActionIdParams,
) -> Result<CallToolResult, McpError> {
    let id = ActionId::from(params.action_id.trim());
    let action = server
        .engine()
        .get_action_details(&id)
        .map_err(history_error)?;
    json_result(&action)
}

async fn replay(
    server: &MetaRemoteServer,
    params: ActionIdParams,
    undo: bool,
) -> Result<CallToolResult, McpError> {
    let id = ActionId::from(params.action_id.trim());
    let engine = server.engine().clone();
    let report: ReplayReport = blocking(move || {
        let result = if undo { engine.undo(&id) } else { engine.redo(&id) };
        result.map_err(history_error)
    })
    .await?;
    outcome_result(&report.outcome, &report)
}

pub(super) async fn handle_undo_action(
    server: &MetaRemoteServer,
    params: ActionIdParams,
) -> Result<CallToolResult, McpError> {
    replay(server, params, true).await
}

pub(super) async fn handle_redo_action(
    server: &MetaRemoteServer,
    params: ActionIdParams,
) -> Result<CallToolResult, McpError> {
    replay(server, params, false).await
}

pub(super) fn handle_clear_history(server: &MetaRemoteServer) -> Result<CallToolResult, McpError> {
    let cleared = server.engine().clear_history();
    json_result(&serde_json::json!({
        "cleared": cleared,
        "message": format!("Cleared {cleared} actions"),
    }))
}
