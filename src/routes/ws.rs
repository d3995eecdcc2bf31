//! WebSocket handler — the editor frame protocol.
//!
//! DESIGN
//! ======
//! On upgrade, builds the editor identity from the query string and enters a
//! `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Relay frames for the joined plan → forward to client
//!
//! Handler functions validate input, call the plan services and return an
//! `Outcome`. Peers never hear from a handler directly: every committed
//! change reaches them through the plan's change relay.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. `plan:join` → snapshot reply, presence heartbeat starts
//! 3. `lease:acquire` → lease handle kept on the session, renewed in the background
//! 4. `plan:part` or close → leases released, presence removed, plan parted

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame, Status};
use crate::services;
use crate::services::layout::{LayoutPattern, UnknownPattern};
use crate::services::lease::LeaseHandle;
use crate::services::plan::{TABLE_RESOURCE, TablePatch};
use crate::services::presence::PresenceHandle;
use crate::services::recommend::SuggestedAction;
use crate::state::{AppState, Area, Editor, Guest, Seat, Table, Venue};

const DEFAULT_DISPLAY_NAME: &str = "Guest";
const DEFAULT_COLOR: &str = "#8a8a8a";

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer turns it into
/// the reply frame.
enum Outcome {
    /// Send done+data to sender only.
    Reply(Data),
    /// Send empty done to sender only.
    Done,
}

// =============================================================================
// SESSION
// =============================================================================

/// Per-connection state: who the editor is, which plan they joined, and
/// the leases and presence they hold there.
pub(crate) struct Session {
    editor: Editor,
    client_tx: mpsc::Sender<Frame>,
    plan_id: Option<Uuid>,
    leases: HashMap<(String, String), LeaseHandle>,
    presence: Option<PresenceHandle>,
}

impl Session {
    pub(crate) fn new(editor: Editor, client_tx: mpsc::Sender<Frame>) -> Self {
        Self { editor, client_tx, plan_id: None, leases: HashMap::new(), presence: None }
    }

    fn client_id(&self) -> Uuid {
        self.editor.client_id
    }

    /// Release everything held in the current plan, then part it.
    async fn leave_plan(&mut self, state: &AppState) {
        let Some(plan_id) = self.plan_id.take() else {
            return;
        };
        let client_id = self.client_id();
        let held: Vec<_> = self.leases.drain().collect();
        for ((resource_type, resource_id), handle) in held {
            if let Err(e) = handle.release().await {
                warn!(error = %e, %plan_id, %client_id, %resource_type, %resource_id, "ws: lease release on part failed");
            }
        }
        if let Some(presence) = self.presence.take() {
            if let Err(e) = presence.leave().await {
                warn!(error = %e, %plan_id, %client_id, "ws: presence leave failed");
            }
        }
        services::plan::part_plan(state, plan_id, client_id).await;
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let editor = editor_from_params(&params);
    ws.on_upgrade(move |socket| run_ws(socket, state, editor))
}

/// Editor identity from `user_id`, `name` and `color`. A missing or
/// malformed `user_id` gets a fresh one.
fn editor_from_params(params: &HashMap<String, String>) -> Editor {
    let user_id = params
        .get("user_id")
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(Uuid::new_v4);
    let display_name = params
        .get("name")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_DISPLAY_NAME);
    let color = params
        .get("color")
        .map(String::as_str)
        .unwrap_or(DEFAULT_COLOR);
    Editor { client_id: Uuid::new_v4(), user_id, display_name: display_name.to_string(), color: color.to_string() }
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, editor: Editor) {
    let client_id = editor.client_id;
    let user_id = editor.user_id;

    // Per-connection channel for relay frames of the joined plan.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(256);

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("client_id", client_id.to_string())
        .with_data("user_id", user_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%client_id, %user_id, name = %editor.display_name, "ws: client connected");
    let mut session = Session::new(editor, client_tx);

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for frame in process_inbound_text(&state, &mut session, &text).await {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    session.leave_plan(&state).await;
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Transport stays in `run_ws`, so tests drive dispatch with a bare session.
pub(crate) async fn process_inbound_text(state: &AppState, session: &mut Session, text: &str) -> Vec<Frame> {
    let client_id = session.client_id();
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Stamp the connection's client id as `from`.
    req.from = Some(client_id.to_string());
    info!(%client_id, id = %req.id, syscall = %req.syscall, status = ?req.status, "ws: recv frame");

    let result = match req.prefix() {
        "plan" => handle_plan(state, session, &req).await,
        "table" => handle_table(state, session, &req).await,
        "lease" => handle_lease(state, session, &req).await,
        "presence" => handle_presence(state, session, &req).await,
        "layout" => handle_layout(state, session, &req).await,
        "conflict" => handle_conflict(state, session, &req).await,
        "recommend" => handle_recommend(state, session, &req).await,
        "guest" => handle_guest(state, session, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    let reply = match result {
        Ok(Outcome::Reply(data)) => req.done_with(data),
        Ok(Outcome::Done) => req.done(),
        Err(err_frame) => err_frame,
    };
    let reply = match session.plan_id {
        Some(plan_id) if reply.plan_id.is_none() => reply.with_plan_id(plan_id),
        _ => reply,
    };
    vec![reply]
}

/// The plan this session works on. Every prefix but `plan:join` needs one.
fn joined(session: &Session, req: &Frame) -> Result<Uuid, Frame> {
    session.plan_id.ok_or_else(|| req.error("must join a plan first"))
}

// =============================================================================
// PLAN HANDLERS
// =============================================================================

async fn handle_plan(state: &AppState, session: &mut Session, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "join" => {
            let Some(plan_id) = req.target_plan() else {
                return Err(req.error("plan_id required"));
            };

            if session.plan_id.is_some() {
                session.leave_plan(state).await;
            }

            let client_id = session.client_id();
            let snapshot = services::plan::join_plan(state, plan_id, client_id, session.client_tx.clone())
                .await
                .map_err(|e| req.error_from(&e))?;
            session.plan_id = Some(plan_id);

            match state.presence.join(plan_id, session.editor.clone()).await {
                Ok(handle) => session.presence = Some(handle),
                Err(e) => warn!(error = %e, %plan_id, %client_id, "ws: presence join failed"),
            }
            let presence = state.presence.list(plan_id).await.unwrap_or_default();
            let leases = state.leases.list(plan_id).await.unwrap_or_default();

            let mut reply = object_data(&snapshot);
            reply.insert("presence".into(), to_json(&presence));
            reply.insert("leases".into(), to_json(&leases));
            Ok(Outcome::Reply(reply))
        }
        "part" => {
            session.leave_plan(state).await;
            Ok(Outcome::Done)
        }
        "venue" => {
            let plan_id = joined(session, req)?;
            let venue = if req.data.contains_key("venue") {
                let venue: Venue = parse(req, "venue")?;
                services::plan::set_venue(state, plan_id, &session.editor, venue).await
            } else {
                services::plan::load_venue(state, plan_id).await
            }
            .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("venue", &venue)))
        }
        "areas" => {
            let plan_id = joined(session, req)?;
            let areas = if req.data.contains_key("areas") {
                let areas: Vec<Area> = parse(req, "areas")?;
                services::plan::set_areas(state, plan_id, &session.editor, areas).await
            } else {
                services::plan::load_areas(state, plan_id).await
            }
            .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("areas", &areas)))
        }
        "seats" => {
            let plan_id = joined(session, req)?;
            let seats = if req.data.contains_key("seats") {
                let seats: Vec<Seat> = parse(req, "seats")?;
                services::plan::set_seats(state, plan_id, &session.editor, seats).await
            } else {
                services::plan::load_seats(state, plan_id).await
            }
            .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("seats", &seats)))
        }
        op => Err(req.error(format!("unknown plan op: {op}"))),
    }
}

// =============================================================================
// TABLE HANDLERS
// =============================================================================

async fn handle_table(state: &AppState, session: &Session, req: &Frame) -> Result<Outcome, Frame> {
    let plan_id = joined(session, req)?;
    let editor = &session.editor;

    match req.op() {
        "list" => {
            let tables = services::plan::load_tables(state, plan_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("tables", &tables)))
        }
        "create" => {
            let table: Table = parse(req, "table")?;
            let table = services::plan::create_table(state, plan_id, editor, table)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("table", &table)))
        }
        "update" => {
            let table_id = require(req, "id")?;
            let patch: TablePatch = parse(req, "patch")?;
            let table = services::plan::update_table(state, plan_id, editor, table_id, &patch)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("table", &table)))
        }
        "delete" => {
            let table_id = require(req, "id")?;
            services::plan::delete_table(state, plan_id, editor, table_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Done)
        }
        "replace" => {
            let tables: Vec<Table> = parse(req, "tables")?;
            let reason = req.str_field("reason").unwrap_or("replace");
            let tables = services::plan::replace_tables(state, plan_id, editor, tables, reason)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("tables", &tables)))
        }
        op => Err(req.error(format!("unknown table op: {op}"))),
    }
}

// =============================================================================
// LEASE HANDLERS
// =============================================================================

async fn handle_lease(state: &AppState, session: &mut Session, req: &Frame) -> Result<Outcome, Frame> {
    let plan_id = joined(session, req)?;
    let client_id = session.client_id();

    if req.op() == "list" {
        let leases = state
            .leases
            .list(plan_id)
            .await
            .map_err(|e| req.error_from(&e))?;
        return Ok(Outcome::Reply(data_of("leases", &leases)));
    }

    let resource_type = req.str_field("resource_type").unwrap_or(TABLE_RESOURCE);
    let resource_id = require(req, "resource_id")?;
    let slot = (resource_type.to_string(), resource_id.to_string());

    match req.op() {
        "acquire" => {
            let handle = state
                .leases
                .hold(plan_id, resource_type, resource_id, &session.editor)
                .await
                .map_err(|e| req.error_from(&e))?;
            let reply = data_of("lease", handle.lease());
            // Re-acquiring replaces the old handle and its renewal task.
            session.leases.insert(slot, handle);
            Ok(Outcome::Reply(reply))
        }
        "renew" => {
            let lease = state
                .leases
                .renew(plan_id, resource_type, resource_id, client_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("lease", &lease)))
        }
        "release" => {
            let released = match session.leases.remove(&slot) {
                Some(handle) => handle.release().await,
                None => {
                    state
                        .leases
                        .release(plan_id, resource_type, resource_id, client_id)
                        .await
                }
            }
            .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("released", &released)))
        }
        op => Err(req.error(format!("unknown lease op: {op}"))),
    }
}

// =============================================================================
// PRESENCE HANDLERS
// =============================================================================

async fn handle_presence(state: &AppState, session: &Session, req: &Frame) -> Result<Outcome, Frame> {
    let plan_id = joined(session, req)?;

    match req.op() {
        "list" => {
            let presence = state
                .presence
                .list(plan_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("presence", &presence)))
        }
        "focus" => {
            let Some(handle) = &session.presence else {
                return Err(req.error("presence not active"));
            };
            let entry = handle
                .focus(req.str_field("active_tab"))
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("entry", &entry)))
        }
        op => Err(req.error(format!("unknown presence op: {op}"))),
    }
}

// =============================================================================
// LAYOUT HANDLERS
// =============================================================================

async fn handle_layout(state: &AppState, session: &Session, req: &Frame) -> Result<Outcome, Frame> {
    let plan_id = joined(session, req)?;
    let editor = &session.editor;

    match req.op() {
        "generate" => {
            let pattern: LayoutPattern = require(req, "pattern")?
                .parse()
                .map_err(|e: UnknownPattern| req.error_from(&e))?;
            let outcome = services::plan::generate_layout(state, plan_id, editor, pattern)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(object_data(&outcome)))
        }
        "undo" => {
            let tables = services::plan::undo(state, plan_id, editor)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("tables", &tables)))
        }
        "redo" => {
            let tables = services::plan::redo(state, plan_id, editor)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("tables", &tables)))
        }
        op => Err(req.error(format!("unknown layout op: {op}"))),
    }
}

// =============================================================================
// CONFLICT + RECOMMENDATION HANDLERS
// =============================================================================

async fn handle_conflict(state: &AppState, session: &Session, req: &Frame) -> Result<Outcome, Frame> {
    let plan_id = joined(session, req)?;

    match req.op() {
        "list" => {
            let conflicts = services::plan::conflicts(state, plan_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("conflicts", conflicts.as_slice())))
        }
        "seats" => {
            let conflicts = services::plan::seat_conflicts(state, plan_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("conflicts", &conflicts)))
        }
        op => Err(req.error(format!("unknown conflict op: {op}"))),
    }
}

async fn handle_recommend(state: &AppState, session: &Session, req: &Frame) -> Result<Outcome, Frame> {
    let plan_id = joined(session, req)?;

    match req.op() {
        "guest" => {
            let guest_id = require(req, "guest_id")?;
            let recommendations = services::plan::recommend_for_guest(state, plan_id, guest_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("recommendations", &recommendations)))
        }
        "fixes" => {
            let actions = services::plan::suggest_fixes(state, plan_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("actions", &actions)))
        }
        "apply" => {
            let action: SuggestedAction = parse(req, "action")?;
            let applied = services::plan::apply_action(state, plan_id, &session.editor, &action)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(object_data(&applied)))
        }
        "auto" => {
            let assigned = services::plan::auto_assign(state, plan_id, &session.editor)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(object_data(&assigned)))
        }
        op => Err(req.error(format!("unknown recommend op: {op}"))),
    }
}

// =============================================================================
// GUEST HANDLERS
// =============================================================================

async fn handle_guest(state: &AppState, session: &Session, req: &Frame) -> Result<Outcome, Frame> {
    let plan_id = joined(session, req)?;
    let writer = Some(session.client_id());

    match req.op() {
        "list" => {
            let guests = state
                .guests
                .list_guests(plan_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("guests", &guests)))
        }
        "import" => {
            let guests: Vec<Guest> = parse(req, "guests")?;
            let imported = state
                .guests
                .import(plan_id, guests, writer)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("imported", &imported)))
        }
        "assign" => {
            let guest_id = require(req, "guest_id")?;
            let guest = state
                .guests
                .update_assignment(plan_id, guest_id, req.str_field("table_ref"), writer)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(data_of("guest", &guest)))
        }
        op => Err(req.error(format!("unknown guest op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn to_json(value: &(impl Serialize + ?Sized)) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_default()
}

fn data_of(key: &str, value: &(impl Serialize + ?Sized)) -> Data {
    let mut data = Data::new();
    data.insert(key.into(), to_json(value));
    data
}

/// Top-level fields of a serialized struct as frame data.
fn object_data(value: &impl Serialize) -> Data {
    match to_json(value) {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => Data::new(),
    }
}

fn parse<T: serde::de::DeserializeOwned>(req: &Frame, key: &str) -> Result<T, Frame> {
    req.parse_field(key).map_err(|e| req.error_from(&e))
}

fn require<'a>(req: &'a Frame, key: &str) -> Result<&'a str, Frame> {
    req.require_str(key).map_err(|e| req.error_from(&e))
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.str_field("code").unwrap_or("-");
        let message = frame.str_field("message").unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
