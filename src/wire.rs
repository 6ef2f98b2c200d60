use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures::{Sink, SinkExt, stream};
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{
    AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler,
};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::response::NotificationResponse;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LISTEN_CHANNELS;
use crate::model::*;
use crate::notify::Notification;
use crate::observability;
use crate::sql::{self, Command, ReservationFilter};

/// One client session: the shared engine plus this session's LISTEN set.
pub struct BookdHandler {
    engine: Arc<Engine>,
    query_parser: Arc<BookdQueryParser>,
    listens: Mutex<HashMap<String, broadcast::Receiver<Notification>>>,
}

impl BookdHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(BookdQueryParser),
            listens: Mutex::new(HashMap::new()),
        }
    }

    /// Parse, execute and meter one statement, then hand the client any
    /// notifications that arrived on its channels in the meantime.
    async fn run<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmd = match sql::parse_sql(query) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(observability::QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);

        for (channel, payload) in self.drain_notifications() {
            client
                .send(PgWireBackendMessage::NotificationResponse(
                    NotificationResponse::new(0, channel, payload),
                ))
                .await?;
        }
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertResource { resource } => {
                engine.create_resource(resource).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateResource { id, patch } => {
                engine.update_resource(id, patch).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteResource { id } => {
                engine.delete_resource(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertReservation {
                id,
                resource_id,
                user_id,
                start,
                end,
                event_id,
                initiator,
            } => {
                let span = Span::checked(start, end)
                    .ok_or(EngineError::InvalidInterval { start, end })
                    .map_err(engine_err)?;
                let request = BookingRequest {
                    id,
                    resource_id,
                    user_id,
                    span,
                    event_id,
                    initiator,
                };
                let outcome = engine.book(request).await.map_err(engine_err)?;
                outcome_response(outcome, "INSERT")
            }
            Command::UpdateReservationStatus { id, status } => {
                engine.transition(id, status).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::RescheduleReservation { id, start, end } => {
                let outcome = engine.reschedule(id, start, end).await.map_err(engine_err)?;
                outcome_response(outcome, "UPDATE")
            }
            Command::DeleteReservation { id } => {
                engine.cancel(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectResources {
                id,
                category,
                status,
            } => {
                let resources = match id {
                    Some(id) => engine
                        .get_resource(id)
                        .await
                        .into_iter()
                        .filter(|r| category.is_none_or(|c| c == r.category))
                        .filter(|r| status.is_none_or(|s| s == r.status))
                        .collect(),
                    None => engine.list_resources(category, status).await,
                };
                resource_rows(resources)
            }
            Command::SelectReservations { filter } => {
                let reservations = match filter {
                    ReservationFilter::Id(id) => {
                        engine.get_reservation(id).await.into_iter().collect()
                    }
                    ReservationFilter::Resource(rid) => {
                        engine.list_reservations(rid).await.map_err(engine_err)?
                    }
                    ReservationFilter::User(uid) => engine.list_user_reservations(uid).await,
                };
                reservation_rows(reservations)
            }
            Command::SelectConflicts {
                resource_id,
                start,
                end,
                exclude_id,
            } => {
                let conflicts = engine
                    .detect_conflicts(resource_id, start, end, exclude_id)
                    .await
                    .map_err(engine_err)?;
                conflict_rows(conflicts)
            }
            Command::SelectAlternatives {
                resource_id,
                start,
                end,
            } => {
                let alternatives = engine
                    .find_alternatives(resource_id, start, end)
                    .await
                    .map_err(engine_err)?;
                resource_rows(alternatives)
            }
            Command::Listen { channel } => {
                let resource_id = channel_resource_id(&channel)?;
                if engine.get_resource(resource_id).await.is_none() {
                    return Err(engine_err(EngineError::ResourceNotFound(resource_id)));
                }
                let mut listens = self.listens.lock().map_err(|_| poisoned())?;
                if !listens.contains_key(&channel) {
                    if listens.len() >= MAX_LISTEN_CHANNELS {
                        return Err(user_error(
                            "54000",
                            format!("too many LISTEN channels (max {MAX_LISTEN_CHANNELS})"),
                        ));
                    }
                    let rx = engine.notify.subscribe(resource_id);
                    listens.insert(channel, rx);
                }
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten { channel } => {
                self.listens
                    .lock()
                    .map_err(|_| poisoned())?
                    .remove(&channel);
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
            Command::UnlistenAll => {
                self.listens.lock().map_err(|_| poisoned())?.clear();
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
        }
    }

    /// Everything queued on this session's channels, as `(channel, json)`.
    /// Channels whose resource was deleted are dropped.
    fn drain_notifications(&self) -> Vec<(String, String)> {
        let Ok(mut listens) = self.listens.lock() else {
            return Vec::new();
        };
        let mut pending = Vec::new();
        let mut closed = Vec::new();
        for (channel, rx) in listens.iter_mut() {
            loop {
                match rx.try_recv() {
                    Ok(n) => pending.push((channel.clone(), n.to_json())),
                    Err(broadcast::error::TryRecvError::Empty) => break,
                    Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                        tracing::warn!("{channel}: listener lagged, {skipped} notifications dropped");
                    }
                    Err(broadcast::error::TryRecvError::Closed) => {
                        closed.push(channel.clone());
                        break;
                    }
                }
            }
        }
        for channel in closed {
            listens.remove(&channel);
        }
        pending
    }
}

fn channel_resource_id(channel: &str) -> PgWireResult<Ulid> {
    let id = channel.strip_prefix("resource_").ok_or_else(|| {
        user_error(
            "42000",
            format!("invalid channel: {channel} (expected resource_{{id}})"),
        )
    })?;
    Ulid::from_string(id).map_err(|e| user_error("42000", format!("bad ULID in channel: {e}")))
}

fn outcome_response(outcome: BookingOutcome, tag: &str) -> PgWireResult<Vec<Response>> {
    match outcome {
        BookingOutcome::Confirmed(_) => Ok(vec![Response::Execution(Tag::new(tag).with_rows(1))]),
        BookingOutcome::Conflict {
            conflicts,
            alternatives,
        } => Err(conflict_err(&conflicts, &alternatives)),
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn resource_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("category", Type::VARCHAR),
        text_field("capacity", Type::INT8),
        text_field("location", Type::VARCHAR),
        text_field("status", Type::VARCHAR),
        text_field("attributes", Type::VARCHAR),
        text_field("created_at", Type::INT8),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("resource_id", Type::VARCHAR),
        text_field("user_id", Type::VARCHAR),
        text_field("start", Type::INT8),
        text_field("end", Type::INT8),
        text_field("status", Type::VARCHAR),
        text_field("event_id", Type::VARCHAR),
        text_field("created_at", Type::INT8),
    ]
}

fn conflict_schema() -> Vec<FieldInfo> {
    vec![
        text_field("reservation_id", Type::VARCHAR),
        text_field("resource_id", Type::VARCHAR),
        text_field("resource_name", Type::VARCHAR),
        text_field("user_id", Type::VARCHAR),
        text_field("start", Type::INT8),
        text_field("end", Type::INT8),
        text_field("status", Type::VARCHAR),
    ]
}

/// Result schema for a statement, judged from the table it reads.
fn result_schema_for(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.trim_start().starts_with("SELECT") {
        return vec![];
    }
    if upper.contains("FROM RESERVATIONS") {
        reservation_schema()
    } else if upper.contains("FROM CONFLICTS") {
        conflict_schema()
    } else if upper.contains("FROM RESOURCES") || upper.contains("FROM ALTERNATIVES") {
        resource_schema()
    } else {
        vec![]
    }
}

fn resource_rows(resources: Vec<Resource>) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(resource_schema());
    let rows: Vec<PgWireResult<_>> = resources
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.name)?;
            encoder.encode_field(&r.category.to_string())?;
            encoder.encode_field(&i64::from(r.capacity))?;
            encoder.encode_field(&r.location)?;
            encoder.encode_field(&r.status.to_string())?;
            encoder.encode_field(&serde_json::to_string(&r.attributes).unwrap_or_default())?;
            encoder.encode_field(&r.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(vec![Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    ))])
}

fn reservation_rows(reservations: Vec<Reservation>) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<_>> = reservations
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.resource_id.to_string())?;
            encoder.encode_field(&r.user_id.to_string())?;
            encoder.encode_field(&r.span.start)?;
            encoder.encode_field(&r.span.end)?;
            encoder.encode_field(&r.status.to_string())?;
            encoder.encode_field(&r.event_id.map(|e| e.to_string()))?;
            encoder.encode_field(&r.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(vec![Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    ))])
}

fn conflict_rows(conflicts: Vec<ConflictInfo>) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(conflict_schema());
    let rows: Vec<PgWireResult<_>> = conflicts
        .into_iter()
        .map(|c| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&c.reservation.id.to_string())?;
            encoder.encode_field(&c.reservation.resource_id.to_string())?;
            encoder.encode_field(&c.resource_name)?;
            encoder.encode_field(&c.user_id.to_string())?;
            encoder.encode_field(&c.reservation.span.start)?;
            encoder.encode_field(&c.reservation.span.end)?;
            encoder.encode_field(&c.reservation.status.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(vec![Response::Query(QueryResponse::new(
        schema,
        stream::iter(rows),
    ))])
}

#[async_trait]
impl SimpleQueryHandler for BookdHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BookdQueryParser;

#[async_trait]
impl QueryParser for BookdQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for BookdHandler {
    type Statement = String;
    type QueryParser = BookdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let mut responses = self.run(client, &sql).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema_for(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema_for(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

/// Every user name logs in with the one configured password.
#[derive(Debug)]
struct SharedPassword(Vec<u8>);

#[async_trait]
impl AuthSource for SharedPassword {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.0.clone()))
    }
}

/// Handlers for one connection. LISTEN state lives in the handler, so every
/// connection gets its own factory.
pub struct BookdFactory {
    handler: Arc<BookdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SharedPassword, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl BookdFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = SharedPassword(password.into_bytes());
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(BookdHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BookdFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = BookdFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn poisoned() -> PgWireError {
    user_error("XX000", "session state poisoned".into())
}

/// SQLSTATE for an engine failure.
fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::ResourceNotFound(_) | EngineError::ReservationNotFound(_) => "P0002",
        EngineError::InvalidInterval { .. } => "22007",
        EngineError::InvalidTransition { .. }
        | EngineError::InvalidInitialStatus(_)
        | EngineError::ReservationCancelled(_) => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Persistence(_) => "58030",
        EngineError::ResourceUnavailable { .. } | EngineError::HasActiveReservations(_) => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn conflict_message(conflicts: &[ConflictInfo], alternatives: &[Resource]) -> String {
    let conflict_ids: Vec<String> = conflicts
        .iter()
        .map(|c| c.reservation.id.to_string())
        .collect();
    let alternative_ids: Vec<String> = alternatives.iter().map(|r| r.id.to_string()).collect();
    format!(
        "booking conflict: conflicts=[{}] alternatives=[{}]",
        conflict_ids.join(","),
        alternative_ids.join(",")
    )
}

fn conflict_err(conflicts: &[ConflictInfo], alternatives: &[Resource]) -> PgWireError {
    user_error("23P01", conflict_message(conflicts, alternatives))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlstates() {
        let id = Ulid::new();
        assert_eq!(engine_sqlstate(&EngineError::ResourceNotFound(id)), "P0002");
        assert_eq!(
            engine_sqlstate(&EngineError::InvalidInterval { start: 2, end: 1 }),
            "22007"
        );
        assert_eq!(
            engine_sqlstate(&EngineError::InvalidTransition {
                id,
                from: ReservationStatus::Cancelled,
                to: ReservationStatus::Confirmed,
            }),
            "55000"
        );
        assert_eq!(engine_sqlstate(&EngineError::LimitExceeded("x")), "54000");
        assert_eq!(engine_sqlstate(&EngineError::HasActiveReservations(id)), "P0001");
        assert_eq!(engine_sqlstate(&EngineError::AlreadyExists(id)), "23505");
        assert_eq!(
            engine_sqlstate(&EngineError::Persistence("disk full".into())),
            "58030"
        );
    }

    #[test]
    fn conflict_message_lists_both_id_sets() {
        let conflict = ConflictInfo {
            reservation: Reservation {
                id: Ulid::from_parts(1, 1),
                event_id: None,
                resource_id: Ulid::from_parts(1, 2),
                user_id: Ulid::from_parts(1, 3),
                span: Span::new(10, 20),
                status: ReservationStatus::Confirmed,
                created_at: 0,
            },
            resource_name: "Room A".into(),
            user_id: Ulid::from_parts(1, 3),
        };
        let msg = conflict_message(&[conflict.clone()], &[]);
        assert_eq!(
            msg,
            format!(
                "booking conflict: conflicts=[{}] alternatives=[]",
                conflict.reservation.id
            )
        );
    }

    #[test]
    fn channel_names() {
        let id = Ulid::new();
        assert_eq!(channel_resource_id(&format!("resource_{id}")).unwrap(), id);
        assert!(channel_resource_id("bookings").is_err());
        assert!(channel_resource_id("resource_nope").is_err());
    }

    #[test]
    fn schema_follows_table() {
        assert_eq!(result_schema_for("SELECT * FROM reservations WHERE id = $1").len(), 8);
        assert_eq!(result_schema_for("select * from conflicts").len(), 7);
        assert_eq!(result_schema_for("SELECT * FROM alternatives").len(), 8);
        assert!(result_schema_for("DELETE FROM resources WHERE id = $1").is_empty());
    }

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT 1"), 0);
        assert_eq!(count_params("UPDATE reservations SET status = $2 WHERE id = $1"), 2);
        assert_eq!(count_params("... $10 ... $3"), 10);
    }
}
