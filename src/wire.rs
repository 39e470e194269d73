use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::RoombookAuthSource;
use crate::observability;
use crate::service::{BookingService, BookingView, ServiceError};
use crate::sql::{self, Command, ResultShape};
use crate::tenant::TenantManager;

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(RoombookFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

pub struct RoombookHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<RoombookQueryParser>,
}

impl RoombookHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(RoombookQueryParser),
        }
    }

    async fn resolve_service<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<BookingService>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .await
            .map_err(|e| user_error("08006", format!("organization error: {e}")))
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(
        &self,
        service: &BookingService,
        query: &str,
        format: &Format,
    ) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(service, cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        service: &BookingService,
        cmd: Command,
        format: &Format,
    ) -> PgWireResult<Response> {
        let shape = cmd.result_shape();
        match cmd {
            Command::CreateBooking {
                room_id,
                user_id,
                start,
                end,
            } => {
                let id = service
                    .create(room_id, user_id, start, end)
                    .await
                    .map_err(service_err)?;
                rows(shape, format, [id], |enc, id| enc.encode_field(&(id as i64)))
            }
            Command::Transition { id, target } => {
                let booking = service.transition(id, target).await.map_err(service_err)?;
                rows(shape, format, [booking], |enc, b| {
                    enc.encode_field(&(b.id as i64))?;
                    enc.encode_field(&b.status.as_str())
                })
            }
            Command::Urge { id } => {
                let outcome = service.urge(id).await.map_err(service_err)?;
                let message = service.urge_message(outcome);
                rows(shape, format, [(outcome, message)], |enc, (outcome, message)| {
                    enc.encode_field(&outcome.as_str())?;
                    enc.encode_field(&message)
                })
            }
            Command::ListBookings { query } => {
                let page = service.list(&query).await.map_err(service_err)?;
                let total = page.total_count as i64;
                rows(shape, format, page.bookings, |enc, view| {
                    encode_booking(enc, view, total)
                })
            }
            Command::GetBooking { id } => {
                let view = service.get(id).await.map_err(service_err)?;
                rows(shape, format, [view], |enc, view| encode_booking(enc, view, 1))
            }
            Command::UpsertRoom { room } => {
                service.register_room(room).await.map_err(service_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteRoom { id } => {
                let purged = service.delete_room(id).await.map_err(service_err)?;
                tracing::debug!("room {id} deleted with {purged} bookings");
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectRooms => rows(shape, format, service.list_rooms(), |enc, room| {
                enc.encode_field(&(room.id as i64))?;
                enc.encode_field(&room.name)?;
                enc.encode_field(&(room.capacity as i64))?;
                enc.encode_field(&room.location)?;
                enc.encode_field(&room.equipment)?;
                enc.encode_field(&room.description)
            }),
            Command::UpsertUser { user } => {
                service.register_user(user).await.map_err(service_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SelectUsers => rows(shape, format, service.list_users(), |enc, user| {
                enc.encode_field(&(user.id as i64))?;
                enc.encode_field(&user.username)?;
                enc.encode_field(&user.email)?;
                enc.encode_field(&user.is_admin)
            }),
            Command::UserStats { start, end } => {
                let stats = service
                    .user_booking_counts(start, end)
                    .await
                    .map_err(service_err)?;
                rows(shape, format, stats, |enc, s| {
                    enc.encode_field(&(s.user_id as i64))?;
                    enc.encode_field(&s.username)?;
                    enc.encode_field(&(s.count as i64))
                })
            }
            Command::RoomStats { start, end } => {
                let stats = service
                    .room_usage_counts(start, end)
                    .await
                    .map_err(service_err)?;
                rows(shape, format, stats, |enc, s| {
                    enc.encode_field(&(s.room_id as i64))?;
                    enc.encode_field(&s.room_name)?;
                    enc.encode_field(&(s.count as i64))
                })
            }
        }
    }
}

fn encode_booking(enc: &mut DataRowEncoder, view: BookingView, total: i64) -> PgWireResult<()> {
    enc.encode_field(&(view.id as i64))?;
    enc.encode_field(&(view.room_id as i64))?;
    enc.encode_field(&(view.user_id as i64))?;
    enc.encode_field(&view.start)?;
    enc.encode_field(&view.end)?;
    enc.encode_field(&view.status.as_str())?;
    enc.encode_field(&view.created_at)?;
    enc.encode_field(&view.updated_at)?;
    enc.encode_field(&view.user.as_ref().map(|u| u.username.clone()))?;
    enc.encode_field(&view.user.as_ref().map(|u| u.email.clone()))?;
    enc.encode_field(&view.room.as_ref().map(|r| r.name.clone()))?;
    enc.encode_field(&view.room.as_ref().map(|r| r.location.clone()))?;
    enc.encode_field(&total)
}

/// Build a query response of `shape` from `items`.
fn rows<T>(
    shape: ResultShape,
    format: &Format,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema(shape, format));
    let rows: Vec<PgWireResult<DataRow>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn columns(shape: ResultShape) -> Vec<(&'static str, Type)> {
    match shape {
        ResultShape::None => vec![],
        ResultShape::BookingId => vec![("id", Type::INT8)],
        ResultShape::Status => vec![("id", Type::INT8), ("status", Type::VARCHAR)],
        ResultShape::Urge => vec![("outcome", Type::VARCHAR), ("message", Type::VARCHAR)],
        ResultShape::Bookings => vec![
            ("id", Type::INT8),
            ("room_id", Type::INT8),
            ("user_id", Type::INT8),
            ("start", Type::INT8),
            ("end", Type::INT8),
            ("status", Type::VARCHAR),
            ("created_at", Type::INT8),
            ("updated_at", Type::INT8),
            ("username", Type::VARCHAR),
            ("email", Type::VARCHAR),
            ("room_name", Type::VARCHAR),
            ("location", Type::VARCHAR),
            ("total_count", Type::INT8),
        ],
        ResultShape::Rooms => vec![
            ("id", Type::INT8),
            ("name", Type::VARCHAR),
            ("capacity", Type::INT8),
            ("location", Type::VARCHAR),
            ("equipment", Type::VARCHAR),
            ("description", Type::VARCHAR),
        ],
        ResultShape::Users => vec![
            ("id", Type::INT8),
            ("username", Type::VARCHAR),
            ("email", Type::VARCHAR),
            ("is_admin", Type::BOOL),
        ],
        ResultShape::UserStats => vec![
            ("user_id", Type::INT8),
            ("username", Type::VARCHAR),
            ("booking_count", Type::INT8),
        ],
        ResultShape::RoomStats => vec![
            ("room_id", Type::INT8),
            ("room_name", Type::VARCHAR),
            ("usage_count", Type::INT8),
        ],
    }
}

fn schema(shape: ResultShape, format: &Format) -> Vec<FieldInfo> {
    columns(shape)
        .into_iter()
        .enumerate()
        .map(|(i, (name, ty))| FieldInfo::new(name.into(), None, None, ty, format.format_for(i)))
        .collect()
}

#[async_trait]
impl SimpleQueryHandler for RoombookHandler {
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
        let service = self.resolve_service(client).await?;
        let response = self.run(&service, query, &Format::UnifiedText).await?;
        Ok(vec![response])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoombookQueryParser;

#[async_trait]
impl QueryParser for RoombookQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        let format = column_format.unwrap_or(&Format::UnifiedText);
        Ok(schema(sql::result_shape(stmt), format))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoombookHandler {
    type Statement = String;
    type QueryParser = RoombookQueryParser;

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
        let service = self.resolve_service(client).await?;
        let sql = substitute_params(portal);
        self.run(&service, &sql, &portal.result_column_format).await
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
        let fields = schema(sql::result_shape(&target.statement), &Format::UnifiedText);
        Ok(DescribeStatementResponse::new(param_types, fields))
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
        let shape = sql::result_shape(&target.statement.statement);
        Ok(DescribePortalResponse::new(schema(
            shape,
            &target.result_column_format,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    max = max.max(n);
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let values: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute(&portal.statement.statement, &values)
}

/// Single pass over the statement text: each `$<digits>` token is read whole
/// and replaced once, so bound values are never rescanned.
fn substitute(sql: &str, values: &[Option<String>]) -> String {
    let bytes = sql.as_bytes();
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        let bound = sql[start..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| values.get(idx));
        if let Some(value) = bound {
            result.push_str(&sql[copied..i]);
            match value {
                Some(text) => {
                    result.push('\'');
                    result.push_str(&text.replace('\'', "''"));
                    result.push('\'');
                }
                None => result.push_str("NULL"),
            }
            copied = end;
        }
        i = end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoombookFactory {
    handler: Arc<RoombookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<RoombookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RoombookFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = RoombookAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoombookHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoombookFactory {
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

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn service_err(e: ServiceError) -> PgWireError {
    user_error(e.sqlstate(), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error(e.sqlstate(), e.to_string())
}
