use std::fmt::Debug;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SlotdAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, AvailabilityFilter, Command};
use crate::tenant::TenantManager;

pub struct SlotdHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SlotdQueryParser>,
}

impl SlotdHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SlotdQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            // ── Catalog ──────────────────────────────────
            Command::InsertService {
                id,
                name,
                duration,
                price,
            } => {
                engine
                    .create_service(id, name, duration, price)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteService { id } => {
                engine.retire_service(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertStaff { id, name } => {
                engine.create_staff(id, name).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteStaff { id } => {
                engine.deactivate_staff(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            // ── Availability calendar ────────────────────
            Command::InsertAvailability {
                id,
                staff_id,
                date,
                day_off,
                slots,
            } => {
                engine
                    .create_day(id, staff_id, date, day_off, slots)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateAvailability { id, day_off, slots } => {
                engine
                    .update_day(id, day_off, slots)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteAvailability { id } => {
                engine.trash_day(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::RestoreAvailability { id } => {
                engine.restore_day(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("RESTORE").with_rows(1))])
            }
            Command::PurgeAvailability { id } => {
                engine.purge_day(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("PURGE").with_rows(1))])
            }
            // ── Booking ledger ───────────────────────────
            Command::InsertBooking { request } => {
                engine.create_booking(request).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateBooking { id, patch } => {
                engine
                    .update_booking(id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteBooking { id } => {
                engine.trash_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::RestoreBooking { id } => {
                engine.restore_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("RESTORE").with_rows(1))])
            }
            Command::PurgeBooking { id } => {
                engine.purge_booking(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("PURGE").with_rows(1))])
            }
            // ── Reads ────────────────────────────────────
            Command::SelectServices => {
                let schema = Arc::new(services_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_services()
                    .into_iter()
                    .map(|s| encode_service_row(schema.clone(), &s))
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectStaff => {
                let schema = Arc::new(staff_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_staff()
                    .into_iter()
                    .map(|s| encode_staff_row(schema.clone(), &s))
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailability { filter } => {
                let days = self.lookup_days(engine, &filter).await?;
                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = days
                    .iter()
                    .map(|d| encode_day_row(schema.clone(), d))
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings { filter } => {
                let bookings = engine.list_bookings(&filter).await;
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .iter()
                    .map(|b| encode_booking_row(schema.clone(), b))
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailableStaff {
                date,
                start,
                service_id,
            } => {
                let staff = engine
                    .query_available_staff(date, start, service_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(staff_schema());
                let rows: Vec<PgWireResult<_>> = staff
                    .iter()
                    .map(|s| encode_staff_row(schema.clone(), s))
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
        }
    }

    async fn lookup_days(
        &self,
        engine: &Engine,
        filter: &AvailabilityFilter,
    ) -> PgWireResult<Vec<AvailabilityDay>> {
        if filter.trashed {
            return Ok(engine.list_trashed_days().await);
        }
        if let Some(id) = filter.id {
            return engine.get_day_by_id(id).await.map(|d| vec![d]).map_err(engine_err);
        }
        match (filter.staff_id, filter.date) {
            (Some(staff_id), Some(date)) => engine
                .get_day(staff_id, date)
                .await
                .map(|d| vec![d])
                .map_err(engine_err),
            (Some(staff_id), None) => Ok(engine.list_days_for_staff(staff_id).await),
            _ => Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "42601".into(),
                "availability lookup needs id, staff_id or deleted_at IS NOT NULL".into(),
            )))),
        }
    }
}

// ── Result schemas & row encoding ────────────────────────────────

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn services_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("name"),
        int8("duration"),
        int8("price"),
        boolean("active"),
    ]
}

fn staff_schema() -> Vec<FieldInfo> {
    vec![varchar("id"), varchar("name"), boolean("active")]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("staff_id"),
        varchar("date"),
        boolean("day_off"),
        varchar("slots"),
        int8("deleted_at"),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("reference"),
        varchar("customer_name"),
        varchar("customer_mobile"),
        varchar("customer_email"),
        varchar("staff_id"),
        varchar("service_id"),
        varchar("date"),
        varchar("start_time"),
        varchar("end_time"),
        varchar("status"),
        int8("price"),
        varchar("notes"),
        int8("deleted_at"),
    ]
}

fn encode_service_row(
    schema: Arc<Vec<FieldInfo>>,
    service: &Service,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema);
    encoder.encode_field(&service.id.to_string())?;
    encoder.encode_field(&service.name)?;
    encoder.encode_field(&service.duration_min)?;
    encoder.encode_field(&service.price)?;
    encoder.encode_field(&service.active)?;
    Ok(encoder.take_row())
}

fn encode_staff_row(
    schema: Arc<Vec<FieldInfo>>,
    staff: &Staff,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema);
    encoder.encode_field(&staff.id.to_string())?;
    encoder.encode_field(&staff.name)?;
    encoder.encode_field(&staff.active)?;
    Ok(encoder.take_row())
}

fn encode_day_row(
    schema: Arc<Vec<FieldInfo>>,
    day: &AvailabilityDay,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema);
    encoder.encode_field(&day.id.to_string())?;
    encoder.encode_field(&day.staff_id.to_string())?;
    encoder.encode_field(&day.date.to_string())?;
    encoder.encode_field(&day.is_day_off)?;
    encoder.encode_field(&slots_to_json(&day.slots))?;
    encoder.encode_field(&day.deleted_at)?;
    Ok(encoder.take_row())
}

fn encode_booking_row(
    schema: Arc<Vec<FieldInfo>>,
    booking: &Booking,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema);
    encoder.encode_field(&booking.id.to_string())?;
    encoder.encode_field(&booking.reference)?;
    encoder.encode_field(&booking.customer.name)?;
    encoder.encode_field(&booking.customer.mobile)?;
    encoder.encode_field(&booking.customer.email)?;
    encoder.encode_field(&booking.staff_id.to_string())?;
    encoder.encode_field(&booking.service_id.to_string())?;
    encoder.encode_field(&booking.date.to_string())?;
    encoder.encode_field(&format_hhmm(booking.range.start))?;
    encoder.encode_field(&format_hhmm(booking.range.end))?;
    encoder.encode_field(&booking.status.as_str())?;
    encoder.encode_field(&booking.price)?;
    encoder.encode_field(&booking.notes)?;
    encoder.encode_field(&booking.deleted_at)?;
    Ok(encoder.take_row())
}

fn slots_to_json(slots: &[TimeSlot]) -> String {
    let arr: Vec<serde_json::Value> = slots
        .iter()
        .map(|s| {
            serde_json::json!({
                "start": format_hhmm(s.range.start),
                "end": format_hhmm(s.range.end),
                "is_booked": s.is_booked,
            })
        })
        .collect();
    serde_json::Value::Array(arr).to_string()
}

// ── Simple Query Protocol ────────────────────────────────────────

#[async_trait]
impl SimpleQueryHandler for SlotdHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = observability::command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.execute_command(&engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotdQueryParser;

#[async_trait]
impl QueryParser for SlotdQueryParser {
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
        Ok(guess_result_schema(stmt))
    }
}

/// Describe responses only need the shape, not the data — pick the schema by
/// table keyword. `available_staff` must be checked before `staff`.
fn guess_result_schema(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABLE_STAFF") {
        staff_schema()
    } else if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("BOOKINGS") {
        bookings_schema()
    } else if upper.contains("SERVICES") {
        services_schema()
    } else if upper.contains("STAFF") {
        staff_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotdHandler {
    type Statement = String;
    type QueryParser = SlotdQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, cmd).await?;
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
            guess_result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(guess_result_schema(
            &target.statement.statement,
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
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
                && n > max
            {
                max = n;
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
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

// ── Connection plumbing ──────────────────────────────────────────

pub struct SlotdFactory {
    handler: Arc<SlotdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SlotdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotdFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = SlotdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotdHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotdFactory {
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

/// Drive one client connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = SlotdFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

/// Each admission outcome gets its own SQLSTATE so callers can tell a
/// `SlotConflict` from `NoAvailability` from a missing service without
/// string-matching. Internal failures are logged and surfaced generically.
fn engine_err(e: EngineError) -> PgWireError {
    let (code, message) = match &e {
        EngineError::Validation(_) => ("22023", e.to_string()),
        EngineError::NotFound(_) => ("42704", e.to_string()),
        EngineError::AlreadyExists(_) => ("23505", e.to_string()),
        EngineError::ServiceNotFound(_) => ("42704", e.to_string()),
        EngineError::StaffNotFound(_) => ("42704", e.to_string()),
        EngineError::NoAvailability => ("P0002", e.to_string()),
        EngineError::SlotConflict(_) => ("23P01", e.to_string()),
        EngineError::LimitExceeded(_) => ("54000", e.to_string()),
        EngineError::WalError(detail) => {
            tracing::error!("persistence failure: {detail}");
            ("XX000", "internal server error".to_string())
        }
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
