use serde::Deserialize;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::BookingFilter;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertService {
        id: Ulid,
        name: String,
        duration: Minute,
        price: i64,
    },
    DeleteService {
        id: Ulid,
    },
    InsertStaff {
        id: Ulid,
        name: String,
    },
    DeleteStaff {
        id: Ulid,
    },
    InsertAvailability {
        id: Ulid,
        staff_id: Ulid,
        date: DayDate,
        day_off: bool,
        slots: Vec<TimeSlot>,
    },
    UpdateAvailability {
        id: Ulid,
        day_off: Option<bool>,
        slots: Option<Vec<TimeSlot>>,
    },
    DeleteAvailability {
        id: Ulid,
    },
    RestoreAvailability {
        id: Ulid,
    },
    PurgeAvailability {
        id: Ulid,
    },
    InsertBooking {
        request: BookingRequest,
    },
    UpdateBooking {
        id: Ulid,
        patch: BookingPatch,
    },
    DeleteBooking {
        id: Ulid,
    },
    RestoreBooking {
        id: Ulid,
    },
    PurgeBooking {
        id: Ulid,
    },
    SelectServices,
    SelectStaff,
    SelectAvailability {
        filter: AvailabilityFilter,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    SelectAvailableStaff {
        date: DayDate,
        start: Minute,
        service_id: Ulid,
    },
}

/// Filters for availability lookups, mirroring `BookingFilter`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailabilityFilter {
    pub id: Option<Ulid>,
    pub staff_id: Option<Ulid>,
    pub date: Option<DayDate>,
    pub trashed: bool,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if let Some(result) = parse_keyword_command(trimmed) {
        return result;
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// `RESTORE AVAILABILITY <id>` and friends — trash-lifecycle verbs that have
/// no SQL spelling, handled before the parser like LISTEN-style commands.
fn parse_keyword_command(trimmed: &str) -> Option<Result<Command, SqlError>> {
    let mut words = trimmed.split_whitespace();
    let verb = words.next()?.to_uppercase();
    if verb != "RESTORE" && verb != "PURGE" {
        return None;
    }
    let target = match words.next() {
        Some(t) => t.to_uppercase(),
        None => return Some(Err(SqlError::Parse("missing target".into()))),
    };
    let id = match words.next() {
        Some(raw) => match Ulid::from_string(raw) {
            Ok(id) => id,
            Err(e) => return Some(Err(SqlError::Parse(format!("bad ULID: {e}")))),
        },
        None => return Some(Err(SqlError::Parse("missing id".into()))),
    };
    if words.next().is_some() {
        return Some(Err(SqlError::Parse("trailing input".into())));
    }

    let cmd = match (verb.as_str(), target.as_str()) {
        ("RESTORE", "AVAILABILITY") => Command::RestoreAvailability { id },
        ("RESTORE", "BOOKING") => Command::RestoreBooking { id },
        ("PURGE", "AVAILABILITY") => Command::PurgeAvailability { id },
        ("PURGE", "BOOKING") => Command::PurgeBooking { id },
        _ => return Some(Err(SqlError::UnknownTable(target.to_lowercase()))),
    };
    Some(Ok(cmd))
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "services" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("services", 4, values.len()));
            }
            Ok(Command::InsertService {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                duration: parse_i64(&values[2])?,
                price: parse_i64(&values[3])?,
            })
        }
        "staff" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("staff", 2, values.len()));
            }
            Ok(Command::InsertStaff {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
            })
        }
        "availability" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("availability", 3, values.len()));
            }
            let day_off = if values.len() >= 4 {
                parse_bool(&values[3])?
            } else {
                false
            };
            let slots = if values.len() >= 5 {
                parse_slots(&values[4])?
            } else {
                Vec::new()
            };
            Ok(Command::InsertAvailability {
                id: parse_ulid(&values[0])?,
                staff_id: parse_ulid(&values[1])?,
                date: parse_date(&values[2])?,
                day_off,
                slots,
            })
        }
        "bookings" => {
            if values.len() < 9 {
                return Err(SqlError::WrongArity("bookings", 9, values.len()));
            }
            let notes = if values.len() >= 10 {
                parse_string_or_null(&values[9])?
            } else {
                None
            };
            Ok(Command::InsertBooking {
                request: BookingRequest {
                    id: parse_ulid(&values[0])?,
                    customer: Customer {
                        name: parse_string(&values[1])?,
                        mobile: parse_string(&values[2])?,
                        email: parse_string_or_null(&values[3])?,
                    },
                    staff_id: parse_ulid(&values[4])?,
                    service_id: parse_ulid(&values[5])?,
                    date: parse_date(&values[6])?,
                    start: parse_time(&values[7])?,
                    price: parse_i64(&values[8])?,
                    notes,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    match table.as_str() {
        "availability" => {
            let mut day_off = None;
            let mut slots = None;
            for assignment in assignments {
                match assignment_column(assignment)?.as_str() {
                    "day_off" => day_off = Some(parse_bool(&assignment.value)?),
                    "slots" => slots = Some(parse_slots(&assignment.value)?),
                    other => return Err(SqlError::UnknownColumn(other.to_string())),
                }
            }
            Ok(Command::UpdateAvailability { id, day_off, slots })
        }
        "bookings" => {
            let mut patch = BookingPatch::default();
            for assignment in assignments {
                match assignment_column(assignment)?.as_str() {
                    "staff_id" => patch.staff_id = Some(parse_ulid(&assignment.value)?),
                    "service_id" => patch.service_id = Some(parse_ulid(&assignment.value)?),
                    "date" => patch.date = Some(parse_date(&assignment.value)?),
                    "start_time" => patch.start = Some(parse_time(&assignment.value)?),
                    "status" => patch.status = Some(parse_status(&assignment.value)?),
                    "price" => patch.price = Some(parse_i64(&assignment.value)?),
                    "notes" => patch.notes = parse_string_or_null(&assignment.value)?,
                    other => return Err(SqlError::UnknownColumn(other.to_string())),
                }
            }
            Ok(Command::UpdateBooking { id, patch })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "services" => Ok(Command::DeleteService { id }),
        "staff" => Ok(Command::DeleteStaff { id }),
        "availability" => Ok(Command::DeleteAvailability { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "services" => Ok(Command::SelectServices),
        "staff" => Ok(Command::SelectStaff),
        "availability" => {
            let mut filter = AvailabilityFilter::default();
            if let Some(selection) = &select.selection {
                extract_availability_filters(selection, &mut filter)?;
            }
            Ok(Command::SelectAvailability { filter })
        }
        "bookings" => {
            let mut filter = BookingFilter::default();
            if let Some(selection) = &select.selection {
                extract_booking_filters(selection, &mut filter)?;
            }
            Ok(Command::SelectBookings { filter })
        }
        "available_staff" => {
            let (mut date, mut start, mut service_id) = (None, None, None);
            if let Some(selection) = &select.selection {
                extract_available_staff_filters(selection, &mut date, &mut start, &mut service_id)?;
            }
            Ok(Command::SelectAvailableStaff {
                date: date.ok_or(SqlError::MissingFilter("date"))?,
                start: start.ok_or(SqlError::MissingFilter("start_time"))?,
                service_id: service_id.ok_or(SqlError::MissingFilter("service_id"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_availability_filters(
    expr: &Expr,
    filter: &mut AvailabilityFilter,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_availability_filters(left, filter)?;
                extract_availability_filters(right, filter)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("id") => filter.id = Some(parse_ulid(right)?),
                Some("staff_id") => filter.staff_id = Some(parse_ulid(right)?),
                Some("date") => filter.date = Some(parse_date(right)?),
                _ => {}
            },
            _ => {}
        },
        Expr::IsNotNull(inner) => {
            if expr_column_name(inner).as_deref() == Some("deleted_at") {
                filter.trashed = true;
            }
        }
        _ => {}
    }
    Ok(())
}

fn extract_booking_filters(expr: &Expr, filter: &mut BookingFilter) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_booking_filters(left, filter)?;
                extract_booking_filters(right, filter)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("id") => filter.id = Some(parse_ulid(right)?),
                Some("staff_id") => filter.staff_id = Some(parse_ulid(right)?),
                Some("date") => filter.date = Some(parse_date(right)?),
                Some("customer_mobile") => filter.mobile = Some(parse_string(right)?),
                _ => {}
            },
            _ => {}
        },
        Expr::IsNotNull(inner) => {
            if expr_column_name(inner).as_deref() == Some("deleted_at") {
                filter.trashed = true;
            }
        }
        _ => {}
    }
    Ok(())
}

fn extract_available_staff_filters(
    expr: &Expr,
    date: &mut Option<DayDate>,
    start: &mut Option<Minute>,
    service_id: &mut Option<Ulid>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_available_staff_filters(left, date, start, service_id)?;
                extract_available_staff_filters(right, date, start, service_id)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("date") => *date = Some(parse_date(right)?),
                Some("start_time") => *start = Some(parse_time(right)?),
                Some("service_id") => *service_id = Some(parse_ulid(right)?),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn assignment_column(assignment: &ast::Assignment) -> Result<String, SqlError> {
    match &assignment.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.len() {
            0 => Err(SqlError::Parse("empty VALUES".into())),
            1 => Ok(values.rows[0].clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_date(expr: &Expr) -> Result<DayDate, SqlError> {
    let s = parse_string(expr)?;
    DayDate::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad date: {s} (want YYYY-MM-DD)")))
}

fn parse_time(expr: &Expr) -> Result<Minute, SqlError> {
    let s = parse_string(expr)?;
    parse_hhmm(&s).ok_or_else(|| SqlError::Parse(format!("bad time: {s} (want HH:mm)")))
}

fn parse_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    let s = parse_string(expr)?;
    BookingStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))
}

#[derive(Deserialize)]
struct SlotSpec {
    start: String,
    end: String,
    #[serde(default)]
    is_booked: bool,
}

/// Slot lists arrive as JSON: `'[{"start":"09:00","end":"12:00"}]'`, with an
/// optional `is_booked` to pre-block a slot. Range sanity (start < end,
/// within the day) is the engine's call.
fn parse_slots(expr: &Expr) -> Result<Vec<TimeSlot>, SqlError> {
    let raw = parse_string(expr)?;
    let specs: Vec<SlotSpec> =
        serde_json::from_str(&raw).map_err(|e| SqlError::Parse(format!("bad slots JSON: {e}")))?;
    specs
        .iter()
        .map(|spec| {
            let start = parse_hhmm(&spec.start)
                .ok_or_else(|| SqlError::Parse(format!("bad time: {}", spec.start)))?;
            let end = parse_hhmm(&spec.end)
                .ok_or_else(|| SqlError::Parse(format!("bad time: {}", spec.end)))?;
            Ok(TimeSlot {
                range: TimeRange { start, end },
                is_booked: spec.is_booked,
            })
        })
        .collect()
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
