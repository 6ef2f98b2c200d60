use std::collections::BTreeMap;

use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::MAX_CHANNEL_LEN;
use crate::model::*;

const RESOURCE_COLUMNS: &[&str] = &[
    "id",
    "name",
    "category",
    "capacity",
    "location",
    "status",
    "attributes",
];
const RESERVATION_COLUMNS: &[&str] = &[
    "id",
    "resource_id",
    "user_id",
    "start",
    "end",
    "event_id",
    "status",
];

/// Which reservations a SELECT asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationFilter {
    Id(Ulid),
    Resource(Ulid),
    User(Ulid),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertResource {
        resource: NewResource,
    },
    UpdateResource {
        id: Ulid,
        patch: ResourcePatch,
    },
    DeleteResource {
        id: Ulid,
    },
    /// A booking attempt. `status = 'CONFIRMED'` marks a manager booking.
    InsertReservation {
        id: Ulid,
        resource_id: Ulid,
        user_id: Ulid,
        start: Ms,
        end: Ms,
        event_id: Option<Ulid>,
        initiator: Initiator,
    },
    UpdateReservationStatus {
        id: Ulid,
        status: ReservationStatus,
    },
    RescheduleReservation {
        id: Ulid,
        start: Ms,
        end: Ms,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectResources {
        id: Option<Ulid>,
        category: Option<ResourceCategory>,
        status: Option<ResourceStatus>,
    },
    SelectReservations {
        filter: ReservationFilter,
    },
    SelectConflicts {
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        exclude_id: Option<Ulid>,
    },
    SelectAlternatives {
        resource_id: Ulid,
        start: Ms,
        end: Ms,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if let Some(rest) = strip_keyword(trimmed, "LISTEN ") {
        let channel = parse_channel(rest)?;
        return Ok(Command::Listen { channel });
    }
    if let Some(rest) = strip_keyword(trimmed, "UNLISTEN ") {
        let rest = rest.trim();
        if rest == "*" {
            return Ok(Command::UnlistenAll);
        }
        let channel = parse_channel(rest)?;
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Case-insensitive ASCII prefix match. Returns `None` instead of slicing
/// through a multi-byte character.
fn strip_keyword<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let head = sql.get(..keyword.len())?;
    if head.eq_ignore_ascii_case(keyword) {
        sql.get(keyword.len()..)
    } else {
        None
    }
}

fn parse_channel(raw: &str) -> Result<String, SqlError> {
    let channel = raw.trim().trim_matches('"').to_string();
    if channel.is_empty() {
        return Err(SqlError::Parse("missing channel name".into()));
    }
    if channel.len() > MAX_CHANNEL_LEN {
        return Err(SqlError::Parse("channel name too long".into()));
    }
    Ok(channel)
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let row = extract_insert_row(insert)?;

    match table.as_str() {
        "resources" => {
            let cols = named_values(&insert.columns, RESOURCE_COLUMNS, &row, "resources")?;
            let id = parse_ulid_expr(cols.require("id")?)?;
            let name = parse_string_expr(cols.require("name")?)?;
            let category = parse_enum(cols.require("category")?)?;
            let mut resource = NewResource::new(id, name, category);
            if let Some(expr) = cols.get("capacity") {
                resource.capacity = parse_u32(expr)?;
            }
            if let Some(expr) = cols.get("location") {
                resource.location = parse_string_or_null(expr)?;
            }
            if let Some(expr) = cols.get("status") {
                resource.status = parse_enum(expr)?;
            }
            if let Some(expr) = cols.get("attributes") {
                resource.attributes = parse_attributes(expr)?;
            }
            Ok(Command::InsertResource { resource })
        }
        "reservations" => {
            let cols = named_values(&insert.columns, RESERVATION_COLUMNS, &row, "reservations")?;
            let initiator = match cols.get("status") {
                None => Initiator::Client,
                Some(expr) => match parse_enum::<ReservationStatus>(expr)? {
                    ReservationStatus::Pending => Initiator::Client,
                    ReservationStatus::Confirmed => Initiator::Manager,
                    ReservationStatus::Cancelled => {
                        return Err(SqlError::Parse(
                            "reservations cannot be inserted as CANCELLED".into(),
                        ));
                    }
                },
            };
            let event_id = match cols.get("event_id") {
                Some(expr) => parse_ulid_or_null(expr)?,
                None => None,
            };
            Ok(Command::InsertReservation {
                id: parse_ulid_expr(cols.require("id")?)?,
                resource_id: parse_ulid_expr(cols.require("resource_id")?)?,
                user_id: parse_ulid_expr(cols.require("user_id")?)?,
                start: parse_i64_expr(cols.require("start")?)?,
                end: parse_i64_expr(cols.require("end")?)?,
                event_id,
                initiator,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Column name → value for one INSERT row. Without a column list the table's
/// default column order applies.
struct NamedValues<'a> {
    pairs: Vec<(String, &'a Expr)>,
}

impl<'a> NamedValues<'a> {
    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.pairs
            .iter()
            .find(|(name, _)| name == col)
            .map(|(_, expr)| *expr)
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(col))
    }
}

fn named_values<'a>(
    columns: &[ast::Ident],
    defaults: &[&str],
    row: &'a [Expr],
    table: &'static str,
) -> Result<NamedValues<'a>, SqlError> {
    let names: Vec<String> = if columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if row.len() > names.len() || (!columns.is_empty() && row.len() != names.len()) {
        return Err(SqlError::WrongArity(table, names.len(), row.len()));
    }
    for name in &names {
        if !defaults.contains(&name.as_str()) {
            return Err(SqlError::UnknownColumn(name.clone()));
        }
    }
    Ok(NamedValues {
        pairs: names.into_iter().zip(row.iter()).collect(),
    })
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;
    let mut sets = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let col = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        sets.push((col, &assignment.value));
    }

    match table.as_str() {
        "resources" => {
            let mut patch = ResourcePatch::default();
            for (col, value) in sets {
                match col.as_str() {
                    "name" => patch.name = Some(parse_string_expr(value)?),
                    "capacity" => patch.capacity = Some(parse_u32(value)?),
                    "location" => patch.location = Some(parse_string_or_null(value)?),
                    "status" => patch.status = Some(parse_enum(value)?),
                    "attributes" => patch.attributes = Some(parse_attributes(value)?),
                    "category" => {
                        return Err(SqlError::Unsupported("category cannot change".into()));
                    }
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::UpdateResource { id, patch })
        }
        "reservations" => {
            let (mut status, mut start, mut end) = (None, None, None);
            for (col, value) in sets {
                match col.as_str() {
                    "status" => status = Some(parse_enum::<ReservationStatus>(value)?),
                    "start" => start = Some(parse_i64_expr(value)?),
                    "end" => end = Some(parse_i64_expr(value)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            match (status, start, end) {
                (Some(status), None, None) => Ok(Command::UpdateReservationStatus { id, status }),
                (None, Some(start), Some(end)) => {
                    Ok(Command::RescheduleReservation { id, start, end })
                }
                (None, Some(_), None) => Err(SqlError::MissingColumn("end")),
                (None, None, Some(_)) => Err(SqlError::MissingColumn("start")),
                (None, None, None) => Err(SqlError::Parse("empty SET".into())),
                _ => Err(SqlError::Unsupported(
                    "status and interval cannot change in one statement".into(),
                )),
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "resources" => Ok(Command::DeleteResource { id }),
        "reservations" => Ok(Command::DeleteReservation { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let find = |col: &str| filters.iter().find(|(c, _)| c == col).map(|(_, e)| *e);

    match table.as_str() {
        "resources" => Ok(Command::SelectResources {
            id: find("id").map(parse_ulid_expr).transpose()?,
            category: find("category").map(parse_enum).transpose()?,
            status: find("status").map(parse_enum).transpose()?,
        }),
        "reservations" => {
            let filter = if let Some(e) = find("id") {
                ReservationFilter::Id(parse_ulid_expr(e)?)
            } else if let Some(e) = find("resource_id") {
                ReservationFilter::Resource(parse_ulid_expr(e)?)
            } else if let Some(e) = find("user_id") {
                ReservationFilter::User(parse_ulid_expr(e)?)
            } else {
                return Err(SqlError::MissingFilter("resource_id or user_id"));
            };
            Ok(Command::SelectReservations { filter })
        }
        "conflicts" => Ok(Command::SelectConflicts {
            resource_id: parse_ulid_expr(find("resource_id").ok_or(SqlError::MissingFilter("resource_id"))?)?,
            start: parse_i64_expr(find("start").ok_or(SqlError::MissingFilter("start"))?)?,
            end: parse_i64_expr(find("end").ok_or(SqlError::MissingFilter("end"))?)?,
            exclude_id: find("exclude_id").map(parse_ulid_expr).transpose()?,
        }),
        "alternatives" => Ok(Command::SelectAlternatives {
            resource_id: parse_ulid_expr(find("resource_id").ok_or(SqlError::MissingFilter("resource_id"))?)?,
            start: parse_i64_expr(find("start").ok_or(SqlError::MissingFilter("start"))?)?,
            end: parse_i64_expr(find("end").ok_or(SqlError::MissingFilter("end"))?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = x AND b = y AND ...` into `(column, value)` pairs.
fn collect_eq_filters<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
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

/// The single VALUES row of an INSERT. Bookings are decided one at a time.
fn extract_insert_row(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
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
                parse_ulid_expr(right)
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid_expr(expr).map(Some),
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string_expr(expr).map(Some),
    }
}

fn parse_enum<T>(expr: &Expr) -> Result<T, SqlError>
where
    T: std::str::FromStr<Err = UnknownVariant>,
{
    parse_string_expr(expr)?
        .parse()
        .map_err(|e: UnknownVariant| SqlError::Parse(e.to_string()))
}

/// Attributes travel as a JSON object of strings, e.g. `'{"seats":"12"}'`.
fn parse_attributes(expr: &Expr) -> Result<BTreeMap<String, String>, SqlError> {
    match parse_string_or_null(expr)? {
        None => Ok(BTreeMap::new()),
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| SqlError::Parse(format!("bad attributes JSON: {e}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
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
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
