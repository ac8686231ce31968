use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, UnaryOperator, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        room: Room,
    },
    UpdateRoom {
        id: RoomId,
        patch: RoomPatch,
    },
    DeleteRoom {
        id: RoomId,
    },
    /// One row schedules one occupation; several rows form an all-or-nothing batch.
    InsertOccupations {
        requests: Vec<ScheduleRequest>,
    },
    DeleteOccupation {
        id: OccupationId,
    },
    VacateRoom {
        room_id: RoomId,
    },
    SelectRooms {
        filter: RoomFilter,
    },
    SelectOccupations {
        room_id: RoomId,
    },
    SelectOccupied {
        date: chrono::NaiveDate,
        time: TimeOfDay,
    },
    SelectCurrent {
        room_id: RoomId,
    },
    SelectAvailability {
        slot: SlotRequest,
    },
    AssignSubject {
        teacher: String,
        subject: String,
    },
    UnassignSubject {
        teacher: String,
        subject: String,
    },
    SelectDisciplines {
        teacher: Option<String>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
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
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from, for describing result columns before the
/// parameters are bound. `None` for anything that returns no rows.
pub fn select_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let Statement::Query(query) = stmts.first()? else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    table_factor_name(&select.from.first()?.relation).ok()
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by column name. Without a column list the
/// table's default column order applies.
struct Row<'a> {
    columns: Vec<String>,
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }
}

const ROOM_COLUMNS: [&str; 9] = [
    "id",
    "room_number",
    "floor",
    "building",
    "desks",
    "chairs",
    "computers",
    "has_projector",
    "max_students",
];

const OCCUPATION_COLUMNS: [&str; 9] = [
    "id",
    "room_id",
    "teacher",
    "subject",
    "start_date",
    "end_date",
    "start_time",
    "end_time",
    "days",
];

const DISCIPLINE_COLUMNS: [&str; 2] = ["teacher", "subject"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let defaults: &[&str] = match table.as_str() {
        "rooms" => &ROOM_COLUMNS,
        "occupations" => &OCCUPATION_COLUMNS,
        "disciplines" => &DISCIPLINE_COLUMNS,
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    let rows = extract_all_insert_rows(insert)?;

    match table.as_str() {
        "rooms" => {
            if rows.len() != 1 {
                return Err(SqlError::Unsupported("multi-row INSERT INTO rooms".into()));
            }
            let row = Row { columns, values: &rows[0] };
            Ok(Command::InsertRoom { room: parse_room_row(&row)? })
        }
        "disciplines" => {
            if rows.len() != 1 {
                return Err(SqlError::Unsupported("multi-row INSERT INTO disciplines".into()));
            }
            let row = Row { columns, values: &rows[0] };
            Ok(Command::AssignSubject {
                teacher: parse_string_expr(row.require("teacher")?)?,
                subject: parse_string_expr(row.require("subject")?)?,
            })
        }
        _ => {
            let mut requests = Vec::with_capacity(rows.len());
            for (i, values) in rows.iter().enumerate() {
                let row = Row { columns: columns.clone(), values };
                let request = parse_occupation_row(&row).map_err(|e| match e {
                    SqlError::Parse(msg) if rows.len() > 1 => SqlError::Parse(format!("row {i}: {msg}")),
                    other => other,
                })?;
                requests.push(request);
            }
            Ok(Command::InsertOccupations { requests })
        }
    }
}

fn parse_room_row(row: &Row<'_>) -> Result<Room, SqlError> {
    let count = |column| row.get(column).map(parse_u32).transpose().map(|v| v.unwrap_or(0));
    Ok(Room {
        id: parse_ulid_expr(row.require("id")?)?,
        room_number: parse_string_expr(row.require("room_number")?)?,
        floor: row.get("floor").map(parse_i32).transpose()?.unwrap_or(0),
        building: parse_string_expr(row.require("building")?)?,
        desks: count("desks")?,
        chairs: count("chairs")?,
        computers: count("computers")?,
        has_projector: row.get("has_projector").map(parse_bool).transpose()?.unwrap_or(false),
        max_students: count("max_students")?,
    })
}

fn parse_occupation_row(row: &Row<'_>) -> Result<ScheduleRequest, SqlError> {
    Ok(ScheduleRequest {
        id: parse_ulid_expr(row.require("id")?)?,
        teacher: parse_string_expr(row.require("teacher")?)?,
        subject: parse_string_expr(row.require("subject")?)?,
        slot: SlotRequest {
            room_id: parse_ulid_expr(row.require("room_id")?)?,
            start_date: parse_date_expr(row.require("start_date")?)?,
            end_date: parse_date_expr(row.require("end_date")?)?,
            start_time: parse_time_expr(row.require("start_time")?)?,
            end_time: parse_time_expr(row.require("end_time")?)?,
            days: parse_days_expr(row.require("days")?)?,
        },
    })
}

// ── UPDATE / DELETE ───────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "rooms" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_ulid(selection, "id")?;

    let mut patch = RoomPatch::default();
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Parse("unsupported assignment target".into()))?;
        let value = &assignment.value;
        match column.as_str() {
            "room_number" => patch.room_number = Some(parse_string_expr(value)?),
            "floor" => patch.floor = Some(parse_i32(value)?),
            "building" => patch.building = Some(parse_string_expr(value)?),
            "desks" => patch.desks = Some(parse_u32(value)?),
            "chairs" => patch.chairs = Some(parse_u32(value)?),
            "computers" => patch.computers = Some(parse_u32(value)?),
            "has_projector" => patch.has_projector = Some(parse_bool(value)?),
            "max_students" => patch.max_students = Some(parse_u32(value)?),
            "id" => return Err(SqlError::Unsupported("changing a room id".into())),
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }
    Ok(Command::UpdateRoom { id, patch })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom {
            id: extract_where_ulid(&delete.selection, "id")?,
        }),
        "occupations" => {
            let filters = collect_filters(delete.selection.as_ref())?;
            if let Some(expr) = find_filter(&filters, "id", BinaryOperator::Eq) {
                Ok(Command::DeleteOccupation { id: parse_ulid_expr(expr)? })
            } else if let Some(expr) = find_filter(&filters, "room_id", BinaryOperator::Eq) {
                Ok(Command::VacateRoom { room_id: parse_ulid_expr(expr)? })
            } else {
                Err(SqlError::MissingFilter("id or room_id"))
            }
        }
        "disciplines" => {
            let filters = collect_filters(delete.selection.as_ref())?;
            let eq = |column: &'static str| {
                find_filter(&filters, column, BinaryOperator::Eq)
                    .ok_or(SqlError::MissingFilter(column))
                    .and_then(parse_string_expr)
            };
            Ok(Command::UnassignSubject {
                teacher: eq("teacher")?,
                subject: eq("subject")?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = collect_filters(select.selection.as_ref())?;
    let eq = |column: &'static str| {
        find_filter(&filters, column, BinaryOperator::Eq).ok_or(SqlError::MissingFilter(column))
    };

    match table.as_str() {
        "rooms" => {
            let mut filter = RoomFilter::default();
            for (column, op, value) in &filters {
                match (column.as_str(), op) {
                    ("has_projector", BinaryOperator::Eq) => {
                        filter.has_projector = Some(parse_bool(value)?)
                    }
                    ("max_students", BinaryOperator::GtEq) => {
                        filter.min_capacity = Some(parse_u32(value)?)
                    }
                    ("max_students", BinaryOperator::LtEq) => {
                        filter.max_capacity = Some(parse_u32(value)?)
                    }
                    ("available", BinaryOperator::Eq) => {
                        filter.is_available = Some(parse_bool(value)?)
                    }
                    ("room_number", BinaryOperator::Eq) => {
                        filter.room_number = Some(parse_string_expr(value)?)
                    }
                    (other, _) => return Err(SqlError::UnknownColumn(other.to_string())),
                }
            }
            Ok(Command::SelectRooms { filter })
        }
        "occupations" => Ok(Command::SelectOccupations {
            room_id: parse_ulid_expr(eq("room_id")?)?,
        }),
        "occupied" => Ok(Command::SelectOccupied {
            date: parse_date_expr(eq("date")?)?,
            time: parse_time_expr(eq("time")?)?,
        }),
        "current" => Ok(Command::SelectCurrent {
            room_id: parse_ulid_expr(eq("room_id")?)?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            slot: SlotRequest {
                room_id: parse_ulid_expr(eq("room_id")?)?,
                start_date: parse_date_expr(eq("start_date")?)?,
                end_date: parse_date_expr(eq("end_date")?)?,
                start_time: parse_time_expr(eq("start_time")?)?,
                end_time: parse_time_expr(eq("end_time")?)?,
                days: parse_days_expr(eq("days")?)?,
            },
        }),
        "disciplines" => {
            let mut teacher = None;
            for (column, op, value) in &filters {
                match (column.as_str(), op) {
                    ("teacher", BinaryOperator::Eq) => teacher = Some(parse_string_expr(value)?),
                    (other, _) => return Err(SqlError::UnknownColumn(other.to_string())),
                }
            }
            Ok(Command::SelectDisciplines { teacher })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = 1 AND b >= 2 AND ...` into `(column, op, value)` triples.
/// Anything other than AND-ed comparisons against a column is rejected.
fn collect_filters(selection: Option<&Expr>) -> Result<Vec<(String, BinaryOperator, &Expr)>, SqlError> {
    fn walk<'e>(
        expr: &'e Expr,
        out: &mut Vec<(String, BinaryOperator, &'e Expr)>,
    ) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => walk(inner, out),
            Expr::BinaryOp { left, op: BinaryOperator::And, right } => {
                walk(left, out)?;
                walk(right, out)
            }
            Expr::BinaryOp { left, op, right }
                if matches!(op, BinaryOperator::Eq | BinaryOperator::GtEq | BinaryOperator::LtEq) =>
            {
                let column = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
                out.push((column, op.clone(), right));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("filter {other}"))),
        }
    }

    let mut out = Vec::new();
    if let Some(expr) = selection {
        walk(expr, &mut out)?;
    }
    Ok(out)
}

fn find_filter<'e>(
    filters: &[(String, BinaryOperator, &'e Expr)],
    column: &str,
    op: BinaryOperator,
) -> Option<&'e Expr> {
    filters
        .iter()
        .find(|(c, o, _)| c == column && *o == op)
        .map(|(_, _, e)| *e)
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

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_ulid(selection: &Option<Expr>, column: &'static str) -> Result<Ulid, SqlError> {
    let filters = collect_filters(selection.as_ref())?;
    let expr = find_filter(&filters, column, BinaryOperator::Eq).ok_or(SqlError::MissingFilter(column))?;
    parse_ulid_expr(expr)
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

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_i32(expr: &Expr) -> Result<i32, SqlError> {
    let v = parse_i64_expr(expr)?;
    i32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of i32 range")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
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
            _ => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_date_expr(expr: &Expr) -> Result<chrono::NaiveDate, SqlError> {
    Ok(parse_date(&parse_string_expr(expr)?)?)
}

fn parse_time_expr(expr: &Expr) -> Result<TimeOfDay, SqlError> {
    Ok(TimeOfDay::parse(&parse_string_expr(expr)?)?)
}

/// `'1,3,5'`, `'{1,3,5}'`, a bare number, or `ARRAY[1, 3, 5]`.
fn parse_days_expr(expr: &Expr) -> Result<Vec<u8>, SqlError> {
    match expr {
        Expr::Array(array) => array
            .elem
            .iter()
            .map(|e| {
                let v = parse_i64_expr(e)?;
                u8::try_from(v).map_err(|_| SqlError::Format(FormatError::Weekdays(v.to_string())))
            })
            .collect(),
        _ => match extract_value(expr) {
            Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(parse_weekday_codes(s)?),
            Some(value) => Err(SqlError::Parse(format!("expected weekday list, got {value}"))),
            None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
        },
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    /// Well-formed SQL carrying a malformed date, time or weekday list.
    Format(FormatError),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Format(e) => write!(f, "{e}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::MissingColumn(c) => write!(f, "missing column: {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

impl From<FormatError> for SqlError {
    fn from(e: FormatError) -> Self {
        SqlError::Format(e)
    }
}
