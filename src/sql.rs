use sqlparser::ast::{
    self, Expr, FromTable, FunctionArg, FunctionArgExpr, FunctionArguments, ObjectNamePart,
    SelectItem, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::model::*;
use crate::service::{BookingFilter, ListQuery};

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    CreateBooking {
        room_id: RoomId,
        user_id: UserId,
        start: Ms,
        end: Ms,
    },
    Transition {
        id: BookingId,
        target: BookingStatus,
    },
    Urge {
        id: BookingId,
    },
    ListBookings {
        query: ListQuery,
    },
    GetBooking {
        id: BookingId,
    },
    UpsertRoom {
        room: Room,
    },
    DeleteRoom {
        id: RoomId,
    },
    SelectRooms,
    UpsertUser {
        user: User,
    },
    SelectUsers,
    UserStats {
        start: Ms,
        end: Ms,
    },
    RoomStats {
        start: Ms,
        end: Ms,
    },
}

/// Columns a statement returns, known before execution (for Describe).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    None,
    BookingId,
    Status,
    Urge,
    Bookings,
    Rooms,
    Users,
    UserStats,
    RoomStats,
}

impl Command {
    pub fn result_shape(&self) -> ResultShape {
        match self {
            Command::CreateBooking { .. } => ResultShape::BookingId,
            Command::Transition { .. } => ResultShape::Status,
            Command::Urge { .. } => ResultShape::Urge,
            Command::ListBookings { .. } | Command::GetBooking { .. } => ResultShape::Bookings,
            Command::SelectRooms => ResultShape::Rooms,
            Command::SelectUsers => ResultShape::Users,
            Command::UserStats { .. } => ResultShape::UserStats,
            Command::RoomStats { .. } => ResultShape::RoomStats,
            Command::UpsertRoom { .. } | Command::DeleteRoom { .. } | Command::UpsertUser { .. } => {
                ResultShape::None
            }
        }
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let stmt = parse_single(sql)?;
    match &stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Classify a statement by table or function name only, so `$n`
/// placeholders need not be bound yet.
pub fn result_shape(sql: &str) -> ResultShape {
    let Ok(stmt) = parse_single(sql) else {
        return ResultShape::None;
    };
    match &stmt {
        Statement::Insert(insert) => match insert_table_name(insert).as_deref() {
            Ok("bookings") => ResultShape::BookingId,
            _ => ResultShape::None,
        },
        Statement::Query(query) => {
            let SetExpr::Select(select) = query.body.as_ref() else {
                return ResultShape::None;
            };
            if select.from.is_empty() {
                return match select_function(select).map(|(name, _)| name).as_deref() {
                    Ok("urge_booking") => ResultShape::Urge,
                    Ok(name) if transition_target(name).is_some() => ResultShape::Status,
                    _ => ResultShape::None,
                };
            }
            match table_factor_name(&select.from[0].relation).as_deref() {
                Ok("bookings") => ResultShape::Bookings,
                Ok("rooms") => ResultShape::Rooms,
                Ok("users") => ResultShape::Users,
                Ok("user_booking_stats") => ResultShape::UserStats,
                Ok("room_usage_stats") => ResultShape::RoomStats,
                _ => ResultShape::None,
            }
        }
        _ => ResultShape::None,
    }
}

fn parse_single(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts =
        Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }
    Ok(stmts.remove(0))
}

// ── INSERT ────────────────────────────────────────────────────

const BOOKING_COLUMNS: &[&str] = &["room_id", "user_id", "start", "end"];
const ROOM_COLUMNS: &[&str] = &["id", "name", "capacity", "location", "equipment", "description"];
const USER_COLUMNS: &[&str] = &["id", "username", "email", "is_admin"];

/// One VALUES row keyed by column name.
struct InsertRow<'a> {
    table: &'static str,
    values: Vec<(String, &'a Expr)>,
}

impl<'a> InsertRow<'a> {
    fn new(
        table: &'static str,
        known: &[&str],
        columns: &[ast::Ident],
        row: &'a [Expr],
    ) -> Result<Self, SqlError> {
        let names: Vec<String> = if columns.is_empty() {
            known.iter().map(|c| c.to_string()).collect()
        } else {
            columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if row.len() != names.len() && !(columns.is_empty() && row.len() < names.len()) {
            return Err(SqlError::WrongArity(table, names.len(), row.len()));
        }
        for name in &names {
            if !known.contains(&name.as_str()) {
                return Err(SqlError::UnknownColumn(format!("{table}.{name}")));
            }
        }
        Ok(Self {
            table,
            values: names.into_iter().zip(row.iter()).collect(),
        })
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, e)| *e)
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }

    /// Text column that may be omitted or NULL.
    fn optional_text(&self, column: &'static str) -> Result<String, SqlError> {
        match self.get(column) {
            None => Ok(String::new()),
            Some(e) => Ok(parse_text_or_null(e)?.unwrap_or_default()),
        }
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_single_row(insert)?;

    match table.as_str() {
        "bookings" => {
            let row = InsertRow::new("bookings", BOOKING_COLUMNS, &insert.columns, values)?;
            Ok(Command::CreateBooking {
                room_id: parse_id(row.required("room_id")?)?,
                user_id: parse_id(row.required("user_id")?)?,
                start: parse_i64(row.required("start")?)?,
                end: parse_i64(row.required("end")?)?,
            })
        }
        "rooms" => {
            let row = InsertRow::new("rooms", ROOM_COLUMNS, &insert.columns, values)?;
            Ok(Command::UpsertRoom {
                room: Room {
                    id: parse_id(row.required("id")?)?,
                    name: parse_text(row.required("name")?)?,
                    capacity: parse_u32(row.required("capacity")?)?,
                    location: parse_text(row.required("location")?)?,
                    equipment: row.optional_text("equipment")?,
                    description: row.optional_text("description")?,
                },
            })
        }
        "users" => {
            let row = InsertRow::new("users", USER_COLUMNS, &insert.columns, values)?;
            let is_admin = match row.get("is_admin") {
                Some(e) => parse_bool(e)?,
                None => false,
            };
            Ok(Command::UpsertUser {
                user: User {
                    id: parse_id(row.required("id")?)?,
                    username: parse_text(row.required("username")?)?,
                    email: parse_text(row.required("email")?)?,
                    is_admin,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom {
            id: extract_where_id(&delete.selection)?,
        }),
        "bookings" => Err(SqlError::Unsupported(
            "bookings are removed only by deleting their room".into(),
        )),
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
        return parse_function_call(select);
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "bookings" => filters.into_bookings_command(),
        "rooms" => filters.expect_none("rooms").map(|()| Command::SelectRooms),
        "users" => filters.expect_none("users").map(|()| Command::SelectUsers),
        "user_booking_stats" => {
            let (start, end) = filters.stats_window()?;
            Ok(Command::UserStats { start, end })
        }
        "room_usage_stats" => {
            let (start, end) = filters.stats_window()?;
            Ok(Command::RoomStats { start, end })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn transition_target(function: &str) -> Option<BookingStatus> {
    match function {
        "approve_booking" => Some(BookingStatus::Approved),
        "reject_booking" => Some(BookingStatus::Rejected),
        "release_booking" => Some(BookingStatus::Released),
        _ => None,
    }
}

/// `SELECT approve_booking(1)` and friends.
fn parse_function_call(select: &ast::Select) -> Result<Command, SqlError> {
    let (name, args) = select_function(select)?;
    if args.len() != 1 {
        return Err(SqlError::WrongArity("function", 1, args.len()));
    }
    let id = parse_id(args[0])?;
    if name == "urge_booking" {
        return Ok(Command::Urge { id });
    }
    match transition_target(&name) {
        Some(target) => Ok(Command::Transition { id, target }),
        None => Err(SqlError::UnknownFunction(name)),
    }
}

fn select_function(select: &ast::Select) -> Result<(String, Vec<&Expr>), SqlError> {
    let [item] = select.projection.as_slice() else {
        return Err(SqlError::Unsupported("expected exactly one function call".into()));
    };
    let expr = match item {
        SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } => e,
        _ => return Err(SqlError::Parse("SELECT without FROM".into())),
    };
    let Expr::Function(function) = expr else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let name = object_name_last(&function.name)
        .ok_or_else(|| SqlError::Parse("empty function name".into()))?;
    let args = match &function.args {
        FunctionArguments::None => Vec::new(),
        FunctionArguments::List(list) => list
            .args
            .iter()
            .map(|arg| match arg {
                FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Ok(e),
                _ => Err(SqlError::Unsupported(format!("argument {arg}"))),
            })
            .collect::<Result<_, _>>()?,
        FunctionArguments::Subquery(_) => {
            return Err(SqlError::Unsupported("subquery argument".into()));
        }
    };
    Ok((name, args))
}

/// WHERE clause terms recognized across the readable tables.
#[derive(Debug, Default)]
struct Filters {
    id: Option<u64>,
    page: Option<i64>,
    page_size: Option<i64>,
    username: Option<String>,
    room_name: Option<String>,
    location: Option<String>,
    start_from: Option<Ms>,
    start_to: Option<Ms>,
    end_to: Option<Ms>,
    seen: Vec<String>,
}

impl Filters {
    fn expect_none(&self, table: &str) -> Result<(), SqlError> {
        match self.seen.first() {
            None => Ok(()),
            Some(col) => Err(SqlError::UnknownColumn(format!("{table}.{col}"))),
        }
    }

    fn into_bookings_command(self) -> Result<Command, SqlError> {
        if let Some(id) = self.id {
            if self.seen.len() > 1 {
                return Err(SqlError::Unsupported(
                    "id cannot be combined with other filters".into(),
                ));
            }
            return Ok(Command::GetBooking { id });
        }
        let defaults = ListQuery::default();
        Ok(Command::ListBookings {
            query: ListQuery {
                page_no: self.page.unwrap_or(defaults.page_no),
                page_size: self.page_size.unwrap_or(defaults.page_size),
                filter: BookingFilter {
                    username_contains: self.username,
                    room_name_contains: self.room_name,
                    location_contains: self.location,
                    time_range_start: self.start_from,
                    time_range_end: self.start_to.or(self.end_to),
                },
            },
        })
    }

    fn stats_window(&self) -> Result<(Ms, Ms), SqlError> {
        let start = self.start_from.ok_or(SqlError::MissingFilter("start"))?;
        let end = self
            .end_to
            .or(self.start_to)
            .ok_or(SqlError::MissingFilter("end"))?;
        Ok((start, end))
    }

    fn note(&mut self, column: &str) {
        self.seen.push(column.to_string());
    }
}

/// `'%abc%'` → `abc`. Blank patterns match everything.
fn containment_needle(expr: &Expr) -> Result<Option<String>, SqlError> {
    let pattern = parse_text(expr)?;
    let needle = pattern.trim_matches('%');
    Ok((!needle.is_empty()).then(|| needle.to_string()))
}

fn collect_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, filters),
        Expr::BinaryOp { left, op, right } => {
            if *op == ast::BinaryOperator::And {
                collect_filters(left, filters)?;
                return collect_filters(right, filters);
            }
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            filters.note(&col);
            match (col.as_str(), op) {
                ("id", ast::BinaryOperator::Eq) => filters.id = Some(parse_id(right)?),
                ("page", ast::BinaryOperator::Eq) => filters.page = Some(parse_i64(right)?),
                ("page_size", ast::BinaryOperator::Eq) => {
                    filters.page_size = Some(parse_i64(right)?)
                }
                ("start", ast::BinaryOperator::GtEq) => filters.start_from = Some(parse_i64(right)?),
                ("start", ast::BinaryOperator::LtEq) => filters.start_to = Some(parse_i64(right)?),
                ("end", ast::BinaryOperator::LtEq) => filters.end_to = Some(parse_i64(right)?),
                ("username", ast::BinaryOperator::Eq) => filters.username = containment_needle(right)?,
                ("room_name", ast::BinaryOperator::Eq) => {
                    filters.room_name = containment_needle(right)?
                }
                ("location", ast::BinaryOperator::Eq) => {
                    filters.location = containment_needle(right)?
                }
                _ => return Err(SqlError::Unsupported(format!("filter {expr}"))),
            }
            Ok(())
        }
        Expr::Like {
            negated: false,
            expr: column,
            pattern,
            ..
        }
        | Expr::ILike {
            negated: false,
            expr: column,
            pattern,
            ..
        } => {
            let col = expr_column_name(column)
                .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            filters.note(&col);
            let needle = containment_needle(pattern)?;
            match col.as_str() {
                "username" => filters.username = needle,
                "room_name" => filters.room_name = needle,
                "location" => filters.location = needle,
                _ => return Err(SqlError::Unsupported(format!("LIKE on {col}"))),
            }
            Ok(())
        }
        Expr::Between {
            expr: column,
            negated: false,
            low,
            high,
        } if expr_column_name(column).as_deref() == Some("start") => {
            filters.note("start");
            filters.start_from = Some(parse_i64(low)?);
            filters.start_to = Some(parse_i64(high)?);
            Ok(())
        }
        _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
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

fn extract_single_row(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.as_slice()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<u64, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_id(right),
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

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        parse_i64(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse("integer out of range".into()))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_id(expr: &Expr) -> Result<u64, SqlError> {
    let v = parse_i64(expr)?;
    u64::try_from(v).map_err(|_| SqlError::Parse(format!("{v} is not a valid id")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_text(expr).map(Some),
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
            _ => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    UnknownFunction(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl SqlError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SqlError::Unsupported(_) => "0A000",
            SqlError::UnknownTable(_) => "42P01",
            SqlError::UnknownColumn(_) => "42703",
            SqlError::UnknownFunction(_) => "42883",
            SqlError::Parse(_)
            | SqlError::Empty
            | SqlError::WrongArity(..)
            | SqlError::MissingColumn(..)
            | SqlError::MissingFilter(_) => "42601",
        }
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::UnknownFunction(name) => write!(f, "unknown function: {name}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, col) => write!(f, "{t}: missing column {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_insert_booking() {
        let sql = r#"INSERT INTO bookings (room_id, user_id, start, "end") VALUES (1, 2, 1000, 2000)"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::CreateBooking {
                room_id: 1,
                user_id: 2,
                start: 1000,
                end: 2000
            }
        );
    }

    #[test]
    fn parse_insert_booking_columns_reordered() {
        let sql = r#"INSERT INTO bookings ("end", start, user_id, room_id) VALUES ('2000', '1000', '2', '1')"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::CreateBooking {
                room_id: 1,
                user_id: 2,
                start: 1000,
                end: 2000
            }
        );
    }

    #[test]
    fn parse_insert_booking_missing_column() {
        let sql = "INSERT INTO bookings (room_id, user_id, start) VALUES (1, 2, 1000)";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::MissingColumn("bookings", "end"))
        ));
    }

    #[test]
    fn parse_insert_booking_negative_id_rejected() {
        let sql = r#"INSERT INTO bookings (room_id, user_id, start, "end") VALUES (-1, 2, 1000, 2000)"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_room_optional_columns() {
        let sql = "INSERT INTO rooms (id, name, capacity, location) VALUES (3, 'Jupiter', 12, '3F East')";
        match parse_sql(sql).unwrap() {
            Command::UpsertRoom { room } => {
                assert_eq!(room.id, 3);
                assert_eq!(room.name, "Jupiter");
                assert_eq!(room.capacity, 12);
                assert_eq!(room.location, "3F East");
                assert_eq!(room.equipment, "");
            }
            other => panic!("expected UpsertRoom, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_room_null_description() {
        let sql = "INSERT INTO rooms (id, name, capacity, location, equipment, description) VALUES (3, 'Jupiter', 12, '3F', 'TV', NULL)";
        match parse_sql(sql).unwrap() {
            Command::UpsertRoom { room } => {
                assert_eq!(room.equipment, "TV");
                assert_eq!(room.description, "");
            }
            other => panic!("expected UpsertRoom, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_user() {
        let sql = "INSERT INTO users (id, username, email, is_admin) VALUES (1, 'admin', 'admin@example.com', true)";
        match parse_sql(sql).unwrap() {
            Command::UpsertUser { user } => {
                assert!(user.is_admin);
                assert_eq!(user.email, "admin@example.com");
            }
            other => panic!("expected UpsertUser, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_unknown_column() {
        let sql = "INSERT INTO users (id, username, email, password) VALUES (1, 'a', 'a@b.c', 'x')";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn(_))));
    }

    #[test]
    fn parse_multi_row_insert_rejected() {
        let sql = r#"INSERT INTO bookings (room_id, user_id, start, "end") VALUES (1, 2, 1000, 2000), (1, 2, 3000, 4000)"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_lifecycle_functions() {
        assert_eq!(
            parse_sql("SELECT approve_booking(5)").unwrap(),
            Command::Transition {
                id: 5,
                target: BookingStatus::Approved
            }
        );
        assert_eq!(
            parse_sql("SELECT reject_booking('6')").unwrap(),
            Command::Transition {
                id: 6,
                target: BookingStatus::Rejected
            }
        );
        assert_eq!(
            parse_sql("select RELEASE_BOOKING(7)").unwrap(),
            Command::Transition {
                id: 7,
                target: BookingStatus::Released
            }
        );
        assert_eq!(parse_sql("SELECT urge_booking(8)").unwrap(), Command::Urge { id: 8 });
    }

    #[test]
    fn parse_unknown_function() {
        assert!(matches!(
            parse_sql("SELECT cancel_booking(1)"),
            Err(SqlError::UnknownFunction(_))
        ));
        assert!(matches!(
            parse_sql("SELECT approve_booking(1, 2)"),
            Err(SqlError::WrongArity(..))
        ));
    }

    #[test]
    fn parse_list_defaults() {
        match parse_sql("SELECT * FROM bookings").unwrap() {
            Command::ListBookings { query } => assert_eq!(query, ListQuery::default()),
            other => panic!("expected ListBookings, got {other:?}"),
        }
    }

    #[test]
    fn parse_list_with_filters() {
        let sql = "SELECT * FROM bookings WHERE page = 2 AND page_size = 20 \
                   AND username LIKE '%zhang%' AND room_name ILIKE 'Jup%' AND location LIKE '%%' \
                   AND start >= 1000 AND start <= 5000";
        match parse_sql(sql).unwrap() {
            Command::ListBookings { query } => {
                assert_eq!(query.page_no, 2);
                assert_eq!(query.page_size, 20);
                assert_eq!(query.filter.username_contains.as_deref(), Some("zhang"));
                assert_eq!(query.filter.room_name_contains.as_deref(), Some("Jup"));
                assert_eq!(query.filter.location_contains, None);
                assert_eq!(query.filter.time_range_start, Some(1000));
                assert_eq!(query.filter.time_range_end, Some(5000));
            }
            other => panic!("expected ListBookings, got {other:?}"),
        }
    }

    #[test]
    fn parse_list_between() {
        match parse_sql("SELECT * FROM bookings WHERE start BETWEEN 10 AND 20").unwrap() {
            Command::ListBookings { query } => {
                assert_eq!(query.filter.time_range_start, Some(10));
                assert_eq!(query.filter.time_range_end, Some(20));
            }
            other => panic!("expected ListBookings, got {other:?}"),
        }
    }

    #[test]
    fn parse_list_rejects_or() {
        let sql = "SELECT * FROM bookings WHERE page = 1 OR page = 2";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_get_booking() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings WHERE id = 4").unwrap(),
            Command::GetBooking { id: 4 }
        );
        assert!(parse_sql("SELECT * FROM bookings WHERE id = 4 AND page = 1").is_err());
    }

    #[test]
    fn parse_delete_room() {
        assert_eq!(
            parse_sql("DELETE FROM rooms WHERE id = 3").unwrap(),
            Command::DeleteRoom { id: 3 }
        );
        assert!(matches!(
            parse_sql("DELETE FROM rooms"),
            Err(SqlError::MissingFilter("id"))
        ));
        assert!(matches!(
            parse_sql("DELETE FROM bookings WHERE id = 1"),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn parse_catalog_selects() {
        assert_eq!(parse_sql("SELECT * FROM rooms").unwrap(), Command::SelectRooms);
        assert_eq!(parse_sql("SELECT * FROM users").unwrap(), Command::SelectUsers);
        assert!(matches!(
            parse_sql("SELECT * FROM users WHERE page = 1"),
            Err(SqlError::UnknownColumn(_))
        ));
    }

    #[test]
    fn parse_stats() {
        let sql = r#"SELECT * FROM user_booking_stats WHERE start >= 100 AND "end" <= 200"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::UserStats { start: 100, end: 200 }
        );
        let sql = r#"SELECT * FROM room_usage_stats WHERE start >= 100 AND "end" <= 200"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::RoomStats { start: 100, end: 200 }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM room_usage_stats WHERE start >= 100"),
            Err(SqlError::MissingFilter("end"))
        ));
    }

    #[test]
    fn shapes_without_binding() {
        assert_eq!(
            result_shape(r#"INSERT INTO bookings (room_id, user_id, start, "end") VALUES ($1, $2, $3, $4)"#),
            ResultShape::BookingId
        );
        assert_eq!(result_shape("SELECT approve_booking($1)"), ResultShape::Status);
        assert_eq!(result_shape("SELECT urge_booking($1)"), ResultShape::Urge);
        assert_eq!(
            result_shape("SELECT * FROM bookings WHERE page = $1"),
            ResultShape::Bookings
        );
        assert_eq!(result_shape("SELECT * FROM rooms"), ResultShape::Rooms);
        assert_eq!(result_shape("DELETE FROM rooms WHERE id = $1"), ResultShape::None);
        assert_eq!(result_shape("garbage"), ResultShape::None);
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("SELECT * FROM foobar"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
