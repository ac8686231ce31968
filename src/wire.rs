use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
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
use tokio::net::TcpStream;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

pub struct ClassroomHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ClassroomQueryParser>,
}

impl ClassroomHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ClassroomQueryParser),
        }
    }

    async fn run(&self, sql: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertRoom { room } => {
                engine.create_room(room).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateRoom { id, patch } => {
                engine.update_room(id, patch).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteRoom { id } => {
                engine.delete_room(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertOccupations { mut requests } => {
                let count = if requests.len() == 1 {
                    let req = requests.remove(0);
                    engine.schedule(req).await.map_err(engine_err)?;
                    1
                } else {
                    engine
                        .schedule_batch(requests)
                        .await
                        .map_err(engine_err)?
                        .len()
                };
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::DeleteOccupation { id } => {
                engine.cancel_occupation(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::VacateRoom { room_id } => {
                engine
                    .vacate_room(room_id, local_now())
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectRooms { filter } => {
                let rooms = engine.list_rooms(&filter, local_now()).await;
                let schema = Arc::new(rooms_schema());
                let rows: Vec<PgWireResult<_>> = rooms
                    .iter()
                    .map(|room| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&room.id.to_string())?;
                        encoder.encode_field(&room.room_number)?;
                        encoder.encode_field(&room.floor)?;
                        encoder.encode_field(&room.building)?;
                        encoder.encode_field(&i64::from(room.desks))?;
                        encoder.encode_field(&i64::from(room.chairs))?;
                        encoder.encode_field(&i64::from(room.computers))?;
                        encoder.encode_field(&room.has_projector)?;
                        encoder.encode_field(&i64::from(room.max_students))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectOccupations { room_id } => {
                let occupations = engine
                    .occupations_for_room(room_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![occupations_response(&occupations)])
            }
            Command::SelectCurrent { room_id } => {
                let current = engine
                    .current_occupation(room_id, local_now())
                    .await
                    .map_err(engine_err)?;
                Ok(vec![occupations_response(current.as_slice())])
            }
            Command::SelectOccupied { date, time } => {
                let occupied = engine.occupied_rooms(date, time).await;
                let schema = Arc::new(occupied_schema());
                let rows: Vec<PgWireResult<_>> = occupied
                    .iter()
                    .map(|o| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&o.room.id.to_string())?;
                        encoder.encode_field(&o.room.room_number)?;
                        encoder.encode_field(&o.room.building)?;
                        encoder.encode_field(&o.occupation.id.to_string())?;
                        encoder.encode_field(&o.occupation.teacher)?;
                        encoder.encode_field(&o.occupation.subject)?;
                        encoder.encode_field(&o.occupation.window.start.to_string())?;
                        encoder.encode_field(&o.occupation.window.end.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAvailability { slot } => {
                let available = engine.check_availability(&slot).await.map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&slot.room_id.to_string())?;
                encoder.encode_field(&available)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::AssignSubject { teacher, subject } => {
                engine
                    .assign_subject(&teacher, &subject)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UnassignSubject { teacher, subject } => {
                engine
                    .unassign_subject(&teacher, &subject)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectDisciplines { teacher } => {
                let disciplines = engine.list_disciplines(teacher.as_deref());
                let schema = Arc::new(disciplines_schema());
                let rows: Vec<PgWireResult<_>> = disciplines
                    .iter()
                    .map(|d| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&d.teacher)?;
                        encoder.encode_field(&d.subject)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

fn local_now() -> chrono::NaiveDateTime {
    chrono::Local::now().naive_local()
}

fn occupations_response(occupations: &[Occupation]) -> Response {
    let schema = Arc::new(occupations_schema());
    let rows: Vec<PgWireResult<_>> = occupations
        .iter()
        .map(|o| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&o.id.to_string())?;
            encoder.encode_field(&o.room_id.to_string())?;
            encoder.encode_field(&o.teacher)?;
            encoder.encode_field(&o.subject)?;
            encoder.encode_field(&o.dates.start.to_string())?;
            encoder.encode_field(&o.dates.end.to_string())?;
            encoder.encode_field(&o.window.start.to_string())?;
            encoder.encode_field(&o.window.end.to_string())?;
            encoder.encode_field(&o.days.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("room_number", Type::VARCHAR),
        text_field("floor", Type::INT4),
        text_field("building", Type::VARCHAR),
        text_field("desks", Type::INT8),
        text_field("chairs", Type::INT8),
        text_field("computers", Type::INT8),
        text_field("has_projector", Type::BOOL),
        text_field("max_students", Type::INT8),
    ]
}

fn occupations_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("room_id", Type::VARCHAR),
        text_field("teacher", Type::VARCHAR),
        text_field("subject", Type::VARCHAR),
        text_field("start_date", Type::VARCHAR),
        text_field("end_date", Type::VARCHAR),
        text_field("start_time", Type::VARCHAR),
        text_field("end_time", Type::VARCHAR),
        text_field("days", Type::VARCHAR),
    ]
}

fn occupied_schema() -> Vec<FieldInfo> {
    vec![
        text_field("room_id", Type::VARCHAR),
        text_field("room_number", Type::VARCHAR),
        text_field("building", Type::VARCHAR),
        text_field("occupation_id", Type::VARCHAR),
        text_field("teacher", Type::VARCHAR),
        text_field("subject", Type::VARCHAR),
        text_field("start_time", Type::VARCHAR),
        text_field("end_time", Type::VARCHAR),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("room_id", Type::VARCHAR),
        text_field("available", Type::BOOL),
    ]
}

fn disciplines_schema() -> Vec<FieldInfo> {
    vec![
        text_field("teacher", Type::VARCHAR),
        text_field("subject", Type::VARCHAR),
    ]
}

/// Result columns of a statement, known before its parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::select_table(sql).as_deref() {
        Some("rooms") => rooms_schema(),
        Some("occupations" | "current") => occupations_schema(),
        Some("occupied") => occupied_schema(),
        Some("availability") => availability_schema(),
        Some("disciplines") => disciplines_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for ClassroomHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ClassroomQueryParser;

#[async_trait]
impl QueryParser for ClassroomQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ClassroomHandler {
    type Statement = String;
    type QueryParser = ClassroomQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
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
        let mut responses = self.run(&sql).await?;
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
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
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute_text_params(&portal.statement.statement, &params)
}

/// One left-to-right pass over the statement text. Substituted values are
/// never rescanned, so a `$N` inside a bound value stays literal.
/// Placeholders without a bound value are left as written.
fn substitute_text_params(sql: &str, params: &[Option<String>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let bound = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match bound {
            Some(Some(text)) => {
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            Some(None) => result.push_str("NULL"),
            None => result.push_str(&rest[pos..pos + 1 + digits]),
        }
        rest = &after[digits..];
    }
    result.push_str(rest);
    result
}

// ── Auth ─────────────────────────────────────────────────────────

/// One shared password for every user.
#[derive(Debug)]
pub struct ClassroomAuthSource {
    password: String,
}

impl ClassroomAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ClassroomAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ClassroomFactory {
    handler: Arc<ClassroomHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<ClassroomAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl ClassroomFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = ClassroomAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ClassroomHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ClassroomFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
) -> std::io::Result<()> {
    let factory = Arc::new(ClassroomFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, None, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for an engine failure.
fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::LimitExceeded(_) => "54000",
        e if e.is_input_error() => "22023",
        EngineError::RoomNotFound(_)
        | EngineError::OccupationNotFound(_)
        | EngineError::NoCurrentOccupation(_)
        | EngineError::DisciplineNotFound { .. } => "P0002",
        EngineError::RoomAlreadyExists(_)
        | EngineError::OccupationAlreadyExists(_)
        | EngineError::DisciplineAlreadyAssigned { .. } => "23505",
        EngineError::RoomInUse { .. } | EngineError::DisciplineInUse { .. } => "23503",
        EngineError::NotATeacher(_) | EngineError::SubjectNotAssigned { .. } => "42501",
        EngineError::SchedulingConflict { .. } => "23P01",
        EngineError::WalError(_) => "58030",
        _ => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        engine_sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::Format(_) => "22023",
        _ => "42601",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM rooms"), 0);
        assert_eq!(count_params("SELECT * FROM occupied WHERE date = $1 AND time = $2"), 2);
        assert_eq!(count_params("SELECT $10, $2"), 10);
    }

    #[test]
    fn substitute_quotes_and_nulls() {
        let sql = "UPDATE rooms SET building = $2 WHERE id = $1 AND x = $10";
        let mut params: Vec<Option<String>> = vec![None; 10];
        params[0] = Some("01ARZ3NDEKTSV4RRFFQ69G5FAV".into());
        params[1] = Some("O'Brien Hall".into());
        let out = substitute_text_params(sql, &params);
        assert_eq!(
            out,
            "UPDATE rooms SET building = 'O''Brien Hall' WHERE id = '01ARZ3NDEKTSV4RRFFQ69G5FAV' AND x = NULL"
        );
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let sql = "UPDATE rooms SET building = $2 WHERE id = $1";
        let params = vec![
            Some("01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string()),
            Some("Annex $1".to_string()),
        ];
        assert_eq!(
            substitute_text_params(sql, &params),
            "UPDATE rooms SET building = 'Annex $1' WHERE id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'"
        );
    }

    #[test]
    fn unbound_and_bare_dollars_kept() {
        let params = vec![Some("x".to_string())];
        assert_eq!(substitute_text_params("SELECT $1, $3, $ , $0", &params), "SELECT 'x', $3, $ , $0");
    }

    #[test]
    fn result_schema_by_table() {
        assert_eq!(result_schema("SELECT * FROM rooms").len(), 9);
        assert_eq!(result_schema("SELECT * FROM current WHERE room_id = $1").len(), 9);
        assert_eq!(result_schema("SELECT * FROM occupied WHERE date = $1 AND time = $2").len(), 8);
        assert_eq!(result_schema("SELECT * FROM availability WHERE room_id = $1").len(), 2);
        assert_eq!(result_schema("SELECT * FROM disciplines WHERE teacher = $1").len(), 2);
        assert!(result_schema("DELETE FROM rooms WHERE id = $1").is_empty());
    }

    #[test]
    fn sqlstates() {
        let day = NaiveDate::from_ymd_opt(2025, 6, 4).unwrap();
        let id = Ulid::new();
        assert_eq!(engine_sqlstate(&EngineError::InvalidTimeWindow), "22023");
        assert_eq!(engine_sqlstate(&EngineError::NoMatchingDates), "22023");
        assert_eq!(engine_sqlstate(&EngineError::LimitExceeded("x")), "54000");
        assert_eq!(engine_sqlstate(&EngineError::RoomNotFound(id)), "P0002");
        assert_eq!(engine_sqlstate(&EngineError::NoCurrentOccupation(id)), "P0002");
        assert_eq!(
            engine_sqlstate(&EngineError::SchedulingConflict { occupation: id, date: day }),
            "23P01"
        );
        assert_eq!(engine_sqlstate(&EngineError::NotATeacher("x".into())), "42501");
        assert_eq!(
            engine_sqlstate(&EngineError::RoomInUse { room: id, occupations: 1 }),
            "23503"
        );
        assert_eq!(engine_sqlstate(&EngineError::OccupationAlreadyExists(id)), "23505");

        let (teacher, subject) = (String::from("ana@school.edu"), String::from("Chemistry"));
        assert_eq!(
            engine_sqlstate(&EngineError::DisciplineAlreadyAssigned {
                teacher: teacher.clone(),
                subject: subject.clone()
            }),
            "23505"
        );
        assert_eq!(
            engine_sqlstate(&EngineError::DisciplineNotFound {
                teacher: teacher.clone(),
                subject: subject.clone()
            }),
            "P0002"
        );
        assert_eq!(
            engine_sqlstate(&EngineError::DisciplineInUse { teacher, subject, occupations: 2 }),
            "23503"
        );
    }
}
