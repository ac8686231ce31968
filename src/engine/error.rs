use chrono::NaiveDate;

use crate::model::{FormatError, OccupationId, RoomId};

#[derive(Debug)]
pub enum EngineError {
    Format(FormatError),
    InvalidRange { start: NaiveDate, end: NaiveDate },
    InvalidTimeWindow,
    InvalidWeekdaySet(Vec<u8>),
    RoomNotFound(RoomId),
    RoomAlreadyExists(RoomId),
    RoomInUse { room: RoomId, occupations: usize },
    NotATeacher(String),
    SubjectNotAssigned { teacher: String, subject: String },
    DisciplineAlreadyAssigned { teacher: String, subject: String },
    DisciplineNotFound { teacher: String, subject: String },
    DisciplineInUse {
        teacher: String,
        subject: String,
        occupations: usize,
    },
    NoMatchingDates,
    SchedulingConflict {
        occupation: OccupationId,
        date: NaiveDate,
    },
    OccupationNotFound(OccupationId),
    OccupationAlreadyExists(OccupationId),
    NoCurrentOccupation(RoomId),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Rejected on the inputs alone, before any store access.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            EngineError::Format(_)
                | EngineError::InvalidRange { .. }
                | EngineError::InvalidTimeWindow
                | EngineError::InvalidWeekdaySet(_)
                | EngineError::NoMatchingDates
                | EngineError::LimitExceeded(_)
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Format(e) => write!(f, "{e}"),
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid date range: start {start} is after end {end}")
            }
            EngineError::InvalidTimeWindow => {
                write!(f, "invalid time window: start must be before end")
            }
            EngineError::InvalidWeekdaySet(days) => write!(
                f,
                "invalid weekday set {days:?}: expected at least one of 1 (Monday) .. 7 (Sunday)"
            ),
            EngineError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            EngineError::RoomAlreadyExists(id) => write!(f, "room already exists: {id}"),
            EngineError::RoomInUse { room, occupations } => write!(
                f,
                "cannot delete room {room}: {occupations} occupation(s) still reference it"
            ),
            EngineError::NotATeacher(who) => write!(f, "{who} is not a teacher"),
            EngineError::SubjectNotAssigned { teacher, subject } => {
                write!(f, "subject {subject:?} is not assigned to {teacher}")
            }
            EngineError::DisciplineAlreadyAssigned { teacher, subject } => {
                write!(f, "subject {subject:?} is already assigned to {teacher}")
            }
            EngineError::DisciplineNotFound { teacher, subject } => {
                write!(f, "no assignment of subject {subject:?} to {teacher}")
            }
            EngineError::DisciplineInUse {
                teacher,
                subject,
                occupations,
            } => write!(
                f,
                "cannot unassign {subject:?} from {teacher}: {occupations} occupation(s) still use it"
            ),
            EngineError::NoMatchingDates => {
                write!(f, "no date in the range falls on any of the requested weekdays")
            }
            EngineError::SchedulingConflict { occupation, date } => {
                write!(f, "scheduling conflict with occupation {occupation} on {date}")
            }
            EngineError::OccupationNotFound(id) => write!(f, "occupation not found: {id}"),
            EngineError::OccupationAlreadyExists(id) => {
                write!(f, "occupation already exists: {id}")
            }
            EngineError::NoCurrentOccupation(id) => {
                write!(f, "no occupation is active in room {id} right now")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<FormatError> for EngineError {
    fn from(e: FormatError) -> Self {
        EngineError::Format(e)
    }
}
