//! Hard caps on input sizes and store growth. Each is checked before a log
//! record is written.

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_OCCUPATIONS_PER_ROOM: usize = 50_000;
pub const MAX_DISCIPLINES: usize = 100_000;

pub const MAX_ROOM_NUMBER_LEN: usize = 32;
pub const MAX_BUILDING_LEN: usize = 128;
pub const MAX_TEACHER_LEN: usize = 256;
pub const MAX_SUBJECT_LEN: usize = 256;

/// Widest date range a single occupation may cover (a little over five years).
pub const MAX_RANGE_DAYS: i64 = 5 * 366;

/// Most occupations accepted in one all-or-nothing batch.
pub const MAX_BATCH_SIZE: usize = 1_000;
