use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type RoomId = Ulid;
pub type OccupationId = Ulid;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

// ── Input format errors ──────────────────────────────────────────

/// Malformed textual input: times, dates, weekday lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    Time(String),
    Date(String),
    Weekdays(String),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::Time(s) => write!(f, "invalid time {s:?}: expected HH:MM"),
            FormatError::Date(s) => write!(f, "invalid date {s:?}: expected YYYY-MM-DD"),
            FormatError::Weekdays(s) => {
                write!(f, "invalid weekday list {s:?}: expected ISO codes like 1,3,5")
            }
        }
    }
}

impl std::error::Error for FormatError {}

pub fn parse_date(s: &str) -> Result<NaiveDate, FormatError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| FormatError::Date(s.to_string()))
}

/// Parse `"1,3,5"` into raw codes. Range checking is left to [`WeekdaySet::from_iso`].
pub fn parse_weekday_codes(s: &str) -> Result<Vec<u8>, FormatError> {
    let trimmed = s.trim().trim_start_matches('{').trim_end_matches('}');
    if trimmed.trim().is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<u8>()
                .map_err(|_| FormatError::Weekdays(s.to_string()))
        })
        .collect()
}

// ── Time of day ──────────────────────────────────────────────────

/// Minute of the day, `0..1440`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self((hour * 60 + minute) as u16))
    }

    /// Parse `H:MM` or `HH:MM`.
    pub fn parse(s: &str) -> Result<Self, FormatError> {
        let err = || FormatError::Time(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(err)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(err());
        }
        if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let hour: u32 = h.parse().map_err(|_| err())?;
        let minute: u32 = m.parse().map_err(|_| err())?;
        Self::from_hm(hour, minute).ok_or_else(err)
    }

    /// Seconds are truncated.
    pub fn from_naive_time(t: NaiveTime) -> Self {
        Self((t.hour() * 60 + t.minute()) as u16)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u16 {
        self.0 / 60
    }

    pub fn minute(self) -> u16 {
        self.0 % 60
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for TimeOfDay {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Half-open overlap test on `HH:MM` strings.
pub fn overlaps(start_a: &str, end_a: &str, start_b: &str, end_b: &str) -> Result<bool, FormatError> {
    let (sa, ea) = (TimeOfDay::parse(start_a)?, TimeOfDay::parse(end_a)?);
    let (sb, eb) = (TimeOfDay::parse(start_b)?, TimeOfDay::parse(end_b)?);
    Ok(sa < eb && ea > sb)
}

/// Daily window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl TimeWindow {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        debug_assert!(start < end, "TimeWindow start must be before end");
        Self { start, end }
    }

    pub fn checked(start: TimeOfDay, end: TimeOfDay) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end.minutes() - self.start.minutes()
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn contains(&self, t: TimeOfDay) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Dates ────────────────────────────────────────────────────────

/// Inclusive calendar range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    pub fn checked(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    /// Number of calendar days covered, both ends included.
    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    pub fn intersection(&self, other: &DateRange) -> Option<DateRange> {
        Self::checked(self.start.max(other.start), self.end.min(other.end))
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

// ── Weekdays ─────────────────────────────────────────────────────

/// ISO 8601 day number: 1 = Monday .. 7 = Sunday.
pub fn iso_code(day: Weekday) -> u8 {
    day.number_from_monday() as u8
}

pub fn weekday_from_iso(code: u8) -> Option<Weekday> {
    match code {
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        7 => Some(Weekday::Sun),
        _ => None,
    }
}

/// Set of weekdays as a 7-bit mask; bit `n - 1` is ISO day `n`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const EMPTY: WeekdaySet = WeekdaySet(0);

    /// `None` if `codes` is empty or holds anything outside `1..=7`.
    pub fn from_iso(codes: &[u8]) -> Option<Self> {
        if codes.is_empty() {
            return None;
        }
        let mut set = Self::EMPTY;
        for &code in codes {
            set.insert(weekday_from_iso(code)?);
        }
        Some(set)
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << (iso_code(day) - 1);
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << (iso_code(day) - 1)) != 0
    }

    pub fn contains_date(&self, day: NaiveDate) -> bool {
        self.contains(day.weekday())
    }

    pub fn intersects(&self, other: &WeekdaySet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn intersection(&self, other: &WeekdaySet) -> WeekdaySet {
        WeekdaySet(self.0 & other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iso_codes(&self) -> Vec<u8> {
        (1..=7).filter(|c| self.0 & (1 << (c - 1)) != 0).collect()
    }
}

impl fmt::Display for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codes: Vec<String> = self.iso_codes().iter().map(u8::to_string).collect();
        f.write_str(&codes.join(","))
    }
}

// ── Rooms and occupations ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub room_number: String,
    pub floor: i32,
    pub building: String,
    pub desks: u32,
    pub chairs: u32,
    pub computers: u32,
    pub has_projector: bool,
    pub max_students: u32,
}

impl Room {
    /// A room with every amenity count at zero.
    pub fn bare(id: RoomId, room_number: impl Into<String>, building: impl Into<String>, floor: i32) -> Self {
        Self {
            id,
            room_number: room_number.into(),
            floor,
            building: building.into(),
            desks: 0,
            chairs: 0,
            computers: 0,
            has_projector: false,
            max_students: 0,
        }
    }
}

/// One recurring booking of a room: every day of `dates` whose weekday is in
/// `days`, from `window.start` up to (not including) `window.end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupation {
    pub id: OccupationId,
    pub room_id: RoomId,
    pub teacher: String,
    pub subject: String,
    pub dates: DateRange,
    pub window: TimeWindow,
    pub days: WeekdaySet,
}

impl Occupation {
    pub fn slot(&self) -> Slot {
        Slot {
            dates: self.dates,
            window: self.window,
            days: self.days,
        }
    }

    pub fn occurs_on(&self, day: NaiveDate) -> bool {
        self.dates.contains(day) && self.days.contains_date(day)
    }

    pub fn is_active_at(&self, day: NaiveDate, time: TimeOfDay) -> bool {
        self.occurs_on(day) && self.window.contains(time)
    }
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Sorted by `dates.start`.
    pub occupations: Vec<Occupation>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            occupations: Vec::new(),
        }
    }

    pub fn id(&self) -> RoomId {
        self.room.id
    }

    /// Insert keeping `dates.start` order; ties keep insertion order.
    pub fn insert_occupation(&mut self, occupation: Occupation) {
        let pos = self
            .occupations
            .partition_point(|o| o.dates.start <= occupation.dates.start);
        self.occupations.insert(pos, occupation);
    }

    pub fn remove_occupation(&mut self, id: OccupationId) -> Option<Occupation> {
        let pos = self.occupations.iter().position(|o| o.id == id)?;
        Some(self.occupations.remove(pos))
    }

    pub fn get_occupation(&self, id: OccupationId) -> Option<&Occupation> {
        self.occupations.iter().find(|o| o.id == id)
    }

    /// Occupations whose date range intersects `query`.
    /// Everything past the partition point starts after `query.end`.
    pub fn overlapping<'a>(&'a self, query: &DateRange) -> impl Iterator<Item = &'a Occupation> + use<'a> {
        let right_bound = self
            .occupations
            .partition_point(|o| o.dates.start <= query.end);
        let start = query.start;
        self.occupations[..right_bound]
            .iter()
            .filter(move |o| o.dates.end >= start)
    }

    pub fn active_at(&self, day: NaiveDate, time: TimeOfDay) -> impl Iterator<Item = &Occupation> {
        self.overlapping(&DateRange::single(day))
            .filter(move |o| o.is_active_at(day, time))
    }
}

/// A subject a teacher has been assigned at runtime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Discipline {
    pub teacher: String,
    pub subject: String,
}

/// A room together with the occupation active in it at some instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupiedRoom {
    pub room: Room,
    pub occupation: Occupation,
}

/// Transition seen by the occupancy sweep between two ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OccupancyChange {
    Occupied { room_id: RoomId, occupation: OccupationId },
    Vacated { room_id: RoomId, occupation: OccupationId },
}

// ── Log events ───────────────────────────────────────────────────

/// Log record format. One record per committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated { room: Room },
    RoomUpdated { room: Room },
    RoomDeleted { id: RoomId },
    /// A single schedule or a whole batch; applied all together or not at all.
    OccupationsScheduled { occupations: Vec<Occupation> },
    OccupationCancelled { id: OccupationId, room_id: RoomId },
    SubjectAssigned { discipline: Discipline },
    SubjectUnassigned { discipline: Discipline },
}

// ── Requests and filters ─────────────────────────────────────────

/// Raw slot parameters as they arrive from a caller, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRequest {
    pub room_id: RoomId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    /// ISO codes, 1 = Monday .. 7 = Sunday.
    pub days: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub id: OccupationId,
    pub teacher: String,
    pub subject: String,
    pub slot: SlotRequest,
}

/// Validated slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub dates: DateRange,
    pub window: TimeWindow,
    pub days: WeekdaySet,
}

/// Partial room update. `None` leaves the attribute as is.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RoomPatch {
    pub room_number: Option<String>,
    pub floor: Option<i32>,
    pub building: Option<String>,
    pub desks: Option<u32>,
    pub chairs: Option<u32>,
    pub computers: Option<u32>,
    pub has_projector: Option<bool>,
    pub max_students: Option<u32>,
}

impl RoomPatch {
    pub fn apply(&self, room: &mut Room) {
        if let Some(n) = &self.room_number {
            room.room_number = n.clone();
        }
        if let Some(b) = &self.building {
            room.building = b.clone();
        }
        room.floor = self.floor.unwrap_or(room.floor);
        room.desks = self.desks.unwrap_or(room.desks);
        room.chairs = self.chairs.unwrap_or(room.chairs);
        room.computers = self.computers.unwrap_or(room.computers);
        room.has_projector = self.has_projector.unwrap_or(room.has_projector);
        room.max_students = self.max_students.unwrap_or(room.max_students);
    }
}

/// Room search criteria. `None` fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomFilter {
    /// Keep rooms whose projector flag equals this.
    pub has_projector: Option<bool>,
    /// Keep rooms with `max_students >= min_capacity`.
    pub min_capacity: Option<u32>,
    /// Keep rooms with `max_students <= max_capacity`.
    pub max_capacity: Option<u32>,
    /// `true` keeps rooms free at the reference instant, `false` keeps occupied ones.
    pub is_available: Option<bool>,
    /// Exact room-number match.
    pub room_number: Option<String>,
}

impl RoomFilter {
    pub fn matches(&self, room: &Room, occupied: bool) -> bool {
        self.has_projector.is_none_or(|p| room.has_projector == p)
            && self.min_capacity.is_none_or(|min| room.max_students >= min)
            && self.max_capacity.is_none_or(|max| room.max_students <= max)
            && self.is_available.is_none_or(|avail| avail != occupied)
            && self
                .room_number
                .as_deref()
                .is_none_or(|n| room.room_number == n)
    }
}
