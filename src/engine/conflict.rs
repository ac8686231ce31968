use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::recurrence::{expand, first_common_date};
use super::EngineError;

/// Structural checks, in order: date range, time window, weekday set, range width.
pub(crate) fn validate_slot(req: &SlotRequest) -> Result<Slot, EngineError> {
    let dates = DateRange::checked(req.start_date, req.end_date).ok_or(EngineError::InvalidRange {
        start: req.start_date,
        end: req.end_date,
    })?;
    let window =
        TimeWindow::checked(req.start_time, req.end_time).ok_or(EngineError::InvalidTimeWindow)?;
    let days =
        WeekdaySet::from_iso(&req.days).ok_or_else(|| EngineError::InvalidWeekdaySet(req.days.clone()))?;
    if dates.len_days() > MAX_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(Slot { dates, window, days })
}

pub(crate) fn validate_labels(teacher: &str, subject: &str) -> Result<(), EngineError> {
    if teacher.len() > MAX_TEACHER_LEN {
        return Err(EngineError::LimitExceeded("teacher too long"));
    }
    if subject.len() > MAX_SUBJECT_LEN {
        return Err(EngineError::LimitExceeded("subject too long"));
    }
    Ok(())
}

pub(crate) fn validate_room(room: &Room) -> Result<(), EngineError> {
    if room.room_number.len() > MAX_ROOM_NUMBER_LEN {
        return Err(EngineError::LimitExceeded("room number too long"));
    }
    if room.building.len() > MAX_BUILDING_LEN {
        return Err(EngineError::LimitExceeded("building name too long"));
    }
    Ok(())
}

/// Expanded dates of a validated slot; an empty expansion is an error.
pub(crate) fn occurrence_dates(slot: &Slot) -> Result<Vec<NaiveDate>, EngineError> {
    let dates = expand(slot.dates, slot.days);
    if dates.is_empty() {
        return Err(EngineError::NoMatchingDates);
    }
    Ok(dates)
}

/// Earliest date on which `existing` and `candidate` are both held with
/// overlapping daily windows. Sharing a weekday is not enough: the date must
/// lie in both ranges.
pub(crate) fn clash_date(existing: &Slot, candidate: &Slot) -> Option<NaiveDate> {
    if !existing.window.overlaps(&candidate.window) || !existing.days.intersects(&candidate.days) {
        return None;
    }
    first_common_date(existing, candidate)
}

/// Stored occupation that clashes with `slot` earliest, and the date it clashes on.
/// One pass over the occupations whose ranges intersect the slot's.
pub(crate) fn first_clash<'a>(rs: &'a RoomState, slot: &Slot) -> Option<(&'a Occupation, NaiveDate)> {
    rs.overlapping(&slot.dates)
        .filter_map(|existing| clash_date(&existing.slot(), slot).map(|date| (existing, date)))
        .min_by_key(|(_, date)| *date)
}

/// Stored occupation that collides with the candidate series: both are held
/// on at least one common calendar date, with overlapping daily windows.
pub fn find_conflict<'a>(
    rs: &'a RoomState,
    dates: &DateRange,
    window: &TimeWindow,
    days: &WeekdaySet,
) -> Option<&'a Occupation> {
    let slot = Slot {
        dates: *dates,
        window: *window,
        days: *days,
    };
    first_clash(rs, &slot).map(|(existing, _)| existing)
}

pub(crate) fn check_no_conflict(rs: &RoomState, slot: &Slot) -> Result<(), EngineError> {
    match first_clash(rs, slot) {
        Some((existing, date)) => Err(EngineError::SchedulingConflict {
            occupation: existing.id,
            date,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn t(s: &str) -> TimeOfDay {
        TimeOfDay::parse(s).unwrap()
    }

    fn slot_req(start: &str, end: &str, from: &str, to: &str, days: &[u8]) -> SlotRequest {
        SlotRequest {
            room_id: Ulid::new(),
            start_date: d(start),
            end_date: d(end),
            start_time: t(from),
            end_time: t(to),
            days: days.to_vec(),
        }
    }

    fn room_with(existing: &[(&str, &str, &str, &str, &[u8])]) -> RoomState {
        let mut rs = RoomState::new(Room::bare(Ulid::new(), "101", "A", 1));
        for (start, end, from, to, days) in existing {
            let slot = validate_slot(&slot_req(start, end, from, to, days)).unwrap();
            rs.insert_occupation(Occupation {
                id: Ulid::new(),
                room_id: rs.id(),
                teacher: "prof@school.edu".into(),
                subject: "Physics".into(),
                dates: slot.dates,
                window: slot.window,
                days: slot.days,
            });
        }
        rs
    }

    fn conflict_for(rs: &RoomState, req: &SlotRequest) -> Result<(), EngineError> {
        let slot = validate_slot(req)?;
        occurrence_dates(&slot)?;
        check_no_conflict(rs, &slot)
    }

    #[test]
    fn validation_order() {
        let mut req = slot_req("2025-06-30", "2025-06-01", "09:00", "08:00", &[]);
        assert!(matches!(validate_slot(&req), Err(EngineError::InvalidRange { .. })));
        req.end_date = d("2025-07-01");
        assert!(matches!(validate_slot(&req), Err(EngineError::InvalidTimeWindow)));
        req.end_time = t("10:00");
        assert!(matches!(validate_slot(&req), Err(EngineError::InvalidWeekdaySet(_))));
        req.days = vec![0, 1];
        assert!(matches!(validate_slot(&req), Err(EngineError::InvalidWeekdaySet(_))));
        req.days = vec![1];
        assert!(validate_slot(&req).is_ok());
    }

    #[test]
    fn equal_times_are_an_invalid_window() {
        let req = slot_req("2025-06-01", "2025-06-01", "09:00", "09:00", &[7]);
        assert!(matches!(validate_slot(&req), Err(EngineError::InvalidTimeWindow)));
    }

    #[test]
    fn too_wide_range_rejected() {
        let req = slot_req("2020-01-01", "2030-01-01", "09:00", "10:00", &[1]);
        assert!(matches!(validate_slot(&req), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn empty_expansion_is_no_matching_dates() {
        let slot = validate_slot(&slot_req("2025-06-03", "2025-06-05", "09:00", "10:00", &[6, 7])).unwrap();
        assert!(matches!(occurrence_dates(&slot), Err(EngineError::NoMatchingDates)));
    }

    #[test]
    fn overlapping_window_on_shared_day_conflicts() {
        let rs = room_with(&[("2025-06-01", "2025-06-30", "08:00", "09:00", &[1, 3])]);
        let req = slot_req("2025-06-01", "2025-06-30", "08:30", "09:30", &[3]);
        match conflict_for(&rs, &req) {
            Err(EngineError::SchedulingConflict { occupation, date }) => {
                assert_eq!(occupation, rs.occupations[0].id);
                assert_eq!(date, d("2025-06-04"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn touching_window_does_not_conflict() {
        let rs = room_with(&[("2025-06-01", "2025-06-30", "08:00", "09:00", &[1, 3])]);
        let req = slot_req("2025-06-01", "2025-06-30", "09:00", "10:00", &[3]);
        assert!(conflict_for(&rs, &req).is_ok());
    }

    #[test]
    fn identical_booking_conflicts() {
        let rs = room_with(&[("2025-06-01", "2025-06-30", "08:00", "09:00", &[1, 3])]);
        let req = slot_req("2025-06-01", "2025-06-30", "08:00", "09:00", &[1, 3]);
        assert!(matches!(conflict_for(&rs, &req), Err(EngineError::SchedulingConflict { .. })));
    }

    #[test]
    fn disjoint_weekdays_do_not_conflict() {
        let rs = room_with(&[("2025-06-01", "2025-06-30", "08:00", "09:00", &[1, 3])]);
        let req = slot_req("2025-06-01", "2025-06-30", "08:00", "09:00", &[2, 4]);
        assert!(conflict_for(&rs, &req).is_ok());
    }

    #[test]
    fn disjoint_ranges_do_not_conflict() {
        let rs = room_with(&[("2025-06-01", "2025-06-30", "08:00", "09:00", &[1, 3])]);
        let req = slot_req("2025-07-01", "2025-07-31", "08:00", "09:00", &[1, 3]);
        assert!(conflict_for(&rs, &req).is_ok());
    }

    #[test]
    fn single_day_candidate_against_multi_day_range() {
        let rs = room_with(&[("2025-06-01", "2025-06-30", "08:00", "09:00", &[1, 3])]);
        // Last day of the stored range, a Monday.
        let req = slot_req("2025-06-30", "2025-06-30", "08:15", "08:45", &[1]);
        assert!(matches!(conflict_for(&rs, &req), Err(EngineError::SchedulingConflict { .. })));
    }

    #[test]
    fn multi_day_candidate_against_single_day_booking() {
        let rs = room_with(&[("2025-06-18", "2025-06-18", "10:00", "12:00", &[3])]);
        let req = slot_req("2025-06-01", "2025-08-31", "11:00", "13:00", &[3]);
        match conflict_for(&rs, &req) {
            Err(EngineError::SchedulingConflict { date, .. }) => assert_eq!(date, d("2025-06-18")),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn shared_weekday_without_shared_date_is_free() {
        // Stored: Monday 06-02 and Tuesday 06-03 only.
        let rs = room_with(&[("2025-06-02", "2025-06-03", "08:00", "09:00", &[1, 2])]);
        // Candidate covers Tuesday 06-03 .. Sunday 06-08 on Mondays and Fridays:
        // ranges overlap and {1,2} meets {1,5}, but no Monday lies in the overlap.
        let req = slot_req("2025-06-03", "2025-06-08", "08:00", "09:00", &[1, 5]);
        assert!(conflict_for(&rs, &req).is_ok());
    }

    #[test]
    fn detector_agrees_with_check_on_shared_weekday_only() {
        let rs = room_with(&[("2025-06-02", "2025-06-03", "08:00", "09:00", &[1, 2])]);
        let range = DateRange::new(d("2025-06-03"), d("2025-06-08"));
        let window = TimeWindow::new(t("08:00"), t("09:00"));
        let days = WeekdaySet::from_iso(&[1, 5]).unwrap();
        assert!(find_conflict(&rs, &range, &window, &days).is_none());

        // Tuesday 06-03 is in both.
        let days = WeekdaySet::from_iso(&[2]).unwrap();
        assert_eq!(find_conflict(&rs, &range, &window, &days).map(|o| o.id), Some(rs.occupations[0].id));
    }

    #[test]
    fn earliest_clash_wins_across_occupations() {
        let rs = room_with(&[
            ("2025-06-01", "2025-06-30", "08:00", "09:00", &[5]),
            ("2025-06-10", "2025-06-10", "08:00", "09:00", &[2]),
        ]);
        let req = slot_req("2025-06-01", "2025-06-30", "08:30", "09:30", &[2, 5]);
        match conflict_for(&rs, &req) {
            Err(EngineError::SchedulingConflict { date, .. }) => assert_eq!(date, d("2025-06-06")),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn clash_date_needs_overlapping_windows() {
        let a = validate_slot(&slot_req("2025-06-01", "2025-06-30", "08:00", "09:00", &[1])).unwrap();
        let b = validate_slot(&slot_req("2025-06-01", "2025-06-30", "09:00", "10:00", &[1])).unwrap();
        assert_eq!(clash_date(&a, &b), None);
        let c = validate_slot(&slot_req("2025-06-10", "2025-06-30", "08:59", "10:00", &[1])).unwrap();
        assert_eq!(clash_date(&a, &c), Some(d("2025-06-16")));
    }

    #[test]
    fn literal_detector_on_whole_series() {
        let rs = room_with(&[("2025-06-01", "2025-06-30", "08:00", "09:00", &[1, 3])]);
        let range = DateRange::new(d("2025-06-15"), d("2025-07-15"));
        let window = TimeWindow::new(t("08:59"), t("09:30"));
        let hit = find_conflict(&rs, &range, &window, &WeekdaySet::from_iso(&[3]).unwrap());
        assert_eq!(hit.map(|o| o.id), Some(rs.occupations[0].id));

        let miss = find_conflict(&rs, &range, &window, &WeekdaySet::from_iso(&[5]).unwrap());
        assert!(miss.is_none());
    }

    #[test]
    fn empty_room_never_conflicts() {
        let rs = room_with(&[]);
        let req = slot_req("2025-06-01", "2025-06-30", "00:00", "23:59", &[1, 2, 3, 4, 5, 6, 7]);
        assert!(conflict_for(&rs, &req).is_ok());
    }
}
