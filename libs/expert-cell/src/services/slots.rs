// libs/expert-cell/src/services/slots.rs
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use tracing::debug;

use crate::models::{DayOfWeek, Expert};

/// Enumerates candidate start times from an expert's declared windows.
///
/// Candidates are the theoretical supply; existing bookings are filtered out by
/// the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotGenerator;

impl SlotGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Walks every enabled rule for `date`'s weekday in steps of `duration_minutes`,
    /// keeping starts whose full interval ends within the rule. Output is ascending
    /// and free of duplicates.
    pub fn generate_slots(
        &self,
        expert: &Expert,
        date: NaiveDate,
        duration_minutes: i64,
    ) -> Vec<DateTime<Utc>> {
        if !expert.is_bookable() || duration_minutes <= 0 {
            return Vec::new();
        }

        let day = DayOfWeek::from(date.weekday());
        let Some(midnight) = date.and_hms_opt(0, 0, 0) else {
            return Vec::new();
        };
        let midnight = Utc.from_utc_datetime(&midnight);

        let mut slots = Vec::new();
        for rule in expert.enabled_rules_for(day) {
            let window_end = i64::from(rule.end_time.minutes());
            let mut offset = i64::from(rule.start_time.minutes());

            while offset + duration_minutes <= window_end {
                slots.push(midnight + Duration::minutes(offset));
                offset += duration_minutes;
            }
        }

        slots.sort();
        slots.dedup();

        debug!(
            "Generated {} candidate slots for expert {} on {} ({} min)",
            slots.len(),
            expert.id,
            date,
            duration_minutes
        );
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use uuid::Uuid;

    use crate::models::{AvailabilitySlotRule, ClockTime, OperationalStatus};
    use crate::services::AvailabilityCalendar;

    fn t(hhmm: &str) -> ClockTime {
        hhmm.parse().unwrap()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_isoywd_opt(2031, 20, Weekday::Mon).unwrap()
    }

    fn at(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(&date.and_hms_opt(hour, minute, 0).unwrap())
    }

    fn expert_with(rules: Vec<AvailabilitySlotRule>) -> Expert {
        let mut expert = Expert::new(Uuid::new_v4());
        expert.availability_rules = rules;
        expert
    }

    #[test]
    fn morning_window_yields_hourly_slots() {
        let expert = expert_with(vec![AvailabilitySlotRule::new(DayOfWeek::Monday, t("09:00"), t("12:00"))]);
        let slots = SlotGenerator::new().generate_slots(&expert, monday(), 60);

        assert_eq!(slots, vec![at(monday(), 9, 0), at(monday(), 10, 0), at(monday(), 11, 0)]);
    }

    #[test]
    fn partial_tail_is_not_offered() {
        let expert = expert_with(vec![AvailabilitySlotRule::new(DayOfWeek::Monday, t("09:00"), t("10:45"))]);
        let slots = SlotGenerator::new().generate_slots(&expert, monday(), 30);

        assert_eq!(
            slots,
            vec![at(monday(), 9, 0), at(monday(), 9, 30), at(monday(), 10, 0)]
        );
    }

    #[test]
    fn multiple_rules_are_merged_in_order() {
        let expert = expert_with(vec![
            AvailabilitySlotRule::new(DayOfWeek::Monday, t("14:00"), t("15:00")),
            AvailabilitySlotRule::new(DayOfWeek::Monday, t("09:00"), t("10:00")),
            AvailabilitySlotRule::new(DayOfWeek::Tuesday, t("09:00"), t("17:00")),
            AvailabilitySlotRule::new(DayOfWeek::Monday, t("11:00"), t("12:00")).disabled(),
        ]);
        let slots = SlotGenerator::new().generate_slots(&expert, monday(), 60);

        assert_eq!(slots, vec![at(monday(), 9, 0), at(monday(), 14, 0)]);
    }

    #[test]
    fn nothing_is_offered_when_expert_is_unavailable_or_duration_invalid() {
        let mut expert = expert_with(vec![AvailabilitySlotRule::new(DayOfWeek::Monday, t("09:00"), t("12:00"))]);
        let generator = SlotGenerator::new();

        assert!(generator.generate_slots(&expert, monday(), 0).is_empty());
        assert!(generator.generate_slots(&expert, monday(), -30).is_empty());
        assert!(generator.generate_slots(&expert, monday().succ_opt().unwrap(), 60).is_empty());

        expert.operational_status = OperationalStatus::Inactive;
        assert!(generator.generate_slots(&expert, monday(), 60).is_empty());
    }

    #[test]
    fn window_closing_at_midnight_offers_last_slot() {
        let expert = expert_with(vec![AvailabilitySlotRule::new(DayOfWeek::Monday, t("22:00"), t("24:00"))]);
        let slots = SlotGenerator::new().generate_slots(&expert, monday(), 60);

        assert_eq!(slots, vec![at(monday(), 22, 0), at(monday(), 23, 0)]);
    }

    #[test]
    fn generation_is_deterministic_and_contained_in_declared_availability() {
        let expert = expert_with(vec![
            AvailabilitySlotRule::new(DayOfWeek::Monday, t("08:15"), t("11:40")),
            AvailabilitySlotRule::new(DayOfWeek::Monday, t("13:00"), t("18:00")),
        ]);
        let generator = SlotGenerator::new();
        let calendar = AvailabilityCalendar::new();

        for duration in [15, 25, 45, 60, 90] {
            let first = generator.generate_slots(&expert, monday(), duration);
            let second = generator.generate_slots(&expert, monday(), duration);
            assert_eq!(first, second);
            assert!(first.windows(2).all(|pair| pair[0] < pair[1]));

            for slot in first {
                assert!(calendar.is_within_declared_availability(&expert, slot, duration));
            }
        }
    }
}
