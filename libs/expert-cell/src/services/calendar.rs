// libs/expert-cell/src/services/calendar.rs
use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    AvailabilityRuleInput, AvailabilitySlotRule, ClockTime, DayOfWeek, Expert, ExpertError,
    UpdateAvailabilityRuleRequest,
};

/// Answers whether an interval sits inside an expert's declared weekly windows.
/// Existing bookings are not consulted here.
#[derive(Debug, Clone, Copy, Default)]
pub struct AvailabilityCalendar;

impl AvailabilityCalendar {
    pub fn new() -> Self {
        Self
    }

    /// Fails closed for inactive experts, experts not accepting appointments,
    /// non-positive durations and start times that are not minute-aligned.
    pub fn is_within_declared_availability(
        &self,
        expert: &Expert,
        start_time: DateTime<Utc>,
        duration_minutes: i64,
    ) -> bool {
        if !expert.is_bookable() {
            debug!(
                "Expert {} is not bookable (status {}, accepting {})",
                expert.id, expert.operational_status, expert.is_accepting_appointments
            );
            return false;
        }

        if duration_minutes <= 0 || start_time.second() != 0 || start_time.nanosecond() != 0 {
            return false;
        }

        let day = DayOfWeek::from(start_time.weekday());
        // hour() and minute() are bounded, so this cannot fail.
        let Some(start_clock) = ClockTime::from_hm(start_time.hour() as u16, start_time.minute() as u16) else {
            return false;
        };
        let Some(end_clock) = start_clock.checked_add_minutes(duration_minutes) else {
            return false;
        };

        expert
            .enabled_rules_for(day)
            .any(|rule| rule.start_time <= start_clock && end_clock <= rule.end_time)
    }

    /// Checks every rule's bounds and that enabled rules on the same day do not overlap.
    pub fn validate_rules(&self, rules: &[AvailabilitySlotRule]) -> Result<(), ExpertError> {
        for rule in rules {
            Self::validate_bounds(rule)?;
        }

        let enabled: Vec<&AvailabilitySlotRule> = rules.iter().filter(|r| r.is_enabled).collect();
        for (index, rule) in enabled.iter().enumerate() {
            if let Some(existing) = enabled[..index].iter().find(|other| other.overlaps(rule)) {
                warn!(
                    "Rejecting overlapping availability {} {}-{} (existing {}-{})",
                    rule.day_of_week, rule.start_time, rule.end_time, existing.start_time, existing.end_time
                );
                return Err(ExpertError::OverlappingRule {
                    day: rule.day_of_week,
                    start: rule.start_time,
                    end: rule.end_time,
                    existing_start: existing.start_time,
                    existing_end: existing.end_time,
                });
            }
        }

        Ok(())
    }

    pub fn add_rule(
        &self,
        expert: &mut Expert,
        input: AvailabilityRuleInput,
    ) -> Result<AvailabilitySlotRule, ExpertError> {
        let rule = input.into_rule();
        let mut candidate = expert.availability_rules.clone();
        candidate.push(rule.clone());

        self.validate_rules(&candidate)?;

        expert.availability_rules = Self::sorted(candidate);
        expert.updated_at = Utc::now();
        debug!("Added availability rule {} for expert {}", rule.id, expert.id);
        Ok(rule)
    }

    pub fn update_rule(
        &self,
        expert: &mut Expert,
        rule_id: Uuid,
        request: UpdateAvailabilityRuleRequest,
    ) -> Result<AvailabilitySlotRule, ExpertError> {
        let mut candidate = expert.availability_rules.clone();
        let rule = candidate
            .iter_mut()
            .find(|rule| rule.id == rule_id)
            .ok_or(ExpertError::RuleNotFound(rule_id))?;

        if let Some(start) = request.start_time {
            rule.start_time = start;
        }
        if let Some(end) = request.end_time {
            rule.end_time = end;
        }
        if let Some(enabled) = request.is_enabled {
            rule.is_enabled = enabled;
        }
        let updated = rule.clone();

        self.validate_rules(&candidate)?;

        expert.availability_rules = Self::sorted(candidate);
        expert.updated_at = Utc::now();
        Ok(updated)
    }

    /// Replaces the whole rule set, validating it first.
    pub fn replace_rules(
        &self,
        expert: &mut Expert,
        rules: Vec<AvailabilitySlotRule>,
    ) -> Result<(), ExpertError> {
        self.validate_rules(&rules)?;
        expert.availability_rules = Self::sorted(rules);
        expert.updated_at = Utc::now();
        Ok(())
    }

    fn validate_bounds(rule: &AvailabilitySlotRule) -> Result<(), ExpertError> {
        if rule.start_time >= rule.end_time {
            return Err(ExpertError::InvalidRule(format!(
                "start time {} must be before end time {}",
                rule.start_time, rule.end_time
            )));
        }
        Ok(())
    }

    fn sorted(mut rules: Vec<AvailabilitySlotRule>) -> Vec<AvailabilitySlotRule> {
        rules.sort_by_key(|rule| (rule.day_of_week, rule.start_time));
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{NaiveDate, TimeZone, Weekday};

    use crate::models::OperationalStatus;

    fn t(hhmm: &str) -> ClockTime {
        hhmm.parse().unwrap()
    }

    fn monday_at(hour: u32, minute: u32) -> DateTime<Utc> {
        let monday = NaiveDate::from_isoywd_opt(2031, 20, Weekday::Mon).unwrap();
        Utc.from_utc_datetime(&monday.and_hms_opt(hour, minute, 0).unwrap())
    }

    fn expert_with(rules: Vec<AvailabilitySlotRule>) -> Expert {
        let mut expert = Expert::new(Uuid::new_v4());
        expert.availability_rules = rules;
        expert
    }

    #[test]
    fn interval_must_fit_inside_one_enabled_rule() {
        let calendar = AvailabilityCalendar::new();
        let expert = expert_with(vec![AvailabilitySlotRule::new(DayOfWeek::Monday, t("09:00"), t("12:00"))]);

        assert!(calendar.is_within_declared_availability(&expert, monday_at(9, 0), 60));
        assert!(calendar.is_within_declared_availability(&expert, monday_at(11, 0), 60));
        assert!(!calendar.is_within_declared_availability(&expert, monday_at(11, 30), 60));
        assert!(!calendar.is_within_declared_availability(&expert, monday_at(8, 30), 60));
        assert!(!calendar.is_within_declared_availability(&expert, monday_at(9, 0) + chrono::Duration::days(1), 60));
    }

    #[test]
    fn contiguous_rules_cannot_be_spanned() {
        let calendar = AvailabilityCalendar::new();
        let expert = expert_with(vec![
            AvailabilitySlotRule::new(DayOfWeek::Monday, t("09:00"), t("12:00")),
            AvailabilitySlotRule::new(DayOfWeek::Monday, t("12:00"), t("15:00")),
        ]);

        assert!(!calendar.is_within_declared_availability(&expert, monday_at(11, 30), 60));
        assert!(calendar.is_within_declared_availability(&expert, monday_at(12, 0), 60));
    }

    #[test]
    fn fails_closed_when_expert_is_not_bookable() {
        let calendar = AvailabilityCalendar::new();
        let mut expert = expert_with(vec![AvailabilitySlotRule::new(DayOfWeek::Monday, t("09:00"), t("12:00"))]);

        expert.is_accepting_appointments = false;
        assert!(!calendar.is_within_declared_availability(&expert, monday_at(9, 0), 60));

        expert.is_accepting_appointments = true;
        expert.operational_status = OperationalStatus::OnLeave;
        assert!(!calendar.is_within_declared_availability(&expert, monday_at(9, 0), 60));
    }

    #[test]
    fn disabled_rules_and_unaligned_starts_are_not_offered() {
        let calendar = AvailabilityCalendar::new();
        let expert = expert_with(vec![
            AvailabilitySlotRule::new(DayOfWeek::Monday, t("09:00"), t("12:00")).disabled(),
            AvailabilitySlotRule::new(DayOfWeek::Monday, t("14:00"), t("16:00")),
        ]);

        assert!(!calendar.is_within_declared_availability(&expert, monday_at(9, 0), 60));
        assert!(!calendar.is_within_declared_availability(
            &expert,
            monday_at(14, 0) + chrono::Duration::seconds(30),
            60
        ));
    }

    #[test]
    fn rule_ending_at_midnight_accepts_last_slot() {
        let calendar = AvailabilityCalendar::new();
        let expert = expert_with(vec![AvailabilitySlotRule::new(DayOfWeek::Monday, t("22:00"), t("24:00"))]);

        assert!(calendar.is_within_declared_availability(&expert, monday_at(23, 0), 60));
        assert!(!calendar.is_within_declared_availability(&expert, monday_at(23, 30), 60));
    }

    #[test]
    fn adding_an_overlapping_enabled_rule_is_rejected() {
        let calendar = AvailabilityCalendar::new();
        let mut expert = expert_with(vec![AvailabilitySlotRule::new(DayOfWeek::Monday, t("09:00"), t("12:00"))]);

        let overlapping = AvailabilityRuleInput {
            day_of_week: DayOfWeek::Monday,
            start_time: t("11:00"),
            end_time: t("13:00"),
            is_enabled: None,
        };
        assert_matches!(
            calendar.add_rule(&mut expert, overlapping.clone()),
            Err(ExpertError::OverlappingRule { day: DayOfWeek::Monday, .. })
        );
        assert_eq!(expert.availability_rules.len(), 1);

        let disabled = AvailabilityRuleInput { is_enabled: Some(false), ..overlapping };
        assert!(calendar.add_rule(&mut expert, disabled).is_ok());

        let other_day = AvailabilityRuleInput {
            day_of_week: DayOfWeek::Tuesday,
            start_time: t("11:00"),
            end_time: t("13:00"),
            is_enabled: None,
        };
        assert!(calendar.add_rule(&mut expert, other_day).is_ok());
        assert_eq!(expert.availability_rules.len(), 3);
    }

    #[test]
    fn enabling_a_rule_revalidates_overlap() {
        let calendar = AvailabilityCalendar::new();
        let disabled = AvailabilitySlotRule::new(DayOfWeek::Monday, t("10:00"), t("11:00")).disabled();
        let disabled_id = disabled.id;
        let mut expert = expert_with(vec![
            AvailabilitySlotRule::new(DayOfWeek::Monday, t("09:00"), t("12:00")),
            disabled,
        ]);

        let result = calendar.update_rule(
            &mut expert,
            disabled_id,
            UpdateAvailabilityRuleRequest { is_enabled: Some(true), ..Default::default() },
        );
        assert_matches!(result, Err(ExpertError::OverlappingRule { .. }));
        assert!(!expert.rule(disabled_id).unwrap().is_enabled);
    }

    #[test]
    fn inverted_rule_is_invalid() {
        let calendar = AvailabilityCalendar::new();
        let rules = vec![AvailabilitySlotRule::new(DayOfWeek::Friday, t("12:00"), t("12:00"))];
        assert_matches!(calendar.validate_rules(&rules), Err(ExpertError::InvalidRule(_)));
    }

    #[test]
    fn unknown_rule_update_is_reported() {
        let calendar = AvailabilityCalendar::new();
        let mut expert = expert_with(vec![]);
        let missing = Uuid::new_v4();
        assert_eq!(
            calendar.update_rule(&mut expert, missing, UpdateAvailabilityRuleRequest::default()).unwrap_err(),
            ExpertError::RuleNotFound(missing)
        );
    }
}
