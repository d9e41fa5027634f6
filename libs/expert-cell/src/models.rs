// libs/expert-cell/src/models.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use shared_database::RepositoryError;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

// ==============================================================================
// TIME-OF-DAY
// ==============================================================================

/// Minute-precision time of day, stored as minutes since midnight.
///
/// Parsed only from zero-padded 24-hour `HH:MM`. `24:00` is accepted so a window
/// can close at the end of the day. Ordering is numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u16);

impl ClockTime {
    pub const MIDNIGHT: ClockTime = ClockTime(0);
    pub const END_OF_DAY: ClockTime = ClockTime(MINUTES_PER_DAY);

    pub fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        if minute >= 60 {
            return None;
        }
        let total = hour.checked_mul(60)?.checked_add(minute)?;
        (total <= MINUTES_PER_DAY).then_some(ClockTime(total))
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

    /// `None` when the result would run past `24:00`.
    pub fn checked_add_minutes(self, minutes: i64) -> Option<Self> {
        let total = i64::from(self.0).checked_add(minutes)?;
        if (0..=i64::from(MINUTES_PER_DAY)).contains(&total) {
            Some(ClockTime(total as u16))
        } else {
            None
        }
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for ClockTime {
    type Err = ExpertError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ExpertError::InvalidRule(format!("'{}' is not a zero-padded HH:MM time", value));

        let bytes = value.as_bytes();
        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(invalid());
        }
        let digits = [bytes[0], bytes[1], bytes[3], bytes[4]];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(invalid());
        }

        let hour = u16::from(digits[0] - b'0') * 10 + u16::from(digits[1] - b'0');
        let minute = u16::from(digits[2] - b'0') * 10 + u16::from(digits[3] - b'0');
        ClockTime::from_hm(hour, minute).ok_or_else(invalid)
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ==============================================================================
// CORE EXPERT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl From<Weekday> for DayOfWeek {
    fn from(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
            DayOfWeek::Sunday => "sunday",
        };
        f.write_str(name)
    }
}

/// One recurring weekly window during which an expert takes appointments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlotRule {
    pub id: Uuid,
    pub day_of_week: DayOfWeek,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    pub is_enabled: bool,
}

impl AvailabilitySlotRule {
    pub fn new(day_of_week: DayOfWeek, start_time: ClockTime, end_time: ClockTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            day_of_week,
            start_time,
            end_time,
            is_enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self
    }

    /// Half-open window overlap on the same weekday. Touching windows do not overlap.
    pub fn overlaps(&self, other: &AvailabilitySlotRule) -> bool {
        self.day_of_week == other.day_of_week
            && self.start_time < other.end_time
            && other.start_time < self.end_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationalStatus {
    Active,
    Inactive,
    OnLeave,
}

impl fmt::Display for OperationalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationalStatus::Active => write!(f, "active"),
            OperationalStatus::Inactive => write!(f, "inactive"),
            OperationalStatus::OnLeave => write!(f, "on_leave"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expert {
    pub id: Uuid,
    pub availability_rules: Vec<AvailabilitySlotRule>,
    pub is_accepting_appointments: bool,
    pub operational_status: OperationalStatus,
    /// Bumped by every successful save; writers compare it to detect lost updates.
    #[serde(default)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Expert {
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            availability_rules: Vec::new(),
            is_accepting_appointments: true,
            operational_status: OperationalStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the expert may be offered or booked at all, regardless of rules.
    pub fn is_bookable(&self) -> bool {
        self.operational_status == OperationalStatus::Active && self.is_accepting_appointments
    }

    pub fn enabled_rules_for(&self, day: DayOfWeek) -> impl Iterator<Item = &AvailabilitySlotRule> {
        self.availability_rules
            .iter()
            .filter(move |rule| rule.is_enabled && rule.day_of_week == day)
    }

    pub fn rule(&self, rule_id: Uuid) -> Option<&AvailabilitySlotRule> {
        self.availability_rules.iter().find(|rule| rule.id == rule_id)
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRuleInput {
    #[serde(alias = "dayOfWeek")]
    pub day_of_week: DayOfWeek,
    #[serde(alias = "startTime")]
    pub start_time: ClockTime,
    #[serde(alias = "endTime")]
    pub end_time: ClockTime,
    #[serde(alias = "isEnabled")]
    pub is_enabled: Option<bool>,
}

impl AvailabilityRuleInput {
    pub fn into_rule(self) -> AvailabilitySlotRule {
        AvailabilitySlotRule {
            id: Uuid::new_v4(),
            day_of_week: self.day_of_week,
            start_time: self.start_time,
            end_time: self.end_time,
            is_enabled: self.is_enabled.unwrap_or(true),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateExpertRequest {
    pub id: Option<Uuid>,
    #[serde(alias = "operationalStatus")]
    pub operational_status: Option<OperationalStatus>,
    #[serde(alias = "isAcceptingAppointments")]
    pub is_accepting_appointments: Option<bool>,
    #[serde(default, alias = "availabilityRules")]
    pub availability_rules: Vec<AvailabilityRuleInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateExpertStatusRequest {
    #[serde(alias = "operationalStatus")]
    pub operational_status: Option<OperationalStatus>,
    #[serde(alias = "isAcceptingAppointments")]
    pub is_accepting_appointments: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAvailabilityRuleRequest {
    #[serde(alias = "startTime")]
    pub start_time: Option<ClockTime>,
    #[serde(alias = "endTime")]
    pub end_time: Option<ClockTime>,
    #[serde(alias = "isEnabled")]
    pub is_enabled: Option<bool>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpertError {
    #[error("Expert {0} not found")]
    NotFound(Uuid),

    #[error("Expert {0} already exists")]
    AlreadyExists(Uuid),

    #[error("Availability rule {0} not found")]
    RuleNotFound(Uuid),

    #[error("Invalid availability rule: {0}")]
    InvalidRule(String),

    #[error("Availability {day} {start}-{end} overlaps existing rule {existing_start}-{existing_end}")]
    OverlappingRule {
        day: DayOfWeek,
        start: ClockTime,
        end: ClockTime,
        existing_start: ClockTime,
        existing_end: ClockTime,
    },

    #[error("Expert {0} kept changing underneath the update, try again")]
    ConcurrentModification(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] RepositoryError),
}
