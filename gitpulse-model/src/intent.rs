use crate::error::{ModelError, Result};
use chrono::{DateTime, Utc};
use std::fmt::{self, Display};
use std::str::FromStr;
use uuid::Uuid;

/// Broadcast lifecycle of an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum IntentStatus {
    PendingBroadcast,
    SuccessBroadcast,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::PendingBroadcast => "pending_broadcast",
            IntentStatus::SuccessBroadcast => "success_broadcast",
        }
    }
}

impl Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending_broadcast" => Ok(IntentStatus::PendingBroadcast),
            "success_broadcast" => Ok(IntentStatus::SuccessBroadcast),
            other => Err(ModelError::InvalidValue(format!(
                "unknown intent status {other:?}"
            ))),
        }
    }
}

/// A request to harvest one repository's commit history from a start
/// date onward. Never hard-deleted; deactivated instead.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Intent {
    pub id: Uuid,
    pub repository_name: String,
    pub start_date: DateTime<Utc>,
    /// Advisory end of the watch window; not used to clamp harvesting.
    #[cfg_attr(feature = "serde", serde(rename = "end_date"))]
    pub until: DateTime<Utc>,
    pub status: IntentStatus,
    pub is_active: bool,
    #[cfg_attr(
        feature = "serde",
        serde(skip_serializing_if = "Option::is_none", default)
    )]
    pub error: Option<IntentError>,
}

/// Partial intent mutation applied by the store; `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct IntentUpdate {
    pub status: Option<IntentStatus>,
    pub is_active: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
}

/// A persisted failure record attached to an intent.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IntentError {
    pub id: Uuid,
    pub intent_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub message: String,
}

/// Listing filter; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct IntentFilter {
    pub status: Option<IntentStatus>,
    pub is_active: Option<bool>,
    pub repository_name: Option<String>,
}

/// Start dates in the future are meaningless for a history harvester.
pub fn validate_start_date(date: DateTime<Utc>) -> Result<()> {
    if date > Utc::now() {
        return Err(ModelError::InvalidStartDate);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_round_trips_through_text() {
        for status in [IntentStatus::PendingBroadcast, IntentStatus::SuccessBroadcast] {
            assert_eq!(status.as_str().parse::<IntentStatus>().unwrap(), status);
        }
        assert!("broadcasting".parse::<IntentStatus>().is_err());
    }

    #[test]
    fn future_start_dates_are_rejected() {
        assert_eq!(
            validate_start_date(Utc::now() + Duration::hours(1)),
            Err(ModelError::InvalidStartDate)
        );
        assert!(validate_start_date(Utc::now() - Duration::days(1)).is_ok());
    }
}
