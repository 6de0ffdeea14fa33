use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflows::location::AccessLevel;

pub const CITIZEN_ACTOR: &str = "Citizen";

/// What an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Submitted,
    Forwarded,
    Returned,
    Pulled,
    Sanctioned,
    Rejected,
    ReturnedToCitizen,
    Resubmitted,
    CorrigendumOpened,
    Withheld,
    Released,
}

impl ActionKind {
    pub const fn label(self) -> &'static str {
        match self {
            ActionKind::Submitted => "Submitted",
            ActionKind::Forwarded => "Forwarded",
            ActionKind::Returned => "Returned",
            ActionKind::Pulled => "Pulled",
            ActionKind::Sanctioned => "Sanctioned",
            ActionKind::Rejected => "Rejected",
            ActionKind::ReturnedToCitizen => "Returned to citizen for correction",
            ActionKind::Resubmitted => "Resubmitted",
            ActionKind::CorrigendumOpened => "Corrigendum opened",
            ActionKind::Withheld => "Withheld",
            ActionKind::Released => "Released from hold",
        }
    }

    /// Hold bookkeeping kept in the trail but hidden from the normal display.
    pub const fn is_withheld_tagged(self) -> bool {
        matches!(self, ActionKind::Withheld | ActionKind::Released)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One append-only audit record against a reference number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEntry {
    pub action_taker: String,
    pub action_taken: ActionKind,
    pub remarks: String,
    pub location_level: Option<AccessLevel>,
    pub location_value: Option<u32>,
    pub action_taken_date: DateTime<Utc>,
}

impl ActionEntry {
    pub fn new(
        action_taker: impl Into<String>,
        action_taken: ActionKind,
        remarks: impl Into<String>,
        location: Option<(AccessLevel, u32)>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            action_taker: action_taker.into(),
            action_taken,
            remarks: remarks.into(),
            location_level: location.map(|(level, _)| level),
            location_value: location.map(|(_, value)| value),
            action_taken_date: at,
        }
    }
}

/// Entries shown in the normal history view (hold bookkeeping filtered out).
pub fn visible(entries: Vec<ActionEntry>) -> Vec<ActionEntry> {
    entries
        .into_iter()
        .filter(|entry| !entry.action_taken.is_withheld_tagged())
        .collect()
}
