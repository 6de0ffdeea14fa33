use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{Officer, PlayerStatus, ReferenceNumber, Workflow};
use super::history::ActionEntry;
use crate::workflows::location::AccessLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WithheldType {
    Temporary,
    Permanent,
}

impl WithheldType {
    pub const fn label(self) -> &'static str {
        match self {
            WithheldType::Temporary => "Temporary",
            WithheldType::Permanent => "Permanent",
        }
    }
}

impl fmt::Display for WithheldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for WithheldType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "temporary" => Ok(WithheldType::Temporary),
            "permanent" => Ok(WithheldType::Permanent),
            other => Err(format!("unknown hold type '{other}'")),
        }
    }
}

/// Officer slot that placed the hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingOfficer {
    pub designation: String,
    pub access_level: AccessLevel,
    pub access_code: u32,
    pub player_id: usize,
}

impl HoldingOfficer {
    pub fn is(&self, officer: &Officer) -> bool {
        self.designation.eq_ignore_ascii_case(&officer.designation)
            && self.access_level == officer.access_level
            && self.access_code == officer.access_code
    }
}

/// One slot of the chain as it stood when a hold was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeldPlayer {
    pub player_id: usize,
    pub designation: String,
    pub access_level: AccessLevel,
    #[serde(default)]
    pub access_code: Option<u32>,
    #[serde(default)]
    pub status: Option<PlayerStatus>,
}

/// Abbreviated copy of the application's chain, frozen at hold time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeldWorkflow {
    pub current_player: usize,
    pub players: Vec<HeldPlayer>,
}

impl HeldWorkflow {
    pub fn capture(workflow: &Workflow) -> Self {
        Self {
            current_player: workflow.current_player(),
            players: workflow
                .players()
                .iter()
                .map(|player| HeldPlayer {
                    player_id: player.player_id,
                    designation: player.designation.clone(),
                    access_level: player.access_level,
                    access_code: player.access_code,
                    status: player.status,
                })
                .collect(),
        }
    }
}

/// Out-of-band hold on an application, kept beside (not inside) its workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithheldApplication {
    pub reference_number: ReferenceNumber,
    pub withheld_type: WithheldType,
    pub withheld_reason: String,
    pub is_withheld: bool,
    pub held_by: HoldingOfficer,
    pub held_at: DateTime<Utc>,
    /// Records written before snapshots were kept load with an empty chain.
    #[serde(default)]
    pub workflow: HeldWorkflow,
    #[serde(default)]
    pub released_at: Option<DateTime<Utc>>,
    /// Hold and release actions against this record.
    #[serde(default)]
    pub history: Vec<ActionEntry>,
}

impl WithheldApplication {
    pub fn is_active(&self) -> bool {
        self.is_withheld
    }
}
