use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::form::FormDetails;
use crate::workflows::location::AccessLevel;

/// Numeric-coded primary identifier of an application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceNumber(pub String);

impl fmt::Display for ReferenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies the service template and form schema an application follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub u32);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application-level status, coarser than the per-player status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplicationStatus {
    /// Owned by the citizen (returned for correction).
    Incomplete,
    Initiated,
    Sanctioned,
    Rejected,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Incomplete => "Incomplete",
            ApplicationStatus::Initiated => "Initiated",
            ApplicationStatus::Sanctioned => "Sanctioned",
            ApplicationStatus::Rejected => "Rejected",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            ApplicationStatus::Sanctioned | ApplicationStatus::Rejected
        )
    }
}

/// Status of one officer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Pending,
    Forwarded,
    Sanctioned,
    Returned,
    Rejected,
    #[serde(rename = "returntoedit")]
    ReturnToEdit,
}

impl PlayerStatus {
    pub const fn label(self) -> &'static str {
        match self {
            PlayerStatus::Pending => "pending",
            PlayerStatus::Forwarded => "forwarded",
            PlayerStatus::Sanctioned => "sanctioned",
            PlayerStatus::Returned => "returned",
            PlayerStatus::Rejected => "rejected",
            PlayerStatus::ReturnToEdit => "returntoedit",
        }
    }
}

/// One officer's slot in an approval chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub player_id: usize,
    pub designation: String,
    pub access_level: AccessLevel,
    #[serde(default)]
    pub access_code: Option<u32>,
    #[serde(default)]
    pub status: Option<PlayerStatus>,
    #[serde(default)]
    pub prev_player_id: Option<usize>,
    #[serde(default)]
    pub next_player_id: Option<usize>,
    #[serde(default)]
    pub can_pull: bool,
    #[serde(default)]
    pub remarks: String,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub shifted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shifted_from: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shifted_to: Option<u32>,
}

impl Player {
    pub fn is_pending(&self) -> bool {
        self.status == Some(PlayerStatus::Pending)
    }

    pub(crate) fn settle(&mut self, status: PlayerStatus, remarks: &str, at: DateTime<Utc>) {
        self.status = Some(status);
        self.remarks = remarks.to_string();
        self.completed_at = Some(at);
    }

    pub(crate) fn reopen(&mut self) {
        self.status = Some(PlayerStatus::Pending);
        self.completed_at = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowShapeError {
    #[error("workflow has no players")]
    Empty,
    #[error("player at position {position} carries id {player_id}")]
    MisplacedPlayer { position: usize, player_id: usize },
    #[error("player {player_id} links to missing player {target}")]
    DanglingLink { player_id: usize, target: usize },
    #[error("current player {current_player} is outside a chain of {len}")]
    CurrentOutOfRange { current_player: usize, len: usize },
    #[error("{count} players are pending; at most one may own the workflow")]
    MultiplePending { count: usize },
    #[error("player {pending} is pending but the current player is {current_player}")]
    PendingNotCurrent {
        pending: usize,
        current_player: usize,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowRecord {
    players: Vec<Player>,
    current_player: usize,
}

/// Ordered officer chain plus the index of the slot whose turn it is.
///
/// The order is fixed at construction; players are only mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WorkflowRecord")]
pub struct Workflow {
    players: Vec<Player>,
    current_player: usize,
}

impl TryFrom<WorkflowRecord> for Workflow {
    type Error = WorkflowShapeError;

    fn try_from(record: WorkflowRecord) -> Result<Self, Self::Error> {
        let workflow = Workflow {
            players: record.players,
            current_player: record.current_player,
        };
        workflow.validate()?;
        Ok(workflow)
    }
}

impl Workflow {
    /// Wrap a freshly built chain, pointing `current_player` at its pending slot.
    pub fn new(players: Vec<Player>) -> Result<Self, WorkflowShapeError> {
        let current_player = players
            .iter()
            .position(Player::is_pending)
            .unwrap_or(0);
        let workflow = Self {
            players,
            current_player,
        };
        workflow.validate()?;
        Ok(workflow)
    }

    fn validate(&self) -> Result<(), WorkflowShapeError> {
        let len = self.players.len();
        if len == 0 {
            return Err(WorkflowShapeError::Empty);
        }
        if self.current_player >= len {
            return Err(WorkflowShapeError::CurrentOutOfRange {
                current_player: self.current_player,
                len,
            });
        }

        for (position, player) in self.players.iter().enumerate() {
            if player.player_id != position {
                return Err(WorkflowShapeError::MisplacedPlayer {
                    position,
                    player_id: player.player_id,
                });
            }
            for target in [player.prev_player_id, player.next_player_id]
                .into_iter()
                .flatten()
            {
                if target >= len {
                    return Err(WorkflowShapeError::DanglingLink {
                        player_id: player.player_id,
                        target,
                    });
                }
            }
        }

        let pending: Vec<usize> = self
            .players
            .iter()
            .filter(|player| player.is_pending())
            .map(|player| player.player_id)
            .collect();
        match pending.as_slice() {
            [] => Ok(()),
            [only] if *only == self.current_player => Ok(()),
            [only] => Err(WorkflowShapeError::PendingNotCurrent {
                pending: *only,
                current_player: self.current_player,
            }),
            many => Err(WorkflowShapeError::MultiplePending { count: many.len() }),
        }
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, player_id: usize) -> Option<&Player> {
        self.players.get(player_id)
    }

    pub(crate) fn player_mut(&mut self, player_id: usize) -> Option<&mut Player> {
        self.players.get_mut(player_id)
    }

    pub(crate) fn players_mut(&mut self) -> &mut [Player] {
        &mut self.players
    }

    pub fn current_player(&self) -> usize {
        self.current_player
    }

    pub(crate) fn set_current_player(&mut self, player_id: usize) {
        self.current_player = player_id;
    }

    pub fn current(&self) -> &Player {
        &self.players[self.current_player]
    }

    pub(crate) fn current_mut(&mut self) -> &mut Player {
        &mut self.players[self.current_player]
    }

    pub fn pending_count(&self) -> usize {
        self.players.iter().filter(|player| player.is_pending()).count()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

/// Optimistic-concurrency pre-state a write is conditioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub current_player: usize,
    pub status: ApplicationStatus,
    pub revision: u64,
}

/// A citizen's submission moving through its officer chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub reference_number: ReferenceNumber,
    pub display_reference: String,
    pub service_id: ServiceId,
    pub form_details: FormDetails,
    pub workflow: Workflow,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

impl Application {
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            current_player: self.workflow.current_player(),
            status: self.status,
            revision: self.revision,
        }
    }

    /// Single-owner invariant: an initiated application has exactly one pending player,
    /// every other status has none.
    pub fn has_single_owner(&self) -> bool {
        let pending = self.workflow.pending_count();
        match self.status {
            ApplicationStatus::Initiated => {
                pending == 1 && self.workflow.current().is_pending()
            }
            _ => pending == 0,
        }
    }
}

/// Officer identity presented with an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Officer {
    pub designation: String,
    pub access_level: AccessLevel,
    pub access_code: u32,
}

impl Officer {
    pub fn new(designation: impl Into<String>, access_level: AccessLevel, access_code: u32) -> Self {
        Self {
            designation: designation.into(),
            access_level,
            access_code,
        }
    }

    /// Whether this officer is the one bound to `player`'s slot.
    pub fn owns(&self, player: &Player) -> bool {
        player.designation.eq_ignore_ascii_case(&self.designation)
            && player.access_level == self.access_level
            && player.access_code == Some(self.access_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn player(player_id: usize, status: Option<PlayerStatus>) -> Player {
        Player {
            player_id,
            designation: "Naib Tehsildar".to_string(),
            access_level: AccessLevel::Tehsil,
            access_code: Some(501),
            status,
            prev_player_id: player_id.checked_sub(1),
            next_player_id: None,
            can_pull: false,
            remarks: String::new(),
            completed_at: None,
            shifted: false,
            shifted_from: None,
            shifted_to: None,
        }
    }

    #[test]
    fn player_status_uses_lowercase_wire_names() {
        assert_eq!(
            serde_json::to_value(PlayerStatus::ReturnToEdit).unwrap(),
            json!("returntoedit")
        );
        let parsed: PlayerStatus = serde_json::from_value(json!("forwarded")).unwrap();
        assert_eq!(parsed, PlayerStatus::Forwarded);
        assert!(serde_json::from_value::<PlayerStatus>(json!("approved")).is_err());
    }

    #[test]
    fn deserialize_rejects_two_pending_players() {
        let payload = json!({
            "players": [
                serde_json::to_value(player(0, Some(PlayerStatus::Pending))).unwrap(),
                serde_json::to_value(player(1, Some(PlayerStatus::Pending))).unwrap(),
            ],
            "currentPlayer": 0
        });
        let error = serde_json::from_value::<Workflow>(payload).expect_err("two owners");
        assert!(error.to_string().contains("pending"));
    }

    #[test]
    fn deserialize_rejects_current_player_out_of_range() {
        let payload = json!({
            "players": [serde_json::to_value(player(0, Some(PlayerStatus::Pending))).unwrap()],
            "currentPlayer": 3
        });
        assert!(serde_json::from_value::<Workflow>(payload).is_err());
    }

    #[test]
    fn deserialize_rejects_misnumbered_players() {
        let payload = json!({
            "players": [serde_json::to_value(player(4, None)).unwrap()],
            "currentPlayer": 0
        });
        assert!(serde_json::from_value::<Workflow>(payload).is_err());
    }

    #[test]
    fn shift_fields_are_omitted_until_set() {
        let value = serde_json::to_value(player(0, None)).unwrap();
        assert!(value.get("shifted").is_none());
        assert!(value.get("shiftedFrom").is_none());
        assert_eq!(value.get("accessLevel"), Some(&json!("Tehsil")));
    }

    #[test]
    fn officer_matches_designation_level_and_code() {
        let slot = player(0, Some(PlayerStatus::Pending));
        assert!(Officer::new("naib tehsildar", AccessLevel::Tehsil, 501).owns(&slot));
        assert!(!Officer::new("Naib Tehsildar", AccessLevel::Tehsil, 502).owns(&slot));
        assert!(!Officer::new("Naib Tehsildar", AccessLevel::District, 501).owns(&slot));
    }
}
