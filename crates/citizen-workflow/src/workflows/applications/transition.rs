//! Officer-chain state machine shared by applications and corrigenda.
//!
//! The engine mutates a [`Workflow`] and its owning document's status in place. It never
//! persists anything; callers commit the mutated document together with one audit entry.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{ApplicationStatus, PlayerStatus, Workflow};
use super::history::ActionKind;

/// Action an officer requests against a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OfficerAction {
    Forward,
    Return,
    Pull,
    Sanction,
    Reject,
    ReturnToCitizen,
}

impl OfficerAction {
    pub const fn label(self) -> &'static str {
        match self {
            OfficerAction::Forward => "forward",
            OfficerAction::Return => "return",
            OfficerAction::Pull => "pull",
            OfficerAction::Sanction => "sanction",
            OfficerAction::Reject => "reject",
            OfficerAction::ReturnToCitizen => "return-to-citizen",
        }
    }
}

impl fmt::Display for OfficerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for OfficerAction {
    type Err = TransitionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(OfficerAction::Forward),
            "return" => Ok(OfficerAction::Return),
            "pull" => Ok(OfficerAction::Pull),
            "sanction" => Ok(OfficerAction::Sanction),
            "reject" => Ok(OfficerAction::Reject),
            "return-to-citizen" | "returntoedit" => Ok(OfficerAction::ReturnToCitizen),
            other => Err(TransitionError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("unknown officer action '{0}'")]
    UnknownAction(String),
    #[error("workflow is {} and accepts no officer actions", .0.label())]
    Inactive(ApplicationStatus),
    #[error("player {actor} cannot act; player {current} holds the workflow")]
    NotCurrentPlayer { actor: usize, current: usize },
    #[error("player {0} is not pending")]
    NotPending(usize),
    #[error("player {0} has no previous player to return to")]
    NoPreviousPlayer(usize),
    #[error("player {0} is not the last in the chain and cannot sanction")]
    NotFinalPlayer(usize),
    #[error("player {0} may not pull this workflow back")]
    PullNotPermitted(usize),
    #[error("workflow is not waiting on a citizen correction")]
    NotAwaitingCitizen,
    #[error("officer '{designation}' does not hold the acting slot")]
    OfficerMismatch { designation: String },
    #[error("player {0} does not exist in this workflow")]
    UnknownPlayer(usize),
    #[error("player {player_id} links forward to earlier player {target}")]
    BrokenChain { player_id: usize, target: usize },
}

/// Result of one accepted transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub action: ActionKind,
    /// Player that performed the action.
    pub actor: usize,
    pub current_player: usize,
    pub status: ApplicationStatus,
}

/// Apply `action` on behalf of player `actor`.
///
/// `actor` must be the current player, except for [`OfficerAction::Pull`] where it is the
/// earlier player reclaiming the workflow. On error nothing is mutated.
pub fn apply(
    workflow: &mut Workflow,
    status: &mut ApplicationStatus,
    action: OfficerAction,
    actor: usize,
    remarks: &str,
    at: DateTime<Utc>,
) -> Result<Transition, TransitionError> {
    if *status != ApplicationStatus::Initiated {
        return Err(TransitionError::Inactive(*status));
    }
    if workflow.player(actor).is_none() {
        return Err(TransitionError::UnknownPlayer(actor));
    }

    let current = workflow.current_player();
    if action != OfficerAction::Pull {
        if actor != current {
            return Err(TransitionError::NotCurrentPlayer { actor, current });
        }
        if !workflow.current().is_pending() {
            return Err(TransitionError::NotPending(current));
        }
    }

    let kind = match action {
        OfficerAction::Pull => return pull(workflow, actor, current, *status),
        OfficerAction::Forward => match workflow.current().next_player_id {
            None => sanction(workflow, status, remarks, at),
            Some(next) => {
                if next <= current {
                    return Err(TransitionError::BrokenChain {
                        player_id: current,
                        target: next,
                    });
                }
                move_to(workflow, next, PlayerStatus::Forwarded, remarks, at);
                ActionKind::Forwarded
            }
        },
        // Pull rights do not open a Return from the first slot; there is no earlier officer.
        OfficerAction::Return => {
            let previous = workflow
                .current()
                .prev_player_id
                .ok_or(TransitionError::NoPreviousPlayer(current))?;
            move_to(workflow, previous, PlayerStatus::Returned, remarks, at);
            ActionKind::Returned
        }
        OfficerAction::Sanction => {
            if workflow.current().next_player_id.is_some() {
                return Err(TransitionError::NotFinalPlayer(current));
            }
            sanction(workflow, status, remarks, at)
        }
        OfficerAction::Reject => {
            workflow
                .current_mut()
                .settle(PlayerStatus::Rejected, remarks, at);
            *status = ApplicationStatus::Rejected;
            ActionKind::Rejected
        }
        OfficerAction::ReturnToCitizen => {
            workflow
                .current_mut()
                .settle(PlayerStatus::ReturnToEdit, remarks, at);
            *status = ApplicationStatus::Incomplete;
            ActionKind::ReturnedToCitizen
        }
    };

    Ok(Transition {
        action: kind,
        actor,
        current_player: workflow.current_player(),
        status: *status,
    })
}

/// Hand the workflow back to the officer who returned it to the citizen.
pub fn resume_after_edit(
    workflow: &mut Workflow,
    status: &mut ApplicationStatus,
) -> Result<Transition, TransitionError> {
    if *status != ApplicationStatus::Incomplete
        || workflow.current().status != Some(PlayerStatus::ReturnToEdit)
    {
        return Err(TransitionError::NotAwaitingCitizen);
    }

    workflow.current_mut().reopen();
    *status = ApplicationStatus::Initiated;

    Ok(Transition {
        action: ActionKind::Resubmitted,
        actor: workflow.current_player(),
        current_player: workflow.current_player(),
        status: *status,
    })
}

fn move_to(
    workflow: &mut Workflow,
    target: usize,
    settled: PlayerStatus,
    remarks: &str,
    at: DateTime<Utc>,
) {
    workflow.current_mut().settle(settled, remarks, at);
    if let Some(player) = workflow.player_mut(target) {
        player.reopen();
    }
    workflow.set_current_player(target);
}

fn sanction(
    workflow: &mut Workflow,
    status: &mut ApplicationStatus,
    remarks: &str,
    at: DateTime<Utc>,
) -> ActionKind {
    workflow
        .current_mut()
        .settle(PlayerStatus::Sanctioned, remarks, at);
    *status = ApplicationStatus::Sanctioned;
    ActionKind::Sanctioned
}

fn pull(
    workflow: &mut Workflow,
    puller: usize,
    current: usize,
    status: ApplicationStatus,
) -> Result<Transition, TransitionError> {
    let permitted = puller < current
        && workflow
            .player(puller)
            .is_some_and(|player| player.can_pull && player.status == Some(PlayerStatus::Forwarded));
    if !permitted {
        return Err(TransitionError::PullNotPermitted(puller));
    }

    // Everyone the workflow passed through after the puller goes back to blank.
    for player in &mut workflow.players_mut()[puller + 1..=current] {
        player.status = None;
        player.completed_at = None;
    }
    if let Some(player) = workflow.player_mut(puller) {
        player.reopen();
    }
    workflow.set_current_player(puller);

    Ok(Transition {
        action: ActionKind::Pulled,
        actor: puller,
        current_player: puller,
        status,
    })
}
