use super::catalog::OfficerTemplate;
use super::domain::{Player, PlayerStatus, Workflow, WorkflowShapeError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("officer chain template is empty")]
    EmptyTemplate,
    #[error("officer chain template is inconsistent: {0}")]
    Shape(#[from] WorkflowShapeError),
}

/// Instantiates a runtime officer chain from a service template.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowBuilder {
    force_can_pull: bool,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant every slot pull rights regardless of the template (corrigendum chains).
    pub fn force_can_pull(mut self, enabled: bool) -> Self {
        self.force_can_pull = enabled;
        self
    }

    /// Copy the runtime fields of each template slot; the first slot starts `pending`,
    /// the rest start blank. Missing link ids default to a linear chain.
    pub fn build(&self, template: &[OfficerTemplate]) -> Result<Workflow, BuildError> {
        if template.is_empty() {
            return Err(BuildError::EmptyTemplate);
        }

        let last = template.len() - 1;
        let players = template
            .iter()
            .enumerate()
            .map(|(position, slot)| Player {
                player_id: slot.player_id.unwrap_or(position),
                designation: slot.designation.clone(),
                access_level: slot.access_level,
                access_code: None,
                status: (position == 0).then_some(PlayerStatus::Pending),
                prev_player_id: slot.prev_player_id.or(position.checked_sub(1)),
                next_player_id: slot
                    .next_player_id
                    .or((position < last).then_some(position + 1)),
                can_pull: self.force_can_pull || slot.can_pull,
                remarks: String::new(),
                completed_at: None,
                shifted: false,
                shifted_from: None,
                shifted_to: None,
            })
            .collect();

        Ok(Workflow::new(players)?)
    }
}
