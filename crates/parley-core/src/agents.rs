use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::{BackendError, ChatBackend};

/// An agent as listed by `GET /agents`. Only `name` is required; other
/// fields the backend sends are ignored apart from an optional persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    #[serde(default)]
    pub persona: Option<String>,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persona: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub agent: AgentDescriptor,
    pub checked: bool,
}

/// Selectable list of agents. Display order can be rearranged, and
/// [`AgentRegistry::selected`] follows display order.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    entries: Vec<RosterEntry>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the agent list once. On failure the roster is emptied and the
    /// error is handed back for the caller to report; nothing is retried.
    pub async fn refresh<B: ChatBackend + ?Sized>(&mut self, backend: &B) -> Result<usize, BackendError> {
        match backend.list_agents().await {
            Ok(agents) => {
                info!(count = agents.len(), "agent roster loaded");
                self.render(agents);
                Ok(self.entries.len())
            }
            Err(e) => {
                warn!(error = %e, "failed to load agents");
                self.entries.clear();
                Err(e)
            }
        }
    }

    /// Replace the roster; every agent starts checked.
    pub fn render(&mut self, agents: Vec<AgentDescriptor>) {
        self.entries = agents
            .into_iter()
            .map(|agent| RosterEntry {
                agent,
                checked: true,
            })
            .collect();
    }

    /// Checked agent names in display order.
    pub fn selected(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.checked)
            .map(|entry| entry.agent.name.clone())
            .collect()
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn toggle(&mut self, index: usize) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.checked = !entry.checked;
        }
    }

    /// Returns false when no agent has that name.
    pub fn set_checked(&mut self, name: &str, checked: bool) -> bool {
        match self.entries.iter_mut().find(|entry| entry.agent.name == name) {
            Some(entry) => {
                entry.checked = checked;
                true
            }
            None => false,
        }
    }

    pub fn set_all(&mut self, checked: bool) {
        for entry in &mut self.entries {
            entry.checked = checked;
        }
    }

    /// Move an entry to a new display position. Out-of-range indices are
    /// ignored.
    pub fn move_entry(&mut self, from: usize, to: usize) {
        if from >= self.entries.len() || to >= self.entries.len() || from == to {
            return;
        }
        let entry = self.entries.remove(from);
        self.entries.insert(to, entry);
    }
}
