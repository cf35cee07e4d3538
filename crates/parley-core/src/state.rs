//! UI-agnostic conversation state types
//!
//! These are shared by the terminal UI and the headless commands and don't
//! depend on any specific UI framework.

use serde::{Deserialize, Serialize};

/// Speaker name used for client-generated entries such as turn failures.
pub const SYSTEM_SPEAKER: &str = "System";

/// One rendered exchange in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: String,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(speaker: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            content: content.into(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.speaker == SYSTEM_SPEAKER
    }
}
