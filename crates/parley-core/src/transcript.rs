use regex::Regex;
use std::sync::LazyLock;

use crate::conversation::ConversationEvent;
use crate::state::{ConversationTurn, SYSTEM_SPEAKER};

pub const STARTING_STATUS: &str = "Starting conversation...";
pub const MEMORY_CLEARED_STATUS: &str =
    "All agent memories have been cleared. Ready for a fresh conversation!";

static NON_LETTER: LazyLock<Regex> = LazyLock::new(|| Regex::new("[^a-z]").expect("valid regex"));

/// Style key for a speaker: lowercased, with everything outside `a-z`
/// replaced by `-`.
pub fn speaker_slug(speaker: &str) -> String {
    NON_LETTER
        .replace_all(&speaker.to_lowercase(), "-")
        .into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEntry {
    Status(String),
    Turn { turn: ConversationTurn, slug: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollAnchor {
    #[default]
    Top,
    Bottom,
}

/// Rendered conversation, as shown in the chat pane.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    anchor: ScrollAnchor,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show only the "starting" placeholder and scroll back to the top.
    pub fn clear(&mut self) {
        self.replace_with_status(STARTING_STATUS);
    }

    pub fn replace_with_status(&mut self, message: impl Into<String>) {
        self.entries = vec![TranscriptEntry::Status(message.into())];
        self.anchor = ScrollAnchor::Top;
    }

    /// Drop any status placeholder, add the turn, and follow the bottom.
    pub fn append(&mut self, speaker: &str, content: &str) {
        self.entries
            .retain(|entry| !matches!(entry, TranscriptEntry::Status(_)));
        self.entries.push(TranscriptEntry::Turn {
            turn: ConversationTurn::new(speaker, content),
            slug: speaker_slug(speaker),
        });
        self.anchor = ScrollAnchor::Bottom;
    }

    pub fn apply(&mut self, event: &ConversationEvent) {
        match event {
            ConversationEvent::Started { .. } => self.clear(),
            ConversationEvent::Turn { agent, reply, .. } => self.append(agent, reply),
            ConversationEvent::TurnFailed { agent, reason, .. } => {
                self.append(SYSTEM_SPEAKER, &format!("Error with {}: {}", agent, reason))
            }
            ConversationEvent::Finished(_) => {}
        }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.entries.iter().filter_map(|entry| match entry {
            TranscriptEntry::Turn { turn, .. } => Some(turn),
            TranscriptEntry::Status(_) => None,
        })
    }

    pub fn anchor(&self) -> ScrollAnchor {
        self.anchor
    }

    /// The user scrolled by hand; stop following new turns.
    pub fn detach(&mut self) {
        self.anchor = ScrollAnchor::Top;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
