pub mod agents;
pub mod backend;
pub mod connection;
pub mod conversation;
pub mod provider;
pub mod settings;
pub mod state;
pub mod store;
pub mod transcript;

// Re-export main types for convenience
pub use agents::{AgentDescriptor, AgentRegistry, RosterEntry};
pub use backend::{BackendError, ChatBackend, ChatRequest, HttpBackend, TestConnectionRequest};
pub use connection::{ConnectionStatus, ConnectionTester};
pub use conversation::{
    ConversationDriver, ConversationEvent, ConversationRun, MemoryClear, RunSummary, StartError,
    StartRequest, TurnFailure,
};
pub use provider::Provider;
pub use settings::{Settings, SettingsField, SettingsStore};
pub use state::{ConversationTurn, SYSTEM_SPEAKER};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use transcript::{ScrollAnchor, Transcript, TranscriptEntry};
