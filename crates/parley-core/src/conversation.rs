//! Round-robin turn taking between the selected agents.
//!
//! A run sends one `/chat` request per turn, strictly in sequence: each
//! agent answers the previous agent's reply, never the whole history. The
//! first failed turn ends the run. Only one run (or memory clear) can be in
//! flight per driver; the running flag is shared by all clones of the driver
//! and released when the run finishes, whichever way it ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, ChatBackend, ChatRequest};
use crate::provider::Provider;
use crate::settings::Settings;

/// Pause between turns so replies can be read as they arrive.
pub const TURN_DELAY: Duration = Duration::from_millis(500);

pub const MIN_AGENTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StartError {
    /// Another run or a memory clear is in flight. Callers treat this as a
    /// no-op rather than reporting it.
    #[error("A conversation is already running")]
    AlreadyRunning,
    #[error("Please select at least 2 agents for a conversation")]
    NotEnoughAgents,
    #[error("Please enter a conversation prompt")]
    EmptyPrompt,
    #[error("Please choose at least one turn")]
    NoTurns,
    #[error("Please choose an API provider")]
    NoProvider,
}

/// What the user asked for when pressing start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    /// Snapshot of the selected agents, in display order.
    pub agents: Vec<String>,
    pub prompt: String,
    pub turns: u32,
    pub api: Option<Provider>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// The transcript should be cleared.
    Started { agents: Vec<String>, turns: usize },
    Turn { turn: usize, agent: String, reply: String },
    TurnFailed { turn: usize, agent: String, reason: String },
    Finished(RunSummary),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnFailure {
    pub turn: usize,
    pub agent: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub requested_turns: usize,
    pub completed_turns: usize,
    pub failure: Option<TurnFailure>,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.completed_turns == self.requested_turns
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryClear {
    Cleared,
    /// A run was in flight; no request was sent.
    Skipped,
}

/// Prompt handed to the next agent after `agent` replied.
pub fn next_prompt(agent: &str, reply: &str) -> String {
    format!("{} said: {}\nRespond as the next character.", agent, reply)
}

struct RunningGuard {
    flag: Arc<AtomicBool>,
}

impl RunningGuard {
    fn claim(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: Arc::clone(flag) })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct ConversationDriver<B: ?Sized> {
    backend: Arc<B>,
    running: Arc<AtomicBool>,
    turn_delay: Duration,
}

impl<B: ?Sized> Clone for ConversationDriver<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            running: Arc::clone(&self.running),
            turn_delay: self.turn_delay,
        }
    }
}

impl<B: ChatBackend + ?Sized> ConversationDriver<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            running: Arc::new(AtomicBool::new(false)),
            turn_delay: TURN_DELAY,
        }
    }

    pub fn with_turn_delay(mut self, turn_delay: Duration) -> Self {
        self.turn_delay = turn_delay;
        self
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Validate a start request and claim the running flag.
    ///
    /// Nothing is sent to the backend here; the returned run does that when
    /// executed. The flag stays claimed until the run is executed to the end
    /// or dropped.
    pub fn begin(&self, request: StartRequest) -> Result<ConversationRun<B>, StartError> {
        if self.is_running() {
            return Err(StartError::AlreadyRunning);
        }

        if request.agents.len() < MIN_AGENTS {
            return Err(StartError::NotEnoughAgents);
        }
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(StartError::EmptyPrompt);
        }
        if request.turns == 0 {
            return Err(StartError::NoTurns);
        }
        let api = request.api.ok_or(StartError::NoProvider)?;

        let guard = RunningGuard::claim(&self.running).ok_or(StartError::AlreadyRunning)?;

        Ok(ConversationRun {
            backend: Arc::clone(&self.backend),
            agents: request.agents,
            prompt: prompt.to_string(),
            turns: request.turns as usize,
            api,
            turn_delay: self.turn_delay,
            guard,
        })
    }

    /// [`begin`](Self::begin) and execute in one go.
    pub async fn start<F>(
        &self,
        request: StartRequest,
        settings: Settings,
        on_event: F,
    ) -> Result<RunSummary, StartError>
    where
        F: FnMut(ConversationEvent) + Send,
    {
        let run = self.begin(request)?;
        Ok(run.execute(settings, on_event).await)
    }

    /// Ask the backend to forget every agent's memory. Skipped while a run is
    /// in flight, and holds the running flag for its own duration.
    pub async fn clear_memory(&self) -> Result<MemoryClear, BackendError> {
        let Some(_guard) = RunningGuard::claim(&self.running) else {
            debug!("memory clear skipped, conversation in progress");
            return Ok(MemoryClear::Skipped);
        };
        self.backend.clear_all_memory().await?;
        info!("agent memories cleared");
        Ok(MemoryClear::Cleared)
    }
}

/// A validated run holding the driver's running flag.
pub struct ConversationRun<B: ?Sized> {
    backend: Arc<B>,
    agents: Vec<String>,
    prompt: String,
    turns: usize,
    api: Provider,
    turn_delay: Duration,
    guard: RunningGuard,
}

impl<B: ChatBackend + ?Sized> ConversationRun<B> {
    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    pub fn turns(&self) -> usize {
        self.turns
    }

    pub fn api(&self) -> Provider {
        self.api
    }

    /// Agent speaking at `turn`.
    pub fn agent_for_turn(&self, turn: usize) -> &str {
        &self.agents[turn % self.agents.len()]
    }

    /// Run every turn in order, reporting progress through `on_event`.
    ///
    /// The running flag is released just before `Finished` is reported.
    pub async fn execute<F>(self, settings: Settings, mut on_event: F) -> RunSummary
    where
        F: FnMut(ConversationEvent) + Send,
    {
        info!(
            agents = ?self.agents,
            turns = self.turns,
            api = %self.api,
            "conversation started"
        );
        on_event(ConversationEvent::Started {
            agents: self.agents.clone(),
            turns: self.turns,
        });

        let mut prompt = self.prompt.clone();
        let mut completed_turns = 0;
        let mut failure = None;

        for turn in 0..self.turns {
            let agent = self.agent_for_turn(turn).to_string();
            let request = ChatRequest {
                prompt: prompt.clone(),
                agent_name: agent.clone(),
                api: self.api,
                settings: settings.clone(),
            };

            debug!(turn, %agent, "requesting turn");
            match self.backend.chat(&request).await {
                Ok(reply) => {
                    prompt = next_prompt(&agent, &reply);
                    completed_turns += 1;
                    on_event(ConversationEvent::Turn { turn, agent, reply });

                    if turn + 1 < self.turns {
                        tokio::time::sleep(self.turn_delay).await;
                    }
                }
                Err(e) => {
                    let reason = e.to_string();
                    warn!(turn, %agent, %reason, "turn failed, ending conversation");
                    on_event(ConversationEvent::TurnFailed {
                        turn,
                        agent: agent.clone(),
                        reason: reason.clone(),
                    });
                    failure = Some(TurnFailure { turn, agent, reason });
                    break;
                }
            }
        }

        let summary = RunSummary {
            requested_turns: self.turns,
            completed_turns,
            failure,
        };
        info!(completed = completed_turns, requested = self.turns, "conversation finished");

        drop(self.guard);
        on_event(ConversationEvent::Finished(summary.clone()));
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentDescriptor, AgentRegistry};
    use crate::backend::TestConnectionRequest;
    use crate::transcript::{Transcript, TranscriptEntry};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Replies "<agent> reply <n>" to every chat, except at `fail_at`.
    #[derive(Default)]
    struct ScriptedBackend {
        calls: Mutex<Vec<ChatRequest>>,
        fail_at: Option<usize>,
        clears: AtomicUsize,
    }

    impl ScriptedBackend {
        fn failing_at(turn: usize) -> Self {
            Self {
                fail_at: Some(turn),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<ChatRequest> {
            self.calls.lock().unwrap().clone()
        }

        fn agents_contacted(&self) -> Vec<String> {
            self.calls().into_iter().map(|c| c.agent_name).collect()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn list_agents(&self) -> Result<Vec<AgentDescriptor>, BackendError> {
            Ok(Vec::new())
        }

        async fn chat(&self, request: &ChatRequest) -> Result<String, BackendError> {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.len();
            calls.push(request.clone());
            if self.fail_at == Some(index) {
                return Err(BackendError::Status {
                    status: 500,
                    detail: "model offline".to_string(),
                });
            }
            Ok(format!("{} reply {}", request.agent_name, index))
        }

        async fn clear_all_memory(&self) -> Result<(), BackendError> {
            self.clears.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn test_connection(&self, _request: &TestConnectionRequest) -> Result<String, BackendError> {
            Ok("ok".to_string())
        }
    }

    fn request(agents: &[&str], prompt: &str, turns: u32) -> StartRequest {
        StartRequest {
            agents: agents.iter().map(|a| a.to_string()).collect(),
            prompt: prompt.to_string(),
            turns,
            api: Some(Provider::Ollama),
        }
    }

    fn driver(backend: &Arc<ScriptedBackend>) -> ConversationDriver<ScriptedBackend> {
        ConversationDriver::new(Arc::clone(backend)).with_turn_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn round_robin_wraps_around() {
        let backend = Arc::new(ScriptedBackend::default());
        let summary = driver(&backend)
            .start(request(&["A", "B", "C"], "Seed", 5), Settings::default(), |_| {})
            .await
            .unwrap();

        assert_eq!(backend.agents_contacted(), vec!["A", "B", "C", "A", "B"]);
        assert!(summary.is_complete());
        assert_eq!(summary.completed_turns, 5);
    }

    #[tokio::test]
    async fn each_prompt_is_the_previous_reply() {
        let backend = Arc::new(ScriptedBackend::default());
        driver(&backend)
            .start(request(&["Alice", "Bob"], "A traveler arrives.", 3), Settings::default(), |_| {})
            .await
            .unwrap();

        let prompts: Vec<String> = backend.calls().into_iter().map(|c| c.prompt).collect();
        assert_eq!(
            prompts,
            vec![
                "A traveler arrives.".to_string(),
                "Alice said: Alice reply 0\nRespond as the next character.".to_string(),
                "Bob said: Bob reply 1\nRespond as the next character.".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn every_turn_carries_provider_and_settings() {
        let backend = Arc::new(ScriptedBackend::default());
        let settings = Settings {
            github_model: "openai/gpt-4.1".to_string(),
            ..Settings::default()
        };
        let mut req = request(&["A", "B"], "go", 2);
        req.api = Some(Provider::GitHub);
        driver(&backend).start(req, settings.clone(), |_| {}).await.unwrap();

        for call in backend.calls() {
            assert_eq!(call.api, Provider::GitHub);
            assert_eq!(call.settings, settings);
        }
    }

    #[tokio::test]
    async fn failure_stops_the_run_with_one_error_entry() {
        let backend = Arc::new(ScriptedBackend::failing_at(2));
        let mut transcript = Transcript::new();
        let summary = driver(&backend)
            .start(request(&["A", "B", "C"], "Seed", 6), Settings::default(), |event| {
                transcript.apply(&event)
            })
            .await
            .unwrap();

        assert_eq!(backend.agents_contacted(), vec!["A", "B", "C"]);
        assert_eq!(summary.completed_turns, 2);
        assert_eq!(
            summary.failure,
            Some(TurnFailure {
                turn: 2,
                agent: "C".to_string(),
                reason: "model offline".to_string(),
            })
        );

        let errors: Vec<_> = transcript.turns().filter(|t| t.is_system()).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].content, "Error with C: model offline");
        assert_eq!(transcript.turns().count(), 3);
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let backend = Arc::new(ScriptedBackend::default());
        let mut events = Vec::new();
        driver(&backend)
            .start(request(&["A", "B"], "Seed", 2), Settings::default(), |e| events.push(e))
            .await
            .unwrap();

        assert!(matches!(events[0], ConversationEvent::Started { turns: 2, .. }));
        assert!(matches!(&events[1], ConversationEvent::Turn { turn: 0, agent, .. } if agent == "A"));
        assert!(matches!(&events[2], ConversationEvent::Turn { turn: 1, agent, .. } if agent == "B"));
        assert!(matches!(&events[3], ConversationEvent::Finished(s) if s.is_complete()));
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn started_event_clears_the_transcript() {
        let backend = Arc::new(ScriptedBackend::failing_at(0));
        let mut transcript = Transcript::new();
        transcript.append("Old", "from the last run");

        driver(&backend)
            .start(request(&["A", "B"], "Seed", 3), Settings::default(), |e| transcript.apply(&e))
            .await
            .unwrap();

        let speakers: Vec<_> = transcript.turns().map(|t| t.speaker.clone()).collect();
        assert_eq!(speakers, vec!["System"]);
    }

    #[tokio::test]
    async fn fewer_than_two_agents_never_contacts_backend() {
        let backend = Arc::new(ScriptedBackend::default());
        let err = driver(&backend)
            .start(request(&["Solo"], "Seed", 3), Settings::default(), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, StartError::NotEnoughAgents);
        assert_eq!(err.to_string(), "Please select at least 2 agents for a conversation");
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn blank_prompt_never_contacts_backend() {
        let backend = Arc::new(ScriptedBackend::default());
        let driver = driver(&backend);
        for prompt in ["", "   ", "\n\t"] {
            let err = driver
                .start(request(&["A", "B"], prompt, 3), Settings::default(), |_| {})
                .await
                .unwrap_err();
            assert_eq!(err, StartError::EmptyPrompt);
        }
        assert!(backend.calls().is_empty());
        assert!(!driver.is_running());
    }

    #[test]
    fn zero_turns_and_missing_provider_are_rejected() {
        let backend = Arc::new(ScriptedBackend::default());
        let driver = driver(&backend);
        assert!(matches!(
            driver.begin(request(&["A", "B"], "Seed", 0)),
            Err(StartError::NoTurns)
        ));
        let mut req = request(&["A", "B"], "Seed", 2);
        req.api = None;
        assert!(matches!(driver.begin(req), Err(StartError::NoProvider)));
        assert!(!driver.is_running());
    }

    #[test]
    fn seed_prompt_is_trimmed() {
        let backend = Arc::new(ScriptedBackend::default());
        let run = driver(&backend)
            .begin(request(&["A", "B"], "  hello  ", 1))
            .unwrap();
        assert_eq!(run.prompt, "hello");
    }

    #[test]
    fn second_start_while_running_is_rejected() {
        let backend = Arc::new(ScriptedBackend::default());
        let driver = driver(&backend);
        let run = driver.begin(request(&["A", "B"], "Seed", 2)).unwrap();
        assert!(driver.is_running());

        let clone = driver.clone();
        assert!(matches!(
            clone.begin(request(&["A", "B"], "Seed", 2)),
            Err(StartError::AlreadyRunning)
        ));

        drop(run);
        assert!(!driver.is_running());
        assert!(driver.begin(request(&["A", "B"], "Seed", 2)).is_ok());
    }

    #[tokio::test]
    async fn flag_is_released_after_failure() {
        let backend = Arc::new(ScriptedBackend::failing_at(0));
        let driver = driver(&backend);
        driver
            .start(request(&["A", "B"], "Seed", 4), Settings::default(), |_| {})
            .await
            .unwrap();
        assert!(!driver.is_running());
    }

    #[tokio::test]
    async fn flag_is_free_when_finished_is_reported() {
        let backend = Arc::new(ScriptedBackend::default());
        let driver = driver(&backend);
        let observer = driver.clone();
        let mut running_at_finish = None;
        driver
            .start(request(&["A", "B"], "Seed", 1), Settings::default(), |e| {
                if let ConversationEvent::Finished(_) = e {
                    running_at_finish = Some(observer.is_running());
                }
            })
            .await
            .unwrap();
        assert_eq!(running_at_finish, Some(false));
    }

    #[tokio::test]
    async fn selection_snapshot_is_fixed_at_start() {
        let backend = Arc::new(ScriptedBackend::default());
        let mut registry = AgentRegistry::new();
        registry.render(vec![
            AgentDescriptor::new("Alice"),
            AgentDescriptor::new("Bob"),
            AgentDescriptor::new("Charlie"),
        ]);

        let run = driver(&backend)
            .begin(StartRequest {
                agents: registry.selected(),
                prompt: "Seed".to_string(),
                turns: 3,
                api: Some(Provider::Ollama),
            })
            .unwrap();
        registry.toggle(0);
        registry.toggle(1);

        run.execute(Settings::default(), |_| {}).await;
        assert_eq!(backend.agents_contacted(), vec!["Alice", "Bob", "Charlie"]);
    }

    #[tokio::test]
    async fn clear_memory_is_a_no_op_while_running() {
        let backend = Arc::new(ScriptedBackend::default());
        let driver = driver(&backend);
        let run = driver.begin(request(&["A", "B"], "Seed", 2)).unwrap();

        assert_eq!(driver.clear_memory().await.unwrap(), MemoryClear::Skipped);
        assert_eq!(backend.clears.load(Ordering::SeqCst), 0);

        drop(run);
        assert_eq!(driver.clear_memory().await.unwrap(), MemoryClear::Cleared);
        assert_eq!(backend.clears.load(Ordering::SeqCst), 1);
        assert!(!driver.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn delay_only_between_successful_turns() {
        let backend = Arc::new(ScriptedBackend::default());
        let driver = ConversationDriver::new(Arc::clone(&backend));

        let started = tokio::time::Instant::now();
        driver
            .start(request(&["A", "B"], "Seed", 3), Settings::default(), |_| {})
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= TURN_DELAY * 2 && elapsed < TURN_DELAY * 2 + Duration::from_millis(50));

        let failing = Arc::new(ScriptedBackend::failing_at(1));
        let driver = ConversationDriver::new(Arc::clone(&failing));
        let started = tokio::time::Instant::now();
        driver
            .start(request(&["A", "B"], "Seed", 3), Settings::default(), |_| {})
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= TURN_DELAY && elapsed < TURN_DELAY + Duration::from_millis(50));
    }

    #[tokio::test]
    async fn status_entry_is_gone_after_first_turn() {
        let backend = Arc::new(ScriptedBackend::default());
        let mut transcript = Transcript::new();
        let mut saw_status = false;
        driver(&backend)
            .start(request(&["A", "B"], "Seed", 2), Settings::default(), |e| {
                transcript.apply(&e);
                if matches!(e, ConversationEvent::Started { .. }) {
                    saw_status = matches!(transcript.entries(), [TranscriptEntry::Status(_)]);
                }
            })
            .await
            .unwrap();
        assert!(saw_status);
        assert!(transcript
            .entries()
            .iter()
            .all(|e| matches!(e, TranscriptEntry::Turn { .. })));
    }
}
