//! # Bot Engine
//!
//! The one stateful coordinator: consumes classified chat events in arrival
//! order, applies the trigger predicate and the rate limiter, keeps the
//! per-identity context current, and fans qualifying messages out to a
//! bounded pool of backend workers. Replies go back through the single
//! writer inside the connection, so output never interleaves.
//!
//! Ordering rule: the user message is recorded into context at
//! classification time, not after backend completion, so context order
//! matches arrival order even when backend latency varies. The bot's own
//! reply is appended only once generation succeeds.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.2.0: Command dispatch ahead of the AI path
//! - 1.1.0: Bounded in-flight backend calls via semaphore
//! - 1.0.0: Initial event loop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::time::timeout;

use crate::classifier::{extract_prompt, is_triggered, ChatEvent};
use crate::connection::ChatHandle;
use crate::core::config::Config;
use crate::core::response::{single_line, truncate_reply};
use crate::features::backend::{build_prompt, GenerateRequest, ResponseBackend};
use crate::features::commands::{self, CommandRegistry};
use crate::features::context::{ContextEntry, ContextStore};
use crate::features::rate_limiting::RateLimiter;

/// Read-only counters exposed to the operational surface.
#[derive(Default)]
pub struct EngineMetrics {
    pub events: AtomicU64,
    pub replies: AtomicU64,
    pub throttled: AtomicU64,
    pub backend_failures: AtomicU64,
}

impl EngineMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            replies: self.replies.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            backend_failures: self.backend_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub events: u64,
    pub replies: u64,
    pub throttled: u64,
    pub backend_failures: u64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} public messages, {} replies, {} throttled, {} backend failures",
            self.events, self.replies, self.throttled, self.backend_failures
        )
    }
}

/// Wires the connection output through classifier results, rate limiting,
/// context and the backend, and back to the connection's send path.
pub struct BotEngine {
    config: Arc<Config>,
    handle: ChatHandle,
    limiter: Arc<RateLimiter>,
    context: Arc<ContextStore>,
    backend: Arc<dyn ResponseBackend>,
    commands: Arc<CommandRegistry>,
    current_model: Arc<RwLock<String>>,
    inflight: Arc<Semaphore>,
    metrics: Arc<EngineMetrics>,
}

impl BotEngine {
    pub fn new(
        config: Arc<Config>,
        handle: ChatHandle,
        limiter: Arc<RateLimiter>,
        context: Arc<ContextStore>,
        backend: Arc<dyn ResponseBackend>,
    ) -> Self {
        let current_model = Arc::new(RwLock::new(config.ollama.model.clone()));
        let commands = Arc::new(CommandRegistry::new(
            config.clone(),
            limiter.clone(),
            context.clone(),
            backend.clone(),
            current_model.clone(),
        ));
        let inflight = Arc::new(Semaphore::new(config.limits.max_inflight));

        BotEngine {
            config,
            handle,
            limiter,
            context,
            backend,
            commands,
            current_model,
            inflight,
            metrics: Arc::new(EngineMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        self.metrics.clone()
    }

    /// Process events until the connection side closes the channel, then
    /// give in-flight workers a grace period to finish.
    pub async fn run(self, mut events: mpsc::Receiver<ChatEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }

        info!("event stream ended, draining in-flight replies");
        let permits = self.config.limits.max_inflight as u32;
        let drained = timeout(
            self.config.limits.shutdown_grace(),
            self.inflight.clone().acquire_many_owned(permits),
        )
        .await;
        if drained.is_err() {
            warn!("shutdown grace elapsed with replies still in flight");
        }
        info!("engine stopped: {}", self.metrics.snapshot());
    }

    async fn handle_event(&self, event: ChatEvent) {
        match event {
            ChatEvent::SystemNotice { text } => debug!("system notice ignored: {text}"),
            ChatEvent::SelfEcho { .. } => debug!("own echo ignored"),
            // Whispers are never answered and never remembered.
            ChatEvent::PrivateMessage { sender, .. } => {
                debug!("private message from {sender} ignored")
            }
            ChatEvent::PublicMessage { sender, text } => {
                self.handle_public_message(sender, text).await
            }
        }
    }

    async fn handle_public_message(&self, sender: String, text: String) {
        self.metrics.events.fetch_add(1, Ordering::Relaxed);

        // Snapshot first so the prompt sees the conversation up to, but not
        // including, this message; then record the message in arrival order.
        let history = self.context.get(&sender);
        self.context
            .append(&sender, ContextEntry::user(&sender, &text));

        if !is_triggered(&text, &self.config.bot.trigger) {
            return;
        }
        let Some(prompt) = extract_prompt(&text, &self.config.bot.trigger) else {
            debug!("{sender} addressed the bot with nothing to answer");
            return;
        };

        if !self.limiter.allow(&sender) {
            self.metrics.throttled.fetch_add(1, Ordering::Relaxed);
            warn!("rate limit denied {sender}");
            if self.config.bot.throttle_notice {
                let stats = self.limiter.stats(&sender);
                let notice = format!(
                    "{sender}: you've hit the rate limit ({}/{} requests per {}s), \
                     give it a moment",
                    stats.used,
                    stats.limit,
                    stats.window.as_secs()
                );
                if let Err(e) = self.handle.send(notice).await {
                    warn!("could not send throttle notice: {e}");
                }
            }
            return;
        }

        match commands::parse(&prompt) {
            Some(command) => self.spawn_command_worker(sender, command),
            None => self.spawn_reply_worker(sender, prompt, history),
        }
    }

    /// Answer a built-in command off the event loop.
    fn spawn_command_worker(&self, sender: String, command: commands::Command) {
        let registry = self.commands.clone();
        let handle = self.handle.clone();
        let inflight = self.inflight.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let Ok(_permit) = inflight.acquire_owned().await else {
                return;
            };
            let reply = registry.dispatch(&sender, command).await;
            match handle.send(format!("{sender}: {reply}")).await {
                Ok(()) => {
                    metrics.replies.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => warn!("could not send command reply to {sender}: {e}"),
            }
        });
    }

    /// Generate and send one AI reply, bounded by the in-flight semaphore.
    fn spawn_reply_worker(&self, sender: String, prompt: String, history: Vec<ContextEntry>) {
        let config = self.config.clone();
        let handle = self.handle.clone();
        let context = self.context.clone();
        let backend = self.backend.clone();
        let current_model = self.current_model.clone();
        let inflight = self.inflight.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let Ok(_permit) = inflight.acquire_owned().await else {
                return;
            };

            let model = current_model.read().await.clone();
            let request = GenerateRequest {
                model,
                prompt: build_prompt(
                    &config.ollama.system_prompt,
                    &config.bot.username,
                    &history,
                    &prompt,
                ),
                max_tokens: config.ollama.max_tokens,
                temperature: config.ollama.temperature,
                timeout: config.ollama.timeout(),
            };

            info!("generating reply for {sender}");
            match backend.generate(request).await {
                Ok(raw) => {
                    let reply =
                        truncate_reply(&single_line(&raw), config.bot.max_response_length);
                    context.append(&sender, ContextEntry::bot(&config.bot.username, &reply));

                    if config.bot.response_delay_ms > 0 {
                        tokio::time::sleep(config.bot.response_delay()).await;
                    }
                    match handle.send(format!("{sender}: {reply}")).await {
                        Ok(()) => {
                            metrics.replies.fetch_add(1, Ordering::Relaxed);
                            info!("reply sent to {sender}");
                        }
                        Err(e) => warn!("could not send reply to {sender}: {e}"),
                    }
                }
                // Backend failures are local to this message: log and move on.
                Err(e) => {
                    metrics.backend_failures.fetch_add(1, Ordering::Relaxed);
                    error!("backend failure ({}) for {sender}: {e}", e.kind());
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::client::{ChatHandle, ConnState, Outbound};
    use crate::core::error::BackendError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::watch;
    use tokio::time::timeout;

    /// Backend answering from a script. Each entry pairs a needle with an
    /// outcome; the first entry whose needle appears in the prompt is
    /// consumed, so concurrent workers cannot race on ordering.
    struct ScriptedBackend {
        script: tokio::sync::Mutex<VecDeque<(String, Result<String, BackendError>)>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(script: Vec<(&str, Result<String, BackendError>)>) -> Arc<Self> {
            Arc::new(ScriptedBackend {
                script: tokio::sync::Mutex::new(
                    script
                        .into_iter()
                        .map(|(needle, result)| (needle.to_string(), result))
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResponseBackend for ScriptedBackend {
        async fn generate(&self, request: GenerateRequest) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().await;
            let hit = script
                .iter()
                .position(|(needle, _)| request.prompt.contains(needle.as_str()));
            match hit {
                Some(index) => script.remove(index).map(|(_, result)| result).unwrap_or(
                    Err(BackendError::Unreachable("script desync".into())),
                ),
                None => Err(BackendError::Unreachable("script exhausted".into())),
            }
        }

        async fn list_models(&self) -> Result<Vec<String>, BackendError> {
            Ok(vec!["llama3".to_string()])
        }
    }

    struct Harness {
        events_tx: mpsc::Sender<ChatEvent>,
        outbound_rx: mpsc::Receiver<Outbound>,
        backend: Arc<ScriptedBackend>,
        context: Arc<ContextStore>,
        _state_tx: watch::Sender<ConnState>,
    }

    fn start(mut config: Config, script: Vec<(&str, Result<String, BackendError>)>) -> Harness {
        config.bot.response_delay_ms = 0;

        let config = Arc::new(config);
        let (state_tx, state_rx) = watch::channel(ConnState::Connected);
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let handle = ChatHandle::new(state_rx, outbound_tx);

        let limiter = Arc::new(RateLimiter::new(
            config.limits.max_requests,
            config.limits.window(),
        ));
        let context = Arc::new(ContextStore::new(config.bot.context_length));
        let backend = ScriptedBackend::new(script);

        let engine = BotEngine::new(config, handle, limiter, context.clone(), backend.clone());
        let (events_tx, events_rx) = mpsc::channel(64);
        tokio::spawn(engine.run(events_rx));

        Harness {
            events_tx,
            outbound_rx,
            backend,
            context,
            _state_tx: state_tx,
        }
    }

    async fn recv_line(harness: &mut Harness) -> String {
        match timeout(Duration::from_secs(5), harness.outbound_rx.recv())
            .await
            .expect("timed out waiting for an outgoing line")
            .expect("outbound channel closed")
        {
            Outbound::Line(text) => text,
            Outbound::Quit => panic!("unexpected quit"),
        }
    }

    fn public(sender: &str, text: &str) -> ChatEvent {
        ChatEvent::PublicMessage {
            sender: sender.to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn triggered_message_gets_reply_and_context() {
        let mut harness = start(Config::default(), vec![("", Ok("Hi Alice!".to_string()))]);

        harness
            .events_tx
            .send(public("alice", "Mia, hello"))
            .await
            .unwrap();

        let line = recv_line(&mut harness).await;
        assert!(line.contains("Hi Alice!"), "got: {line}");

        let history = harness.context.get("alice");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, crate::features::context::Role::User);
        assert_eq!(history[0].text, "Mia, hello");
        assert_eq!(history[1].role, crate::features::context::Role::Bot);
        assert_eq!(history[1].text, "Hi Alice!");
        assert_eq!(harness.backend.calls(), 1);
    }

    #[tokio::test]
    async fn untriggered_message_records_context_without_backend_call() {
        let harness = start(Config::default(), vec![]);

        harness
            .events_tx
            .send(public("alice", "lovely weather today"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(harness.backend.calls(), 0);
        let history = harness.context.get("alice");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "lovely weather today");
    }

    #[tokio::test]
    async fn private_messages_are_never_answered_or_stored() {
        let harness = start(Config::default(), vec![]);

        harness
            .events_tx
            .send(ChatEvent::PrivateMessage {
                sender: "bob".to_string(),
                text: "Mia, secret question".to_string(),
            })
            .await
            .unwrap();
        harness
            .events_tx
            .send(ChatEvent::SelfEcho {
                text: "Mia said something".to_string(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(harness.backend.calls(), 0);
        assert!(harness.context.get("bob").is_empty());
    }

    #[tokio::test]
    async fn rate_denial_sends_notice_and_skips_backend() {
        let mut config = Config::default();
        config.limits.max_requests = 1;
        let mut harness = start(
            config,
            vec![
                ("", Ok("first answer".to_string())),
                ("", Ok("never sent".to_string())),
            ],
        );

        harness
            .events_tx
            .send(public("alice", "Mia, one"))
            .await
            .unwrap();
        harness
            .events_tx
            .send(public("alice", "Mia, two"))
            .await
            .unwrap();

        let first = recv_line(&mut harness).await;
        let second = recv_line(&mut harness).await;
        let combined = format!("{first} || {second}");
        assert!(combined.contains("first answer"), "got: {combined}");
        assert!(combined.contains("rate limit"), "got: {combined}");
        assert_eq!(harness.backend.calls(), 1);
    }

    #[tokio::test]
    async fn silent_rate_denial_when_notice_disabled() {
        let mut config = Config::default();
        config.limits.max_requests = 1;
        config.bot.throttle_notice = false;
        let mut harness = start(config, vec![("", Ok("only answer".to_string()))]);

        harness
            .events_tx
            .send(public("alice", "Mia, one"))
            .await
            .unwrap();
        harness
            .events_tx
            .send(public("alice", "Mia, two"))
            .await
            .unwrap();

        let line = recv_line(&mut harness).await;
        assert!(line.contains("only answer"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(harness.outbound_rx.try_recv().is_err());
        assert_eq!(harness.backend.calls(), 1);
    }

    #[tokio::test]
    async fn backend_timeout_skips_reply_but_pipeline_continues() {
        let mut harness = start(
            Config::default(),
            vec![
                ("first", Err(BackendError::Timeout(Duration::from_secs(60)))),
                ("second", Ok("second worked".to_string())),
            ],
        );

        harness
            .events_tx
            .send(public("alice", "Mia, first"))
            .await
            .unwrap();
        harness
            .events_tx
            .send(public("bob", "Mia, second"))
            .await
            .unwrap();

        let line = recv_line(&mut harness).await;
        assert!(line.contains("second worked"), "got: {line}");
        assert_eq!(harness.backend.calls(), 2);

        // alice got no bot entry, bob did
        let alice = harness.context.get("alice");
        assert_eq!(alice.len(), 1);
        let bob = harness.context.get("bob");
        assert_eq!(bob.len(), 2);
    }

    #[tokio::test]
    async fn bare_command_bypasses_backend() {
        let mut harness = start(Config::default(), vec![]);

        harness
            .events_tx
            .send(public("alice", "Mia ping"))
            .await
            .unwrap();

        let line = recv_line(&mut harness).await;
        assert!(line.contains("Pong"), "got: {line}");
        assert_eq!(harness.backend.calls(), 0);
    }

    #[tokio::test]
    async fn command_sentences_still_reach_the_backend() {
        let mut harness = start(
            Config::default(),
            vec![("", Ok("a poem for you".to_string()))],
        );

        harness
            .events_tx
            .send(public("alice", "Mia help me write a poem"))
            .await
            .unwrap();

        let line = recv_line(&mut harness).await;
        assert!(line.contains("a poem for you"));
        assert_eq!(harness.backend.calls(), 1);
    }

    #[tokio::test]
    async fn long_replies_are_truncated_and_flattened() {
        let mut config = Config::default();
        config.bot.max_response_length = 40;
        let mut harness = start(
            config,
            vec![(
                "",
                Ok("line one\nline two with quite a few more words than fit".to_string()),
            )],
        );

        harness
            .events_tx
            .send(public("alice", "Mia, talk"))
            .await
            .unwrap();

        let line = recv_line(&mut harness).await;
        assert!(!line.contains('\n'));
        // "alice: " prefix plus a reply capped at 40 bytes
        assert!(line.len() <= "alice: ".len() + 40, "got: {line}");
        assert!(line.ends_with("..."));
    }
}
