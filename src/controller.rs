//! # Exchange controller
//!
//! Drives one exchange at a time through
//! `Idle → Streaming → Completed | Cancelled | Failed → Idle`.
//!
//! The controller owns the conversation. Observers only ever see snapshots,
//! published after the placeholder is appended and after every non-empty
//! delta, in arrival order. A [`StopHandle`] can be cloned out and moved to
//! another task (a Ctrl-C handler, a UI button) to end the stream early.

use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    api::CompletionBackend,
    composer::Composition,
    error::HomieError,
    history::{ConversationRecord, HistoryStore},
    message::{Message, Role},
    registry::ModelConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

/// How [`ExchangeController::run`] ended.
#[derive(Debug)]
pub enum ExchangeOutcome {
    /// The stream ran to its end. `saved` tells whether a history record was written.
    Completed { saved: bool },
    /// Stopped by the user or superseded; the partial reply stays visible.
    Cancelled,
    Failed(HomieError),
}

impl ExchangeOutcome {
    fn state(&self) -> ExchangeState {
        match self {
            ExchangeOutcome::Completed { .. } => ExchangeState::Completed,
            ExchangeOutcome::Cancelled => ExchangeState::Cancelled,
            ExchangeOutcome::Failed(_) => ExchangeState::Failed,
        }
    }
}

/// Cancels whichever exchange is currently running. Idempotent, and a no-op when idle.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl StopHandle {
    pub fn stop(&self) {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = current.as_ref() {
            token.cancel();
        }
    }

    /// Cancel the previous exchange, if any, and install a fresh token.
    fn replace(&self) -> CancellationToken {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = current.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        *current = Some(token.clone());
        token
    }
}

/// Receives published conversation snapshots.
pub trait ConversationObserver {
    fn on_update(&mut self, conversation: &[Message]);

    fn on_state(&mut self, _state: ExchangeState) {}
}

impl<F> ConversationObserver for F
where
    F: FnMut(&[Message]),
{
    fn on_update(&mut self, conversation: &[Message]) {
        self(conversation)
    }
}

pub struct ExchangeController<B, H> {
    backend: B,
    history: H,
    conversation: Vec<Message>,
    state: ExchangeState,
    stop: StopHandle,
}

impl<B: CompletionBackend, H: HistoryStore> ExchangeController<B, H> {
    pub fn new(backend: B, history: H) -> Self {
        Self {
            backend,
            history,
            conversation: Vec::new(),
            state: ExchangeState::Idle,
            stop: StopHandle::default(),
        }
    }

    /// The visible conversation, assistant replies included.
    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut H {
        &mut self.history
    }

    /// Continue from a stored conversation.
    pub fn restore(&mut self, record: &ConversationRecord) {
        self.conversation = record.messages.clone();
    }

    pub fn clear(&mut self) {
        self.conversation.clear();
    }

    fn publish(&self, observer: &mut impl ConversationObserver) {
        observer.on_update(&self.conversation);
    }

    fn enter(&mut self, state: ExchangeState, observer: &mut impl ConversationObserver) {
        debug!("Exchange state: {:?} -> {:?}", self.state, state);
        self.state = state;
        observer.on_state(state);
    }

    /// Run one exchange to its end.
    ///
    /// Any earlier exchange is cancelled first. The visible list of
    /// `composition` becomes the conversation, followed by an empty assistant
    /// message that grows with every delta. Only a completed, non-empty reply
    /// with history context is saved.
    pub async fn run(
        &mut self,
        composition: Composition,
        model: ModelConfig,
        observer: &mut impl ConversationObserver,
    ) -> ExchangeOutcome {
        let cancel = self.stop.replace();

        let Composition {
            wire,
            visible,
            history,
        } = composition;
        self.conversation = visible;
        self.conversation.push(Message::new(Role::Assistant, ""));
        let slot = self.conversation.len() - 1;

        self.enter(ExchangeState::Streaming, observer);
        self.publish(observer);

        let outcome = match self.stream_into(slot, &wire, &model, cancel, observer).await {
            Err(err) => ExchangeOutcome::Failed(err),
            Ok(false) => {
                info!("Exchange cancelled");
                ExchangeOutcome::Cancelled
            }
            Ok(true) => {
                let reply = &self.conversation[slot].content;
                match history {
                    Some(context) if !reply.is_empty() => {
                        let record = ConversationRecord::from_exchange(
                            &context,
                            &model,
                            self.conversation.clone(),
                        );
                        match self.history.save(record) {
                            Ok(()) => ExchangeOutcome::Completed { saved: true },
                            Err(err) => {
                                error!("Failed to save conversation: {}", err);
                                ExchangeOutcome::Failed(match err {
                                    HomieError::History(_) => err,
                                    other => HomieError::History(other.to_string()),
                                })
                            }
                        }
                    }
                    _ => {
                        debug!("Nothing to persist for this exchange");
                        ExchangeOutcome::Completed { saved: false }
                    }
                }
            }
        };

        if let ExchangeOutcome::Failed(err) = &outcome {
            warn!("Exchange failed: {}", err);
        }
        self.enter(outcome.state(), observer);
        self.enter(ExchangeState::Idle, observer);
        outcome
    }

    /// Fold deltas into the assistant message at `slot`.
    /// `Ok(true)` when the stream was exhausted, `Ok(false)` when cancelled.
    async fn stream_into(
        &mut self,
        slot: usize,
        wire: &[Message],
        model: &ModelConfig,
        cancel: CancellationToken,
        observer: &mut impl ConversationObserver,
    ) -> Result<bool, HomieError> {
        let mut deltas = self.backend.stream_chat(wire, model, cancel.clone()).await?;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = deltas.next() => item,
            };
            if cancel.is_cancelled() {
                return Ok(false);
            }
            match next {
                None => return Ok(true),
                Some(Ok(delta)) => {
                    if delta.is_empty() {
                        continue;
                    }
                    self.conversation[slot].content.push_str(&delta);
                    self.publish(observer);
                }
                Some(Err(err)) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::DeltaStream,
        composer::HistoryContext,
        error::Result,
        history::MemoryHistory,
        registry::Provider,
    };
    use async_trait::async_trait;

    struct Scripted {
        deltas: Vec<Result<String>>,
        tokens: Arc<Mutex<Vec<CancellationToken>>>,
    }

    impl Scripted {
        fn ok(deltas: &[&str]) -> Self {
            Self {
                deltas: deltas.iter().map(|d| Ok(d.to_string())).collect(),
                tokens: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for Scripted {
        async fn stream_chat(
            &self,
            _wire: &[Message],
            _model: &ModelConfig,
            cancel: CancellationToken,
        ) -> Result<DeltaStream> {
            self.tokens.lock().unwrap().push(cancel);
            let deltas: Vec<Result<String>> = self
                .deltas
                .iter()
                .map(|d| match d {
                    Ok(text) => Ok(text.clone()),
                    Err(err) => Err(HomieError::Stream(err.to_string())),
                })
                .collect();
            Ok(futures::stream::iter(deltas).boxed())
        }
    }

    struct Refusing;

    #[async_trait]
    impl CompletionBackend for Refusing {
        async fn stream_chat(
            &self,
            _wire: &[Message],
            _model: &ModelConfig,
            _cancel: CancellationToken,
        ) -> Result<DeltaStream> {
            Err(HomieError::Provider {
                status: 401,
                message: "bad key".into(),
            })
        }
    }

    fn model() -> ModelConfig {
        ModelConfig {
            id: "m1".into(),
            name: "Model One".into(),
            provider: Provider::OpenAi,
            api_key: "k".into(),
            endpoint: "http://localhost".into(),
            model: "gpt".into(),
            temperature: 0.7,
            max_tokens: 2000,
        }
    }

    fn composition(url: Option<&str>) -> Composition {
        let visible = vec![Message::system("sys"), Message::user("question")];
        Composition {
            wire: visible.clone(),
            visible,
            history: url.map(|url| HistoryContext {
                page_title: "Page".into(),
                page_url: url.into(),
                assistant_name: None,
            }),
        }
    }

    #[tokio::test]
    async fn test_completed_exchange_concatenates_and_saves() {
        let mut controller =
            ExchangeController::new(Scripted::ok(&["Clock", "", " skew", "."]), MemoryHistory::default());
        let mut snapshots: Vec<String> = Vec::new();
        let mut observer = |conversation: &[Message]| {
            snapshots.push(conversation.last().unwrap().content.clone());
        };

        let outcome = controller
            .run(composition(Some("https://a.test")), model(), &mut observer)
            .await;

        assert!(matches!(outcome, ExchangeOutcome::Completed { saved: true }));
        assert_eq!(snapshots, vec!["", "Clock", "Clock skew", "Clock skew."]);
        assert_eq!(controller.state(), ExchangeState::Idle);

        let stored = controller.history_mut().get("https://a.test").unwrap().unwrap();
        assert_eq!(stored.messages.len(), 3);
        assert_eq!(stored.messages[2].content, "Clock skew.");
        assert_eq!(stored.model_name, "Model One");
    }

    #[tokio::test]
    async fn test_stop_after_first_delta_cancels_without_saving() {
        let mut controller =
            ExchangeController::new(Scripted::ok(&["a", "b", "c"]), MemoryHistory::default());
        let stop = controller.stop_handle();
        let mut seen = 0;
        let mut observer = |conversation: &[Message]| {
            if !conversation.last().unwrap().content.is_empty() {
                seen += 1;
                stop.stop();
                stop.stop();
            }
        };

        let outcome = controller
            .run(composition(Some("https://a.test")), model(), &mut observer)
            .await;

        assert!(matches!(outcome, ExchangeOutcome::Cancelled));
        assert_eq!(seen, 1);
        assert_eq!(controller.conversation().last().unwrap().content, "a");
        assert!(controller.history_mut().list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_error_fails_without_saving() {
        let backend = Scripted {
            deltas: vec![Ok("partial".into()), Err(HomieError::Stream("reset".into()))],
            tokens: Arc::default(),
        };
        let mut controller = ExchangeController::new(backend, MemoryHistory::default());

        let outcome = controller
            .run(composition(Some("https://a.test")), model(), &mut |_: &[Message]| {})
            .await;

        assert!(matches!(outcome, ExchangeOutcome::Failed(HomieError::Stream(_))));
        assert_eq!(controller.conversation().last().unwrap().content, "partial");
        assert!(controller.history_mut().list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_error_fails_with_placeholder_in_place() {
        let mut controller = ExchangeController::new(Refusing, MemoryHistory::default());

        let outcome = controller
            .run(composition(Some("https://a.test")), model(), &mut |_: &[Message]| {})
            .await;

        assert!(matches!(outcome, ExchangeOutcome::Failed(HomieError::Provider { status: 401, .. })));
        assert_eq!(controller.conversation().len(), 3);
        assert!(controller.conversation()[2].content.is_empty());
    }

    #[tokio::test]
    async fn test_empty_reply_or_missing_url_is_not_saved() {
        let mut controller = ExchangeController::new(Scripted::ok(&["", ""]), MemoryHistory::default());
        let outcome = controller
            .run(composition(Some("https://a.test")), model(), &mut |_: &[Message]| {})
            .await;
        assert!(matches!(outcome, ExchangeOutcome::Completed { saved: false }));

        let mut controller = ExchangeController::new(Scripted::ok(&["hi"]), MemoryHistory::default());
        let outcome = controller
            .run(composition(None), model(), &mut |_: &[Message]| {})
            .await;
        assert!(matches!(outcome, ExchangeOutcome::Completed { saved: false }));
        assert!(controller.history_mut().list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_exchange_supersedes_previous_token() {
        let backend = Scripted::ok(&["x"]);
        let tokens = backend.tokens.clone();
        let mut controller = ExchangeController::new(backend, MemoryHistory::default());

        controller.stop();
        controller
            .run(composition(None), model(), &mut |_: &[Message]| {})
            .await;
        let outcome = controller
            .run(composition(None), model(), &mut |_: &[Message]| {})
            .await;

        assert!(matches!(outcome, ExchangeOutcome::Completed { .. }));
        let tokens = tokens.lock().unwrap();
        assert_eq!(tokens.len(), 2);
        assert!(tokens[0].is_cancelled());
        assert!(!tokens[1].is_cancelled());
    }

    #[tokio::test]
    async fn test_states_are_reported_in_order() {
        struct Recorder(Vec<ExchangeState>);
        impl ConversationObserver for Recorder {
            fn on_update(&mut self, _conversation: &[Message]) {}
            fn on_state(&mut self, state: ExchangeState) {
                self.0.push(state);
            }
        }

        let mut controller = ExchangeController::new(Scripted::ok(&["x"]), MemoryHistory::default());
        let mut recorder = Recorder(Vec::new());
        controller.run(composition(None), model(), &mut recorder).await;

        assert_eq!(
            recorder.0,
            vec![ExchangeState::Streaming, ExchangeState::Completed, ExchangeState::Idle]
        );
    }

    #[test]
    fn test_restore_and_clear() {
        let mut controller = ExchangeController::new(Scripted::ok(&[]), MemoryHistory::default());
        let record = ConversationRecord::example("https://a.test");
        controller.restore(&record);
        assert_eq!(controller.conversation(), record.messages.as_slice());
        controller.clear();
        assert!(controller.conversation().is_empty());
    }
}
