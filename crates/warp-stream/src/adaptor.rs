//! Stream Adaptor
//!
//! Wraps an inbound iterator of decoded stream events and emits an
//! outbound iterator in the same shape. Tracks a small transaction state
//! machine and recognizes a "stuck" signature — a structural pattern
//! meaning the upstream will never deliver useful content for this turn
//! — retrying up to `max_retries` times before synthesizing a terminal
//! fallback message. Pull-model: nothing runs until the consumer calls
//! `next()`, so this composes with whatever SSE writer sits downstream
//! without an event loop of its own.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

/// Transaction lifecycle as observed through a stream of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Active,
    Failed,
    Retrying,
}

static STUCK_SIGNATURES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new("(?i)rollback_transaction").unwrap(),
        Regex::new("(?i)update_task_description").unwrap(),
        Regex::new("(?i)begin_transaction.*rollback_transaction").unwrap(),
    ]
});

const RETRY_MESSAGES: [&str; 3] = [
    "Still working on this, retrying the last step...",
    "That attempt stalled, trying a different approach...",
    "Hit a snag, picking the task back up...",
];

const FALLBACK_MESSAGE: &str = "\u{26a0}\u{fe0f} I wasn't able to complete that action directly. Here's what I can offer instead:\n1. Example code you can adapt and run yourself\n2. Step-by-step guidance for doing this manually\n3. Best-practice advice for the approach you're taking";

fn content_event(text: &str) -> Value {
    json!({
        "choices": [
            { "delta": { "content": text } }
        ]
    })
}

fn actions_of(event: &Value) -> Vec<&str> {
    event
        .get("client_actions")
        .and_then(|ca| ca.get("actions"))
        .and_then(Value::as_array)
        .map(|actions| actions.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn contains_action(event: &Value, needle: &str) -> bool {
    actions_of(event).iter().any(|a| a.contains(needle))
}

fn has_agent_output_text(event: &Value) -> bool {
    event
        .pointer("/message/agent_output/text")
        .and_then(Value::as_str)
        .is_some_and(|t| !t.is_empty())
}

/// True if the event's JSON serialization matches a stuck-signature
/// pattern, with the extra rule that a bare `update_task_description`
/// mention only counts as stuck when no actual content has accompanied
/// it yet.
fn is_stuck(event: &Value) -> bool {
    let serialized = event.to_string();

    let matched = STUCK_SIGNATURES.iter().any(|re| re.is_match(&serialized));
    if !matched {
        return false;
    }

    if serialized.to_lowercase().contains("update_task_description")
        && !serialized.to_lowercase().contains("append_to_message_content")
        && !serialized.to_lowercase().contains("agent_output")
        && !has_agent_output_text(event)
    {
        return true;
    }

    // For rollback/begin-then-rollback matches, the signature alone is
    // sufficient — they are unambiguous regardless of surrounding text.
    STUCK_SIGNATURES[0].is_match(&serialized) || STUCK_SIGNATURES[2].is_match(&serialized)
}

/// Stateful adaptor over a stream of decoded events. `I` yields whatever
/// shape the upstream decodes its frames into (`serde_json::Value` here,
/// matching the rest of the crate's event handling).
pub struct StreamAdaptor<I> {
    inner: I,
    state: TransactionState,
    retry_count: u32,
    max_retries: u32,
    retry_cycle: usize,
    on_retry: Option<Box<dyn FnMut(u32) + Send>>,
}

impl<I> StreamAdaptor<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            state: TransactionState::Idle,
            retry_count: 0,
            max_retries: 2,
            retry_cycle: 0,
            on_retry: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Install a hook invoked whenever a retry marker is emitted, given
    /// the 1-based retry attempt number. The upstream "retry" only emits
    /// a marker and does not resubmit the request on its own; this hook
    /// is where a caller with access to the live upstream connection can
    /// plug in real resubmission. The default is a no-op.
    pub fn on_retry(mut self, hook: impl FnMut(u32) + Send + 'static) -> Self {
        self.on_retry = Some(Box::new(hook));
        self
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn retry_or_fallback(&mut self) -> Value {
        self.state = TransactionState::Failed;
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            self.state = TransactionState::Retrying;
            if let Some(hook) = &mut self.on_retry {
                hook(self.retry_count);
            }
            let message = RETRY_MESSAGES[self.retry_cycle % RETRY_MESSAGES.len()];
            self.retry_cycle += 1;
            content_event(&format!("\n\n\u{1f504} {message}\n\n"))
        } else {
            content_event(FALLBACK_MESSAGE)
        }
    }
}

impl<I: Iterator<Item = Value>> Iterator for StreamAdaptor<I> {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let event = self.inner.next()?;

        let emitted = if contains_action(&event, "begin_transaction") {
            self.state = TransactionState::Active;
            self.retry_count = 0;
            event
        } else if contains_action(&event, "rollback_transaction") {
            self.retry_or_fallback()
        } else if contains_action(&event, "commit_transaction") {
            self.state = TransactionState::Idle;
            event
        } else if is_stuck(&event) {
            self.retry_or_fallback()
        } else {
            event
        };

        Some(emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with_actions(actions: &[&str]) -> Value {
        json!({
            "client_actions": { "actions": actions }
        })
    }

    fn text_event(text: &str) -> Value {
        json!({
            "message": { "agent_output": { "text": text } }
        })
    }

    #[test]
    fn begin_transaction_resets_retry_count_and_passes_through() {
        let events = vec![event_with_actions(&["begin_transaction"])];
        let mut adaptor = StreamAdaptor::new(events.into_iter());
        let emitted = adaptor.next().unwrap();
        assert_eq!(emitted, event_with_actions(&["begin_transaction"]));
        assert_eq!(adaptor.state(), TransactionState::Active);
    }

    #[test]
    fn commit_transaction_sets_idle_and_passes_through() {
        let events = vec![
            event_with_actions(&["begin_transaction"]),
            text_event("done"),
            event_with_actions(&["commit_transaction"]),
        ];
        let mut adaptor = StreamAdaptor::new(events.into_iter());
        adaptor.next();
        adaptor.next();
        let last = adaptor.next().unwrap();
        assert_eq!(last, event_with_actions(&["commit_transaction"]));
        assert_eq!(adaptor.state(), TransactionState::Idle);
    }

    #[test]
    fn healthy_stream_passes_through_all_events_unmodified() {
        let events = vec![
            event_with_actions(&["begin_transaction"]),
            text_event("hi"),
            event_with_actions(&["commit_transaction"]),
        ];
        let expected = events.clone();
        let adaptor = StreamAdaptor::new(events.into_iter());
        let emitted: Vec<Value> = adaptor.collect();
        assert_eq!(emitted, expected);
    }

    #[test]
    fn rollback_sequence_retries_then_falls_back() {
        let events = vec![
            event_with_actions(&["begin_transaction"]),
            event_with_actions(&["rollback_transaction"]),
            event_with_actions(&["rollback_transaction"]),
            event_with_actions(&["rollback_transaction"]),
        ];
        let mut adaptor = StreamAdaptor::new(events.into_iter()).with_max_retries(2);

        let e1 = adaptor.next().unwrap();
        assert_eq!(e1["client_actions"]["actions"][0], "begin_transaction");

        let e2 = adaptor.next().unwrap();
        assert!(e2["choices"][0]["delta"]["content"].as_str().unwrap().contains('\u{1f504}'));
        assert_eq!(adaptor.state(), TransactionState::Retrying);

        let e3 = adaptor.next().unwrap();
        assert!(e3["choices"][0]["delta"]["content"].as_str().unwrap().contains('\u{1f504}'));

        let e4 = adaptor.next().unwrap();
        let content = e4["choices"][0]["delta"]["content"].as_str().unwrap();
        assert!(content.contains('\u{26a0}'));
        assert_eq!(adaptor.state(), TransactionState::Failed);
    }

    #[test]
    fn on_retry_hook_fires_with_attempt_number() {
        let events = vec![
            event_with_actions(&["begin_transaction"]),
            event_with_actions(&["rollback_transaction"]),
        ];
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut adaptor = StreamAdaptor::new(events.into_iter())
            .with_max_retries(2)
            .on_retry(move |n| seen_clone.lock().unwrap().push(n));

        adaptor.next();
        adaptor.next();
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn stuck_signature_update_task_description_without_output_retries() {
        let events = vec![json!({
            "client_actions": { "actions": ["update_task_description"] }
        })];
        let mut adaptor = StreamAdaptor::new(events.into_iter()).with_max_retries(1);
        let emitted = adaptor.next().unwrap();
        assert!(
            emitted["choices"][0]["delta"]["content"]
                .as_str()
                .unwrap()
                .contains('\u{1f504}')
        );
    }

    #[test]
    fn update_task_description_with_agent_output_is_not_stuck() {
        let event = json!({
            "client_actions": { "actions": ["update_task_description"] },
            "message": { "agent_output": { "text": "working on it" } }
        });
        assert!(!is_stuck(&event));
    }

    #[test]
    fn max_retries_zero_falls_back_immediately() {
        let events = vec![event_with_actions(&["rollback_transaction"])];
        let mut adaptor = StreamAdaptor::new(events.into_iter()).with_max_retries(0);
        let emitted = adaptor.next().unwrap();
        assert!(
            emitted["choices"][0]["delta"]["content"]
                .as_str()
                .unwrap()
                .contains('\u{26a0}')
        );
        assert_eq!(adaptor.state(), TransactionState::Failed);
    }
}
