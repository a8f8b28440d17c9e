use std::future::Future;

use crucible_types::{Conversation, ErrorCategory};
use crucible_types::AgentException;

use crate::classifier::classify;

const TAIL_MESSAGES: usize = 20;
const TAIL_CHARS: usize = 500;

pub fn build_recovery_prompt(conversation: &Conversation, original_prompt: &str) -> String {
    let tail = conversation.tail_truncated(TAIL_MESSAGES, TAIL_CHARS);
    let mut prompt = String::from(
        "Session recovery: the previous session was interrupted. Resuming from recent context.\n\n",
    );
    for message in &tail {
        prompt.push_str(&format!("[{:?}] {}\n", message.role, message.content));
    }
    prompt.push_str("\n");
    prompt.push_str(original_prompt);
    prompt
}

/// Innermost decorator in the canonical stack
/// `Breaker(Recovery(SessionRecovery(base)))` (§4.4). On a `Session`-category
/// failure, rebuilds the prompt from the conversation tail and re-invokes
/// `base_call` up to `max_attempts` times.
pub async fn with_session_recovery<F, Fut, T>(
    conversation: &Conversation,
    original_prompt: &str,
    max_attempts: u32,
    mut base_call: F,
) -> Result<T, AgentException>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, AgentException>>,
{
    let mut attempt = 0;
    let mut prompt = original_prompt.to_string();
    loop {
        match base_call(prompt.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let category = classify(&err.message);
                if category != ErrorCategory::Session || attempt >= max_attempts {
                    return Err(err);
                }
                attempt += 1;
                tracing::warn!(attempt, "session recovery: rebuilding prompt and retrying");
                prompt = build_recovery_prompt(conversation, original_prompt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_types::{Message, MessageRole};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn conversation_with(messages: usize) -> Conversation {
        let mut conv = Conversation::new();
        for i in 0..messages {
            conv.append(Message::new(MessageRole::Assistant, format!("msg {i}")));
        }
        conv
    }

    #[tokio::test]
    async fn recovers_on_session_failure_then_succeeds() {
        let conv = conversation_with(25);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = with_session_recovery(&conv, "do the thing", 2, move |prompt| {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    assert_eq!(prompt, "do the thing");
                    Err(AgentException::new(ErrorCategory::Session, "a", "session not found"))
                } else {
                    assert!(prompt.contains("Session recovery"));
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn non_session_failure_propagates_immediately() {
        let conv = conversation_with(1);
        let result: Result<(), _> = with_session_recovery(&conv, "x", 2, |_| async {
            Err(AgentException::new(ErrorCategory::Network, "a", "connection reset"))
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn gives_up_after_max_session_recovery_attempts() {
        let conv = conversation_with(1);
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<(), _> = with_session_recovery(&conv, "x", 2, move |_| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AgentException::new(ErrorCategory::Session, "a", "session not found"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
