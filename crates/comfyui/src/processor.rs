//! WebSocket message relay loop.
//!
//! Reads raw frames from a ComfyUI WebSocket connection, forwards every
//! text frame that belongs to the watched prompt into the job's event
//! channel, and stops once the engine reports the prompt finished or
//! failed.

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::messages::{parse_message, ComfyUIMessage};
use crate::normalizer::RawEvent;

/// How the relay loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    /// The engine reported the prompt finished.
    Finished,
    /// The engine reported an error for the prompt.
    Failed(String),
    /// The connection closed before the prompt finished.
    Closed,
}

/// Relay frames for `prompt_id` into `events` until the prompt ends.
///
/// Frames are forwarded as [`RawEvent::Text`] exactly as received so the
/// normalizer sees the engine's original payloads, including malformed
/// ones. Frames that name a different prompt are dropped. A closed
/// receiver does not stop the loop: the engine run still has to finish.
///
/// Binary frames (preview images) are ignored.
pub async fn relay_messages<S>(
    ws_stream: &mut S,
    prompt_id: &str,
    events: &mpsc::Sender<RawEvent>,
) -> PromptOutcome
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = ws_stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if let Some(outcome) = handle_text_message(text.to_string(), prompt_id, events).await
                {
                    return outcome;
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::trace!(prompt_id, "Ignoring binary message (preview image)");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Handled automatically by tungstenite.
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(prompt_id, ?frame, "ComfyUI WebSocket closed");
                return PromptOutcome::Closed;
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => {
                tracing::error!(prompt_id, error = %e, "WebSocket receive error");
                return PromptOutcome::Closed;
            }
        }
    }
    PromptOutcome::Closed
}

/// Forward one text frame and report whether it ended the prompt.
async fn handle_text_message(
    text: String,
    prompt_id: &str,
    events: &mpsc::Sender<RawEvent>,
) -> Option<PromptOutcome> {
    let parsed = parse_message(&text).ok();

    if let Some(other) = parsed.as_ref().and_then(|m| m.prompt_id()) {
        if other != prompt_id {
            tracing::trace!(prompt_id, other_prompt = other, "Dropping frame for another prompt");
            return None;
        }
    }

    if events.send(RawEvent::Text(text)).await.is_err() {
        tracing::debug!(prompt_id, "Event receiver gone, frame dropped");
    }

    match parsed? {
        ComfyUIMessage::Executing(data) if data.node.is_none() => {
            tracing::info!(prompt_id, "Execution completed (all nodes done)");
            Some(PromptOutcome::Finished)
        }
        ComfyUIMessage::ExecutionSuccess(_) => Some(PromptOutcome::Finished),
        ComfyUIMessage::ExecutionError(data) => {
            tracing::error!(
                prompt_id,
                node_id = ?data.node_id,
                error_type = %data.exception_type,
                error_message = %data.exception_message,
                "Execution error",
            );
            Some(PromptOutcome::Failed(data.exception_message))
        }
        ComfyUIMessage::ExecutionInterrupted(data) => {
            tracing::warn!(prompt_id, node_id = ?data.node_id, "Execution interrupted");
            Some(PromptOutcome::Failed("Execution interrupted".to_string()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn text(s: &str) -> Result<Message, tungstenite::Error> {
        Ok(Message::Text(s.into()))
    }

    async fn drain(rx: &mut mpsc::Receiver<RawEvent>) -> Vec<RawEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn relays_until_finished() {
        let mut frames = stream::iter(vec![
            text(r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":1}}}}"#),
            text(r#"{"type":"executing","data":{"node":"3","prompt_id":"p"}}"#),
            Ok(Message::Binary(vec![0u8, 1].into())),
            text("garbage frame"),
            text(r#"{"type":"executing","data":{"node":null,"prompt_id":"p"}}"#),
            text(r#"{"type":"executing","data":{"node":"never","prompt_id":"p"}}"#),
        ]);
        let (tx, mut rx) = mpsc::channel(16);

        let outcome = relay_messages(&mut frames, "p", &tx).await;
        assert_eq!(outcome, PromptOutcome::Finished);

        let forwarded = drain(&mut rx).await;
        assert_eq!(forwarded.len(), 4);
        assert_eq!(forwarded[2], RawEvent::Text("garbage frame".into()));
    }

    #[tokio::test]
    async fn drops_frames_for_other_prompts() {
        let mut frames = stream::iter(vec![
            text(r#"{"type":"executing","data":{"node":null,"prompt_id":"other"}}"#),
            text(r#"{"type":"execution_success","data":{"prompt_id":"p"}}"#),
        ]);
        let (tx, mut rx) = mpsc::channel(16);

        let outcome = relay_messages(&mut frames, "p", &tx).await;
        assert_eq!(outcome, PromptOutcome::Finished);
        assert_eq!(drain(&mut rx).await.len(), 1);
    }

    #[tokio::test]
    async fn execution_error_fails_prompt() {
        let mut frames = stream::iter(vec![text(
            r#"{"type":"execution_error","data":{"prompt_id":"p","node_id":"4","exception_message":"CUDA out of memory","exception_type":"RuntimeError"}}"#,
        )]);
        let (tx, _rx) = mpsc::channel(16);

        let outcome = relay_messages(&mut frames, "p", &tx).await;
        assert_eq!(outcome, PromptOutcome::Failed("CUDA out of memory".into()));
    }

    #[tokio::test]
    async fn stream_end_is_closed() {
        let mut frames = stream::iter(vec![text(
            r#"{"type":"progress","data":{"value":1,"max":2,"node":"3","prompt_id":"p"}}"#,
        )]);
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        let outcome = relay_messages(&mut frames, "p", &tx).await;
        assert_eq!(outcome, PromptOutcome::Closed);
    }
}
