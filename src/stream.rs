use tokio_util::sync::CancellationToken;

/// Accumulates incrementally arriving assistant text.
///
/// Two states: `Idle` and `Streaming`. While streaming, the live buffer is
/// exposed for rendering after every chunk; on completion the buffer is taken
/// as the finalized message content, on failure or cancellation it is
/// discarded. At most one stream is active at a time.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    state: State,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    Streaming {
        buffer: String,
        cancel: CancellationToken,
    },
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter `Streaming` with an empty buffer and the cancel handle of the
    /// in-flight request. Returns `false` (and changes nothing) if a stream
    /// is already active: a submit while streaming is a no-op.
    pub fn begin(&mut self, cancel: CancellationToken) -> bool {
        if self.is_streaming() {
            return false;
        }
        self.state = State::Streaming {
            buffer: String::new(),
            cancel,
        };
        true
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state, State::Streaming { .. })
    }

    /// The in-progress text, if any. Re-rendered on every chunk.
    pub fn live_text(&self) -> Option<&str> {
        match &self.state {
            State::Streaming { buffer, .. } => Some(buffer),
            State::Idle => None,
        }
    }

    /// Chunks arriving after the stream was torn down are dropped.
    pub fn push_chunk(&mut self, chunk: &str) {
        if let State::Streaming { buffer, .. } = &mut self.state {
            buffer.push_str(chunk);
        }
    }

    /// Normal end of stream: yields the accumulated text and returns to
    /// `Idle`. `None` when no stream was active.
    pub fn complete(&mut self) -> Option<String> {
        match std::mem::take(&mut self.state) {
            State::Streaming { buffer, .. } => Some(buffer),
            State::Idle => None,
        }
    }

    /// Failure path: the partial buffer is discarded, never committed.
    pub fn fail(&mut self) {
        self.state = State::Idle;
    }

    /// Abort the underlying transport and discard the partial buffer.
    pub fn cancel(&mut self) {
        if let State::Streaming { cancel, .. } = &self.state {
            cancel.cancel();
        }
        self.state = State::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChatMessage, ConversationStore, Role};

    #[test]
    fn assembles_chunks_into_one_message() {
        let mut assembler = StreamAssembler::new();
        assert!(assembler.begin(CancellationToken::new()));

        assembler.push_chunk("Hel");
        assert_eq!(assembler.live_text(), Some("Hel"));
        assembler.push_chunk("lo");
        assert_eq!(assembler.live_text(), Some("Hello"));

        assert_eq!(assembler.complete().as_deref(), Some("Hello"));
        assert!(!assembler.is_streaming());
        assert_eq!(assembler.live_text(), None);
    }

    #[test]
    fn begin_while_streaming_is_a_no_op() {
        let mut assembler = StreamAssembler::new();
        assert!(assembler.begin(CancellationToken::new()));
        assembler.push_chunk("keep");
        assert!(!assembler.begin(CancellationToken::new()));
        assert_eq!(assembler.live_text(), Some("keep"));
    }

    #[test]
    fn failure_discards_partial_buffer() {
        let mut assembler = StreamAssembler::new();
        assembler.begin(CancellationToken::new());
        assembler.push_chunk("partial");
        assembler.fail();
        assert_eq!(assembler.live_text(), None);
        assert_eq!(assembler.complete(), None);
    }

    #[test]
    fn cancel_fires_token_and_discards_buffer() {
        let mut assembler = StreamAssembler::new();
        let token = CancellationToken::new();
        assembler.begin(token.clone());
        assembler.push_chunk("partial");

        assembler.cancel();

        assert!(token.is_cancelled());
        assert!(!assembler.is_streaming());
        assert_eq!(assembler.live_text(), None);
    }

    #[test]
    fn chunks_after_teardown_are_dropped() {
        let mut assembler = StreamAssembler::new();
        assembler.begin(CancellationToken::new());
        assembler.cancel();
        assembler.push_chunk("late");
        assert_eq!(assembler.live_text(), None);
    }

    #[test]
    fn cancelled_stream_leaves_only_optimistic_user_message() {
        let mut store = ConversationStore::new();
        let mut assembler = StreamAssembler::new();
        store.set_active("conv");

        // Submit: optimistic user message, then the stream starts.
        store.append_message("conv", ChatMessage::user("question"));
        assembler.begin(CancellationToken::new());
        assembler.push_chunk("half an ans");

        // Cancel mid-stream: nothing is committed.
        assembler.cancel();

        let messages = store.messages("conv");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert!(!assembler.is_streaming());
    }

    #[test]
    fn completed_stream_commits_one_assistant_message() {
        let mut store = ConversationStore::new();
        let mut assembler = StreamAssembler::new();
        store.set_active("conv");

        store.append_message("conv", ChatMessage::user("question"));
        assembler.begin(CancellationToken::new());
        assembler.push_chunk("Hel");
        assembler.push_chunk("lo");

        if let Some(content) = assembler.complete() {
            store.append_message("conv", ChatMessage::assistant(content));
        }

        let messages = store.messages("conv");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hello");
        assert_eq!(assembler.live_text(), None);
    }
}
