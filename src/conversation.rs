use anyhow::{Result, bail};
use serde::Serialize;

/// Appended once to the open turn when the transport fails mid-stream.
/// Markdown-neutral so it renders verbatim.
pub const ERROR_ANNOTATION: &str =
    "\n\n[connection error: the agent stream was interrupted]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Lifecycle of a single turn. User and system turns are born `Closed`;
/// only the most recent assistant turn passes through the streaming states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Assistant placeholder created, no fragments yet.
    Pending,
    /// At least one fragment received.
    Streaming,
    /// Terminal: stream completed.
    Closed,
    /// Terminal: stream failed; content ends with [`ERROR_ANNOTATION`].
    ClosedWithError,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Textual image encoding (data URL), set at creation for user turns only.
    pub attachment: Option<String>,
    pub state: TurnState,
}

impl Turn {
    pub fn user(content: String, attachment: Option<String>) -> Self {
        Self {
            role: Role::User,
            content,
            attachment,
            state: TurnState::Closed,
        }
    }

    pub fn system(content: String) -> Self {
        Self {
            role: Role::System,
            content,
            attachment: None,
            state: TurnState::Closed,
        }
    }

    fn assistant_placeholder() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            attachment: None,
            state: TurnState::Pending,
        }
    }

    pub fn is_open(&self) -> bool {
        self.role == Role::Assistant
            && matches!(self.state, TurnState::Pending | TurnState::Streaming)
    }
}

/// One entry of the `history` array sent to the backend.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
}

/// Ordered, append-only log of turns. Insertion order is display order is
/// chronological order; never reordered or truncated within a session. The
/// single mutable exception is the content of the open assistant turn, which
/// is always the last turn.
#[derive(Debug, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Seed the session with a system turn; it rides along in `history` like
    /// any other prior turn.
    pub fn push_system(&mut self, content: String) {
        debug_assert!(self.is_empty(), "system turn must come first");
        self.turns.push(Turn::system(content));
    }

    pub fn has_open_turn(&self) -> bool {
        self.turns.last().map(Turn::is_open).unwrap_or(false)
    }

    /// Freeze the context to send with the next request. Must be called
    /// before [`push_exchange`](Self::push_exchange) so the new query and its
    /// empty placeholder never leak into their own context.
    pub fn snapshot_for_context(&self) -> Vec<HistoryEntry> {
        self.turns
            .iter()
            .map(|turn| HistoryEntry {
                role: turn.role,
                content: turn.content.clone(),
                attachment: turn.attachment.clone(),
            })
            .collect()
    }

    /// Append the user turn and its empty assistant placeholder as one atomic
    /// pair. The placeholder becomes the open turn.
    pub fn push_exchange(&mut self, user_turn: Turn) {
        debug_assert!(!self.has_open_turn(), "previous turn still open");
        self.turns.push(user_turn);
        self.turns.push(Turn::assistant_placeholder());
    }

    /// Append one streamed fragment to the open turn. Fragments must be
    /// applied in arrival order; the caller is the single writer.
    pub fn append_fragment(&mut self, text: &str) -> Result<()> {
        let Some(turn) = self.turns.last_mut() else {
            bail!("no turn to append to");
        };
        if !turn.is_open() {
            bail!("last turn is not open for streaming");
        }
        turn.state = TurnState::Streaming;
        turn.content.push_str(text);
        Ok(())
    }

    /// Close the open turn successfully. No further fragments are accepted.
    pub fn close_open_turn(&mut self) -> Result<()> {
        let Some(turn) = self.turns.last_mut() else {
            bail!("no turn to close");
        };
        if !turn.is_open() {
            bail!("last turn is not open");
        }
        turn.state = TurnState::Closed;
        Ok(())
    }

    /// Close the open turn as failed, appending the fixed error annotation
    /// so the user can tell the reply is incomplete.
    pub fn fail_open_turn(&mut self) -> Result<()> {
        let Some(turn) = self.turns.last_mut() else {
            bail!("no turn to fail");
        };
        if !turn.is_open() {
            bail!("last turn is not open");
        }
        turn.content.push_str(ERROR_ANNOTATION);
        turn.state = TurnState::ClosedWithError;
        Ok(())
    }
}
