use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::attachment::PendingAttachment;
use crate::client::{self, AgentClient, ChatRequest, StreamEvent};
use crate::conversation::{Conversation, Turn};
use crate::tui::AppEvent;
use crate::ui;

/// Which input box keystrokes currently land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// The message composer (the default).
    Message,
    /// The attachment path prompt opened with Ctrl+O.
    AttachPath,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub conversation: Conversation,
    /// True from submission until the stream completes or fails; while true,
    /// new submissions are rejected without touching the conversation.
    pub busy: bool,

    // Input state
    pub prompt: Prompt,
    pub input: String,
    pub cursor: usize, // char index into `input`
    pub attach_input: String,
    pub attach_cursor: usize,
    pub pending_attachment: Option<PendingAttachment>,

    // Chat viewport state
    pub chat_scroll: u16,
    pub chat_height: u16, // inner height, updated during render
    pub chat_width: u16,  // inner width, updated during render

    // Transient status line message (attachment errors and the like)
    pub status: Option<String>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Backend
    pub client: AgentClient,
    pub model: Option<String>,
    stream_task: Option<JoinHandle<()>>,
}

impl App {
    pub fn new(client: AgentClient, model: Option<String>, system_prompt: Option<String>) -> Self {
        let mut conversation = Conversation::new();
        if let Some(prompt) = system_prompt {
            conversation.push_system(prompt);
        }
        Self {
            should_quit: false,
            conversation,
            busy: false,

            prompt: Prompt::Message,
            input: String::new(),
            cursor: 0,
            attach_input: String::new(),
            attach_cursor: 0,
            pending_attachment: None,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,

            status: None,

            animation_frame: 0,

            client,
            model,
            stream_task: None,
        }
    }

    /// Validate the pending submission and, if accepted, freeze the outgoing
    /// request and extend the conversation by the user/assistant pair.
    /// Returns `None` (a silent no-op) while busy or when both the text and
    /// the attachment are empty.
    pub fn begin_turn(&mut self) -> Option<ChatRequest> {
        if self.busy {
            return None;
        }
        let text = self.input.trim();
        if text.is_empty() && self.pending_attachment.is_none() {
            return None;
        }

        // History is frozen before the pair is pushed, so the still-empty
        // placeholder can never leak into its own context.
        let history = self.conversation.snapshot_for_context();
        let attachment = self.pending_attachment.take();
        let query = text.to_string();

        let request = ChatRequest {
            query: query.clone(),
            history,
            image: attachment.as_ref().map(|a| a.data_url.clone()),
            model: self.model.clone(),
        };

        self.conversation
            .push_exchange(Turn::user(query, attachment.map(|a| a.data_url)));

        self.input.clear();
        self.cursor = 0;
        self.status = None;
        self.busy = true;
        self.scroll_chat_to_bottom();

        Some(request)
    }

    /// Submit the composed message: begin the turn and spawn the stream
    /// worker, which reports back through the app event channel.
    pub fn submit(&mut self, tx: &UnboundedSender<AppEvent>) {
        let Some(request) = self.begin_turn() else {
            return;
        };
        tracing::debug!(query = %request.query, history_len = request.history.len(), "submitting turn");

        let agent = self.client.clone();
        let worker_tx = tx.clone();
        self.stream_task = Some(spawn_supervised(tx.clone(), async move {
            client::run_stream(agent, request, move |event| {
                worker_tx.send(AppEvent::Stream(event)).is_ok()
            })
            .await;
        }));
    }

    /// Apply one event from the stream task. Terminal events release the busy
    /// flag unconditionally.
    pub fn on_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Fragment(text) => {
                if let Err(err) = self.conversation.append_fragment(&text) {
                    tracing::warn!(error = %err, "dropped stray fragment");
                }
                self.scroll_chat_to_bottom();
            }
            StreamEvent::Done => {
                let _ = self.conversation.close_open_turn();
                self.finish_turn();
            }
            StreamEvent::Failed(reason) => {
                tracing::warn!(%reason, "turn failed");
                let _ = self.conversation.fail_open_turn();
                self.status = Some(reason);
                self.finish_turn();
            }
        }
    }

    fn finish_turn(&mut self) {
        self.busy = false;
        self.stream_task = None;
        self.scroll_chat_to_bottom();
    }

    /// Tick: advance the streaming animation while a reply is in flight.
    /// Abnormal worker death is handled by [`spawn_supervised`], not here;
    /// a tick must never outrun terminal events still queued behind it.
    pub fn on_tick(&mut self) {
        if self.busy {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    // Attachment prompt

    pub fn open_attach_prompt(&mut self) {
        self.prompt = Prompt::AttachPath;
        self.attach_input.clear();
        self.attach_cursor = 0;
    }

    pub fn close_attach_prompt(&mut self) {
        self.prompt = Prompt::Message;
        self.attach_input.clear();
        self.attach_cursor = 0;
    }

    pub fn clear_attachment(&mut self) {
        self.pending_attachment = None;
    }

    // Chat scrolling

    pub fn scroll_chat_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    pub fn scroll_chat_down(&mut self, lines: u16) {
        let max = self.chat_line_count().saturating_sub(self.chat_height);
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(max);
    }

    /// Keep the newest content visible after every mutation.
    pub fn scroll_chat_to_bottom(&mut self) {
        let total = self.chat_line_count();
        let visible = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };
        self.chat_scroll = total.saturating_sub(visible);
    }

    /// Wrap-aware height of the rendered chat, computed over the exact lines
    /// [`crate::ui`] draws so the scroll position tracks the real render.
    fn chat_line_count(&self) -> u16 {
        let width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };
        ui::chat_lines(self)
            .iter()
            .map(|line| ui::wrapped_height(line, width))
            .sum::<usize>()
            .min(u16::MAX as usize) as u16
    }
}

/// Run the stream worker under a supervisor. The worker always emits its own
/// terminal event, so the supervisor only speaks when the worker died without
/// one (a panic); a finished-but-not-yet-drained stream is never disturbed.
fn spawn_supervised<F>(tx: UnboundedSender<AppEvent>, worker: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if tokio::spawn(worker).await.is_err() {
            tracing::error!("stream worker exited without a terminal event");
            let _ = tx.send(AppEvent::Stream(StreamEvent::Failed(
                "stream worker exited unexpectedly".to_string(),
            )));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ERROR_ANNOTATION, TurnState};

    fn app() -> App {
        App::new(AgentClient::new("http://127.0.0.1:1"), None, None)
    }

    fn type_message(app: &mut App, text: &str) {
        app.input = text.to_string();
        app.cursor = text.chars().count();
    }

    #[test]
    fn submit_appends_pair_and_streams_to_completion() {
        let mut app = app();
        type_message(&mut app, "Hello");

        let request = app.begin_turn().expect("accepted");
        assert_eq!(request.query, "Hello");
        assert!(request.history.is_empty());
        assert!(app.busy);
        assert!(app.input.is_empty());
        assert_eq!(app.conversation.len(), 2);
        assert_eq!(app.conversation.turns()[1].content, "");

        app.on_stream_event(StreamEvent::Fragment("Hi".to_string()));
        app.on_stream_event(StreamEvent::Fragment(" there".to_string()));
        app.on_stream_event(StreamEvent::Done);

        let turn = app.conversation.turns().last().unwrap();
        assert_eq!(turn.content, "Hi there");
        assert_eq!(turn.state, TurnState::Closed);
        assert!(!app.busy);
    }

    #[test]
    fn attachment_alone_satisfies_the_precondition() {
        let mut app = app();
        app.pending_attachment = Some(PendingAttachment {
            file_name: "cat.png".to_string(),
            data_url: "data:image/png;base64,AAAA".to_string(),
        });

        let request = app.begin_turn().expect("accepted");
        assert_eq!(request.query, "");
        assert_eq!(request.image.as_deref(), Some("data:image/png;base64,AAAA"));
        assert!(app.pending_attachment.is_none());
        assert_eq!(
            app.conversation.turns()[0].attachment.as_deref(),
            Some("data:image/png;base64,AAAA")
        );
    }

    #[test]
    fn empty_submission_is_rejected() {
        let mut app = app();
        type_message(&mut app, "   \t ");
        assert!(app.begin_turn().is_none());
        assert_eq!(app.conversation.len(), 0);
        assert!(!app.busy);
    }

    #[test]
    fn mid_stream_failure_annotates_and_releases_busy() {
        let mut app = app();
        type_message(&mut app, "tell me");
        app.begin_turn().unwrap();

        app.on_stream_event(StreamEvent::Fragment("Parti".to_string()));
        app.on_stream_event(StreamEvent::Failed("connection reset".to_string()));

        let turn = app.conversation.turns().last().unwrap();
        assert_eq!(turn.content, format!("Parti{ERROR_ANNOTATION}"));
        assert_eq!(turn.state, TurnState::ClosedWithError);
        assert!(!app.busy);
        assert_eq!(app.status.as_deref(), Some("connection reset"));
    }

    #[test]
    fn submission_while_busy_is_a_no_op() {
        let mut app = app();
        type_message(&mut app, "first");
        app.begin_turn().unwrap();
        let len = app.conversation.len();

        type_message(&mut app, "second");
        assert!(app.begin_turn().is_none());
        assert_eq!(app.conversation.len(), len);
        // The rejected text stays in the composer.
        assert_eq!(app.input, "second");

        app.on_stream_event(StreamEvent::Done);
        assert!(!app.busy);
        assert!(app.begin_turn().is_some());
        assert_eq!(app.conversation.len(), len + 2);
    }

    #[test]
    fn history_excludes_the_new_pair_but_keeps_prior_turns() {
        let mut app = app();
        type_message(&mut app, "first");
        app.begin_turn().unwrap();
        app.on_stream_event(StreamEvent::Fragment("answer".to_string()));
        app.on_stream_event(StreamEvent::Done);

        type_message(&mut app, "second");
        let request = app.begin_turn().unwrap();
        assert_eq!(request.history.len(), 2);
        assert_eq!(request.history[0].content, "first");
        assert_eq!(request.history[1].content, "answer");
    }

    #[test]
    fn late_fragments_after_close_are_dropped() {
        let mut app = app();
        type_message(&mut app, "q");
        app.begin_turn().unwrap();
        app.on_stream_event(StreamEvent::Done);

        app.on_stream_event(StreamEvent::Fragment("stray".to_string()));
        assert_eq!(app.conversation.turns().last().unwrap().content, "");
    }

    #[test]
    fn tick_animates_only_while_busy() {
        let mut app = app();
        app.on_tick();
        assert_eq!(app.animation_frame, 0);

        type_message(&mut app, "q");
        app.begin_turn().unwrap();
        app.on_tick();
        assert_eq!(app.animation_frame, 1);
    }

    #[test]
    fn autoscroll_accounts_for_word_wrapped_rows() {
        let mut app = app();
        app.chat_width = 7;
        app.chat_height = 2;
        type_message(&mut app, "q");
        app.begin_turn().unwrap();
        app.on_stream_event(StreamEvent::Fragment("abcd efgh ijkl".to_string()));
        app.on_stream_event(StreamEvent::Done);

        // You: / q / blank / Agent: / three word-wrapped rows / blank / blank
        // is nine rows; with two visible the scroll lands on seven. A plain
        // character count would wrap the reply into two rows and park the
        // viewport one row short of the newest content.
        assert_eq!(app.chat_scroll, 7);
    }

    #[tokio::test]
    async fn tick_cannot_preempt_a_queued_terminal_event() {
        let mut app = app();
        type_message(&mut app, "q");
        app.begin_turn().unwrap();

        // The worker already finished; its Fragment and Done are still queued
        // behind a tick. The tick must leave the turn alone.
        app.stream_task = Some(tokio::spawn(async {}));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        app.on_tick();
        assert!(app.busy);

        app.on_stream_event(StreamEvent::Fragment("Hi".to_string()));
        app.on_stream_event(StreamEvent::Done);

        let turn = app.conversation.turns().last().unwrap();
        assert_eq!(turn.content, "Hi");
        assert_eq!(turn.state, TurnState::Closed);
        assert!(!app.busy);
    }

    #[tokio::test]
    async fn panicking_worker_still_yields_a_failure() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        spawn_supervised(tx, async { panic!("worker died") })
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(AppEvent::Stream(StreamEvent::Failed(_)))
        ));
    }

    #[tokio::test]
    async fn completed_worker_is_not_second_guessed() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let worker_tx = tx.clone();
        spawn_supervised(tx, async move {
            let _ = worker_tx.send(AppEvent::Stream(StreamEvent::Done));
        })
        .await
        .unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(AppEvent::Stream(StreamEvent::Done))
        ));
        // All senders are gone once the supervisor returns; no synthesized
        // failure may follow the worker's own terminal event.
        assert!(rx.recv().await.is_none());
    }
}
