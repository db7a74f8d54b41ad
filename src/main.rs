mod api;
mod citations;
mod config;
mod markdown;
mod sources;
mod store;
mod stream;

use iced::{
    alignment,
    border,
    event::{self, Event as IcedEvent},
    keyboard::{self, Key},
    time,
    widget::{
        button, column, container, horizontal_rule, rich_text, row, scrollable, span, text,
        text::Span, text_input, text_input::Id,
    },
    window, Color, Element, Font, Length, Size, Subscription, Task, Theme,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use api::{ApiClient, StreamEvent};
use markdown::{Block, Inline};
use sources::Source;
use store::{ChatMessage, ConversationStore, ConversationSummary, Role};
use stream::StreamAssembler;

fn main() -> iced::Result {
    let config = config::Config::load();

    iced::application("Cipher", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window::Settings {
            size: Size::new(config.window.width as f32, config.window.height as f32),
            position: window::Position::Centered,
            ..Default::default()
        })
        .run_with(App::new)
}

#[derive(Debug, Clone)]
enum Message {
    InputChanged(String),
    Submit,
    Stream(StreamEvent),
    CancelStream,
    NewConversation,
    ToggleHistory,
    CloseHistory,
    ConversationsFetched(Result<Vec<ConversationSummary>, String>),
    ConversationClicked(String),
    MessagesFetched(String, Result<Vec<ChatMessage>, String>),
    DeleteConversation(String),
    ConversationDeleted(String, Result<(), String>),
    LinkClicked(String),
    Tick,
}

struct App {
    store: ConversationStore,
    assembler: StreamAssembler,
    api: ApiClient,
    input_text: String,
    /// Conversation the in-flight stream belongs to; commits go here even if
    /// the user switches conversations mid-stream.
    streaming_conversation: Option<String>,
    history_open: bool,
    status: Option<String>,
    loading_frame: usize,
    input_id: Id,
}

impl App {
    fn new() -> (Self, Task<Message>) {
        let config = config::Config::load();
        let api = ApiClient::new(config.backend.host);

        let mut store = ConversationStore::new();
        store.set_active(Uuid::new_v4().to_string());

        let input_id = Id::unique();

        let app = App {
            store,
            assembler: StreamAssembler::new(),
            api,
            input_text: String::new(),
            streaming_conversation: None,
            history_open: false,
            status: None,
            loading_frame: 0,
            input_id: input_id.clone(),
        };

        let fetch_task = app.fetch_conversations();
        let focus_task = text_input::focus(input_id);

        (app, Task::batch([fetch_task, focus_task]))
    }

    fn fetch_conversations(&self) -> Task<Message> {
        let api = self.api.clone();
        Task::perform(
            async move { api.list_conversations().await.map_err(|e| e.to_string()) },
            Message::ConversationsFetched,
        )
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::InputChanged(value) => {
                self.input_text = value;
                Task::none()
            }
            Message::Submit => {
                let query = self.input_text.trim().to_string();
                if query.is_empty() || self.assembler.is_streaming() {
                    return Task::none();
                }
                self.input_text.clear();
                self.status = None;

                let conversation_id = match self.store.active_id() {
                    Some(id) => id.to_string(),
                    None => {
                        let id = Uuid::new_v4().to_string();
                        self.store.set_active(id.clone());
                        id
                    }
                };

                // Optimistic: the user turn lands in the transcript before
                // any network response.
                self.store
                    .append_message(&conversation_id, ChatMessage::user(query.clone()));

                let cancel = CancellationToken::new();
                self.assembler.begin(cancel.clone());
                self.streaming_conversation = Some(conversation_id.clone());

                let api = self.api.clone();
                Task::run(
                    iced::stream::channel(32, move |events| async move {
                        api.stream_chat(&query, &conversation_id, events, cancel)
                            .await;
                    }),
                    Message::Stream,
                )
            }
            Message::Stream(StreamEvent::Chunk(chunk)) => {
                self.assembler.push_chunk(&chunk);
                Task::none()
            }
            Message::Stream(StreamEvent::Completed) => {
                let conversation = self.streaming_conversation.take();
                if let (Some(content), Some(id)) = (self.assembler.complete(), conversation) {
                    self.store
                        .append_message(&id, ChatMessage::assistant(content));
                    // First exchange of a client-minted conversation: the
                    // backend has just persisted it, so pick up its record.
                    if self.store.summary(&id).is_none() {
                        return self.fetch_conversations();
                    }
                }
                Task::none()
            }
            Message::Stream(StreamEvent::Failed(error)) => {
                // A user-driven cancel already tore the stream down; the
                // trailing transport error is expected then.
                if self.assembler.is_streaming() {
                    self.assembler.fail();
                    self.streaming_conversation = None;
                    self.status = Some(format!("Stream failed: {error}"));
                }
                Task::none()
            }
            Message::CancelStream => {
                self.assembler.cancel();
                self.streaming_conversation = None;
                Task::none()
            }
            Message::NewConversation => {
                self.store.set_active(Uuid::new_v4().to_string());
                self.status = None;
                text_input::focus(self.input_id.clone())
            }
            Message::ToggleHistory => {
                self.history_open = !self.history_open;
                Task::none()
            }
            Message::CloseHistory => {
                self.history_open = false;
                Task::none()
            }
            Message::ConversationsFetched(Ok(list)) => {
                self.store.set_conversation_list(list);
                Task::none()
            }
            Message::ConversationsFetched(Err(error)) => {
                eprintln!("Failed to fetch conversations: {error}");
                Task::none()
            }
            Message::ConversationClicked(id) => {
                self.history_open = false;
                let api = self.api.clone();
                let request_id = id.clone();
                Task::perform(
                    async move {
                        let result = api
                            .fetch_messages(&request_id)
                            .await
                            .map_err(|e| e.to_string());
                        (request_id, result)
                    },
                    |(id, result)| Message::MessagesFetched(id, result),
                )
            }
            Message::MessagesFetched(id, Ok(messages)) => {
                self.store.replace_messages(&id, messages);
                self.store.set_active(id);
                Task::none()
            }
            Message::MessagesFetched(_, Err(error)) => {
                self.status = Some(format!("Failed to load conversation: {error}"));
                Task::none()
            }
            Message::DeleteConversation(id) => {
                let api = self.api.clone();
                let request_id = id.clone();
                Task::perform(
                    async move {
                        let result = api
                            .delete_conversation(&request_id)
                            .await
                            .map_err(|e| e.to_string());
                        (request_id, result)
                    },
                    |(id, result)| Message::ConversationDeleted(id, result),
                )
            }
            Message::ConversationDeleted(id, Ok(())) => {
                self.store.remove_conversation(&id);
                Task::none()
            }
            Message::ConversationDeleted(_, Err(error)) => {
                self.status = Some(format!("Delete failed: {error}"));
                Task::none()
            }
            Message::LinkClicked(url) => {
                // "#" is the placeholder target of an unresolved citation.
                if url != "#" {
                    if let Err(e) = open::that(&url) {
                        eprintln!("Failed to open {url}: {e}");
                    }
                }
                Task::none()
            }
            Message::Tick => {
                if self.assembler.is_streaming() {
                    self.loading_frame = (self.loading_frame + 1) % 10;
                }
                Task::none()
            }
        }
    }

    fn subscription(&self) -> Subscription<Message> {
        let timer = if self.assembler.is_streaming() {
            time::every(Duration::from_millis(80)).map(|_| Message::Tick)
        } else {
            Subscription::none()
        };

        let events = event::listen_with(|event, _status, _id| {
            if let IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) = event
            {
                Some(Message::CloseHistory)
            } else {
                None
            }
        });

        Subscription::batch([timer, events])
    }

    fn view(&self) -> Element<Message> {
        let rail = self.rail();
        let main = column![self.transcript(), self.input_area()]
            .spacing(10)
            .padding(12);

        let mut content = row![rail];
        if self.history_open {
            content = content.push(self.history_panel());
        }
        content = content.push(container(main).width(Length::Fill));

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn rail(&self) -> Element<Message> {
        container(
            column![
                button(text("New").size(13))
                    .on_press(Message::NewConversation)
                    .padding(10),
                button(text("History").size(13))
                    .on_press(Message::ToggleHistory)
                    .padding(10),
            ]
            .spacing(12),
        )
        .padding(12)
        .height(Length::Fill)
        .into()
    }

    fn history_panel(&self) -> Element<Message> {
        let mut list = column![].spacing(4);
        for conv in self.store.conversation_list() {
            let title = if conv.title.trim().is_empty() {
                "Untitled Conversation"
            } else {
                conv.title.as_str()
            };
            list = list.push(
                row![
                    button(text(title).size(13))
                        .on_press(Message::ConversationClicked(conv.id.clone()))
                        .style(button::text)
                        .width(Length::Fill),
                    button(text("Delete").size(11))
                        .on_press(Message::DeleteConversation(conv.id.clone()))
                        .style(button::danger),
                ]
                .spacing(6)
                .align_y(alignment::Vertical::Center),
            );
        }

        container(
            column![
                text("Recent Chats").size(12).color(muted()),
                scrollable(list).height(Length::Fill),
            ]
            .spacing(12),
        )
        .width(280)
        .padding(16)
        .style(|_| panel_style())
        .into()
    }

    fn transcript(&self) -> Element<Message> {
        let messages = self.store.active_messages();
        let mut col = column![].spacing(28).padding(16);

        if messages.is_empty() && !self.assembler.is_streaming() {
            return container(
                column![
                    text("What do you want to know?").size(32),
                    text("Ask anything. I'll search, analyze, and deliver the answer.")
                        .size(16)
                        .color(muted()),
                ]
                .spacing(14)
                .align_x(alignment::Horizontal::Center),
            )
            .width(Length::Fill)
            .height(Length::Fill)
            .align_x(alignment::Horizontal::Center)
            .align_y(alignment::Vertical::Center)
            .into();
        }

        for (idx, msg) in messages.iter().enumerate() {
            match msg.role {
                Role::User => col = col.push(user_view(&msg.content)),
                Role::Assistant => {
                    // Sources come from the immediately preceding user turn,
                    // recomputed on every render.
                    let srcs = preceding_sources(messages, idx);
                    col = col.push(assistant_view(&msg.content, &srcs));
                }
            }
        }

        if let Some(live) = self.assembler.live_text() {
            let srcs = last_user_sources(messages);
            col = col.push(streaming_view(live, &srcs, self.loading_frame));
        }

        scrollable(col).height(Length::Fill).into()
    }

    fn input_area(&self) -> Element<Message> {
        let input = text_input("Ask anything...", &self.input_text)
            .on_input(Message::InputChanged)
            .on_submit(Message::Submit)
            .padding(14)
            .size(16)
            .id(self.input_id.clone());

        let action: Element<Message> = if self.assembler.is_streaming() {
            button(text("Cancel").size(14))
                .on_press(Message::CancelStream)
                .style(button::danger)
                .padding(12)
                .into()
        } else {
            button(text("Send").size(14))
                .on_press_maybe(
                    (!self.input_text.trim().is_empty()).then_some(Message::Submit),
                )
                .padding(12)
                .into()
        };

        let mut col = column![row![input, action].spacing(8)].spacing(6);
        if let Some(status) = &self.status {
            col = col.push(text(status).size(13).color(danger()));
        }
        col.into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}

/// Sources for the assistant message at `idx`: extracted from the user turn
/// right before it.
fn preceding_sources(messages: &[ChatMessage], idx: usize) -> Vec<Source> {
    idx.checked_sub(1)
        .and_then(|i| messages.get(i))
        .filter(|m| m.role == Role::User)
        .map(|m| sources::extract_sources(&m.content))
        .unwrap_or_default()
}

fn last_user_sources(messages: &[ChatMessage]) -> Vec<Source> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| sources::extract_sources(&m.content))
        .unwrap_or_default()
}

fn user_view(content: &str) -> Element<'static, Message> {
    container(text(sources::display_query(content).to_string()).size(22))
        .width(Length::Fill)
        .align_x(alignment::Horizontal::Right)
        .into()
}

fn assistant_view(content: &str, srcs: &[Source]) -> Element<'static, Message> {
    let mut col = column![].spacing(14);

    if !srcs.is_empty() {
        col = col.push(sources_row(srcs));
    }

    col = col.push(text("ANSWER").size(11).color(muted()));
    for block in markdown::parse(content, srcs) {
        col = col.push(block_view(&block));
    }

    col.into()
}

fn streaming_view(live: &str, srcs: &[Source], frame: usize) -> Element<'static, Message> {
    const FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

    let mut col = column![].spacing(14);
    if !srcs.is_empty() {
        col = col.push(sources_row(srcs));
    }
    col = col.push(
        row![
            text(FRAMES[frame % FRAMES.len()]).size(14).color(accent()),
            text("GENERATING").size(11).color(accent()),
        ]
        .spacing(8)
        .align_y(alignment::Vertical::Center),
    );
    for block in markdown::parse(live, srcs) {
        col = col.push(block_view(&block));
    }
    col.into()
}

fn sources_row(srcs: &[Source]) -> Element<'static, Message> {
    let mut cards = row![].spacing(10);
    for source in srcs {
        cards = cards.push(source_card(source));
    }

    column![
        text("SOURCES").size(11).color(muted()),
        scrollable(cards).direction(scrollable::Direction::Horizontal(
            scrollable::Scrollbar::new(),
        )),
    ]
    .spacing(6)
    .into()
}

fn source_card(source: &Source) -> Element<'static, Message> {
    button(
        column![
            text(source.title.clone()).size(13),
            text(source.snippet.clone()).size(11).color(muted()),
            text(format!("Source {}", source.id)).size(10).color(muted()),
        ]
        .spacing(4),
    )
    .on_press(Message::LinkClicked(source.url.clone()))
    .style(button::secondary)
    .width(220)
    .padding(10)
    .into()
}

fn block_view(block: &Block) -> Element<'static, Message> {
    match block {
        Block::Paragraph(inlines) => inline_view(inlines, 15),
        Block::Heading { level, content } => {
            let size = 26u16.saturating_sub(2 * u16::from(*level)).max(16);
            inline_view(content, size)
        }
        Block::CodeBlock { code, .. } => container(
            scrollable(text(code.clone()).size(14).font(Font::MONOSPACE))
                .direction(scrollable::Direction::Horizontal(
                    scrollable::Scrollbar::new(),
                )),
        )
        .width(Length::Fill)
        .padding(12)
        .style(|_| code_block_style())
        .into(),
        Block::ListItem { ordinal, content } => {
            let marker = match ordinal {
                Some(n) => format!("{n}. "),
                None => "•  ".to_string(),
            };
            row![text(marker).size(15), inline_view(content, 15)]
                .spacing(4)
                .into()
        }
        Block::Rule => horizontal_rule(1).into(),
    }
}

fn inline_view(inlines: &[Inline], size: u16) -> Element<'static, Message> {
    let spans: Vec<Span<'static, String>> = inlines.iter().map(|i| inline_span(i, size)).collect();
    Element::from(rich_text(spans)).map(Message::LinkClicked)
}

fn inline_span(inline: &Inline, size: u16) -> Span<'static, String> {
    match inline {
        Inline::Text(t) => span(t.clone()).size(size),
        Inline::Code(code) => span(code.clone())
            .size(size.saturating_sub(1))
            .font(Font::MONOSPACE)
            .color(accent())
            .background(badge_background()),
        Inline::Link { url, text } => span(text.clone())
            .size(size)
            .color(accent())
            .underline(true)
            .link(url.clone()),
        // Citation badge: compact bordered monospace label, clickable when
        // the reference resolved; distinct either way.
        Inline::Citation(citation) => span(citation.label.clone())
            .size(size.saturating_sub(3))
            .font(Font::MONOSPACE)
            .color(if citation.resolved { accent() } else { muted() })
            .background(badge_background())
            .border(border::rounded(4))
            .padding([0, 4])
            .link(citation.url.clone()),
    }
}

fn accent() -> Color {
    Color::from_rgb8(52, 211, 153)
}

fn muted() -> Color {
    Color::from_rgb8(140, 143, 160)
}

fn danger() -> Color {
    Color::from_rgb8(248, 113, 113)
}

fn badge_background() -> Color {
    Color::from_rgb8(38, 40, 54)
}

fn panel_style() -> container::Style {
    container::Style {
        background: Some(Color::from_rgb8(26, 27, 38).into()),
        ..container::Style::default()
    }
}

fn code_block_style() -> container::Style {
    container::Style {
        background: Some(Color::from_rgb8(22, 22, 30).into()),
        border: border::rounded(8),
        ..container::Style::default()
    }
}
