mod composer;
mod config;
mod gateway;
mod history;
mod render;
mod sidebar;
mod storage;
mod store;
mod ui;

use iced::{
    widget::{button, column, container, horizontal_space, row, scrollable, text, text_editor, Column, Row},
    Element, Length, Task, Theme, Subscription, Size,
    time, clipboard,
    alignment,
    window,
};
use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use composer::{Composer, Mode};
use gateway::GeminiGateway;
use render::{CodeBlockKey, CopyIndicator, COPY_FEEDBACK};
use storage::FileStorage;
use store::{SendOutcome, SessionStore};

static MESSAGES_ID: Lazy<scrollable::Id> = Lazy::new(|| scrollable::Id::new("messages"));

fn init_tracing() {
    let filter = EnvFilter::try_from_env("GEMINI_CHAT_LOG")
        .unwrap_or_else(|_| EnvFilter::new("gemini_chat=info,warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> iced::Result {
    init_tracing();
    let config = config::Config::load();

    iced::application(App::title, App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window::Settings {
            size: Size::new(config.window.width as f32, config.window.height as f32),
            min_size: Some(Size::new(
                config.window.min_width as f32,
                config.window.min_height as f32,
            )),
            position: window::Position::Centered,
            ..Default::default()
        })
        .run_with(App::new)
}

#[derive(Debug, Clone)]
pub enum Message {
    NewChat,
    SelectChat(String),
    DeleteChat(String),
    EditorAction(text_editor::Action),
    Submit,
    ModeSelected(Mode),
    PromptClicked(&'static str, Mode),
    ReplyReceived(SendOutcome),
    CopyCode { key: CodeBlockKey, code: String },
    CopyExpired(u64),
    OpenSource(String),
    CopySource(String),
    SaveImage { message_id: String, index: usize },
    ImageSaved(Result<PathBuf, String>),
    ToggleSidebar,
    Tick,
}

struct App {
    store: SessionStore,
    composer: Composer,
    editor: text_editor::Content,
    copied: CopyIndicator,
    images: ui::ImageCache,
    image_dir: PathBuf,
    compact: bool,
    sidebar_open: bool,
    loading_frame: usize,
    notice: Option<String>,
}

async fn save_image(path: PathBuf, bytes: Vec<u8>) -> Result<PathBuf, String> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await.map_err(|e| e.to_string())?;
    }
    tokio::fs::write(&path, bytes).await.map_err(|e| e.to_string())?;
    Ok(path)
}

impl App {
    fn new() -> (Self, Task<Message>) {
        let config = config::Config::load();

        let api_key = config.api_key();
        if api_key.is_none() {
            tracing::warn!("GEMINI_API_KEY is not set; requests will fail until it is");
        }
        let gateway = Arc::new(GeminiGateway::with_config(&config.gemini, api_key));
        let storage = Box::new(FileStorage::new(config.history_path()));
        let store = SessionStore::open(storage, gateway);

        let mut app = App {
            store,
            composer: Composer::default(),
            editor: text_editor::Content::new(),
            copied: CopyIndicator::default(),
            images: ui::ImageCache::default(),
            image_dir: config.image_dir(),
            compact: config.starts_compact(),
            sidebar_open: !config.starts_compact(),
            loading_frame: 0,
            notice: None,
        };
        let task = app.refresh();

        (app, task)
    }

    /// Re-syncs derived view state after the store changed.
    fn refresh(&mut self) -> Task<Message> {
        self.images.sync(self.store.messages());
        scrollable::snap_to(MESSAGES_ID.clone(), scrollable::RelativeOffset::END)
    }

    fn send(&mut self, prompt: String, mode: Mode) -> Task<Message> {
        match self.store.begin_send(&prompt, mode) {
            Some(pending) => {
                self.notice = None;
                let refresh = self.refresh();
                Task::batch([refresh, Task::perform(pending.run(), Message::ReplyReceived)])
            }
            None => Task::none(),
        }
    }

    fn title(&self) -> String {
        match self.store.active_title() {
            Some(title) => format!("Gemini Chat · {}", title),
            None => "Gemini Chat".to_string(),
        }
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        let busy = self.store.is_sending();

        match message {
            Message::NewChat => {
                self.store.new_session();
                if self.compact {
                    self.sidebar_open = false;
                }
                self.refresh()
            }
            Message::SelectChat(id) => {
                self.store.select_session(&id);
                if self.compact {
                    self.sidebar_open = false;
                }
                self.refresh()
            }
            Message::DeleteChat(id) => {
                self.store.delete_session(&id);
                self.refresh()
            }
            Message::EditorAction(action) => {
                self.editor.perform(action);
                self.composer.set_draft(self.editor.text());
                Task::none()
            }
            Message::Submit => match self.composer.submit(busy) {
                Some((prompt, mode)) => {
                    self.editor = text_editor::Content::new();
                    self.send(prompt, mode)
                }
                None => Task::none(),
            },
            Message::ModeSelected(mode) => {
                self.composer.set_mode(mode, busy);
                Task::none()
            }
            Message::PromptClicked(prompt, mode) => {
                if busy {
                    return Task::none();
                }
                self.composer.set_mode(mode, busy);
                self.send(prompt.to_string(), mode)
            }
            Message::ReplyReceived(outcome) => {
                self.store.finish_send(outcome);
                self.refresh()
            }
            Message::CopyCode { key, code } => {
                let token = self.copied.mark(key);
                Task::batch([
                    clipboard::write(code),
                    Task::perform(tokio::time::sleep(COPY_FEEDBACK), move |_| {
                        Message::CopyExpired(token)
                    }),
                ])
            }
            Message::CopyExpired(token) => {
                self.copied.expire(token);
                Task::none()
            }
            Message::OpenSource(uri) => match open::that(uri.as_str()) {
                Ok(()) => Task::none(),
                Err(e) => {
                    tracing::warn!(uri = %uri, "Failed to open link: {}", e);
                    self.notice = Some("Could not open link, copied it instead".to_string());
                    clipboard::write(uri)
                }
            },
            Message::CopySource(uri) => {
                self.notice = Some("Link copied to clipboard".to_string());
                clipboard::write(uri)
            }
            Message::SaveImage { message_id, index } => {
                let bytes = self
                    .store
                    .messages()
                    .iter()
                    .find(|m| m.id == message_id)
                    .and_then(|m| m.images.as_ref()?.get(index))
                    .and_then(|image| render::decode_data_url(&image.url));

                match bytes {
                    Some(bytes) => {
                        let path = self.image_dir.join(render::image_file_name(&message_id, index));
                        Task::perform(save_image(path, bytes), Message::ImageSaved)
                    }
                    None => {
                        tracing::warn!(message = %message_id, index, "nothing to save");
                        Task::none()
                    }
                }
            }
            Message::ImageSaved(result) => {
                self.notice = Some(match result {
                    Ok(path) => {
                        tracing::info!(path = %path.display(), "image saved");
                        format!("Saved {}", path.display())
                    }
                    Err(e) => {
                        tracing::error!("Failed to save image: {}", e);
                        format!("Could not save image: {}", e)
                    }
                });
                Task::none()
            }
            Message::ToggleSidebar => {
                self.sidebar_open = !self.sidebar_open;
                Task::none()
            }
            Message::Tick => {
                if busy {
                    self.loading_frame = self.loading_frame.wrapping_add(1);
                }
                Task::none()
            }
        }
    }

    fn subscription(&self) -> Subscription<Message> {
        if self.store.is_sending() {
            time::every(Duration::from_millis(300)).map(|_| Message::Tick)
        } else {
            Subscription::none()
        }
    }

    fn view(&self) -> Element<Message> {
        let busy = self.store.is_sending();

        let toggle = button(text(if self.sidebar_open { "✕" } else { "☰" }).size(16))
            .on_press(Message::ToggleSidebar)
            .style(button::text);

        let mut header = row![toggle, text(self.title()).size(15), horizontal_space()]
            .spacing(10)
            .padding(8)
            .align_y(alignment::Vertical::Center);
        if let Some(notice) = &self.notice {
            header = header.push(text(notice.clone()).size(12));
        }

        let body: Element<Message> = if self.store.messages().is_empty() && !busy {
            ui::welcome()
        } else {
            let messages = self.store.messages().iter().map(|message| {
                ui::message_view(message, &self.copied, &self.images, self.loading_frame)
            });
            scrollable(
                container(Column::with_children(messages).spacing(10))
                    .padding(16)
                    .width(Length::Fill),
            )
            .id(MESSAGES_ID.clone())
            .height(Length::Fill)
            .into()
        };

        let input = container(ui::composer_view(&self.editor, &self.composer, busy))
            .padding(16)
            .width(Length::Fill)
            .align_x(alignment::Horizontal::Center);

        let main = column![header, body, input].width(Length::Fill).height(Length::Fill);

        let mut layout = Row::new();
        if self.sidebar_open {
            layout = layout.push(sidebar::view(
                &self.store.sessions(),
                self.store.active_session_id(),
            ));
        }

        container(layout.push(main))
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}
