use std::collections::{HashMap, HashSet};

use iced::font;
use iced::widget::text::Span;
use iced::widget::{
    button, column, container, horizontal_space, image, rich_text, row, span, text, text_editor,
    tooltip, Column, Row,
};
use iced::{alignment, Border, Color, Element, Font, Length};

use crate::composer::{enter_action, Composer, EnterAction, Mode, MODE_OPTIONS};
use crate::history::{ChatMessage, Role};
use crate::render::{self, CopyIndicator, Fragment, Inline, Style};
use crate::Message;

const USER_COLOR: Color = Color::from_rgb(0.23, 0.45, 0.93);
const MODEL_COLOR: Color = Color::from_rgb(0.13, 0.70, 0.40);
const ERROR_COLOR: Color = Color::from_rgb(0.86, 0.24, 0.24);
const CODE_COLOR: Color = Color::from_rgb(0.55, 0.75, 1.0);
const IMAGE_SIZE: f32 = 240.0;

pub const EXAMPLE_PROMPTS: [(&str, &str, Mode); 4] = [
    (
        "Create a vibrant image",
        "A photorealistic image of a futuristic city skyline at sunset, with flying cars.",
        Mode::Image,
    ),
    (
        "Find a code snippet",
        "Using web search, find a Javascript code snippet to create a confetti effect on a button click.",
        Mode::Search,
    ),
    (
        "Explain a concept",
        "Explain the concept of quantum entanglement in simple terms.",
        Mode::Chat,
    ),
    (
        "Draft an email",
        "Draft an email to my team asking for project status updates.",
        Mode::Chat,
    ),
];

/// Decoded image handles for the visible messages, keyed by message id and
/// attachment index. Rebuilding handles every frame would re-upload textures.
#[derive(Default)]
pub struct ImageCache {
    handles: HashMap<(String, usize), image::Handle>,
}

impl ImageCache {
    pub fn sync(&mut self, messages: &[ChatMessage]) {
        let mut live = HashSet::new();
        for message in messages {
            for (index, attachment) in message.images.iter().flatten().enumerate() {
                let key = (message.id.clone(), index);
                if !self.handles.contains_key(&key) {
                    match render::decode_data_url(&attachment.url) {
                        Some(bytes) => {
                            self.handles.insert(key.clone(), image::Handle::from_bytes(bytes));
                        }
                        None => tracing::warn!(message = %message.id, index, "undecodable image"),
                    }
                }
                live.insert(key);
            }
        }
        self.handles.retain(|key, _| live.contains(key));
    }

    pub fn get(&self, message_id: &str, index: usize) -> Option<&image::Handle> {
        self.handles.get(&(message_id.to_string(), index))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.handles.len()
    }
}

fn avatar<'a>(message: &ChatMessage) -> Element<'a, Message> {
    let (label, color) = match (message.role, message.is_error) {
        (Role::User, _) => ("You", USER_COLOR),
        (Role::Model, true) => ("!", ERROR_COLOR),
        (Role::Model, false) => ("AI", MODEL_COLOR),
    };

    container(text(label).size(12))
        .width(Length::Fixed(34.0))
        .height(Length::Fixed(34.0))
        .align_x(alignment::Horizontal::Center)
        .align_y(alignment::Vertical::Center)
        .style(move |_theme| container::Style {
            background: Some(color.into()),
            text_color: Some(Color::WHITE),
            border: Border {
                radius: 17.0.into(),
                ..Border::default()
            },
            ..container::Style::default()
        })
        .into()
}

fn inline_text<'a>(content: &str) -> Element<'a, Message> {
    let spans: Vec<Span<'a, Message, Font>> = render::parse_inline(content)
        .into_iter()
        .map(|inline| match inline {
            Inline::LineBreak => span("\n"),
            Inline::Span { text, style } => match style {
                Style::Plain => span(text),
                Style::Bold => span(text).font(Font {
                    weight: font::Weight::Bold,
                    ..Font::DEFAULT
                }),
                Style::Italic => span(text).font(Font {
                    style: font::Style::Italic,
                    ..Font::DEFAULT
                }),
                Style::Code => span(text).font(Font::MONOSPACE).color(CODE_COLOR),
            },
        })
        .collect();

    rich_text(spans).size(15).into()
}

fn code_block<'a>(
    message_id: &str,
    index: usize,
    lang: &str,
    code: &str,
    copied: bool,
) -> Element<'a, Message> {
    let label = if lang.is_empty() { "code" } else { lang };
    let copy_label = if copied { "✓ Copied!" } else { "Copy code" };

    let header = row![
        text(label.to_string()).size(12),
        horizontal_space(),
        button(text(copy_label).size(12))
            .on_press(Message::CopyCode {
                key: (message_id.to_string(), index),
                code: code.to_string(),
            })
            .padding([2, 6])
            .style(button::text),
    ]
    .align_y(alignment::Vertical::Center);

    container(
        column![header, text(code.to_string()).font(Font::MONOSPACE).size(13)].spacing(6),
    )
    .padding(10)
    .width(Length::Fill)
    .style(container::rounded_box)
    .into()
}

fn image_grid<'a>(message: &ChatMessage, cache: &ImageCache) -> Element<'a, Message> {
    let Some(images) = message.images.as_ref() else {
        return column![].into();
    };

    let tiles: Vec<Element<'a, Message>> = images
        .iter()
        .enumerate()
        .map(|(index, attachment)| {
            let picture: Element<'a, Message> = match cache.get(&message.id, index) {
                Some(handle) => image(handle.clone())
                    .width(Length::Fixed(IMAGE_SIZE))
                    .height(Length::Fixed(IMAGE_SIZE))
                    .into(),
                None => text(attachment.alt.clone()).size(13).into(),
            };
            let save = tooltip(
                button(text("⤓ Save").size(12))
                    .on_press(Message::SaveImage {
                        message_id: message.id.clone(),
                        index,
                    })
                    .style(button::secondary),
                text(render::image_file_name(&message.id, index)).size(12),
                tooltip::Position::Bottom,
            );
            column![picture, save].spacing(4).into()
        })
        .collect();

    let mut grid = Column::new().spacing(8);
    let mut tiles = tiles.into_iter();
    while let Some(first) = tiles.next() {
        let mut line = Row::new().spacing(8).push(first);
        if let Some(second) = tiles.next() {
            line = line.push(second);
        }
        grid = grid.push(line);
    }
    grid.into()
}

fn source_list<'a>(message: &ChatMessage) -> Option<Element<'a, Message>> {
    let sources = message.sources.as_ref().filter(|s| !s.is_empty())?;

    let list = sources
        .iter()
        .enumerate()
        .fold(column![text("Sources").size(13)].spacing(4), |list, (i, source)| {
            let on_press = if render::is_web_link(&source.uri) {
                Message::OpenSource(source.uri.clone())
            } else {
                Message::CopySource(source.uri.clone())
            };
            let entry = tooltip(
                button(text(format!("{}. {}", i + 1, render::source_label(source))).size(13))
                    .on_press(on_press)
                    .padding([2, 4])
                    .style(button::text),
                text(source.uri.clone()).size(12),
                tooltip::Position::Bottom,
            );
            list.push(entry)
        });
    Some(list.into())
}

fn loading_dots<'a>(frame: usize) -> Element<'a, Message> {
    let dots: String = (0..3)
        .map(|i| if i == frame % 3 { '●' } else { '○' })
        .collect();
    text(dots).size(15).into()
}

pub fn message_view<'a>(
    message: &ChatMessage,
    copied: &CopyIndicator,
    images: &ImageCache,
    frame: usize,
) -> Element<'a, Message> {
    let content: Element<'a, Message> = if message.is_loading {
        loading_dots(frame)
    } else {
        let mut body = Column::new().spacing(8);
        for (index, fragment) in render::parse_message(&message.text).into_iter().enumerate() {
            body = body.push(match fragment {
                Fragment::Text(content) => inline_text(&content),
                Fragment::Code { lang, code } => {
                    let key = (message.id.clone(), index);
                    code_block(&message.id, index, &lang, &code, copied.is_copied(&key))
                }
            });
        }
        if message.images.as_ref().is_some_and(|i| !i.is_empty()) {
            body = body.push(image_grid(message, images));
        }
        if let Some(sources) = source_list(message) {
            body = body.push(sources);
        }
        body.into()
    };

    let tint = if message.is_error {
        Some(Color { a: 0.15, ..ERROR_COLOR })
    } else if message.role == Role::Model {
        Some(Color::from_rgba(1.0, 1.0, 1.0, 0.04))
    } else {
        None
    };

    container(row![avatar(message), content].spacing(14))
        .padding(14)
        .width(Length::Fill)
        .style(move |_theme| container::Style {
            background: tint.map(Into::into),
            border: Border {
                radius: 8.0.into(),
                ..Border::default()
            },
            ..container::Style::default()
        })
        .into()
}

pub fn welcome<'a>() -> Element<'a, Message> {
    let cards: Vec<Element<'a, Message>> = EXAMPLE_PROMPTS
        .iter()
        .map(|(title, prompt, mode)| {
            button(column![text(*title).size(15), text(*prompt).size(13)].spacing(4))
                .on_press(Message::PromptClicked(*prompt, *mode))
                .padding(14)
                .width(Length::Fill)
                .style(button::secondary)
                .into()
        })
        .collect();

    let mut grid = Column::new().spacing(10).max_width(820);
    let mut cards = cards.into_iter();
    while let Some(first) = cards.next() {
        let mut line = Row::new().spacing(10).push(first);
        if let Some(second) = cards.next() {
            line = line.push(second);
        }
        grid = grid.push(line);
    }

    container(
        column![
            text("How can I help you today?").size(26),
            grid,
            text("Powered by Google Gemini").size(12),
        ]
        .spacing(28)
        .align_x(alignment::Horizontal::Center),
    )
    .width(Length::Fill)
    .height(Length::Fill)
    .align_x(alignment::Horizontal::Center)
    .align_y(alignment::Vertical::Center)
    .padding(20)
    .into()
}

pub fn composer_view<'a>(
    editor: &'a text_editor::Content,
    composer: &Composer,
    busy: bool,
) -> Element<'a, Message> {
    let modes = MODE_OPTIONS.iter().fold(row![].spacing(6), |modes, option| {
        let selected = option.mode == Some(composer.mode());
        let on_press = match option.mode {
            Some(mode) if !busy => Some(Message::ModeSelected(mode)),
            _ => None,
        };
        let mode_button = button(text(option.label).size(13))
            .on_press_maybe(on_press)
            .padding([4, 12])
            .style(if selected { button::primary } else { button::secondary });

        match option.tooltip {
            Some(tip) => modes.push(tooltip(mode_button, text(tip).size(12), tooltip::Position::Top)),
            None => modes.push(mode_button),
        }
    });

    let mut input = text_editor(editor)
        .placeholder(composer.mode().placeholder())
        .height(Length::Shrink)
        .padding(12)
        .key_binding(|key_press| {
            let is_enter = matches!(
                key_press.key,
                iced::keyboard::Key::Named(iced::keyboard::key::Named::Enter)
            );
            if is_enter && enter_action(key_press.modifiers.shift()) == EnterAction::Submit {
                return Some(text_editor::Binding::Custom(Message::Submit));
            }
            text_editor::Binding::from_key_press(key_press)
        });
    if !busy {
        input = input.on_action(Message::EditorAction);
    }

    let send = button(text("Send").size(14))
        .on_press_maybe(composer.can_submit(busy).then_some(Message::Submit))
        .padding([10, 16])
        .style(button::primary);

    column![
        row![horizontal_space(), modes, horizontal_space()],
        row![input, send].spacing(8).align_y(alignment::Vertical::Bottom),
        row![
            horizontal_space(),
            text("AI can make mistakes. Consider checking important information.").size(11),
            horizontal_space(),
        ],
    ]
    .spacing(8)
    .max_width(900)
    .into()
}
