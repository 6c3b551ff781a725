use iced::widget::{button, column, container, horizontal_space, row, scrollable, text, tooltip};
use iced::{Element, Length};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::history::History;
use crate::Message;

pub const SIDEBAR_WIDTH: f32 = 260.0;
const TITLE_COLUMNS: usize = 26;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub created_at: i64,
}

/// Sessions, newest first.
pub fn summarize(history: &History) -> Vec<SessionSummary> {
    let mut sessions: Vec<SessionSummary> = history
        .sessions
        .iter()
        .map(|(id, session)| SessionSummary {
            id: id.clone(),
            title: session.metadata.title.clone(),
            created_at: session.metadata.created_at,
        })
        .collect();
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    sessions
}

/// Shortens a title to fit `columns` terminal-style cells, with an ellipsis.
pub fn truncate_title(title: &str, columns: usize) -> String {
    let title = title.lines().next().unwrap_or_default();
    if title.width() <= columns {
        return title.to_string();
    }

    let mut out = String::new();
    let mut used = 0;
    for ch in title.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w + 1 > columns {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    out
}

pub fn view<'a>(sessions: &[SessionSummary], active: Option<&str>) -> Element<'a, Message> {
    let new_chat = button(text("+  New Chat").size(14))
        .on_press(Message::NewChat)
        .width(Length::Fill)
        .padding(10)
        .style(button::secondary);

    let entries = sessions.iter().fold(column![].spacing(4), |list, session| {
        let is_active = active == Some(session.id.as_str());
        let select = button(text(truncate_title(&session.title, TITLE_COLUMNS)).size(14))
            .on_press(Message::SelectChat(session.id.clone()))
            .width(Length::Fill)
            .padding([6, 10])
            .style(if is_active { button::primary } else { button::text });

        let delete = tooltip(
            button(text("✕").size(12))
                .on_press(Message::DeleteChat(session.id.clone()))
                .padding([6, 8])
                .style(button::text),
            text("Delete chat").size(12),
            tooltip::Position::Left,
        );

        list.push(row![select, delete].spacing(2))
    });

    let footer = row![horizontal_space(), text("Gemini Chat").size(12), horizontal_space()];

    container(
        column![
            new_chat,
            scrollable(entries).height(Length::Fill),
            footer,
        ]
        .spacing(10)
        .padding(10),
    )
    .width(Length::Fixed(SIDEBAR_WIDTH))
    .height(Length::Fill)
    .style(container::rounded_box)
    .into()
}
