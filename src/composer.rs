/// What a prompt is sent for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    #[default]
    Chat,
    Image,
    Search,
}

impl Mode {
    pub fn placeholder(self) -> &'static str {
        match self {
            Mode::Chat => "Message ai...",
            Mode::Image => "Describe an image to generate...",
            Mode::Search => "Search the web for...",
        }
    }
}

/// A button in the mode picker. Options without a mode are never selectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeOption {
    pub label: &'static str,
    pub mode: Option<Mode>,
    pub tooltip: Option<&'static str>,
}

pub const MODE_OPTIONS: [ModeOption; 4] = [
    ModeOption { label: "Chat", mode: Some(Mode::Chat), tooltip: None },
    ModeOption { label: "Image", mode: Some(Mode::Image), tooltip: None },
    ModeOption { label: "Search", mode: Some(Mode::Search), tooltip: None },
    ModeOption { label: "Video", mode: None, tooltip: Some("Coming soon!") },
];

/// What an Enter key press should do in the prompt editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnterAction {
    Submit,
    InsertNewline,
}

pub fn enter_action(shift: bool) -> EnterAction {
    if shift {
        EnterAction::InsertNewline
    } else {
        EnterAction::Submit
    }
}

/// Draft text plus the selected mode.
#[derive(Debug, Default)]
pub struct Composer {
    draft: String,
    mode: Mode,
}

impl Composer {
    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_draft(&mut self, draft: String) {
        self.draft = draft;
    }

    pub fn can_submit(&self, busy: bool) -> bool {
        !busy && !self.draft.trim().is_empty()
    }

    /// Takes the trimmed draft if it may be sent now, clearing the editor.
    pub fn submit(&mut self, busy: bool) -> Option<(String, Mode)> {
        if !self.can_submit(busy) {
            return None;
        }
        let prompt = self.draft.trim().to_string();
        self.draft.clear();
        Some((prompt, self.mode))
    }

    /// Returns whether the mode actually changed.
    pub fn set_mode(&mut self, mode: Mode, busy: bool) -> bool {
        if busy || self.mode == mode {
            return false;
        }
        self.mode = mode;
        true
    }
}
