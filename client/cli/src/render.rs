//! Incremental terminal rendering of the live answer

/// Tracks what has already been written for the current answer
///
/// Push content grows by appending and pull content is cumulative, so the
/// common case is a strict extension of what is on screen. Anything else
/// (an authoritative final text, a notice) is redrawn on a fresh line.
#[derive(Debug, Default)]
pub struct LivePrinter {
    shown: String,
}

impl LivePrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to write so the terminal shows `content`
    pub fn delta(&mut self, content: &str) -> String {
        let out = match content.strip_prefix(self.shown.as_str()) {
            Some(suffix) => suffix.to_string(),
            None => format!("\n{content}"),
        };
        self.shown = content.to_string();
        out
    }
}

/// Parsed line of user input
#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    /// Send as a turn
    Message(&'a str),
    /// Start a new conversation
    Clear,
    /// Leave
    Quit,
    /// Nothing to do
    Empty,
}

pub fn parse_input(line: &str) -> Input<'_> {
    match line.trim() {
        "" => Input::Empty,
        "/clear" | "/new" => Input::Clear,
        "/quit" | "/exit" => Input::Quit,
        text => Input::Message(text),
    }
}
