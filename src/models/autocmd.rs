//! Autocommand events and file patterns.

use std::borrow::Cow;
use std::fmt;

/// An autocommand event name such as `BufRead`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Event(Cow<'static, str>);

impl Event {
    pub const BUF_ENTER: Event = Event::from_static("BufEnter");
    pub const BUF_DELETE: Event = Event::from_static("BufDelete");
    pub const BUF_NEW_FILE: Event = Event::from_static("BufNewFile");
    pub const BUF_READ: Event = Event::from_static("BufRead");
    pub const BUF_UNLOAD: Event = Event::from_static("BufUnload");
    pub const BUF_WRITE_POST: Event = Event::from_static("BufWritePost");
    pub const BUF_WRITE_PRE: Event = Event::from_static("BufWritePre");
    pub const CURSOR_HOLD: Event = Event::from_static("CursorHold");
    pub const CURSOR_MOVED: Event = Event::from_static("CursorMoved");
    pub const FILE_TYPE: Event = Event::from_static("FileType");
    pub const INSERT_LEAVE: Event = Event::from_static("InsertLeave");
    pub const TEXT_CHANGED: Event = Event::from_static("TextChanged");
    pub const VIM_LEAVE_PRE: Event = Event::from_static("VimLeavePre");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Any other event, by name.
    pub fn named(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file pattern such as `*.go`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pattern(pub String);

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the `:autocmd` definition string.
///
/// Parts are joined with single spaces: the optional group, the sorted
/// comma-separated events, the sorted comma-separated patterns and an
/// optional `nested` marker.
pub fn definition(group: &str, events: &[Event], patterns: &[Pattern], nested: bool) -> String {
    let mut events: Vec<&str> = events.iter().map(Event::as_str).collect();
    events.sort_unstable();
    let mut patterns: Vec<&str> = patterns.iter().map(|p| p.0.as_str()).collect();
    patterns.sort_unstable();

    let mut parts = Vec::with_capacity(4);
    if !group.is_empty() {
        parts.push(group.to_string());
    }
    parts.push(events.join(","));
    if !patterns.is_empty() {
        parts.push(patterns.join(","));
    }
    if nested {
        parts.push("nested".to_string());
    }
    parts.join(" ")
}
