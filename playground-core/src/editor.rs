//! Editor adapter
//!
//! Wraps the text buffer being edited. It surfaces the current document text,
//! carries externally driven decorations (error-line highlights), and emits a
//! change notification for every edit. Any edit clears the error-line
//! decorations, since they describe a document version that no longer exists.

use crate::highlight::keyword_marks;
use crate::observe::{Listeners, SubscriptionId};
use parking_lot::RwLock;
use playground_types::ErrorLocation;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// CSS-style class given to highlighted error lines
pub const ERROR_LINE_CLASS: &str = "errorline";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EditError {
    #[error("Edit range {from}..{to} is out of bounds for document of length {len}")]
    OutOfBounds { from: usize, to: usize, len: usize },

    #[error("Edit range {from}..{to} does not fall on character boundaries")]
    NotCharBoundary { from: usize, to: usize },
}

/// Span in the document (1-based lines and columns)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Span {
    pub fn new(start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Self {
        Self {
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecorationKind {
    /// Applies to a whole line
    Line,
    /// Applies to a byte range
    Mark,
}

/// A visual annotation driven by application state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoration {
    pub kind: DecorationKind,
    pub span: Span,
    /// Byte offsets into the document
    pub from: usize,
    pub to: usize,
    pub class: String,
}

/// Who changed the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Typing in the editor
    User,
    /// Replacement by the application, such as loading a sample
    Programmatic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChange {
    pub text: String,
    pub version: u64,
    pub origin: ChangeOrigin,
}

#[derive(Debug)]
struct EditorState {
    text: String,
    version: u64,
    error_lines: Vec<Decoration>,
}

#[derive(Debug)]
pub struct EditorAdapter {
    state: RwLock<EditorState>,
    listeners: Listeners<DocumentChange>,
}

impl EditorAdapter {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(EditorState {
                text: text.into(),
                version: 0,
                error_lines: Vec::new(),
            }),
            listeners: Listeners::new(),
        }
    }

    pub fn text(&self) -> String {
        self.state.read().text.clone()
    }

    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    /// Replace the whole document as a user edit
    pub fn edit(&self, text: impl Into<String>) -> u64 {
        self.set_text(text.into(), ChangeOrigin::User)
    }

    /// Replace the whole document programmatically
    pub fn load(&self, text: impl Into<String>) -> u64 {
        self.set_text(text.into(), ChangeOrigin::Programmatic)
    }

    /// Replace the byte range `from..to` with `insert`, as a user edit
    pub fn replace_range(&self, from: usize, to: usize, insert: &str) -> Result<u64, EditError> {
        let change = {
            let mut state = self.state.write();
            let len = state.text.len();
            if from > to || to > len {
                return Err(EditError::OutOfBounds { from, to, len });
            }
            if !state.text.is_char_boundary(from) || !state.text.is_char_boundary(to) {
                return Err(EditError::NotCharBoundary { from, to });
            }
            state.text.replace_range(from..to, insert);
            Self::bump(&mut state, ChangeOrigin::User)
        };
        let version = change.version;
        self.listeners.notify(&change);
        Ok(version)
    }

    fn set_text(&self, text: String, origin: ChangeOrigin) -> u64 {
        let change = {
            let mut state = self.state.write();
            state.text = text;
            Self::bump(&mut state, origin)
        };
        let version = change.version;
        self.listeners.notify(&change);
        version
    }

    fn bump(state: &mut EditorState, origin: ChangeOrigin) -> DocumentChange {
        state.version += 1;
        state.error_lines.clear();
        DocumentChange {
            text: state.text.clone(),
            version: state.version,
            origin,
        }
    }

    /// Highlight the lines named by `locations`.
    ///
    /// Replaces any previous error-line decorations. Locations past the end of
    /// the document are dropped. Returns the number of decorations applied.
    pub fn set_error_locations(&self, locations: &[ErrorLocation]) -> usize {
        let mut state = self.state.write();
        Self::decorate(&mut state, locations)
    }

    /// Apply `locations` only if the document is still at `version`
    pub fn set_error_locations_for(&self, version: u64, locations: &[ErrorLocation]) -> bool {
        let mut state = self.state.write();
        Self::decorate_version(&mut state, version, locations)
    }

    /// Version check and decoration under one guard, so an edit cannot land
    /// in between
    fn decorate_version(state: &mut EditorState, version: u64, locations: &[ErrorLocation]) -> bool {
        if state.version != version {
            return false;
        }
        Self::decorate(state, locations);
        true
    }

    fn decorate(state: &mut EditorState, locations: &[ErrorLocation]) -> usize {
        let decorations: Vec<Decoration> = locations
            .iter()
            .filter_map(|loc| {
                let decoration = line_decoration(&state.text, loc);
                if decoration.is_none() {
                    tracing::debug!(line = loc.line, "error location outside document, skipping");
                }
                decoration
            })
            .collect();
        let applied = decorations.len();
        state.error_lines = decorations;
        applied
    }

    pub fn clear_error_locations(&self) {
        self.state.write().error_lines.clear();
    }

    /// Current error-line decorations
    pub fn decorations(&self) -> Vec<Decoration> {
        self.state.read().error_lines.clone()
    }

    /// 1-based line numbers currently highlighted as errors
    pub fn error_lines(&self) -> Vec<u32> {
        self.state
            .read()
            .error_lines
            .iter()
            .map(|d| d.span.start_line)
            .collect()
    }

    /// Keyword highlighting for the current document
    pub fn keyword_decorations(&self) -> Vec<Decoration> {
        keyword_marks(&self.state.read().text)
    }

    pub fn line_count(&self) -> usize {
        line_count(&self.state.read().text)
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DocumentChange) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }
}

/// Number of lines in `text`; an empty document has one empty line
pub fn line_count(text: &str) -> usize {
    text.split('\n').count()
}

/// Byte offset where 1-based `line` starts
pub fn line_start(text: &str, line: u32) -> Option<usize> {
    if line == 0 {
        return None;
    }
    if line == 1 {
        return Some(0);
    }
    text.match_indices('\n')
        .nth(line as usize - 2)
        .map(|(idx, _)| idx + 1)
}

/// Translate a byte offset into a 1-based (line, column) pair
pub fn offset_to_position(text: &str, offset: usize) -> (u32, u32) {
    let before = &text[..offset.min(text.len())];
    let line = before.matches('\n').count() as u32 + 1;
    let line_begin = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let col = before[line_begin..].chars().count() as u32 + 1;
    (line, col)
}

fn line_decoration(text: &str, loc: &ErrorLocation) -> Option<Decoration> {
    let from = line_start(text, loc.line)?;
    let line_len = text[from..].find('\n').unwrap_or(text.len() - from);
    let end_col = text[from..from + line_len].chars().count() as u32 + 1;
    Some(Decoration {
        kind: DecorationKind::Line,
        span: Span::new(loc.line, loc.column.unwrap_or(1), loc.line, end_col),
        from,
        to: from,
        class: ERROR_LINE_CLASS.to_string(),
    })
}
