//! Cancellable, single-consumption content streams.
//!
//! A [`Stream`] wraps a lazy source of [`Content`] items, usually fed by a
//! network task. Items are recorded as they are pulled, so a second pass over
//! a finished stream replays the recording instead of touching the source
//! again. Interrupting a stream cancels its token; the cursor notices at the
//! next pull and ends the sequence without an error.

use crate::core::conversation::ActorName;
use crate::core::error::ConversationError;
use crate::core::reference::Reference;
use futures_util::stream::{BoxStream, StreamExt};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// One item of a content stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Binary(Vec<u8>),
    Ref(Reference),
}

impl Content {
    pub fn text(s: impl Into<String>) -> Self {
        Content::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Content::Text(value.to_string())
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Content::Text(value)
    }
}

impl From<Vec<u8>> for Content {
    fn from(value: Vec<u8>) -> Self {
        Content::Binary(value)
    }
}

impl From<Reference> for Content {
    fn from(value: Reference) -> Self {
        Content::Ref(value)
    }
}

/// Flatten content items into one string. Binary chunks become a placeholder.
pub fn contents_to_text(items: &[Content]) -> String {
    let mut acc = String::new();
    for item in items {
        match item {
            Content::Text(s) => acc.push_str(s),
            Content::Binary(_) => acc.push_str("<binary chunk>"),
            Content::Ref(r) => acc.push_str(&format!("<{r}>")),
        }
    }
    acc
}

/// Whether a stream carries text or raw bytes. Fixed by the first text or
/// binary item and never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Text,
    Binary,
}

pub type ContentSource = BoxStream<'static, Result<Content, ConversationError>>;

#[derive(Default)]
struct StreamState {
    recording: Option<Vec<Content>>,
    kind: Option<StreamKind>,
    finished: bool,
}

struct StreamShared {
    source: tokio::sync::Mutex<Option<ContentSource>>,
    state: Mutex<StreamState>,
    token: CancellationToken,
    owner: Option<ActorName>,
    suggested_fname: Option<PathBuf>,
}

/// Shared handle to a content stream. Clones observe the same source,
/// recording and cancellation flag.
#[derive(Clone)]
pub struct Stream {
    shared: Arc<StreamShared>,
}

/// Construction options for a [`Stream`].
pub struct StreamBuilder {
    source: ContentSource,
    token: CancellationToken,
    kind: Option<StreamKind>,
    owner: Option<ActorName>,
    suggested_fname: Option<PathBuf>,
    record: bool,
}

impl StreamBuilder {
    /// Share a cancellation token with the producer feeding the source.
    pub fn token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Declare the stream kind before any item is produced.
    pub fn kind(mut self, kind: StreamKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Non-owning back-reference to the actor that produced the stream.
    pub fn owner(mut self, owner: ActorName) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn suggested_fname(mut self, path: impl Into<PathBuf>) -> Self {
        self.suggested_fname = Some(path.into());
        self
    }

    /// Disable the replay recording. A second pass over a finished stream
    /// then fails with [`ConversationError::StreamConsumed`].
    pub fn unrecorded(mut self) -> Self {
        self.record = false;
        self
    }

    pub fn build(self) -> Stream {
        Stream {
            shared: Arc::new(StreamShared {
                source: tokio::sync::Mutex::new(Some(self.source)),
                state: Mutex::new(StreamState {
                    recording: self.record.then(Vec::new),
                    kind: self.kind,
                    finished: false,
                }),
                token: self.token,
                owner: self.owner,
                suggested_fname: self.suggested_fname,
            }),
        }
    }
}

impl Stream {
    pub fn builder(source: ContentSource) -> StreamBuilder {
        StreamBuilder {
            source,
            token: CancellationToken::new(),
            kind: None,
            owner: None,
            suggested_fname: None,
            record: true,
        }
    }

    pub fn new(source: ContentSource) -> Self {
        Self::builder(source).build()
    }

    /// A finished stream over items that are already known. The items are
    /// its recording, so they are visible to [`Stream::snapshot`] at once.
    /// Text and binary items must not be mixed.
    pub fn from_items(items: Vec<Content>) -> Self {
        let kind = items.iter().find_map(|item| match item {
            Content::Text(_) => Some(StreamKind::Text),
            Content::Binary(_) => Some(StreamKind::Binary),
            Content::Ref(_) => None,
        });
        Stream {
            shared: Arc::new(StreamShared {
                source: tokio::sync::Mutex::new(None),
                state: Mutex::new(StreamState {
                    recording: Some(items),
                    kind,
                    finished: true,
                }),
                token: CancellationToken::new(),
                owner: None,
                suggested_fname: None,
            }),
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::from_items(vec![Content::Text(s.into())])
    }

    fn state(&self) -> MutexGuard<'_, StreamState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a pass over the stream. Items recorded so far are replayed
    /// first, then the source is pulled for the rest.
    pub fn gen(&self) -> Result<StreamCursor, ConversationError> {
        let state = self.state();
        if state.finished && state.recording.is_none() {
            return Err(ConversationError::StreamConsumed);
        }
        drop(state);
        Ok(StreamCursor {
            stream: self.clone(),
            pos: 0,
        })
    }

    /// Request early termination. Safe to call at any time, including from a
    /// signal watcher and on streams that already finished.
    pub fn interrupt(&self) {
        self.shared.token.cancel();
    }

    /// Token that interrupts this stream when cancelled.
    pub fn interrupt_handle(&self) -> CancellationToken {
        self.shared.token.clone()
    }

    pub fn was_interrupted(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.state().finished
    }

    pub fn kind(&self) -> Option<StreamKind> {
        self.state().kind
    }

    pub fn is_binary(&self) -> bool {
        self.kind() == Some(StreamKind::Binary)
    }

    pub fn owner(&self) -> Option<&ActorName> {
        self.shared.owner.as_ref()
    }

    pub fn suggested_fname(&self) -> Option<&Path> {
        self.shared.suggested_fname.as_deref()
    }

    /// Items recorded so far. Never touches the source.
    pub fn snapshot(&self) -> Vec<Content> {
        self.state().recording.clone().unwrap_or_default()
    }

    /// Drain the stream and return everything it produced.
    pub async fn collect(&self) -> Result<Vec<Content>, ConversationError> {
        let mut cursor = self.gen()?;
        let mut items = Vec::new();
        while let Some(item) = cursor.next().await {
            items.push(item?);
        }
        Ok(items)
    }

    fn recorded_at(&self, pos: usize) -> Option<Content> {
        self.state()
            .recording
            .as_ref()
            .and_then(|rec| rec.get(pos).cloned())
    }

    fn finish(&self) {
        self.state().finished = true;
    }

    fn observe(&self, item: &Content) -> Result<(), ConversationError> {
        let observed = match item {
            Content::Text(_) => StreamKind::Text,
            Content::Binary(_) => StreamKind::Binary,
            Content::Ref(_) => return Ok(()),
        };
        let mut state = self.state();
        match state.kind {
            Some(kind) if kind != observed => Err(ConversationError::MixedContent),
            _ => {
                state.kind = Some(observed);
                Ok(())
            }
        }
    }

    async fn pull(&self, pos: usize) -> Option<Result<Content, ConversationError>> {
        let mut source = self.shared.source.lock().await;

        // Another pass may have pulled past `pos` while we waited for the lock.
        if let Some(item) = self.recorded_at(pos) {
            return Some(Ok(item));
        }
        if self.is_finished() {
            return None;
        }
        if self.shared.token.is_cancelled() {
            *source = None;
            self.finish();
            return None;
        }

        let token = self.shared.token.clone();
        let next = match source.as_mut() {
            Some(src) => tokio::select! {
                biased;
                _ = token.cancelled() => None,
                item = src.next() => item,
            },
            None => None,
        };

        match next {
            None => {
                *source = None;
                self.finish();
                None
            }
            Some(Err(err)) => {
                *source = None;
                self.finish();
                Some(Err(err))
            }
            Some(Ok(item)) => {
                if let Err(err) = self.observe(&item) {
                    *source = None;
                    self.finish();
                    return Some(Err(err));
                }
                if let Some(rec) = self.state().recording.as_mut() {
                    rec.push(item.clone());
                }
                Some(Ok(item))
            }
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Stream")
            .field("owner", &self.shared.owner)
            .field("kind", &state.kind)
            .field("finished", &state.finished)
            .field("recorded", &state.recording.as_ref().map(Vec::len))
            .field("interrupted", &self.shared.token.is_cancelled())
            .finish()
    }
}

/// One pass over a [`Stream`].
pub struct StreamCursor {
    stream: Stream,
    pos: usize,
}

impl StreamCursor {
    pub async fn next(&mut self) -> Option<Result<Content, ConversationError>> {
        if let Some(item) = self.stream.recorded_at(self.pos) {
            self.pos += 1;
            return Some(Ok(item));
        }
        let item = self.stream.pull(self.pos).await;
        if matches!(item, Some(Ok(_))) && self.stream.state().recording.is_some() {
            self.pos += 1;
        }
        item
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }
}
