use crate::core::conversation::ActorName;
use std::fmt;
use std::path::{Path, PathBuf};

/// A pointer to content that has not been materialized yet.
///
/// References are plain values. Turning one into a content stream is up to
/// the actor that owns it, see [`crate::actor::Actor::dereference`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// Content fetched over the network.
    Remote { mimetype: String, url: String },
    /// Content stored on the local filesystem.
    Local { mimetype: String, path: PathBuf },
    /// A handle only meaningful to the actor that issued it.
    Actor { owner: ActorName, id: String },
}

impl Reference {
    pub fn remote(mimetype: impl Into<String>, url: impl Into<String>) -> Self {
        Reference::Remote {
            mimetype: mimetype.into(),
            url: url.into(),
        }
    }

    /// A local reference whose mimetype is guessed from the file extension.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Reference::Local {
            mimetype: guess_mimetype(&path).to_string(),
            path,
        }
    }

    pub fn mimetype(&self) -> Option<&str> {
        match self {
            Reference::Remote { mimetype, .. } | Reference::Local { mimetype, .. } => {
                Some(mimetype)
            }
            Reference::Actor { .. } => None,
        }
    }

    pub fn is_textual(&self) -> bool {
        self.mimetype().is_some_and(|m| m.starts_with("text/"))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Remote { mimetype, url } => write!(f, "{mimetype} {url}"),
            Reference::Local { mimetype, path } => write!(f, "{mimetype} {}", path.display()),
            Reference::Actor { owner, id } => write!(f, "{owner} {id}"),
        }
    }
}

pub fn guess_mimetype(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "md" => "text/markdown",
        "txt" | "" => "text/plain",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}
