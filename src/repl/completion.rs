//! Tab completion over the command keywords.
//!
//! Keywords form a static trie. File and buffer names are leaves that are
//! resolved against the live filesystem and buffer store on every call.

use crate::core::buffers::BufferStore;
use std::path::Path;

#[derive(Debug, Clone)]
enum Node {
    Keywords(Vec<(&'static str, Node)>),
    Files,
    Buffers,
    Free,
}

fn keywords(children: Vec<(&'static str, Node)>) -> Node {
    Node::Keywords(children)
}

fn reference() -> Node {
    keywords(vec![
        (" verbatim:", Node::Free),
        (" file:", Node::Files),
        (" bfile:", Node::Files),
        (" buffer:", Node::Buffers),
    ])
}

fn boolean() -> Node {
    keywords(vec![
        (" on", Node::Free),
        (" off", Node::Free),
        (" yes", Node::Free),
        (" no", Node::Free),
    ])
}

fn number() -> Node {
    keywords(vec![(" default", Node::Free)])
}

fn model_settings() -> Node {
    keywords(vec![
        (" apikey", reference()),
        (" temp", number()),
        (" nthreads", number()),
        (" imgsz", Node::Free),
        (" imgnum", number()),
        (" verbosity", number()),
        (
            " modality",
            keywords(vec![(" img", Node::Free), (" text", Node::Free)]),
        ),
        (" imgdir", Node::Files),
        (" modeldir", Node::Files),
        (" seed", number()),
        (" replay", boolean()),
        (" proxy", number()),
    ])
}

fn terminal_settings() -> Node {
    keywords(vec![
        (" rawbin", boolean()),
        (" prompt", Node::Free),
        (" width", number()),
        (" verbosity", number()),
        (" recording", reference()),
    ])
}

fn command_tree() -> Node {
    keywords(vec![
        ("/version", Node::Free),
        ("/dbg", Node::Free),
        ("/reset", Node::Free),
        ("/echo", Node::Free),
        ("/ask", Node::Free),
        ("/help", Node::Free),
        ("/exit", Node::Free),
        ("/pwd", Node::Free),
        ("/paste", boolean()),
        (
            "/model",
            keywords(vec![
                (" openai:", keywords(vec![("gpt-4o", Node::Free)])),
                (" dummy", Node::Free),
            ]),
        ),
        ("/read", keywords(vec![(" model prompt", Node::Free)])),
        (
            "/set",
            keywords(vec![
                (" model", model_settings()),
                (" terminal", terminal_settings()),
                (" term", terminal_settings()),
            ]),
        ),
        ("/cp", reference()),
        ("/append", reference()),
        ("/cat", reference()),
        ("/clear", keywords(vec![(" buffer:", Node::Buffers)])),
        ("/shell", reference()),
        ("/cd", reference()),
        ("/pipe", reference()),
    ])
}

/// Completion candidates for a partially typed line.
pub struct Completer {
    root: Node,
}

impl Default for Completer {
    fn default() -> Self {
        Self::new()
    }
}

impl Completer {
    pub fn new() -> Self {
        Self {
            root: command_tree(),
        }
    }

    /// Full-line candidates for `text`, sorted.
    pub fn complete(&self, text: &str, buffers: &BufferStore) -> Vec<String> {
        let mut node = &self.root;
        let mut consumed = 0;
        loop {
            let rest = &text[consumed..];
            match node {
                Node::Keywords(children) => {
                    let matched = children
                        .iter()
                        .filter(|(key, _)| rest.starts_with(key))
                        .max_by_key(|(key, _)| key.len());
                    if let Some((key, child)) = matched {
                        consumed += key.len();
                        node = child;
                        continue;
                    }
                    let mut acc: Vec<String> = children
                        .iter()
                        .filter(|(key, _)| key.starts_with(rest))
                        .map(|(key, _)| format!("{}{key}", &text[..consumed]))
                        .collect();
                    acc.sort();
                    acc.dedup();
                    return acc;
                }
                Node::Files => return complete_files(&text[..consumed], rest),
                Node::Buffers => {
                    return buffers
                        .names()
                        .filter(|name| name.starts_with(rest))
                        .map(|name| format!("{}{name}", &text[..consumed]))
                        .collect();
                }
                Node::Free => return Vec::new(),
            }
        }
    }
}

fn complete_files(prefix: &str, partial: &str) -> Vec<String> {
    let (dir, stem) = match partial.rfind('/') {
        Some(pos) => (&partial[..=pos], &partial[pos + 1..]),
        None => ("", partial),
    };
    let listing = if dir.is_empty() { Path::new(".") } else { Path::new(dir) };
    let Ok(entries) = std::fs::read_dir(listing) else {
        return Vec::new();
    };
    let mut acc: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(stem) {
                return None;
            }
            let slash = if entry.path().is_dir() { "/" } else { "" };
            Some(format!("{prefix}{dir}{name}{slash}"))
        })
        .collect();
    acc.sort();
    acc
}
