//! Conversation data model: actor names and options, intentions, utterances,
//! and the helpers backend actors use to turn the shared log into a
//! provider message list.

use crate::api::ChatMessage;
use crate::core::stream::{contents_to_text, Stream};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;

/// A model-backed participant: provider tag, model identifier or path, and
/// an optional alias that lets one model appear as several actors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelName {
    pub provider: String,
    pub model: String,
    pub alias: Option<String>,
}

impl ModelName {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)?;
        if let Some(alias) = &self.alias {
            write!(f, "({alias})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActorName {
    /// The human operator driving the terminal.
    User,
    Model(ModelName),
}

impl ActorName {
    pub fn model(provider: impl Into<String>, model: impl Into<String>) -> Self {
        ActorName::Model(ModelName::new(provider, model))
    }

    pub fn as_model(&self) -> Option<&ModelName> {
        match self {
            ActorName::Model(name) => Some(name),
            ActorName::User => None,
        }
    }
}

impl fmt::Display for ActorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorName::User => f.write_str("user"),
            ActorName::Model(name) => name.fmt(f),
        }
    }
}

/// What kind of output an actor is asked to produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    #[default]
    Text,
    #[serde(rename = "img")]
    Image,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Modality::Text => "text",
            Modality::Image => "img",
        })
    }
}

/// Per-actor configuration. `None` means "use the provider default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActorOptions {
    pub verbosity: u8,
    pub apikey: Option<String>,
    pub temperature: Option<f32>,
    pub num_threads: Option<u32>,
    pub prompt: Option<String>,
    pub image_size: Option<String>,
    pub image_count: Option<u32>,
    pub modality: Modality,
    pub image_dir: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub seed: Option<u64>,
    pub replay: bool,
    pub proxy: Option<String>,
}

/// Serializable option state of every known actor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActorView {
    pub options: HashMap<ActorName, ActorOptions>,
}

impl ActorView {
    pub fn get(&self, name: &ActorName) -> Option<&ActorOptions> {
        self.options.get(name)
    }
}

/// Side effects requested alongside an utterance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Intention {
    pub actor_next: Option<ActorName>,
    /// Options to apply to existing actors, or to instantiate new ones with.
    pub actor_updates: HashMap<ActorName, ActorOptions>,
    pub exit_flag: bool,
    pub reset_flag: bool,
    pub dbg_flag: bool,
}

impl Intention {
    /// Hand the turn to `actor`.
    pub fn to(actor: ActorName) -> Self {
        Self {
            actor_next: Some(actor),
            ..Self::default()
        }
    }

    pub fn exit() -> Self {
        Self {
            exit_flag: true,
            ..Self::default()
        }
    }

    pub fn reset() -> Self {
        Self {
            reset_flag: true,
            ..Self::default()
        }
    }

    pub fn dbg() -> Self {
        Self {
            dbg_flag: true,
            ..Self::default()
        }
    }

    pub fn with_updates(mut self, updates: HashMap<ActorName, ActorOptions>) -> Self {
        self.actor_updates = updates;
        self
    }
}

/// One turn's contribution to the conversation.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub actor_name: ActorName,
    pub intention: Intention,
    pub contents: Option<Stream>,
}

impl Utterance {
    pub fn new(actor_name: ActorName, intention: Intention) -> Self {
        Self {
            actor_name,
            intention,
            contents: None,
        }
    }

    pub fn with_contents(mut self, contents: Stream) -> Self {
        self.contents = Some(contents);
        self
    }

    /// True when the utterance carries no contents at all.
    pub fn is_empty(&self) -> bool {
        self.contents.is_none()
    }

    /// Recorded contents flattened into text.
    pub fn text(&self) -> String {
        self.contents
            .as_ref()
            .map(|s| contents_to_text(&s.snapshot()))
            .unwrap_or_default()
    }
}

pub type UID = usize;

/// Append-only log of utterances.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    utterances: Vec<Utterance>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, utterance: Utterance) {
        self.utterances.push(utterance);
    }

    pub fn utterances(&self) -> &[Utterance] {
        &self.utterances
    }

    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    pub fn reset(&mut self) {
        self.utterances.clear();
    }
}

/// Index of the last utterance addressed to `referree`.
pub fn uts_lastref(uts: &[Utterance], referree: &ActorName) -> Option<UID> {
    uts.iter()
        .rposition(|ut| ut.intention.actor_next.as_ref() == Some(referree))
}

/// Index of the last non-empty utterance issued by `owner`.
pub fn uts_lastfull(uts: &[Utterance], owner: &ActorName) -> Option<UID> {
    uts.iter()
        .rposition(|ut| &ut.actor_name == owner && !ut.is_empty())
}

/// Like [`uts_lastref`], but when the addressed utterance is empty fall back
/// to the last non-empty utterance of the same issuer.
pub fn uts_lastfullref(uts: &[Utterance], referree: &ActorName) -> Option<UID> {
    let uid = uts_lastref(uts, referree)?;
    if uts[uid].is_empty() {
        uts_lastfull(uts, &uts[uid].actor_name)
    } else {
        Some(uid)
    }
}

/// Message list in the system/assistant/user shape of chat-completion APIs.
pub type Sau = Vec<ChatMessage>;

pub const SAU_CACHE_CAPACITY: usize = 5;

type SauCacheKey = (UID, Option<String>, Vec<(ActorName, String)>);

/// Bounded FIFO of already converted message-list prefixes.
#[derive(Debug, Clone)]
pub struct SauCache {
    capacity: usize,
    entries: VecDeque<(SauCacheKey, Sau)>,
}

impl SauCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
        }
    }

    fn get(&self, key: &SauCacheKey) -> Option<&Sau> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn insert(&mut self, key: SauCacheKey, value: Sau) {
        self.entries.retain(|(k, _)| k != &key);
        self.entries.push_back((key, value));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SauCache {
    fn default() -> Self {
        Self::new(SAU_CACHE_CAPACITY)
    }
}

/// Convert utterances into a provider message list. Issuers missing from
/// `names` get `default_name`; the system prompt always comes first.
pub fn uts_2sau(
    uts: &[Utterance],
    names: &HashMap<ActorName, String>,
    default_name: &str,
    system_prompt: Option<&str>,
    mut cache: Option<&mut SauCache>,
) -> Sau {
    let mut sorted_names: Vec<(ActorName, String)> =
        names.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    sorted_names.sort();
    let cache_key =
        |i: UID| -> SauCacheKey { (i, system_prompt.map(str::to_string), sorted_names.clone()) };

    let mut racc: Sau = Vec::new();
    for i in (0..uts.len()).rev() {
        let hit = cache.as_deref().and_then(|c| c.get(&cache_key(i))).cloned();
        if let Some(mut acc) = hit {
            acc.extend(racc.into_iter().rev());
            if let Some(cache) = cache.as_deref_mut() {
                cache.insert(cache_key(uts.len() - 1), acc.clone());
            }
            return acc;
        }
        let ut = &uts[i];
        let role = names
            .get(&ut.actor_name)
            .map(String::as_str)
            .unwrap_or(default_name);
        racc.push(ChatMessage::new(role, ut.text()));
    }
    racc.push(ChatMessage::new("system", system_prompt.unwrap_or_default()));
    let acc: Sau = racc.into_iter().rev().collect();
    if let Some(cache) = cache.as_deref_mut() {
        if !uts.is_empty() {
            cache.insert(cache_key(uts.len() - 1), acc.clone());
        }
    }
    acc
}

#[cfg(test)]
mod tests;
