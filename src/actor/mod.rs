//! Conversation participants.
//!
//! Every participant implements [`Actor`]. The human operator is driven by
//! [`user::UserActor`]; model backends are created on demand through the
//! [`ActorFactories`] registry, keyed by provider tag.

pub mod dummy;
pub mod openai;
pub mod user;

use crate::core::conversation::{ActorName, ActorOptions, ActorView, Conversation, ModelName, Utterance};
use crate::core::error::{ConversationError, ReferenceError};
use crate::core::logger::Logger;
use crate::core::reference::Reference;
use crate::core::stream::{Content, Stream, StreamKind};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait Actor: Send {
    fn name(&self) -> &ActorName;

    /// Produce the next contribution to the conversation.
    ///
    /// Backend actors return as soon as the response stream is set up; the
    /// stream itself is pulled later by whoever renders it.
    async fn react(
        &mut self,
        view: &ActorView,
        cnv: &Conversation,
    ) -> Result<Utterance, ConversationError>;

    /// Forget everything synchronized from the conversation so far.
    fn reset(&mut self);

    fn set_options(&mut self, opts: ActorOptions);

    fn get_options(&self) -> ActorOptions;

    /// Open a stream over the content behind `reference`.
    fn dereference(&self, reference: &Reference) -> Result<Stream, ConversationError> {
        dereference_local(self.name(), reference)
    }
}

/// Settings shared by every actor the session creates.
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub model_dir: Option<PathBuf>,
    pub image_dir: PathBuf,
    /// Endpoint of the OpenAI-compatible API.
    pub base_url: Option<String>,
    pub logger: Logger,
}

impl Default for ActorContext {
    fn default() -> Self {
        Self {
            model_dir: None,
            image_dir: PathBuf::from("."),
            base_url: None,
            logger: Logger::default(),
        }
    }
}

pub type ActorFactory =
    fn(ModelName, ActorOptions, &ActorContext) -> Result<Box<dyn Actor>, ConversationError>;

/// Provider tag to constructor.
#[derive(Clone)]
pub struct ActorFactories {
    factories: BTreeMap<String, ActorFactory>,
}

impl ActorFactories {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, provider: impl Into<String>, factory: ActorFactory) {
        self.factories.insert(provider.into(), factory);
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn create(
        &self,
        name: &ActorName,
        opts: ActorOptions,
        ctx: &ActorContext,
    ) -> Result<Box<dyn Actor>, ConversationError> {
        let model = match name {
            ActorName::Model(model) => model,
            ActorName::User => {
                return Err(ConversationError::UnknownProvider(name.to_string()));
            }
        };
        let factory = self
            .factories
            .get(&model.provider)
            .ok_or_else(|| ConversationError::UnknownProvider(model.provider.clone()))?;
        factory(model.clone(), opts, ctx)
    }
}

impl Default for ActorFactories {
    fn default() -> Self {
        let mut factories = Self::empty();
        factories.register(dummy::PROVIDER, dummy::create);
        factories.register(openai::PROVIDER, openai::create);
        factories
    }
}

/// Dereference local files. Anything else is left to the actor that issued it.
pub fn dereference_local(
    actor: &ActorName,
    reference: &Reference,
) -> Result<Stream, ConversationError> {
    match reference {
        Reference::Local { path, .. } => Ok(read_file_stream(path, reference.is_textual())),
        Reference::Actor { owner, .. } if owner != actor => Err(ConversationError::NoContext(
            format!("{reference} can only be dereferenced by {owner}"),
        )),
        other => Err(ConversationError::NotImplemented(format!(
            "dereferencing '{other}' by {actor}"
        ))),
    }
}

/// A lazy one-item stream over a file. The file is read on the first pull.
fn read_file_stream(path: &Path, textual: bool) -> Stream {
    let path = path.to_path_buf();
    let source = stream::once(async move {
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|err| ReferenceError::io(&path, err))?;
        Ok::<_, ConversationError>(if textual {
            Content::Text(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            Content::Binary(bytes)
        })
    })
    .boxed();
    let kind = if textual {
        StreamKind::Text
    } else {
        StreamKind::Binary
    };
    Stream::builder(source).kind(kind).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn unknown_providers_are_reported() {
        let factories = ActorFactories::default();
        let err = factories
            .create(
                &ActorName::model("gpt4all", "default"),
                ActorOptions::default(),
                &ActorContext::default(),
            )
            .err()
            .unwrap();
        assert!(matches!(err, ConversationError::UnknownProvider(p) if p == "gpt4all"));
    }

    #[test]
    fn default_registry_knows_the_builtin_providers() {
        let factories = ActorFactories::default();
        assert_eq!(factories.providers().collect::<Vec<_>>(), ["dummy", "openai"]);
        let actor = factories
            .create(
                &ActorName::model("dummy", "default"),
                ActorOptions::default(),
                &ActorContext::default(),
            )
            .unwrap();
        assert_eq!(actor.name(), &ActorName::model("dummy", "default"));
    }

    #[tokio::test]
    async fn local_references_are_read_lazily() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("note.txt");
        let me = ActorName::model("dummy", "default");
        let stream = dereference_local(&me, &Reference::local(&path)).unwrap();

        std::fs::write(&path, "written after dereferencing").unwrap();
        assert_eq!(
            stream.collect().await.unwrap(),
            vec![Content::text("written after dereferencing")]
        );
    }

    #[tokio::test]
    async fn binary_references_stay_binary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("img.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();
        let me = ActorName::model("dummy", "default");
        let stream = dereference_local(&me, &Reference::local(&path)).unwrap();
        assert!(stream.is_binary());
        assert_eq!(
            stream.collect().await.unwrap(),
            vec![Content::Binary(vec![0x89, b'P', b'N', b'G'])]
        );
    }

    #[test]
    fn foreign_actor_references_are_rejected() {
        let me = ActorName::model("dummy", "default");
        let r = Reference::Actor {
            owner: ActorName::model("openai", "gpt-4o"),
            id: "file-1".into(),
        };
        assert!(matches!(
            dereference_local(&me, &r),
            Err(ConversationError::NoContext(_))
        ));
    }
}
