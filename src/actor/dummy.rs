//! An offline actor that always answers with the same text.

use super::{Actor, ActorContext};
use crate::core::conversation::{
    uts_2sau, ActorName, ActorOptions, ActorView, Conversation, Intention, ModelName, Sau,
    Utterance,
};
use crate::core::error::ConversationError;
use crate::core::logger::Logger;
use crate::core::stream::{Content, Stream, StreamKind};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;

pub const PROVIDER: &str = "dummy";
pub const DEFAULT_REPLY: &str = "dummy";

pub fn create(
    name: ModelName,
    opts: ActorOptions,
    ctx: &ActorContext,
) -> Result<Box<dyn Actor>, ConversationError> {
    Ok(Box::new(DummyActor::new(name, opts, &ctx.logger)))
}

pub struct DummyActor {
    name: ActorName,
    opts: ActorOptions,
    logger: Logger,
    watermark: usize,
    /// Everything seen so far, in chat-completion shape.
    history: Sau,
    last_reply: Option<Stream>,
}

impl DummyActor {
    pub fn new(name: ModelName, opts: ActorOptions, logger: &Logger) -> Self {
        let name = ActorName::Model(name);
        let mut logger = logger.for_label(name.to_string());
        logger.set_local_verbosity(opts.verbosity);
        logger.info(format!(
            "Dummy actor '{name}' apikey '{}'",
            opts.apikey.as_deref().unwrap_or("")
        ));
        Self {
            name,
            opts,
            logger,
            watermark: 0,
            history: Vec::new(),
            last_reply: None,
        }
    }

    pub fn history(&self) -> &Sau {
        &self.history
    }

    async fn sync(&mut self, cnv: &Conversation) -> Result<(), ConversationError> {
        assert!(
            self.watermark <= cnv.len(),
            "{} watermark {} is past the end of the conversation",
            self.name,
            self.watermark
        );
        let fresh = &cnv.utterances()[self.watermark..];
        for ut in fresh {
            if let Some(contents) = &ut.contents {
                contents.collect().await?;
            }
        }
        let names = HashMap::from([
            (self.name.clone(), "assistant".to_string()),
            (ActorName::User, "user".to_string()),
        ]);
        let messages = uts_2sau(fresh, &names, "user", self.opts.prompt.as_deref(), None);
        if self.history.is_empty() {
            self.history = messages;
        } else {
            self.history.extend(messages.into_iter().skip(1));
        }
        self.watermark = cnv.len();
        Ok(())
    }

    fn reply(&self) -> Stream {
        if self.opts.replay {
            if let Some(last) = &self.last_reply {
                self.logger.info("Replaying the last reply");
                return Stream::from_items(last.snapshot());
            }
        }
        let text = self.opts.prompt.as_deref().unwrap_or(DEFAULT_REPLY);
        let chunks: Vec<_> = text
            .split_inclusive(' ')
            .map(|word| Ok::<_, ConversationError>(Content::text(word)))
            .collect();
        Stream::builder(stream::iter(chunks).boxed())
            .kind(StreamKind::Text)
            .owner(self.name.clone())
            .build()
    }
}

#[async_trait]
impl Actor for DummyActor {
    fn name(&self) -> &ActorName {
        &self.name
    }

    async fn react(
        &mut self,
        _view: &ActorView,
        cnv: &Conversation,
    ) -> Result<Utterance, ConversationError> {
        self.sync(cnv).await?;
        let contents = self.reply();
        self.last_reply = Some(contents.clone());
        Ok(Utterance::new(self.name.clone(), Intention::to(ActorName::User)).with_contents(contents))
    }

    fn reset(&mut self) {
        self.watermark = 0;
        self.history.clear();
        self.last_reply = None;
    }

    fn set_options(&mut self, opts: ActorOptions) {
        self.logger.set_local_verbosity(opts.verbosity);
        self.opts = opts;
    }

    fn get_options(&self) -> ActorOptions {
        self.opts.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ChatMessage;

    fn actor(opts: ActorOptions) -> DummyActor {
        DummyActor::new(ModelName::new(PROVIDER, "default"), opts, &Logger::default())
    }

    fn ask(text: &str) -> Utterance {
        Utterance::new(ActorName::User, Intention::to(ActorName::model(PROVIDER, "default")))
            .with_contents(Stream::text(text))
    }

    async fn react(actor: &mut DummyActor, cnv: &mut Conversation) -> String {
        let ut = actor.react(&ActorView::default(), cnv).await.unwrap();
        let text = ut.contents.as_ref().unwrap().collect().await.unwrap();
        cnv.push(ut);
        crate::core::stream::contents_to_text(&text)
    }

    #[tokio::test]
    async fn answers_with_the_default_text() {
        let mut actor = actor(ActorOptions::default());
        let mut cnv = Conversation::new();
        cnv.push(ask("hello"));
        assert_eq!(react(&mut actor, &mut cnv).await, "dummy");
    }

    #[tokio::test]
    async fn prompt_option_replaces_the_answer() {
        let mut actor = actor(ActorOptions {
            prompt: Some("two words".into()),
            ..ActorOptions::default()
        });
        let ut = actor
            .react(&ActorView::default(), &Conversation::new())
            .await
            .unwrap();
        assert_eq!(
            ut.contents.unwrap().collect().await.unwrap(),
            vec![Content::text("two "), Content::text("words")]
        );
    }

    #[tokio::test]
    async fn history_grows_incrementally() {
        let mut actor = actor(ActorOptions::default());
        let mut cnv = Conversation::new();
        cnv.push(ask("one"));
        react(&mut actor, &mut cnv).await;
        cnv.push(ask("two"));
        react(&mut actor, &mut cnv).await;
        assert_eq!(
            actor.history(),
            &vec![
                ChatMessage::new("system", ""),
                ChatMessage::new("user", "one"),
                ChatMessage::new("assistant", "dummy"),
                ChatMessage::new("user", "two"),
            ]
        );
    }

    #[tokio::test]
    async fn reset_forgets_the_history() {
        let mut actor = actor(ActorOptions::default());
        let mut cnv = Conversation::new();
        cnv.push(ask("before reset"));
        react(&mut actor, &mut cnv).await;

        actor.reset();
        let mut cnv = Conversation::new();
        cnv.push(ask("after reset"));
        react(&mut actor, &mut cnv).await;
        assert_eq!(
            actor.history(),
            &vec![
                ChatMessage::new("system", ""),
                ChatMessage::new("user", "after reset"),
            ]
        );
    }

    #[tokio::test]
    async fn replay_repeats_the_previous_reply() {
        let mut actor = actor(ActorOptions {
            prompt: Some("first".into()),
            ..ActorOptions::default()
        });
        let mut cnv = Conversation::new();
        react(&mut actor, &mut cnv).await;
        actor.set_options(ActorOptions {
            prompt: Some("second".into()),
            replay: true,
            ..ActorOptions::default()
        });
        assert_eq!(react(&mut actor, &mut cnv).await, "first");
    }
}
