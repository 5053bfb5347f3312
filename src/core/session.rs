//! The orchestration loop.
//!
//! A [`Session`] owns the conversation log and every live actor. Each turn asks
//! the current actor to react, appends the result and applies its intention.
//! Recoverable failures end the turn and hand control back to the operator.

use crate::actor::user::UserActor;
use crate::actor::{Actor, ActorContext, ActorFactories};
use crate::core::conversation::{ActorName, ActorView, Conversation, Utterance};
use crate::core::error::ConversationError;
use crate::core::logger::Logger;
use crate::core::stream::contents_to_text;
use std::collections::HashMap;

/// Called when an utterance carries the debugger flag.
pub type DebugHook = Box<dyn FnMut(&Conversation, &ActorView) + Send>;

pub struct Session {
    conversation: Conversation,
    actors: HashMap<ActorName, Box<dyn Actor>>,
    factories: ActorFactories,
    context: ActorContext,
    current: ActorName,
    logger: Logger,
    debug_hook: DebugHook,
}

impl Session {
    pub fn new(user: UserActor, context: ActorContext) -> Self {
        let logger = context.logger.for_label("session");
        let mut actors: HashMap<ActorName, Box<dyn Actor>> = HashMap::new();
        actors.insert(ActorName::User, Box::new(user));
        Self {
            conversation: Conversation::new(),
            actors,
            factories: ActorFactories::default(),
            context,
            current: ActorName::User,
            logger,
            debug_hook: Box::new(dump_state),
        }
    }

    pub fn with_factories(mut self, factories: ActorFactories) -> Self {
        self.factories = factories;
        self
    }

    pub fn with_debug_hook(mut self, hook: DebugHook) -> Self {
        self.debug_hook = hook;
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn current(&self) -> &ActorName {
        &self.current
    }

    pub fn actor(&self, name: &ActorName) -> Option<&dyn Actor> {
        self.actors.get(name).map(|a| a.as_ref())
    }

    /// Options of every model actor alive in this session.
    pub fn view(&self) -> ActorView {
        ActorView {
            options: self
                .actors
                .iter()
                .filter(|(name, _)| **name != ActorName::User)
                .map(|(name, actor)| (name.clone(), actor.get_options()))
                .collect(),
        }
    }

    /// Run one turn. Returns `true` when the session should end.
    pub async fn turn(&mut self) -> Result<bool, ConversationError> {
        let view = self.view();
        let Some(actor) = self.actors.get_mut(&self.current) else {
            panic!("current actor {} is not registered", self.current);
        };
        let utterance = actor.react(&view, &self.conversation).await?;
        assert_eq!(
            utterance.actor_name, self.current,
            "utterance issuer does not match the current actor"
        );
        let intention = utterance.intention.clone();
        self.conversation.push(utterance);

        if intention.dbg_flag {
            let view = self.view();
            (self.debug_hook)(&self.conversation, &view);
        }
        // A failed creation only fails the turn when it was addressed to the
        // missing actor. Reset and exit still apply.
        let mut failed_next = None;
        for (name, opts) in intention.actor_updates {
            match self.actors.get_mut(&name) {
                Some(actor) => actor.set_options(opts),
                None => match self.factories.create(&name, opts, &self.context) {
                    Ok(actor) => {
                        self.logger.info(format!("Created actor '{name}'"));
                        self.actors.insert(name, actor);
                    }
                    Err(err) if intention.actor_next.as_ref() == Some(&name) => {
                        failed_next = Some(err);
                    }
                    Err(err) => self.logger.err(format!("Cannot create actor '{name}': {err}")),
                },
            }
        }
        if let Some(next) = intention.actor_next {
            if failed_next.is_none() {
                assert!(
                    self.actors.contains_key(&next),
                    "{next} is not among the registered actors"
                );
                self.current = next;
            }
        }
        if intention.reset_flag {
            self.conversation = Conversation::new();
            for actor in self.actors.values_mut() {
                actor.reset();
            }
        }
        match failed_next {
            Some(err) if !intention.exit_flag => Err(err),
            _ => Ok(intention.exit_flag),
        }
    }

    /// Run turns until an actor asks to exit. Every recoverable failure is
    /// reported and the turn goes back to the operator.
    pub async fn run(&mut self) {
        loop {
            match self.turn().await {
                Ok(true) => break,
                Ok(false) => {}
                Err(ConversationError::Interrupted) => {
                    self.logger.info("^C");
                    self.current = ActorName::User;
                }
                Err(err) => {
                    self.logger.err(&err);
                    self.current = ActorName::User;
                }
            }
        }
    }
}

fn describe(uid: usize, ut: &Utterance) -> String {
    let next = ut
        .intention
        .actor_next
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_string());
    let text = ut
        .contents
        .as_ref()
        .map(|s| contents_to_text(&s.snapshot()))
        .unwrap_or_default();
    let head: String = text.chars().take(60).collect();
    format!("[{uid}] {} -> {next}: {head:?}", ut.actor_name)
}

/// Default debugger hook: print the conversation and actor options to stderr.
pub fn dump_state(cnv: &Conversation, view: &ActorView) {
    eprintln!("--- conversation ({} utterances)", cnv.len());
    for (uid, ut) in cnv.utterances().iter().enumerate() {
        eprintln!("{}", describe(uid, ut));
    }
    let mut names: Vec<_> = view.options.keys().collect();
    names.sort();
    for name in names {
        eprintln!("--- {name}: {:?}", view.options[name]);
    }
}
