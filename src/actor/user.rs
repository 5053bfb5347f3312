//! The human operator as a conversation participant.
//!
//! On every turn the user actor first renders whatever other actors said since
//! its last turn, then reads operator lines and feeds them to the interpreter
//! until a command hands an utterance back.

use super::Actor;
use crate::core::buffers::OUT;
use crate::core::conversation::{ActorName, ActorOptions, ActorView, Conversation, Intention, Utterance};
use crate::core::error::ConversationError;
use crate::core::stream::{Content, Stream};
use crate::repl::{Pause, Repl, PASTE_OFF, PASTE_PROMPT};
use crate::utils::line_source::{LineSource, ReadLine, COMPLETION_KEY};
use crate::utils::text_wrapping::StreamWrapper;
use async_trait::async_trait;
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// Most history lines offered when no command completes a partial line.
const HISTORY_MATCHES: usize = 10;

pub struct UserActor {
    name: ActorName,
    repl: Repl,
    lines: Box<dyn LineSource>,
    /// Input read but not interpreted yet.
    pending: String,
    /// Exit once `pending` runs dry instead of prompting.
    batch_mode: bool,
    /// Number of conversation utterances already rendered.
    watermark: usize,
}

impl UserActor {
    pub fn new(repl: Repl, lines: Box<dyn LineSource>) -> Self {
        Self {
            name: ActorName::User,
            repl,
            lines,
            pending: String::new(),
            batch_mode: false,
            watermark: 0,
        }
    }

    /// Input interpreted before the first prompt.
    pub fn with_pending(mut self, input: impl Into<String>) -> Self {
        self.pending = input.into();
        self
    }

    pub fn batch_mode(mut self, on: bool) -> Self {
        self.batch_mode = on;
        self
    }

    pub fn repl(&self) -> &Repl {
        &self.repl
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn watermark(&self) -> usize {
        self.watermark
    }

    async fn read_line(&mut self, prompt: &str) -> Result<Option<String>, ConversationError> {
        loop {
            let line = match self.lines.read_line(prompt).await? {
                ReadLine::Line(line) => line,
                ReadLine::Complete(partial) if self.repl.in_paste_mode() => {
                    format!("{partial}{COMPLETION_KEY}")
                }
                ReadLine::Complete(partial) => {
                    let candidates = self.completions(&partial);
                    self.lines.offer_completions(&partial, &candidates);
                    continue;
                }
                ReadLine::Eof => return Ok(None),
                ReadLine::Interrupted => return Err(ConversationError::Interrupted),
            };
            if let Err(err) = self.repl.record(&line) {
                self.repl.logger().err(format!("Recording failed: {err}"));
            }
            return Ok(Some(line));
        }
    }

    /// Command completions for `partial`, or the latest history lines that
    /// extend it when no command does.
    pub fn completions(&self, partial: &str) -> Vec<String> {
        let found = self.repl.complete(partial);
        if !found.is_empty() || partial.is_empty() {
            return found;
        }
        let mut seen = HashSet::new();
        self.lines
            .history()
            .iter()
            .rev()
            .filter(|line| line.len() > partial.len() && line.starts_with(partial))
            .filter(|line| seen.insert(line.as_str()))
            .take(HISTORY_MATCHES)
            .cloned()
            .collect()
    }

    fn next_pending_line(&mut self) -> String {
        match self.pending.find('\n') {
            Some(pos) => {
                let line = self.pending[..pos].to_string();
                self.pending.drain(..=pos);
                line
            }
            None => std::mem::take(&mut self.pending),
        }
    }

    /// Feed raw lines to the interpreter until paste mode is switched off.
    async fn paste(&mut self) -> Result<(), ConversationError> {
        while self.repl.in_paste_mode() {
            let line = if !self.pending.is_empty() {
                self.next_pending_line()
            } else {
                match self.read_line(PASTE_PROMPT).await? {
                    Some(line) => line,
                    None => PASTE_OFF.to_string(),
                }
            };
            self.repl.paste_line(&line);
        }
        Ok(())
    }

    /// Render every utterance the operator has not seen yet.
    async fn sync(&mut self, cnv: &Conversation) -> Result<(), ConversationError> {
        assert!(
            self.watermark <= cnv.len(),
            "user watermark {} is past the end of the conversation ({})",
            self.watermark,
            cnv.len()
        );
        while self.watermark < cnv.len() {
            let ut = &cnv.utterances()[self.watermark];
            // Advance first so a failing stream is not rendered twice.
            self.watermark += 1;
            if ut.actor_name == self.name {
                continue;
            }
            if let Some(contents) = &ut.contents {
                self.render(contents).await?;
            }
        }
        Ok(())
    }

    async fn render(&mut self, stream: &Stream) -> Result<(), ConversationError> {
        let handle = stream.interrupt_handle();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.cancel();
            }
        });
        let result = self.drain(stream).await;
        watcher.abort();
        result
    }

    async fn drain(&mut self, stream: &Stream) -> Result<(), ConversationError> {
        let mut cursor = stream.gen()?;
        let mut wrapper = StreamWrapper::new(self.repl.terminal.width);
        let rawbin = self.repl.terminal.rawbin;
        let mut saved: Option<(File, PathBuf)> = None;
        let mut items = Vec::new();
        let mut last = None;

        while let Some(item) = cursor.next().await {
            let item = item?;
            match &item {
                Content::Text(text) => {
                    let shown = wrapper.push(text);
                    self.write(shown.as_bytes(), &mut last)?;
                }
                Content::Binary(bytes) if rawbin => self.write(bytes, &mut last)?,
                Content::Binary(bytes) => {
                    if saved.is_none() {
                        let path = stream
                            .suggested_fname()
                            .ok_or(ConversationError::NoFileName)?
                            .to_path_buf();
                        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                            std::fs::create_dir_all(dir)?;
                        }
                        saved = Some((File::create(&path)?, path));
                    }
                    if let Some((file, _)) = saved.as_mut() {
                        file.write_all(bytes)?;
                    }
                }
                Content::Ref(r) => {
                    let shown = format!("{}<{r}>", wrapper.finish());
                    self.write(shown.as_bytes(), &mut last)?;
                }
            }
            items.push(item);
        }
        let tail = wrapper.finish();
        self.write(tail.as_bytes(), &mut last)?;
        self.repl.buffers.set(OUT, items);

        if stream.was_interrupted() {
            let sep = if matches!(last, None | Some(b'\n')) { "" } else { "\n" };
            self.write(format!("{sep}<Interrupted>").as_bytes(), &mut last)?;
        }
        if let Some((mut file, path)) = saved {
            file.flush()?;
            self.repl
                .logger()
                .info(format!("Binary stream saved to '{}'", path.display()));
            let cmd = format!("/cp bfile:\"{}\" buffer:{OUT}\n", path.display());
            let sep = if matches!(last, None | Some(b'\n')) { "" } else { "\n" };
            self.write(format!("{sep}{cmd}").as_bytes(), &mut last)?;
            self.pending.insert_str(0, &cmd);
        }
        if !matches!(last, None | Some(b'\n')) {
            self.write(b"\n", &mut last)?;
        }
        Ok(())
    }

    fn write(&mut self, bytes: &[u8], last: &mut Option<u8>) -> Result<(), ConversationError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let out = self.repl.out();
        out.write_all(bytes)?;
        out.flush()?;
        *last = bytes.last().copied();
        Ok(())
    }
}

#[async_trait]
impl Actor for UserActor {
    fn name(&self) -> &ActorName {
        &self.name
    }

    async fn react(
        &mut self,
        view: &ActorView,
        cnv: &Conversation,
    ) -> Result<Utterance, ConversationError> {
        self.repl.adopt_view(view);
        self.sync(cnv).await?;
        loop {
            if self.pending.is_empty() {
                if self.batch_mode {
                    return Ok(Utterance::new(self.name.clone(), Intention::exit()));
                }
                let prompt = self.repl.terminal.prompt.clone();
                match self.read_line(&prompt).await? {
                    Some(line) => self.pending = format!("{line}\n"),
                    None => {
                        self.write(b"\n", &mut None)?;
                        return Ok(Utterance::new(self.name.clone(), Intention::exit()));
                    }
                }
            }

            let chunk = std::mem::take(&mut self.pending);
            let res = self.repl.interpret(&chunk).await;
            self.pending = chunk[res.consumed..].to_string();
            match res.pause {
                Some(Pause::Utterance(ut)) => return Ok(ut),
                Some(Pause::Paste) => self.paste().await?,
                None => {}
            }
        }
    }

    fn reset(&mut self) {
        self.watermark = 0;
    }

    fn set_options(&mut self, _opts: ActorOptions) {}

    fn get_options(&self) -> ActorOptions {
        ActorOptions::default()
    }
}
