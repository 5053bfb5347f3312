//! The command interpreter.
//!
//! [`Repl::interpret`] runs the commands of one input chunk in order. It stops
//! early when a command produces an utterance for the session loop or when
//! paste mode needs lines fed from outside, and reports how much of the chunk
//! it consumed so the caller can resume with the rest.

pub mod completion;
pub mod grammar;

use crate::core::buffers::{BufferStore, Ref, RefSchema, IN, OUT};
use crate::core::conversation::{ActorName, ActorOptions, ActorView, Intention, Utterance};
use crate::core::error::{ConversationError, ReferenceError, ReplError};
use crate::core::logger::{Logger, DEFAULT_VERBOSITY};
use crate::core::stream::{contents_to_text, Content, Stream};
use crate::utils::paths::expand_tilde;
use completion::Completer;
use grammar::{Command, Item, ModelSetting, Parser, RefArg, TerminalSetting, HELP};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

pub const DEFAULT_PROMPT: &str = ">>> ";
pub const PASTE_PROMPT: &str = "P> ";
pub const PASTE_OFF: &str = "/paste off";

/// Display settings owned by the terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalSettings {
    /// Write binary streams to stdout instead of saving them to files.
    pub rawbin: bool,
    pub prompt: String,
    pub width: Option<usize>,
    pub verbosity: u8,
    /// Where operator lines are mirrored, if anywhere.
    pub recording: Option<Ref>,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            rawbin: false,
            prompt: DEFAULT_PROMPT.to_string(),
            width: None,
            verbosity: DEFAULT_VERBOSITY,
            recording: None,
        }
    }
}

/// Why interpretation stopped before the end of the chunk.
#[derive(Debug)]
pub enum Pause {
    /// An utterance is ready for the session loop.
    Utterance(Utterance),
    /// Paste mode was switched on; raw lines must be fed with [`Repl::paste_line`].
    Paste,
}

/// Result of running one parsed item.
#[derive(Debug)]
pub enum Step {
    Continue,
    Paused(Pause),
    Error(ReplError),
}

/// Result of interpreting a chunk.
#[derive(Debug)]
pub struct Interpretation {
    /// Byte offset of the first character not consumed.
    pub consumed: usize,
    pub pause: Option<Pause>,
    /// Failed commands, already logged. None of them stopped interpretation.
    pub errors: Vec<ReplError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Echo {
    Off,
    Start,
    Running,
}

pub struct Repl {
    name: ActorName,
    pub buffers: BufferStore,
    view: ActorView,
    /// Actors whose options changed since the last pause.
    dirty: HashSet<ActorName>,
    /// Actors shipped in a pause that the session has not confirmed yet.
    unconfirmed: HashSet<ActorName>,
    actor_next: Option<ActorName>,
    pub terminal: TerminalSettings,
    paste_mode: bool,
    echo: Echo,
    out: Box<dyn Write + Send>,
    logger: Logger,
    version: String,
    completer: Completer,
}

impl Repl {
    pub fn new(name: ActorName, out: Box<dyn Write + Send>, logger: Logger) -> Self {
        let terminal = TerminalSettings {
            verbosity: logger.verbosity(),
            ..TerminalSettings::default()
        };
        Self {
            name,
            buffers: BufferStore::new(),
            view: ActorView::default(),
            dirty: HashSet::new(),
            unconfirmed: HashSet::new(),
            actor_next: None,
            terminal,
            paste_mode: false,
            echo: Echo::Off,
            out,
            logger,
            version: env!("CARGO_PKG_VERSION").to_string(),
            completer: Completer::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn actor_next(&self) -> Option<&ActorName> {
        self.actor_next.as_ref()
    }

    pub fn view(&self) -> &ActorView {
        &self.view
    }

    pub fn in_paste_mode(&self) -> bool {
        self.paste_mode
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn out(&mut self) -> &mut Box<dyn Write + Send> {
        &mut self.out
    }

    /// Candidate completions of a partially typed line, for line editors.
    pub fn complete(&self, text: &str) -> Vec<String> {
        self.completer.complete(text, &self.buffers)
    }

    /// Pick up options of actors the session knows but this interpreter has
    /// not seen yet. Options edited here are never overwritten. Actors the
    /// session failed to create are forgotten.
    pub fn adopt_view(&mut self, view: &ActorView) {
        for name in self.unconfirmed.drain() {
            if view.options.contains_key(&name) {
                continue;
            }
            self.view.options.remove(&name);
            self.dirty.remove(&name);
            if self.actor_next.as_ref() == Some(&name) {
                self.actor_next = None;
            }
            self.logger
                .warn(format!("Actor '{name}' was not created, use /model to pick another"));
        }
        for (name, opts) in &view.options {
            self.view
                .options
                .entry(name.clone())
                .or_insert_with(|| opts.clone());
        }
    }

    /// Clear the message buffers and leave echo mode.
    pub fn reset(&mut self) {
        if !self.buffers.get(IN).is_empty() {
            self.logger.info("Message buffer is now empty");
        }
        self.echo = Echo::Off;
        self.buffers.clear(IN);
        self.buffers.clear(OUT);
    }

    /// Feed one raw line in paste mode. Returns `false` once the sentinel
    /// line ended paste mode.
    pub fn paste_line(&mut self, line: &str) -> bool {
        if line.trim() == PASTE_OFF {
            self.paste_mode = false;
            self.logger.info("Exiting paste mode.");
            return false;
        }
        self.buffers.push_text(IN, line);
        self.buffers.push_text(IN, "\n");
        true
    }

    /// Mirror an operator line into the recording target, if one is set.
    pub fn record(&mut self, line: &str) -> Result<(), ReferenceError> {
        let Some(target) = self.terminal.recording.clone() else {
            return Ok(());
        };
        self.buffers
            .ref_write(&target, vec![Content::text(format!("{line}\n"))], true)
    }

    /// Run the commands in `chunk` until it is exhausted or a command pauses.
    pub async fn interpret(&mut self, chunk: &str) -> Interpretation {
        let mut parser = Parser::new(chunk);
        let mut errors = Vec::new();
        let mut pause = None;
        while let Some(parsed) = parser.next_item() {
            let step = match parsed {
                Ok(spanned) => self.step(spanned.item).await,
                Err(err) => Step::Error(err.into()),
            };
            match step {
                Step::Continue => {}
                Step::Error(err) => {
                    self.logger.err(&err);
                    errors.push(err);
                }
                Step::Paused(p) => {
                    pause = Some(p);
                    break;
                }
            }
        }
        self.finish_echo();
        Interpretation {
            consumed: parser.offset(),
            pause,
            errors,
        }
    }

    async fn step(&mut self, item: Item) -> Step {
        match item {
            Item::Text(text) => self.text(&text),
            Item::Escape(ch) => {
                if self.echo == Echo::Off {
                    self.buffers.push_text(IN, ch.encode_utf8(&mut [0; 4]));
                } else {
                    self.echo = Echo::Running;
                    self.print(&ch.to_string());
                }
                Step::Continue
            }
            Item::Command(cmd) => {
                self.finish_echo();
                match self.command(cmd).await {
                    Ok(Some(pause)) => Step::Paused(pause),
                    Ok(None) => Step::Continue,
                    Err(err) => Step::Error(err),
                }
            }
        }
    }

    fn text(&mut self, text: &str) -> Step {
        match self.echo {
            Echo::Off => self.buffers.push_text(IN, text),
            Echo::Start | Echo::Running => {
                let shown = if self.echo == Echo::Start {
                    text.trim_start_matches([' ', '\t'])
                } else {
                    text
                };
                self.echo = Echo::Running;
                self.print(shown);
                if text.ends_with('\n') {
                    self.echo = Echo::Off;
                }
            }
        }
        Step::Continue
    }

    fn finish_echo(&mut self) {
        if self.echo == Echo::Running {
            self.print("\n");
        }
        self.echo = Echo::Off;
    }

    fn print(&mut self, text: &str) {
        if let Err(err) = self.out.write_all(text.as_bytes()).and_then(|_| self.out.flush()) {
            self.logger.warn(format!("Failed to write output: {err}"));
        }
    }

    fn println(&mut self, text: &str) {
        self.print(text);
        if !text.ends_with('\n') {
            self.print("\n");
        }
    }

    /// Resolve a reference argument, filling in the command's default schema.
    pub fn resolve(&self, arg: &RefArg, default: RefSchema) -> Result<Ref, ReplError> {
        match arg {
            RefArg::Plain { schema, value } => {
                Ok(Ref::new(schema.unwrap_or(default), value.clone()))
            }
            RefArg::FileOf(inner) => {
                let inner = self.resolve(inner, default)?;
                let path = self.buffers.ref_read_text(&inner)?;
                Ok(Ref::new(RefSchema::File, path.trim()))
            }
        }
    }

    fn read_text(&self, arg: &RefArg, default: RefSchema) -> Result<String, ReplError> {
        let r = self.resolve(arg, default)?;
        Ok(self.buffers.ref_read_text(&r)?)
    }

    fn require_actor(&self) -> Result<ActorName, ReplError> {
        self.actor_next
            .clone()
            .ok_or(ReplError::Conversation(ConversationError::NoActiveModel))
    }

    fn target_options(&mut self) -> Result<&mut ActorOptions, ReplError> {
        let name = self.require_actor()?;
        self.dirty.insert(name.clone());
        Ok(self.view.options.entry(name).or_default())
    }

    /// Ship the options of changed actors, and of the addressee, with the pause.
    fn pause_with(&mut self, intention: Intention) -> Pause {
        if let Some(next) = &intention.actor_next {
            self.dirty.insert(next.clone());
        }
        let updates = self
            .dirty
            .drain()
            .filter_map(|name| {
                let opts = self.view.options.get(&name)?.clone();
                Some((name, opts))
            })
            .collect::<HashMap<_, _>>();
        self.unconfirmed.extend(updates.keys().cloned());
        Pause::Utterance(Utterance::new(self.name.clone(), intention.with_updates(updates)))
    }

    /// The `in` buffer as utterance contents. Blank input means no contents.
    fn take_message(&mut self) -> Option<Stream> {
        let items = self.buffers.take(IN);
        if items.iter().all(|item| matches!(item, Content::Text(_))) {
            let text = contents_to_text(&items);
            let text = text.trim();
            (!text.is_empty()).then(|| Stream::text(text))
        } else {
            Some(Stream::from_items(items))
        }
    }

    async fn command(&mut self, cmd: Command) -> Result<Option<Pause>, ReplError> {
        match cmd {
            Command::Echo => self.echo = Echo::Start,
            Command::Ask => {
                let actor = self.require_actor()?;
                let contents = self.take_message();
                let mut pause = self.pause_with(Intention::to(actor));
                if let (Pause::Utterance(ut), Some(contents)) = (&mut pause, contents) {
                    ut.contents = Some(contents);
                }
                return Ok(Some(pause));
            }
            Command::Help => self.print(HELP),
            Command::Exit => return Ok(Some(self.pause_with(Intention::exit()))),
            Command::Reset => {
                self.logger
                    .info("Resetting conversation history and clearing message buffer");
                self.reset();
                return Ok(Some(self.pause_with(Intention::reset())));
            }
            Command::Dbg => {
                self.logger.info("Entering debugger");
                return Ok(Some(self.pause_with(Intention::dbg())));
            }
            Command::Version => {
                let version = self.version.clone();
                self.println(&version);
            }
            Command::Pwd => {
                let cwd = std::env::current_dir()?;
                self.println(&cwd.display().to_string());
            }
            Command::Model(name) => {
                let name = ActorName::Model(name);
                self.view.options.entry(name.clone()).or_default();
                self.dirty.insert(name.clone());
                self.logger
                    .info(format!("Setting target actor to '{name}'"));
                self.actor_next = Some(name);
            }
            Command::ReadModelPrompt => {
                let prompt = self.buffers.text(IN).trim().to_string();
                let opts = self.target_options()?;
                opts.prompt = Some(prompt.clone());
                self.buffers.clear(IN);
                let head: String = prompt.chars().take(10).collect();
                self.logger.info(format!("Setting actor prompt to '{head}...'"));
            }
            Command::SetModel(setting) => self.set_model(setting)?,
            Command::SetTerminal(setting) => self.set_terminal(setting)?,
            Command::Cp(src, dst) => self.copy(&src, &dst, false)?,
            Command::Append(src, dst) => self.copy(&src, &dst, true)?,
            Command::Cat(arg) => {
                let r = self.resolve(&arg, RefSchema::Buffer)?;
                let items = self.buffers.ref_read(&r)?;
                let text = contents_to_text(&items);
                self.println(&text);
            }
            Command::Clear(arg) => {
                let r = self.resolve(&arg, RefSchema::Buffer)?;
                if r.schema != RefSchema::Buffer {
                    return Err(ReferenceError::NotABuffer(r.to_string()).into());
                }
                self.logger
                    .info(format!("Clearing buffer \"{}\"", r.value.to_lowercase()));
                self.buffers.clear(&r.value);
            }
            Command::Shell(arg) => {
                let cmdline = self.read_text(&arg, RefSchema::Verbatim)?;
                let output = tokio::process::Command::new("sh")
                    .arg("-c")
                    .arg(&cmdline)
                    .stdin(Stdio::inherit())
                    .stderr(Stdio::inherit())
                    .output()
                    .await?;
                self.print(&String::from_utf8_lossy(&output.stdout));
                let code = output.status.code().unwrap_or(-1);
                self.logger
                    .info(format!("Shell command '{cmdline}' exited with code {code}"));
            }
            Command::Pipe(cmd, input, output) => self.pipe(&cmd, &input, &output).await?,
            Command::Cd(arg) => {
                let path = self.read_text(&arg, RefSchema::Verbatim)?;
                let path = expand_tilde(path.trim());
                std::env::set_current_dir(&path).map_err(|e| ReferenceError::io(&path, e))?;
                self.logger.info(format!(
                    "Changed current directory to '{}'",
                    path.display()
                ));
            }
            Command::Paste(on) => {
                self.paste_mode = on;
                if on {
                    self.logger
                        .info(format!("Entering paste mode. Type '{PASTE_OFF}' to finish."));
                    return Ok(Some(Pause::Paste));
                }
                self.logger.info("Exiting paste mode.");
            }
        }
        Ok(None)
    }

    fn copy(&mut self, src: &RefArg, dst: &RefArg, append: bool) -> Result<(), ReplError> {
        let src = self.resolve(src, RefSchema::Buffer)?;
        let dst = self.resolve(dst, RefSchema::Buffer)?;
        let items = self.buffers.ref_read(&src)?;
        self.buffers.ref_write(&dst, items, append)?;
        let verb = if append { "Appended" } else { "Copied" };
        self.logger.info(format!("{verb} from {src} to {dst}"));
        Ok(())
    }

    async fn pipe(
        &mut self,
        cmd: &RefArg,
        input: &RefArg,
        output: &RefArg,
    ) -> Result<(), ReplError> {
        let cmdline = self.read_text(cmd, RefSchema::Verbatim)?;
        let input = self.resolve(input, RefSchema::Buffer)?;
        let output = self.resolve(output, RefSchema::Buffer)?;
        let stdin_bytes: Vec<u8> = self
            .buffers
            .ref_read(&input)?
            .into_iter()
            .flat_map(|item| match item {
                Content::Binary(bytes) => bytes,
                other => contents_to_text(&[other]).into_bytes(),
            })
            .collect();

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&cmdline)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move { stdin.write_all(&stdin_bytes).await })
        });
        let result = child.wait_with_output().await?;
        if let Some(writer) = writer {
            // A command that ignores its input closes the pipe early.
            if let Ok(Err(err)) = writer.await {
                if err.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(err.into());
                }
            }
        }
        let captured = match String::from_utf8(result.stdout) {
            Ok(text) => Content::Text(text),
            Err(err) => Content::Binary(err.into_bytes()),
        };
        self.buffers.ref_write(&output, vec![captured], false)?;
        let code = result.status.code().unwrap_or(-1);
        self.logger
            .info(format!("Pipe command '{cmdline}' exited with code {code}"));
        Ok(())
    }

    fn set_model(&mut self, setting: ModelSetting) -> Result<(), ReplError> {
        let apikey = match &setting {
            ModelSetting::ApiKey(arg) => Some(self.read_text(arg, RefSchema::Verbatim)?),
            _ => None,
        };
        let opts = self.target_options()?;
        let message = match setting {
            ModelSetting::ApiKey(arg) => {
                opts.apikey = apikey.map(|k| k.trim().to_string());
                format!("Setting model API key to the contents of '{arg}'")
            }
            ModelSetting::Temperature(t) => {
                opts.temperature = t;
                format!("Setting model temperature to '{}'", or_default(t))
            }
            ModelSetting::NumThreads(n) => {
                opts.num_threads = n;
                format!("Setting model number of threads to '{}'", or_default(n))
            }
            ModelSetting::ImageSize(size) => {
                let message = format!("Setting model image size to '{size}'");
                opts.image_size = Some(size);
                message
            }
            ModelSetting::ImageCount(n) => {
                opts.image_count = n;
                format!("Setting model image count to '{}'", or_default(n))
            }
            ModelSetting::Verbosity(v) => {
                opts.verbosity = v.unwrap_or(0);
                format!("Setting actor verbosity to '{}'", or_default(v))
            }
            ModelSetting::Modality(m) => {
                opts.modality = m;
                format!("Setting model modality to '{m}'")
            }
            ModelSetting::ImageDir(dir) => {
                let message = format!("Setting model image directory to '{dir}'");
                opts.image_dir = Some(expand_tilde(&dir));
                message
            }
            ModelSetting::ModelDir(dir) => {
                let message = format!("Setting model directory to '{dir}'");
                opts.model_dir = Some(expand_tilde(&dir));
                message
            }
            ModelSetting::Seed(seed) => {
                opts.seed = seed;
                format!("Setting model seed to '{}'", or_default(seed))
            }
            ModelSetting::Replay(replay) => {
                opts.replay = replay;
                format!("Setting model replay mode to '{replay}'")
            }
            ModelSetting::Proxy(proxy) => {
                let message = format!("Setting model proxy to '{}'", or_default(proxy.as_ref()));
                opts.proxy = proxy;
                message
            }
        };
        self.logger.info(message);
        Ok(())
    }

    fn set_terminal(&mut self, setting: TerminalSetting) -> Result<(), ReplError> {
        match setting {
            TerminalSetting::RawBin(on) => {
                self.terminal.rawbin = on;
                self.logger
                    .info(format!("Setting terminal raw binary mode to '{on}'"));
            }
            TerminalSetting::Prompt(prompt) => {
                self.logger
                    .info(format!("Setting terminal prompt to '{prompt}'"));
                self.terminal.prompt = prompt;
            }
            TerminalSetting::Width(width) => {
                self.terminal.width = width;
                self.logger
                    .info(format!("Setting terminal width to '{}'", or_default(width)));
            }
            TerminalSetting::Verbosity(v) => {
                let v = v.unwrap_or(DEFAULT_VERBOSITY);
                self.terminal.verbosity = v;
                self.logger.set_session_verbosity(v);
                self.logger
                    .info(format!("Setting terminal verbosity to '{v}'"));
            }
            TerminalSetting::Recording(arg) => {
                let target = self.resolve(&arg, RefSchema::File)?;
                if target.schema == RefSchema::Verbatim {
                    return Err(ReferenceError::ReadOnly(target.to_string()).into());
                }
                let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
                self.buffers.ref_write(
                    &target,
                    vec![Content::text(format!("# recording started at {stamp}\n"))],
                    true,
                )?;
                self.logger.info(format!("Recording operator input to '{target}'"));
                self.terminal.recording = Some(target);
            }
        }
        Ok(())
    }
}

fn or_default<T: std::fmt::Display>(val: Option<T>) -> String {
    val.map(|v| v.to_string())
        .unwrap_or_else(|| "default".to_string())
}

#[cfg(test)]
mod tests;
