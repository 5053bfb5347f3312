use crate::actor::user::UserActor;
use crate::actor::ActorContext;
use crate::core::conversation::ActorName;
use crate::core::logger::Logger;
use crate::core::session::Session;
use crate::repl::Repl;
use crate::utils::line_source::{classify, LineSource, ReadLine};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Output sink whose contents can be inspected after the fact.
#[derive(Clone, Default)]
pub struct CaptureSink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn boxed(&self) -> Box<dyn Write + Send> {
        Box::new(self.clone())
    }
}

impl Write for CaptureSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Completion requests answered so far, with the candidates offered.
pub type Offered = Arc<Mutex<Vec<(String, Vec<String>)>>>;

/// Replays a fixed list of lines, then reports end of input. A line ending in
/// a tab is a completion request, as on a terminal.
pub struct ScriptedLines {
    lines: VecDeque<ReadLine>,
    prompts: Arc<Mutex<Vec<String>>>,
    offered: Offered,
    history: Vec<String>,
}

impl ScriptedLines {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(|l| classify(&l.into())).collect(),
            prompts: Arc::default(),
            offered: Arc::default(),
            history: Vec::new(),
        }
    }

    pub fn with_history<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.history = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn interrupt_next(mut self) -> Self {
        self.lines.push_front(ReadLine::Interrupted);
        self
    }

    /// Prompts shown so far, shared with the clone handed to an actor.
    pub fn prompts(&self) -> Arc<Mutex<Vec<String>>> {
        self.prompts.clone()
    }

    pub fn offered(&self) -> Offered {
        self.offered.clone()
    }
}

#[async_trait]
impl LineSource for ScriptedLines {
    async fn read_line(&mut self, prompt: &str) -> io::Result<ReadLine> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.lines.pop_front().unwrap_or(ReadLine::Eof))
    }

    fn offer_completions(&mut self, partial: &str, candidates: &[String]) {
        self.offered
            .lock()
            .unwrap()
            .push((partial.to_string(), candidates.to_vec()));
    }

    fn history(&self) -> &[String] {
        &self.history
    }
}

/// A session whose operator types `lines` and whose output lands in the
/// returned sink.
pub fn scripted_session<I, S>(lines: I) -> (Session, CaptureSink)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let sink = CaptureSink::new();
    let repl = Repl::new(ActorName::User, sink.boxed(), Logger::default());
    let user = UserActor::new(repl, Box::new(ScriptedLines::new(lines)));
    (Session::new(user, ActorContext::default()), sink)
}
