//! Hand-written parser for the operator command language.
//!
//! Input is a sequence of free text, `\X` escapes, `#` comments and
//! `/`-prefixed commands. The parser is incremental: [`Parser::next_item`]
//! yields one item at a time together with its byte span, so the interpreter
//! can stop after any command and keep the unconsumed suffix for later.

use crate::core::buffers::RefSchema;
use crate::core::conversation::{Modality, ModelName};
use crate::core::error::ParseError;
use std::fmt;
use std::str::FromStr;

pub const CMD_APPEND: &str = "/append";
pub const CMD_ASK: &str = "/ask";
pub const CMD_CAT: &str = "/cat";
pub const CMD_CD: &str = "/cd";
pub const CMD_CLEAR: &str = "/clear";
pub const CMD_CP: &str = "/cp";
pub const CMD_DBG: &str = "/dbg";
pub const CMD_ECHO: &str = "/echo";
pub const CMD_EXIT: &str = "/exit";
pub const CMD_HELP: &str = "/help";
pub const CMD_MODEL: &str = "/model";
pub const CMD_PASTE: &str = "/paste";
pub const CMD_PIPE: &str = "/pipe";
pub const CMD_PWD: &str = "/pwd";
pub const CMD_READ: &str = "/read";
pub const CMD_RESET: &str = "/reset";
pub const CMD_SET: &str = "/set";
pub const CMD_SHELL: &str = "/shell";
pub const CMD_VERSION: &str = "/version";

/// Longest keywords first, so that matching by prefix picks the longest one.
const KEYWORDS: [&str; 19] = [
    CMD_VERSION,
    CMD_APPEND,
    CMD_CLEAR,
    CMD_MODEL,
    CMD_PASTE,
    CMD_RESET,
    CMD_SHELL,
    CMD_ECHO,
    CMD_EXIT,
    CMD_HELP,
    CMD_PIPE,
    CMD_READ,
    CMD_ASK,
    CMD_CAT,
    CMD_DBG,
    CMD_PWD,
    CMD_SET,
    CMD_CD,
    CMD_CP,
];

/// Schema prefixes, longest first so `buffer:` wins over `buf:`.
const SCHEMA_PREFIXES: [&str; 5] = ["verbatim", "buffer", "bfile", "file", "buf"];

pub const HELP: &str = r#"Commands:
  /ask                       Send the message buffer to the selected model
  /model [PROVIDER:]NAME[(ALIAS)]
                             Select the model that receives /ask
  /set model KEY VALUE       apikey REF | t|temp FLOAT | nt|nthreads NUM | imgsz STR
                             imgnum NUM | verbosity NUM | modality img|text | imgdir STR
                             modeldir STR | seed NUM | replay BOOL | proxy STR
  /set term|terminal KEY VALUE
                             rawbin BOOL | prompt STR | width NUM | verbosity NUM
                             recording REF
  /read model prompt         Move the message buffer into the model prompt
  /cp REF REF                Copy a reference into another
  /append REF REF            Append a reference to another
  /cat REF                   Print a reference
  /clear REF                 Clear a buffer
  /shell REF                 Run a shell command
  /pipe REF REF REF          Run a command with input and capture its output
  /cd REF, /pwd              Change or print the working directory
  /paste BOOL                Toggle paste mode, end it with '/paste off'
  /echo                      Print the rest of the line
  /reset                     Reset the conversation and all models
  /version, /help, /dbg, /exit

References are [SCHEMA:]VALUE with SCHEMA one of verbatim, file, bfile, buffer (buf),
or file(REF) to use the text of REF as a file name. Values are "quoted", 'quoted' or
bare words. Text after '#' is a comment, '\X' inserts X literally.
BOOL is one of true, false, yes, no, on, off, 1, 0. NUM and FLOAT accept 'default'.
"#;

/// A reference argument as written. The schema is optional; the interpreter
/// picks a default depending on the command and argument position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefArg {
    Plain {
        schema: Option<RefSchema>,
        value: String,
    },
    /// `file(REF)`: the text of the inner reference names a file.
    FileOf(Box<RefArg>),
}

impl RefArg {
    pub fn bare(value: impl Into<String>) -> Self {
        RefArg::Plain {
            schema: None,
            value: value.into(),
        }
    }

    pub fn with_schema(schema: RefSchema, value: impl Into<String>) -> Self {
        RefArg::Plain {
            schema: Some(schema),
            value: value.into(),
        }
    }
}

impl fmt::Display for RefArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefArg::Plain {
                schema: Some(schema),
                value,
            } => write!(f, "{schema}:{}", quote(value)),
            RefArg::Plain {
                schema: None,
                value,
            } => f.write_str(&quote(value)),
            RefArg::FileOf(inner) => write!(f, "file({inner})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelSetting {
    ApiKey(RefArg),
    Temperature(Option<f32>),
    NumThreads(Option<u32>),
    ImageSize(String),
    ImageCount(Option<u32>),
    Verbosity(Option<u8>),
    Modality(Modality),
    ImageDir(String),
    ModelDir(String),
    Seed(Option<u64>),
    Replay(bool),
    Proxy(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TerminalSetting {
    RawBin(bool),
    Prompt(String),
    Width(Option<usize>),
    Verbosity(Option<u8>),
    Recording(RefArg),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Version,
    Dbg,
    Reset,
    Echo,
    Ask,
    Help,
    Exit,
    Pwd,
    Model(ModelName),
    ReadModelPrompt,
    SetModel(ModelSetting),
    SetTerminal(TerminalSetting),
    Cp(RefArg, RefArg),
    Append(RefArg, RefArg),
    Cat(RefArg),
    Clear(RefArg),
    Shell(RefArg),
    Cd(RefArg),
    Pipe(RefArg, RefArg, RefArg),
    Paste(bool),
}

fn quote(s: &str) -> String {
    let plain = !s.is_empty()
        && !s.starts_with('\'')
        && !s
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '(' | ')'));
    if plain {
        s.to_string()
    } else {
        format!("\"{s}\"")
    }
}

fn fmt_default<T: fmt::Display>(val: &Option<T>) -> String {
    val.as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "default".to_string())
}

fn fmt_bool(val: bool) -> &'static str {
    if val {
        "on"
    } else {
        "off"
    }
}

impl fmt::Display for ModelSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSetting::ApiKey(r) => write!(f, "apikey {r}"),
            ModelSetting::Temperature(t) => write!(f, "temp {}", fmt_default(t)),
            ModelSetting::NumThreads(n) => write!(f, "nthreads {}", fmt_default(n)),
            ModelSetting::ImageSize(s) => write!(f, "imgsz {}", quote(s)),
            ModelSetting::ImageCount(n) => write!(f, "imgnum {}", fmt_default(n)),
            ModelSetting::Verbosity(v) => write!(f, "verbosity {}", fmt_default(v)),
            ModelSetting::Modality(m) => write!(f, "modality {m}"),
            ModelSetting::ImageDir(s) => write!(f, "imgdir {}", quote(s)),
            ModelSetting::ModelDir(s) => write!(f, "modeldir {}", quote(s)),
            ModelSetting::Seed(s) => write!(f, "seed {}", fmt_default(s)),
            ModelSetting::Replay(b) => write!(f, "replay {}", fmt_bool(*b)),
            ModelSetting::Proxy(p) => match p {
                Some(p) => write!(f, "proxy {}", quote(p)),
                None => f.write_str("proxy default"),
            },
        }
    }
}

impl fmt::Display for TerminalSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalSetting::RawBin(b) => write!(f, "rawbin {}", fmt_bool(*b)),
            TerminalSetting::Prompt(p) => write!(f, "prompt {}", quote(p)),
            TerminalSetting::Width(w) => write!(f, "width {}", fmt_default(w)),
            TerminalSetting::Verbosity(v) => write!(f, "verbosity {}", fmt_default(v)),
            TerminalSetting::Recording(r) => write!(f, "recording {r}"),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Version => f.write_str(CMD_VERSION),
            Command::Dbg => f.write_str(CMD_DBG),
            Command::Reset => f.write_str(CMD_RESET),
            Command::Echo => f.write_str(CMD_ECHO),
            Command::Ask => f.write_str(CMD_ASK),
            Command::Help => f.write_str(CMD_HELP),
            Command::Exit => f.write_str(CMD_EXIT),
            Command::Pwd => f.write_str(CMD_PWD),
            Command::Model(name) => {
                write!(f, "{CMD_MODEL} {}:{}", name.provider, quote(&name.model))?;
                if let Some(alias) = &name.alias {
                    write!(f, "({alias})")?;
                }
                Ok(())
            }
            Command::ReadModelPrompt => write!(f, "{CMD_READ} model prompt"),
            Command::SetModel(s) => write!(f, "{CMD_SET} model {s}"),
            Command::SetTerminal(s) => write!(f, "{CMD_SET} terminal {s}"),
            Command::Cp(a, b) => write!(f, "{CMD_CP} {a} {b}"),
            Command::Append(a, b) => write!(f, "{CMD_APPEND} {a} {b}"),
            Command::Cat(r) => write!(f, "{CMD_CAT} {r}"),
            Command::Clear(r) => write!(f, "{CMD_CLEAR} {r}"),
            Command::Shell(r) => write!(f, "{CMD_SHELL} {r}"),
            Command::Cd(r) => write!(f, "{CMD_CD} {r}"),
            Command::Pipe(c, i, o) => write!(f, "{CMD_PIPE} {c} {i} {o}"),
            Command::Paste(b) => write!(f, "{CMD_PASTE} {}", fmt_bool(*b)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Text(String),
    Escape(char),
    Command(Command),
}

/// A parsed item and the byte range of input it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub item: T,
    pub start: usize,
    pub end: usize,
}

type ParseResult<T> = Result<T, ParseError>;

pub struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    index: usize,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            index: 0,
        }
    }

    /// Byte offset of the first unconsumed character.
    pub fn offset(&self) -> usize {
        self.index
    }

    fn eof(&self) -> bool {
        self.index >= self.bytes.len()
    }

    fn current(&self) -> Option<u8> {
        self.bytes.get(self.index).copied()
    }

    fn rest(&self) -> &'a str {
        &self.src[self.index..]
    }

    fn advance(&mut self) {
        if self.index < self.bytes.len() {
            self.index += 1;
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.index, message)
    }

    /// Next item, or `None` at the end of input. After an error the rest of
    /// the offending line has been skipped.
    pub fn next_item(&mut self) -> Option<ParseResult<Spanned<Item>>> {
        loop {
            let start = self.index;
            let item = match self.current()? {
                b'#' => {
                    while !matches!(self.current(), None | Some(b'\n')) {
                        self.advance();
                    }
                    continue;
                }
                b'\\' => self.escape(),
                b'/' if self.at_command() => self.command().map(Item::Command),
                _ => Ok(Item::Text(self.text())),
            };
            return Some(match item {
                Ok(item) => Ok(Spanned {
                    item,
                    start,
                    end: self.index,
                }),
                Err(err) => {
                    self.index = err.offset.clamp(start, self.bytes.len());
                    self.skip_line();
                    Err(err)
                }
            });
        }
    }

    fn skip_line(&mut self) {
        while let Some(ch) = self.current() {
            self.advance();
            if ch == b'\n' {
                break;
            }
        }
    }

    /// A `/` starts a command only when a keyword follows it.
    fn at_command(&self) -> bool {
        KEYWORDS.iter().any(|k| self.rest().starts_with(k))
    }

    /// Text up to the next special character or through the end of the line.
    /// The first character is always taken, so a lone `/` is text.
    fn text(&mut self) -> String {
        let start = self.index;
        while let Some(ch) = self.current() {
            if self.index > start && matches!(ch, b'/' | b'#' | b'\\') {
                break;
            }
            self.advance();
            if ch == b'\n' {
                break;
            }
        }
        self.src[start..self.index].to_string()
    }

    fn escape(&mut self) -> ParseResult<Item> {
        self.advance();
        match self.rest().chars().next() {
            Some(ch) => {
                self.index += ch.len_utf8();
                Ok(Item::Escape(ch))
            }
            None => Err(self.error("dangling escape at end of input")),
        }
    }

    fn command(&mut self) -> ParseResult<Command> {
        let rest = self.rest();
        let Some(keyword) = KEYWORDS.iter().copied().find(|k| rest.starts_with(k)) else {
            let word: String = rest.chars().take_while(|c| !c.is_whitespace()).collect();
            return Err(self.error(format!("Unknown command '{word}'")));
        };
        self.index += keyword.len();

        let cmd = match keyword {
            CMD_VERSION => Command::Version,
            CMD_DBG => Command::Dbg,
            CMD_RESET => Command::Reset,
            CMD_ECHO => Command::Echo,
            CMD_ASK => Command::Ask,
            CMD_HELP => Command::Help,
            CMD_EXIT => Command::Exit,
            CMD_PWD => Command::Pwd,
            CMD_MODEL => {
                self.separator(keyword)?;
                Command::Model(self.model_name()?)
            }
            CMD_READ => {
                self.separator(keyword)?;
                self.keyword(&["model"], "read section")?;
                self.separator(keyword)?;
                self.keyword(&["prompt"], "read target")?;
                Command::ReadModelPrompt
            }
            CMD_SET => {
                self.separator(keyword)?;
                let section = self.keyword(&["model", "terminal", "term"], "set section")?;
                self.separator(keyword)?;
                if section == "model" {
                    Command::SetModel(self.model_setting()?)
                } else {
                    Command::SetTerminal(self.terminal_setting()?)
                }
            }
            CMD_CP | CMD_APPEND => {
                self.separator(keyword)?;
                let src = self.ref_arg()?;
                self.separator(keyword)?;
                let dst = self.ref_arg()?;
                if keyword == CMD_CP {
                    Command::Cp(src, dst)
                } else {
                    Command::Append(src, dst)
                }
            }
            CMD_CAT | CMD_CLEAR | CMD_SHELL | CMD_CD => {
                self.separator(keyword)?;
                let r = self.ref_arg()?;
                match keyword {
                    CMD_CAT => Command::Cat(r),
                    CMD_CLEAR => Command::Clear(r),
                    CMD_SHELL => Command::Shell(r),
                    _ => Command::Cd(r),
                }
            }
            CMD_PIPE => {
                self.separator(keyword)?;
                let cmd = self.ref_arg()?;
                self.separator(keyword)?;
                let input = self.ref_arg()?;
                self.separator(keyword)?;
                let output = self.ref_arg()?;
                Command::Pipe(cmd, input, output)
            }
            CMD_PASTE => {
                self.separator(keyword)?;
                Command::Paste(self.boolean()?)
            }
            other => return Err(self.error(format!("Unknown command '{other}'"))),
        };

        if cmd != Command::Echo {
            self.skip_line_end();
        }
        Ok(cmd)
    }

    /// At least one blank between a command and its next argument.
    fn separator(&mut self, keyword: &str) -> ParseResult<()> {
        if !matches!(self.current(), Some(b' ' | b'\t')) {
            return Err(self.error(format!("'{keyword}' expects an argument")));
        }
        self.skip_blanks();
        Ok(())
    }

    fn skip_blanks(&mut self) {
        while matches!(self.current(), Some(b' ' | b'\t')) {
            self.advance();
        }
    }

    /// Swallow trailing blanks and the newline that ends a command line.
    fn skip_line_end(&mut self) {
        let save = self.index;
        self.skip_blanks();
        if self.rest().starts_with("\r\n") {
            self.index += 2;
        } else if self.current() == Some(b'\n') {
            self.advance();
        } else if !self.eof() {
            self.index = save;
        }
    }

    /// A run of characters that can form a number, boolean or keyword.
    fn token(&mut self) -> &'a str {
        let start = self.index;
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || matches!(ch, b'.' | b'-' | b'+' | b'_') {
                self.advance();
            } else {
                break;
            }
        }
        &self.src[start..self.index]
    }

    fn keyword(&mut self, allowed: &[&'static str], what: &str) -> ParseResult<&'static str> {
        let start = self.index;
        let word = self.token();
        match allowed.iter().find(|k| **k == word) {
            Some(k) => Ok(*k),
            None => {
                self.index = start;
                Err(self.error(format!("Unknown {what} '{word}'")))
            }
        }
    }

    fn number_or_default<T: FromStr>(&mut self, what: &str) -> ParseResult<Option<T>> {
        let start = self.index;
        let word = self.token();
        if word == "default" || word == "def" {
            return Ok(None);
        }
        word.parse::<T>().map(Some).map_err(|_| {
            ParseError::new(start, format!("Expected {what} or 'default', got '{word}'"))
        })
    }

    fn boolean(&mut self) -> ParseResult<bool> {
        let start = self.index;
        match self.token() {
            "true" | "yes" | "1" | "on" => Ok(true),
            "false" | "no" | "0" | "off" => Ok(false),
            other => Err(ParseError::new(
                start,
                format!("Invalid boolean value '{other}'"),
            )),
        }
    }

    fn quoted(&mut self, quote: u8) -> ParseResult<String> {
        let open = self.index;
        self.advance();
        let start = self.index;
        while let Some(ch) = self.current() {
            if ch == quote {
                let value = self.src[start..self.index].to_string();
                self.advance();
                return Ok(value);
            }
            self.advance();
        }
        Err(ParseError::new(open, "unterminated string"))
    }

    /// A quoted string, or a bare word without blanks or parentheses.
    fn string(&mut self) -> ParseResult<String> {
        match self.current() {
            Some(q @ (b'"' | b'\'')) => self.quoted(q),
            Some(b'(' | b')') | None => Err(self.error("expected a string")),
            Some(_) => {
                let start = self.index;
                while let Some(ch) = self.current() {
                    if ch.is_ascii_whitespace() || matches!(ch, b'(' | b')') {
                        break;
                    }
                    self.advance();
                }
                if start == self.index {
                    return Err(self.error("expected a string"));
                }
                Ok(self.src[start..self.index].to_string())
            }
        }
    }

    fn string_or_default(&mut self) -> ParseResult<Option<String>> {
        let value = self.string()?;
        Ok((value != "default" && value != "def").then_some(value))
    }

    fn ref_arg(&mut self) -> ParseResult<RefArg> {
        let rest = self.rest();
        if rest.starts_with("file(") {
            self.index += "file(".len();
            self.skip_blanks();
            let inner = self.ref_arg()?;
            self.skip_blanks();
            if self.current() != Some(b')') {
                return Err(self.error("expected ')' to close file(...)"));
            }
            self.advance();
            return Ok(RefArg::FileOf(Box::new(inner)));
        }
        for prefix in SCHEMA_PREFIXES {
            if rest.starts_with(prefix) && rest[prefix.len()..].starts_with(':') {
                let schema = prefix
                    .parse::<RefSchema>()
                    .map_err(|e| self.error(e.to_string()))?;
                self.index += prefix.len() + 1;
                return Ok(RefArg::with_schema(schema, self.string()?));
            }
        }
        Ok(RefArg::bare(self.string()?))
    }

    /// `[PROVIDER:]NAME[(ALIAS)]`. A bare name selects the provider of that
    /// name with its default model.
    fn model_name(&mut self) -> ParseResult<ModelName> {
        let start = self.index;
        let provider_len = self
            .rest()
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-'))
            .count();
        let mut name = if provider_len > 0 && self.bytes.get(start + provider_len) == Some(&b':')
        {
            let provider = self.src[start..start + provider_len].to_string();
            self.index += provider_len + 1;
            ModelName::new(provider, self.string()?)
        } else {
            let value = self.string()?;
            match value.split_once(':') {
                Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                    ModelName::new(provider, model)
                }
                _ => ModelName::new(value, "default"),
            }
        };
        if self.current() == Some(b'(') {
            self.advance();
            let alias_start = self.index;
            while !matches!(self.current(), None | Some(b')' | b'\n')) {
                self.advance();
            }
            if self.current() != Some(b')') {
                return Err(ParseError::new(alias_start, "expected ')' after model alias"));
            }
            let alias = self.src[alias_start..self.index].trim().to_string();
            self.advance();
            if !alias.is_empty() {
                name = name.with_alias(alias);
            }
        }
        Ok(name)
    }

    fn modality(&mut self) -> ParseResult<Modality> {
        let start = self.index;
        match self.string()?.as_str() {
            "img" => Ok(Modality::Image),
            "text" => Ok(Modality::Text),
            other => Err(ParseError::new(
                start,
                format!("Unknown modality '{other}', expected img or text"),
            )),
        }
    }

    fn model_setting(&mut self) -> ParseResult<ModelSetting> {
        let key = self.keyword(
            &[
                "apikey",
                "t",
                "temp",
                "nt",
                "nthreads",
                "imgsz",
                "imgnum",
                "verbosity",
                "modality",
                "imgdir",
                "modeldir",
                "seed",
                "replay",
                "proxy",
            ],
            "model setting",
        )?;
        self.separator(key)?;
        Ok(match key {
            "apikey" => ModelSetting::ApiKey(self.ref_arg()?),
            "t" | "temp" => ModelSetting::Temperature(self.number_or_default("a float")?),
            "nt" | "nthreads" => ModelSetting::NumThreads(self.number_or_default("a number")?),
            "imgsz" => ModelSetting::ImageSize(self.string()?),
            "imgnum" => ModelSetting::ImageCount(self.number_or_default("a number")?),
            "verbosity" => ModelSetting::Verbosity(self.number_or_default("a number")?),
            "modality" => ModelSetting::Modality(self.modality()?),
            "imgdir" => ModelSetting::ImageDir(self.string()?),
            "modeldir" => ModelSetting::ModelDir(self.string()?),
            "seed" => ModelSetting::Seed(self.number_or_default("a number")?),
            "replay" => ModelSetting::Replay(self.boolean()?),
            _ => ModelSetting::Proxy(self.string_or_default()?),
        })
    }

    fn terminal_setting(&mut self) -> ParseResult<TerminalSetting> {
        let key = self.keyword(
            &["rawbin", "prompt", "width", "verbosity", "recording"],
            "terminal setting",
        )?;
        self.separator(key)?;
        Ok(match key {
            "rawbin" => TerminalSetting::RawBin(self.boolean()?),
            "prompt" => TerminalSetting::Prompt(self.string()?),
            "width" => TerminalSetting::Width(self.number_or_default("a number")?),
            "verbosity" => TerminalSetting::Verbosity(self.number_or_default("a number")?),
            _ => TerminalSetting::Recording(self.ref_arg()?),
        })
    }
}

impl Iterator for Parser<'_> {
    type Item = ParseResult<Spanned<Item>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item()
    }
}

/// Parse a chunk that must consist of exactly one command.
pub fn parse_command(src: &str) -> ParseResult<Command> {
    let mut parser = Parser::new(src);
    let cmd = match parser.next_item() {
        Some(Ok(Spanned {
            item: Item::Command(cmd),
            ..
        })) => cmd,
        Some(Err(err)) => return Err(err),
        _ => return Err(ParseError::new(0, "expected a command")),
    };
    match parser.next_item() {
        None => Ok(cmd),
        Some(Ok(Spanned {
            item: Item::Text(t),
            ..
        })) if t.trim().is_empty() => Ok(cmd),
        Some(_) => Err(ParseError::new(parser.offset(), "unexpected trailing input")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(src: &str) -> Vec<Item> {
        Parser::new(src)
            .map(|res| res.expect("input should parse").item)
            .collect()
    }

    #[test]
    fn set_model_temp_parses_into_typed_setting() {
        assert_eq!(
            parse_command("/set model temp 3.4").unwrap(),
            Command::SetModel(ModelSetting::Temperature(Some(3.4)))
        );
        assert_eq!(
            parse_command("/set model t default").unwrap(),
            Command::SetModel(ModelSetting::Temperature(None))
        );
    }

    #[test]
    fn commands_round_trip_through_display() {
        let cases = [
            "/ask",
            "/exit",
            "/help",
            "/reset",
            "/echo",
            "/version",
            "/dbg",
            "/pwd",
            "/model openai:gpt-4o",
            "/model dummy:default(critic)",
            "/read model prompt",
            "/set model temp 3.4",
            "/set model apikey file:~/.openai-key",
            "/set model nthreads default",
            "/set model imgsz 512x512",
            "/set model imgnum 2",
            "/set model verbosity 3",
            "/set model modality img",
            "/set model seed 42",
            "/set model replay on",
            "/set model proxy default",
            "/set terminal rawbin off",
            "/set terminal prompt \">> \"",
            "/set terminal width 80",
            "/set terminal recording file:session.txt",
            "/cp file:a.txt buffer:b",
            "/append verbatim:\"hello world\" out",
            "/cat out",
            "/clear buffer:in",
            "/shell \"ls -l\"",
            "/cd file(buffer:dir)",
            "/pipe verbatim:sort in out",
            "/paste on",
        ];
        for case in cases {
            let cmd = parse_command(case).unwrap_or_else(|e| panic!("{case}: {e}"));
            assert_eq!(cmd.to_string(), case);
            assert_eq!(parse_command(&cmd.to_string()).unwrap(), cmd);
        }
    }

    #[test]
    fn set_aliases_normalize() {
        assert_eq!(
            parse_command("/set term rawbin yes").unwrap(),
            Command::SetTerminal(TerminalSetting::RawBin(true))
        );
        assert_eq!(
            parse_command("/set model nt 4").unwrap(),
            Command::SetModel(ModelSetting::NumThreads(Some(4)))
        );
    }

    #[test]
    fn text_commands_and_comments_interleave() {
        assert_eq!(
            items("hello # note\n/ask\nmore"),
            vec![
                Item::Text("hello ".into()),
                Item::Text("\n".into()),
                Item::Command(Command::Ask),
                Item::Text("more".into()),
            ]
        );
    }

    #[test]
    fn escapes_strip_special_meaning() {
        assert_eq!(
            items("a\\/b\\#"),
            vec![
                Item::Text("a".into()),
                Item::Escape('/'),
                Item::Text("b".into()),
                Item::Escape('#'),
            ]
        );
    }

    #[test]
    fn keywords_match_by_longest_prefix() {
        assert_eq!(
            items("/echoa"),
            vec![Item::Command(Command::Echo), Item::Text("a".into())]
        );
    }

    #[test]
    fn text_items_end_at_line_breaks() {
        assert_eq!(
            items("a\nb\n"),
            vec![Item::Text("a\n".into()), Item::Text("b\n".into())]
        );
    }

    #[test]
    fn bare_model_names_select_the_provider_default() {
        assert_eq!(
            parse_command("/model dummy").unwrap(),
            Command::Model(ModelName::new("dummy", "default"))
        );
        assert_eq!(
            parse_command("/model \"openai:gpt 4\"").unwrap(),
            Command::Model(ModelName::new("openai", "gpt 4"))
        );
    }

    #[test]
    fn schema_prefixes_and_nested_file_references() {
        assert_eq!(
            parse_command("/cat buf:notes").unwrap(),
            Command::Cat(RefArg::with_schema(RefSchema::Buffer, "notes"))
        );
        assert_eq!(
            parse_command("/cat file( verbatim:a.txt )").unwrap(),
            Command::Cat(RefArg::FileOf(Box::new(RefArg::with_schema(
                RefSchema::Verbatim,
                "a.txt"
            ))))
        );
        assert_eq!(
            parse_command("/cat 'x y'").unwrap(),
            Command::Cat(RefArg::bare("x y"))
        );
    }

    #[test]
    fn errors_skip_the_rest_of_the_line() {
        let mut parser = Parser::new("/cat \"open stuff\n/ask");
        let err = parser.next_item().unwrap().unwrap_err();
        assert!(err.offset > 0);
        assert_eq!(
            parser.next_item().unwrap().unwrap().item,
            Item::Command(Command::Ask)
        );
    }

    #[test]
    fn missing_arguments_and_unknown_keys_are_errors() {
        assert!(parse_command("/cat").is_err());
        assert!(parse_command("/set model colour red").is_err());
        assert!(parse_command("/set terminal rawbin maybe").is_err());
        assert!(parse_command("/cat \"open").is_err());
        assert!(parse_command("/set model temp hot").is_err());
    }

    #[test]
    fn spans_cover_commands_and_their_line_end() {
        let mut parser = Parser::new("/ask\nrest");
        let first = parser.next_item().unwrap().unwrap();
        assert_eq!((first.start, first.end), (0, 5));
        assert_eq!(&"/ask\nrest"[first.end..], "rest");
    }
}
