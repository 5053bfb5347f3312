//! Command-line interface parsing and handling
//!
//! This module turns flags, the config file and rc files into a startup input
//! chunk for the operator, then runs the session until an actor exits.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::actor::user::UserActor;
use crate::actor::ActorContext;
use crate::core::config::data::{rc_file_names, DEFAULT_RC_NAMES};
use crate::core::config::Config;
use crate::core::conversation::ActorName;
use crate::core::logger::{Logger, DEFAULT_VERBOSITY};
use crate::core::session::Session;
use crate::repl::Repl;
use crate::utils::line_source::{History, StdinLineSource};
use crate::utils::paths::{ancestors_top_down, expand_tilde, path_display};

/// Overrides `--rc` when set.
pub const RC_ENV: &str = "CONFAB_RC";

#[derive(Parser, Debug)]
#[command(name = "confab")]
#[command(about = "A terminal conversation client for AI models")]
#[command(
    long_about = "Confab reads a small command language from the terminal and routes the \
conversation between you and one or more AI models.\n\n\
Type text to fill the message buffer, then /ask to send it to the model selected with \
/model. Type /help inside the session for the full command list.\n\n\
Environment Variables:\n\
  CONFAB_RC         Comma separated rc file names (overrides --rc)\n\
  OPENAI_API_KEY    API key used when no apikey option or keyring entry is set\n\
  OPENAI_BASE_URL   Custom API base URL (defaults to https://api.openai.com/v1)\n\
  RUST_LOG          Log filter for diagnostics written to stderr"
)]
pub struct Args {
    /// Model to select at startup
    #[arg(short = 'm', long, value_name = "[PROVIDER:]NAME")]
    pub model: Option<String>,

    /// Reference to the API key of the startup model, e.g. file:~/.openai-key
    #[arg(long, value_name = "REF")]
    pub model_apikey: Option<String>,

    /// Directory holding local model files
    #[arg(long, value_name = "DIR")]
    pub model_dir: Option<String>,

    /// Directory where generated images are saved
    #[arg(long, value_name = "DIR")]
    pub image_dir: Option<String>,

    /// Terminal prompt
    #[arg(short = 'p', long, value_name = "STR")]
    pub prompt: Option<String>,

    /// History file; an empty value disables history
    #[arg(long, value_name = "FILE")]
    pub history: Option<String>,

    /// Verbosity level (0 silent, 4 debug)
    #[arg(long, value_name = "N")]
    pub verbose: Option<u8>,

    /// Comma separated rc file names, or `none`
    #[arg(long, value_name = "NAMES")]
    pub rc: Option<String>,

    /// Keep prompting after the input files are processed
    #[arg(short = 'K', long)]
    pub keep_running: bool,

    /// Print the version and exit
    #[arg(long)]
    pub version: bool,

    /// Print the source revision and exit
    #[arg(long)]
    pub revision: bool,

    /// Files whose contents are interpreted as typed input
    #[arg(value_name = "FILES")]
    pub files: Vec<PathBuf>,
}

/// Startup values after merging flags, environment, config and defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub history: Option<PathBuf>,
    pub verbosity: u8,
    pub model_dir: Option<PathBuf>,
    pub image_dir: PathBuf,
    pub rc_names: Vec<String>,
    pub width: Option<usize>,
    pub base_url: Option<String>,
}

impl Settings {
    /// Flags win over the config file. `CONFAB_RC` wins over `--rc`.
    pub fn resolve(args: &Args, config: &Config, rc_env: Option<String>) -> Self {
        let history = match args.history.as_deref().or(config.history_file.as_deref()) {
            Some("") => None,
            Some(path) => Some(expand_tilde(path)),
            None => Config::default_history_path(),
        };
        let rc_names = rc_env
            .or_else(|| args.rc.clone())
            .or_else(|| config.rc_names.clone())
            .unwrap_or_else(|| DEFAULT_RC_NAMES.to_string());
        Self {
            model: args.model.clone().or_else(|| config.default_model.clone()),
            prompt: args.prompt.clone().or_else(|| config.prompt.clone()),
            history,
            verbosity: args
                .verbose
                .or(config.verbosity)
                .unwrap_or(DEFAULT_VERBOSITY),
            model_dir: args
                .model_dir
                .as_deref()
                .or(config.model_dir.as_deref())
                .map(expand_tilde),
            image_dir: args
                .image_dir
                .as_deref()
                .or(config.image_dir.as_deref())
                .map(expand_tilde)
                .unwrap_or_else(|| PathBuf::from(".")),
            rc_names: rc_file_names(&rc_names),
            width: config.width,
            base_url: config.base_url.clone(),
        }
    }
}

/// Existing rc files named `names` in every ancestor of `cwd`, root first.
pub fn rc_files(cwd: &Path, names: &[String]) -> Vec<PathBuf> {
    ancestors_top_down(cwd)
        .into_iter()
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .filter(|path| path.is_file())
        .collect()
}

fn push_chunk(header: &mut String, chunk: &str) {
    header.push_str(chunk);
    if !chunk.is_empty() && !chunk.ends_with('\n') {
        header.push('\n');
    }
}

/// The input chunk the operator "types" before the first prompt.
pub fn build_header(
    settings: &Settings,
    args: &Args,
    rc: &[PathBuf],
) -> Result<String, Box<dyn Error>> {
    let mut header = String::new();
    for path in rc {
        let text = fs::read_to_string(path)
            .map_err(|err| format!("Failed to read {}: {err}", path_display(path)))?;
        push_chunk(&mut header, &text);
    }
    if let Some(model) = &settings.model {
        if model.contains(char::is_whitespace) {
            push_chunk(&mut header, &format!("/model \"{model}\""));
        } else {
            push_chunk(&mut header, &format!("/model {model}"));
        }
    }
    if let Some(apikey) = &args.model_apikey {
        push_chunk(&mut header, &format!("/set model apikey {apikey}"));
    }
    for path in &args.files {
        let text = fs::read_to_string(path)
            .map_err(|err| format!("Failed to read {}: {err}", path_display(path)))?;
        push_chunk(&mut header, &text);
    }
    Ok(header)
}

/// `CARGO_PKG_VERSION`, plus the short commit hash when built from git.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("VERGEN_GIT_SHA").and_then(|sha| sha.get(..7)) {
        Some(short) if short.chars().all(|c| c.is_ascii_hexdigit()) => {
            format!("{version}+g{short}")
        }
        _ => version.to_string(),
    }
}

pub fn revision_string() -> &'static str {
    option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .try_init();
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    if args.version {
        println!("{}", version_string());
        return Ok(());
    }
    if args.revision {
        println!("{}", revision_string());
        return Ok(());
    }
    init_tracing();

    let config = Config::load()?;
    let settings = Settings::resolve(&args, &config, std::env::var(RC_ENV).ok());
    let cwd = std::env::current_dir()?;
    let header = build_header(&settings, &args, &rc_files(&cwd, &settings.rc_names))?;
    let batch = !args.files.is_empty() && !args.keep_running;

    tokio::runtime::Runtime::new()?.block_on(async_main(settings, header, batch))
}

async fn async_main(settings: Settings, header: String, batch: bool) -> Result<(), Box<dyn Error>> {
    let logger = Logger::new("session", settings.verbosity);
    let mut repl = Repl::new(
        ActorName::User,
        Box::new(std::io::stdout()),
        logger.for_label("user"),
    )
    .with_version(version_string());
    if let Some(prompt) = &settings.prompt {
        repl.terminal.prompt = prompt.clone();
    }
    repl.terminal.width = settings.width;

    let history = match &settings.history {
        Some(path) => match path.parent().map(fs::create_dir_all).transpose() {
            Ok(_) => Some(History::new(path)),
            Err(err) => {
                logger.warn(format!("History disabled for {}: {err}", path_display(path)));
                None
            }
        },
        None => None,
    };
    let user = UserActor::new(repl, Box::new(StdinLineSource::new(history)))
        .with_pending(header)
        .batch_mode(batch);
    let context = ActorContext {
        model_dir: settings.model_dir,
        image_dir: settings.image_dir,
        base_url: settings.base_url,
        logger,
    };

    Session::new(user, context).run().await;
    Ok(())
}
