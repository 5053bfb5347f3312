use serde::{Deserialize, Serialize};

/// Comma separated rc file names looked up in every ancestor directory.
pub const DEFAULT_RC_NAMES: &str = "_confab,.confab";

/// The `rc_names` value that disables rc lookup.
pub const RC_DISABLED: &str = "none";

/// Values read from `config.toml`. Every key is optional; command-line flags
/// take precedence over anything set here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub prompt: Option<String>,
    /// Empty string disables history.
    pub history_file: Option<String>,
    pub verbosity: Option<u8>,
    pub model_dir: Option<String>,
    pub image_dir: Option<String>,
    pub rc_names: Option<String>,
    /// `[PROVIDER:]NAME` selected at startup when `--model` is absent.
    pub default_model: Option<String>,
    pub width: Option<usize>,
    /// Base URL of the OpenAI-compatible endpoint.
    pub base_url: Option<String>,
}

/// Split an `rc_names` value into file names. `none` yields nothing.
pub fn rc_file_names(names: &str) -> Vec<String> {
    if names.trim() == RC_DISABLED {
        return Vec::new();
    }
    names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
