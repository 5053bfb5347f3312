//! Endpoint URL helpers.

/// Endpoint used when neither the config nor `OPENAI_BASE_URL` name one.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Join a base URL and an endpoint path without doubling slashes.
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

/// Pick the API base URL: explicit setting, then environment, then default.
pub fn resolve_base_url(configured: Option<&str>, env: Option<String>) -> String {
    configured
        .map(str::to_string)
        .or(env)
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}
