pub mod line_source;
pub mod paths;
#[cfg(test)]
pub mod test_utils;
pub mod text_wrapping;
pub mod url;
