//! Named in-memory buffers and typed reference resolution.

use crate::core::error::ReferenceError;
use crate::core::stream::{contents_to_text, Content};
use crate::utils::paths::expand_tilde;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;

/// Pending operator input awaiting dispatch.
pub const IN: &str = "in";
/// Last rendered actor output.
pub const OUT: &str = "out";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefSchema {
    /// The value itself, read-only.
    Verbatim,
    File,
    BinaryFile,
    Buffer,
}

impl RefSchema {
    pub const ALL: [&'static str; 5] = ["verbatim", "file", "bfile", "buffer", "buf"];

    pub fn as_str(&self) -> &'static str {
        match self {
            RefSchema::Verbatim => "verbatim",
            RefSchema::File => "file",
            RefSchema::BinaryFile => "bfile",
            RefSchema::Buffer => "buffer",
        }
    }
}

impl FromStr for RefSchema {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verbatim" => Ok(RefSchema::Verbatim),
            "file" => Ok(RefSchema::File),
            "bfile" => Ok(RefSchema::BinaryFile),
            "buffer" | "buf" => Ok(RefSchema::Buffer),
            other => Err(ReferenceError::UnsupportedSchema(other.to_string())),
        }
    }
}

impl fmt::Display for RefSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved `schema:value` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ref {
    pub schema: RefSchema,
    pub value: String,
}

impl Ref {
    pub fn new(schema: RefSchema, value: impl Into<String>) -> Self {
        Self {
            schema,
            value: value.into(),
        }
    }

    pub fn buffer(name: impl Into<String>) -> Self {
        Self::new(RefSchema::Buffer, name)
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.contains(char::is_whitespace) {
            write!(f, "{}:\"{}\"", self.schema, self.value)
        } else {
            write!(f, "{}:{}", self.schema, self.value)
        }
    }
}

/// Buffers keyed by lowercase name.
#[derive(Debug, Clone, Default)]
pub struct BufferStore {
    buffers: BTreeMap<String, Vec<Content>>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current items of a buffer; empty if it was never written.
    pub fn get(&self, name: &str) -> &[Content] {
        self.buffers
            .get(&name.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn text(&self, name: &str) -> String {
        contents_to_text(self.get(name))
    }

    pub fn set(&mut self, name: &str, items: Vec<Content>) {
        self.buffers.insert(name.to_lowercase(), items);
    }

    pub fn extend(&mut self, name: &str, items: Vec<Content>) {
        let buf = self.buffers.entry(name.to_lowercase()).or_default();
        for item in items {
            push_item(buf, item);
        }
    }

    /// Append text, merging with a trailing text item.
    pub fn push_text(&mut self, name: &str, text: &str) {
        if text.is_empty() {
            return;
        }
        self.extend(name, vec![Content::text(text)]);
    }

    /// Remove and return a buffer's items.
    pub fn take(&mut self, name: &str) -> Vec<Content> {
        self.buffers
            .insert(name.to_lowercase(), Vec::new())
            .unwrap_or_default()
    }

    pub fn clear(&mut self, name: &str) {
        self.set(name, Vec::new());
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(String::as_str)
    }

    pub fn ref_read(&self, r: &Ref) -> Result<Vec<Content>, ReferenceError> {
        match r.schema {
            RefSchema::Verbatim => Ok(vec![Content::text(r.value.clone())]),
            RefSchema::File => {
                let path = expand_tilde(&r.value);
                let text =
                    std::fs::read_to_string(&path).map_err(|e| ReferenceError::io(&path, e))?;
                Ok(vec![Content::Text(text.trim_end().to_string())])
            }
            RefSchema::BinaryFile => {
                let path = expand_tilde(&r.value);
                let bytes = std::fs::read(&path).map_err(|e| ReferenceError::io(&path, e))?;
                Ok(vec![Content::Binary(bytes)])
            }
            RefSchema::Buffer => Ok(self.get(&r.value).to_vec()),
        }
    }

    /// Read a reference and flatten it into text.
    pub fn ref_read_text(&self, r: &Ref) -> Result<String, ReferenceError> {
        let items = self.ref_read(r)?;
        Ok(items
            .iter()
            .map(|item| match item {
                Content::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                other => contents_to_text(std::slice::from_ref(other)),
            })
            .collect())
    }

    pub fn ref_write(
        &mut self,
        r: &Ref,
        items: Vec<Content>,
        append: bool,
    ) -> Result<(), ReferenceError> {
        match r.schema {
            RefSchema::Verbatim => Err(ReferenceError::ReadOnly(r.to_string())),
            RefSchema::File | RefSchema::BinaryFile => {
                let path = expand_tilde(&r.value);
                let mut file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(append)
                    .truncate(!append)
                    .open(&path)
                    .map_err(|e| ReferenceError::io(&path, e))?;
                for item in &items {
                    let res = match item {
                        Content::Binary(bytes) => file.write_all(bytes),
                        Content::Text(s) => file.write_all(s.as_bytes()),
                        Content::Ref(reference) => {
                            file.write_all(format!("<{reference}>").as_bytes())
                        }
                    };
                    res.map_err(|e| ReferenceError::io(&path, e))?;
                }
                Ok(())
            }
            RefSchema::Buffer => {
                if append {
                    self.extend(&r.value, items);
                } else {
                    self.set(&r.value, Vec::new());
                    self.extend(&r.value, items);
                }
                Ok(())
            }
        }
    }
}

fn push_item(buf: &mut Vec<Content>, item: Content) {
    match (buf.last_mut(), item) {
        (Some(Content::Text(last)), Content::Text(s)) => last.push_str(&s),
        (Some(Content::Binary(last)), Content::Binary(b)) => last.extend_from_slice(&b),
        (_, item) => buf.push(item),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn buffer_names_are_case_insensitive() {
        let mut store = BufferStore::new();
        store.push_text("Notes", "a");
        store.push_text("NOTES", "b");
        assert_eq!(store.text("notes"), "ab");
        assert_eq!(store.get("notes").len(), 1);
    }

    #[test]
    fn unwritten_buffers_read_as_empty() {
        let store = BufferStore::new();
        assert!(store.ref_read(&Ref::buffer("nothing")).unwrap().is_empty());
    }

    #[test]
    fn verbatim_reads_the_value_and_rejects_writes() {
        let mut store = BufferStore::new();
        let r = Ref::new(RefSchema::Verbatim, "ls -l");
        assert_eq!(store.ref_read_text(&r).unwrap(), "ls -l");
        let err = store.ref_write(&r, vec![Content::text("x")], false);
        assert!(matches!(err, Err(ReferenceError::ReadOnly(_))));
    }

    #[test]
    fn file_reads_strip_trailing_whitespace() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.txt");
        std::fs::write(&path, "  hello\n\n").unwrap();
        let r = Ref::new(RefSchema::File, path.to_string_lossy());
        assert_eq!(
            BufferStore::new().ref_read(&r).unwrap(),
            vec![Content::text("  hello")]
        );
    }

    #[test]
    fn file_writes_replace_or_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.txt");
        let r = Ref::new(RefSchema::File, path.to_string_lossy());
        let mut store = BufferStore::new();
        store.ref_write(&r, vec![Content::text("one")], false).unwrap();
        store.ref_write(&r, vec![Content::text("two")], true).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "onetwo");
        store.ref_write(&r, vec![Content::text("three")], false).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "three");
    }

    #[test]
    fn binary_files_round_trip_through_buffers() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.bin");
        std::fs::write(&src, [0u8, 159, 146, 150]).unwrap();
        let mut store = BufferStore::new();
        let items = store
            .ref_read(&Ref::new(RefSchema::BinaryFile, src.to_string_lossy()))
            .unwrap();
        store.ref_write(&Ref::buffer("out"), items, false).unwrap();
        assert_eq!(store.get("out"), &[Content::Binary(vec![0, 159, 146, 150])]);
    }

    #[test]
    fn missing_files_are_reference_errors() {
        let r = Ref::new(RefSchema::File, "/definitely/not/here.txt");
        assert!(matches!(
            BufferStore::new().ref_read(&r),
            Err(ReferenceError::Io { .. })
        ));
    }

    #[test]
    fn schema_aliases_parse() {
        assert_eq!("buf".parse::<RefSchema>().unwrap(), RefSchema::Buffer);
        assert!("http".parse::<RefSchema>().is_err());
    }
}
