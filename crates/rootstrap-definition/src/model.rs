//! In-memory model of a parsed bootstrap definition.
//!
//! The model is a pure data holder: it answers lookups and never decides
//! whether a definition is semantically complete.

use std::fs::File;
use std::path::{Path, PathBuf};

/// A named section and its raw body lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name without the leading `%`.
    pub name: String,
    /// Arguments given on the first marker line for this section.
    pub args: String,
    /// Body lines, verbatim, in file order.
    pub lines: Vec<String>,
}

/// A parsed bootstrap definition.
#[derive(Debug)]
pub struct Definition {
    path: PathBuf,
    header: Vec<(String, String)>,
    sections: Vec<Section>,
    source: Option<File>,
}

impl Definition {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            header: Vec::new(),
            sections: Vec::new(),
            source: None,
        }
    }

    pub(crate) fn attach_source(&mut self, file: File) {
        self.source = Some(file);
    }

    /// Records a header entry. The first value for a key wins.
    ///
    /// Returns `false` when the key was already present.
    pub(crate) fn insert_header(&mut self, key: &str, value: &str) -> bool {
        if self.header.iter().any(|(k, _)| k == key) {
            return false;
        }
        self.header.push((key.to_owned(), value.to_owned()));
        true
    }

    /// Opens a section, merging into an earlier one of the same name.
    ///
    /// Returns the index of the section that receives subsequent lines.
    pub(crate) fn open_section(&mut self, name: &str, args: &str) -> usize {
        if let Some(idx) = self.sections.iter().position(|s| s.name == name) {
            return idx;
        }
        self.sections.push(Section {
            name: name.to_owned(),
            args: args.to_owned(),
            lines: Vec::new(),
        });
        self.sections.len() - 1
    }

    pub(crate) fn push_line(&mut self, section: usize, line: &str) {
        if let Some(s) = self.sections.get_mut(section) {
            s.lines.push(line.to_owned());
        }
    }

    pub(crate) fn trim_sections(&mut self) {
        for section in &mut self.sections {
            while section.lines.last().is_some_and(|l| l.trim().is_empty()) {
                let _ = section.lines.pop();
            }
        }
    }

    /// Path the definition was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the value of a header key, or `None` when unset.
    ///
    /// Keys are matched case-sensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.header
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the body lines of a section, or an empty slice when absent.
    pub fn section(&self, name: &str) -> &[String] {
        self.section_entry(name)
            .map(|s| s.lines.as_slice())
            .unwrap_or(&[])
    }

    /// Returns the full section entry, including marker arguments.
    pub fn section_entry(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Returns a section body joined into one script.
    pub fn script(&self, name: &str) -> Option<String> {
        let lines = self.section(name);
        if lines.iter().all(|l| l.trim().is_empty()) {
            return None;
        }
        let mut script = lines.join("\n");
        script.push('\n');
        Some(script)
    }

    /// Header keys in file order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.header.iter().map(|(k, _)| k.as_str())
    }

    /// Sections in file order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Returns whether the underlying file handle is still held.
    pub const fn is_open(&self) -> bool {
        self.source.is_some()
    }

    /// Releases the underlying file handle. Calling it twice is harmless.
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            tracing::debug!(path = %self.path.display(), "definition closed");
        }
    }
}
