//! Definition file parser.
//!
//! The header block runs until the first `%section` marker. Each section
//! runs until the next marker or end of file. Only structural problems are
//! reported here; semantic checks belong to the orchestrator.

pub mod lexer;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use rootstrap_common::error::{BootstrapError, Result};

use self::lexer::HeaderLine;
use crate::model::Definition;

fn parse_err(path: &Path, line: usize, message: impl Into<String>) -> BootstrapError {
    BootstrapError::Parse {
        path: path.to_path_buf(),
        line,
        message: message.into(),
    }
}

/// Opens and parses a definition file, keeping its handle until `close()`.
///
/// # Errors
///
/// Returns [`BootstrapError::Parse`] if the file is missing, unreadable,
/// not UTF-8, or structurally malformed.
pub fn load(path: &Path) -> Result<Definition> {
    tracing::debug!(path = %path.display(), "opening definition");
    let mut file =
        File::open(path).map_err(|e| parse_err(path, 0, format!("cannot open definition: {e}")))?;
    let mut content = String::new();
    let _ = file
        .read_to_string(&mut content)
        .map_err(|e| parse_err(path, 0, format!("cannot read definition: {e}")))?;

    let mut definition = parse_with_path(&content, path.to_path_buf())?;
    definition.attach_source(file);
    Ok(definition)
}

/// Parses definition text held in memory.
///
/// # Errors
///
/// Returns [`BootstrapError::Parse`] on a malformed header line or an
/// invalid section marker.
pub fn parse(input: &str) -> Result<Definition> {
    parse_with_path(input, PathBuf::from("<memory>"))
}

fn parse_with_path(input: &str, path: PathBuf) -> Result<Definition> {
    let mut definition = Definition::new(path);
    let mut current: Option<usize> = None;

    for (idx, line) in input.lines().enumerate() {
        let lineno = idx + 1;

        if lexer::is_marker(line) {
            let marker = lexer::parse_marker(line).ok_or_else(|| {
                parse_err(
                    definition.path(),
                    lineno,
                    format!("invalid section marker: {}", line.trim_end()),
                )
            })?;
            current = Some(definition.open_section(marker.name, marker.args));
            continue;
        }

        match current {
            Some(section) => definition.push_line(section, line),
            None => match lexer::parse_header_line(line) {
                Some(HeaderLine::Entry { key, value }) => {
                    if !definition.insert_header(key, value) {
                        tracing::warn!(key, line = lineno, "duplicate header key ignored");
                    }
                }
                Some(HeaderLine::Blank | HeaderLine::Comment) => {}
                None => {
                    return Err(parse_err(
                        definition.path(),
                        lineno,
                        format!("expected 'Key: value' header line, got: {}", line.trim()),
                    ));
                }
            },
        }
    }

    definition.trim_sections();
    tracing::debug!(
        keys = definition.keys().count(),
        sections = definition.sections().len(),
        "definition parsed"
    );
    Ok(definition)
}

impl Definition {
    /// Opens and parses a definition file. See [`load`].
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Parse`] on a missing or malformed file.
    pub fn load(path: &Path) -> Result<Self> {
        load(path)
    }

    /// Parses definition text held in memory. See [`parse`].
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Parse`] on malformed input.
    pub fn parse(input: &str) -> Result<Self> {
        parse(input)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const CENTOS: &str = r"# CentOS build
BootStrap: yum
Bootstrap: yum
OSVersion: 7
MirrorURL: http://mirror.centos.org/centos-%{OSVERSION}/%{OSVERSION}/os/$basearch/
Include: yum

%setup
    echo 'setup' > $ROOTSTRAP_ROOTFS/setup.txt

%post
    yum -y install vim-minimal
    mkdir /data

%runscript -c /bin/bash
    exec /bin/bash
";

    #[test]
    fn parse_header_and_sections() {
        let def = parse(CENTOS).expect("should parse");
        assert_eq!(def.get("Bootstrap"), Some("yum"));
        assert_eq!(def.get("BootStrap"), Some("yum"));
        assert_eq!(def.get("OSVersion"), Some("7"));
        assert_eq!(def.get("Include"), Some("yum"));
        assert_eq!(def.section("post").len(), 2);
        assert_eq!(def.section("setup").len(), 1);
        assert_eq!(
            def.section_entry("runscript").map(|s| s.args.as_str()),
            Some("-c /bin/bash")
        );
    }

    #[test]
    fn unset_key_and_missing_section_are_empty() {
        let def = parse("Bootstrap: busybox\n").expect("should parse");
        assert_eq!(def.get("From"), None);
        assert!(def.section("post").is_empty());
        assert_eq!(def.script("post"), None);
    }

    #[test]
    fn first_header_value_wins() {
        let def = parse("Bootstrap: docker\nBootstrap: yum\n").expect("should parse");
        assert_eq!(def.get("Bootstrap"), Some("docker"));
        assert_eq!(def.keys().count(), 1);
    }

    #[test]
    fn repeated_sections_concatenate() {
        let input = "Bootstrap: busybox\n%post\necho one\n%setup\ntrue\n%post\necho two\n";
        let def = parse(input).expect("should parse");
        assert_eq!(def.section("post"), ["echo one", "echo two"]);
        assert_eq!(def.sections().len(), 2);
    }

    #[test]
    fn trailing_blank_lines_are_trimmed() {
        let def = parse("%post\necho hi\n\n   \n").expect("should parse");
        assert_eq!(def.section("post"), ["echo hi"]);
        assert_eq!(def.script("post").as_deref(), Some("echo hi\n"));
    }

    #[test]
    fn header_keys_are_case_sensitive() {
        let def = parse("bootstrap: docker\n").expect("should parse");
        assert_eq!(def.get("Bootstrap"), None);
        assert_eq!(def.get("bootstrap"), Some("docker"));
    }

    #[test]
    fn empty_input_yields_empty_definition() {
        let def = parse("").expect("should parse");
        assert_eq!(def.keys().count(), 0);
        assert!(def.sections().is_empty());
    }

    #[test]
    fn section_bodies_are_not_header_checked() {
        let def = parse("%post\nthis line has no colon\n  %indented marker\n").expect("should parse");
        assert_eq!(def.section("post").len(), 2);
    }

    #[test]
    fn malformed_header_reports_line() {
        let err = parse("Bootstrap: busybox\n\nnot a header\n").expect_err("should fail");
        assert!(matches!(err, BootstrapError::Parse { line: 3, .. }));
    }

    #[test]
    fn invalid_section_marker_reports_line() {
        let err = parse("Bootstrap: busybox\n%post\necho\n%\n").expect_err("should fail");
        assert!(matches!(err, BootstrapError::Parse { line: 4, .. }));
    }

    #[test]
    fn load_holds_handle_until_closed() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "Bootstrap: busybox").expect("write");
        let mut def = load(file.path()).expect("should load");
        assert!(def.is_open());
        assert_eq!(def.path(), file.path());
        def.close();
        assert!(!def.is_open());
        def.close();
        assert_eq!(def.get("Bootstrap"), Some("busybox"));
    }

    #[test]
    fn load_missing_file_is_parse_error() {
        let err = load(Path::new("/nonexistent/rootstrap/def")).expect_err("should fail");
        assert!(matches!(err, BootstrapError::Parse { line: 0, .. }));
    }
}
