//! Line classification for definition files using `nom`.
//!
//! A definition file is line-oriented: every line is either trivia, a
//! `Key: value` header entry, a `%name` section marker, or raw section body.
//! This module only classifies single lines; the parser in [`super`]
//! decides which classes are legal where.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, space0, space1},
    combinator::{eof, rest},
    sequence::preceded,
};

/// A classified header-block line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderLine<'a> {
    /// Empty or whitespace-only line.
    Blank,
    /// `#` comment line.
    Comment,
    /// `Key: value` entry. The value is trimmed.
    Entry {
        /// Header key, case preserved.
        key: &'a str,
        /// Header value with surrounding whitespace removed.
        value: &'a str,
    },
}

/// A `%name [args]` section marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionMarker<'a> {
    /// Section name without the leading `%`.
    pub name: &'a str,
    /// Remainder of the marker line, trimmed. Empty when absent.
    pub args: &'a str,
}

const fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}

const fn is_section_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn header_entry(input: &str) -> IResult<&str, HeaderLine<'_>> {
    let (input, key) = take_while1(is_key_char).parse(input)?;
    let (input, _) = (space0, char(':'), space0).parse(input)?;
    let (input, value) = rest(input)?;
    Ok((
        input,
        HeaderLine::Entry {
            key,
            value: value.trim_end(),
        },
    ))
}

fn section_marker(input: &str) -> IResult<&str, SectionMarker<'_>> {
    let (input, name) = preceded(char('%'), take_while1(is_section_char)).parse(input)?;
    let (input, args) = alt((
        preceded(space1, rest),
        preceded(take_while(|c: char| c.is_whitespace()), eof),
    ))
    .parse(input)?;
    Ok((
        input,
        SectionMarker {
            name,
            args: args.trim(),
        },
    ))
}

/// Returns whether the line opens a section, valid or not.
///
/// Only a `%` in the first column counts; indented `%` belongs to the body.
pub fn is_marker(line: &str) -> bool {
    line.starts_with('%')
}

/// Parses a section marker line.
///
/// Returns `None` when the line starts with `%` but the name is empty or
/// contains characters outside `[A-Za-z0-9_-]`.
pub fn parse_marker(line: &str) -> Option<SectionMarker<'_>> {
    section_marker(line).ok().map(|(_, marker)| marker)
}

/// Classifies a header-block line.
///
/// Returns `None` when the line is neither trivia nor a well-formed entry.
pub fn parse_header_line(line: &str) -> Option<HeaderLine<'_>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Some(HeaderLine::Blank);
    }
    if trimmed.starts_with('#') {
        return Some(HeaderLine::Comment);
    }
    header_entry(trimmed).ok().map(|(_, entry)| entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_entry_splits_key_and_value() {
        assert_eq!(
            parse_header_line("Bootstrap: docker"),
            Some(HeaderLine::Entry {
                key: "Bootstrap",
                value: "docker"
            })
        );
    }

    #[test]
    fn header_value_keeps_inner_colons() {
        assert_eq!(
            parse_header_line("MirrorURL: http://mirror.centos.org/centos-%{OSVERSION}/"),
            Some(HeaderLine::Entry {
                key: "MirrorURL",
                value: "http://mirror.centos.org/centos-%{OSVERSION}/"
            })
        );
    }

    #[test]
    fn header_tolerates_space_before_colon() {
        assert_eq!(
            parse_header_line("  From :  ubuntu:22.04  "),
            Some(HeaderLine::Entry {
                key: "From",
                value: "ubuntu:22.04"
            })
        );
    }

    #[test]
    fn empty_value_is_allowed() {
        assert_eq!(
            parse_header_line("Include:"),
            Some(HeaderLine::Entry {
                key: "Include",
                value: ""
            })
        );
    }

    #[test]
    fn trivia_lines() {
        assert_eq!(parse_header_line("   "), Some(HeaderLine::Blank));
        assert_eq!(parse_header_line("# comment"), Some(HeaderLine::Comment));
    }

    #[test]
    fn line_without_colon_is_rejected() {
        assert_eq!(parse_header_line("Bootstrap docker"), None);
        assert_eq!(parse_header_line(": value"), None);
    }

    #[test]
    fn marker_with_args() {
        assert_eq!(
            parse_marker("%runscript -c /bin/bash"),
            Some(SectionMarker {
                name: "runscript",
                args: "-c /bin/bash"
            })
        );
    }

    #[test]
    fn bare_marker() {
        assert_eq!(
            parse_marker("%post  "),
            Some(SectionMarker {
                name: "post",
                args: ""
            })
        );
    }

    #[test]
    fn malformed_markers() {
        assert!(is_marker("%"));
        assert_eq!(parse_marker("%"), None);
        assert_eq!(parse_marker("%po$t"), None);
        assert!(!is_marker("  %post"));
    }
}
