/// Line-preserving INI model used for flag files and the settings file.
///
/// Every input line is kept verbatim, terminator included, so rendering an
/// untouched document reproduces the input byte-for-byte. [`IniDocument::set`]
/// only replaces the value span of the matching entry: the key's on-disk
/// spelling, the spacing around `=`, comments, unknown keys and line endings
/// all survive a rewrite.
///
/// Format:
///   - `;` or `#` lines are comments
///   - `[Section]` opens a section
///   - `key = value` sets a key in the most recent section
///   - section and key lookups are case-insensitive; the first match wins
use std::fmt;
use std::ops::Range;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IniError {
    /// The requested key does not exist. Keys are never inserted.
    #[error("key `{key}` not found in section [{section}]")]
    KeyNotFound { section: String, key: String },
}

#[derive(Debug, Clone)]
enum LineKind {
    Blank,
    Comment,
    Section,
    Entry {
        section: String,
        key: String,
        /// Byte span of the trimmed value inside `Line::raw`.
        value: Range<usize>,
    },
    /// Anything else (no `=`, unterminated header, …). Kept, never interpreted.
    Other,
}

#[derive(Debug, Clone)]
struct Line {
    raw: String,
    kind: LineKind,
}

/// An ordered, line-preserving view of an INI file.
#[derive(Debug, Clone, Default)]
pub struct IniDocument {
    lines: Vec<Line>,
}

impl IniDocument {
    pub fn parse(text: &str) -> Self {
        let mut section = String::new();
        let lines = text
            .split_inclusive('\n')
            .map(|raw| Line {
                raw: raw.to_string(),
                kind: classify(raw, &mut section),
            })
            .collect();
        Self { lines }
    }

    /// Reads and parses the file at `path`.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Returns the trimmed value of `key` in `section`, if present.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.find(section, key)
            .map(|(index, span)| &self.lines[index].raw[span])
    }

    /// Returns `key` in `section` parsed with [`parse_bool`].
    pub fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        self.get(section, key).map(parse_bool)
    }

    /// Replaces the value of an existing `key` in `section`.
    ///
    /// Returns [`IniError::KeyNotFound`] without touching the document if the
    /// key is absent.
    pub fn set(&mut self, section: &str, key: &str, value: &str) -> Result<(), IniError> {
        let (index, span) = self.find(section, key).ok_or_else(|| IniError::KeyNotFound {
            section: section.to_string(),
            key: key.to_string(),
        })?;

        let line = &mut self.lines[index];
        line.raw.replace_range(span.clone(), value);
        if let LineKind::Entry { value: stored, .. } = &mut line.kind {
            *stored = span.start..span.start + value.len();
        }
        Ok(())
    }

    fn find(&self, section: &str, key: &str) -> Option<(usize, Range<usize>)> {
        self.lines.iter().enumerate().find_map(|(index, line)| match &line.kind {
            LineKind::Entry {
                section: s,
                key: k,
                value,
            } if s.eq_ignore_ascii_case(section) && k.eq_ignore_ascii_case(key) => {
                Some((index, value.clone()))
            }
            _ => None,
        })
    }
}

impl fmt::Display for IniDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            f.write_str(&line.raw)?;
        }
        Ok(())
    }
}

/// `true`, `1` and `yes` (any case) are true; everything else is false.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

fn classify(raw: &str, current_section: &mut String) -> LineKind {
    let content = raw.trim_end_matches(|c| c == '\n' || c == '\r');
    let trimmed = content.trim();

    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if trimmed.starts_with(';') || trimmed.starts_with('#') {
        return LineKind::Comment;
    }
    if trimmed.len() >= 2 && trimmed.starts_with('[') && trimmed.ends_with(']') {
        *current_section = trimmed[1..trimmed.len() - 1].trim().to_string();
        return LineKind::Section;
    }

    let Some(eq) = content.find('=') else {
        return LineKind::Other;
    };
    let after = &content[eq + 1..];
    let start = eq + 1 + (after.len() - after.trim_start().len());
    let end = start + after.trim().len();

    LineKind::Entry {
        section: current_section.clone(),
        key: content[..eq].trim().to_string(),
        value: start..end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "; host flags\n[Active]\nactive_host = false\n";

    // ── lookup ────────────────────────────────────────────────────────────────

    #[test]
    fn get_reads_value_in_section() {
        let doc = IniDocument::parse(HOST);
        assert_eq!(doc.get("Active", "active_host"), Some("false"));
    }

    #[test]
    fn section_and_key_lookup_is_case_insensitive() {
        let doc = IniDocument::parse("[Active]\nactive_host = true\n");
        for section in ["Active", "active", "ACTIVE"] {
            for key in ["active_host", "ACTIVE_HOST", "Active_Host"] {
                assert_eq!(doc.get_bool(section, key), Some(true), "{section}/{key}");
            }
        }
    }

    #[test]
    fn comments_are_not_entries() {
        let doc = IniDocument::parse("[A]\n; x = true\n# y = true\nz = true\n");
        assert_eq!(doc.get("A", "x"), None);
        assert_eq!(doc.get("A", "y"), None);
        assert_eq!(doc.get("A", "z"), Some("true"));
    }

    #[test]
    fn same_key_in_other_section_is_not_matched() {
        let doc = IniDocument::parse("[NPC_tracking]\nstart = true\n[Plugin_Outfits]\nstart = false\n");
        assert_eq!(doc.get_bool("Plugin_Outfits", "start"), Some(false));
        assert_eq!(doc.get_bool("NPC_tracking", "start"), Some(true));
    }

    #[test]
    fn first_matching_entry_wins() {
        let doc = IniDocument::parse("[A]\nk = 1\nk = 0\n");
        assert_eq!(doc.get("A", "k"), Some("1"));
    }

    #[test]
    fn whitespace_around_key_and_value_is_trimmed() {
        let doc = IniDocument::parse("[ Volume Control ]\n\t SoundVolume\t=   0.5  \r\n");
        assert_eq!(doc.get("volume control", "soundvolume"), Some("0.5"));
    }

    #[test]
    fn keys_before_any_section_use_the_empty_section() {
        let doc = IniDocument::parse("loose = yes\n[A]\n");
        assert_eq!(doc.get_bool("", "loose"), Some(true));
    }

    #[test]
    fn missing_key_returns_none() {
        let doc = IniDocument::parse(HOST);
        assert_eq!(doc.get("Active", "MCM"), None);
        assert_eq!(doc.get_bool("Missing", "active_host"), None);
    }

    // ── parse_bool ────────────────────────────────────────────────────────────

    #[test]
    fn parse_bool_true_tokens() {
        for v in ["true", "TRUE", "True", "1", "yes", "YES", " yes "] {
            assert!(parse_bool(v), "{v}");
        }
    }

    #[test]
    fn parse_bool_everything_else_is_false() {
        for v in ["false", "0", "no", "", "on", "2", "truee"] {
            assert!(!parse_bool(v), "{v}");
        }
    }

    // ── rendering / set ───────────────────────────────────────────────────────

    #[test]
    fn untouched_document_renders_identically() {
        let text = "; c\r\n[A]\r\nk = v ; inline\r\n\r\njunk line\n[broken\nlast=1";
        assert_eq!(IniDocument::parse(text).to_string(), text);
    }

    #[test]
    fn set_replaces_only_the_value() {
        let mut doc = IniDocument::parse(HOST);
        doc.set("active", "ACTIVE_HOST", "true").unwrap();
        assert_eq!(doc.to_string(), "; host flags\n[Active]\nactive_host = true\n");
    }

    #[test]
    fn set_preserves_spacing_and_line_endings() {
        let mut doc = IniDocument::parse("[Act3_JSON]\r\nstartAct3=true  \r\nother = 1\r\n");
        doc.set("Act3_JSON", "startact3", "false").unwrap();
        assert_eq!(doc.to_string(), "[Act3_JSON]\r\nstartAct3=false  \r\nother = 1\r\n");
    }

    #[test]
    fn set_twice_uses_updated_span() {
        let mut doc = IniDocument::parse("[A]\nk = false\n");
        doc.set("A", "k", "true").unwrap();
        doc.set("A", "k", "false").unwrap();
        assert_eq!(doc.to_string(), "[A]\nk = false\n");
        assert_eq!(doc.get("A", "k"), Some("false"));
    }

    #[test]
    fn set_on_empty_value_inserts_text() {
        let mut doc = IniDocument::parse("[A]\nk =\n");
        doc.set("A", "k", "true").unwrap();
        assert_eq!(doc.get("A", "k"), Some("true"));
    }

    #[test]
    fn set_missing_key_fails_and_leaves_document_unchanged() {
        let mut doc = IniDocument::parse(HOST);
        let err = doc.set("Active", "MCM", "false").unwrap_err();
        assert_eq!(
            err,
            IniError::KeyNotFound {
                section: "Active".to_string(),
                key: "MCM".to_string()
            }
        );
        assert_eq!(doc.to_string(), HOST);
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MCM.ini");
        std::fs::write(&path, "[Active_MCM]\nMCM = yes\n").unwrap();
        let doc = IniDocument::load(&path).unwrap();
        assert_eq!(doc.get_bool("active_mcm", "mcm"), Some(true));
    }
}
