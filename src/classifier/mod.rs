//! # Message Classifier
//!
//! Turns one raw server line into exactly one typed chat event. The line
//! marker grammar is a set of compiled regexes supplied by the deployment;
//! the defaults cover the NakenChat telnet dialect.
//!
//! Classification is total: a line no pattern recognizes becomes a
//! `SystemNotice`, so unknown traffic is ignored rather than answered.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.1.0: Configurable grammar overrides, prompt extraction
//! - 1.0.0: Initial NakenChat line classification

use log::debug;
use regex::Regex;

use crate::core::config::GrammarConfig;

/// One line received from the server, stamped with a monotonic sequence
/// number by the connection read loop.
#[derive(Debug, Clone)]
pub struct RawLine {
    pub seq: u64,
    pub text: String,
}

/// Typed view of one server line. Each `RawLine` yields exactly one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Server status traffic, join/leave notices, and anything unparseable.
    SystemNotice { text: String },
    /// Whispered traffic; never answered and never stored.
    PrivateMessage { sender: String, text: String },
    /// Ordinary channel traffic with a recognizable `sender: text` shape.
    PublicMessage { sender: String, text: String },
    /// The bot's own output echoed back by the server.
    SelfEcho { text: String },
}

/// Compiled line marker grammar.
///
/// Public and private patterns must capture `sender` and `text` named
/// groups; system patterns are plain matches.
pub struct LineGrammar {
    system: Vec<Regex>,
    private: Vec<Regex>,
    public: Vec<Regex>,
}

/// NakenChat system/status markers.
const NAKENCHAT_SYSTEM: &[&str] = &[
    r"^>>\s",
    r"^\[.*\]\s*$",
    r"^Total:\s*\d+",
    r"^Name\s+Channel\s+Location",
    r"^List of commands:",
    r"^You just logged on",
    r"^(?:has joined|has left|has quit)",
    r"^https?://",
    r"^email:",
    r"^Command from https:",
    r"^Message sent to \[\d+\]",
];

/// NakenChat whisper markers, e.g. `<9>bob (private): hi`.
const NAKENCHAT_PRIVATE: &[&str] = &[r"^<\d+>\s*(?P<sender>[^:]+?)\s*\(private\):\s*(?P<text>.*)$"];

/// NakenChat public formats: `[1]bob: hi`, `<1>bob: hi`, `bob: hi`.
const NAKENCHAT_PUBLIC: &[&str] = &[
    r"^\[\d+\]\s*(?P<sender>[^:]+?)\s*:\s*(?P<text>.+)$",
    r"^<\d+>\s*(?P<sender>[^:]+?)\s*:\s*(?P<text>.+)$",
    r"^(?P<sender>[^:\s][^:]*?)\s*:\s*(?P<text>.+)$",
];

impl LineGrammar {
    /// The built-in NakenChat grammar.
    pub fn nakenchat() -> Self {
        // Built-in patterns are compile-time constants; they always parse.
        Self::from_patterns(NAKENCHAT_SYSTEM, NAKENCHAT_PRIVATE, NAKENCHAT_PUBLIC)
            .unwrap_or_else(|e| panic!("builtin grammar failed to compile: {e}"))
    }

    /// Compile a grammar from deployment-supplied pattern lists.
    pub fn from_patterns<S: AsRef<str>>(
        system: &[S],
        private: &[S],
        public: &[S],
    ) -> Result<Self, regex::Error> {
        let compile = |patterns: &[S]| -> Result<Vec<Regex>, regex::Error> {
            patterns.iter().map(|p| Regex::new(p.as_ref())).collect()
        };
        Ok(LineGrammar {
            system: compile(system)?,
            private: compile(private)?,
            public: compile(public)?,
        })
    }

    /// Build a grammar from config, falling back to NakenChat defaults for
    /// any empty section.
    pub fn from_config(config: &GrammarConfig) -> Result<Self, regex::Error> {
        let system: Vec<&str> = if config.system.is_empty() {
            NAKENCHAT_SYSTEM.to_vec()
        } else {
            config.system.iter().map(String::as_str).collect()
        };
        let private: Vec<&str> = if config.private.is_empty() {
            NAKENCHAT_PRIVATE.to_vec()
        } else {
            config.private.iter().map(String::as_str).collect()
        };
        let public: Vec<&str> = if config.public.is_empty() {
            NAKENCHAT_PUBLIC.to_vec()
        } else {
            config.public.iter().map(String::as_str).collect()
        };
        Self::from_patterns(&system, &private, &public)
    }
}

/// Classifies raw lines against a fixed grammar and the bot's own identity.
pub struct MessageClassifier {
    grammar: LineGrammar,
    bot_username: String,
}

impl MessageClassifier {
    pub fn new(grammar: LineGrammar, bot_username: impl Into<String>) -> Self {
        MessageClassifier {
            grammar,
            bot_username: bot_username.into(),
        }
    }

    /// Map one raw line to its event. Total: every line yields something.
    pub fn classify(&self, line: &RawLine) -> ChatEvent {
        let text = line.text.as_str();

        for pattern in &self.grammar.system {
            if pattern.is_match(text) {
                return ChatEvent::SystemNotice {
                    text: text.to_string(),
                };
            }
        }

        for pattern in &self.grammar.private {
            if let Some(caps) = pattern.captures(text) {
                return ChatEvent::PrivateMessage {
                    sender: named_group(&caps, "sender"),
                    text: named_group(&caps, "text"),
                };
            }
        }

        for pattern in &self.grammar.public {
            if let Some(caps) = pattern.captures(text) {
                let sender = named_group(&caps, "sender");
                let body = named_group(&caps, "text");
                if sender == self.bot_username {
                    return ChatEvent::SelfEcho { text: body };
                }
                return ChatEvent::PublicMessage { sender, text: body };
            }
        }

        debug!("unparseable line treated as system notice: {text:?}");
        ChatEvent::SystemNotice {
            text: text.to_string(),
        }
    }
}

fn named_group(caps: &regex::Captures<'_>, name: &str) -> String {
    caps.name(name)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// Whether `text` addresses the bot: the trigger word appears as a
/// case-insensitive whole-word match.
pub fn is_triggered(text: &str, trigger: &str) -> bool {
    if trigger.is_empty() {
        return false;
    }
    let haystack = text.to_lowercase();
    let needle = trigger.to_lowercase();

    let mut start = 0;
    while let Some(pos) = haystack[start..].find(&needle) {
        let begin = start + pos;
        let end = begin + needle.len();
        let boundary_before = haystack[..begin]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let boundary_after = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if boundary_before && boundary_after {
            return true;
        }
        start = end;
    }
    false
}

/// Extract the prompt that follows the trigger word, stripping one leading
/// separator. Returns `None` when nothing usable follows the trigger.
pub fn extract_prompt(text: &str, trigger: &str) -> Option<String> {
    let haystack = text.to_lowercase();
    let needle = trigger.to_lowercase();
    let pos = haystack.find(&needle)?;
    let end = pos + needle.len();

    // Lowercasing can shift byte offsets for some scripts; fall back to the
    // whole message rather than slicing off-boundary.
    if haystack.len() != text.len() || !text.is_char_boundary(end) {
        let trimmed = text.trim();
        return if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
    }

    let mut rest = text[end..].trim_start();
    for sep in [':', ',', '-', '>', '|'] {
        if let Some(stripped) = rest.strip_prefix(sep) {
            rest = stripped.trim_start();
            break;
        }
    }
    let rest = rest.trim_end();
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> MessageClassifier {
        MessageClassifier::new(LineGrammar::nakenchat(), "Mia")
    }

    fn classify(text: &str) -> ChatEvent {
        classifier().classify(&RawLine {
            seq: 1,
            text: text.to_string(),
        })
    }

    #[test]
    fn private_markers_always_classify_private() {
        match classify("<9>bob (private): Mia, tell me a secret") {
            ChatEvent::PrivateMessage { sender, text } => {
                assert_eq!(sender, "bob");
                assert_eq!(text, "Mia, tell me a secret");
            }
            other => panic!("expected private message, got {other:?}"),
        }
    }

    #[test]
    fn system_markers_classify_system() {
        for line in [
            ">> server will restart soon",
            "Total: 12 users online",
            "You just logged on",
            "Message sent to [9]bob: <1>Mia (private): hi",
            "http://example.org email: admin@example.org",
        ] {
            assert!(
                matches!(classify(line), ChatEvent::SystemNotice { .. }),
                "line should be a system notice: {line}"
            );
        }
    }

    #[test]
    fn public_formats_extract_sender_and_body() {
        for line in ["[3]alice: hello there", "<3>alice: hello there", "alice: hello there"] {
            match classify(line) {
                ChatEvent::PublicMessage { sender, text } => {
                    assert_eq!(sender, "alice");
                    assert_eq!(text, "hello there");
                }
                other => panic!("expected public message for {line}, got {other:?}"),
            }
        }
    }

    #[test]
    fn own_lines_classify_self_echo_even_with_trigger() {
        match classify("[1]Mia: Mia thinks this is fine") {
            ChatEvent::SelfEcho { text } => assert_eq!(text, "Mia thinks this is fine"),
            other => panic!("expected self echo, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_lines_fall_back_to_system_notice() {
        assert!(matches!(
            classify("garbage without any colon"),
            ChatEvent::SystemNotice { .. }
        ));
    }

    #[test]
    fn trigger_is_case_insensitive_whole_word() {
        assert!(is_triggered("mia, hello", "Mia"));
        assert!(is_triggered("hey MIA!", "Mia"));
        assert!(is_triggered("Mia", "Mia"));
        assert!(!is_triggered("miasma everywhere", "Mia"));
        assert!(!is_triggered("academia rules", "Mia"));
        assert!(!is_triggered("nothing here", "Mia"));
        assert!(!is_triggered("anything", ""));
    }

    #[test]
    fn prompt_extraction_strips_trigger_and_separator() {
        assert_eq!(extract_prompt("Mia, hello", "Mia").as_deref(), Some("hello"));
        assert_eq!(
            extract_prompt("mia: what is rust?", "Mia").as_deref(),
            Some("what is rust?")
        );
        assert_eq!(
            extract_prompt("so Mia - tell me", "Mia").as_deref(),
            Some("tell me")
        );
        assert_eq!(extract_prompt("Mia", "Mia"), None);
        assert_eq!(extract_prompt("Mia,  ", "Mia"), None);
    }

    #[test]
    fn grammar_overrides_replace_defaults() {
        let config = GrammarConfig {
            system: vec![r"^\*\*\*".to_string()],
            private: vec![r"^@(?P<sender>\w+) whispers: (?P<text>.+)$".to_string()],
            public: vec![r"^(?P<sender>\w+)> (?P<text>.+)$".to_string()],
        };
        let grammar = LineGrammar::from_config(&config).unwrap();
        let classifier = MessageClassifier::new(grammar, "Mia");
        let classify = |text: &str| {
            classifier.classify(&RawLine {
                seq: 0,
                text: text.to_string(),
            })
        };

        assert!(matches!(
            classify("*** motd ***"),
            ChatEvent::SystemNotice { .. }
        ));
        assert!(matches!(
            classify("@bob whispers: psst"),
            ChatEvent::PrivateMessage { .. }
        ));
        match classify("alice> hi all") {
            ChatEvent::PublicMessage { sender, text } => {
                assert_eq!(sender, "alice");
                assert_eq!(text, "hi all");
            }
            other => panic!("expected public message, got {other:?}"),
        }
    }

    #[test]
    fn bad_override_pattern_is_an_error() {
        let config = GrammarConfig {
            system: vec!["([unclosed".to_string()],
            ..Default::default()
        };
        assert!(LineGrammar::from_config(&config).is_err());
    }
}
