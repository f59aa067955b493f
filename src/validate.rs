//! Response validation for structured model output.
//!
//! The model is asked to answer with exactly one ```` ```json ```` fenced block.
//! This module pulls that block out of the accumulated text, normalizes the
//! usual model quirks (smart quotes, stray control characters, line breaks),
//! parses it, decides which schema it matches, and validates it strictly.
//!
//! Command responses additionally go through a safety check. A suggestion that
//! matches any [`UnsafePattern`] is rejected with
//! [`ValidationError::UnsafeCommand`], which callers must not retry.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;

use crate::response::{CommandAnalysis, FileAnalysis, ResponseEnvelope, ResponseKind};

/// Opening marker of the fenced block the model must emit
pub const FENCE_OPEN: &str = "```json";

/// Closing marker of the fenced block
pub const FENCE_CLOSE: &str = "```";

/// Key whose presence selects the command schema
const COMMAND_KEY: &str = "corrected_command";

/// Key whose presence selects the file schema
const FILE_KEY: &str = "file_type";

/// Classes of shell constructs a suggested command may never contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnsafePattern {
    /// `rm -r`, `rm -rf`, `rm --recursive`
    RecursiveDelete,
    /// `&&` or `||` chaining
    CompoundOperator,
    /// A trailing `;` that could hide a chained command
    TrailingSemicolon,
    /// `wget -O` / `curl -O` writing over a local file
    OverwritingDownload,
    /// `$(...)` or backticks
    CommandSubstitution,
    /// Redirection into `/dev/...`
    DeviceRedirect,
}

impl UnsafePattern {
    pub const ALL: [UnsafePattern; 6] = [
        UnsafePattern::RecursiveDelete,
        UnsafePattern::CompoundOperator,
        UnsafePattern::TrailingSemicolon,
        UnsafePattern::OverwritingDownload,
        UnsafePattern::CommandSubstitution,
        UnsafePattern::DeviceRedirect,
    ];

    fn source(self) -> &'static str {
        match self {
            UnsafePattern::RecursiveDelete => {
                r"\brm\s+(?:[^\s;&|]+\s+)*?(?:-[A-Za-z]*[rR][A-Za-z]*|--recursive)(?:\s|$)"
            }
            UnsafePattern::CompoundOperator => r"&&|\|\|",
            UnsafePattern::TrailingSemicolon => r";\s*$",
            UnsafePattern::OverwritingDownload => {
                r"\b(?:wget|curl)\s+(?:[^\s;&|]+\s+)*?(?:-O|--output-document(?:=\S*)?|--remote-name)(?:\s|$)"
            }
            UnsafePattern::CommandSubstitution => r"\$\s*\(|`",
            UnsafePattern::DeviceRedirect => r">\s*/dev/",
        }
    }

    fn regex(self) -> &'static Regex {
        &UNSAFE_REGEXES[self as usize]
    }

    /// Whether `command` contains this construct
    pub fn matches(self, command: &str) -> bool {
        self.regex().is_match(command)
    }
}

impl fmt::Display for UnsafePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsafePattern::RecursiveDelete => write!(f, "recursive delete"),
            UnsafePattern::CompoundOperator => write!(f, "compound operator"),
            UnsafePattern::TrailingSemicolon => write!(f, "trailing semicolon"),
            UnsafePattern::OverwritingDownload => write!(f, "overwriting download"),
            UnsafePattern::CommandSubstitution => write!(f, "command substitution"),
            UnsafePattern::DeviceRedirect => write!(f, "redirect into device"),
        }
    }
}

// Indexed by `UnsafePattern as usize`; the order of `ALL` is the declaration order.
static UNSAFE_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    UnsafePattern::ALL
        .iter()
        .map(|pattern| Regex::new(pattern.source()).expect("unsafe pattern regex is valid"))
        .collect()
});

/// Errors produced while turning model text into a [`ResponseEnvelope`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no ```json code block found in the response")]
    NoJsonBlock,

    #[error("the ```json code block is never closed")]
    UnterminatedBlock,

    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    #[error("response matches neither the command nor the file schema")]
    UnknownShape,

    #[error("expected a {expected} analysis but the model returned a {found} analysis")]
    UnexpectedShape {
        expected: ResponseKind,
        found: ResponseKind,
    },

    #[error("{schema} schema violation: {message}")]
    Schema {
        schema: ResponseKind,
        message: String,
    },

    #[error("suggested command rejected as unsafe ({}): {command}", join_patterns(.patterns))]
    UnsafeCommand {
        command: String,
        patterns: Vec<UnsafePattern>,
    },
}

impl ValidationError {
    /// Format and schema failures can be corrected by re-prompting; a safety
    /// rejection cannot.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ValidationError::UnsafeCommand { .. })
    }
}

fn join_patterns(patterns: &[UnsafePattern]) -> String {
    patterns
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Return the interior of the first ```` ```json ```` block.
pub fn extract_json_block(text: &str) -> Result<&str, ValidationError> {
    let start = text.find(FENCE_OPEN).ok_or(ValidationError::NoJsonBlock)?;
    let body = &text[start + FENCE_OPEN.len()..];
    let end = body
        .find(FENCE_CLOSE)
        .ok_or(ValidationError::UnterminatedBlock)?;
    Ok(&body[..end])
}

/// Clean up a raw JSON block before parsing.
pub fn normalize_json(raw: &str) -> String {
    raw.trim()
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .trim_start_matches(|c: char| c.is_ascii_control())
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .collect()
}

/// Reject commands containing any [`UnsafePattern`]; all matches are reported.
pub fn check_command_safety(command: &str) -> Result<(), ValidationError> {
    let patterns: Vec<UnsafePattern> = UnsafePattern::ALL
        .into_iter()
        .filter(|pattern| pattern.matches(command))
        .collect();

    if patterns.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::UnsafeCommand {
            command: command.to_string(),
            patterns,
        })
    }
}

/// Drop `sudo` words and collapse unquoted whitespace. Quoted arguments are
/// kept as written. Idempotent.
pub fn sanitize_command(command: &str) -> String {
    shell_words(command)
        .into_iter()
        .filter(|word| *word != "sudo")
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split on unquoted whitespace, keeping each word's quoting and escapes.
/// An unclosed quote runs to the end of the input.
fn shell_words(command: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut start: Option<usize> = None;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in command.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some('\''), '\'') => quote = None,
            (Some('\''), _) => {}
            (_, '\\') => escaped = true,
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, c) if c.is_whitespace() => {
                if let Some(s) = start.take() {
                    words.push(&command[s..i]);
                }
                continue;
            }
            (None, _) => {}
        }
        start.get_or_insert(i);
    }

    if let Some(s) = start {
        words.push(&command[s..]);
    }
    words
}

/// Parse and validate a model response, choosing the schema by key presence.
pub fn validate_response(text: &str) -> Result<ResponseEnvelope, ValidationError> {
    let block = extract_json_block(text)?;
    let normalized = normalize_json(block);
    let value: Value = serde_json::from_str(&normalized)
        .map_err(|e| ValidationError::MalformedJson(e.to_string()))?;

    let Value::Object(object) = value else {
        return Err(ValidationError::UnknownShape);
    };

    if object.contains_key(COMMAND_KEY) {
        validate_command(object).map(ResponseEnvelope::Command)
    } else if object.contains_key(FILE_KEY) {
        validate_file(object).map(ResponseEnvelope::File)
    } else {
        Err(ValidationError::UnknownShape)
    }
}

/// Like [`validate_response`], but also require the schema the request asked for.
pub fn validate_for(
    text: &str,
    expected: ResponseKind,
) -> Result<ResponseEnvelope, ValidationError> {
    let envelope = validate_response(text)?;
    if envelope.kind() != expected {
        return Err(ValidationError::UnexpectedShape {
            expected,
            found: envelope.kind(),
        });
    }
    Ok(envelope)
}

fn from_object<T: DeserializeOwned>(
    object: Map<String, Value>,
    schema: ResponseKind,
) -> Result<T, ValidationError> {
    serde_json::from_value(Value::Object(object)).map_err(|e| ValidationError::Schema {
        schema,
        message: e.to_string(),
    })
}

fn schema_error(schema: ResponseKind, message: &str) -> ValidationError {
    ValidationError::Schema {
        schema,
        message: message.to_string(),
    }
}

fn validate_command(object: Map<String, Value>) -> Result<CommandAnalysis, ValidationError> {
    let mut analysis: CommandAnalysis = from_object(object, ResponseKind::Command)?;

    if analysis.possible_fixes.is_empty() {
        return Err(schema_error(
            ResponseKind::Command,
            "possible_fixes must contain at least one entry",
        ));
    }

    check_command_safety(&analysis.corrected_command)?;

    // Dropping `sudo` can bring the pieces of a forbidden construct together
    analysis.corrected_command = sanitize_command(&analysis.corrected_command);
    check_command_safety(&analysis.corrected_command)?;
    if analysis.corrected_command.is_empty() {
        return Err(schema_error(
            ResponseKind::Command,
            "corrected_command is empty",
        ));
    }

    Ok(analysis)
}

fn validate_file(object: Map<String, Value>) -> Result<FileAnalysis, ValidationError> {
    from_object(object, ResponseKind::File)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fenced(json: &str) -> String {
        format!("Here you go:\n```json\n{json}\n```\nDone.")
    }

    fn command_json(corrected: &str) -> String {
        serde_json::json!({
            "description": "Typo in command name",
            "possible_fixes": ["Fix the spelling", "Use an alias", "Check PATH"],
            "corrected_command": corrected,
            "explanation": "The shell could not find the program."
        })
        .to_string()
    }

    #[test]
    fn test_extract_json_block() {
        let text = "prose\n```json\n{\"a\": 1}\n```\nmore";
        assert_eq!(extract_json_block(text).unwrap().trim(), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_block_missing() {
        assert_eq!(
            extract_json_block("{\"a\": 1}"),
            Err(ValidationError::NoJsonBlock)
        );
        assert_eq!(
            extract_json_block("```\n{\"a\": 1}\n```"),
            Err(ValidationError::NoJsonBlock)
        );
    }

    #[test]
    fn test_extract_json_block_unterminated() {
        assert_eq!(
            extract_json_block("```json\n{\"a\": 1}\n"),
            Err(ValidationError::UnterminatedBlock)
        );
    }

    #[test]
    fn test_extract_uses_first_block() {
        let text = "```json\n{\"first\": 1}\n```\n```json\n{\"second\": 2}\n```";
        assert!(extract_json_block(text).unwrap().contains("first"));
    }

    #[test]
    fn test_normalize_json_smart_quotes_and_newlines() {
        let raw = "\n  {\u{201C}a\u{201D}:\n \u{201C}it\u{2019}s\u{201D}}\r\n";
        assert_eq!(normalize_json(raw), "{\"a\": \"it's\"}");
    }

    #[test]
    fn test_normalize_json_strips_leading_control_chars() {
        assert_eq!(normalize_json("\u{1}\u{2}{}"), "{}");
    }

    #[test]
    fn test_validate_command_response() {
        let envelope = validate_response(&fenced(&command_json("git status"))).unwrap();
        let analysis = envelope.as_command().unwrap();
        assert_eq!(analysis.corrected_command, "git status");
        assert_eq!(analysis.possible_fixes.len(), 3);
    }

    #[test]
    fn test_validate_file_response() {
        let json = serde_json::json!({
            "file_type": "YAML",
            "summary": "CI workflow",
            "issues": ["a", "b", "c"],
            "recommendations": ["x", "y", "z"],
            "security_analysis": "No secrets present."
        });
        let envelope = validate_response(&fenced(&json.to_string())).unwrap();
        assert_eq!(envelope.as_file().unwrap().file_type, "YAML");
    }

    #[test]
    fn test_malformed_json() {
        let err = validate_response(&fenced("{\"description\": ,}")).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedJson(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unknown_shape() {
        let err = validate_response(&fenced("{\"answer\": \"42\"}")).unwrap_err();
        assert_eq!(err, ValidationError::UnknownShape);
        let err = validate_response(&fenced("[1, 2, 3]")).unwrap_err();
        assert_eq!(err, ValidationError::UnknownShape);
    }

    #[test]
    fn test_command_key_never_parsed_as_file() {
        let json = serde_json::json!({
            "file_type": "YAML",
            "summary": "s",
            "issues": [],
            "recommendations": [],
            "security_analysis": "s",
            "corrected_command": "ls"
        });
        let err = validate_response(&fenced(&json.to_string())).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::Schema {
                schema: ResponseKind::Command,
                ..
            }
        ));
    }

    #[test]
    fn test_strict_schema_rejects_extra_keys() {
        let json = serde_json::json!({
            "description": "d",
            "possible_fixes": ["a"],
            "corrected_command": "ls",
            "confidence": 0.9
        });
        let err = validate_response(&fenced(&json.to_string())).unwrap_err();
        assert!(matches!(err, ValidationError::Schema { .. }));
    }

    #[test]
    fn test_schema_rejects_mistyped_fields() {
        let json = serde_json::json!({
            "description": "d",
            "possible_fixes": "just one string",
            "corrected_command": "ls"
        });
        let err = validate_response(&fenced(&json.to_string())).unwrap_err();
        assert!(matches!(err, ValidationError::Schema { .. }));

        let json = serde_json::json!({
            "file_type": "YAML",
            "summary": "s",
            "issues": [],
            "recommendations": []
        });
        let err = validate_response(&fenced(&json.to_string())).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::Schema {
                schema: ResponseKind::File,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_possible_fixes_rejected() {
        let json = serde_json::json!({
            "description": "d",
            "possible_fixes": [],
            "corrected_command": "ls"
        });
        let err = validate_response(&fenced(&json.to_string())).unwrap_err();
        assert!(matches!(err, ValidationError::Schema { .. }));
    }

    #[test]
    fn test_unsafe_patterns_each_rejected() {
        let cases = [
            ("rm -rf build", UnsafePattern::RecursiveDelete),
            ("rm -r build", UnsafePattern::RecursiveDelete),
            ("rm --recursive build", UnsafePattern::RecursiveDelete),
            ("make clean && make", UnsafePattern::CompoundOperator),
            ("test -f x || touch x", UnsafePattern::CompoundOperator),
            ("ls -la;", UnsafePattern::TrailingSemicolon),
            ("wget -O index.html http://x", UnsafePattern::OverwritingDownload),
            ("curl -s -O http://x/file", UnsafePattern::OverwritingDownload),
            ("echo $(whoami)", UnsafePattern::CommandSubstitution),
            ("echo `whoami`", UnsafePattern::CommandSubstitution),
            ("cat image > /dev/sda", UnsafePattern::DeviceRedirect),
            ("cat image > sudo /dev/sda", UnsafePattern::DeviceRedirect),
            ("ls ; sudo", UnsafePattern::TrailingSemicolon),
            ("echo $ sudo (whoami)", UnsafePattern::CommandSubstitution),
        ];

        for (command, expected) in cases {
            let err = validate_response(&fenced(&command_json(command))).unwrap_err();
            match err {
                ValidationError::UnsafeCommand { ref patterns, .. } => {
                    assert!(patterns.contains(&expected), "{command}: {patterns:?}");
                }
                other => panic!("{command}: expected safety rejection, got {other:?}"),
            }
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_safe_commands_pass() {
        for command in [
            "git status",
            "rm -f stale.lock",
            "curl -o out.html https://example.com",
            "ls -R src",
            "grep -r TODO src",
        ] {
            assert!(check_command_safety(command).is_ok(), "{command}");
        }
    }

    #[test]
    fn test_scenario_double_violation() {
        let err = validate_response(&fenced(&command_json("rm -rf / && echo done"))).unwrap_err();
        let ValidationError::UnsafeCommand { patterns, .. } = err else {
            panic!("expected safety rejection");
        };
        assert!(patterns.contains(&UnsafePattern::RecursiveDelete));
        assert!(patterns.contains(&UnsafePattern::CompoundOperator));
    }

    #[test]
    fn test_sanitize_strips_sudo_and_whitespace() {
        assert_eq!(sanitize_command("sudo  apt   install git "), "apt install git");
        assert_eq!(sanitize_command("pseudo sudo-x sudo"), "pseudo sudo-x");
    }

    #[test]
    fn test_sanitize_keeps_quoted_arguments() {
        assert_eq!(
            sanitize_command("sudo  echo 'a   b'   \"c  d\""),
            "echo 'a   b' \"c  d\""
        );
        assert_eq!(sanitize_command("echo \"sudo\" 'it''s'"), "echo \"sudo\" 'it''s'");
        assert_eq!(sanitize_command("touch my\\ \\ file   x"), "touch my\\ \\ file x");
        assert_eq!(sanitize_command("echo \"unclosed   quote"), "echo \"unclosed   quote");
    }

    #[test]
    fn test_sanitize_idempotent() {
        for input in [
            "",
            "   ",
            "sudo sudo ls",
            "git\tstatus\n",
            "echo 'a   b'",
            "echo \"x \\\" y\"  z",
            "printf 'unclosed   ",
            "  sudo   make   install  ",
        ] {
            let once = sanitize_command(input);
            assert_eq!(sanitize_command(&once), once, "{input:?}");
        }
    }

    #[test]
    fn test_sanitized_command_is_returned() {
        let envelope = validate_response(&fenced(&command_json("sudo  systemctl restart nginx")))
            .unwrap();
        assert_eq!(
            envelope.as_command().unwrap().corrected_command,
            "systemctl restart nginx"
        );
    }

    #[test]
    fn test_sudo_only_command_rejected() {
        let err = validate_response(&fenced(&command_json("sudo"))).unwrap_err();
        assert!(matches!(err, ValidationError::Schema { .. }));
    }

    #[test]
    fn test_round_trip_command_analysis() {
        let analysis = CommandAnalysis {
            description: "Misspelled git".to_string(),
            possible_fixes: vec!["Use git".to_string(), "Add alias".to_string()],
            corrected_command: "git status".to_string(),
            explanation: Some("gti is not installed.".to_string()),
        };
        let text = fenced(&serde_json::to_string(&analysis).unwrap());
        let envelope = validate_response(&text).unwrap();
        assert_eq!(envelope, ResponseEnvelope::Command(analysis.clone()));

        let without_explanation = CommandAnalysis {
            explanation: None,
            ..analysis
        };
        let text = fenced(&serde_json::to_string(&without_explanation).unwrap());
        assert_eq!(
            validate_response(&text).unwrap(),
            ResponseEnvelope::Command(without_explanation)
        );
    }

    #[test]
    fn test_validate_for_expected_kind() {
        let text = fenced(&command_json("git status"));
        assert!(validate_for(&text, ResponseKind::Command).is_ok());
        assert_eq!(
            validate_for(&text, ResponseKind::File).unwrap_err(),
            ValidationError::UnexpectedShape {
                expected: ResponseKind::File,
                found: ResponseKind::Command,
            }
        );
    }

    #[test]
    fn test_unsafe_error_message_names_patterns() {
        let err = check_command_safety("rm -rf / && echo done").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("recursive delete"));
        assert!(message.contains("compound operator"));
    }
}
