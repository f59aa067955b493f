//! Prompt construction.
//!
//! Command and file prompts embed the exact JSON schema the model has to
//! answer with, inside a ```` ```json ```` fence. Templates live in
//! `src/prompts/` and are compiled in.

use std::path::Path;

use crate::context::{current_user, utc_timestamp, CommandContext};
use crate::response::ResponseKind;

const TEMPLATE_COMMAND: &str = include_str!("prompts/command.txt");
const TEMPLATE_FILE: &str = include_str!("prompts/file.txt");
const TEMPLATE_USER_CONTEXT: &str = include_str!("prompts/user_context.txt");
const SCHEMA_COMMAND: &str = include_str!("prompts/command_schema.txt");
const SCHEMA_FILE: &str = include_str!("prompts/file_schema.txt");

/// Header that introduces the schema again on a corrective retry
pub const CORRECTION_HEADER: &str = "CORRECT FORMAT:";

/// Substitute `{key}` placeholders in a single pass.
///
/// Values are never rescanned, so captured output that happens to contain
/// `{stderr}` or similar stays literal.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close))
        });

        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn or_empty(text: &str) -> &str {
    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        "(empty)"
    } else {
        trimmed
    }
}

/// Append the adaptation clause when the user supplied extra context.
fn with_user_context(prompt: String, user_prompt: Option<&str>) -> String {
    match user_prompt.map(str::trim).filter(|p| !p.is_empty()) {
        Some(user_prompt) => {
            let clause = render(TEMPLATE_USER_CONTEXT, &[("user_prompt", user_prompt)]);
            prompt + &clause
        }
        None => prompt,
    }
}

/// The schema rules for a structured response kind.
pub fn schema_block(kind: ResponseKind) -> Option<&'static str> {
    match kind {
        ResponseKind::Command => Some(SCHEMA_COMMAND),
        ResponseKind::File => Some(SCHEMA_FILE),
        ResponseKind::Ask => None,
    }
}

/// Prompt asking the model to diagnose a command run.
pub fn build_command_prompt(ctx: &CommandContext, user_prompt: Option<&str>) -> String {
    let shell = ctx.shell.to_string();
    let exit_status = ctx.exit_status_text();
    let prompt = render(
        TEMPLATE_COMMAND,
        &[
            ("schema", SCHEMA_COMMAND.trim_end()),
            ("command", ctx.command.trim()),
            ("exit_status", exit_status.as_str()),
            ("shell", shell.as_str()),
            ("cwd", ctx.working_dir.as_deref().unwrap_or("unknown")),
            ("user", ctx.user.as_deref().unwrap_or("unknown")),
            ("os", ctx.os.as_str()),
            ("timestamp", ctx.timestamp.as_str()),
            ("stdout", or_empty(&ctx.stdout)),
            ("stderr", or_empty(&ctx.stderr)),
        ],
    );
    with_user_context(prompt, user_prompt)
}

/// Prompt asking the model to review a file.
pub fn build_file_prompt(content: &str, path: &Path, user_prompt: Option<&str>) -> String {
    let path = path.display().to_string();
    let size = content.len().to_string();
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let user = current_user().unwrap_or_else(|| "unknown".to_string());
    let timestamp = utc_timestamp();

    let prompt = render(
        TEMPLATE_FILE,
        &[
            ("schema", SCHEMA_FILE.trim_end()),
            ("path", path.as_str()),
            ("size", size.as_str()),
            ("cwd", cwd.as_str()),
            ("user", user.as_str()),
            ("os", std::env::consts::OS),
            ("timestamp", timestamp.as_str()),
            ("content", content.trim_end()),
        ],
    );
    with_user_context(prompt, user_prompt)
}

/// Questions go to the model untouched; answers are rendered as markdown.
pub fn build_ask_prompt(question: &str) -> String {
    question.to_string()
}

/// The prompt for a corrective retry: the original prompt followed by the
/// schema again. Ask prompts are returned unchanged.
pub fn correction_prompt(original: &str, kind: ResponseKind) -> String {
    match schema_block(kind) {
        Some(schema) => format!("{original}\n\n{CORRECTION_HEADER}\n{}", schema.trim_end()),
        None => original.to_string(),
    }
}
