//! Terminal output formatting.

use colored::Colorize;
use std::path::Path;

use crate::context::interpret_exit_code;
use crate::executor::CommandOutput;
use crate::gate::GateOutcome;
use crate::response::{CommandAnalysis, FileAnalysis, ResponseEnvelope};

fn width() -> usize {
    textwrap::termwidth().min(100)
}

/// Render markdown text to terminal with colored output.
pub fn render_markdown(text: &str, width: usize, indent: &str) {
    let mut in_code_block = false;

    for line in text.lines() {
        if line.trim().starts_with("```") {
            in_code_block = !in_code_block;
            continue;
        }

        if in_code_block {
            println!("{indent}  {}", line.cyan());
            continue;
        }

        let processed = render_inline_markdown(line);
        if processed.is_empty() {
            println!();
            continue;
        }
        for wrapped in textwrap::wrap(&processed, width.saturating_sub(indent.len())) {
            println!("{indent}{wrapped}");
        }
    }
}

/// Process inline markdown: `code`, **bold**, *italic*
pub fn render_inline_markdown(text: &str) -> String {
    let mut result = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '`' => {
                let code: String = std::iter::from_fn(|| chars.next_if(|&n| n != '`')).collect();
                chars.next();
                result.push_str(&code.cyan().to_string());
            }
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                let bold: String = std::iter::from_fn(|| chars.next_if(|&n| n != '*')).collect();
                chars.next();
                chars.next_if_eq(&'*');
                result.push_str(&bold.bold().to_string());
            }
            '*' => {
                let italic: String = std::iter::from_fn(|| chars.next_if(|&n| n != '*')).collect();
                chars.next();
                result.push_str(&italic.italic().to_string());
            }
            _ => result.push(c),
        }
    }

    result
}

fn print_list(items: &[String], width: usize) {
    for (i, item) in items.iter().enumerate() {
        let processed = render_inline_markdown(item);
        let options = textwrap::Options::new(width)
            .initial_indent("  ")
            .subsequent_indent("     ");
        let numbered = format!("{}. {}", (i + 1).to_string().dimmed(), processed);
        for line in textwrap::wrap(&numbered, options) {
            println!("{line}");
        }
    }
}

fn print_heading(marker: colored::ColoredString, title: colored::ColoredString) {
    println!("{marker} {title}");
}

/// Print a command diagnosis
pub fn print_command_analysis(analysis: &CommandAnalysis) {
    let width = width();

    println!();
    println!("{} {}", "●".red(), "Diagnosis".bold());
    for line in textwrap::wrap(&render_inline_markdown(&analysis.description), width) {
        println!("{}", line.white().bold());
    }
    println!();

    print_heading("▸".blue(), "Possible fixes".blue().bold());
    print_list(&analysis.possible_fixes, width);
    println!();

    if let Some(explanation) = analysis.explanation.as_deref().filter(|e| !e.trim().is_empty()) {
        print_heading("▸".blue(), "Explanation".blue().bold());
        render_markdown(explanation, width, "  ");
        println!();
    }

    print_heading("▸".green(), "Suggested command".green().bold());
    println!("  {}", analysis.corrected_command.cyan().bold());
    println!();
}

/// Print a file review
pub fn print_file_analysis(analysis: &FileAnalysis, path: Option<&Path>) {
    let width = width();

    println!();
    match path {
        Some(path) => println!(
            "{} {} {}",
            "●".cyan(),
            path.display().to_string().bold(),
            format!("({})", analysis.file_type).dimmed()
        ),
        None => println!("{} {}", "●".cyan(), analysis.file_type.bold()),
    }
    for line in textwrap::wrap(&render_inline_markdown(&analysis.summary), width) {
        println!("{}", line.white().bold());
    }
    println!();

    print_heading("▸".red(), "Issues".red().bold());
    print_list(&analysis.issues, width);
    println!();

    print_heading("▸".green(), "Recommendations".green().bold());
    print_list(&analysis.recommendations, width);
    println!();

    print_heading("▸".magenta(), "Security".magenta().bold());
    render_markdown(&analysis.security_analysis, width, "  ");
    println!();
}

/// Print any envelope. Free-form answers are rendered as markdown.
pub fn print_envelope(envelope: &ResponseEnvelope, path: Option<&Path>) {
    match envelope {
        ResponseEnvelope::Command(analysis) => print_command_analysis(analysis),
        ResponseEnvelope::File(analysis) => print_file_analysis(analysis, path),
        ResponseEnvelope::Text(text) => {
            println!();
            render_markdown(text, width(), "");
            println!();
        }
    }
}

/// Print the envelope as pretty JSON for scripting
pub fn print_json(envelope: &ResponseEnvelope) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    Ok(())
}

/// Header shown before the user's command output is echoed
pub fn print_run_header(command: &str) {
    println!("{} {}", "Result:".bold(), command.dimmed());
}

/// One-line summary of how a command ended
pub fn exit_summary(output: &CommandOutput) -> String {
    if output.terminated {
        return format!("{} terminated", output.command);
    }
    match output.exit_code {
        Some(0) => format!("{} exited successfully", output.command),
        Some(code) => format!(
            "{} exited with {} ({})",
            output.command,
            code,
            interpret_exit_code(code)
        ),
        None => format!("{} was killed by a signal", output.command),
    }
}

/// Report what happened at the execution gate
pub fn print_gate_outcome(outcome: &GateOutcome) {
    match outcome {
        GateOutcome::Declined => println!("{}", "Skipped.".dimmed()),
        GateOutcome::Executed(output) => {
            let summary = exit_summary(output);
            if output.success() {
                println!("{} {}", "✓".green(), summary);
            } else {
                println!("{} {}", "✗".red(), summary);
            }
        }
        GateOutcome::Failed(reason) => println!("{} {}", "✗".red(), reason),
    }
}

/// Build a user-facing error with an optional hint
pub fn format_error(message: &str, tip: Option<&str>) -> String {
    let mut output = format!("{} {}", "Error:".red().bold(), message);
    if let Some(tip) = tip {
        output.push('\n');
        output.push_str(&format!("{} {}", "Tip:".blue().bold(), tip));
    }
    output
}

/// Verbose dump of a prompt or raw response
pub fn print_debug_section(title: &str, body: &str, footer: Option<String>) {
    eprintln!("{}", format!("=== DEBUG: {title} ===").yellow().bold());
    if body.trim().is_empty() {
        eprintln!("{}", "| <empty>".dimmed());
    } else {
        for line in body.lines() {
            eprintln!("{}", format!("| {line}").bright_white());
        }
    }
    if let Some(footer) = footer {
        eprintln!("{}", footer.dimmed());
    }
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(f: impl FnOnce() -> String) -> String {
        colored::control::set_override(false);
        f()
    }

    #[test]
    fn test_inline_markdown_plain_text() {
        assert_eq!(plain(|| render_inline_markdown("no markup here")), "no markup here");
    }

    #[test]
    fn test_inline_markdown_strips_markers() {
        let out = plain(|| render_inline_markdown("run `git status` then **commit** *now*"));
        assert_eq!(out, "run git status then commit now");
    }

    #[test]
    fn test_inline_markdown_unclosed_code() {
        let out = plain(|| render_inline_markdown("broken `code"));
        assert_eq!(out, "broken code");
    }

    #[test]
    fn test_format_error_with_tip() {
        let out = plain(|| format_error("No input", Some("Try `clai gti status`")));
        assert_eq!(out, "Error: No input\nTip: Try `clai gti status`");
    }

    #[test]
    fn test_format_error_without_tip() {
        let out = plain(|| format_error("boom", None));
        assert_eq!(out, "Error: boom");
    }

    #[test]
    fn test_exit_summary() {
        let mut output = CommandOutput {
            command: "ls /nope".to_string(),
            exit_code: Some(2),
            ..Default::default()
        };
        assert_eq!(
            exit_summary(&output),
            "ls /nope exited with 2 (misuse of shell command)"
        );

        output.exit_code = Some(0);
        assert_eq!(exit_summary(&output), "ls /nope exited successfully");

        output.exit_code = None;
        output.terminated = true;
        assert_eq!(exit_summary(&output), "ls /nope terminated");
    }
}
