//! Console and file output for log lines
//!
//! Console lines are colorized and wrapped at word boundaries; the file
//! copy is plain text with a full timestamp.

use super::config::get_logger_config;
use super::file::write_to_file;
use super::levels::LogLevel;
use super::tags::LogTag;
use chrono::Local;
use colored::*;
use std::io::{stdout, ErrorKind, Write};

const TAG_WIDTH: usize = 11;
const LEVEL_WIDTH: usize = 7;
const MAX_LINE_LENGTH: usize = 140;

pub fn format_and_log(tag: LogTag, level: LogLevel, message: &str) {
    let now = Local::now();
    let config = get_logger_config();

    let time = now.format("%H:%M:%S").to_string().dimmed();
    let prefix = format!("{} [{}] [{}] ", time, format_tag(&tag), format_level(level));
    let prefix_width = 8 + 1 + TAG_WIDTH + 3 + LEVEL_WIDTH + 3;
    let available = MAX_LINE_LENGTH.saturating_sub(prefix_width).max(40);

    let chunks = wrap_text(message, available);
    let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();

    for (i, chunk) in chunks.iter().enumerate() {
        if config.console {
            if i == 0 {
                print_stdout_safe(&format!("{}{}", prefix, chunk));
            } else {
                print_stdout_safe(&format!("{}{}", " ".repeat(prefix_width), chunk));
            }
        }
        write_to_file(&format!(
            "{} [{}] [{}] {}",
            timestamp,
            tag.to_plain_string(),
            level.as_str(),
            chunk
        ));
    }
}

fn format_tag(tag: &LogTag) -> ColoredString {
    let label = format!("{:<width$}", tag.to_plain_string(), width = TAG_WIDTH);
    match tag {
        LogTag::System => label.bright_yellow().bold(),
        LogTag::Config => label.white().bold(),
        LogTag::Gateway => label.bright_blue().bold(),
        LogTag::Discovery => label.bright_green().bold(),
        LogTag::Cache => label.bright_cyan().bold(),
        LogTag::Balances => label.bright_magenta().bold(),
        LogTag::Worth => label.green().bold(),
        LogTag::Pending => label.yellow().bold(),
        LogTag::Persistence => label.blue().bold(),
        LogTag::Wallet => label.magenta().bold(),
    }
}

fn format_level(level: LogLevel) -> ColoredString {
    let label = format!("{:<width$}", level.as_str(), width = LEVEL_WIDTH);
    match level {
        LogLevel::Error => label.bright_red().bold(),
        LogLevel::Warning => label.bright_yellow().bold(),
        LogLevel::Info => label.white().bold(),
        LogLevel::Debug => label.cyan(),
        LogLevel::Verbose => label.dimmed(),
    }
}

/// Print to stdout; a closed pipe ends the process quietly
fn print_stdout_safe(message: &str) {
    let mut out = stdout();
    let result = writeln!(out, "{}", message).and_then(|_| out.flush());
    if let Err(e) = result {
        if e.kind() == ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
        let _ = writeln!(std::io::stderr(), "Logger stdout error: {}", e);
    }
}

/// Wrap text at word boundaries, respecting existing newlines
///
/// Words longer than the width are split on character boundaries.
pub(crate) fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let mut result = Vec::new();

    for line in text.split('\n') {
        if line.chars().count() <= max_width {
            result.push(line.to_string());
            continue;
        }

        let mut current = String::new();
        for word in line.split_whitespace() {
            let word_len = word.chars().count();
            let current_len = current.chars().count();

            if word_len > max_width {
                if !current.is_empty() {
                    result.push(std::mem::take(&mut current));
                }
                let chars: Vec<char> = word.chars().collect();
                for piece in chars.chunks(max_width) {
                    result.push(piece.iter().collect());
                }
            } else if current.is_empty() {
                current.push_str(word);
            } else if current_len + 1 + word_len <= max_width {
                current.push(' ');
                current.push_str(word);
            } else {
                result.push(std::mem::replace(&mut current, word.to_string()));
            }
        }
        if !current.is_empty() {
            result.push(current);
        }
    }

    if result.is_empty() {
        result.push(String::new());
    }
    result
}
