//! Advisory audit of commands typed into terminals.
//!
//! Input arrives as raw keystrokes, so an accumulator rebuilds lines from the
//! stream (printable characters, backspace, Ctrl-C/Ctrl-U line kills) and
//! checks each completed line against a list of destructive patterns. A match
//! is logged as a warning. Input is never blocked or altered.
//!
//! Line reconstruction is best effort: shell history, tab completion and
//! cursor movement happen on the remote side and are invisible here.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Longest command kept in a log line.
pub const MAX_LOGGED_COMMAND_CHARS: usize = 1000;

/// Pending line length cap. Anything beyond is dropped until the next newline.
const MAX_LINE_BYTES: usize = 8 * 1024;

static DANGEROUS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"rm\s+-rf\s+/",
        r"format\s+",
        r"fdisk\s+",
        r"mkfs\.",
        r"dd\s+if=/dev/zero",
        r":\(\)\s*\{\s*:\|:&\s*\};",
        r"shutdown\s+",
        r"reboot\s+",
        r"poweroff\s+",
        r"halt\s+",
    ]
    .iter()
    .map(|pattern| Regex::new(&format!("(?i){}", pattern)).expect("audit pattern is a valid regex"))
    .collect()
});

/// Whether a command line matches a known destructive pattern.
pub fn is_dangerous_command(command: &str) -> bool {
    DANGEROUS_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(command))
}

/// Strip NUL bytes and truncate for logging.
pub fn sanitize_for_log(input: &str) -> String {
    let cleaned: String = input.chars().filter(|c| *c != '\0').collect();
    if cleaned.chars().count() <= MAX_LOGGED_COMMAND_CHARS {
        return cleaned;
    }
    let truncated: String = cleaned.chars().take(MAX_LOGGED_COMMAND_CHARS).collect();
    format!("{}... (truncated)", truncated)
}

/// Rebuilds command lines from one session's keystrokes.
#[derive(Debug, Default)]
pub struct CommandAudit {
    line: String,
    overflowed: bool,
}

impl CommandAudit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw terminal input. Returns every line completed by this chunk.
    pub fn feed(&mut self, input: &str) -> Vec<String> {
        let mut completed = Vec::new();

        for ch in input.chars() {
            match ch {
                '\r' | '\n' => {
                    let line = std::mem::take(&mut self.line);
                    self.overflowed = false;
                    if !line.trim().is_empty() {
                        completed.push(line);
                    }
                }
                // Backspace and DEL
                '\u{8}' | '\u{7f}' => {
                    self.line.pop();
                }
                // Ctrl-C, Ctrl-U
                '\u{3}' | '\u{15}' => {
                    self.line.clear();
                    self.overflowed = false;
                }
                c if c.is_control() => {}
                c => {
                    if self.line.len() + c.len_utf8() > MAX_LINE_BYTES {
                        self.overflowed = true;
                    } else if !self.overflowed {
                        self.line.push(c);
                    }
                }
            }
        }

        completed
    }

    /// Feed input and log dangerous lines for `session_id`.
    ///
    /// Other lines are not logged: a password typed at a remote prompt looks
    /// like any other line.
    pub fn record(&mut self, session_id: &str, target: &str, input: &str) -> usize {
        let mut flagged = 0;
        for line in self.feed(input) {
            if is_dangerous_command(&line) {
                warn!(
                    "Potentially dangerous command in session {} on {}: {}",
                    session_id,
                    target,
                    sanitize_for_log(line.trim())
                );
                flagged += 1;
            }
        }
        flagged
    }

    pub fn reset(&mut self) {
        self.line.clear();
        self.overflowed = false;
    }
}
