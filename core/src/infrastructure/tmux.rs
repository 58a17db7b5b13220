//! Tmux command builder.
//!
//! The scan job runs inside a detached tmux session on the instance so it
//! survives the controlling SSH connection dropping. These helpers only
//! build command strings; the remote executor runs them.

// ---------------------------------------------------------------------------
// Command builder
// ---------------------------------------------------------------------------

/// Builds tmux CLI command strings without executing them.
pub struct TmuxCommandBuilder;

impl TmuxCommandBuilder {
    pub fn new() -> Self {
        TmuxCommandBuilder
    }

    /// `tmux new-session -d -s <name>`
    pub fn new_session(&self, name: &str) -> String {
        format!("tmux new-session -d -s {}", shell_escape(name))
    }

    /// `tmux send-keys -t <target> <keys> Enter`
    pub fn send_keys(&self, target: &str, keys: &str) -> String {
        format!(
            "tmux send-keys -t {} {} Enter",
            shell_escape(target),
            shell_escape(keys)
        )
    }

    /// `tmux capture-pane -t <target> -p -S -<lines>`
    pub fn capture_pane(&self, target: &str, lines: u32) -> String {
        format!(
            "tmux capture-pane -t {} -p -S -{}",
            shell_escape(target),
            lines
        )
    }
}

impl Default for TmuxCommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Shell escaping
// ---------------------------------------------------------------------------

/// Escape a string for safe use in a shell command.
///
/// Wraps the value in single quotes and escapes any embedded single quotes
/// using the `'\''` idiom.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '%' | ':' | '@' | '='))
    {
        return s.to_string();
    }
    let escaped = s.replace('\'', "'\\''");
    format!("'{}'", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_session_commands() {
        let b = TmuxCommandBuilder::new();
        assert_eq!(b.new_session("main"), "tmux new-session -d -s main");
        assert_eq!(b.capture_pane("main", 200), "tmux capture-pane -t main -p -S -200");
    }

    #[test]
    fn send_keys_quotes_the_command() {
        let b = TmuxCommandBuilder::new();
        assert_eq!(
            b.send_keys("main", "osmedeus scan -f general -t example.com"),
            "tmux send-keys -t main 'osmedeus scan -f general -t example.com' Enter"
        );
    }

    #[test]
    fn shell_escape_plain_and_quoted() {
        assert_eq!(shell_escape("example.com"), "example.com");
        assert_eq!(shell_escape("/root/workspaces-osmedeus/a_b/done"), "/root/workspaces-osmedeus/a_b/done");
        assert_eq!(shell_escape(""), "''");
        assert_eq!(shell_escape("a b"), "'a b'");
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
    }
}
