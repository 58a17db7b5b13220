//! Command runner abstraction for executing shell commands.
//!
//! `CommandRunner` is the seam every side effect goes through: ssh, rsync,
//! local hooks and provider commands are all plain command strings.
//! `ShellRunner` is the production implementation that spawns `sh -c`.
//! `MockRunner` is the test double that records calls and returns scripted
//! responses.

use std::collections::VecDeque;
use std::process::Command;
use std::sync::Mutex;

/// Trait for executing shell command strings.
///
/// Implementations are shared across worker threads.
pub trait CommandRunner: Send + Sync {
    /// Run `cmd` and return its combined stdout/stderr. A non-zero exit
    /// status is an `Err` carrying the combined output.
    fn run(&self, cmd: &str) -> Result<String, String>;
}

/// Production runner that spawns `sh -c <cmd>`.
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, cmd: &str) -> Result<String, String> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .map_err(|e| format!("Failed to execute: {}", e))?;
        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if output.status.success() {
            Ok(combined)
        } else if combined.trim().is_empty() {
            Err(format!("command exited with {}", output.status))
        } else {
            Err(combined)
        }
    }
}


// ---------------------------------------------------------------------------
// MockRunner
// ---------------------------------------------------------------------------

struct Rule {
    pattern: String,
    responses: VecDeque<Result<String, String>>,
}

/// Test-double runner that records commands and returns scripted responses.
///
/// Responses registered with [`MockRunner::on`] are keyed by a substring of
/// the command. Each rule serves its responses in order and keeps repeating
/// the last one. Commands that match no rule are answered from the plain
/// FIFO given to [`MockRunner::with_responses`], then with `Ok("")`.
pub struct MockRunner {
    rules: Mutex<Vec<Rule>>,
    responses: Mutex<VecDeque<Result<String, String>>>,
    commands: Mutex<Vec<String>>,
}

impl MockRunner {
    pub fn with_responses(responses: Vec<Result<String, String>>) -> Self {
        MockRunner {
            rules: Mutex::new(Vec::new()),
            responses: Mutex::new(responses.into()),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn new() -> Self {
        Self::with_responses(Vec::new())
    }

    /// Queue `response` for commands containing `pattern`.
    pub fn on(self, pattern: &str, response: Result<String, String>) -> Self {
        self.respond(pattern, response);
        self
    }

    /// Queue `response` for commands containing `pattern` `times` times.
    pub fn on_times(self, pattern: &str, response: Result<String, String>, times: usize) -> Self {
        for _ in 0..times {
            self.respond(pattern, response.clone());
        }
        self
    }

    /// Non-builder form of [`MockRunner::on`].
    pub fn respond(&self, pattern: &str, response: Result<String, String>) {
        let mut rules = lock(&self.rules);
        match rules.iter_mut().find(|r| r.pattern == pattern) {
            Some(rule) => rule.responses.push_back(response),
            None => rules.push(Rule {
                pattern: pattern.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
    }

    pub fn executed_commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }

    /// Number of executed commands containing `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        lock(&self.commands)
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, cmd: &str) -> Result<String, String> {
        lock(&self.commands).push(cmd.to_string());

        let mut rules = lock(&self.rules);
        if let Some(rule) = rules.iter_mut().find(|r| cmd.contains(&r.pattern)) {
            if rule.responses.len() > 1 {
                if let Some(response) = rule.responses.pop_front() {
                    return response;
                }
            }
            if let Some(last) = rule.responses.front() {
                return last.clone();
            }
        }
        drop(rules);

        lock(&self.responses).pop_front().unwrap_or_else(|| Ok(String::new()))
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_runner_records_commands() {
        let runner = MockRunner::with_responses(vec![Ok("ok".into()), Ok("ok2".into())]);
        let r1 = runner.run("echo hello");
        assert!(r1.is_ok());
        let r2 = runner.run("echo world");
        assert!(r2.is_ok());
        let cmds = runner.executed_commands();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0], "echo hello");
        assert_eq!(cmds[1], "echo world");
    }

    #[test]
    fn mock_runner_returns_responses_in_order() {
        let runner = MockRunner::with_responses(vec![
            Ok("first".into()),
            Err("fail".into()),
            Ok("third".into()),
        ]);
        assert_eq!(runner.run("cmd1").unwrap(), "first");
        assert_eq!(runner.run("cmd2").unwrap_err(), "fail");
        assert_eq!(runner.run("cmd3").unwrap(), "third");
    }

    #[test]
    fn mock_runner_defaults_to_empty_ok() {
        let runner = MockRunner::new();
        let result = runner.run("anything");
        assert_eq!(result.unwrap(), "");
    }

    #[test]
    fn rules_match_by_substring_and_repeat_last() {
        let runner = MockRunner::new()
            .on("file /root", Ok("cannot open".into()))
            .on("file /root", Ok("ASCII text".into()))
            .on("rsync", Ok("sent 10 bytes  2.00 bytes/sec".into()));

        assert_eq!(runner.run("ssh host 'file /root/done'").unwrap(), "cannot open");
        assert_eq!(runner.run("ssh host 'file /root/done'").unwrap(), "ASCII text");
        assert_eq!(runner.run("ssh host 'file /root/done'").unwrap(), "ASCII text");
        assert!(runner.run("rsync -avz a b").unwrap().contains("bytes/sec"));
        assert_eq!(runner.run("uptime").unwrap(), "");
        assert_eq!(runner.count_matching("file /root"), 3);
    }

    #[test]
    fn on_times_queues_repeated_responses() {
        let runner = MockRunner::new()
            .on_times("tmux new-session", Err("Connection timed out".into()), 2)
            .on("tmux new-session", Ok(String::new()));
        assert!(runner.run("tmux new-session -d -s main").is_err());
        assert!(runner.run("tmux new-session -d -s main").is_err());
        assert!(runner.run("tmux new-session -d -s main").is_ok());
    }

    #[test]
    fn shell_runner_captures_output_and_status() {
        let runner = ShellRunner;
        assert_eq!(runner.run("printf hello").unwrap(), "hello");
        let err = runner.run("printf oops >&2; exit 3").unwrap_err();
        assert_eq!(err, "oops");
        let err = runner.run("exit 4").unwrap_err();
        assert!(err.contains("exit"));
    }
}
