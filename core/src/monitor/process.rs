//! Typed remote process listing.
//!
//! Runs `ps -eo pid=,args=` on an instance and parses it into
//! `RemoteProcess` records, keeping only processes whose executable is the
//! scanning product.

use serde::{Deserialize, Serialize};

use crate::rig::config::SshEndpoint;
use crate::rig::remote::{RemoteError, RemoteExecutor};

/// Process listing without headers, one `<pid> <args>` line per process.
pub const PROCESS_QUERY: &str = "ps -eo pid=,args=";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProcess {
    pub pid: u32,
    pub command_line: String,
}

impl RemoteProcess {
    /// Basename of the first word of the command line.
    pub fn executable(&self) -> &str {
        let first = self.command_line.split_whitespace().next().unwrap_or("");
        first.rsplit('/').next().unwrap_or(first)
    }
}

/// Parse `ps -eo pid=,args=` output. Lines that do not start with a pid
/// are ignored.
pub fn parse_process_list(output: &str) -> Vec<RemoteProcess> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (pid, rest) = line.split_once(char::is_whitespace)?;
            let pid = pid.parse::<u32>().ok()?;
            let command_line = rest.trim();
            if command_line.is_empty() {
                return None;
            }
            Some(RemoteProcess {
                pid,
                command_line: command_line.to_string(),
            })
        })
        .collect()
}

/// Keep processes running `product`, excluding the tool's own process
/// listing helper.
pub fn filter_by_product(processes: Vec<RemoteProcess>, product: &str) -> Vec<RemoteProcess> {
    let own_listing = format!("{} utils ps", product);
    processes
        .into_iter()
        .filter(|p| p.executable().eq_ignore_ascii_case(product))
        .filter(|p| !p.command_line.contains(&own_listing))
        .collect()
}

/// Queries the scanning processes running on an instance.
#[derive(Clone)]
pub struct ProcessQuery {
    executor: RemoteExecutor,
    product: String,
}

impl ProcessQuery {
    pub fn new(executor: RemoteExecutor, product: &str) -> Self {
        ProcessQuery {
            executor,
            product: product.to_string(),
        }
    }

    pub fn list(&self, endpoint: &SshEndpoint) -> Result<Vec<RemoteProcess>, RemoteError> {
        let output = self.executor.exec(endpoint, PROCESS_QUERY)?;
        Ok(filter_by_product(parse_process_list(&output), &self.product))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::infrastructure::runner::MockRunner;

    const PS_OUTPUT: &str = "\
    1 /sbin/init
  812 sshd: root@pts/0
 1403 /usr/local/bin/osmedeus scan -f general -t example.com
 1410 osmedeus utils ps
 1502 tmux new-session -d -s main
 1600 Osmedeus server
";

    #[test]
    fn parses_pid_and_command_line() {
        let procs = parse_process_list(PS_OUTPUT);
        assert_eq!(procs.len(), 6);
        assert_eq!(procs[0], RemoteProcess { pid: 1, command_line: "/sbin/init".into() });
        assert_eq!(procs[2].executable(), "osmedeus");
    }

    #[test]
    fn filters_by_product_and_skips_own_listing() {
        let procs = filter_by_product(parse_process_list(PS_OUTPUT), "osmedeus");
        let pids: Vec<u32> = procs.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![1403, 1600]);
    }

    #[test]
    fn garbage_lines_are_ignored() {
        assert!(parse_process_list("PID COMMAND\n\n  \nabc def\n").is_empty());
    }

    #[test]
    fn query_runs_ps_over_ssh() {
        let runner = Arc::new(MockRunner::new().on("ps -eo", Ok(PS_OUTPUT.into())));
        let query = ProcessQuery::new(RemoteExecutor::new(runner.clone()), "osmedeus");
        let endpoint = SshEndpoint {
            user: "root".into(),
            host: "h".into(),
            port: 22,
            private_key: None,
            connect_timeout_secs: 5,
        };
        assert_eq!(query.list(&endpoint).unwrap().len(), 2);
        assert_eq!(runner.count_matching("ps -eo pid=,args="), 1);
    }
}
