//! Instance addressing.
//!
//! `SshEndpoint` describes how to reach one provisioned instance (user,
//! address, port, key) and builds the ssh argument lists used by the remote
//! executor and by rsync. `InstanceHandle` pairs an endpoint with the
//! provider-assigned identity of the instance.
//!
//! Instances are ephemeral and single-use, so host key checking is always
//! disabled and nothing is written to `known_hosts`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::infrastructure::tmux::shell_escape;
use crate::types::config::SshSettings;


// ---------------------------------------------------------------------------
// SshEndpoint
// ---------------------------------------------------------------------------

/// SSH coordinates of a single instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshEndpoint {
    pub user: String,
    pub host: String,
    pub port: u16,
    /// Path to the private key, if not using the ssh default.
    pub private_key: Option<String>,
    pub connect_timeout_secs: u64,
}

impl SshEndpoint {
    /// Endpoint for `host` using the configured user, port and key.
    pub fn from_settings(host: &str, ssh: &SshSettings) -> Self {
        let key = ssh.private_key.to_string_lossy();
        SshEndpoint {
            user: ssh.user.clone(),
            host: host.to_string(),
            port: ssh.port,
            private_key: if key.is_empty() { None } else { Some(key.into_owned()) },
            connect_timeout_secs: ssh.connect_timeout_secs,
        }
    }

    /// Build the `user@host` string used in SSH/rsync commands.
    pub fn user_at_host(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Options shared by ssh and rsync's `-e` transport, without a
    /// destination.
    pub fn ssh_options(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-p".to_string(),
            self.port.to_string(),
        ];
        if let Some(ref key) = self.private_key {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        args
    }

    /// Build base SSH arguments (options and user@host) without a command.
    pub fn ssh_base_args(&self) -> Vec<String> {
        let mut args = self.ssh_options();
        args.push(self.user_at_host());
        args
    }

    /// Full shell command running `remote_cmd` on this endpoint.
    pub fn ssh_command(&self, remote_cmd: &str) -> String {
        let mut parts = vec!["ssh".to_string()];
        parts.extend(self.ssh_base_args().iter().map(|a| shell_escape(a)));
        parts.push(shell_escape(remote_cmd));
        parts.join(" ")
    }

    /// The `-e` transport string passed to rsync.
    pub fn rsync_transport(&self) -> String {
        let mut parts = vec!["ssh".to_string()];
        parts.extend(self.ssh_options());
        parts.join(" ")
    }
}

impl fmt::Display for SshEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port == 22 {
            write!(f, "{}", self.user_at_host())
        } else {
            write!(f, "{}:{}", self.user_at_host(), self.port)
        }
    }
}


// ---------------------------------------------------------------------------
// InstanceHandle
// ---------------------------------------------------------------------------

/// A provisioned instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceHandle {
    /// Provider-assigned identifier, used for boot and delete.
    pub id: String,
    /// Name requested at creation.
    pub name: String,
    pub public_ip: String,
    pub endpoint: SshEndpoint,
}

impl InstanceHandle {
    pub fn new(id: &str, name: &str, public_ip: &str, ssh: &SshSettings) -> Self {
        InstanceHandle {
            id: id.to_string(),
            name: name.to_string(),
            public_ip: public_ip.to_string(),
            endpoint: SshEndpoint::from_settings(public_ip, ssh),
        }
    }
}
