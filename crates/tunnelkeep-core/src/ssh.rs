//! SSH invocation contract
//!
//! Builds the exact argument vector handed to the external SSH client for a
//! tunnel, in a form that can be rendered back to the operator (`debug`
//! command) or spawned with both output streams captured.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::tunnel::{TunnelKind, TunnelSpec};

/// A fully-constructed SSH command line for one tunnel.
#[derive(Debug, Clone)]
pub struct SshCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl SshCommand {
    /// Build the command line for `spec`, delegating to `program`
    /// (normally `ssh` on PATH; tests inject a scripted stand-in).
    pub fn for_tunnel(program: &Path, spec: &TunnelSpec) -> Self {
        let forward_flag = match spec.kind {
            TunnelKind::Forward => "-L",
            TunnelKind::Reverse => "-R",
        };

        let args = vec![
            "-i".to_string(),
            spec.ssh_key.display().to_string(),
            "-N".to_string(),
            forward_flag.to_string(),
            spec.forward_spec(),
            format!("{}@{}", spec.user, spec.host),
            "-p".to_string(),
            spec.port.to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=30".to_string(),
            "-o".to_string(),
            "IdentitiesOnly=yes".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
        ];

        Self {
            program: program.to_path_buf(),
            args,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The command line as the operator would type it.
    pub fn render(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(' ') {
                line.push('\'');
                line.push_str(arg);
                line.push('\'');
            } else {
                line.push_str(arg);
            }
        }
        line
    }

    /// Spawn the child with stdout and stderr piped for capture.
    ///
    /// `kill_on_drop` guarantees no SSH process outlives its supervisor if
    /// the worker task is torn down abruptly.
    pub fn spawn(&self) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: TunnelKind) -> TunnelSpec {
        TunnelSpec {
            name: "db-prod".to_string(),
            user: "deploy".to_string(),
            host: "bastion.example.com".to_string(),
            port: 2222,
            ssh_key: PathBuf::from("/home/deploy/.ssh/id_ed25519"),
            kind,
            local_port: 5432,
            remote_host: "db.internal".to_string(),
            remote_port: 5433,
            reconnect_delay: 5,
        }
    }

    #[test]
    fn forward_argument_vector() {
        let cmd = SshCommand::for_tunnel(Path::new("ssh"), &spec(TunnelKind::Forward));
        assert_eq!(
            cmd.args(),
            &[
                "-i",
                "/home/deploy/.ssh/id_ed25519",
                "-N",
                "-L",
                "5432:db.internal:5433",
                "deploy@bastion.example.com",
                "-p",
                "2222",
                "-o",
                "ConnectTimeout=10",
                "-o",
                "ServerAliveInterval=30",
                "-o",
                "IdentitiesOnly=yes",
                "-o",
                "BatchMode=yes",
                "-o",
                "StrictHostKeyChecking=no",
            ]
        );
    }

    #[test]
    fn reverse_flips_flag_and_spec() {
        let cmd = SshCommand::for_tunnel(Path::new("ssh"), &spec(TunnelKind::Reverse));
        let args = cmd.args();
        assert!(args.contains(&"-R".to_string()));
        assert!(!args.contains(&"-L".to_string()));
        assert!(args.contains(&"5433:db.internal:5432".to_string()));
    }

    #[test]
    fn render_is_a_plain_command_line() {
        let cmd = SshCommand::for_tunnel(Path::new("ssh"), &spec(TunnelKind::Forward));
        let line = cmd.render();
        assert!(line.starts_with("ssh -i /home/deploy/.ssh/id_ed25519 -N -L "));
        assert!(line.ends_with("-o StrictHostKeyChecking=no"));
    }

    #[test]
    fn render_quotes_arguments_with_spaces() {
        let mut s = spec(TunnelKind::Forward);
        s.ssh_key = PathBuf::from("/home/deploy/my keys/id");
        let cmd = SshCommand::for_tunnel(Path::new("ssh"), &s);
        assert!(cmd.render().contains("'/home/deploy/my keys/id'"));
    }
}
