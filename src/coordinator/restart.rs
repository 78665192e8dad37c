//! Restart port for demoted primaries

use crate::common::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Default deadline for one restart command
pub const DEFAULT_RESTART_TIMEOUT: Duration = Duration::from_secs(60);

/// Brings the process behind a node address back up
#[async_trait]
pub trait Restarter: Send + Sync {
    async fn restart_at(&self, address: &str) -> Result<()>;
}

/// Restarts nothing
pub struct NoopRestarter;

#[async_trait]
impl Restarter for NoopRestarter {
    async fn restart_at(&self, address: &str) -> Result<()> {
        tracing::info!(node = %address, "No restart command configured, skipping restart");
        Ok(())
    }
}

/// Runs a shell command, `{address}` is replaced by the node address.
/// A command still running at the deadline is killed.
pub struct CommandRestarter {
    template: String,
    timeout: Duration,
}

impl CommandRestarter {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            timeout: DEFAULT_RESTART_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn render(&self, address: &str) -> String {
        self.template.replace("{address}", address)
    }
}

#[async_trait]
impl Restarter for CommandRestarter {
    async fn restart_at(&self, address: &str) -> Result<()> {
        let command = self.render(address);
        tracing::info!(node = %address, command = %command, "Restarting node");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "restart command for {} still running after {:?}",
                    address, self.timeout
                )))
            }
        };

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "restart command for {} exited with {}: {}",
                address,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template() {
        let restarter = CommandRestarter::new("docker restart $(docker ps -qf publish={address})");
        assert_eq!(
            restarter.render("6379"),
            "docker restart $(docker ps -qf publish=6379)"
        );
    }

    #[tokio::test]
    async fn test_command_status() {
        assert!(CommandRestarter::new("true").restart_at("n1").await.is_ok());
        assert!(CommandRestarter::new("exit 3").restart_at("n1").await.is_err());
        assert!(NoopRestarter.restart_at("n1").await.is_ok());
    }

    #[tokio::test]
    async fn test_hung_command_is_cut_off() {
        let restarter = CommandRestarter::new("sleep 30").with_timeout(Duration::from_millis(100));
        let started = std::time::Instant::now();
        assert!(matches!(
            restarter.restart_at("n1").await,
            Err(Error::Timeout(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
