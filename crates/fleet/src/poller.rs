//! Convergence polling
//!
//! Remote mutations are asynchronous: a call returns as soon as the request
//! is accepted and the monitor then moves through transient states. The
//! poller blocks the calling pipeline until the monitor settles.

use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, ProviderResultExt, Result};
use crate::monitor::{MonitorState, MonitorStatus};
use crate::provider::MonitorApi;

/// Polling is reported as slow after this long without converging
const SLOW_CONVERGENCE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Sleep before every status query
    pub interval: Duration,
    /// Give up after this long, `None` polls forever
    pub max_wait: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_wait: None,
        }
    }
}

pub struct Poller<'a> {
    monitors: &'a dyn MonitorApi,
    config: &'a PollConfig,
}

impl<'a> Poller<'a> {
    pub fn new(monitors: &'a dyn MonitorApi, config: &'a PollConfig) -> Self {
        Self { monitors, config }
    }

    /// Wait until the state leaves `transient`
    pub fn wait_until_stable(
        &self,
        name: &str,
        transient: &[MonitorState],
        terminal_failure: Option<MonitorState>,
    ) -> Result<MonitorStatus> {
        self.poll(name, terminal_failure, |status| {
            !transient.contains(&status.state)
        })
    }

    /// Wait until the state equals `target`
    pub fn wait_for(
        &self,
        name: &str,
        target: MonitorState,
        terminal_failure: Option<MonitorState>,
    ) -> Result<MonitorStatus> {
        self.poll(name, terminal_failure, |status| status.state == target)
    }

    /// Wait until the monitor no longer exists
    pub fn wait_until_absent(&self, name: &str) -> Result<()> {
        let started = Instant::now();
        let mut warned = false;
        loop {
            thread::sleep(self.config.interval);
            let Some(remote) = self
                .monitors
                .describe(name)
                .during(|| format!("get monitor {name}"))?
            else {
                return Ok(());
            };
            log::trace!("[{name}] {}", remote.status.state);
            self.check_elapsed(name, started, &mut warned)?;
        }
    }

    fn poll<F>(
        &self,
        name: &str,
        terminal_failure: Option<MonitorState>,
        done: F,
    ) -> Result<MonitorStatus>
    where
        F: Fn(&MonitorStatus) -> bool,
    {
        let started = Instant::now();
        let mut warned = false;
        loop {
            thread::sleep(self.config.interval);
            let status = self
                .monitors
                .describe(name)
                .during(|| format!("get monitor {name}"))?
                .ok_or_else(|| Error::NotDeployed {
                    monitor: name.to_string(),
                })?
                .status;
            log::trace!("[{name}] {}", status.state);

            if terminal_failure == Some(status.state) {
                return Err(Error::TerminalState {
                    monitor: name.to_string(),
                    state: status.state.to_string(),
                    reason: status.reason().to_string(),
                });
            }
            if done(&status) {
                return Ok(status);
            }
            self.check_elapsed(name, started, &mut warned)?;
        }
    }

    fn check_elapsed(&self, name: &str, started: Instant, warned: &mut bool) -> Result<()> {
        let elapsed = started.elapsed();
        if let Some(max_wait) = self.config.max_wait
            && elapsed >= max_wait
        {
            return Err(Error::PollTimeout {
                monitor: name.to_string(),
                elapsed,
            });
        }
        if !*warned && elapsed >= SLOW_CONVERGENCE {
            log::warn!("[{name}] still waiting after {}s", elapsed.as_secs());
            *warned = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{Fault, SandboxConfig, SandboxPlatform};

    fn immediate() -> PollConfig {
        PollConfig {
            interval: Duration::ZERO,
            max_wait: None,
        }
    }

    #[test]
    fn test_waits_through_transient_states() {
        let platform = SandboxPlatform::new(SandboxConfig {
            settle_polls: 3,
            ..SandboxConfig::default()
        });
        platform.seed_monitor("web", MonitorState::Creating);
        platform.converge_to("web", MonitorState::Ready, None);

        let config = immediate();
        let status = Poller::new(&platform, &config)
            .wait_until_stable("web", &[MonitorState::Creating], Some(MonitorState::Error))
            .unwrap();
        assert_eq!(status.state, MonitorState::Ready);
        assert_eq!(platform.describe_count("web"), 3);
    }

    #[test]
    fn test_terminal_failure_returns_reason() {
        let platform = SandboxPlatform::new(SandboxConfig::default());
        platform.seed_monitor("b", MonitorState::Updating);
        platform.converge_to("b", MonitorState::Error, Some("script failed".into()));

        let config = immediate();
        let err = Poller::new(&platform, &config)
            .wait_until_stable(
                "b",
                &[MonitorState::Creating, MonitorState::Updating],
                Some(MonitorState::Error),
            )
            .unwrap_err();
        match err {
            Error::TerminalState { state, reason, .. } => {
                assert_eq!(state, "ERROR");
                assert_eq!(reason, "script failed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_max_wait_times_out() {
        let platform = SandboxPlatform::new(SandboxConfig::default());
        platform.seed_monitor("stuck", MonitorState::Creating);
        platform.inject(Fault::Stall {
            monitor: "stuck".into(),
        });

        let config = PollConfig {
            interval: Duration::from_millis(1),
            max_wait: Some(Duration::from_millis(20)),
        };
        let err = Poller::new(&platform, &config)
            .wait_until_stable("stuck", &[MonitorState::Creating], None)
            .unwrap_err();
        assert!(matches!(err, Error::PollTimeout { .. }));
    }

    #[test]
    fn test_wait_for_target() {
        let platform = SandboxPlatform::new(SandboxConfig::default());
        platform.seed_monitor("web", MonitorState::Stopping);
        platform.converge_to("web", MonitorState::Stopped, None);

        let config = immediate();
        let status = Poller::new(&platform, &config)
            .wait_for("web", MonitorState::Stopped, Some(MonitorState::Error))
            .unwrap();
        assert_eq!(status.state, MonitorState::Stopped);
    }

    #[test]
    fn test_missing_monitor_is_not_deployed() {
        let platform = SandboxPlatform::new(SandboxConfig::default());
        let config = immediate();
        let err = Poller::new(&platform, &config)
            .wait_for("nope", MonitorState::Ready, None)
            .unwrap_err();
        assert!(matches!(err, Error::NotDeployed { .. }));
        assert!(Poller::new(&platform, &config).wait_until_absent("nope").is_ok());
    }
}
