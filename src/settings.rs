//! Runtime configuration, read from the process environment.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::handler::Liveness;

/// Seconds each watch request stays open. Values above the apiserver cap are
/// clamped when the watch is issued.
pub const ENV_WATCH_TIMEOUT_SECONDS: &str = "CRD_WATCH_TIMEOUT_SECONDS";

/// Hours until the controller exits so the pod restarts with a fresh watch.
/// `0` disables the scheduled restart.
pub const ENV_RESTART_HOURS: &str = "CONTROLLER_RESTART_HOURS";

const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_RESTART_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Everything [`run`](crate::run) needs to know about the deployment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// `apiVersion` of the resource type to watch.
    pub api_version: String,
    /// Kind of the resource type to watch.
    pub kind: String,
    pub watch_timeout: Duration,
    /// `None` keeps the controller running until the process is killed.
    pub restart_after: Option<Duration>,
    /// `None` disables the heartbeat file.
    pub liveness: Option<Liveness>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            api_version: crate::TARGET_API_VERSION.to_owned(),
            kind: crate::CONTROLLER_KIND.to_owned(),
            watch_timeout: DEFAULT_WATCH_TIMEOUT,
            restart_after: Some(DEFAULT_RESTART_AFTER),
            liveness: Some(Liveness::default()),
        }
    }
}

impl Settings {
    /// Defaults overridden by [`ENV_WATCH_TIMEOUT_SECONDS`] and
    /// [`ENV_RESTART_HOURS`]. Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut settings = Settings::default();
        if let Some(secs) = parse_env::<u64>(ENV_WATCH_TIMEOUT_SECONDS) {
            settings.watch_timeout = Duration::from_secs(secs);
        }
        if let Some(hours) = parse_env::<u64>(ENV_RESTART_HOURS) {
            match hours.checked_mul(60 * 60) {
                Some(0) => settings.restart_after = None,
                Some(seconds) => settings.restart_after = Some(Duration::from_secs(seconds)),
                None => log::warn!("Ignoring {ENV_RESTART_HOURS}={hours}: restart interval out of range"),
            }
        }
        settings
    }
}

fn parse_env<T: FromStr>(name: &str) -> Option<T>
where
    T::Err: fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("Ignoring {name}={raw:?}: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::time::Duration;

    use super::{Settings, ENV_RESTART_HOURS, ENV_WATCH_TIMEOUT_SECONDS};

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert_eq!(settings.api_version, "deploy.razee.io/v1alpha2");
        assert_eq!(settings.kind, "MustacheTemplate");
        assert_eq!(settings.watch_timeout, Duration::from_secs(300));
        assert_eq!(
            settings.restart_after,
            Some(Duration::from_secs(24 * 60 * 60))
        );
        assert!(settings.liveness.is_some());
    }

    // The process environment is shared across test threads, so every
    // from_env case lives in this one test.
    #[test]
    fn from_env_overrides() {
        env::remove_var(ENV_WATCH_TIMEOUT_SECONDS);
        env::remove_var(ENV_RESTART_HOURS);
        let settings = Settings::from_env();
        assert_eq!(settings.watch_timeout, Duration::from_secs(300));
        assert_eq!(
            settings.restart_after,
            Some(Duration::from_secs(24 * 60 * 60))
        );

        env::set_var(ENV_WATCH_TIMEOUT_SECONDS, "30");
        env::set_var(ENV_RESTART_HOURS, "6");
        let settings = Settings::from_env();
        assert_eq!(settings.watch_timeout, Duration::from_secs(30));
        assert_eq!(settings.restart_after, Some(Duration::from_secs(6 * 60 * 60)));

        env::set_var(ENV_RESTART_HOURS, "0");
        assert_eq!(Settings::from_env().restart_after, None);

        env::set_var(ENV_WATCH_TIMEOUT_SECONDS, "soon");
        env::set_var(ENV_RESTART_HOURS, "-1");
        let settings = Settings::from_env();
        assert_eq!(settings.watch_timeout, Duration::from_secs(300));
        assert_eq!(
            settings.restart_after,
            Some(Duration::from_secs(24 * 60 * 60))
        );

        // Parses as u64 but does not fit once converted to seconds.
        env::set_var(ENV_RESTART_HOURS, u64::MAX.to_string());
        assert_eq!(
            Settings::from_env().restart_after,
            Some(Duration::from_secs(24 * 60 * 60))
        );

        env::remove_var(ENV_WATCH_TIMEOUT_SECONDS);
        env::remove_var(ENV_RESTART_HOURS);
    }
}
