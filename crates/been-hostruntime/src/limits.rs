//! POSIX resource limits for task processes.
//!
//! On Unix the limits are applied in a `pre_exec` hook, after `fork()` and
//! right before `execve()`, so the task never runs unrestricted. Other
//! platforms log a warning and run the task without them.
use serde::Deserialize;
use tokio::process::Command;
#[cfg(not(unix))]
use tracing::warn;

/// Per-task rlimits. `None` leaves the inherited limit in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RlimitConfig {
    /// `RLIMIT_NOFILE`.
    pub max_open_files: Option<u64>,
    /// `RLIMIT_FSIZE`; exceeding it usually ends the process with `SIGXFSZ`.
    pub max_file_size_bytes: Option<u64>,
    /// `RLIMIT_CPU`, in seconds of CPU time.
    pub max_cpu_seconds: Option<u64>,
    /// `RLIMIT_CORE = 0` when set.
    pub disable_core_dumps: bool,
}

impl RlimitConfig {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.max_open_files.is_none()
            && self.max_file_size_bytes.is_none()
            && self.max_cpu_seconds.is_none()
            && !self.disable_core_dumps
    }
}

/// Install `config` on `cmd`. No-op for an empty config.
pub fn attach_rlimits(cmd: &mut Command, config: &RlimitConfig) {
    if config.is_empty() {
        return;
    }

    #[cfg(unix)]
    {
        unix::attach(cmd, config.clone());
    }

    #[cfg(not(unix))]
    {
        warn!(?config, "rlimits are not supported on this platform, ignoring");
    }
}

#[cfg(unix)]
mod unix {
    use std::io;

    use tokio::process::Command;

    use super::RlimitConfig;

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    type Resource = libc::__rlimit_resource_t;
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    type Resource = libc::c_int;

    pub(super) fn attach(cmd: &mut Command, config: RlimitConfig) {
        // SAFETY: the hook only calls `setrlimit`, which is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || {
                if let Some(n) = config.max_open_files {
                    set(libc::RLIMIT_NOFILE, n)?;
                }
                if let Some(n) = config.max_file_size_bytes {
                    set(libc::RLIMIT_FSIZE, n)?;
                }
                if let Some(n) = config.max_cpu_seconds {
                    set(libc::RLIMIT_CPU, n)?;
                }
                if config.disable_core_dumps {
                    set(libc::RLIMIT_CORE, 0)?;
                }
                Ok(())
            });
        }
    }

    fn set(resource: Resource, value: u64) -> io::Result<()> {
        let rlim = libc::rlimit {
            rlim_cur: value as libc::rlim_t,
            rlim_max: value as libc::rlim_t,
        };
        // SAFETY: `rlim` is a valid, initialized struct for the duration of the call.
        if unsafe { libc::setrlimit(resource, &rlim) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
