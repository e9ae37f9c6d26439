//! Ambient configuration: resolving the bind and upstream socket paths, and
//! raising the process's file-descriptor limit.
//!
//! Has no on-disk persistence — gubinge has no settings worth saving between
//! runs, only two paths resolved from flags and the environment at startup.

use std::path::PathBuf;

use anyhow::{Context, Result};

/// The two socket paths the proxy needs, resolved from CLI flags with
/// environment fallbacks.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_path: PathBuf,
    pub upstream_path: PathBuf,
}

impl Config {
    /// Resolve configuration from explicit CLI overrides.
    ///
    /// `upstream` falls back to `$SSH_AUTH_SOCK`; `bind` falls back to
    /// [`default_bind_path`].
    pub fn resolve(bind: Option<PathBuf>, upstream: Option<PathBuf>) -> Result<Self> {
        let upstream_path = upstream
            .or_else(|| std::env::var_os("SSH_AUTH_SOCK").map(PathBuf::from))
            .context("no upstream agent socket: pass --upstream or set SSH_AUTH_SOCK")?;
        let bind_path = bind.unwrap_or_else(default_bind_path);
        Ok(Self {
            bind_path,
            upstream_path,
        })
    }
}

/// `~/.gubinge/sock-<hostname>`.
///
/// Falls back to `/tmp/gubinge/sock-<hostname>` if the home directory can't
/// be resolved (e.g. no `$HOME` set), so the proxy still has somewhere to
/// bind rather than failing startup outright.
pub fn default_bind_path() -> PathBuf {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
    base.join(".gubinge").join(format!("sock-{host}"))
}

/// Raise `RLIMIT_NOFILE` to its hard limit. Each connection holds two
/// sockets open for its lifetime, so the default soft limit (often 1024) is
/// easy to exhaust under load.
pub fn raise_fd_limit() -> std::io::Result<()> {
    let mut limits = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limits` is a valid, fully-initialised `rlimit` and
    // `RLIMIT_NOFILE` is a well-known resource constant.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limits) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    limits.rlim_cur = limits.rlim_max;
    // SAFETY: same as above; raising the soft limit to the existing hard
    // limit never requires privileges beyond what the process already has.
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limits) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    log::info!("raised RLIMIT_NOFILE to {}", limits.rlim_cur);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both cases live in one test function since they exercise the same
    // process-global `SSH_AUTH_SOCK` env var and would race if run as
    // separate #[test]s under the default parallel test harness.
    #[test]
    fn resolve_falls_back_to_ssh_auth_sock_env_and_errors_without_it() {
        std::env::remove_var("SSH_AUTH_SOCK");
        assert!(Config::resolve(None, None).is_err());

        std::env::set_var("SSH_AUTH_SOCK", "/tmp/real-agent.sock");
        let config = Config::resolve(Some(PathBuf::from("/tmp/bind.sock")), None).unwrap();
        assert_eq!(config.upstream_path, PathBuf::from("/tmp/real-agent.sock"));
        assert_eq!(config.bind_path, PathBuf::from("/tmp/bind.sock"));
        std::env::remove_var("SSH_AUTH_SOCK");
    }

    #[test]
    fn default_bind_path_includes_hostname() {
        let path = default_bind_path();
        let name = path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("sock-"));
    }
}
