//! The Unix socket listener (C5).
//!
//! Binds the proxy's socket, cleans up any stale file left behind by a
//! previous run, restricts the socket to owner access, and spawns one
//! [`Pipeline`] per accepted client.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::net::UnixListener;
use tokio::sync::watch;

use crate::pipeline::{ConnectionIdAllocator, IdentityFilter, Pipeline};

/// `sun_path` is 104 bytes on macOS and 108 on Linux; use the tighter bound.
const MAX_SOCKET_PATH: usize = 104;

/// Listens for client connections and spawns a pipeline for each.
#[derive(Debug)]
pub struct Listener {
    bind_path: PathBuf,
    listener: UnixListener,
    ids: ConnectionIdAllocator,
}

impl Listener {
    /// Bind the proxy's socket at `bind_path`.
    ///
    /// Removes a stale socket file left at that path, creates parent
    /// directories as needed, and restricts permissions to owner-only
    /// (0600) before returning.
    pub fn bind(bind_path: PathBuf) -> Result<Self> {
        let path_len = bind_path.as_os_str().len();
        if path_len >= MAX_SOCKET_PATH {
            anyhow::bail!(
                "socket path too long ({path_len} bytes, max {}): {}",
                MAX_SOCKET_PATH - 1,
                bind_path.display()
            );
        }

        if bind_path.exists() {
            std::fs::remove_file(&bind_path)
                .with_context(|| format!("failed to remove stale socket: {}", bind_path.display()))?;
        }
        if let Some(parent) = bind_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let std_listener = std::os::unix::net::UnixListener::bind(&bind_path)
            .with_context(|| format!("failed to bind socket: {}", bind_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&bind_path, std::fs::Permissions::from_mode(0o600))?;
        }

        std_listener.set_nonblocking(true)?;
        let listener = UnixListener::from_std(std_listener)?;

        log::info!("gubinge listening on {}", bind_path.display());

        Ok(Self {
            bind_path,
            listener,
            ids: ConnectionIdAllocator::new(),
        })
    }

    pub fn bind_path(&self) -> &Path {
        &self.bind_path
    }

    /// Accept connections until `shutdown` fires, spawning one detached
    /// pipeline task per client. In-flight connections are left to finish
    /// on their own; this only stops accepting new ones.
    pub async fn serve(
        self,
        upstream_path: PathBuf,
        identity_filter: IdentityFilter,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    log::info!("listener shutting down, no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let id = self.ids.next();
                            log::info!("[{id}] client connected");
                            let pipeline = Pipeline::new(id, upstream_path.clone(), identity_filter.clone());
                            tokio::spawn(async move {
                                pipeline.run(stream).await;
                            });
                        }
                        Err(e) => {
                            log::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.bind_path);
    }
}
