use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

use crate::cli::op::{Op, OpContext};

#[derive(Args, Debug, Clone)]
pub struct Mount {
    /// Directory to mount on (defaults to `mount_point` from the config)
    pub mountpoint: Option<PathBuf>,

    /// Let other users reach the mount
    #[arg(long)]
    pub allow_other: bool,
}

#[derive(Debug)]
pub struct MountOutput {
    pub mountpoint: PathBuf,
    pub generation: u64,
}

impl fmt::Display for MountOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            "Unmounted".green().bold(),
            self.mountpoint.display().to_string().bold(),
            format!("(last generation {})", self.generation).dimmed()
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("no mount point given and none configured")]
    NoMountPoint,
    #[error("mount point {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("failed to mount: {0}")]
    Mount(#[source] std::io::Error),
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
    #[error("gbfs was built without FUSE support")]
    Unsupported,
}

#[async_trait::async_trait]
impl Op for Mount {
    type Error = MountError;
    type Output = MountOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let mountpoint = self
            .mountpoint
            .clone()
            .or_else(|| ctx.config.mount_point.clone())
            .ok_or(MountError::NoMountPoint)?;
        if !mountpoint.is_dir() {
            return Err(MountError::NotADirectory(mountpoint));
        }
        serve(self, ctx, mountpoint).await
    }
}

#[cfg(feature = "fuse")]
async fn serve(
    op: &Mount,
    ctx: &OpContext,
    mountpoint: PathBuf,
) -> Result<MountOutput, MountError> {
    use gbfs_daemon::fuse::{spawn_mount, GitFs, MountOptions};
    use gbfs_daemon::{build_engine, spawn_refresh_loop};
    use tokio::signal::unix::{signal, SignalKind};

    let engine = build_engine(&ctx.config);
    match engine.refresh().await {
        Ok(generation) => tracing::info!(generation, "initial refresh complete"),
        Err(e) => tracing::warn!(error = %e, "initial refresh failed, serving an empty tree"),
    }

    let options = MountOptions {
        allow_other: op.allow_other || ctx.config.allow_other,
    };
    let fs = GitFs::new(engine.clone(), tokio::runtime::Handle::current());
    let session = spawn_mount(fs, &mountpoint, &options).map_err(MountError::Mount)?;
    let refresher = spawn_refresh_loop(engine.clone(), ctx.config.refresh_interval());

    let mut hangup = signal(SignalKind::hangup()).map_err(MountError::Signal)?;
    let mut terminate = signal(SignalKind::terminate()).map_err(MountError::Signal)?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = terminate.recv() => break,
            _ = hangup.recv() => {
                tracing::info!("SIGHUP received, refreshing");
                refresher.trigger();
            }
        }
    }

    tracing::info!(mountpoint = %mountpoint.display(), "shutting down");
    refresher.shutdown().await;
    // Unmounting joins the session thread.
    if let Err(e) = tokio::task::spawn_blocking(move || drop(session)).await {
        tracing::warn!(error = %e, "unmount did not finish cleanly");
    }

    Ok(MountOutput {
        mountpoint,
        generation: engine.generation(),
    })
}

#[cfg(not(feature = "fuse"))]
async fn serve(
    _op: &Mount,
    _ctx: &OpContext,
    _mountpoint: PathBuf,
) -> Result<MountOutput, MountError> {
    Err(MountError::Unsupported)
}
