use std::fmt;

use bytes::{Bytes, BytesMut};
use clap::Args;
use owo_colors::OwoColorize;

use common::tree::VirtualPath;
use common::{Caller, FsError, RefreshError};

use crate::cli::op::{Op, OpContext};

const CHUNK: u32 = 64 * 1024;

#[derive(Args, Debug, Clone)]
pub struct Cat {
    /// File path inside the filesystem, e.g. `demo/main/README`
    pub path: String,

    /// Read as this user
    #[arg(long, env = "USER")]
    pub user: String,
}

#[derive(Debug)]
pub enum CatContent {
    Text(String),
    Binary(Bytes),
}

#[derive(Debug)]
pub struct CatOutput {
    pub path: String,
    pub content: CatContent,
}

impl fmt::Display for CatOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.content {
            CatContent::Text(text) => f.write_str(text),
            CatContent::Binary(bytes) => {
                writeln!(
                    f,
                    "{} {}  {} {} bytes",
                    "File:".dimmed(),
                    self.path.bold(),
                    "Size:".dimmed(),
                    bytes.len()
                )?;
                let hex = bytes
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<Vec<_>>()
                    .join(" ");
                write!(f, "{} {hex}", "Binary content (hex):".dimmed())
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatError {
    #[error("refresh failed: {0}")]
    Refresh(#[from] RefreshError),
    #[error("{path}: {source}")]
    Fs { path: String, source: FsError },
}

#[async_trait::async_trait]
impl Op for Cat {
    type Error = CatError;
    type Output = CatOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let fs_error = |source| CatError::Fs {
            path: self.path.clone(),
            source,
        };
        let path = VirtualPath::parse(&self.path).map_err(fs_error)?;
        let engine = ctx.refreshed_engine().await?;
        let caller = Caller::new(self.user.as_str());

        let fh = engine.open(&caller, &path, false).await.map_err(fs_error)?;
        let mut data = BytesMut::new();
        let result = loop {
            match engine.read(fh, data.len() as u64, CHUNK).await {
                Ok(chunk) if chunk.is_empty() => break Ok(()),
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(e) => break Err(e),
            }
        };
        engine.release(fh);
        result.map_err(fs_error)?;

        let data = data.freeze();
        let content = match std::str::from_utf8(&data) {
            Ok(text) => CatContent::Text(text.to_string()),
            Err(_) => CatContent::Binary(data),
        };
        Ok(CatOutput {
            path: self.path.clone(),
            content,
        })
    }
}
