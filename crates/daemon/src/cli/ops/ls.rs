use std::fmt;

use clap::Args;
use comfy_table::Table;

use common::tree::{Attr, FileType, VirtualPath};
use common::{Caller, FsError, RefreshError};

use crate::cli::op::{Op, OpContext};

#[derive(Args, Debug, Clone)]
pub struct Ls {
    /// Path inside the filesystem, e.g. `demo/main/docs`
    #[arg(default_value = "/")]
    pub path: String,

    /// List as this user
    #[arg(long, env = "USER")]
    pub user: String,
}

#[derive(Debug)]
pub struct LsItem {
    pub name: String,
    pub attr: Attr,
}

#[derive(Debug)]
pub struct LsOutput {
    pub items: Vec<LsItem>,
}

fn type_label(file_type: FileType) -> &'static str {
    match file_type {
        FileType::Directory => "dir",
        FileType::RegularFile => "file",
        FileType::Symlink => "link",
    }
}

impl fmt::Display for LsOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.items.is_empty() {
            return write!(f, "No items found");
        }

        let mut table = Table::new();
        table.set_header(vec!["TYPE", "MODE", "SIZE", "NAME"]);
        for item in &self.items {
            table.add_row(vec![
                type_label(item.attr.file_type).to_string(),
                format!("{:o}", item.attr.perm),
                item.attr.size.to_string(),
                item.name.clone(),
            ]);
        }
        write!(f, "{table}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LsError {
    #[error("refresh failed: {0}")]
    Refresh(#[from] RefreshError),
    #[error("{path}: {source}")]
    Fs { path: String, source: FsError },
}

#[async_trait::async_trait]
impl Op for Ls {
    type Error = LsError;
    type Output = LsOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let fs_error = |source| LsError::Fs {
            path: self.path.clone(),
            source,
        };
        let path = VirtualPath::parse(&self.path).map_err(fs_error)?;
        let engine = ctx.refreshed_engine().await?;
        let caller = Caller::new(self.user.as_str());

        let attr = engine.getattr(&caller, &path).await.map_err(fs_error)?;
        if attr.file_type != FileType::Directory {
            return Ok(LsOutput {
                items: vec![LsItem {
                    name: path.file_name().unwrap_or("/").to_string(),
                    attr,
                }],
            });
        }

        let mut items = Vec::new();
        for entry in engine.readdir(&caller, &path).await.map_err(fs_error)? {
            let found = engine
                .lookup(&caller, &path, &entry.name)
                .await
                .map_err(fs_error)?;
            items.push(LsItem {
                name: entry.name,
                attr: found.attr,
            });
        }
        Ok(LsOutput { items })
    }
}
