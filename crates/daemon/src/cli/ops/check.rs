use std::fmt;

use clap::Args;
use comfy_table::Table;
use owo_colors::OwoColorize;

use common::repository::RepoStatus;
use common::RefreshError;

use crate::cli::op::{Op, OpContext};

/// Run one refresh and report what every configured repository looks like.
#[derive(Args, Debug, Clone)]
pub struct Check {}

#[derive(Debug)]
pub struct RepoReport {
    pub name: String,
    pub backend: Option<String>,
    pub status: RepoStatus,
    pub refs: usize,
    pub last_commit: Option<i64>,
}

#[derive(Debug)]
pub struct CheckOutput {
    pub generation: u64,
    pub open_acl: bool,
    pub acl_entries: usize,
    pub repositories: Vec<RepoReport>,
}

impl CheckOutput {
    fn unavailable(&self) -> usize {
        self.repositories
            .iter()
            .filter(|r| r.status != RepoStatus::Ready)
            .count()
    }
}

impl fmt::Display for CheckOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", "Generation:".bold(), self.generation)?;
        if self.open_acl {
            writeln!(f, "{} open (every user reads every repository)", "ACL:".bold())?;
        } else {
            writeln!(f, "{} {} grants", "ACL:".bold(), self.acl_entries)?;
        }

        if self.repositories.is_empty() {
            return write!(f, "{}", "No repositories found".yellow());
        }

        let mut table = Table::new();
        table.set_header(vec!["NAME", "BACKEND", "STATUS", "REFS", "LAST COMMIT"]);
        for repo in &self.repositories {
            let status = match &repo.status {
                RepoStatus::Ready => "ready".to_string(),
                RepoStatus::Unavailable(reason) => format!("unavailable: {reason}"),
            };
            table.add_row(vec![
                repo.name.clone(),
                repo.backend.clone().unwrap_or_else(|| "-".to_string()),
                status,
                repo.refs.to_string(),
                repo.last_commit
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ]);
        }
        writeln!(f, "{table}")?;

        let unavailable = self.unavailable();
        if unavailable == 0 {
            write!(
                f,
                "{} {} repositories ready",
                "✓".green(),
                self.repositories.len()
            )
        } else {
            write!(
                f,
                "{} {} of {} repositories unavailable",
                "✗".red(),
                unavailable,
                self.repositories.len()
            )
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("refresh failed: {0}")]
    Refresh(#[from] RefreshError),
}

#[async_trait::async_trait]
impl Op for Check {
    type Error = CheckError;
    type Output = CheckOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let engine = ctx.refreshed_engine().await?;
        let state = engine.snapshot();

        let repositories = state
            .repositories()
            .map(|repo| RepoReport {
                name: repo.name().to_string(),
                backend: repo.kind().map(|kind| kind.to_string()),
                status: repo.status().clone(),
                refs: repo.refs().len(),
                last_commit: repo.last_commit_time(),
            })
            .collect();

        Ok(CheckOutput {
            generation: state.generation(),
            open_acl: state.permissions().is_open(),
            acl_entries: state.permissions().len(),
            repositories,
        })
    }
}
