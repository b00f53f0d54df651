use common::{FsEngine, RefreshError};
use gbfs_daemon::{build_engine, Config};

/// Shared inputs for every command.
#[derive(Debug, Clone)]
pub struct OpContext {
    pub config: Config,
}

impl OpContext {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// An engine that has completed its first refresh.
    pub async fn refreshed_engine(&self) -> Result<FsEngine, RefreshError> {
        let engine = build_engine(&self.config);
        engine.refresh().await?;
        Ok(engine)
    }
}

/// One CLI command.
#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;
    type Output: std::fmt::Display + std::fmt::Debug + Send;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

/// Generates `Command` (a clap subcommand enum over the listed ops), plus
/// `OpOutput` and `OpError` wrapping each op's output and error, and an
/// [`Op`] impl that dispatches to the selected variant.
#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $op:ty)),* $(,)?) => {
        #[derive(clap::Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($op),)*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$op as $crate::cli::op::Op>::Output),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$op as $crate::cli::op::Op>::Error),
            )*
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(OpOutput::$variant(output) => write!(f, "{output}"),)*
                }
            }
        }

        #[async_trait::async_trait]
        impl $crate::cli::op::Op for Command {
            type Error = OpError;
            type Output = OpOutput;

            async fn execute(
                &self,
                ctx: &$crate::cli::op::OpContext,
            ) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => op
                            .execute(ctx)
                            .await
                            .map(OpOutput::$variant)
                            .map_err(OpError::$variant),
                    )*
                }
            }
        }
    };
}
