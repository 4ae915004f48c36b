use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};

use crate::domain::{DomainError, Operation, QueryParams, Resource};

/// Command-line arguments for the storeops binary.
#[derive(Debug, Parser)]
#[command(name = "storeops", version, about = "Admin dashboard data client")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "STOREOPS_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Fetch one query through the cache and print it as JSON.
    Get(GetArgs),
    /// Follow a query and the realtime stream until interrupted.
    Watch(WatchArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the admin API base URL.
    #[arg(long = "api-base-url", value_name = "URL", global = true)]
    pub api_base_url: Option<String>,

    /// Bearer token forwarded to the admin API.
    #[arg(long = "api-token", env = "STOREOPS_API_TOKEN", value_name = "TOKEN", global = true)]
    pub api_token: Option<String>,

    /// Override the per-request timeout.
    #[arg(long = "api-timeout-ms", value_name = "MILLIS", global = true)]
    pub api_timeout_ms: Option<u64>,

    /// Disable the query cache.
    #[arg(long = "no-cache", action = clap::ArgAction::SetTrue, global = true)]
    pub no_cache: bool,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OperationArg {
    List,
    Detail,
    Stats,
    Overview,
    Sales,
}

/// A query named on the command line.
#[derive(Debug, Args, Clone)]
pub struct QueryArgs {
    /// products, orders, customers, categories, dashboard, analytics or activity.
    pub resource: Resource,

    #[arg(long = "op", value_enum)]
    pub operation: Option<OperationArg>,

    /// Entity id; implies `--op detail`.
    #[arg(long, value_name = "ID")]
    pub id: Option<String>,

    /// Query parameter as `key=value`; may repeat.
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,
}

impl QueryArgs {
    /// Operation requested, defaulting by resource when `--op` is absent.
    pub fn operation(&self) -> Result<Operation, DomainError> {
        let requested = match (self.operation, self.id.as_ref()) {
            (Some(op), _) => op,
            (None, Some(_)) => OperationArg::Detail,
            (None, None) => default_operation(self.resource),
        };
        match requested {
            OperationArg::List => Ok(Operation::List),
            OperationArg::Stats => Ok(Operation::Stats),
            OperationArg::Overview => Ok(Operation::Overview),
            OperationArg::Sales => Ok(Operation::Sales),
            OperationArg::Detail => match self.id.as_ref() {
                Some(id) => Ok(Operation::detail(id.clone())),
                None => Err(DomainError::MissingId {
                    resource: self.resource.as_str(),
                    action: "detail",
                }),
            },
        }
    }

    pub fn query_params(&self) -> Result<QueryParams, DomainError> {
        QueryParams::from_pairs(self.params.iter().map(String::as_str))
    }
}

fn default_operation(resource: Resource) -> OperationArg {
    match resource {
        Resource::Dashboard => OperationArg::Stats,
        Resource::Analytics => OperationArg::Sales,
        _ => OperationArg::List,
    }
}

#[derive(Debug, Args, Clone)]
pub struct GetArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    /// Print compact JSON instead of pretty-printed output.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub compact: bool,
}

#[derive(Debug, Args, Clone)]
pub struct WatchArgs {
    /// Resource whose query is re-printed on every invalidation.
    #[arg(long, default_value = "dashboard")]
    pub resource: Resource,

    #[arg(long = "op", value_enum)]
    pub operation: Option<OperationArg>,
}

impl WatchArgs {
    pub fn query(&self) -> QueryArgs {
        QueryArgs {
            resource: self.resource,
            operation: self.operation,
            id: None,
            params: Vec::new(),
        }
    }
}
