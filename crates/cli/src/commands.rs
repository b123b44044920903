use crate::error::CliError;
use clap::{Args, Subcommand};
use compiler::{RequestContext, UserContext};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Print the SQL and parameters a selector compiles to
    Compile {
        #[command(flatten)]
        selector: SelectorArgs,

        #[arg(
            long,
            help = "Compile the selector file as insecure: no login required, no environment scoping"
        )]
        insecure: bool,
    },
    /// Check a selector and its includes without touching the database
    Validate {
        #[command(flatten)]
        selector: SelectorArgs,
    },
    /// Run a selector against SELECTOR_DATABASE_URL and print the response
    Run {
        #[command(flatten)]
        selector: SelectorArgs,
    },
}

#[derive(Args, Debug)]
pub struct SelectorArgs {
    #[arg(
        long = "selector",
        value_name = "FILE",
        help = "Selector JSON file",
        conflicts_with = "id",
        required_unless_present = "id"
    )]
    pub file: Option<PathBuf>,

    #[arg(long, help = "Id of a stored selector")]
    pub id: Option<i64>,

    #[arg(
        long,
        help = "Directory holding stored selectors as <id>.json; the database is used when omitted"
    )]
    pub store_dir: Option<PathBuf>,

    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_variable)]
    pub vars: Vec<(String, String)>,

    #[arg(long, help = "Run on behalf of this user id")]
    pub user_id: Option<u64>,

    #[arg(long, help = "Compile for the filter-items listing (LEFT JOINs only)")]
    pub filter_items: bool,

    #[arg(long, help = "Replace placeholders nothing resolves with an empty string")]
    pub remove_unknown: bool,
}

impl SelectorArgs {
    pub fn context(&self) -> RequestContext {
        let context = self
            .vars
            .iter()
            .fold(RequestContext::new(), |context, (name, value)| {
                context.with_query(name, value)
            });
        match self.user_id {
            Some(id) => context.with_user(UserContext::new(id)),
            None => context,
        }
    }
}

fn parse_variable(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(CliError::InvalidVariable(raw.to_string()).to_string()),
    }
}
