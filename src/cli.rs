//! Command-line interface parsing for the space biology explorer
//!
//! This module handles parsing of CLI arguments using clap, plus validation
//! of arguments clap cannot check by itself (research categories).

use clap::{ArgAction, Parser, Subcommand};
use thiserror::Error;

use crate::data::PublicationQuery;

/// Research categories publications are filed under
pub const CATEGORIES: &[&str] = &[
    "Space biology",
    "Plant biology",
    "Radiation biology",
    "Bone biology",
    "Mechanobiology",
    "Human health",
    "Mars research",
    "COVID-19",
];

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// The specified category is not recognized
    #[error("Invalid category: '{0}'. Valid categories: {valid}", valid = CATEGORIES.join(", "))]
    InvalidCategory(String),
}

/// Space biology explorer - search publications, manage favorites, ask questions
#[derive(Parser, Debug)]
#[command(name = "spacebio")]
#[command(about = "Explore NASA space biology research from the terminal")]
#[command(version)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Use the offline catalogue only
    #[arg(long, global = true)]
    pub offline: bool,

    /// Command to run; shows the dashboard when omitted
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Search publications
    ///
    /// Examples:
    ///   spacebio search "bone loss"
    ///   spacebio search --category "Plant biology"
    Search {
        /// Text matched against titles and categories
        query: Option<String>,

        /// Restrict results to one category
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Show one publication in detail
    Show {
        /// Publication id
        id: String,
    },

    /// Manage favorite publications
    #[command(subcommand)]
    Fav(FavAction),

    /// List open knowledge gaps
    Gaps,

    /// Show data integration status
    Integrations,

    /// Print a space quote
    Quote,

    /// Show recently viewed publications, gaps, integrations and a quote
    Dashboard,

    /// Ask the research assistant a question
    Ask {
        /// The question
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,

        /// Discuss a specific publication
        #[arg(long, value_name = "ID")]
        about: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum FavAction {
    /// List favorite publication ids
    List,
    /// Flip a publication's favorite state
    Toggle { id: String },
    /// Mark a publication as favorite
    Add { id: String },
    /// Unmark a publication
    Remove { id: String },
}

/// Parses a category argument into its canonical spelling
///
/// Matching ignores case and surrounding whitespace.
pub fn parse_category_arg(s: &str) -> Result<String, CliError> {
    let wanted = s.trim();
    CATEGORIES
        .iter()
        .find(|c| c.eq_ignore_ascii_case(wanted))
        .map(|c| c.to_string())
        .ok_or_else(|| CliError::InvalidCategory(s.to_string()))
}

/// Builds the publication query for `search`
pub fn search_query(query: Option<&str>, category: Option<&str>) -> Result<PublicationQuery, CliError> {
    let mut params = PublicationQuery::new(query.unwrap_or_default());
    if let Some(category) = category {
        params = params.with_category(parse_category_arg(category)?);
    }
    Ok(params)
}

/// Log filter directive for a `-v` count
pub fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}
