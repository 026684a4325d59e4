//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use papernet_core::SourceId;

/// Collect academic papers and grow a co-authorship network.
///
/// Papernet queries arXiv, PubMed and Semantic Scholar, merges duplicate
/// records across sources, and expands outward from seed authors through
/// their collaborators.
#[derive(Parser, Debug)]
#[command(name = "papernet")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/papernet/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Persist the corpus into this SQLite file
    #[arg(long, global = true, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Sources to query, in order (overrides the config file)
    #[arg(long, global = true, value_delimiter = ',', value_parser = parse_source)]
    pub sources: Vec<SourceId>,

    /// Print network analysis after the session summary
    #[arg(long, global = true)]
    pub analysis: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Collection modes.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Collect papers by author names, optionally expanding through co-authors
    Authors(AuthorsArgs),
    /// Collect papers matching all given keywords
    Keywords(KeywordsArgs),
}

/// Arguments for `papernet authors`.
#[derive(ClapArgs, Debug)]
pub struct AuthorsArgs {
    /// Seed author names (e.g. "Alice Smith" or "Smith, Alice")
    #[arg(required = true, value_name = "NAME")]
    pub names: Vec<String>,

    /// Expand through discovered co-authors
    #[arg(short, long)]
    pub expand: bool,

    /// Papers requested per author from each source
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=10_000))]
    pub max_papers: Option<u64>,

    /// Generations to run, the seed generation included
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_generations: Option<u32>,

    /// Stop once this many distinct papers are collected
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_total_papers: Option<u64>,

    /// New authors carried into each generation
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_new_authors: Option<u64>,

    /// Stop once this many authors are queried
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_authors: Option<u64>,
}

/// Arguments for `papernet keywords`.
#[derive(ClapArgs, Debug)]
pub struct KeywordsArgs {
    /// Keywords; every one must match
    #[arg(required = true, value_name = "KEYWORD")]
    pub keywords: Vec<String>,

    /// Distinct papers to collect across all sources
    #[arg(long, default_value_t = papernet_core::engine::DEFAULT_MAX_KEYWORD_PAPERS as u64,
          value_parser = clap::value_parser!(u64).range(1..=10_000))]
    pub max_papers: u64,
}

fn parse_source(value: &str) -> Result<SourceId, String> {
    value.parse()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_authors_parses_names_and_flags() {
        let cli = Cli::try_parse_from([
            "papernet",
            "authors",
            "Alice Smith",
            "Bob Lee",
            "--expand",
            "--max-generations",
            "2",
        ])
        .unwrap();
        let Command::Authors(args) = cli.command else {
            panic!("expected authors command");
        };
        assert_eq!(args.names, vec!["Alice Smith", "Bob Lee"]);
        assert!(args.expand);
        assert_eq!(args.max_generations, Some(2));
        assert_eq!(args.max_papers, None);
    }

    #[test]
    fn test_cli_keywords_default_max_papers() {
        let cli = Cli::try_parse_from(["papernet", "keywords", "crispr"]).unwrap();
        let Command::Keywords(args) = cli.command else {
            panic!("expected keywords command");
        };
        assert_eq!(args.max_papers, 100);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let cli = Cli::try_parse_from(["papernet", "-vv", "keywords", "x"]).unwrap();
        assert_eq!(cli.verbose, 2);

        let cli = Cli::try_parse_from(["papernet", "keywords", "x", "--quiet"]).unwrap();
        assert!(cli.quiet);
    }

    #[test]
    fn test_cli_sources_are_parsed() {
        let cli =
            Cli::try_parse_from(["papernet", "--sources", "s2,arxiv", "keywords", "x"]).unwrap();
        assert_eq!(cli.sources, vec![SourceId::SemanticScholar, SourceId::Arxiv]);

        let result = Cli::try_parse_from(["papernet", "--sources", "scopus", "keywords", "x"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_requires_subcommand_arguments() {
        let result = Cli::try_parse_from(["papernet", "authors"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn test_cli_zero_generations_rejected() {
        let result =
            Cli::try_parse_from(["papernet", "authors", "A B", "--max-generations", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let result = Cli::try_parse_from(["papernet", "--version"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::DisplayVersion
        );
    }
}
