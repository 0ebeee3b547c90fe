//! orql command-line tool
//!
//! Compiles JSON query trees against a JSON metamodel and either prints the
//! rendered SQL or runs the query against a SQLite database.

mod commands;
mod formatter;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use formatter::OutputFormat;

/// orql command-line tool
#[derive(Parser, Debug)]
#[command(name = "orql")]
#[command(version, about = "Compile and run orql query trees")]
pub struct Args {
    /// Metamodel definition (JSON)
    #[arg(short, long)]
    pub model: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the SQL a query tree compiles to
    Explain {
        /// Query tree (JSON)
        #[arg(short, long)]
        query: PathBuf,

        /// SQL dialect
        #[arg(short, long, default_value = "ansi", value_enum)]
        dialect: DialectKind,
    },

    /// Run a query tree against a SQLite database
    Query {
        /// Query tree (JSON)
        #[arg(short, long)]
        query: PathBuf,

        /// SQLite database file
        #[arg(short = 'D', long)]
        database: PathBuf,

        /// Parameter binding, `name=value`; values parse as JSON, else as text
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Index of the first result
        #[arg(long)]
        first: Option<u32>,

        /// Maximum number of results
        #[arg(long)]
        max: Option<u32>,

        /// Output format
        #[arg(long, default_value = "text", value_enum)]
        format: OutputFormat,
    },
}

/// SQL dialect selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DialectKind {
    Ansi,
    Sqlite,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("orql_cli=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), commands::CliError> {
    match args.command {
        Command::Explain { query, dialect } => {
            for sql in commands::explain(&args.model, &query, dialect)? {
                println!("{}", sql);
            }
        }
        Command::Query {
            query,
            database,
            params,
            first,
            max,
            format,
        } => {
            let request = commands::QueryRequest {
                model: args.model,
                query,
                database,
                params,
                first,
                max,
            };
            println!("{}", commands::query(&request, format)?);
        }
    }
    Ok(())
}
