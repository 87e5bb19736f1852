//! Replicant CLI
//!
//! Command-line tools for inspecting and editing persisted Replicants.
//!
//! # Commands
//!
//! - `list` - List stored Replicants
//! - `get` - Print a stored value
//! - `set` - Store a value, optionally checked against a schema
//! - `remove` - Delete a stored value
//! - `validate` - Check a JSON document against a schema file
//! - `default` - Print the default value a schema produces
//! - `compact` - Rewrite a log store without dead rows

mod commands;

use clap::{Parser, Subcommand};
use commands::Backend;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Replicant command-line tools.
#[derive(Parser)]
#[command(name = "replicant")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store (a directory for `file`, a file for `log`)
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Store backend
    #[arg(global = true, short, long, value_enum, default_value_t = Backend::File)]
    backend: Backend,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored Replicants
    List {
        /// Only list this namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print a stored value
    Get {
        /// Namespace
        namespace: String,
        /// Name
        name: String,
    },

    /// Store a value
    Set {
        /// Namespace
        namespace: String,
        /// Name
        name: String,
        /// JSON text, or @file to read it from a file
        value: String,

        /// Reject the value unless it satisfies this schema file
        #[arg(short, long)]
        schema: Option<PathBuf>,
    },

    /// Delete a stored value
    Remove {
        /// Namespace
        namespace: String,
        /// Name
        name: String,
    },

    /// Check a JSON document against a schema file
    Validate {
        /// Schema file
        schema: PathBuf,
        /// JSON text, or @file to read it from a file
        value: String,
    },

    /// Print the default value a schema produces
    Default {
        /// Schema file
        schema: PathBuf,
    },

    /// Rewrite a log store, dropping superseded rows and tombstones
    Compact,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let mut out = io::stdout().lock();
    match cli.command {
        Commands::List { namespace, format } => {
            let path = cli.path.ok_or("Store path required for list")?;
            let store = commands::open_store(&path, cli.backend)?;
            commands::list::run(store.as_ref(), namespace.as_deref(), &format, &mut out)?;
        }
        Commands::Get { namespace, name } => {
            let path = cli.path.ok_or("Store path required for get")?;
            let store = commands::open_store(&path, cli.backend)?;
            commands::records::get(store.as_ref(), &namespace, &name, &mut out)?;
        }
        Commands::Set {
            namespace,
            name,
            value,
            schema,
        } => {
            let path = cli.path.ok_or("Store path required for set")?;
            let store = commands::open_store(&path, cli.backend)?;
            let value = commands::parse_value(&value)?;
            commands::records::set(store.as_ref(), &namespace, &name, &value, schema.as_deref())?;
        }
        Commands::Remove { namespace, name } => {
            let path = cli.path.ok_or("Store path required for remove")?;
            let store = commands::open_store(&path, cli.backend)?;
            commands::records::remove(store.as_ref(), &namespace, &name, &mut out)?;
        }
        Commands::Validate { schema, value } => {
            let value = commands::parse_value(&value)?;
            commands::schema::validate(&schema, &value, &mut out)?;
        }
        Commands::Default { schema } => {
            commands::schema::default(&schema, &mut out)?;
        }
        Commands::Compact => {
            if cli.backend != Backend::Log {
                return Err("compact only applies to --backend log".into());
            }
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, &mut out)?;
        }
    }

    Ok(())
}
