//! ermpath command-line tool
//!
//! Compiles a request document against a model document and prints the
//! generated SQL, the resolved path or the write plan.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use ermpath::catalog::{AccessContext, Client, Introspection, Model};
use ermpath::compiler::{explain, Compiler, ReadRequest};
use ermpath::config::ServiceConfig;
use ermpath::path::ast::{Name, PathItem};
use ermpath::path::Resolver;
use ermpath::write::{
    plan_attribute_delete, plan_attribute_update, plan_entity_delete, plan_upsert, Batch,
    InputFormat, UpsertOptions, WritePlan,
};

#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile data-access requests to SQL")]
struct Cli {
    /// Service configuration file (JSON); environment variables apply otherwise
    #[arg(long, global = true, env = "ERMPATH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the SQL and output columns of a read
    Compile(Files),
    /// Print the resolved path
    Explain(Files),
    /// Print the statements of a write plan
    Write(Files),
}

#[derive(clap::Args)]
struct Files {
    /// Introspection document (JSON)
    #[arg(long)]
    model: PathBuf,
    /// Request document (JSON)
    #[arg(long)]
    request: PathBuf,
}

#[derive(Deserialize)]
struct RequestDoc {
    #[serde(default)]
    client: Option<String>,
    #[serde(default)]
    attributes: Vec<String>,
    path: Vec<PathItem>,
    #[serde(default)]
    read: Option<ReadRequest>,
    #[serde(default)]
    write: Option<WriteDoc>,
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WriteDoc {
    Upsert {
        content_type: String,
        input: String,
        #[serde(default)]
        options: UpsertOptions,
    },
    AttributeUpdate {
        content_type: String,
        input: String,
        keys: Vec<String>,
        targets: Vec<String>,
    },
    Delete,
    AttributeDelete {
        columns: Vec<Name>,
    },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn read_json<T: DeserializeOwned>(path: &Path) -> CliResult<T> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn load_config(path: Option<&Path>) -> CliResult<ServiceConfig> {
    let config = match path {
        Some(p) => ServiceConfig::from_file(p)?,
        None => ServiceConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn client(doc: &RequestDoc) -> Client {
    match &doc.client {
        Some(id) => doc
            .attributes
            .iter()
            .fold(Client::new(id.clone()), |c, a| c.with_attribute(a.clone())),
        None => Client::anonymous(),
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let config = load_config(cli.config.as_deref())?;
    let files = match &cli.command {
        Command::Compile(f) | Command::Explain(f) | Command::Write(f) => f,
    };
    let model: Model = read_json::<Introspection>(&files.model)?.build()?;
    let doc: RequestDoc = read_json(&files.request)?;
    let access = AccessContext::new(&model, client(&doc));
    let resolver = Resolver::new(&access).with_policy(config.link_policy);
    let path = resolver.resolve(&doc.path)?;
    tracing::debug!(elements = path.len(), "resolved request path");

    match cli.command {
        Command::Explain(_) => print!("{}", explain(&model, &path)),
        Command::Compile(_) => {
            let req = doc.read.unwrap_or_else(ReadRequest::entity);
            let query = Compiler::new(resolver).compile_read(&path, &req)?;
            println!("{}", query.sql);
            for c in &query.columns {
                println!("-- {} {}", c.name, c.ctype);
            }
        }
        Command::Write(_) => {
            let write = doc.write.ok_or("request has no write section")?;
            let compiler = Compiler::new(resolver);
            let plan: WritePlan = match write {
                WriteDoc::Upsert {
                    content_type,
                    input,
                    options,
                } => {
                    let batch = Batch::parse(InputFormat::from_content_type(&content_type)?, input.as_bytes())?;
                    plan_upsert(&access, &path, &batch, options)?
                }
                WriteDoc::AttributeUpdate {
                    content_type,
                    input,
                    keys,
                    targets,
                } => {
                    let batch = Batch::parse(InputFormat::from_content_type(&content_type)?, input.as_bytes())?;
                    plan_attribute_update(&access, &path, &batch, &keys, &targets)?
                }
                WriteDoc::Delete => plan_entity_delete(&compiler, &path)?,
                WriteDoc::AttributeDelete { columns } => plan_attribute_delete(&compiler, &path, &columns)?,
            };
            for stmt in &plan.statements {
                println!("{}\t{}", stmt.kind(), stmt.sql());
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            ExitCode::FAILURE
        }
    }
}
