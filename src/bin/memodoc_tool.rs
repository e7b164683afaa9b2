use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use memodoc::{ChangeSet, DocError, EngineConfig, SchemaRegistry, ValidationMethod};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "memodoc-tool")]
#[command(about = "Developer tooling for memodoc schemas and update sets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the store operators an update set lowers to
    Lower {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        entity: String,
        #[arg(long)]
        update: PathBuf,
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Print the fields a role may read
    Mask {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        entity: String,
        #[arg(long)]
        role: String,
    },
    /// Validate a document and print the report
    Validate {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        entity: String,
        #[arg(long)]
        data: PathBuf,
        #[arg(long, default_value = "create")]
        method: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Lower {
            schema,
            entity,
            update,
            prefix,
        } => lower(&schema, &entity, &update, prefix.as_deref()),
        Command::Mask {
            schema,
            entity,
            role,
        } => mask(&schema, &entity, &role),
        Command::Validate {
            schema,
            entity,
            data,
            method,
        } => validate(&schema, &entity, &data, &method),
    }
}

fn load_registry(path: &Path) -> Result<Arc<SchemaRegistry>> {
    let mut registry = SchemaRegistry::with_config(EngineConfig::from_env());
    let names = registry
        .load_json_file(path)
        .with_context(|| format!("Failed to load schema '{}'", path.display()))?;
    if names.is_empty() {
        return Err(anyhow!("Schema '{}' defines no entities", path.display()));
    }
    Ok(Arc::new(registry))
}

fn read_json(path: &Path) -> Result<JsonValue> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in '{}'", path.display()))
}

fn print_json(value: &JsonValue) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn lower(schema: &Path, entity: &str, update: &Path, prefix: Option<&str>) -> Result<()> {
    let registry = load_registry(schema)?;
    let entity = registry.entity_type(entity)?;
    let update = ChangeSet::from_json(read_json(update)?)?;

    let operators = entity.query_from_update_set(&update, prefix)?;
    print_json(&serde_json::to_value(&operators)?)
}

fn mask(schema: &Path, entity: &str, role: &str) -> Result<()> {
    let registry = load_registry(schema)?;
    let mask = registry.role_mask(entity, role)?;
    print_json(&mask.to_projection())
}

fn validate(schema: &Path, entity: &str, data: &Path, method: &str) -> Result<()> {
    let method = ValidationMethod::parse(method)
        .ok_or_else(|| anyhow!("Unknown method '{}'. Expected create, update or patch", method))?;
    let registry = load_registry(schema)?;
    let instance = registry.entity_type(entity)?.instantiate(read_json(data)?)?;

    match instance.validate(method) {
        Ok(report) => print_json(&report.to_json()),
        Err(DocError::Validation(report)) => {
            print_json(&report.to_json())?;
            Err(anyhow!(
                "Validation failed for: {}",
                report.failed_properties().join(", ")
            ))
        }
        Err(err) => Err(err.into()),
    }
}
