//! Template Resolver CLI
//!
//! Usage:
//!   template-resolver resolve <FILE> --templates <DIR> --account <ID> [OPTIONS]
//!   template-resolver inputs <TEMPLATE_FILE>
//!   template-resolver retain <NEW_TEMPLATE_FILE> <PREVIOUS_INPUTS_FILE>
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_yaml::Value;
use tracing_subscriber::prelude::*;

use template_resolver::{
    input_schema, retain_variables, Config, InMemoryTemplateStore, ResolveOptions, Scope,
    ServiceError, TemplateEntity, TemplateService, VersionError, VersionManager,
};

#[derive(Parser)]
#[command(name = "template-resolver")]
#[command(about = "Expand template references in YAML documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve every template reference in a document
    Resolve {
        /// Document to resolve
        file: PathBuf,

        /// Directory of template definitions (*.yaml, *.yml, *.json)
        #[arg(short, long)]
        templates: PathBuf,

        /// Caller account
        #[arg(long)]
        account: String,

        /// Caller organisation
        #[arg(long)]
        org: Option<String>,

        /// Caller project (requires --org)
        #[arg(long, requires = "org")]
        project: Option<String>,

        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Keep reference nodes next to the expanded content
        #[arg(long)]
        retain_markers: bool,

        /// Also print the templates used
        #[arg(short, long)]
        summary: bool,

        /// Make a version stable after loading, as IDENTIFIER=VERSION (repeatable)
        #[arg(long, value_name = "IDENTIFIER=VERSION")]
        stable: Vec<String>,
    },

    /// Print the inputs a template accepts
    Inputs {
        template: PathBuf,
    },

    /// Carry previously supplied inputs over to a new template version
    Retain {
        new_template: PathBuf,
        previous_inputs: PathBuf,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<(), ServiceError> {
    match command {
        Command::Resolve {
            file,
            templates,
            account,
            org,
            project,
            config,
            retain_markers,
            summary,
            stable,
        } => {
            let config = match &config {
                Some(path) => Config::from_file(path)?,
                None => Config::default(),
            };
            let caller = match (org, project) {
                (Some(org), Some(project)) => Scope::project(account.clone(), org, project),
                (Some(org), None) => Scope::org(account.clone(), org),
                _ => Scope::account(account.clone()),
            };

            let store = Arc::new(InMemoryTemplateStore::new());
            let versions = VersionManager::new(store.clone(), &config.versions);
            load_templates(&versions, &templates, &account)?;
            for choice in &stable {
                promote(&versions, store.as_ref(), choice)?;
            }

            let service = TemplateService::new(store).with_config(config.resolver);
            let source = fs::read_to_string(&file)?;
            let options = ResolveOptions::default().with_markers_retained(retain_markers);
            let resolution = service.resolve_str(&source, &caller, &options)?;

            print!("{}", serde_yaml::to_string(&resolution.document)?);
            if summary {
                println!("---");
                print!("{}", serde_yaml::to_string(&resolution.references)?);
            }
        }
        Command::Inputs { template } => {
            let entity = read_template(&template, "local")?;
            let schema = entity
                .skeleton()
                .and_then(input_schema)
                .unwrap_or_else(|| Value::Mapping(Default::default()));
            print!("{}", serde_yaml::to_string(&schema)?);
        }
        Command::Retain {
            new_template,
            previous_inputs,
        } => {
            let entity = read_template(&new_template, "local")?;
            let previous: Value = serde_yaml::from_str(&fs::read_to_string(&previous_inputs)?)?;
            let retained = entity
                .skeleton()
                .and_then(input_schema)
                .and_then(|schema| retain_variables(&schema, &previous))
                .unwrap_or_else(|| Value::Mapping(Default::default()));
            print!("{}", serde_yaml::to_string(&retained)?);
        }
    }
    Ok(())
}

/// Create every template found in `dir`, in file-name order
fn load_templates(versions: &VersionManager, dir: &Path, account: &str) -> Result<(), ServiceError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml" | "yml" | "json")
            )
        })
        .collect();
    paths.sort();

    for path in paths {
        let entity = read_template(&path, account)?;
        tracing::debug!(path = %path.display(), template = %entity.key(), "loading template");
        versions.create(entity, false)?;
    }
    Ok(())
}

fn read_template(path: &Path, account: &str) -> Result<TemplateEntity, ServiceError> {
    let body: Value = serde_yaml::from_str(&fs::read_to_string(path)?)?;
    let scope = Scope::declared_in(account, &body);
    Ok(TemplateEntity::from_value(scope, body)?.with_source(path.display().to_string()))
}

/// Apply one `--stable IDENTIFIER=VERSION` choice to every family with that identifier
fn promote(
    versions: &VersionManager,
    store: &InMemoryTemplateStore,
    choice: &str,
) -> Result<(), ServiceError> {
    let Some((identifier, version)) = choice.split_once('=') else {
        return Err(ServiceError::InvalidArgument(format!(
            "--stable expects IDENTIFIER=VERSION, got '{}'",
            choice
        )));
    };

    let families: Vec<_> = store
        .family_keys()
        .into_iter()
        .filter(|k| k.identifier == identifier)
        .collect();
    if families.is_empty() {
        return Err(VersionError::TemplateNotFound {
            family: identifier.to_string(),
            version: version.to_string(),
        }
        .into());
    }
    for family in families {
        versions.promote_to_stable(&family, version)?;
    }
    Ok(())
}
