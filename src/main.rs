use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::{debug, info};
use serde_json::{Map, Value};
use std::path::PathBuf;

use almdr::config::{Config, GlobalEndpoint};
use almdr::lint::{lint, LintConfig};
use almdr::loader::{load_file, testapi_document, ApiDirectory, ServiceModel};
use almdr::models::OpenAPI;
use almdr::operation::DuplicatePolicy;
use almdr::resolver::Resolver;
use almdr::session::Session;

/// Load, lint and prepare requests from Alert Logic OpenAPI service definitions
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Config file profile
    #[arg(long, global = true)]
    profile: Option<String>,
}

/// Where a command reads its OpenAPI document from
#[derive(clap::Args, Debug)]
struct Source {
    /// OpenAPI document to read
    #[arg(short, long, conflicts_with = "service")]
    file: Option<PathBuf>,

    /// Service name inside the API directory
    #[arg(short, long)]
    service: Option<String>,

    /// Service definition version, latest when omitted
    #[arg(long = "api-version", requires = "service")]
    api_version: Option<u32>,

    /// Directory holding service definitions
    #[arg(long)]
    api_dir: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a document for structural problems (the bundled test API by default)
    Lint {
        #[command(flatten)]
        source: Source,

        /// How repeated parameters are treated: reject, first-wins or last-wins
        #[arg(long)]
        duplicate_policy: Option<DuplicatePolicy>,

        #[arg(long, value_enum, default_value = "text")]
        format: Format,
    },

    /// List the services in the API directory
    Services {
        #[arg(long)]
        api_dir: Option<PathBuf>,
    },

    /// Show a service's operations
    Describe {
        #[command(flatten)]
        source: Source,
    },

    /// Resolve a `$ref` such as '#/components/schemas/SimpleDataTypesModel'
    Resolve {
        reference: String,

        #[command(flatten)]
        source: Source,
    },

    /// Build the request for an operation without sending it
    Prepare {
        operation_id: String,

        #[command(flatten)]
        source: Source,

        /// String argument, name=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_pair)]
        params: Vec<(String, String)>,

        /// JSON argument, name=<json> (repeatable)
        #[arg(short, long = "json", value_parser = parse_pair)]
        json: Vec<(String, String)>,

        /// Global endpoint: production or integration
        #[arg(long)]
        endpoint: Option<GlobalEndpoint>,

        /// AIMS token to authenticate with
        #[arg(long, env = "ALERTLOGIC_AIMS_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected name=value, got '{}'", s)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger with appropriate verbosity level
    let env = Env::default().filter_or("RUST_LOG", if cli.verbose { "debug" } else { "info" });
    env_logger::init_from_env(env);

    debug!("Starting almdr...");
    let config = Config::load(cli.profile.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Lint {
            source,
            duplicate_policy,
            format,
        } => {
            let doc = load_document(&source, &config)?;
            let lint_config = LintConfig {
                duplicate_policy: duplicate_policy.unwrap_or(config.duplicate_policy),
            };
            let report = lint(&doc, &lint_config);

            match format {
                Format::Text => println!("{}", report),
                Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
            if report.has_errors() {
                std::process::exit(1);
            }
        }
        Commands::Services { api_dir } => {
            let dir = api_dir
                .or_else(|| config.api_dir.clone())
                .context("No API directory given; use --api-dir or ALERTLOGIC_API_DIR")?;
            for service in ApiDirectory::new(dir).list_services()? {
                println!("{}", service);
            }
        }
        Commands::Describe { source } => {
            let doc = load_document(&source, &config)?;
            let model = ServiceModel::from_document(&doc);
            println!("{}", serde_yaml::to_string(&model)?);
        }
        Commands::Resolve { reference, source } => {
            let doc = load_document(&source, &config)?;
            let schema = Resolver::new(&doc)
                .schema(&reference)
                .with_context(|| format!("Failed to resolve {}", reference))?;
            println!("{}", serde_yaml::to_string(schema)?);
        }
        Commands::Prepare {
            operation_id,
            source,
            params,
            json,
            endpoint,
            token,
        } => {
            let doc = load_document(&source, &config)?;

            let mut args = Map::new();
            for (name, value) in params {
                args.insert(name, Value::String(value));
            }
            for (name, raw) in json {
                let value: Value = serde_json::from_str(&raw)
                    .with_context(|| format!("Argument {} is not valid JSON", name))?;
                args.insert(name, value);
            }

            let mut config = config;
            if let Some(endpoint) = endpoint {
                config.global_endpoint = endpoint;
            }
            let session = match token {
                Some(token) => Session::with_token(config, token),
                None => Session::new(config),
            };

            let request = session.prepare(&doc, &operation_id, &args)?;
            info!("Prepared {} {}", request.method, request.url);
            println!("{}", serde_json::to_string_pretty(&request)?);
        }
    }

    Ok(())
}

/// `--file`, else `--service` from the API directory, else the bundled test API
fn load_document(source: &Source, config: &Config) -> Result<OpenAPI> {
    if let Some(file) = &source.file {
        return Ok(load_file(file)?);
    }

    if let Some(service) = &source.service {
        let dir = match source.api_dir.clone().or_else(|| config.api_dir.clone()) {
            Some(dir) => dir,
            None => bail!("--service needs an API directory; use --api-dir or ALERTLOGIC_API_DIR"),
        };
        debug!("Loading service {} from {:?}", service, dir);
        return Ok(ApiDirectory::new(dir).load(service, source.api_version)?);
    }

    debug!("No document given, using the bundled test API");
    Ok(testapi_document()?)
}
