//! CLI entry point for ogm-inspect: read-only reporting over the domains
//! and type models kept in a graph store.

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use ogm_core::config::OgmConfig;
use ogm_domain::{Connection, DomainInformation, DomainObjectType};

#[derive(Parser)]
#[command(name = "ogm-inspect")]
#[command(about = "Inspect the domains stored in an ogm graph store")]
struct Cli {
    /// Config file prefix (default: ogm).
    #[arg(short, long, default_value = "ogm")]
    config: String,

    /// Print JSON instead of text.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the domains with data in the store.
    Domains,
    /// List the stored types of a domain.
    Types {
        /// Domain name (otherwise read from config).
        #[arg(short, long)]
        domain: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = OgmConfig::load(&cli.config)?;
    let conn = Connection::from_config(&config)?;
    tracing::info!(backend = ?config.store.backend, "Connected to store");

    match cli.command {
        Command::Domains => {
            let domains = DomainInformation::available_domains(&conn)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&domains)?);
            } else {
                for name in &domains {
                    println!("{name}");
                }
            }
        }
        Command::Types { domain } => {
            let domain = domain.unwrap_or(config.domain.name);
            let info = DomainInformation::for_domain(&conn, domain.as_str())?;
            let types = info.domain_object_types();
            if types.is_empty() {
                tracing::warn!(domain = %domain, "No stored types for domain");
            }
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&types)?);
            } else {
                for ty in &types {
                    println!("{}", describe(ty));
                }
            }
        }
    }
    Ok(())
}

fn describe(ty: &DomainObjectType) -> String {
    let inherited: Vec<&str> = ty
        .fields
        .iter()
        .filter(|f| !ty.declared_fields.contains(f))
        .map(String::as_str)
        .collect();
    let mut line = format!(
        "{} ({}, label {}): {}",
        ty.type_name,
        ty.kind,
        ty.node_label,
        ty.declared_fields.join(", ")
    );
    if !inherited.is_empty() {
        line.push_str(&format!(" [inherited: {}]", inherited.join(", ")));
    }
    line
}
