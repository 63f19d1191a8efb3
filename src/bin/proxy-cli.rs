use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, IF_MATCH};
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for the edge media proxy route table", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, default_value = "admin-secret-key")]
    key: String,

    /// Expected current version (sent as If-Match).
    #[arg(long)]
    if_match: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the active version and its mappings
    List,
    /// Route a subdomain to an upstream
    Set {
        subdomain: String,
        upstream: String,
        #[arg(long)]
        path_prefix: Option<String>,
    },
    /// Remove one subdomain mapping
    Delete { subdomain: String },
    /// Remove several subdomain mappings in one version
    BatchDelete {
        #[arg(required = true)]
        subdomains: Vec<String>,
    },
    /// Print the current route document
    Export,
    /// Publish mappings from a JSON file (`{"mappings": {...}}` or an exported document)
    Import { file: PathBuf },
    /// Point back at an earlier version (default: the previous one)
    Rollback {
        #[arg(long)]
        to: Option<String>,
    },
    /// List recent versions
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = format!("{}/manage/api", cli.url.trim_end_matches('/'));

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    if let Some(version) = &cli.if_match {
        headers.insert(IF_MATCH, HeaderValue::from_str(version)?);
    }

    let request = match cli.command {
        Commands::List => client.get(format!("{}/mappings", base)),
        Commands::Set {
            subdomain,
            upstream,
            path_prefix,
        } => client
            .put(format!("{}/mappings/{}", base, subdomain))
            .json(&json!({ "upstream": upstream, "pathPrefix": path_prefix.unwrap_or_default() })),
        Commands::Delete { subdomain } => {
            client.delete(format!("{}/mappings/{}", base, subdomain))
        }
        Commands::BatchDelete { subdomains } => client
            .post(format!("{}/batch-delete", base))
            .json(&json!({ "subdomains": subdomains })),
        Commands::Export => client.get(format!("{}/export", base)),
        Commands::Import { file } => {
            let raw = tokio::fs::read_to_string(&file).await?;
            let parsed: Value = serde_json::from_str(&raw)?;
            let mappings = parsed.get("mappings").cloned().unwrap_or(Value::Null);
            client
                .post(format!("{}/import", base))
                .json(&json!({ "mappings": mappings }))
        }
        Commands::Rollback { to } => {
            let body = match to {
                Some(version) => json!({ "toVersion": version }),
                None => json!({}),
            };
            client.post(format!("{}/rollback", base)).json(&body)
        }
        Commands::History { limit } => client
            .get(format!("{}/history", base))
            .query(&[("limit", limit)]),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
