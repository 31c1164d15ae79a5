use anyhow::{Context, Result};
use clap::Parser;
use fbgraph::config::Config;
use fbgraph::{BatchRequest, Params, RequestContext};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// fbgraph - resilient Graph API client
///
/// Sends requests through a retrying transport: network errors and 5xx
/// responses are retried with exponential backoff for up to ten minutes.
///
/// The access token is read from the FB_ACCESS_TOKEN environment variable.
///
/// Examples:
///   fbgraph get me -p fields=id,name
///   fbgraph batch requests.json
#[derive(Parser, Debug)]
#[command(author, version = env!("FBGRAPH_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Graph API root URL (defaults to https://graph.facebook.com)
    #[arg(long = "api-url", env = "FBGRAPH_API_URL", value_name = "URL", global = true)]
    pub api_url: Option<String>,

    /// Graph API version (defaults to v19.0)
    #[arg(long = "api-version", value_name = "VERSION", global = true)]
    pub api_version: Option<String>,

    /// Abandon the request after this many seconds
    #[arg(long, value_name = "SECONDS", global = true)]
    pub timeout: Option<u64>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// GET an object or edge and print the JSON response
    Get(GetArgs),

    /// Run a batch of sub-requests read from a JSON file
    Batch(BatchArgs),
}

#[derive(clap::Args, Debug)]
pub struct GetArgs {
    /// Path relative to the versioned API root, e.g. "act_123/campaigns"
    #[arg(value_name = "PATH")]
    pub path: String,

    /// Query parameter, repeatable
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

#[derive(clap::Args, Debug)]
pub struct BatchArgs {
    /// JSON array of {"method", "relative_url", "name"?, "body"?} objects
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

/// One entry of a batch file.
#[derive(Deserialize, Debug)]
struct BatchFileEntry {
    method: String,
    relative_url: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    body: BTreeMap<String, String>,
}

impl From<BatchFileEntry> for BatchRequest {
    fn from(entry: BatchFileEntry) -> Self {
        BatchRequest {
            method: entry.method,
            relative_url: entry.relative_url,
            name: entry.name,
            body: entry.body.into_iter().collect(),
        }
    }
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

fn request_context(timeout: Option<u64>) -> RequestContext {
    let ctx = RequestContext::new();
    let ctx = match timeout {
        Some(secs) => ctx.with_timeout(Duration::from_secs(secs)),
        None => ctx,
    };

    let canceller = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    ctx
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let config = Config::new(cli.api_url, cli.api_version)?;
    let client = config.graph_client();
    let ctx = request_context(cli.timeout);

    let output = match cli.command {
        Commands::Get(args) => {
            let params: Params = args.params.into_iter().collect();
            client
                .get_json::<serde_json::Value>(&ctx, &args.path, &params)
                .await?
        }
        Commands::Batch(args) => {
            let content = std::fs::read_to_string(&args.file)
                .with_context(|| format!("Failed to read {}", args.file.display()))?;
            let entries: Vec<BatchFileEntry> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", args.file.display()))?;
            let requests: Vec<BatchRequest> = entries.into_iter().map(Into::into).collect();

            let responses = client.batch(&ctx, &requests).await?;
            responses
                .into_iter()
                .map(|r| match r {
                    Some(r) => serde_json::json!({"code": r.code, "body": r.body}),
                    None => serde_json::Value::Null,
                })
                .collect()
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_get_parsing() {
        let cli = Cli::try_parse_from(["fbgraph", "get", "me", "-p", "fields=id,name"]).unwrap();
        match cli.command {
            Commands::Get(args) => {
                assert_eq!(args.path, "me");
                assert_eq!(
                    args.params,
                    vec![("fields".to_string(), "id,name".to_string())]
                );
            }
            _ => panic!("Expected Get command"),
        }
        assert_eq!(cli.api_version, None);
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "fbgraph",
            "--api-version",
            "v18.0",
            "batch",
            "requests.json",
            "--timeout",
            "30",
        ])
        .unwrap();
        assert_eq!(cli.api_version.as_deref(), Some("v18.0"));
        assert_eq!(cli.timeout, Some(30));
        match cli.command {
            Commands::Batch(args) => assert_eq!(args.file, PathBuf::from("requests.json")),
            _ => panic!("Expected Batch command"),
        }
    }

    #[test]
    fn test_cli_bad_param() {
        assert!(Cli::try_parse_from(["fbgraph", "get", "me", "-p", "fields"]).is_err());
        assert!(Cli::try_parse_from(["fbgraph", "get", "me", "-p", "=x"]).is_err());
    }

    #[test]
    fn test_cli_no_subcommand_fails() {
        assert!(Cli::try_parse_from(["fbgraph", "me"]).is_err());
    }

    #[test]
    fn test_batch_file_entry() {
        let entries: Vec<BatchFileEntry> = serde_json::from_str(
            r#"[{"method": "POST", "relative_url": "act_1/adsets", "name": "a", "body": {"status": "PAUSED"}}]"#,
        )
        .unwrap();
        let request: BatchRequest = entries.into_iter().next().unwrap().into();
        assert_eq!(request.name.as_deref(), Some("a"));
        assert_eq!(request.body.encode(), "status=PAUSED");
    }
}
