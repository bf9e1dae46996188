use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use burnbox_server::{Backend, Scheme, ServerConfig};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "burnbox", about = "burnbox: one-shot, pin-protected, expiring secrets", version)]
struct Cli {
    /// burnbox server URL (default: http://localhost:8080 or $BURNBOX_SERVER)
    #[arg(long, env = "BURNBOX_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the burnbox HTTP server
    Serve {
        /// Port to listen on (default: $BURNBOX_PORT or 8080)
        #[arg(long, env = "BURNBOX_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $BURNBOX_HOST or 0.0.0.0)
        #[arg(long, env = "BURNBOX_HOST", default_value = "0.0.0.0")]
        host: String,
        #[command(flatten)]
        storage: StorageArgs,
        /// Scheme for new secrets: sealed or legacy
        #[arg(long, env = "BURNBOX_CIPHER")]
        cipher: Option<Scheme>,
    },
    /// Store a secret and print its id
    Create {
        /// Secret content
        #[arg(name = "CONTENT")]
        content: String,
        /// Pin needed to read it back
        #[arg(long)]
        pin: String,
        /// Lifetime, e.g. 10m, 1h, 7d
        #[arg(long, default_value = "10m")]
        ttl: String,
    },
    /// Read (and destroy) a secret
    Get {
        /// Secret id
        id: String,
        /// Pin given at creation
        #[arg(long)]
        pin: String,
    },
    /// Delete expired secrets from the local data directory once
    Sweep {
        #[command(flatten)]
        storage: StorageArgs,
    },
}

#[derive(clap::Args)]
struct StorageArgs {
    /// Data directory (default: $BURNBOX_DATA_DIR or the platform data dir)
    #[arg(long, env = "BURNBOX_DATA_DIR")]
    data_dir: Option<PathBuf>,
    /// Store backend: file or redb
    #[arg(long, env = "BURNBOX_BACKEND")]
    backend: Option<Backend>,
}

impl StorageArgs {
    fn apply(self, cfg: &mut ServerConfig) {
        if let Some(dir) = self.data_dir {
            cfg.data_dir = Some(dir);
        }
        if let Some(backend) = self.backend {
            cfg.backend = backend;
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("BURNBOX_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Serve {
            port,
            host,
            storage,
            cipher,
        } => {
            let mut cfg = ServerConfig {
                host,
                port,
                ..Default::default()
            };
            storage.apply(&mut cfg);
            if let Some(scheme) = cipher {
                cfg.scheme = scheme;
            }
            burnbox_server::run(cfg).await
        }

        Commands::Create { content, pin, ttl } => {
            cmd_create(&cli.server, &content, &pin, &ttl).await
        }

        Commands::Get { id, pin } => cmd_get(&cli.server, &id, &pin).await,

        Commands::Sweep { storage } => cmd_sweep(storage).await,
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_create(server: &str, content: &str, pin: &str, ttl: &str) -> Result<()> {
    let ttl = parse_duration(ttl)?;
    let ttl = chrono::TimeDelta::from_std(ttl).context("ttl out of range")?;
    let expires_at = chrono::Utc::now() + ttl;

    let body = serde_json::json!({
        "content": content,
        "expirationDate": expires_at.to_rfc3339(),
        "publicPin": pin,
    });

    let resp = Client::new()
        .post(format!("{}/api/secret", server.trim_end_matches('/')))
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;

    if !status.is_success() {
        anyhow::bail!("server returned {status}: {}", error_of(&json));
    }
    let id = json.as_str().context("server did not return an id")?;
    println!("{id}");
    eprintln!("expires {}", expires_at.to_rfc3339());
    Ok(())
}

async fn cmd_get(server: &str, id: &str, pin: &str) -> Result<()> {
    let resp = Client::new()
        .get(format!("{}/api/secret/{}", server.trim_end_matches('/'), id))
        .query(&[("pin", pin)])
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;

    if status.is_success() {
        println!("{}", json["secret"].as_str().unwrap_or(""));
        Ok(())
    } else {
        anyhow::bail!("{}", error_of(&json));
    }
}

async fn cmd_sweep(storage: StorageArgs) -> Result<()> {
    let mut cfg = ServerConfig::default();
    storage.apply(&mut cfg);

    let service = burnbox_server::open_service(&cfg)?;
    let removed = service
        .clean_expired_secrets()
        .await
        .context("sweep expired secrets")?;
    println!("removed {removed} expired secret(s)");
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Parse human duration strings like "1h", "30m", "7d", "5s".
fn parse_duration(s: &str) -> Result<Duration> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    if d.is_zero() {
        anyhow::bail!("ttl must be greater than zero");
    }
    Ok(d.into())
}

fn error_of(json: &Value) -> &str {
    json["error"].as_str().unwrap_or("unknown error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_parse() {
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("1h 30m").unwrap(), Duration::from_secs(5400));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn cli_parses_create_and_get() {
        let cli = Cli::try_parse_from(["burnbox", "create", "hello", "--pin", "1234", "--ttl", "1h"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Create { ref content, ref pin, ref ttl }
                if content == "hello" && pin == "1234" && ttl == "1h"
        ));

        let cli = Cli::try_parse_from(["burnbox", "get", "abc", "--pin", "1"]).unwrap();
        assert!(matches!(cli.command, Commands::Get { ref id, .. } if id == "abc"));
    }

    #[test]
    fn storage_args_override_config() {
        let mut cfg = ServerConfig::default();
        StorageArgs {
            data_dir: Some(PathBuf::from("/tmp/bb")),
            backend: Some(Backend::Redb),
        }
        .apply(&mut cfg);
        assert_eq!(cfg.data_dir, Some(PathBuf::from("/tmp/bb")));
        assert_eq!(cfg.backend, Backend::Redb);
    }
}
