//! ring-client command line.
//!
//! Connects to a set of equivalent servers, waits for the pool to become
//! ready, issues a single request and prints the response body.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde_json::Value;

use ring_client::config::loader::read_config;
use ring_client::observability::logging::init_logging;
use ring_client::{Client, ClientConfig, ClientError, Method, Request, ServerAddress, TcpTransport};

#[derive(Parser)]
#[command(name = "ring-client")]
#[command(about = "Send a request to a pool of equivalent servers", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server to connect to (repeatable). Overrides the servers in the config file.
    #[arg(short, long = "server", value_name = "HOST:PORT")]
    servers: Vec<ServerAddress>,

    /// Become ready as soon as one server is connected.
    #[arg(long)]
    ready_with_one: bool,

    #[arg(value_enum)]
    method: Verb,

    /// Target resource, e.g. /index/_search
    uri: String,

    #[arg(short, long)]
    body: Option<String>,

    /// Query parameter (repeatable).
    #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    params: Vec<(String, String)>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Verb {
    Get,
    Put,
    Post,
    Delete,
    Head,
    Options,
}

impl From<Verb> for Method {
    fn from(verb: Verb) -> Self {
        match verb {
            Verb::Get => Method::Get,
            Verb::Put => Method::Put,
            Verb::Post => Method::Post,
            Verb::Delete => Method::Delete,
            Verb::Head => Method::Head,
            Verb::Options => Method::Options,
        }
    }
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => ClientConfig::default(),
    };
    if !cli.servers.is_empty() {
        config.servers = cli.servers.clone();
    }
    if cli.ready_with_one {
        config.ready_with_one = true;
    }

    init_logging(&config.observability)?;
    tracing::info!(servers = config.servers.len(), "ring-client v0.1.0 starting");

    let transport = Arc::new(TcpTransport::new(&config)?);
    let client = Client::new(config, transport)?;

    if let Err(e) = client.wait_ready().await {
        client.close().await;
        return Err(e.into());
    }

    let mut request = Request::new(cli.uri).method(cli.method.into());
    for (key, value) in cli.params {
        request = request.param(key, value);
    }
    if let Some(body) = cli.body {
        request = request.body(body);
    }

    let result = client.execute(request).await;
    client.close().await;

    match result {
        Ok(response) => print_body(&response.body)?,
        Err(ClientError::Application { status, body }) => {
            eprintln!("Error: server returned status {}", status);
            print_body(&body)?;
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn print_body(body: &str) -> Result<(), serde_json::Error> {
    match serde_json::from_str::<Value>(body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", body),
    }
    Ok(())
}
