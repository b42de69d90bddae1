use std::time::Duration;

use channels::{ChannelError, Client, ClientOptions, HarnessConfig, Session, groups};
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use serde_json::{Value, json};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing token; pass --token or set CHANNELS_TOKEN")]
    MissingToken,
    #[error("nothing to subscribe to; pass --group or --kind with --id")]
    NoGroups,
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "channels-cli", about = "Push-notification channel client")]
struct Cli {
    /// Origin of the server under test; the hostname is taken from here.
    #[arg(long, env = "CHANNELS_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "CHANNELS_TOKEN")]
    token: Option<String>,

    #[arg(long)]
    hostname: Option<String>,

    #[arg(long, default_value_t = channels::config::DEFAULT_PORT)]
    port: u16,

    /// Use http/ws instead of https/wss.
    #[arg(long)]
    insecure: bool,

    /// Verify the server certificate.
    #[arg(long)]
    tls_verify: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the handshake only and print the session.
    Handshake,
    /// Subscribe to groups and print events as JSON lines.
    Listen(ListenArgs),
}

#[derive(Args, Debug)]
struct ListenArgs {
    /// Group endpoint to subscribe to; repeatable.
    #[arg(long = "group")]
    groups: Vec<String>,

    /// Group kind (e.g. `limit_reached`) combined with each --id.
    #[arg(long)]
    kind: Option<String>,

    #[arg(long = "id")]
    ids: Vec<String>,

    /// Seconds to wait for each subscription ack.
    #[arg(long, default_value_t = channels::config::DEFAULT_SUBSCRIBE_TIMEOUT_SECS)]
    subscribe_timeout: u64,

    /// Stop after this many quiet seconds.
    #[arg(long, default_value_t = channels::config::DEFAULT_RECV_TIMEOUT_SECS)]
    idle: u64,

    /// Stop after this many events.
    #[arg(long)]
    count: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let base_url = cli
        .base_url
        .clone()
        .unwrap_or_else(|| HarnessConfig::from_env().base_url);
    let options = client_options(&cli)?;

    match cli.command {
        Command::Handshake => run_handshake(options, &base_url).await,
        Command::Listen(args) => run_listen(options, &base_url, args).await,
    }
}

fn client_options(cli: &Cli) -> Result<ClientOptions, CliError> {
    let token = cli.token.clone().filter(|t| !t.is_empty()).ok_or(CliError::MissingToken)?;
    let mut options = ClientOptions::new(token)
        .with_port(cli.port)
        .with_secure(!cli.insecure)
        .with_tls_verify(cli.tls_verify);
    if let Some(hostname) = &cli.hostname {
        options = options.with_hostname(hostname);
    }
    Ok(options)
}

async fn run_handshake(options: ClientOptions, base_url: &str) -> Result<(), CliError> {
    let session = Client::scoped(options, base_url, async |client: &Client| -> Result<Option<Session>, ChannelError> {
        Ok(client.session())
    })
    .await?;
    if let Some(session) = session {
        print_json(&json!({
            "sid": session.sid,
            "origin": session.origin,
            "secure": session.secure,
        }))?;
    }
    Ok(())
}

async fn run_listen(options: ClientOptions, base_url: &str, args: ListenArgs) -> Result<(), CliError> {
    let endpoints = listen_groups(&args);
    if endpoints.is_empty() {
        return Err(CliError::NoGroups);
    }
    let options = options
        .with_subscribe_timeout(Duration::from_secs(args.subscribe_timeout))
        .with_recv_timeout(Duration::from_secs(args.idle));
    let limit = args.count.unwrap_or(usize::MAX);

    let printed = Client::scoped(options, base_url, async |client: &Client| -> Result<usize, ChannelError> {
        client.subscribe(endpoints.as_slice()).await?;
        tracing::info!(groups = ?endpoints, "subscribed; waiting for events");

        let mut printed = 0;
        let mut events = std::pin::pin!(client.events().take(limit));
        while let Some(event) = events.next().await {
            match serde_json::to_string(&event) {
                Ok(line) => {
                    println!("{line}");
                    printed += 1;
                }
                Err(e) => tracing::warn!(error = %e, "event not printable"),
            }
        }
        Ok(printed)
    })
    .await?;

    tracing::info!(events = printed, "listen finished");
    Ok(())
}

fn listen_groups(args: &ListenArgs) -> Vec<String> {
    let mut endpoints = args.groups.clone();
    if let Some(kind) = &args.kind {
        if args.ids.is_empty() {
            endpoints.push(kind.clone());
        } else {
            endpoints.extend(args.ids.iter().map(|id| groups::group_endpoint(kind, id)));
        }
    }
    endpoints
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
