use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use mainserver_api::{
    BuildMode, GraphQlRequest, HealthCheck, HealthOutcome, MainserverClient, Routed,
};
use mainserver_gate::{GateConfig, MainserverProvider, View, metrics, telemetry};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "mainserver-gate",
    about = "Wait for the mainserver backend to become available, then talk to it"
)]
struct Cli {
    /// Milliseconds between availability checks.
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    try_interval_ms: Option<u64>,

    /// Environment tag selecting a tagged production host.
    #[arg(long, global = true)]
    env_tag: Option<String>,

    /// Backend deployment: development or production.
    #[arg(long, global = true)]
    mode: Option<BuildMode>,

    /// Explicit backend base URL.
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Do not build the GraphQL client.
    #[arg(long, global = true)]
    no_graphql: bool,

    /// Print Prometheus metrics before exiting.
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Block until the server is available, printing status as it changes.
    Wait,
    /// Run a single availability check.
    Check,
    /// Wait for the server, then execute a GraphQL operation.
    Graphql {
        #[arg(long)]
        query: String,
        /// Variables as a JSON object.
        #[arg(long)]
        variables: Option<String>,
        #[arg(long)]
        operation_name: Option<String>,
    },
}

impl Cli {
    fn config(&self) -> GateConfig {
        let mut config = GateConfig::from_env();
        if let Some(millis) = self.try_interval_ms {
            config.try_interval = Duration::from_millis(millis);
        }
        if let Some(tag) = &self.env_tag {
            config.env_tag = Some(tag.clone());
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(base_url) = &self.base_url {
            config.base_url = Some(base_url.clone());
        }
        if self.no_graphql {
            config.graphql = false;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();

    let cli = Cli::parse();
    let config = cli.config();

    let result = match cli.command {
        Some(Commands::Check) => check(&config).await,
        Some(Commands::Graphql {
            query,
            variables,
            operation_name,
        }) => {
            let mut request = GraphQlRequest::new(query);
            if let Some(variables) = variables {
                request = request.with_variables(
                    serde_json::from_str(&variables).context("--variables is not valid JSON")?,
                );
            }
            if let Some(name) = operation_name {
                request = request.with_operation_name(name);
            }
            graphql(config, request).await
        }
        Some(Commands::Wait) | None => wait(config).await.map(|_| ()),
    };

    if cli.print_metrics {
        print!("{}", metrics::render().context("failed to encode metrics")?);
    }
    result
}

async fn check(config: &GateConfig) -> Result<()> {
    let endpoints = config.endpoints()?;
    let client = MainserverClient::new(endpoints.base.as_str(), &config.client_options())?;
    let outcome = HealthOutcome::from(client.is_alive().await);
    println!("{}: {outcome}", endpoints.base);
    if !outcome.is_healthy() {
        bail!("server is not available");
    }
    Ok(())
}

/// Mount the provider and print each blocking message until the server is
/// ready or the user interrupts.
async fn wait(config: GateConfig) -> Result<MainserverProvider> {
    let provider = MainserverProvider::mount(config)?;
    let mut status = provider.subscribe();

    loop {
        match provider.view()? {
            View::Content(context) => {
                println!("Server is available (version {})", context.version);
                return Ok(provider);
            }
            View::Blocking(message) => println!("{message}"),
        }

        tokio::select! {
            changed = status.changed() => changed.context("availability gate stopped")?,
            _ = tokio::signal::ctrl_c() => {
                provider.stop();
                bail!("interrupted");
            }
        }
    }
}

async fn graphql(config: GateConfig, request: GraphQlRequest) -> Result<()> {
    let provider = wait(config).await?;
    let context = provider.ready().await?;
    let client = context
        .graphql
        .as_ref()
        .context("GraphQL client disabled (--no-graphql)")?;

    info!(kind = ?request.kind(), "executing GraphQL operation");
    match client.execute(request).await? {
        Routed::Response(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Routed::Stream(mut events) => loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(event) => println!("{}", serde_json::to_string(&event?)?),
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        },
    }
    Ok(())
}
