//! luna-send entry point

mod cli;

use crate::cli::{Cli, Commands};
use anyhow::{bail, Context, Result};
use clap::Parser;
use luna_service_client::{service_uri_for_index, ClientConfig, MainContext, ServiceBusClient};
use lunabus::bus::LocalBus;
use lunabus::services::{install_platform_services, AUDIO_SERVICE, SETTINGS_SERVICE};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing; stdout carries the payloads
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let timeout = Duration::from_millis(cli.timeout_ms);

    let bus = LocalBus::new();
    let _services = install_platform_services(&bus);

    let mut config = ClientConfig::new(&cli.identity);
    if cli.quiet {
        config = config.quiet_payloads();
    }

    match cli.command {
        Commands::Call { uri, payload } => call(&bus, config, &uri, &payload, timeout).await,
        Commands::Subscribe {
            uri,
            payload,
            count,
            then,
        } => subscribe(&bus, config, &uri, &payload, count, then, timeout).await,
        Commands::Uri { category, action } => {
            let uri = service_uri_for_index(category, &action);
            if uri.is_empty() {
                bail!("Service category out of range: {}", category);
            }
            println!("{}", uri);
            Ok(())
        }
        Commands::Services => {
            for service in [AUDIO_SERVICE, SETTINGS_SERVICE] {
                let provider = bus.provide(service);
                println!("{}", service);
                for method in provider.methods() {
                    println!("  {}", method);
                }
            }
            Ok(())
        }
    }
}

fn register(bus: &LocalBus, config: ClientConfig, context: &MainContext) -> Result<ServiceBusClient> {
    let identity = config.identity.clone();
    ServiceBusClient::register(bus, config, context)
        .with_context(|| format!("Failed to register service {}", identity))
}

async fn call(
    bus: &LocalBus,
    config: ClientConfig,
    uri: &str,
    payload: &str,
    timeout: Duration,
) -> Result<()> {
    let context = MainContext::thread_default();
    let mut client = register(bus, config, &context)?;

    let answered = Rc::new(Cell::new(false));
    let flag = answered.clone();

    client
        .call_async_with(uri, payload, move |reply| {
            if !reply.is_empty() {
                println!("{}", reply);
            }
            flag.set(true);
        })
        .with_context(|| format!("Call to {} failed", uri))?;

    if !context.run_until(timeout, || answered.get()).await {
        bail!("Timed out waiting for a response from {}", uri);
    }

    client.unregister_service()?;
    Ok(())
}

async fn subscribe(
    bus: &LocalBus,
    config: ClientConfig,
    uri: &str,
    payload: &str,
    count: usize,
    then: Vec<String>,
    timeout: Duration,
) -> Result<()> {
    let context = MainContext::thread_default();
    let mut client = register(bus, config, &context)?;

    let received = Rc::new(Cell::new(0usize));
    let counter = received.clone();

    let token = client
        .subscribe(uri, payload, move |reply| {
            println!("{}", reply);
            counter.set(counter.get() + 1);
        })
        .with_context(|| format!("Subscribe to {} failed", uri))?;

    // Let the initial response through before triggering changes.
    context.run_until(timeout, || received.get() > 0).await;

    for pair in then.chunks(2) {
        if let [then_uri, then_payload] = pair {
            client
                .call_async(then_uri, then_payload)
                .with_context(|| format!("Call to {} failed", then_uri))?;
        }
    }

    let done = context.run_until(timeout, || received.get() >= count).await;
    info!(received = received.get(), "Subscription finished");

    client.unsubscribe(token)?;
    client.unregister_service()?;

    if !done {
        bail!(
            "Timed out after {} of {} responses from {}",
            received.get(),
            count,
            uri
        );
    }
    Ok(())
}
