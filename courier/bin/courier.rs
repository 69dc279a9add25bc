//! Command-line front end of the courier dispatcher
//!
//! - `send`: submit one message and report its status
//! - `demo`: run the scripted demo against the configured backends

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};
use courier::{
    Courier,
    demo::{self, DEFAULT_SENDER, DemoReport},
    send,
};
use courier_common::logging;
use courier_dispatch::{DeliveryRequest, DeliveryStatus, Dispatcher};
use serde::Serialize;

/// Resilient message dispatch over multiple delivery backends
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Dispatch messages over multiple delivery backends", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file (RON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a single message
    Send {
        /// Recipient address
        #[arg(long)]
        to: String,

        #[arg(long)]
        subject: String,

        #[arg(long)]
        body: String,

        /// Sender address
        #[arg(long, default_value = DEFAULT_SENDER)]
        from: String,

        /// HTML alternative of the body
        #[arg(long)]
        html: Option<String>,

        /// Print the final status once delivery finishes
        #[arg(long)]
        wait: bool,

        /// Seconds to wait for the delivery to finish
        #[arg(long, default_value = "60")]
        timeout: u64,
    },
    /// Run the demo scenario
    Demo {
        /// Number of distinct messages in the burst
        #[arg(long, default_value = "15")]
        burst: usize,

        /// Seconds to wait for deliveries to finish
        #[arg(long, default_value = "60")]
        timeout: u64,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cli = Cli::parse();
    let courier = Courier::load(cli.config.as_deref())?;
    let dispatcher = courier.dispatcher()?;

    match cli.command {
        Commands::Send {
            to,
            subject,
            body,
            from,
            html,
            wait,
            timeout,
        } => {
            let mut request = DeliveryRequest::new(to, from, subject, body);
            if let Some(html) = html {
                request = request.with_rich_content(html);
            }
            cmd_send(
                &dispatcher,
                request,
                wait,
                Duration::from_secs(timeout),
                cli.format,
            )
            .await?;
        }
        Commands::Demo { burst, timeout } => {
            let report = demo::run(&dispatcher, burst, Duration::from_secs(timeout)).await?;
            match cli.format {
                Format::Json => print_json(&report)?,
                Format::Text => print_report(&report),
            }
        }
    }

    Ok(())
}

/// Submit one message, then let its delivery finish before exiting
async fn cmd_send(
    dispatcher: &Dispatcher,
    request: DeliveryRequest,
    wait: bool,
    timeout: Duration,
    format: Format,
) -> anyhow::Result<()> {
    let status = send::run(dispatcher, request, wait, timeout).await?;

    match format {
        Format::Json => print_json(&status)?,
        Format::Text => print_status(&status),
    }

    Ok(())
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_status(status: &DeliveryStatus) {
    println!("Delivery ID: {}", status.id);
    println!("  Status: {}", status.state);
    println!("  Attempts: {}", status.attempts);
    if let Some(backend) = &status.backend_used {
        println!("  Backend: {backend}");
    }
    if let Some(message_id) = &status.backend_message_id {
        println!("  Message ID: {message_id}");
    }
    if let Some(error) = &status.error {
        println!("  Error: {error}");
    }
    println!("  Updated: {}", status.updated_at.to_rfc3339());
}

fn print_report(report: &DemoReport) {
    println!("Single message:");
    if let Some(status) = &report.single {
        println!("  {} -> {}", status.id, status.state);
    }
    println!(
        "Duplicate submissions collapsed: {}",
        if report.duplicates_collapsed { "yes" } else { "no" }
    );
    println!(
        "Burst: {} accepted, {} rate limited",
        report.burst_accepted, report.burst_rate_limited
    );
    if !report.drained {
        println!("Some deliveries were still running when the report was taken");
    }
    println!();

    println!("{:<12} {:>6}", "STATUS", "COUNT");
    println!("{}", "-".repeat(19));
    println!("{:<12} {:>6}", "pending", report.counts.pending);
    println!("{:<12} {:>6}", "retrying", report.counts.retrying);
    println!("{:<12} {:>6}", "sent", report.counts.sent);
    println!("{:<12} {:>6}", "failed", report.counts.failed);
    println!("{:<12} {:>6}", "total", report.counts.total());
    println!();

    println!("{:<20} {:<10}", "BACKEND", "CIRCUIT");
    println!("{}", "-".repeat(31));
    for (name, health) in &report.provider_health {
        let circuit = if health.is_open { "open" } else { "closed" };
        println!("{name:<20} {circuit:<10}");
    }
    println!();

    println!(
        "Rate limit: {}/{} remaining, resets in {}ms",
        report.rate_limit.remaining, report.rate_limit.limit, report.rate_limit.reset_after_ms
    );
}
