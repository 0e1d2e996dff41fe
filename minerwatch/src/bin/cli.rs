//! Command-line interface for minerwatch.
//!
//! This binary provides a CLI for controlling and monitoring the daemon
//! via the HTTP API.

use std::env;

use anyhow::{Context, Result};

use minerwatch::api_client::{self, types::MinerState};
use minerwatch::types::PowerMode;

/// Log lines shown by `log` when no count is given.
const DEFAULT_LOG_LINES: usize = 100;

fn usage() -> ! {
    eprintln!("Usage: minerwatch-cli <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  status                  Show miner status");
    eprintln!("  start <wallet> [power]  Start mining (power: high, medium, low)");
    eprintln!("  stop                    Stop mining");
    eprintln!("  power <mode>            Set power mode for the next start");
    eprintln!("  log [lines]             Show recent miner output");
    eprintln!("  info                    Show version and pool");
    eprintln!("  api <endpoint>          Raw API call (e.g. \"api miner\")");
    eprintln!();
    eprintln!("Environment:");
    eprintln!(
        "  MINERWATCH_API_URL    API base URL (default: {})",
        api_client::DEFAULT_BASE_URL
    );
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        usage();
    }

    let command = &args[1];
    let arg = |i: usize| args.get(i).map(String::as_str);

    match command.as_str() {
        "status" => cmd_status().await?,
        "start" => {
            let Some(wallet) = arg(2) else { usage() };
            let power = arg(3).map(str::parse::<PowerMode>).transpose()?;
            let state = make_client().start(wallet, power).await?;
            print_state(&state);
        }
        "stop" => {
            let state = make_client().stop().await?;
            print_state(&state);
        }
        "power" => {
            let Some(mode) = arg(2) else { usage() };
            let state = make_client().set_power(mode.parse()?).await?;
            println!("{}", state.status);
        }
        "log" => {
            let lines = match arg(2) {
                Some(n) => n.parse().context("line count must be a number")?,
                None => DEFAULT_LOG_LINES,
            };
            cmd_log(lines).await?;
        }
        "info" => cmd_info().await?,
        "api" => {
            let endpoint = arg(2).unwrap_or("");
            cmd_api(endpoint).await?;
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            eprintln!("Run without arguments to see usage.");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Build an API client, honoring MINERWATCH_API_URL if set.
fn make_client() -> api_client::Client {
    match env::var("MINERWATCH_API_URL") {
        Ok(url) => api_client::Client::with_base_url(url),
        Err(_) => api_client::Client::new(),
    }
}

/// Make a raw API call and pretty-print the JSON response.
async fn cmd_api(endpoint: &str) -> Result<()> {
    let client = make_client();
    let body = client.get_raw(endpoint).await?;

    // Try to pretty-print as JSON; fall back to raw text
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => print!("{}", body),
    }

    Ok(())
}

async fn cmd_status() -> Result<()> {
    let state = make_client().get_miner().await?;
    print_state(&state);
    Ok(())
}

async fn cmd_log(lines: usize) -> Result<()> {
    let log = make_client().get_log(lines).await?;
    for line in log.lines {
        println!("{}", line.trim_end());
    }
    Ok(())
}

async fn cmd_info() -> Result<()> {
    let info = make_client().get_info().await?;
    println!("Version:  {}", info.version);
    println!("Backend:  {} ({})", info.backend, info.algorithm);
    println!("Pool:     {}", info.pool_url);
    println!("Donate:   {}", info.donation_address);
    Ok(())
}

fn or_unknown<T: ToString>(value: T, known: bool) -> String {
    if known {
        value.to_string()
    } else {
        "-".to_string()
    }
}

/// Print a summary of the miner state.
fn print_state(state: &MinerState) {
    println!("Status:    {}", state.status);
    if state.is_mining {
        println!("Wallet:    {}", state.wallet_address);
        println!(
            "Pool:      {}",
            if state.is_connected {
                "connected"
            } else {
                "connecting"
            }
        );
        println!("Uptime:    {}", state.uptime_display);
    }
    println!("Hashrate:  {}", state.hashrate_display);
    println!("Hashes:    {:.0}", state.total_hashes);
    println!("Power:     {}", state.power_mode);
    println!(
        "Height:    {}",
        or_unknown(state.block_height, state.block_height > 0)
    );
    println!(
        "BTC/USD:   {}",
        or_unknown(
            format!("{:.2}", state.btc_price_usd),
            state.btc_price_usd > 0.0
        )
    );
    if !state.job_id.is_empty() {
        println!("Job:       {}", state.job_id);
    }
    if !state.user_id.is_empty() {
        println!("User ID:   {}", state.user_id);
    }
    println!("Attempts:  {}", state.block_attempts);
    println!("Blocks:    {}", state.blocks_found);
    if state.block_alert {
        println!();
        println!("*** BLOCK FOUND! Check pool / wallet. ***");
    }
}
