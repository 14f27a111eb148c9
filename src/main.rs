use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use binance_llm_agent::agent::Agent;
use binance_llm_agent::config::Config;
use binance_llm_agent::exchange::BinanceHttpTransport;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "binance_llm_agent=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    print_banner(&config);

    // Confirm the exchange is reachable and the clock is sane before trading
    let transport = BinanceHttpTransport::new(&config.binance)?;
    transport.check_server_time().await;
    info!("Startup checks complete");

    let mut agent = Agent::new(config)?;
    agent.run().await
}

fn print_banner(config: &Config) {
    println!("\n╔═══════════════════════════════════════════════════════════╗");
    println!("║            LLM-Driven Binance Futures Agent               ║");
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
    println!("🤖 Model: {}", config.llm.model_name);
    println!("🎚  Temperature: {}", config.llm.temperature);
    println!("⏱  Inference timeout: {}s", config.llm.api_timeout_secs);
    println!(
        "📊 Mode: {}",
        if config.trading.paper_trading {
            "PAPER TRADING (Safe Mode)"
        } else {
            "⚠️  LIVE TRADING ⚠️"
        }
    );
    println!("💱 Symbols: {}", config.trading.symbols.join(", "));
    println!("💰 Initial capital: ${}", config.trading.initial_capital);
    println!("📐 Max position: {}%", config.trading.max_position_pct);
    println!("🎯 Min confidence: {}", config.trading.min_confidence);
    println!(
        "⏱️  Decision interval: {} seconds",
        config.trading.interval_secs
    );
    println!();
    println!("Press Ctrl+C to stop");
    println!("═══════════════════════════════════════════════════════════");
    println!();
}
