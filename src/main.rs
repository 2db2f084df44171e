use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strategy_engine::config::EngineConfig;
use strategy_engine::exchange::{AssetClass, Currency, ExchangeConnector, Pair, PaperExchange};
use strategy_engine::routing::{self, Edge, Graph};
use strategy_engine::strategy::HistoryStrategy;
use strategy_engine::utils::logger;
use strategy_engine::{Engine, Result};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "strategy-engine")]
#[command(about = "Strategy-dispatch and currency-routing engine")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/engine.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log file path
    #[arg(long, default_value = "logs/strategy-engine.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive the engine over the configured paper exchanges until ctrl-c
    Run,
    /// Validate the configuration and exit
    Validate,
    /// Resolve a conversion path between two currencies
    Route {
        /// Source currency code
        source: String,
        /// Destination currency code
        dest: String,
    },
    /// Scan the configured markets for a triangular arbitrage loop
    Arb {
        /// Currency to anchor the search at
        #[arg(default_value = "BTC")]
        source: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    logger::init(&cli.log_level, &cli.log_file)?;

    info!("starting {} v{}", strategy_engine::APP_NAME, strategy_engine::VERSION);

    let config = if cli.config.exists() {
        EngineConfig::from_file(&cli.config)?
    } else {
        info!(path = %cli.config.display(), "config file missing, using defaults");
        EngineConfig::default()
    };

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Validate => validate(config),
        Commands::Route { source, dest } => route(config, &source, &dest).await,
        Commands::Arb { source } => arb(config, &source).await,
    }
}

/// Build paper exchanges from the config, falling back to one demo exchange
/// when none are configured.
fn build_exchanges(config: &EngineConfig) -> Vec<Arc<PaperExchange>> {
    if config.exchanges.is_empty() {
        return vec![Arc::new(PaperExchange::new(
            "paper",
            vec![
                (Pair::new("BTC", "USDT"), 68_000.0),
                (Pair::new("ETH", "BTC"), 0.052),
                (Pair::new("ETH", "USDT"), 3_550.0),
            ],
        ))];
    }
    config
        .exchanges
        .iter()
        .map(|entry| {
            let seeds = entry
                .markets
                .iter()
                .map(|market| (Pair::new(market.base.as_str(), market.quote.as_str()), market.price))
                .collect();
            let mut exchange = PaperExchange::new(&entry.name, seeds);
            if !entry.websocket_enabled {
                exchange = exchange.with_websocket_disabled();
            }
            Arc::new(exchange)
        })
        .collect()
}

async fn run(config: EngineConfig) -> Result<()> {
    let exchanges = build_exchanges(&config);

    let history = Arc::new(HistoryStrategy::new());
    for exchange in &exchanges {
        let label = exchange.name().to_string();
        history.add_price_historian(
            exchange.name(),
            config.history_interval(),
            config.history.window,
            move |window| {
                if let Some(last) = window.last_float() {
                    let mean = window.floats().iter().sum::<f64>() / window.len() as f64;
                    info!(exchange = %label, last, mean, samples = window.len(), "price window");
                }
            },
        );
    }

    let mut builder = Engine::builder().config(config);
    for exchange in &exchanges {
        builder = builder.exchange(Arc::clone(exchange) as Arc<dyn ExchangeConnector>);
    }
    let engine = Arc::new(builder.build()?);
    engine.strategies().add("history", history);

    let runner = Arc::clone(&engine);
    let supervisor = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
        result = supervisor => {
            match result {
                Ok(Err(err)) => error!(error = %err, "engine stopped"),
                Err(err) => error!(error = %err, "engine task panicked"),
                Ok(Ok(())) => info!("engine finished"),
            }
        }
    }
    Ok(())
}

fn validate(config: EngineConfig) -> Result<()> {
    config.validate()?;
    info!(
        exchanges = config.exchanges.len(),
        balance_refresh_secs = config.engine.balance_refresh_secs,
        "configuration is valid"
    );
    Ok(())
}

async fn route(config: EngineConfig, source: &str, dest: &str) -> Result<()> {
    let exchanges = build_exchanges(&config);
    let exchange = exchanges
        .first()
        .ok_or_else(|| anyhow::anyhow!("no exchange configured"))?;

    let source = Currency::new(source);
    let dest = Currency::new(dest);
    let path =
        routing::find_path(exchange.as_ref(), &source, &dest, AssetClass::Spot).await?;
    let rate = routing::cross_rate(exchange.as_ref(), &path, AssetClass::Spot).await?;

    let rendered: Vec<String> = path.iter().map(ToString::to_string).collect();
    println!("{} -> {}: {} (rate {:.8})", source, dest, rendered.join(" -> "), rate);
    Ok(())
}

async fn arb(config: EngineConfig, source: &str) -> Result<()> {
    let exchanges = build_exchanges(&config);
    let exchange = exchanges
        .first()
        .ok_or_else(|| anyhow::anyhow!("no exchange configured"))?;

    // Assign a dense vertex id per currency, then weight each market both
    // ways: the quoted rate forward, its reciprocal back.
    let pairs = exchange.available_pairs(AssetClass::Spot).await?;
    let mut codes: Vec<Currency> = Vec::new();
    let mut vertex = |code: &Currency, codes: &mut Vec<Currency>| match codes
        .iter()
        .position(|known| known == code)
    {
        Some(index) => index,
        None => {
            codes.push(code.clone());
            codes.len() - 1
        }
    };

    let mut edges = Vec::with_capacity(pairs.len() * 2);
    for pair in &pairs {
        let ticker = exchange.fetch_ticker(pair, AssetClass::Spot).await?;
        let base = vertex(&pair.base, &mut codes);
        let quote = vertex(&pair.quote, &mut codes);
        let forward = Edge::from_rate(base, quote, ticker.last);
        // The reverse leg negates the forward weight exactly so a plain
        // round trip sums to zero instead of floating-point noise.
        edges.push(Edge::new(quote, base, -forward.weight));
        edges.push(forward);
    }

    let anchor = Currency::new(source);
    let Some(start) = codes.iter().position(|code| code == &anchor) else {
        anyhow::bail!("{anchor} is not quoted on {}", exchange.name());
    };

    let graph = Graph::new(codes.len(), edges);
    match graph.find_arbitrage_loop(start) {
        Some(cycle) => {
            let rendered: Vec<String> =
                cycle.iter().map(|&index| codes[index].to_string()).collect();
            println!("arbitrage loop: {}", rendered.join(" -> "));
        }
        None => println!("no arbitrage loop reachable from {anchor}"),
    }
    Ok(())
}
