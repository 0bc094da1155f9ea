use clap::{Parser, Subcommand};
use num_bigint::BigUint;
use std::path::PathBuf;

use btc_relay::core::params::DEFAULT_VALIDITY_DEPTH;
use btc_relay::core::types::{InitData, ProcessData};
use btc_relay::{Relay, RelayParams, SledStore};

const DEFAULT_DATA_DIR: &str = "btc_relay_data";

#[derive(Parser)]
#[command(name = "btc-relay", version = "0.3.2")]
#[command(about = "BTC Relay - a Bitcoin SPV header relay")]
struct Cli {
    #[arg(long, global = true)]
    data_dir: Option<String>,
    /// Cap on pending plus incoming headers per call
    #[arg(long, global = true)]
    max_preheaders: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed the relay with a trusted header
    Init {
        /// Raw 80-byte header, hex encoded
        #[arg(short, long)]
        start_header: String,
        #[arg(long)]
        height: u64,
        #[arg(long, default_value = "1")]
        previous_difficulty: String,
        #[arg(long, default_value_t = DEFAULT_VALIDITY_DEPTH)]
        validity_depth: u64,
        /// First header of the difficulty period containing the start header
        #[arg(long)]
        retarget_block: Option<String>,
    },
    /// Submit raw headers
    Process {
        headers: Vec<String>,
        /// JSON file of the form {"headers": [...]}
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Drop all pending headers
    ClearPreheaders,
    /// Show relay state
    Info,
    /// Print the confirmed header at a height
    Header { height: u64 },
}

fn main() {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "btc_relay=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir.unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
    let mut params = RelayParams::default();
    if let Some(max) = cli.max_preheaders {
        params.max_preheaders = max;
    }

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        fail(&format!("cannot create {}: {}", data_dir, e));
    }
    let store = match SledStore::open(&data_dir) {
        Ok(s) => s,
        Err(e) => fail(&e.to_string()),
    };
    let mut relay = Relay::with_params(store, params);

    match cli.command {
        Commands::Init { start_header, height, previous_difficulty, validity_depth, retarget_block } => {
            let previous_difficulty = match BigUint::parse_bytes(previous_difficulty.as_bytes(), 10) {
                Some(d) => d,
                None => fail(&format!("invalid previous difficulty: {}", previous_difficulty)),
            };
            let init = InitData {
                start_header,
                height,
                previous_difficulty,
                validity_depth,
                last_difficulty_period_retarget_block: retarget_block,
            };
            match relay.initialize_at_specific_block(init) {
                Ok(true) => println!("🔨 Relay initialized at height {} ({})", height, data_dir),
                Ok(false) => println!("Relay already initialized, nothing changed"),
                Err(e) => fail(&e.to_string()),
            }
        }

        Commands::Process { mut headers, file } => {
            if let Some(path) = file {
                let raw = match std::fs::read_to_string(&path) {
                    Ok(raw) => raw,
                    Err(e) => fail(&format!("cannot read {}: {}", path.display(), e)),
                };
                match serde_json::from_str::<ProcessData>(&raw) {
                    Ok(data) => headers.extend(data.headers),
                    Err(e) => fail(&format!("invalid payload in {}: {}", path.display(), e)),
                }
            }
            if headers.is_empty() {
                fail("no headers given");
            }

            match relay.process_headers(ProcessData { headers }) {
                Ok(outcome) => {
                    println!("📥 Processed headers");
                    println!("  Confirmed: {:?}", outcome.confirmed);
                    println!("  Highest:   {}", outcome.highest.map_or("-".to_string(), |h| h.to_string()));
                    println!("  Pending:   {}", outcome.pending);
                    println!("  Orphaned:  {}", outcome.orphaned);
                    if let Some(mismatch) = outcome.stopped {
                        println!("  ⚠️  Stopped: {}", mismatch);
                    }
                }
                Err(e) => fail(&e.to_string()),
            }
        }

        Commands::ClearPreheaders => {
            if let Err(e) = relay.clear_pre_headers() {
                fail(&e.to_string());
            }
            println!("🧹 Pending headers cleared");
        }

        Commands::Info => {
            let status = match relay.status() {
                Ok(s) => s,
                Err(e) => fail(&e.to_string()),
            };
            println!("📊 BTC Relay ({})", data_dir);
            println!("  Initialized:    {}", status.initialized);
            match &status.highest {
                Some(h) => println!("  Highest:        {} {}", h.height, h.header_hash),
                None => println!("  Highest:        -"),
            }
            println!("  Pending:        {}", status.pending);
            println!("  Validity depth: {}", status.validity_depth.map_or("-".to_string(), |d| d.to_string()));
            if let Some(period) = &status.period {
                println!("  Difficulty:     {}", period.difficulty_human_readable);
                println!("  Period start:   {}", period.start_timestamp);
                println!("  Period end:     {}", period.end_timestamp);
            }
        }

        Commands::Header { height } => match relay.confirmed_header(height) {
            Ok(Some(raw)) => println!("{}", raw),
            Ok(None) => fail(&format!("no confirmed header at {}", height)),
            Err(e) => fail(&e.to_string()),
        },
    }
}

fn fail(msg: &str) -> ! {
    eprintln!("❌ {}", msg);
    std::process::exit(1);
}
