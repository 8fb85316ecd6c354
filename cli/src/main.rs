use clap::{Parser, Subcommand};
use fabric_common::db::parser::netlist;
use fabric_common::util::config::Config;
use fabric_common::util::{generator, logger};
use fabric_router::state::RoutingState;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Route the configured netlist.
    Route,
    /// Generate a random routing benchmark.
    Generate {
        #[arg(long, default_value_t = 1000)]
        nets: usize,
        #[arg(long, default_value_t = 64)]
        grid: i32,
        #[arg(long, default_value_t = 8)]
        tracks: usize,
    },
}

fn main() -> anyhow::Result<()> {
    logger::init();
    let args = Args::parse();

    let config = if args.config.exists() {
        log::info!("Loading configuration from {:?}", args.config);
        let config_str = std::fs::read_to_string(&args.config)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        toml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config TOML: {}", e))?
    } else {
        log::warn!(
            "Configuration file {:?} not found. Using internal defaults.",
            args.config
        );
        Config::default()
    };

    match args.command.unwrap_or(Commands::Route) {
        Commands::Generate { nets, grid, tracks } => {
            if let Some(parent) = Path::new(&config.input.netlist_file).parent() {
                std::fs::create_dir_all(parent)?;
            }
            generator::generate_random_netlist(&config.input.netlist_file, nets, grid, tracks)?;
            log::info!("Wrote {}", config.input.netlist_file);
        }
        Commands::Route => {
            if !Path::new(&config.input.netlist_file).exists() {
                return Err(anyhow::anyhow!(
                    "Netlist file missing: '{}'. Did you run 'generate'?",
                    config.input.netlist_file
                ));
            }
            if let Err(e) = run_routing(&config) {
                log::error!("{}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn run_routing(config: &Config) -> anyhow::Result<()> {
    log::info!("Parsing netlist: {}", config.input.netlist_file);
    let (rr, db) = netlist::parse(&config.input.netlist_file).map_err(|e| anyhow::anyhow!(e))?;
    log::info!(
        "Design: {} nets on a {}x{} grid with {} tracks",
        db.num_nets(),
        rr.width(),
        rr.height(),
        rr.tracks()
    );

    let mut state = RoutingState::new(&db, &rr, config.router.bb_factor);

    let routed = fabric_router::try_parallel_route(&db, &rr, &mut state, &config.router)
        .map_err(|e| anyhow::anyhow!(e))?;
    if !routed {
        return Err(anyhow::anyhow!("Routing failed"));
    }

    fabric_router::check::run(&db, &rr, &state)
        .map_err(|e| anyhow::anyhow!("Verification failed: {}", e))?;

    if let Some(parent) = Path::new(&config.input.output_route).parent() {
        std::fs::create_dir_all(parent)?;
    }
    log::info!("Writing routing to {}", config.input.output_route);
    fabric_router::convergence::write_route_file(&config.input.output_route, &db, &rr, &state)?;

    Ok(())
}
