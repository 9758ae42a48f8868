use anyhow::{Context, Result};
use clap::Parser;
use nwn_tracker_lib::{config, identity};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about = "Live combat statistics from the Neverwinter Nights client log")]
struct Cli {
    /// Character name as it appears in the log
    #[arg(short, long)]
    player: Option<String>,

    /// Creature to track (or an alias); omit to auto-lock
    #[arg(short, long)]
    target: Option<String>,

    /// Match the target name exactly instead of as a substring
    #[arg(long)]
    exact: bool,

    /// NWN logs directory or a single nwclientLog file
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Print one JSON object per refresh instead of a text block
    #[arg(long)]
    json: bool,

    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Write the effective settings back to config.toml
    #[arg(long)]
    save_config: bool,

    /// Print the player name guessed from the log and exit
    #[arg(long)]
    detect_player: bool,
}

impl Cli {
    fn apply(&self, cfg: &mut config::AppConfig) {
        if let Some(player) = &self.player {
            cfg.player_name = player.clone();
        }
        if let Some(target) = &self.target {
            cfg.target = target.clone();
        }
        if self.exact {
            cfg.match_mode = nwn_tracker_lib::classifier::MatchMode::Exact;
        }
        if let Some(log) = &self.log {
            cfg.log_path = log.clone();
        }
        if self.json {
            cfg.output = config::OutputFormat::Json;
        }
    }
}

fn guess_player(cfg: &config::AppConfig) -> Result<Option<String>> {
    let file = cfg
        .log_source()?
        .current_file()
        .context("no NWN client log to scan")?;
    identity::detect_player(&file)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = match &cli.config_dir {
        Some(dir) => dir.clone(),
        None => config::default_config_dir().context("no platform config directory")?,
    };
    let _log_guard = nwn_tracker_lib::init_logging(&config_dir.join("logs"))?;

    let mut cfg = config::load_or_default(&config_dir)?;
    cli.apply(&mut cfg);

    if cli.detect_player {
        match guess_player(&cfg)? {
            Some(name) => println!("{name}"),
            None => anyhow::bail!("could not detect the player name; chat or use a heal potion, then retry"),
        }
        return Ok(());
    }

    if cfg.player_name.trim().is_empty() {
        if let Some(name) = guess_player(&cfg).unwrap_or_else(|e| {
            tracing::warn!("Player detection failed: {:#}", e);
            None
        }) {
            eprintln!("Detected player: {name}");
            cfg.player_name = name;
        }
    }

    if cli.save_config {
        config::save(&cfg, &config_dir)?;
        tracing::info!("Saved config to {}", config_dir.display());
    }

    nwn_tracker_lib::run(cfg).await
}
