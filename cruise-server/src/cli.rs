use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cruise",
    about = "Cruise - quota-aware LLM proxy",
    version,
    author
)]
pub struct Cli {
    #[arg(short, long, env = "CRUISE_PORT", default_value = "4141")]
    pub port: u16,

    #[arg(long, env = "CRUISE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "CRUISE_STATIC_DIR", help = "Directory holding the dashboard assets")]
    pub static_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "CRUISE_RETENTION_DAYS",
        default_value = "30",
        help = "Usage logs older than this many days are deleted at startup"
    )]
    pub retention_days: u32,
}
