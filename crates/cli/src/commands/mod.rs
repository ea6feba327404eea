//! CLI subcommand implementations.

pub mod rebuild;
pub mod status;

use storyloom_config::Config;

/// Resolve the database path: an explicit `--db` wins over the config file.
pub fn resolve_db(db: Option<String>) -> Result<(Config, String), Box<dyn std::error::Error>> {
    let config = Config::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let path = db.unwrap_or_else(|| config.db_path.clone());
    Ok((config, path))
}
