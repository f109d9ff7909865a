// Process configuration
// Every option is a command line flag that falls back to an environment variable

use chrono::NaiveTime;
use clap::Parser;

use crate::engine::flow_engine::DependencyMode;

/// Parse `HH:MM` (24h clock)
fn parse_hh_mm(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|e| format!("expected HH:MM, got '{}': {}", raw, e))
}

fn seconds(value: u64) -> chrono::Duration {
    chrono::Duration::from_std(std::time::Duration::from_secs(value))
        .unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

/// Server configuration
#[derive(Parser, Debug, Clone)]
#[command(name = "packflow")]
#[command(about = "Event driven automation orchestrator for packs and flows")]
#[command(version)]
pub struct Config {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// How long actions are kept, measured from their latest state change
    #[arg(long, env = "TTL_IN_SECONDS", default_value_t = 31_536_000)]
    pub ttl_in_seconds: u64,

    /// Enable the daily removal of dead packs
    #[arg(
        long,
        env = "SHOULD_DELETE_DEAD_PACKS",
        default_value_t = false,
        action = clap::ArgAction::Set,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub should_delete_dead_packs: bool,

    /// UTC time of day at which dead packs are removed
    #[arg(
        long,
        env = "DELETE_DEAD_PACKS_AT_HH_COLON_MM",
        default_value = "23:00",
        value_parser = parse_hh_mm
    )]
    pub delete_dead_packs_at: NaiveTime,

    /// How long a pack may stay silent before it counts as dead
    #[arg(
        long,
        env = "PACK_GRACE_PERIOD_UNTIL_MARKED_DEAD_IN_SECONDS",
        default_value_t = 604_800
    )]
    pub pack_grace_period_in_seconds: u64,

    /// How often expired actions are purged
    #[arg(long, env = "ACTION_EXPIRY_INTERVAL_IN_SECONDS", default_value_t = 60)]
    pub action_expiry_interval_in_seconds: u64,

    /// Whether `dependsOn` needs any or all prerequisites to have finished
    #[arg(long, env = "DEPENDS_ON_MODE", value_enum, default_value_t = DependencyMode::Any)]
    pub depends_on_mode: DependencyMode,

    /// Log filter, e.g. `info` or `packflow=debug,tower_http=info`
    #[arg(long, env = "LOGLEVEL")]
    pub loglevel: Option<String>,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn action_ttl(&self) -> chrono::Duration {
        seconds(self.ttl_in_seconds)
    }

    pub fn pack_grace_period(&self) -> chrono::Duration {
        seconds(self.pack_grace_period_in_seconds)
    }

    pub fn action_expiry_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.action_expiry_interval_in_seconds.max(1))
    }
}
