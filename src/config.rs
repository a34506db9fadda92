use crate::services::id_generator::MAX_WORKER_ID;
use crate::types::{Amount, SymbolTable, SymbolTableError};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("WORKER_ID {0} out of range (0-1023)")]
    InvalidWorkerId(u64),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error(transparent)]
    SymbolTable(#[from] SymbolTableError),
}

/// Settings for the bundled round simulator.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of concurrent simulated players.
    pub players: u32,
    /// Rounds each player plays.
    pub rounds: u32,
    /// Stake per round.
    pub bet: Amount,
    /// Funds deposited into each player's account up front.
    pub starting_balance: Amount,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            players: 4,
            rounds: 250,
            bet: Amount::from_major(1),
            starting_balance: Amount::from_major(100),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path (`:memory:` for an in-memory store).
    pub database_path: String,
    /// Snowflake worker id, fixed for the lifetime of the process.
    pub worker_id: u16,
    /// How long SQLite waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// Upper bound on a single settlement transaction.
    pub settlement_deadline: Duration,
    /// Most settled orders kept in the in-process cache.
    pub order_cache_capacity: usize,
    /// Optional JSON symbol table; the built-in table is used when unset.
    pub symbol_table_path: Option<String>,
    /// Game type recorded on every order.
    pub game_type: String,
    /// Simulator settings.
    pub simulation: SimulationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "spinledger.db".to_string(),
            worker_id: 1,
            busy_timeout: Duration::from_millis(5_000),
            settlement_deadline: Duration::from_millis(5_000),
            order_cache_capacity: 10_000,
            symbol_table_path: None,
            game_type: "classic_3x3".to_string(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let worker_id: u64 = parse_or(&lookup, "WORKER_ID", u64::from(defaults.worker_id))?;
        if worker_id > u64::from(MAX_WORKER_ID) {
            return Err(ConfigError::InvalidWorkerId(worker_id));
        }

        let busy_timeout_ms: u64 = parse_or(
            &lookup,
            "SQLITE_BUSY_TIMEOUT_MS",
            defaults.busy_timeout.as_millis() as u64,
        )?;
        let deadline_ms: u64 = parse_or(
            &lookup,
            "SETTLEMENT_DEADLINE_MS",
            defaults.settlement_deadline.as_millis() as u64,
        )?;
        if deadline_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SETTLEMENT_DEADLINE_MS",
                value: "0".to_string(),
            });
        }

        let order_cache_capacity: usize = parse_or(
            &lookup,
            "ORDER_CACHE_CAPACITY",
            defaults.order_cache_capacity,
        )?;

        let game_type = lookup("GAME_TYPE").unwrap_or(defaults.game_type);
        if game_type.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "GAME_TYPE",
                value: game_type,
            });
        }

        let sim_defaults = defaults.simulation;
        let simulation = SimulationConfig {
            players: parse_or(&lookup, "SIM_PLAYERS", sim_defaults.players)?,
            rounds: parse_or(&lookup, "SIM_ROUNDS", sim_defaults.rounds)?,
            bet: parse_or(&lookup, "SIM_BET", sim_defaults.bet)?,
            starting_balance: parse_or(
                &lookup,
                "SIM_STARTING_BALANCE",
                sim_defaults.starting_balance,
            )?,
        };

        Ok(Self {
            database_path: lookup("DATABASE_PATH").unwrap_or(defaults.database_path),
            worker_id: worker_id as u16,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
            settlement_deadline: Duration::from_millis(deadline_ms),
            order_cache_capacity,
            symbol_table_path: lookup("SYMBOL_TABLE_PATH").filter(|p| !p.is_empty()),
            game_type,
            simulation,
        })
    }

    /// Build the symbol table this configuration points at.
    pub fn load_symbol_table(&self) -> Result<SymbolTable, ConfigError> {
        match &self.symbol_table_path {
            Some(path) => Ok(SymbolTable::from_json_file(path)?),
            None => Ok(SymbolTable::default()),
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}
