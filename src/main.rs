use spinledger::config::Config;
use spinledger::services::{
    BoardGenerator, IdGenerator, PaylineEvaluator, SettlementConfig, SettlementService,
    SqliteStore,
};
use spinledger::{LedgerSummary, SettlementError};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spinledger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        "Starting spinledger (worker {}, database {})",
        config.worker_id, config.database_path
    );

    let store = if config.database_path == ":memory:" {
        SqliteStore::new_in_memory()?
    } else {
        SqliteStore::new(&config.database_path, config.busy_timeout)?
    };
    let store = Arc::new(store);

    let table = Arc::new(config.load_symbol_table()?);
    info!(
        "Loaded symbol table with {} symbols (total weight {})",
        table.len(),
        table.total_weight()
    );

    // One id generator per process, shared by every component that mints ids
    let ids = Arc::new(IdGenerator::new(config.worker_id)?);
    let boards = Arc::new(BoardGenerator::new(table.clone()));
    let settlement = Arc::new(SettlementService::with_config(
        store,
        ids,
        boards,
        PaylineEvaluator::new(table),
        SettlementConfig {
            deadline: config.settlement_deadline,
            order_cache_capacity: config.order_cache_capacity,
        },
    ));

    let sim = config.simulation.clone();
    let mut players = Vec::with_capacity(sim.players as usize);
    for _ in 0..sim.players {
        let account = settlement.ledger().open_account(sim.starting_balance)?;
        players.push(account.user_id);
    }

    let mut handles = Vec::with_capacity(players.len());
    for user_id in players.iter().copied() {
        let settlement = settlement.clone();
        let game_type = config.game_type.clone();
        let sim = sim.clone();

        handles.push(tokio::task::spawn_blocking(move || -> spinledger::Result<u32> {
            let mut played = 0;
            for _ in 0..sim.rounds {
                match settlement.create_order_with_balance(user_id, sim.bet, &game_type) {
                    Ok(_) => played += 1,
                    Err(SettlementError::InsufficientBalance { available, .. }) => {
                        info!("Player {} is out of funds at {}", user_id, available);
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(played)
        }));
    }

    let mut total_rounds = 0;
    for handle in handles {
        match handle.await? {
            Ok(played) => total_rounds += played,
            Err(e) => warn!("Player stopped early: {}", e),
        }
    }

    let mut house = LedgerSummary::default();
    for user_id in players {
        let summary = settlement.get_summary(user_id)?;
        let balance = settlement.get_user_balance(user_id)?;
        info!(
            "Player {}: {} rounds, bet {}, won {}, balance {}",
            user_id, summary.rounds, summary.total_bet, summary.total_win, balance
        );
        house.total_bet += summary.total_bet;
        house.total_win += summary.total_win;
        house.rounds += summary.rounds;
    }

    match house.return_to_player() {
        Some(rtp) => info!(
            "Settled {} rounds, return to player {:.2}%",
            total_rounds,
            rtp * 100.0
        ),
        None => info!("No rounds settled"),
    }

    Ok(())
}
