use sea_orm_migration::MigratorTrait;
use stateset_billing::{config, db, migrator::Migrator};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let direction = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());
    info!(environment = %cfg.environment, %direction, "Starting billing migrations");

    let pool = db::establish_connection_from_app_config(&cfg).await?;
    db::check_connection(&pool).await?;

    let result = match direction.as_str() {
        "up" => Migrator::up(&pool, None).await,
        "down" => Migrator::down(&pool, None).await,
        "status" => Migrator::status(&pool).await,
        other => {
            error!("Unknown migration direction '{}', expected up, down or status", other);
            anyhow::bail!("unknown migration direction: {}", other);
        }
    };

    match result {
        Ok(()) => {
            info!("Migrations finished");
            Ok(())
        }
        Err(e) => {
            error!("Migrations failed: {}", e);
            Err(e.into())
        }
    }
}
