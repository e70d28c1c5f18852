use sea_orm_migration::prelude::*;

use chime_scheduler_migration::Migrator;

#[tokio::main]
async fn main() {
    cli::run_cli(Migrator).await;
}
