mod cli;
mod infra;
mod routes;
mod server;
mod views;

use returns_portal::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
