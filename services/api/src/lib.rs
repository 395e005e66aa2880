mod cli;
mod demo;
mod infra;
mod routes;
mod server;

use college_admin::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
