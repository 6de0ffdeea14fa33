mod cli;
mod demo;
mod infra;

use citizen_workflow::error::AppError;

pub fn run() -> Result<(), AppError> {
    cli::run()
}
