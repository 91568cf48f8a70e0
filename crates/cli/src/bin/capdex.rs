use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match capdex_cli::main_entry().await {
        Ok(status) => ExitCode::from(status.code()),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(capdex_cli::ExitStatus::Failure.code())
        }
    }
}
