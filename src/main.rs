use std::process::ExitCode;

use askdb::app::App;
use askdb::cli::Repl;
use askdb::config::Config;
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(config: Config) -> anyhow::Result<()> {
    let app = App::startup(config).await?;

    if app.config.debug {
        println!("{}", app.diagnostics().await?);
    }

    let stdin = std::io::stdin();
    let result = Repl::new(
        &app.pipeline,
        &app.config.thread_id,
        app.config.debug,
        stdin.lock(),
        std::io::stdout(),
    )
    .run()
    .await;

    app.shutdown().await;
    result
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config);

    match smol::block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
