use print_agent::{AgentDeps, AgentState, Config, Server, init_logger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment (.env is optional)
    dotenv::dotenv().ok();

    // 2. Configuration
    let config = Config::from_env();

    // 3. Logging
    init_logger(&config.log_level, config.log_json, Some(&config.logs_dir()))?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_root = %config.data_root.display(),
        "Print agent starting"
    );

    // 4. Wire components and run until stopped
    let deps = AgentDeps::system(&config);
    let boot = AgentState::initialize(config, deps)?;
    let outcome = Server::new(boot).run().await?;

    let code = outcome.exit_code();
    tracing::info!(exit_code = code, outcome = ?outcome, "Print agent stopped");
    std::process::exit(code);
}
