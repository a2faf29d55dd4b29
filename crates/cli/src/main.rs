use std::io;

use gatehouse_infra::AuthConfig;

fn main() -> anyhow::Result<()> {
    gatehouse_observability::init_with(AuthConfig::log_format_from_env());
    // Loaded after init so rejected values are logged.
    let config = AuthConfig::from_env();
    tracing::debug!(?config, "configuration loaded");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let stdin = io::stdin();
    let stdout = io::stdout();

    gatehouse_cli::run(&args, stdin.lock(), stdout.lock())
}
