mod auth;
mod codec;
mod config;
mod connection;
mod crypto;
mod error;
mod kdf;
mod parser;
mod server;
mod session;
mod store;

use tracing_subscriber::EnvFilter;

const BANNER: &str = r#"
  ╔══════════════════════════════════════════════════╗
  ║                 V A U L T W I R E                ║
  ║       Secure Multi-User Chat Relay Server        ║
  ║                    [ Rust ]                      ║
  ╚══════════════════════════════════════════════════╝
"#;

#[tokio::main]
async fn main() {
    let config = config::Config::load();

    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e}");
        std::process::exit(1);
    }

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    eprintln!("{BANNER}");

    if let Err(e) = server::run(config).await {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
}
