//! `recon` binary entry point

use recon_cli::{command, execute, Invocation, LogFormat};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() {
    let matches = command().get_matches();

    let invocation = match Invocation::from_matches(&matches) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    };
    init_tracing(invocation.log_format);

    match execute(&invocation).await {
        Ok(execution) => {
            println!("{}", execution.rendered);
            std::process::exit(if execution.success { 0 } else { 1 });
        }
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    }
}
