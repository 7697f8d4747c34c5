use clap::Parser;
use stagewise::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stagewise=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse())
}
