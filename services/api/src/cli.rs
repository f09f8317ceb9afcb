use crate::demo::{run_demo, run_replay, DemoArgs, ReplayArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use sales_pipeline::config::AppConfig;
use sales_pipeline::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Sales Pipeline",
    about = "Run and inspect the opportunity lifecycle engine from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Seed a frozen-clock pipeline and print its views and metrics
    Demo(DemoArgs),
    /// Rebuild the pipeline from a JSON-lines event log and summarise it
    Replay(ReplayArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// JSON-lines event log to restore from and append to
    #[arg(long)]
    pub(crate) event_log: Option<PathBuf>,
}

impl ServeArgs {
    /// Flags win over the environment; unset flags leave `config` alone.
    pub(crate) fn apply_to(self, config: &mut AppConfig) {
        let ServeArgs {
            host,
            port,
            event_log,
        } = self;
        if let Some(host) = host {
            config.server.host = host;
        }
        if let Some(port) = port {
            config.server.port = port;
        }
        if event_log.is_some() {
            config.event_log = event_log;
        }
    }
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args),
        Command::Replay(args) => run_replay(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn replay_requires_an_event_log() {
        assert!(Cli::try_parse_from(["sales-pipeline", "replay"]).is_err());
        let cli = Cli::try_parse_from(["sales-pipeline", "replay", "--event-log", "events.jsonl", "--json"])
            .expect("parses");
        match cli.command {
            Some(Command::Replay(args)) => {
                assert_eq!(args.event_log, PathBuf::from("events.jsonl"));
                assert!(args.json);
                assert!(!args.list);
            }
            other => panic!("expected replay, got {other:?}"),
        }
    }

    #[test]
    fn demo_defaults_to_new_year_2025() {
        let cli = Cli::try_parse_from(["sales-pipeline", "demo"]).expect("parses");
        match cli.command {
            Some(Command::Demo(args)) => {
                assert_eq!(args.start.to_string(), "2025-01-01");
                assert_eq!(args.idle_days, 9);
            }
            other => panic!("expected demo, got {other:?}"),
        }
    }
}
