mod app;
mod cli;
mod config;
mod controller;
mod error;
mod paths;
mod provider;
mod shortcut;

#[cfg(feature = "tui")]
mod tui;

use clap::Parser;
use provider::Ask;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = cli::Args::parse();

    let config_path = paths::config_path()?;
    let cfg = config::Config::load_optional(&config_path)?;
    let settings = app::resolve_settings(cfg.as_ref(), &args);
    tracing::debug!(
        config = %config_path.display(),
        url = %settings.url,
        model = %settings.model,
        has_api_key = settings.api_key.is_some(),
        stream = settings.stream,
        "resolved settings"
    );

    match args.cmd {
        Some(cli::Command::Config { cmd }) => {
            let mut out = std::io::stdout().lock();
            app::cmd_config(cmd, &config_path, cfg, &settings, &mut out)?;
            return Ok(ExitCode::SUCCESS);
        }
        #[cfg(feature = "tui")]
        Some(cli::Command::Tui) => {
            let http = app::build_http(&settings)?;
            let controller = app::build_controller(&http, args.dry_run);
            let context = app::read_context(&args)?;
            let prompt = args.prompt.join(" ");
            if let Some(text) = tui::run_tui(controller, settings, context, prompt).await? {
                println!("{text}");
            }
            return Ok(ExitCode::SUCCESS);
        }
        None => {}
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt provided. Try: ask-llama -c file.py \"Explain this\"");
    }

    let http = app::build_http(&settings)?;
    let controller = app::build_controller(&http, args.dry_run);
    let context = app::read_context(&args)?;

    app::cmd_ask(&controller, &settings, Ask::new(prompt, context)).await
}
