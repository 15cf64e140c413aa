use crate::cli::{Args, ConfigCommand};
use crate::config::{ApiKey, Config, Settings};
use crate::controller::{Completion, Controller, ResponseSink};
use crate::error::AskError;
use crate::provider::{self, Ask};
use anyhow::Context;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub fn build_http(settings: &Settings) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(settings.timeout)
        .build()
        .context("failed to build HTTP client")
}

pub fn build_controller(http: &reqwest::Client, dry_run: bool) -> Controller {
    if dry_run {
        Controller::new(Arc::new(provider::echo::EchoProvider::default()))
    } else {
        Controller::new(Arc::new(provider::OpenAiProvider::new(http.clone())))
    }
}

/// File, then environment, then command-line flags.
pub fn resolve_settings(cfg: Option<&Config>, args: &Args) -> Settings {
    let base = cfg.map(Config::resolve).unwrap_or_default().with_env();
    apply_flags(base, args)
}

fn apply_flags(mut settings: Settings, args: &Args) -> Settings {
    if let Some(url) = &args.url {
        settings.url = url.trim().to_string();
    }
    if let Some(key) = &args.api_key {
        settings.api_key = ApiKey::from_config(key);
    }
    if let Some(model) = &args.model {
        settings.model = model.trim().to_string();
    }
    if args.no_stream {
        settings.stream = false;
    }
    settings
}

/// The "selected text": a file, stdin, or nothing.
pub fn read_context(args: &Args) -> anyhow::Result<String> {
    if let Some(path) = &args.context_file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("failed to read context file: {}", path.display()));
    }
    if args.stdin {
        return std::io::read_to_string(std::io::stdin()).context("failed to read context from stdin");
    }
    Ok(String::new())
}

pub async fn cmd_ask(controller: &Controller, settings: &Settings, ask: Ask) -> anyhow::Result<ExitCode> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let mut sink = StdoutSink::new(std::io::stdout(), std::io::stderr());
    match controller.ask(settings, ask, &mut sink, &cancel).await {
        Ok(Completion::Done(_)) => Ok(ExitCode::SUCCESS),
        Ok(Completion::Cancelled) => {
            sink.cancelled();
            Ok(ExitCode::SUCCESS)
        }
        Err(_) => Ok(ExitCode::FAILURE),
    }
}

/// Streams deltas to `out` and renders failures as text on `err`.
pub struct StdoutSink<O, E> {
    out: O,
    err: E,
    at_line_start: bool,
}

impl<O: Write + Send, E: Write + Send> StdoutSink<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Self {
            out,
            err,
            at_line_start: true,
        }
    }

    fn finish_line(&mut self) {
        if !self.at_line_start {
            writeln!(self.out).ok();
            self.out.flush().ok();
            self.at_line_start = true;
        }
    }

    pub fn cancelled(&mut self) {
        self.finish_line();
        writeln!(self.err, "(cancelled)").ok();
    }
}

impl<O: Write + Send, E: Write + Send> ResponseSink for StdoutSink<O, E> {
    fn on_delta(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        write!(self.out, "{text}").ok();
        self.out.flush().ok();
        self.at_line_start = text.ends_with('\n');
    }

    fn on_done(&mut self, _full_text: &str) {
        self.finish_line();
    }

    fn on_error(&mut self, err: &AskError) {
        self.finish_line();
        writeln!(self.err, "ask-llama: error: {err}").ok();
    }
}

pub fn cmd_config(
    cmd: ConfigCommand,
    path: &Path,
    cfg: Option<Config>,
    effective: &Settings,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show => {
            writeln!(out, "# {}", path.display())?;
            writeln!(out, "url = {}", effective.url)?;
            match &effective.api_key {
                Some(key) => writeln!(out, "api_key = {}", key.masked())?,
                None => writeln!(out, "api_key = (none)")?,
            }
            writeln!(out, "model = {}", effective.model)?;
            writeln!(out, "shortcut = {}", effective.shortcut)?;
            writeln!(out, "temperature = {}", effective.temperature)?;
            writeln!(out, "max_tokens = {}", effective.max_tokens)?;
            writeln!(out, "timeout_secs = {}", effective.timeout.as_secs())?;
            writeln!(out, "stream = {}", effective.stream)?;
        }
        ConfigCommand::Path => {
            writeln!(out, "{}", path.display())?;
        }
        ConfigCommand::Set { key, value } => {
            let mut cfg = cfg.unwrap_or_default();
            cfg.set(&key, &value)?;
            cfg.save_atomic(path)?;
            tracing::debug!(%key, path = %path.display(), "config updated");
            if value.trim().is_empty() {
                writeln!(out, "reset {key} to its default")?;
            } else if key == "api_key" {
                writeln!(out, "saved api_key")?;
            } else {
                writeln!(out, "saved {key} = {}", value.trim())?;
            }
        }
        ConfigCommand::Reset => match std::fs::remove_file(path) {
            Ok(()) => writeln!(out, "removed {}", path.display())?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                writeln!(out, "nothing to reset; using defaults")?
            }
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to remove config: {}", path.display()))
            }
        },
    }
    Ok(())
}
