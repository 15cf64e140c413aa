use anyhow::Context;
use std::env;
use std::path::{Path, PathBuf};

fn home_dir() -> anyhow::Result<PathBuf> {
    let home = env::var_os("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home))
}

fn ensure_dir(path: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))?;
    Ok(path.to_path_buf())
}

fn ask_llama_home() -> Option<PathBuf> {
    env::var_os("ASK_LLAMA_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Where the config lives, without touching the filesystem.
fn config_dir_for(
    home: Option<PathBuf>,
    xdg: Option<PathBuf>,
    user_home: impl FnOnce() -> anyhow::Result<PathBuf>,
) -> anyhow::Result<PathBuf> {
    if let Some(base) = home {
        return Ok(base.join("config"));
    }
    if let Some(xdg) = xdg {
        return Ok(xdg.join("ask-llama"));
    }
    Ok(user_home()?.join(".config").join("ask-llama"))
}

pub fn config_dir() -> anyhow::Result<PathBuf> {
    let xdg = env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    ensure_dir(&config_dir_for(ask_llama_home(), xdg, home_dir)?)
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}
