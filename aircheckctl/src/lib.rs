use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use aircheck_core::{
    load_config, ConfigError, Credentials, Recorder, SessionError, SessionOptions,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Scheduled off-air recorder and archiver", long_about = None)]
pub struct Cli {
    /// Caminho do aircheck.toml principal
    #[arg(long, default_value = "configs/aircheck.toml")]
    pub config: PathBuf,
    /// Sufixo anexado ao nome base do dia
    #[arg(short, long, default_value = "")]
    pub suffix: String,
    /// Slot de upload; atrasa o upload em position * 10 segundos
    #[arg(short, long, default_value_t = 0)]
    pub position: u32,
    /// Emite cada sessão concluída como uma linha JSON no stdout
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    let credentials = Credentials::from_env()?;
    let options = SessionOptions {
        suffix: cli.suffix.clone(),
        position: cli.position,
    };
    let recorder = Recorder::new(config, credentials, options)?;
    let reports = recorder.run().await;
    if cli.json {
        for report in &reports {
            println!("{}", serde_json::to_string(report)?);
        }
    }
    Ok(())
}
