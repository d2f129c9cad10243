//! MUD Bot 命令列程式
//!
//! 載入 Profile、連線並登入，之後在背景派發觸發器，
//! 並把標準輸入的每一行送到 MUD。

mod config;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use config::Profile;
use mudbot::{Bot, MudInfo};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 執行一個 MUD 機器人 Profile
#[derive(Parser)]
#[command(name = "mudbot")]
#[command(author, version, about = "Run a MUD bot profile")]
struct Cli {
    /// Profile name in the profile directory, or a path to a JSON file
    #[arg(short, long)]
    profile: String,

    /// Username (overrides the profile)
    #[arg(short, long)]
    username: Option<String>,

    /// Password (overrides the profile)
    #[arg(long, env = "MUDBOT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Do not echo MUD output to stdout
    #[arg(short, long)]
    quiet: bool,

    /// Append received text to this file
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // 日誌走 stderr，stdout 留給 MUD 輸出
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let path = config::resolve_profile_path(&cli.profile);
    let profile = Profile::load(&path)?;
    info!("loaded profile {:?} from {}", profile.name, path.display());

    let mud_info = MudInfo::from_config(&profile.login).context("invalid login settings")?;
    let mut builder = Bot::builder()
        .config(profile.bot.clone())
        .mud_info(mud_info)
        .credentials(profile.credentials(cli.username, cli.password));
    if let Some(transcript) = profile.open_transcript(cli.transcript.as_deref())? {
        builder = builder.transcript(transcript);
    }

    let bot = builder
        .connect(&profile.connection.host, profile.connection.port)
        .await
        .with_context(|| {
            format!(
                "failed to connect to {}:{}",
                profile.connection.host, profile.connection.port
            )
        })?;
    profile.register(&bot)?;

    if let Err(e) = bot.login().await {
        error!("{}", e);
        std::process::exit(1);
    }
    info!("logged in");

    bot.start_dispatch(!cli.quiet);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !bot.send(&line).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("failed to read stdin: {}", e);
                    break;
                }
            },
            _ = bot.closed() => break,
        }
    }

    bot.disconnect().await;
    Ok(())
}
