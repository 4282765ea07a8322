use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use taskvoice::{
    AudioInput, Config, DefaultDevices, HttpCommandExecutor, SessionEvent, SessionStatus,
    VoiceSession, WebSocketConnector,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskvoice", version, about = "Real-time voice assistant for task management")]
struct Cli {
    /// Config file (TOML, extension optional)
    #[arg(long, global = true, default_value = "config/taskvoice")]
    config: String,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a voice session and stream until Ctrl-C
    Run {
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Replay a 24kHz mono WAV file instead of the microphone
        #[arg(long)]
        input_wav: Option<PathBuf>,

        /// Record assistant audio to a WAV file instead of the speaker
        #[arg(long)]
        output_wav: Option<PathBuf>,
    },

    /// Print the effective configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut cfg = Config::load(Some(cli.config.as_str()))?;

    match cli.command {
        Command::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&cfg.redacted())?);
            Ok(())
        }
        Command::Run {
            api_key,
            input_wav,
            output_wav,
        } => {
            if api_key.is_some() {
                cfg.realtime.api_key = api_key;
            }
            if input_wav.is_some() {
                cfg.audio.input_wav = input_wav;
            }
            if output_wav.is_some() {
                cfg.audio.output_wav = output_wav;
            }
            run(cfg).await
        }
    }
}

async fn run(cfg: Config) -> Result<()> {
    let credentials = cfg.credentials()?;

    let devices = DefaultDevices {
        input: match &cfg.audio.input_wav {
            Some(path) => AudioInput::File(path.clone()),
            None => AudioInput::Microphone,
        },
        output_wav: cfg.audio.output_wav.clone(),
    };

    let executor = HttpCommandExecutor::new(
        &cfg.commands.base_url,
        cfg.commands.token.clone(),
        Duration::from_secs(cfg.commands.timeout_secs),
    )?;

    info!("Taskvoice v{}", env!("CARGO_PKG_VERSION"));
    info!("Command executor: {}", executor.endpoint());

    let (session, mut events) = VoiceSession::new(
        cfg.session_config(),
        Arc::new(WebSocketConnector),
        Arc::new(devices),
        Arc::new(executor),
    );

    session.start(&credentials).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping session");
                break;
            }
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
        }

        if !session.is_recording() && session.status() == SessionStatus::Closed {
            warn!("Session closed");
            break;
        }
    }

    let stats = session.stop().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Listening => println!("Listening..."),
        SessionEvent::Transcript { text, is_final } => {
            if *is_final {
                println!("You: {}", text);
            }
        }
        SessionEvent::Response { text, is_delta } => {
            if *is_delta {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            } else {
                println!("{}", text);
            }
        }
        SessionEvent::ResponseDone(_) => println!(),
        SessionEvent::CommandExecuted(result) => println!("[{}]", result.message()),
        SessionEvent::StateChanged(status) => info!("Session {}", status),
        SessionEvent::Dispatched(_) => {}
        SessionEvent::Error(message) => eprintln!("Error: {}", message),
    }
}
