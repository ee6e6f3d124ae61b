use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use talkie_gateway::conversation::{ChatResponder, SpeechSynthesizer};
use talkie_gateway::{Config, Daemon, daemon};

/// Talkie - push-to-talk voice conversation gateway for AI assistants
#[derive(Parser)]
#[command(name = "talkie", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "TALKIE_PORT", default_value = "18790")]
    port: u16,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one chat round-trip through the configured responder
    TestChat {
        /// Text to send
        #[arg(default_value = "Say hello in one short sentence.")]
        text: String,
    },
    /// Synthesize text to an audio file
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
        /// Output file
        #[arg(short, long, default_value = "talkie-tts.mp3")]
        output: PathBuf,
    },
    /// Transcribe a WAV file through the configured STT provider
    Transcribe {
        /// Path to a WAV file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,talkie_gateway=info",
        1 => "info,talkie_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestChat { text } => test_chat(&config, &text).await,
            Command::TestTts { text, output } => test_tts(&config, &text, &output).await,
            Command::Transcribe { file } => transcribe(&config, &file).await,
        };
    }

    tracing::info!(
        port = cli.port,
        model = %config.llm_model,
        "starting talkie gateway"
    );

    let daemon = Daemon::new(config, cli.port);
    daemon.run().await?;

    Ok(())
}

/// Run one chat round-trip
async fn test_chat(config: &Config, text: &str) -> anyhow::Result<()> {
    let chat = daemon::init_chat(config)
        .ok_or_else(|| anyhow::anyhow!("no chat provider configured (set OPENAI_API_KEY)"))?;

    chat.begin_session(config.system_prompt.as_deref(), None);

    println!("> {text}");
    let reply = chat.send_message(text).await?;
    println!("{reply}");

    Ok(())
}

/// Synthesize text and write the audio to a file
async fn test_tts(config: &Config, text: &str, output: &std::path::Path) -> anyhow::Result<()> {
    let tts = daemon::init_tts(config)
        .ok_or_else(|| anyhow::anyhow!("no TTS provider configured (set OPENAI_API_KEY)"))?;

    println!("Synthesizing: \"{text}\"");
    let audio = tts.synthesize(text).await?;
    println!("Got {} bytes of audio data", audio.len());

    tokio::fs::write(output, &audio).await?;
    println!("Wrote {}", output.display());

    Ok(())
}

/// Transcribe a WAV file
async fn transcribe(config: &Config, file: &std::path::Path) -> anyhow::Result<()> {
    let stt = daemon::init_stt(config)
        .ok_or_else(|| anyhow::anyhow!("no STT provider configured (set OPENAI_API_KEY)"))?;

    let audio = tokio::fs::read(file).await?;
    println!("Transcribing {} ({} bytes)...", file.display(), audio.len());

    let transcript = stt.transcribe(audio).await?;
    println!("{transcript}");

    Ok(())
}
