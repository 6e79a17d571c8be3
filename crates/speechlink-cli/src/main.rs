use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use speechlink_core::config::Config;
use speechlink_core::types::AudioEncoding;
use speechlink_media::format::audio::{pcm16_from_bytes, pcm_to_wav};
use speechlink_media::selector::ProviderSelector;

mod logging;

#[derive(Parser)]
#[command(
    name = "speechlink",
    about = "Real-time speech recognition and synthesis gateway with provider failover",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebSocket gateway
    Serve {
        /// Port to listen on (default: 18790)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Synthesize text once and write the audio to a file
    Synthesize {
        /// Text to speak
        #[arg(short, long)]
        text: String,

        /// Output path (WAV for PCM voices, raw bytes for MP3)
        #[arg(short, long)]
        out: PathBuf,

        /// Voice gender, mapped through `tts.voices`
        #[arg(long)]
        voice_gender: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Check configuration for errors and warnings
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    logging::init(config.logging.as_ref(), cli.verbose);

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or_else(|| config.gateway_port());
            let (warnings, errors) = config.validate();
            for w in &warnings {
                tracing::warn!("config: {w}");
            }
            if !errors.is_empty() {
                anyhow::bail!("Invalid config: {}", errors.join("; "));
            }

            let state = speechlink_gateway::GatewayState::new(Arc::new(config))?;
            #[cfg(feature = "metrics")]
            let state = state.with_metrics(speechlink_gateway::metrics::install_prometheus_recorder()?);

            tracing::info!(
                asr = ?state.pipeline.selector().asr_priority(),
                tts = ?state.pipeline.selector().tts_priority(),
                "Starting SpeechLink gateway on port {port}"
            );
            speechlink_gateway::start_gateway(Arc::new(state), port).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                println!("Config: {}", config_path.display());
                for w in &warnings {
                    println!("  warning: {w}");
                }
                for e in &errors {
                    println!("  error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} config error(s)", errors.len());
                }
                println!("OK ({} warning(s))", warnings.len());
            }
        },
        Commands::Synthesize {
            text,
            out,
            voice_gender,
        } => {
            let selector = ProviderSelector::from_config(Arc::new(config))?;
            let (synthesizer, provider) = selector.select_tts().await?;
            tracing::info!(%provider, "Synthesizing");

            let result = synthesizer
                .synthesize(&text, voice_gender.as_deref())
                .await?;
            let bytes = match result.format.encoding {
                AudioEncoding::Mp3 => result.audio,
                _ => {
                    let pcm = pcm16_from_bytes(&result.audio)?;
                    pcm_to_wav(&pcm, result.format.sample_rate, result.format.channels, 16)
                }
            };
            std::fs::write(&out, &bytes)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            println!(
                "Wrote {} bytes ({} chunk(s) from {provider}) to {}",
                bytes.len(),
                result.chunks,
                out.display()
            );
        }
    }

    Ok(())
}
