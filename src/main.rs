use std::io::Write;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use lingua_voice::voice::{GraphEngine, samples_to_wav};
use lingua_voice::{Config, PlaybackCallbacks, PlaybackEngine, SpeechPlayer};

/// Lingua - speak tutor replies aloud
#[derive(Parser)]
#[command(name = "lingua", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Speak a line of text
    Speak {
        /// Text to speak
        text: String,
        /// Speed multiplier (0.25 to 4.0)
        #[arg(short, long)]
        speed: Option<f32>,
    },
    /// Speak each line read from stdin
    Repl {
        /// Speed multiplier (0.25 to 4.0)
        #[arg(short, long)]
        speed: Option<f32>,
    },
    /// Show the detected device profile and playback engine
    Profile,
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,lingua_voice=info",
        1 => "info,lingua_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
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
    match cli.command {
        Command::Speak { text, speed } => speak(&text, speed).await,
        Command::Repl { speed } => repl(speed).await,
        Command::Profile => profile(),
        Command::TestSpeaker => test_speaker().await,
    }
}

fn progress_callbacks() -> PlaybackCallbacks {
    PlaybackCallbacks::new()
        .on_start(|| tracing::info!("speaking"))
        .on_end(|| tracing::info!("done"))
}

/// Speak one line
async fn speak(text: &str, speed: Option<f32>) -> anyhow::Result<()> {
    let config = Config::load()?;
    let player = SpeechPlayer::from_config(&config)?;
    let speed = speed.unwrap_or(config.tts.speed);

    player.speak(text, speed, &progress_callbacks()).await?;
    player.dispose();

    Ok(())
}

/// Speak stdin line by line; repeated lines come from the cache
async fn repl(speed: Option<f32>) -> anyhow::Result<()> {
    let config = Config::load()?;
    let player = SpeechPlayer::from_config(&config)?;
    let speed = speed.unwrap_or(config.tts.speed);
    let callbacks = progress_callbacks();

    println!("Type a line and press enter to hear it. Ctrl-D quits.");
    print!("> ");
    std::io::stdout().flush()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if !line.is_empty() {
            let started = Instant::now();
            match player.speak(line, speed, &callbacks).await {
                Ok(()) => tracing::debug!(elapsed = ?started.elapsed(), "line spoken"),
                Err(e) => eprintln!("error: {e}"),
            }
        }

        print!("> ");
        std::io::stdout().flush()?;
    }

    let stats = player.cache().stats();
    println!(
        "\n{} cached phrase(s), {} bytes",
        stats.size,
        stats.total_bytes()
    );
    player.dispose();

    Ok(())
}

/// Print the device classification and starting engine
fn profile() -> anyhow::Result<()> {
    let config = Config::load()?;
    let environment = config.runtime_environment();
    let profile = environment.profile();

    println!("User agent:  {}", environment.user_agent.as_deref().unwrap_or("-"));
    println!(
        "Viewport:    {}",
        environment
            .viewport_width
            .map_or_else(|| "-".to_string(), |w| w.to_string())
    );
    println!("Mobile:      {}", profile.is_mobile);
    println!("iOS:         {}", profile.is_ios);
    println!("Android:     {}", profile.is_android);
    println!(
        "Engine:      {:?}",
        lingua_voice::EngineMode::for_profile(&profile)
    );
    println!("Speed mode:  {:?}", config.playback.speed_strategy);

    Ok(())
}

/// Play a test tone through the primary engine
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    // Generate 2 seconds of 440Hz sine wave at 24kHz sample rate
    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let num_samples = sample_rate as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    let wav = samples_to_wav(&samples, sample_rate)?;
    let engine = GraphEngine::cpal();
    engine
        .play(wav.into(), 1.0, &PlaybackCallbacks::new())
        .await?;
    engine.dispose();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
