use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tutor_voice::voice::{
    AudioDevices, AudioInput, CaptureTap, CpalDevices, FRAME_SIZE, PLAYBACK_SAMPLE_RATE,
    PlaybackScheduler, SAMPLE_RATE, calculate_rms, codec, samples_to_wav,
};
use tutor_voice::{AssistantMode, Config, Error, SessionObserver, VoiceSession, WebSocketTransport};

/// Tutor - Real-time voice tutor for school children
#[derive(Parser)]
#[command(name = "tutor", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (defaults to ~/.config/tutor-voice/config.toml)
    #[arg(long, env = "TUTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Model to use (e.g., "models/gemini-2.5-flash-native-audio-preview-09-2025")
    #[arg(long)]
    model: Option<String>,

    /// Prebuilt voice to speak with (e.g., "Puck")
    #[arg(long)]
    voice: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Save the recording as a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let filter = match cli.verbose {
        0 => "info,tutor_voice=info",
        1 => "info,tutor_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
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
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, output } => test_mic(duration, output).await,
            Command::TestSpeaker => test_speaker().await,
        };
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(model) = cli.model {
        config.session.model = model;
    }
    if let Some(voice) = cli.voice {
        config.session.voice = voice;
    }
    config.session.validate()?;
    tracing::debug!(?config, "loaded configuration");

    let credentials = config.credentials()?;
    let transport = WebSocketTransport::new(&config.session)?;

    tracing::info!(
        model = %config.session.model,
        voice = %config.session.voice,
        "starting voice tutor"
    );

    let mut session = VoiceSession::new(
        transport,
        CpalDevices::new(),
        config.session,
        Arc::new(ConsoleObserver),
    );

    session.connect(&credentials).await?;
    tracing::info!("tutor ready - start talking (Ctrl-C to quit)");

    let outcome = tokio::select! {
        result = session.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            Ok(())
        }
    };

    session.disconnect().await;
    outcome?;
    Ok(())
}

/// Logs session events to the console
struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn on_open(&self) {
        tracing::info!("session open");
    }

    fn on_close(&self, reason: &str) {
        tracing::info!(%reason, "session closed");
    }

    fn on_error(&self, error: &Error) {
        tracing::error!(error = %error, "session error");
    }

    fn on_audio_level(&self, volume: f32) {
        tracing::trace!(volume, "mic level");
    }

    fn on_mode_change(&self, mode: AssistantMode) {
        tracing::info!(mode = %mode.label(), "mode changed");
    }
}

/// Test microphone input through the capture path
async fn test_mic(duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut devices = CpalDevices::new();
    let mut input = devices.request_microphone(SAMPLE_RATE).await?;

    let (frames_tx, mut frames) = tokio::sync::mpsc::unbounded_channel();
    let tap = CaptureTap::new(FRAME_SIZE, Arc::new(|_volume| {}), frames_tx);
    input.start(tap)?;

    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    let mut recording = Vec::new();
    for i in 0..duration {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut second = Vec::new();
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, frames.recv()).await {
            second.extend_from_slice(codec::decode(&frame, SAMPLE_RATE, 1)?.samples());
        }

        let energy = calculate_rms(&second);
        let peak = second.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        recording.extend(second);
    }

    input.stop();

    if let Some(path) = output {
        let wav = samples_to_wav(&recording, SAMPLE_RATE)?;
        std::fs::write(&path, wav)?;
        println!("\nSaved {} samples to {}", recording.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with two back-to-back tone chunks
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear one unbroken 440Hz tone for 2 seconds\n");

    let mut devices = CpalDevices::new();
    let output = devices.open_output(PLAYBACK_SAMPLE_RATE).await?;
    let (mut playback, mut completions) = PlaybackScheduler::new(output);

    let tone = tone(PLAYBACK_SAMPLE_RATE, 440.0, 2.0);
    let (first, second) = tone.split_at(tone.len() / 2);

    for half in [first, second] {
        let chunk = codec::decode(&codec::encode(half), PLAYBACK_SAMPLE_RATE, 1)?;
        let handle = playback.enqueue(chunk)?;
        println!(
            "Scheduled chunk {} at {:.3}s for {:.3}s",
            handle.id, handle.start, handle.duration
        );
    }

    let mut finished = 0;
    while finished < 2 {
        match tokio::time::timeout(Duration::from_secs(5), completions.recv()).await {
            Ok(Some(id)) => {
                playback.complete(id);
                finished += 1;
            }
            Ok(None) => break,
            Err(_) => anyhow::bail!("timed out waiting for playback to finish"),
        }
    }

    playback.shutdown();

    println!("\n---");
    println!("If you heard the tone without a click in the middle, playback is gapless!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Sine wave at 30% volume
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn tone(sample_rate: u32, frequency: f32, duration_secs: f32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect()
}
