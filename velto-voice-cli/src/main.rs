//! `velto`: host for the Velto voice pipeline.
//!
//! ```text
//! velto live                                   talk to the support agent
//! velto speak --text <t> --out <f.wav> [--voice <v>]
//! velto wrap --input <f.pcm> --output <f.wav> [--rate <hz>]
//! velto devices                                list audio devices
//! velto settings [--voice <v>]                 print (or update) settings
//! ```
//!
//! All commands accept `--settings <file.json>`.

mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use settings::{
    apply_runtime_env_from_settings, default_settings_path, load_settings, save_settings,
    CliSettings,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;
use velto_voice_core::{
    audio::device::{list_devices, DeviceDirection},
    codec::{wrap_pcm_with, WavFormat},
    CpalInput, CpalOutput, GeminiLiveTransport, SessionConfig, SessionPhase, SpeechSynthesizer,
    VoiceSession,
};

const USAGE: &str = "Usage: velto <command> [options]

Commands:
  live                                      start a duplex voice session (Ctrl+C to stop)
  speak --text <text> --out <file.wav> [--voice <name>]
  wrap --input <file.pcm> --output <file.wav> [--rate <hz>]
  devices                                   list input and output devices
  settings [--voice <name>]                 print settings, or save a new default voice

Options:
  --settings <file.json>                    settings file (default: $VELTO_SETTINGS or user data dir)";

#[derive(Debug, PartialEq)]
enum Command {
    Live,
    Speak {
        text: String,
        voice: Option<String>,
        out: PathBuf,
    },
    Wrap {
        input: PathBuf,
        output: PathBuf,
        rate: u32,
    },
    Devices,
    Settings {
        voice: Option<String>,
    },
    Help,
}

#[derive(Debug, PartialEq)]
struct Args {
    command: Command,
    settings_path: Option<PathBuf>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args, String> {
    let mut it = args.into_iter();
    let Some(command) = it.next() else {
        return Ok(Args {
            command: Command::Help,
            settings_path: None,
        });
    };

    let mut settings_path = None;
    let mut text = None;
    let mut voice = None;
    let mut out = None;
    let mut input = None;
    let mut rate = WavFormat::default().sample_rate;

    while let Some(arg) = it.next() {
        let mut value = |name: &str| it.next().ok_or_else(|| format!("missing value for {name}"));
        match arg.as_str() {
            "--settings" => settings_path = Some(PathBuf::from(value("--settings")?)),
            "--text" => text = Some(value("--text")?),
            "--voice" => voice = Some(value("--voice")?),
            "--out" | "--output" => out = Some(PathBuf::from(value(&arg)?)),
            "--input" => input = Some(PathBuf::from(value("--input")?)),
            "--rate" => {
                rate = value("--rate")?
                    .parse::<u32>()
                    .map_err(|_| "invalid value for --rate".to_string())?
                    .clamp(8_000, 192_000);
            }
            "--help" | "-h" => {
                return Ok(Args {
                    command: Command::Help,
                    settings_path,
                })
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    let command = match command.as_str() {
        "live" => Command::Live,
        "speak" => Command::Speak {
            text: text.ok_or("speak requires --text")?,
            voice,
            out: out.ok_or("speak requires --out")?,
        },
        "wrap" => Command::Wrap {
            input: input.ok_or("wrap requires --input")?,
            output: out.ok_or("wrap requires --output")?,
            rate,
        },
        "devices" => Command::Devices,
        "settings" => Command::Settings { voice },
        "help" | "--help" | "-h" => Command::Help,
        other => return Err(format!("unknown command: {other}")),
    };
    Ok(Args {
        command,
        settings_path,
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "velto=info,velto_voice_core=info".into()),
        )
        .init();

    let args = parse_args(std::env::args().skip(1)).map_err(anyhow::Error::msg)?;
    let settings_path = args.settings_path.unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);
    apply_runtime_env_from_settings(&settings);

    match args.command {
        Command::Help => println!("{USAGE}"),
        Command::Devices => print_devices(),
        Command::Settings { voice } => {
            let mut settings = settings;
            if let Some(voice) = voice {
                settings.voice = settings::normalize_voice(&voice);
                save_settings(&settings_path, &settings)
                    .with_context(|| format!("saving {}", settings_path.display()))?;
            }
            print_settings(&settings, &settings_path)?;
        }
        Command::Wrap {
            input,
            output,
            rate,
        } => wrap_file(&input, &output, rate)?,
        Command::Speak { text, voice, out } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(speak(&settings, &text, voice.as_deref(), &out))?;
        }
        Command::Live => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(live(&settings))?;
        }
    }
    Ok(())
}

fn print_devices() {
    for device in list_devices() {
        let direction = match device.direction {
            DeviceDirection::Input => "input ",
            DeviceDirection::Output => "output",
        };
        let marker = if device.is_default { " (default)" } else { "" };
        println!("{direction}  {}{marker}", device.name);
    }
}

fn print_settings(settings: &CliSettings, path: &std::path::Path) -> anyhow::Result<()> {
    let mut shown = settings.clone();
    shown.api_key = shown.api_key.map(|_| "********".into());
    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}

fn wrap_file(input: &std::path::Path, output: &std::path::Path, rate: u32) -> anyhow::Result<()> {
    let pcm = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let format = WavFormat {
        sample_rate: rate,
        ..WavFormat::default()
    };
    std::fs::write(output, wrap_pcm_with(&pcm, format))
        .with_context(|| format!("writing {}", output.display()))?;
    info!(bytes = pcm.len(), rate, "wrapped PCM into {}", output.display());
    Ok(())
}

async fn speak(
    settings: &CliSettings,
    text: &str,
    voice: Option<&str>,
    out: &std::path::Path,
) -> anyhow::Result<()> {
    if text.trim().is_empty() {
        bail!("nothing to say: --text is empty");
    }
    let live = settings.live_config();
    let voice = voice
        .map(settings::normalize_voice)
        .unwrap_or_else(|| settings.voice.clone());
    let synthesizer = SpeechSynthesizer::new(live.api_key, Some(&voice))?;
    let wav = synthesizer.synthesize_wav(text).await?;
    std::fs::write(out, &wav).with_context(|| format!("writing {}", out.display()))?;
    println!("wrote {} ({} bytes, voice {voice})", out.display(), wav.len());
    Ok(())
}

async fn live(settings: &CliSettings) -> anyhow::Result<()> {
    let session = VoiceSession::new(
        SessionConfig::from_env(),
        Arc::new(CpalInput),
        Arc::new(CpalOutput),
    );
    let mut status = session.subscribe_status();
    let mut speaking = session.subscribe_speaking();

    if let Err(e) = session
        .start(Box::new(GeminiLiveTransport::new(settings.live_config())))
        .await
    {
        bail!("{}", e.user_message());
    }
    println!("Connecting to Velto Support... (Ctrl+C to stop)");

    let mut was_active = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping.");
                break;
            }
            event = status.recv() => match event {
                Ok(event) => {
                    match event.phase {
                        SessionPhase::Active => {
                            was_active = true;
                            println!("Connected. Start talking.");
                        }
                        SessionPhase::Idle => {
                            if let Some(detail) = event.detail {
                                println!("Session ended: {detail}");
                            }
                            break;
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            event = speaking.recv() => {
                if let Ok(event) = event {
                    println!("{}", if event.is_speaking { "[agent speaking]" } else { "[listening]" });
                }
            }
        }
    }

    session.stop();
    let diagnostics = session.diagnostics_snapshot();
    info!(was_active, ?diagnostics, "session finished");
    if let Some(error) = session.snapshot().last_error {
        bail!("{error}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, String> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn no_arguments_shows_help() {
        assert_eq!(args(&[]).unwrap().command, Command::Help);
    }

    #[test]
    fn speak_requires_text_and_output() {
        assert!(args(&["speak", "--out", "a.wav"]).is_err());
        let parsed = args(&["speak", "--text", "hi", "--out", "a.wav", "--voice", "Puck"]).unwrap();
        assert_eq!(
            parsed.command,
            Command::Speak {
                text: "hi".into(),
                voice: Some("Puck".into()),
                out: PathBuf::from("a.wav"),
            }
        );
    }

    #[test]
    fn wrap_defaults_to_24k() {
        let parsed = args(&["wrap", "--input", "a.pcm", "--output", "a.wav"]).unwrap();
        assert_eq!(
            parsed.command,
            Command::Wrap {
                input: PathBuf::from("a.pcm"),
                output: PathBuf::from("a.wav"),
                rate: 24_000,
            }
        );
    }

    #[test]
    fn settings_path_applies_to_any_command() {
        let parsed = args(&["live", "--settings", "/tmp/s.json"]).unwrap();
        assert_eq!(parsed.command, Command::Live);
        assert_eq!(parsed.settings_path, Some(PathBuf::from("/tmp/s.json")));
    }

    #[test]
    fn settings_accepts_a_voice() {
        let parsed = args(&["settings", "--voice", "aoede"]).unwrap();
        assert_eq!(
            parsed.command,
            Command::Settings {
                voice: Some("aoede".into())
            }
        );
    }

    #[test]
    fn unknown_input_is_rejected() {
        assert!(args(&["dance"]).is_err());
        assert!(args(&["live", "--loud"]).is_err());
        assert!(args(&["wrap", "--rate"]).is_err());
    }

    #[test]
    fn wrap_file_writes_a_parseable_header() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pcm");
        let output = dir.path().join("out.wav");
        std::fs::write(&input, [0u8, 0, 0xFF, 0x7F]).unwrap();

        wrap_file(&input, &output, 16_000).unwrap();

        let wav = std::fs::read(&output).unwrap();
        assert_eq!(wav.len(), 48);
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 16_000);
        assert_eq!(&wav[44..], &[0, 0, 0xFF, 0x7F]);
    }
}
