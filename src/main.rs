//! bidi-voice binary entry point.

use std::io::BufRead;

use bidi_voice::audio::device::{list_devices, CpalInput, CpalOutput};
use bidi_voice::cli::{render_record, Cli};
use bidi_voice::config::VoiceConfig;
use bidi_voice::error::VoiceError;
use bidi_voice::session::{Session, SessionOutcome};
use clap::Parser;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match run(cli).await {
        Ok(outcome) if outcome.is_failure() => {
            eprintln!("Voice chat ended unexpectedly ({outcome}).");
            std::process::exit(1);
        }
        Ok(_) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<SessionOutcome, VoiceError> {
    if cli.list_devices {
        let (inputs, outputs) = list_devices()?;
        println!("Input devices:");
        for name in inputs {
            println!("  {name}");
        }
        println!("Output devices:");
        for name in outputs {
            println!("  {name}");
        }
        return Ok(SessionOutcome::Stopped);
    }

    let config = cli.apply(VoiceConfig::from_env()?)?;
    let input = CpalInput::new(config.input_device.as_deref(), config.audio.clone())?;
    let output = CpalOutput::open(config.output_device.as_deref(), config.audio.clone())?;
    if config.endpoint.is_routed() {
        println!("Connecting to agent runtime {}", config.endpoint);
    } else {
        println!("Connecting to {}", config.endpoint);
    }

    let mut session = Session::new(config, Box::new(input), Box::new(output));
    let printer = session.take_records().map(|mut records| {
        tokio::spawn(async move {
            while let Some(record) = records.next().await {
                if let Some(line) = render_record(&record) {
                    println!("{line}");
                }
            }
        })
    });

    session.initialize().await?;
    println!("Voice chat started. Speak into your microphone.");
    println!("Press Enter (or Ctrl-C) to stop.");

    let outcome = session.run_until(stop_requested()).await?;
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    println!("Voice chat ended.");
    Ok(outcome)
}

/// Resolves on Enter or Ctrl-C.
async fn stop_requested() {
    // A detached thread so a pending stdin read never holds up exit.
    let (enter_tx, enter_rx) = oneshot::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
        let _ = enter_tx.send(());
    });

    tokio::select! {
        _ = enter_rx => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}
