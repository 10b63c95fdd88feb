// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Streaming a camera to the virtual camera
//! - Driving the controller interactively from stdin
//! - Printing the effective configuration

use backdrop::backends::camera::{DeviceEnumerator, GstCaptureBackend};
use backdrop::control::{ControlError, StartRequest, StreamController};
use backdrop::Config;
use serde::Serialize;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Flags for the `stream` command; unset values take the configured defaults
#[derive(clap::Args, Debug)]
pub struct StreamArgs {
    /// Camera index to use (from 'backdrop list')
    #[arg(short, long, default_value = "0")]
    pub source: u32,

    /// Processing rate in frames per second
    #[arg(short, long)]
    pub fps: Option<u32>,

    /// Blur kernel size (rounded up to odd)
    #[arg(short, long)]
    pub blur: Option<u32>,

    /// Background mode: none (black), blur or default (background image)
    #[arg(long)]
    pub background: Option<String>,
}

/// List all cameras that open and deliver a frame
pub fn list_cameras() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let enumerator = DeviceEnumerator::new(
        Arc::new(GstCaptureBackend::new()),
        config.stream.max_camera_check_range,
    );

    let devices = enumerator.list_devices();
    if devices.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for device in &devices {
        println!("  [{}] {}", device.id, device.name);
    }

    Ok(())
}

/// Stream until Ctrl+C or until the run ends on its own
pub fn stream(args: StreamArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let controller = StreamController::from_config(config)?;

    let response = controller.start(StartRequest {
        source: args.source,
        fps: args.fps,
        blur_strength: args.blur,
        background: args.background,
    })?;
    println!("{}", response.message);
    if let Some(output) = controller.status().output {
        println!(
            "Output: {}x{} {} @ {}fps (processing every {} frame(s))",
            output.width, output.height, output.pixel_format, output.fps, output.frame_interval
        );
    }
    println!("Streaming... (press Ctrl+C to stop)");

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    loop {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping...");
            let response = controller.stop()?;
            println!("{}", response.message);
            break;
        }

        if controller.engine().wait_idle(Duration::from_millis(100)) {
            let status = controller.status();
            println!("Stream ended after {} frames", status.frames);
            break;
        }
    }

    Ok(())
}

/// Line-driven controller: one command per line, one JSON response per line
pub fn console() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let controller = StreamController::from_config(config)?;

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(msg) => {
                writeln!(stdout, "{}", error_json(&ControlError::BadRequest(msg))?)?;
                continue;
            }
        };

        let output = match command {
            ConsoleCommand::Quit => break,
            ConsoleCommand::Start(request) => respond(controller.start(request))?,
            ConsoleCommand::Stop => respond(controller.stop())?,
            ConsoleCommand::Status => serde_json::to_string(&controller.status())?,
            ConsoleCommand::Devices => serde_json::to_string(&controller.devices())?,
            ConsoleCommand::Health => serde_json::to_string(&controller.health())?,
        };
        writeln!(stdout, "{}", output)?;
        stdout.flush()?;
    }

    Ok(())
}

/// Print the effective configuration as JSON
pub fn print_config() -> Result<(), Box<dyn std::error::Error>> {
    match Config::path() {
        Some(path) => eprintln!("Config file: {}", path.display()),
        None => eprintln!("Config file: none"),
    }
    let config = Config::load()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[derive(Debug, PartialEq)]
enum ConsoleCommand {
    Start(StartRequest),
    Stop,
    Status,
    Devices,
    Health,
    Quit,
}

/// Parse one console line
///
/// `start` accepts either a JSON request or positional
/// `<source> [fps] [blur] [background]` values.
fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let command = match word.to_ascii_lowercase().as_str() {
        "start" => ConsoleCommand::Start(parse_start(rest)?),
        "stop" => ConsoleCommand::Stop,
        "status" => ConsoleCommand::Status,
        "devices" | "list" => ConsoleCommand::Devices,
        "health" => ConsoleCommand::Health,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("Unknown command: {}", other)),
    };
    Ok(Some(command))
}

fn parse_start(args: &str) -> Result<StartRequest, String> {
    if args.starts_with('{') {
        return serde_json::from_str(args).map_err(|e| format!("Invalid start request: {}", e));
    }

    let mut parts = args.split_whitespace();
    let number = |value: Option<&str>, name: &str| -> Result<Option<u32>, String> {
        value
            .map(|v| v.parse::<u32>().map_err(|_| format!("Invalid {}: {}", name, v)))
            .transpose()
    };

    let source = number(parts.next(), "source")?.unwrap_or(0);
    let fps = number(parts.next(), "fps")?;
    let blur_strength = number(parts.next(), "blur strength")?;
    let background = parts.next().map(str::to_string);

    Ok(StartRequest {
        source,
        fps,
        blur_strength,
        background,
    })
}

fn respond<T: Serialize>(result: Result<T, ControlError>) -> Result<String, serde_json::Error> {
    match result {
        Ok(response) => serde_json::to_string(&response),
        Err(e) => error_json(&e),
    }
}

fn error_json(error: &ControlError) -> Result<String, serde_json::Error> {
    serde_json::to_string(&serde_json::json!({
        "error": error.message(),
        "status": error.status_code(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command("stop"), Ok(Some(ConsoleCommand::Stop)));
        assert_eq!(parse_command("  STATUS "), Ok(Some(ConsoleCommand::Status)));
        assert_eq!(parse_command("devices"), Ok(Some(ConsoleCommand::Devices)));
        assert_eq!(parse_command(""), Ok(None));
        assert_eq!(parse_command("# comment"), Ok(None));
        assert!(parse_command("launch").is_err());
    }

    #[test]
    fn test_parse_positional_start() {
        let Ok(Some(ConsoleCommand::Start(request))) = parse_command("start 2 30 15 black") else {
            panic!("expected start command");
        };
        assert_eq!(request.source, 2);
        assert_eq!(request.fps, Some(30));
        assert_eq!(request.blur_strength, Some(15));
        assert_eq!(request.background.as_deref(), Some("black"));

        let Ok(Some(ConsoleCommand::Start(request))) = parse_command("start") else {
            panic!("expected start command");
        };
        assert_eq!(request, StartRequest::default());
    }

    #[test]
    fn test_parse_json_start() {
        let Ok(Some(ConsoleCommand::Start(request))) =
            parse_command(r#"start {"source": 1, "background": "blur"}"#)
        else {
            panic!("expected start command");
        };
        assert_eq!(request.source, 1);
        assert_eq!(request.fps, None);
        assert_eq!(request.background.as_deref(), Some("blur"));
    }

    #[test]
    fn test_parse_rejects_bad_numbers() {
        assert!(parse_command("start x").is_err());
        assert!(parse_command("start 0 fast").is_err());
    }

    #[test]
    fn test_error_json_shape() {
        let json = error_json(&ControlError::Conflict("busy".into())).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["error"], "busy");
        assert_eq!(value["status"], 409);
    }
}
