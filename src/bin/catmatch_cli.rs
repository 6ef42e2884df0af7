//! Terminal client for the `catmatchd` daemon.
//!
//! Examples:
//!   catmatch-cli p01 1
//!   catmatch-cli --addr 127.0.0.1:9877 p01 2
//!
//! Stimuli and prototypes are printed as file paths. Type a key and press
//! enter to answer: `l`/`r` stand for left/right, `q` aborts after the
//! current trial, anything else is sent as-is (e.g. `3` for keyset layouts).

use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::process;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    Hello { participant: String, session: String },
    Key { key: String },
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum DaemonEvent {
    Screen {
        kind: String,
        text: String,
        #[serde(default)]
        wait_for_key: bool,
    },
    Stimulus {
        id: u32,
        path: String,
    },
    Choices {
        left: String,
        right: String,
        left_keys: Vec<String>,
        right_keys: Vec<String>,
    },
    Feedback {
        text: String,
        correct: bool,
        bonus: f64,
        dwell_ms: u64,
    },
    Score {
        bonus: f64,
    },
    Finished {
        trials: u32,
        bonus: f64,
        aborted: bool,
    },
    Error {
        message: String,
    },
}

fn usage() -> ! {
    eprintln!("catmatch-cli (talks to catmatchd @ 127.0.0.1:9877 by default)");
    eprintln!("Usage: catmatch-cli [--addr host:port] <participant> <session>\n");
    eprintln!("Keys (type and press enter):");
    eprintln!("  l | r          left / right");
    eprintln!("  1-9, 0         keyset layouts");
    eprintln!("  q              abort after the current trial");
    eprintln!("  <anything>     sent as-is; any key leaves an instruction screen");
    process::exit(1);
}

fn parse_args() -> (String, String, String) {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let mut addr = "127.0.0.1:9877".to_string();
    if args.len() >= 2 && args[0] == "--addr" {
        addr = args[1].clone();
        args.drain(0..2);
    }

    if args.len() != 2 {
        usage();
    }
    let session = args.pop().unwrap_or_default();
    let participant = args.pop().unwrap_or_default();
    (addr, participant, session)
}

/// Map typed input to a protocol message.
fn translate(input: &str) -> Option<ClientMessage> {
    let key = match input.trim() {
        "" => "space",
        "l" => "left",
        "r" => "right",
        "q" | "escape" => return Some(ClientMessage::Abort),
        other => other,
    };
    Some(ClientMessage::Key {
        key: key.to_string(),
    })
}

fn send(stream: &mut TcpStream, msg: &ClientMessage) -> Result<(), String> {
    let line = serde_json::to_string(msg).map_err(|e| format!("serialize: {e}"))?;
    stream
        .write_all(line.as_bytes())
        .and_then(|_| stream.write_all(b"\n"))
        .map_err(|e| format!("send: {e}"))
}

fn print_event(event: &DaemonEvent) {
    match event {
        DaemonEvent::Screen {
            kind,
            text,
            wait_for_key,
        } => {
            if kind == "fixation" {
                println!("\n   +");
            } else {
                println!("\n== {kind} ==\n{text}");
                if *wait_for_key {
                    println!("[press enter]");
                }
            }
        }
        DaemonEvent::Stimulus { id, path } => println!("stimulus #{id}: {path}"),
        DaemonEvent::Choices {
            left,
            right,
            left_keys,
            right_keys,
        } => {
            println!("  left : {left}  [{}]", left_keys.join(" "));
            println!("  right: {right}  [{}]", right_keys.join(" "));
            println!("answer?");
        }
        DaemonEvent::Feedback {
            text,
            correct,
            bonus,
            dwell_ms,
        } => println!(
            "{} {text} (bonus {bonus:+.3}, {:.1}s)",
            if *correct { "✓" } else { "✗" },
            *dwell_ms as f64 / 1000.0
        ),
        DaemonEvent::Score { bonus } => println!("total bonus: ${bonus:.2}"),
        DaemonEvent::Finished {
            trials,
            bonus,
            aborted,
        } => println!(
            "\nsession {} after {trials} trials, bonus ${bonus:.2}",
            if *aborted { "aborted" } else { "complete" }
        ),
        DaemonEvent::Error { message } => eprintln!("Error: {message}"),
    }
}

fn main() {
    let (addr, participant, session) = parse_args();

    let mut stream = TcpStream::connect(&addr).unwrap_or_else(|e| {
        eprintln!("Failed: connect {addr}: {e}");
        process::exit(1);
    });
    let reader = BufReader::new(stream.try_clone().unwrap_or_else(|e| {
        eprintln!("Failed: clone: {e}");
        process::exit(1);
    }));

    if let Err(e) = send(
        &mut stream,
        &ClientMessage::Hello {
            participant,
            session,
        },
    ) {
        eprintln!("Failed: {e}");
        process::exit(1);
    }

    // Forward stdin on its own thread; the main thread only prints events.
    let mut input_stream = stream;
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if let Some(msg) = translate(&line) {
                if send(&mut input_stream, &msg).is_err() {
                    break;
                }
            }
        }
    });

    let mut exit_code = 0;
    for line in reader.lines() {
        let Ok(line) = line else { break };
        match serde_json::from_str::<DaemonEvent>(&line) {
            Ok(event) => {
                print_event(&event);
                match event {
                    DaemonEvent::Finished { .. } => break,
                    DaemonEvent::Error { .. } => exit_code = 1,
                    _ => {}
                }
            }
            Err(e) => eprintln!("parse event: {e}"),
        }
    }
    process::exit(exit_code);
}
