//! # Track Inspector
//!
//! Command-line tool that loads a track stream and prints the group state
//! table at a chosen position.
//!
//! Usage: `track_inspector <file.mtrk> [position]`

use std::fs::File;
use std::io::BufReader;
use std::process::ExitCode;

use memtrail_record::{Track, TrackResult};

/// Records decoded between progress lines.
const SLICE: usize = 64 * 1024;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let Some(path) = args.get(1) else {
        println!("Usage: track_inspector <file.mtrk> [position]");
        println!();
        println!("Prints the group state after `position` events (default: all).");
        return ExitCode::FAILURE;
    };
    let position = match args.get(2).map(|arg| arg.parse::<usize>()) {
        None => None,
        Some(Ok(position)) => Some(position),
        Some(Err(error)) => {
            println!("Error: invalid position {:?}: {error}", args[2]);
            return ExitCode::FAILURE;
        }
    };

    match inspect(path, position) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            println!("Error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn inspect(path: &str, position: Option<usize>) -> TrackResult<()> {
    println!("Loading track: {path}");
    let file = File::open(path)?;
    let mut track = Track::new();
    track.begin_deserialize(BufReader::new(file))?;
    while !track.read_slice(SLICE)? {
        println!("  ... {} events", track.len());
    }

    let markers = track.markers();
    println!();
    println!("┌─ TRACK ──────────────────────────────────────────────┐");
    println!("│ Events:   {:>12}", track.len());
    println!("│ Groups:   {:>12}", track.group_count());
    println!("│ Markers:  {:>12}", markers.len());
    println!("└──────────────────────────────────────────────────────┘");

    for marker in markers.iter().take(32) {
        println!(
            "  marker {:>8} at event {:>10} (group {}, t={}ns)",
            marker.value, marker.position, marker.group, marker.timestamp
        );
    }
    if markers.len() > 32 {
        println!("  ... {} more markers", markers.len() - 32);
    }

    let at = track.seek(position.unwrap_or(track.len()));
    println!();
    println!("State after {at} of {} events:", track.len());
    println!(
        "{:<40} {:>14} {:>14} {:>14} {:>14}",
        "GROUP", "RESERVED", "USED", "INCL RESERVED", "INCL USED"
    );
    for (path, stats) in track.state() {
        let name = if path.is_empty() { "<root>" } else { &*path };
        println!(
            "{:<40} {:>14} {:>14} {:>14} {:>14}",
            name, stats.own.reserved, stats.own.used, stats.inclusive.reserved, stats.inclusive.used
        );
    }
    Ok(())
}
