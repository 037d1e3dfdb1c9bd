use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use screen_guide::history::TurnRecord;
use screen_guide::mapper::{logical_to_local, map_image_point_to_physical, physical_bounds, physical_to_logical, to_pixel};
use screen_guide::{DisplayInfo, HistoryEntry, HistoryLog, Point, Rect, Size};

/// Companion tools for the guidance agent.
#[derive(Parser, Debug)]
#[command(name = "screen-guide", version, about)]
struct Cli {
    /// History file to read instead of the default location.
    #[arg(long, global = true, env = "GUIDE_HISTORY_FILE")]
    history_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print recorded questions and notes, newest first.
    History {
        #[arg(long, short = 'n')]
        limit: Option<usize>,
        /// Raw JSON instead of one line per entry.
        #[arg(long)]
        json: bool,
    },
    /// Delete every history entry and saved screenshot.
    ClearHistory,
    /// Show where a frame point lands on a display.
    Map(MapArgs),
}

#[derive(Args, Debug)]
struct MapArgs {
    x: f64,
    y: f64,
    #[arg(long)]
    image_width: f64,
    #[arg(long)]
    image_height: f64,
    /// Logical display bounds as x,y,width,height.
    #[arg(long, value_parser = parse_rect)]
    bounds: Rect,
    #[arg(long, default_value_t = 1.0)]
    scale: f64,
    /// Primary monitor scale, when it differs.
    #[arg(long)]
    origin_scale: Option<f64>,
}

fn parse_rect(value: &str) -> Result<Rect, String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;
    match parts.as_slice() {
        [x, y, width, height] => Ok(Rect::new(*x, *y, *width, *height)),
        _ => Err(format!("expected x,y,width,height, got {value:?}")),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli.history_file.unwrap_or_else(HistoryLog::default_path);

    match cli.command {
        Command::History { limit, json } => {
            let log = HistoryLog::persistent(&path)
                .with_context(|| format!("reading history at {}", path.display()))?;
            let shown = limit.unwrap_or(log.len()).min(log.len());
            let entries = &log.entries()[..shown];
            if json {
                println!("{}", serde_json::to_string_pretty(entries)?);
            } else if entries.is_empty() {
                println!("No history at {}", path.display());
            } else {
                for entry in entries {
                    println!("{}", describe(entry));
                }
            }
        }
        Command::ClearHistory => {
            let mut log = HistoryLog::persistent(&path)
                .with_context(|| format!("reading history at {}", path.display()))?;
            let removed = log.len();
            log.clear();
            println!("Removed {removed} entries from {}", path.display());
        }
        Command::Map(args) => print_mapping(&args)?,
    }

    Ok(())
}

fn describe(entry: &HistoryEntry) -> String {
    let when = entry.recorded_at().format("%Y-%m-%d %H:%M:%S");
    match entry {
        HistoryEntry::Turn(turn) => format!("{when}  {}", describe_turn(turn)),
        HistoryEntry::Note { text, .. } => format!("{when}  -- {text}"),
    }
}

fn describe_turn(turn: &TurnRecord) -> String {
    let action = match (&turn.action_kind, &turn.action_summary) {
        (Some(kind), Some(summary)) => format!("{}: {summary}", kind.as_str()),
        (Some(kind), None) => kind.as_str().to_string(),
        _ => "no action".to_string(),
    };
    let pointer: u64 = turn.pointer_ms.iter().sum();
    let line = format!(
        "{:?} -> {action} [frame #{} {}x{}, reasoner {} ms, pointer {} ms]",
        turn.question, turn.frame_id, turn.frame_width, turn.frame_height, turn.reasoner_ms, pointer
    );
    match &turn.screenshot {
        Some(shot) => format!("{line} {}", shot.display()),
        None => line,
    }
}

fn print_mapping(args: &MapArgs) -> Result<()> {
    let mut display = DisplayInfo::new(args.bounds, args.scale);
    display.virtual_scale_factor = args.origin_scale;

    let physical = map_image_point_to_physical(
        Point::new(args.x, args.y),
        Size::new(args.image_width, args.image_height),
        &display,
    )?;
    let logical = physical_to_logical(physical, &display);
    let local = logical_to_local(logical, &display);
    let bounds = physical_bounds(&display);

    println!(
        "physical display: {}x{} at ({}, {})",
        bounds.width, bounds.height, bounds.x, bounds.y
    );
    println!("physical: ({}, {})", to_pixel(physical.x), to_pixel(physical.y));
    println!("logical:  ({}, {})", to_pixel(logical.x), to_pixel(logical.y));
    println!("overlay:  ({}, {})", to_pixel(local.x), to_pixel(local.y));
    Ok(())
}
