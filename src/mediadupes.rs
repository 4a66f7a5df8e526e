use anyhow::Context;
use clap::Parser;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::app::App;
use crate::cluster::DuplicateSet;
use crate::config::Config;
use crate::fileops::{open_in_viewer, TrashDeleter};
use crate::frames::{FfmpegSampler, FrameSampler};
use crate::media::FrameStrategy;
use crate::preview::{DiskPreviews, PreviewSource, SkipPreviews};
use crate::sink::{LogSink, Sink};
use crate::state::{can_open, IntentOutcome, PendingDeletions, Session, SessionIntent};

mod app;
mod cluster;
mod config;
mod error;
mod fileops;
mod frames;
mod hamminghash;
mod jobs;
mod media;
mod phash;
mod preview;
mod scanner;
mod sink;
mod state;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("APP_GIT_HASH"), ")");

// --- CLI Definition ---

#[derive(Parser, Debug)]
#[command(author, version = VERSION, about = "Finds near-duplicate images and videos.", long_about = None)]
struct Cli {
    /// Directory to scan
    dir: PathBuf,

    /// Only scan the top level of DIR
    #[arg(long)]
    no_recursive: bool,

    /// Video frames to fingerprint: first, last, timestamp=N (comma separated).
    /// Videos are skipped when no frame is selected.
    #[arg(long, value_delimiter = ',', value_name = "FRAMES")]
    frames: Option<Vec<FrameStrategy>>,

    /// Maximum Hamming distance (1-30) for two files to count as duplicates
    #[arg(long)]
    threshold: Option<u32>,

    /// Print groups as JSON (nested lists of relative paths)
    #[arg(long)]
    json: bool,

    /// Walk through the groups and choose files to trash
    #[arg(long)]
    interactive: bool,

    /// Config file (default: <config dir>/mediadupes/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Also write the log to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn validate(&self) -> Result<(), String> {
        if self.json && self.interactive {
            return Err("Cannot use both --json and --interactive".to_string());
        }
        Ok(())
    }
}

fn configure_logs(verbose: bool, quiet: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    use simplelog::*;

    let min_loglevel = match (quiet, verbose) {
        (true, _) => LevelFilter::Warn,
        (_, true) => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    let cfg = ConfigBuilder::new()
        .add_filter_allow_str(env!("CARGO_CRATE_NAME"))
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    loggers.push(TermLogger::new(min_loglevel, cfg.clone(), TerminalMode::Stderr, ColorChoice::Auto));
    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)
            .with_context(|| format!("Cannot open log file {}", path.display()))?;
        loggers.push(WriteLogger::new(min_loglevel.max(LevelFilter::Debug), cfg, file));
    }
    CombinedLogger::init(loggers)?;
    Ok(())
}

// --- CLI Helpers ---

fn print_groups(set: &DuplicateSet) {
    for (i, group) in set.iter().enumerate() {
        println!("\n--- Group {}/{} ({} files) ---", i + 1, set.len(), group.len());
        for member in &group.members {
            println!("  {}", member);
        }
    }
}

fn print_current_group(session: &Session) {
    let (Some(group_label), Some(file_label), Some(cursor)) = (session.group_label(), session.file_label(), session.cursor()) else {
        return;
    };
    let green = "\x1b[32m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("\n========================================================");
    println!("Group {}  File {}", group_label, file_label);
    println!("========================================================");
    for (i, item) in session.items().iter().enumerate() {
        let marker = if i == cursor.file { ">" } else { " " };
        let (color, verdict) = if item.keep { (green, "keep") } else { (red, "DELETE") };
        let mut extra = Vec::new();
        if !item.dims.is_empty() { extra.push(item.dims.clone()); }
        if !item.duration.is_empty() { extra.push(item.duration.clone()); }
        if item.is_video() { extra.push("video file".to_string()); }
        println!("{} [{}] {}{:<6}{} {} {}", marker, i + 1, color, verdict, reset, item.path,
            if extra.is_empty() { String::new() } else { format!("({})", extra.join(", ")) });
    }
    if !can_open(session) {
        println!("Current file is no longer on disk.");
    } else if session.current_item().is_some_and(|i| i.is_video()) {
        println!("Current file is a video; the preview is its first frame.");
    }
}

#[derive(Debug, PartialEq)]
enum Command {
    Intent(SessionIntent),
    ConfirmDelete,
    Open,
    Help,
}

fn parse_command(line: &str, current_file: usize) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next()?;
    let arg = parts.next();

    let intent = match cmd {
        "n" => SessionIntent::NextImage,
        "p" => SessionIntent::PrevImage,
        "]" => SessionIntent::NextGroup,
        "[" => SessionIntent::PrevGroup,
        "k" => match arg {
            None => SessionIntent::ToggleKeep(current_file),
            Some(a) => {
                let idx = a.parse::<usize>().ok().filter(|&i| i >= 1)?;
                SessionIntent::ToggleKeep(idx - 1)
            }
        },
        "d" => return Some(Command::ConfirmDelete),
        "o" => return Some(Command::Open),
        "q" => SessionIntent::Stop,
        "?" | "h" => return Some(Command::Help),
        _ => return None,
    };
    Some(Command::Intent(intent))
}

fn ask_yes_no(prompt: &str) -> io::Result<bool> {
    print!("{} [y/N]: ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn run_interactive(app: &mut App) -> anyhow::Result<()> {
    if !app.start_session() {
        println!("No duplicate groups found.");
        return Ok(());
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut input_buf = String::new();
    let mut pending: Vec<PendingDeletions> = Vec::new();

    while app.session.is_active() {
        print_current_group(&app.session);
        print!("\nCommand (n/p file, ]/[ group, k [N] keep, o open, d delete, q quit, ? help): ");
        stdout.flush().ok();

        input_buf.clear();
        if stdin.read_line(&mut input_buf)? == 0 { break; }
        let current_file = app.session.cursor().map(|c| c.file).unwrap_or(0);

        let intent = match parse_command(input_buf.trim(), current_file) {
            Some(Command::Intent(intent)) => intent,
            Some(Command::Help) => {
                println!("n/p: next/previous file   ]/[: next/previous group");
                println!("k: toggle keep on current file, k N: toggle file N");
                println!("o: open current file in the default viewer");
                println!("d: trash every file marked DELETE in this group   q: quit");
                continue;
            }
            Some(Command::Open) => {
                match app.session.open_target() {
                    Some(path) => {
                        if let Err(e) = open_in_viewer(&path) {
                            println!("Error opening file: {}", e);
                        }
                    }
                    None => println!("Current file is no longer on disk."),
                }
                continue;
            }
            Some(Command::ConfirmDelete) => {
                let doomed: Vec<&str> = app.session.items().iter().filter(|i| !i.keep).map(|i| i.path.as_str()).collect();
                if doomed.is_empty() {
                    println!("Nothing marked for deletion.");
                    continue;
                }
                println!("The following files will be moved to the trash:");
                for d in &doomed { println!("  {}", d); }
                if !ask_yes_no("Proceed?")? { continue; }
                SessionIntent::DeleteUnselected
            }
            None => {
                println!("Unknown command.");
                continue;
            }
        };

        match app.session.handle_input(intent) {
            IntentOutcome::Done => {}
            IntentOutcome::Ignored => println!("Not available here."),
            IntentOutcome::Deleting(p) => pending.push(p),
            IntentOutcome::Failed(msg) => println!("Error: {}", msg),
        }
    }

    if !pending.is_empty() {
        println!("Waiting for deletions to finish...");
        let outcomes: Vec<_> = pending.into_iter().flat_map(PendingDeletions::wait).collect();
        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        println!("Trashed {} files, {} failed.", outcomes.len() - failed, failed);
    }
    println!("\nDone.");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    configure_logs(args.verbose, args.quiet, args.log_file.as_deref())?;

    let config_path = args.config.clone()
        .or_else(Config::default_path)
        .context("No config dir found")?;
    let config = Config::load_or_create(&config_path)?;

    // Command line wins over the config file
    let mut scan = config.scan_config(&args.dir);
    if args.no_recursive { scan.recursive = false; }
    if let Some(frames) = &args.frames { scan.strategies = frames.clone(); }
    if let Some(t) = args.threshold { scan.threshold = t; }
    let retry = config.retry_policy()?;

    let sink: Arc<dyn Sink> = Arc::new(LogSink);
    let sampler: Arc<dyn FrameSampler> = Arc::new(FfmpegSampler::new());
    let previews: Arc<dyn PreviewSource> = if args.interactive {
        Arc::new(DiskPreviews::new(sampler.clone()))
    } else {
        Arc::new(SkipPreviews)
    };
    let session = Session::new(Arc::new(TrashDeleter), retry, previews, sink.clone())
        .with_extensions(scan.image_extensions.clone(), scan.video_extensions.clone());
    let mut app = App::new(sink, sampler, session);

    if !app.can_hash(&scan.root) {
        eprintln!("Error: Not a directory: {:?}", scan.root);
        std::process::exit(1);
    }
    let progress_rx = app.start_hashing(scan)?;
    let show_progress = !args.quiet;
    let mut shown = false;
    let mut report = |(done, total): (usize, usize)| {
        if show_progress && total > 0 {
            eprint!("\rHashing {}/{}", done, total);
            shown = true;
        }
    };
    loop {
        if let Ok(update) = progress_rx.recv_timeout(Duration::from_millis(100)) {
            report(update);
        }
        if app.poll_hashing()? { break; }
    }
    progress_rx.try_iter().for_each(&mut report);
    if shown { eprintln!(); }

    if args.interactive {
        run_interactive(&mut app)?;
    } else {
        let set = app.loaded().cloned().unwrap_or_default();
        if args.json {
            println!("{}", set.to_json()?);
        } else {
            println!("Found {} duplicate groups.", set.len());
            print_groups(&set);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("n", 0), Some(Command::Intent(SessionIntent::NextImage)));
        assert_eq!(parse_command("]", 0), Some(Command::Intent(SessionIntent::NextGroup)));
        assert_eq!(parse_command("k", 2), Some(Command::Intent(SessionIntent::ToggleKeep(2))));
        assert_eq!(parse_command("k 3", 0), Some(Command::Intent(SessionIntent::ToggleKeep(2))));
        assert_eq!(parse_command("k 0", 0), None);
        assert_eq!(parse_command("d", 0), Some(Command::ConfirmDelete));
        assert_eq!(parse_command("o", 0), Some(Command::Open));
        assert_eq!(parse_command("q", 0), Some(Command::Intent(SessionIntent::Stop)));
        assert_eq!(parse_command("", 0), None);
        assert_eq!(parse_command("xyz", 0), None);
    }

    #[test]
    fn test_cli_parses_frames_list() {
        let cli = Cli::try_parse_from(["mediadupes", "/tmp", "--frames", "first,timestamp=5", "--threshold", "12"]).unwrap();
        assert_eq!(cli.frames, Some(vec![FrameStrategy::First, FrameStrategy::Timestamp(5)]));
        assert_eq!(cli.threshold, Some(12));
        assert!(Cli::try_parse_from(["mediadupes", "/tmp", "--frames", "middle"]).is_err());
        assert!(Cli::try_parse_from(["mediadupes", "/tmp", "-v", "-q"]).is_err());
    }
}
