use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use dlm_core::progress::{format_bytes, percent, EventNotifier};
use dlm_core::{recovery, DownloadConfig, DownloadHandle, DownloadStatus, DownloadSupervisor};

mod terminal_observer;
use terminal_observer::TerminalProgressObserver;

#[derive(Parser)]
#[command(name = "dlm", about = "Resumable download manager")]
struct Args {
    /// URLs to download. Each argument may also be a comma-separated list.
    urls: Vec<String>,

    /// Directory downloaded files are written to
    #[arg(short, long)]
    download_dir: Option<PathBuf>,

    /// Directory holding progress records
    #[arg(short, long)]
    progress_dir: Option<PathBuf>,

    /// Do not resume downloads left unfinished by a previous run
    #[arg(long)]
    no_recover: bool,
}

enum Command {
    Pause(usize),
    Resume(usize),
    Cancel(usize),
    List,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default();
    let number = words.next();
    let index = || -> Result<usize, String> {
        number
            .and_then(|n| n.trim_start_matches('#').parse().ok())
            .ok_or_else(|| format!("usage: {} N", verb))
    };
    match verb {
        "p" | "pause" => Ok(Command::Pause(index()?)),
        "r" | "resume" => Ok(Command::Resume(index()?)),
        "c" | "cancel" => Ok(Command::Cancel(index()?)),
        "l" | "list" => Ok(Command::List),
        "q" | "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("unknown command {:?}", other)),
    }
}

fn split_urls(args: &[String]) -> Vec<String> {
    args.iter()
        .flat_map(|arg| arg.split(','))
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

/// Returns `false` once the user asked to quit.
async fn run_command(
    supervisor: &DownloadSupervisor,
    handles: &[DownloadHandle],
    out: &TerminalProgressObserver,
    line: &str,
) -> bool {
    if line.trim().is_empty() {
        return true;
    }
    let command = match parse_command(line) {
        Ok(command) => command,
        Err(msg) => {
            out.println(msg);
            return true;
        }
    };
    let lookup = |n: usize| handles.get(n.wrapping_sub(1)).copied();

    let result = match command {
        Command::Quit => return false,
        Command::List => {
            for (i, handle) in handles.iter().enumerate() {
                let Ok(snap) = supervisor.snapshot(*handle).await else {
                    out.println(format!("{:>3}. {} [cancelled]", i + 1, handle));
                    continue;
                };
                let progress = match percent(snap.bytes_downloaded, snap.total_bytes) {
                    Some(p) => format!("{:.1}%", p),
                    None => format_bytes(snap.bytes_downloaded),
                };
                out.println(format!(
                    "{:>3}. {} [{}] {} {}",
                    i + 1,
                    snap.handle,
                    snap.status,
                    progress,
                    snap.url
                ));
            }
            Ok(())
        }
        Command::Pause(n) | Command::Resume(n) | Command::Cancel(n) if lookup(n).is_none() => {
            out.println(format!("no download number {}", n));
            Ok(())
        }
        Command::Pause(n) => supervisor.pause(handles[n - 1]).await,
        Command::Resume(n) => supervisor.resume(handles[n - 1]).await,
        Command::Cancel(n) => supervisor.cancel(handles[n - 1]).await,
    };
    if let Err(e) = result {
        out.println(format!("error: {}", e));
    }
    true
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut config = DownloadConfig::from_env();
    if let Some(dir) = args.download_dir {
        config.download_dir = dir;
    }
    if let Some(dir) = args.progress_dir {
        config.progress_dir = dir;
    }

    let (supervisor, events) = match DownloadSupervisor::new(config).await {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("Cannot start: {}", e);
            std::process::exit(1);
        }
    };

    let observer = Arc::new(TerminalProgressObserver::new());
    let mut notifier = EventNotifier::new();
    notifier.add_observer(Box::new(Arc::clone(&observer)));
    let notifier_handle = tokio::spawn(notifier.run(events));

    let mut handles: Vec<DownloadHandle> = Vec::new();

    if !args.no_recover {
        match recovery::scan_and_resume(&supervisor).await {
            Ok(report) => {
                for (url, handle) in report.resumed {
                    observer.println(format!("Resuming {} as {}", url, handle));
                    handles.push(handle);
                }
                for (url, cause) in report.failed {
                    observer.println(format!("Could not resume {}: {}", url, cause));
                }
            }
            Err(e) => observer.println(format!("Recovery skipped: {}", e)),
        }
    }

    for url in split_urls(&args.urls) {
        match supervisor.submit(&url).await {
            Ok(handle) if !handles.contains(&handle) => handles.push(handle),
            Ok(_) => {}
            Err(e) => observer.println(format!("Cannot start {}: {}", url, e)),
        }
    }

    if handles.is_empty() {
        println!("Nothing to download.");
        return;
    }
    observer.println("Commands: pause N | resume N | cancel N | list | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut tick = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !run_command(&supervisor, &handles, &observer, &line).await {
                        break;
                    }
                }
                _ => stdin_open = false,
            },
            _ = tick.tick() => {
                if !supervisor.has_unsettled().await {
                    break;
                }
            }
        }
    }

    // Checkpoint anything still running so the next start picks it up.
    for snap in supervisor.snapshots().await {
        if snap.status == DownloadStatus::InProgress {
            if let Err(e) = supervisor.pause(snap.handle).await {
                log::warn!("could not pause {} on exit: {}", snap.handle, e);
            }
        }
    }
    drop(supervisor);
    let _ = tokio::time::timeout(Duration::from_secs(2), notifier_handle).await;
}
