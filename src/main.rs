use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chan_dl::{
    Config, Error, Event, NamingMode, ProgressReporter, RetryConfig, ThreadDownloader,
    ThreadOutcome, ThreadRef, cancel_on_signal,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Exit code when every thread downloaded
const EXIT_OK: u8 = 0;
/// Exit code when at least one thread failed or was not a thread URL
const EXIT_FAILED: u8 = 1;
/// Exit code for unusable settings
const EXIT_CONFIG: u8 = 2;
/// Exit code after SIGINT/SIGTERM
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "chan-dl",
    version,
    about = "Download all files from 4chan(nel) threads"
)]
struct Cli {
    /// Thread URLs
    #[arg(required = true, value_name = "THREAD")]
    threads: Vec<String>,

    /// Suppress non-error output
    #[arg(short, long, env = "CHAN_DL_QUIET")]
    quiet: bool,

    /// Output directory
    #[arg(short, long, env = "CHAN_DL_PATH", default_value = "downloads")]
    path: PathBuf,

    /// Use original filenames instead of UNIX timestamps
    #[arg(short, long, env = "CHAN_DL_FILENAMES")]
    filenames: bool,

    /// Keep track of downloaded files by logging MD5 hashes
    #[arg(short, long, value_name = "FILE", env = "CHAN_DL_ARCHIVE")]
    archive: Option<PathBuf>,

    /// Number of concurrent connections
    #[arg(long, value_name = "N", env = "CHAN_DL_CONNECTIONS", default_value_t = 10,
          value_parser = clap::value_parser!(u32).range(1..))]
    connections: u32,

    /// How often to retry a thread if errors occur (N<0 retries indefinitely)
    #[arg(long, value_name = "N", env = "CHAN_DL_RETRIES", default_value_t = 5,
          allow_negative_numbers = true)]
    retries: i32,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            output_dir: self.path.clone(),
            naming: if self.filenames {
                NamingMode::Original
            } else {
                NamingMode::Timestamp
            },
            connections: self.connections as usize,
            retry: RetryConfig {
                retries: self.retries,
                ..RetryConfig::default()
            },
            ledger_path: self.archive.clone(),
            ..Config::default()
        }
    }
}

/// Prints one timestamped line per progress event
struct ConsoleReporter {
    /// 1-based position of the thread being downloaded
    position: AtomicUsize,
    threads: usize,
    quiet: bool,
}

impl ConsoleReporter {
    fn new(threads: usize, quiet: bool) -> Self {
        Self {
            position: AtomicUsize::new(0),
            threads,
            quiet,
        }
    }

    fn start_thread(&self, position: usize) {
        self.position.store(position, Ordering::Relaxed);
    }

    fn out(&self, line: String) {
        if !self.quiet {
            println!("[{}] {}", timestamp(), line);
        }
    }

    fn err(&self, line: String) {
        eprintln!("[{}] {}", timestamp(), line);
    }
}

impl ProgressReporter for ConsoleReporter {
    fn report(&self, event: Event) {
        let position = self.position.load(Ordering::Relaxed);
        match event {
            Event::ThreadStarted { thread, .. } => {
                self.out(format!("{} {}", progress_prefix(position, self.threads, None), thread));
            }
            Event::NothingToDo { thread } => {
                self.err(format!("{} {}", progress_prefix(position, self.threads, None), thread));
                self.err("Thread has no files!".to_string());
            }
            Event::FileCompleted {
                completed,
                total,
                path,
                ..
            } => {
                self.out(format!(
                    "{} {}",
                    progress_prefix(position, self.threads, Some((completed, total))),
                    display_path(&path)
                ));
            }
            Event::AttemptFailed { failed, .. } => {
                self.err(format!("{} file(s) failed!", failed));
            }
            Event::Retrying {
                attempt,
                max_attempts,
                ..
            } => {
                let limit = max_attempts.map_or_else(|| "Inf".to_string(), |n| n.to_string());
                self.err(format!("Retrying... ({} out of {} attempts)", attempt, limit));
            }
            Event::ThreadFinished { .. } => {}
        }
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%X").to_string()
}

/// `[t/T]` or `[t/T] [f/F]`, right-aligned to the width of the totals
fn progress_prefix(position: usize, threads: usize, files: Option<(usize, usize)>) -> String {
    let t_width = threads.to_string().len();
    let thread_part = format!("[{:>w$}/{}]", position, threads, w = t_width);
    match files {
        Some((count, total)) => {
            let f_width = total.to_string().len();
            format!("{} [{:>w$}/{}]", thread_part, count, total, w = f_width)
        }
        None => thread_part,
    }
}

/// `board/dir/name` for a path under the output directory
fn display_path(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    let start = parts.len().saturating_sub(3);
    parts[start..].join("/")
}

fn init_tracing(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.quiet);
    ExitCode::from(run_all(cli).await)
}

async fn run_all(cli: Cli) -> u8 {
    let mut exit_code = EXIT_OK;

    let mut threads = Vec::with_capacity(cli.threads.len());
    for input in &cli.threads {
        match ThreadRef::parse(input) {
            Ok(thread) => threads.push(thread),
            Err(e) => {
                tracing::error!(input = %input, error = %e, "skipping");
                exit_code = EXIT_FAILED;
            }
        }
    }

    let reporter = Arc::new(ConsoleReporter::new(threads.len(), cli.quiet));
    let downloader = match ThreadDownloader::new(cli.config()).await {
        Ok(downloader) => downloader.with_reporter(reporter.clone()),
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return EXIT_CONFIG;
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    for (index, thread) in threads.iter().enumerate() {
        reporter.start_thread(index + 1);
        match downloader.download_thread(thread, &cancel).await {
            Ok(ThreadOutcome::Succeeded(summary)) => {
                tracing::debug!(
                    thread = %thread,
                    completed = summary.completed,
                    skipped = summary.skipped,
                    "thread done"
                );
            }
            Ok(ThreadOutcome::NothingToDo) => {}
            Err(Error::Cancelled) => {
                reporter.err("User interrupt!".to_string());
                return EXIT_CANCELLED;
            }
            Err(e) => {
                tracing::error!(thread = %thread, url = %thread.url, error = %e, "thread failed");
                exit_code = EXIT_FAILED;
            }
        }
    }

    // Also catches a signal between the last thread and exit
    if cancel.is_cancelled() {
        return EXIT_CANCELLED;
    }
    exit_code
}
