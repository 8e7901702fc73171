#![cfg(not(tarpaulin_include))]

use clap::Parser;
use lesson_sheets::{
    BroadcastHub, FileStorage, GridEngine, LessonKey, LessonSeed, MemoryStorage, SnapshotStore,
    StorageBackend, SyncConfig, Widget, parse_cell_name,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

type Backend = Arc<dyn StorageBackend>;

/// Practice a lesson's spreadsheet from the terminal.
#[derive(Debug, Parser)]
#[command(name = "lesson-sheets", version)]
struct Args {
    /// Lesson key, `lesson` or `lesson/sub-lesson`
    #[arg(short, long, default_value = "lesson-1")]
    lesson: String,

    /// Directory holding saved workbooks
    #[arg(long, default_value = ".lesson-sheets")]
    data_dir: PathBuf,

    /// Keep workbooks in memory only
    #[arg(long)]
    memory: bool,

    /// JSON file with sync settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON file with a list of lesson seeds
    #[arg(long)]
    seeds: Option<PathBuf>,

    /// Override the number of snapshot request attempts
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Override the delay between snapshot request attempts
    #[arg(long)]
    retry_delay_ms: Option<u64>,
}

fn default_seeds() -> Vec<LessonSeed> {
    vec![LessonSeed::new(
        "lesson-1",
        [
            vec!["Date", "Description", "Amount"],
            vec!["2024-01-05", "Groceries", "54.20"],
            vec!["2024-01-07", "Bus pass", "30.00"],
        ],
    )]
}

fn load_seeds(path: Option<&PathBuf>) -> Result<Vec<LessonSeed>, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?),
        None => Ok(default_seeds()),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  <cell>=<value>: Commit a value, e.g. A2=2024-01-01");
    println!("  show: Print the sheet");
    println!("  check: Check the practice answer");
    println!("  reset: Go back to the lesson's starting data");
    println!("  full: Open the full view and report where it loaded from");
    println!("  url: Print the full-view link");
    println!("  q: Save and quit");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SyncConfig::from_json_file(path)?,
        None => SyncConfig::default(),
    };
    if let Some(attempts) = args.max_attempts {
        config.max_attempts = attempts;
    }
    if let Some(delay) = args.retry_delay_ms {
        config.retry_delay_ms = delay;
    }

    let backend: Backend = if args.memory {
        Arc::new(MemoryStorage::new())
    } else {
        Arc::new(FileStorage::open(&args.data_dir)?)
    };
    let store = SnapshotStore::with_prefix(backend, config.storage_prefix.clone());
    let hub = BroadcastHub::new();

    let key = LessonKey::new(args.lesson.as_str());
    let seeds = load_seeds(args.seeds.as_ref())?;
    let seed = LessonSeed::find(&seeds, &key)
        .cloned()
        .unwrap_or_else(|| LessonSeed::new(key.clone(), Vec::<Vec<String>>::new()));

    let mut widget = Widget::mount_embedded(
        GridEngine::new(),
        seed.clone(),
        store.clone(),
        &hub,
        config.clone(),
    )?;
    println!("Lesson {} loaded from {:?}", widget.key(), widget.source());

    let mut start_time = Instant::now();
    let mut status = String::from("ok");
    let mut show = true;
    loop {
        if show {
            print!("{}", widget.engine().render_grid(10, 6)?);
            show = false;
        }

        print!("[{:.1}] ({}) > ", start_time.elapsed().as_secs_f64(), status);
        io::stdout().flush()?;

        let mut command = String::new();
        if io::stdin().read_line(&mut command)? == 0 {
            break;
        }
        let command = command.trim();
        start_time = Instant::now();

        match command {
            "" => status = String::from("invalid command"),
            "help" => print_help(),
            "q" | "quit" => break,
            "show" => {
                show = true;
                status = String::from("ok");
            }
            "url" => {
                println!("{}", widget.key().full_view_url());
                status = String::from("ok");
            }
            "check" => {
                let result = widget.check_answer().await?;
                println!("{}", result.message);
                for detail in &result.details {
                    println!("  - {}", detail);
                }
                status = format!("{:?}", result.status).to_lowercase();
            }
            "reset" => {
                widget.reset()?;
                show = true;
                status = String::from("ok");
            }
            "full" => {
                let (loaded_tx, loaded_rx) = oneshot::channel::<()>();
                let full = tokio::spawn({
                    let (seed, store, hub, config) =
                        (seed.clone(), store.clone(), hub.clone(), config.clone());
                    async move {
                        let result =
                            Widget::mount_full_view(GridEngine::new(), seed, store, &hub, config)
                                .await;
                        let _ = loaded_tx.send(());
                        result
                    }
                });
                // Stay responsive to the full view's request while it loads.
                widget
                    .serve_until(async {
                        let _ = loaded_rx.await;
                    })
                    .await;
                match full.await? {
                    Ok(full) => {
                        println!("Full view loaded from {:?}", full.source());
                        full.unmount();
                        status = String::from("ok");
                    }
                    Err(e) => status = e.to_string(),
                }
            }
            _ => {
                status = match command.split_once('=') {
                    Some((cell, value)) => match parse_cell_name(cell) {
                        Some((row, col)) => match widget.set_cell(row, col, value.trim()) {
                            Ok(()) => {
                                show = true;
                                String::from("ok")
                            }
                            Err(e) => e.to_string(),
                        },
                        None => String::from("invalid cell"),
                    },
                    None => String::from("invalid command"),
                };
            }
        }
    }

    widget.unmount();
    Ok(())
}
