use std::{path::PathBuf, sync::Arc, thread, time::Duration};

use log::{info, warn};
use tokio::sync::broadcast;

use title_critic::{
    app_bootstrap::{
        catalog::seed_store_from_catalog,
        services::{open_store, spawn_background_services, BackgroundServicesConfig},
    },
    backends::{metadata_service::HttpMetadataSource, MetadataSource},
    config::{sanitize_config, Config},
    config_persistence::{default_config_path, load_or_create_config},
    lookup_waiter::{LookupOutcome, LookupWaiter},
    title_record::TitleId,
};

const USAGE: &str = "usage: title-critic [--config <path>] <title-id>...";

#[derive(Debug, PartialEq, Eq)]
struct CliArgs {
    config_path: Option<PathBuf>,
    title_ids: Vec<TitleId>,
}

fn parse_args<I>(args: I) -> Result<CliArgs, String>
where
    I: IntoIterator<Item = String>,
{
    let mut config_path = None;
    let mut title_ids = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| "--config requires a path".to_string())?;
                config_path = Some(PathBuf::from(path));
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ if arg.starts_with("--config=") => {
                config_path = Some(PathBuf::from(&arg["--config=".len()..]));
            }
            _ => title_ids.push(arg.parse::<TitleId>()?),
        }
    }
    if title_ids.is_empty() {
        return Err(USAGE.to_string());
    }
    Ok(CliArgs {
        config_path,
        title_ids,
    })
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config, String> {
    match config_path.or_else(default_config_path) {
        Some(path) => load_or_create_config(&path),
        None => {
            warn!("No config directory available; using defaults");
            Ok(sanitize_config(Config::default()))
        }
    }
}

fn format_outcome(title_id: TitleId, outcome: &LookupOutcome) -> String {
    match outcome {
        LookupOutcome::Found(record) => format!(
            "{}\t{}\t{}",
            title_id,
            record.title.as_deref().unwrap_or(""),
            record.rating_label()
        ),
        LookupOutcome::NotFound | LookupOutcome::Cancelled => format!("{}\tnot found", title_id),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Info);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let cli_args = match parse_args(std::env::args().skip(1)) {
        Ok(cli_args) => cli_args,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(2);
        }
    };

    let config = load_config(cli_args.config_path)?;
    let store = open_store(&config.store)?;
    let source: Arc<dyn MetadataSource> = Arc::new(HttpMetadataSource::new(&config.source));

    if config.bootstrap.seed_on_start {
        seed_store_from_catalog(source.as_ref(), store.as_ref(), None);
    }

    let (bus_sender, _) = broadcast::channel(config.batching.bus_capacity);
    let services = spawn_background_services(BackgroundServicesConfig {
        bus_sender: bus_sender.clone(),
        store: Arc::clone(&store),
        source,
        debounce: Duration::from_millis(config.batching.debounce_ms),
    })?;

    let waiter = LookupWaiter::from_config(store, bus_sender, &config.lookup);
    let mut lookups = Vec::with_capacity(cli_args.title_ids.len());
    for title_id in cli_args.title_ids {
        let waiter = waiter.clone();
        let handle = thread::Builder::new()
            .name(format!("lookup-{title_id}"))
            .spawn(move || waiter.await_title(title_id))?;
        lookups.push((title_id, handle));
    }

    for (title_id, handle) in lookups {
        let outcome = handle.join().unwrap_or_else(|_| {
            warn!("Lookup thread for title {} panicked", title_id);
            LookupOutcome::NotFound
        });
        println!("{}", format_outcome(title_id, &outcome));
    }

    let unfinished = services.dispatcher.active_jobs();
    if !unfinished.is_empty() {
        info!("Exiting with {} job(s) still streaming", unfinished.len());
    }
    Ok(())
}
