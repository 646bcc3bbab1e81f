use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vault_core::db::FileIndex;
use vault_core::ingest::collect_files;
use vault_core::metadata::ConsolidatedMetadata;
use vault_core::quarantine::QuarantineReason;
use vault_core::{
    BatchMoveItem, CancelToken, Error, FileIngestor, FileMover, MetadataConsolidator, Result,
    VaultConfig,
};

fn main() {
    init_logging();
    if let Err(err) = real_main() {
        eprintln!("error: {err}");
        std::process::exit(2);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn real_main() -> Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = take_value(&mut args, "--config")?.map(PathBuf::from);
    let vault_override = take_value(&mut args, "--vault")?.map(PathBuf::from);

    if args.is_empty() {
        print_help();
        return Ok(());
    }
    let cmd = args.remove(0);
    if matches!(cmd.as_str(), "--help" | "-h" | "help") {
        print_help();
        return Ok(());
    }

    let mut config = load_config(config_path.as_deref())?;
    if let Some(root) = vault_override {
        config.vault_root = root;
    }

    match cmd.as_str() {
        "ingest" => cmd_ingest(&config, args),
        "duplicates" => cmd_duplicates(&config),
        "consolidate" => cmd_consolidate(&config, args),
        "move" => cmd_move(&config, args),
        "preview" => cmd_preview(&config, args),
        "import" => cmd_import(&config, args),
        "quarantine" => cmd_quarantine(&config, args),
        _ => Err(Error::InvalidInput(format!("unknown command: {cmd}"))),
    }
}

fn load_config(explicit: Option<&Path>) -> Result<VaultConfig> {
    if let Some(path) = explicit {
        return VaultConfig::load(path);
    }
    if let Some(dir) = dirs::config_dir() {
        let path = dir.join("vault").join("config.json");
        if path.is_file() {
            info!(path = %path.display(), "using config file");
            return VaultConfig::load(&path);
        }
    }
    Ok(VaultConfig::default())
}

fn open_index(config: &VaultConfig) -> Result<Arc<FileIndex>> {
    Ok(Arc::new(FileIndex::open(&config.index_path())?))
}

fn open_mover(config: &VaultConfig) -> Result<FileMover> {
    let index = open_index(config)?;
    Ok(
        FileMover::for_vault(index, config.quarantine_root(), config.duplicates_root())
            .with_space_safety_margin(config.space_safety_margin),
    )
}

fn consolidator(config: &VaultConfig) -> MetadataConsolidator {
    MetadataConsolidator::new(config.priority.clone(), &config.manufacturer_aliases)
}

fn cancel_on_interrupt() -> CancelToken {
    let token = CancelToken::new();
    let handle = token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("interrupt received, finishing the current file");
        handle.cancel();
    }) {
        warn!(error = %e, "could not install Ctrl+C handler");
    }
    token
}

fn cmd_ingest(config: &VaultConfig, mut args: Vec<String>) -> Result<()> {
    let recursive = !take_flag(&mut args, "--no-recursive") && config.recursive;
    if args.is_empty() {
        return Err(Error::InvalidInput("missing <path>".to_string()));
    }
    let ingestor = FileIngestor::new(open_index(config)?);
    let cancel = cancel_on_interrupt();

    for arg in args {
        let path = PathBuf::from(arg);
        if path.is_dir() {
            ingestor.ingest_directory_with_progress(&path, recursive, Some(&cancel), |_| {})?;
        } else {
            let record = ingestor.ingest_file(&path)?;
            println!("{}  {}  {}", record.status, record.checksum, record.file_path.display());
        }
        if cancel.is_cancelled() {
            break;
        }
    }

    let stats = ingestor.stats();
    println!(
        "files_seen: {}, ingested: {}, duplicates: {}, skipped: {}, errors: {}",
        stats.files_seen,
        stats.files_ingested,
        stats.duplicates_found,
        stats.files_skipped,
        stats.errors
    );
    Ok(())
}

#[derive(Serialize)]
struct GroupOut<'a> {
    checksum: &'a str,
    paths: &'a [PathBuf],
}

fn cmd_duplicates(config: &VaultConfig) -> Result<()> {
    let ingestor = FileIngestor::new(open_index(config)?);
    let groups = ingestor.duplicate_groups()?;
    let out: Vec<GroupOut<'_>> = groups
        .iter()
        .map(|g| GroupOut {
            checksum: &g.checksum,
            paths: &g.paths,
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn cmd_consolidate(config: &VaultConfig, args: Vec<String>) -> Result<()> {
    let [path] = positional::<1>(args, "<file>")?;
    let metadata = consolidator(config).consolidate(Path::new(&path))?;
    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

fn cmd_move(config: &VaultConfig, args: Vec<String>) -> Result<()> {
    let [src, dst] = positional::<2>(args, "<source> <destination>")?;
    let (src, dst) = (PathBuf::from(src), PathBuf::from(dst));
    let metadata = match consolidator(config).consolidate(&src) {
        Ok(m) => Some(m),
        Err(e) => {
            warn!(path = %src.display(), error = %e, "moving without metadata");
            None
        }
    };
    let result = open_mover(config)?.move_file(&src, &dst, metadata.as_ref())?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn cmd_preview(config: &VaultConfig, args: Vec<String>) -> Result<()> {
    let [src, dst] = positional::<2>(args, "<source> <destination>")?;
    let preview = open_mover(config)?.preview_move(Path::new(&src), Path::new(&dst))?;
    println!("{}", serde_json::to_string_pretty(&preview)?);
    Ok(())
}

fn cmd_import(config: &VaultConfig, mut args: Vec<String>) -> Result<()> {
    let mut batch = config.batch.clone();
    if let Some(n) = take_value(&mut args, "--parallel")? {
        batch.parallel = true;
        batch.max_workers = n
            .parse()
            .map_err(|_| Error::InvalidInput(format!("--parallel expects a number, got {n}")))?;
    }
    if take_flag(&mut args, "--stop-on-error") {
        batch.stop_on_first_error = true;
    }
    let recursive = !take_flag(&mut args, "--no-recursive") && config.recursive;
    let [root] = positional::<1>(args, "<directory>")?;

    let files = collect_files(Path::new(&root), recursive)?;
    let consolidator = consolidator(config);
    let mut items = Vec::with_capacity(files.len());
    for file in files {
        let metadata = match consolidator.consolidate(&file) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(path = %file.display(), error = %e, "metadata unavailable");
                None
            }
        };
        let folder = metadata
            .as_ref()
            .and_then(date_folder)
            .unwrap_or_else(|| PathBuf::from("undated"));
        let destination = config
            .vault_root
            .join(folder)
            .join(file.file_name().unwrap_or_default());
        let item = BatchMoveItem::new(&file, destination);
        items.push(match metadata {
            Some(m) => item.with_metadata(m),
            None => item,
        });
    }

    let cancel = cancel_on_interrupt();
    let mover = open_mover(config)?;
    let summary = mover.move_batch(batch.request(items), Some(&cancel))?;
    for result in summary.results.iter().filter(|r| !r.success) {
        let src = result
            .operation
            .as_ref()
            .map(|op| op.source_path.display().to_string())
            .unwrap_or_default();
        println!("failed: {src}: {}", result.error.as_deref().unwrap_or(""));
    }
    println!(
        "moved: {}, duplicates: {}, quarantined: {}, failed: {}, not attempted: {}{}",
        summary.successful,
        summary.duplicates,
        summary.quarantined,
        summary.failed,
        summary.not_attempted,
        if summary.interrupted { " (interrupted)" } else { "" }
    );
    Ok(())
}

// Wall-clock date as recorded, never shifted to UTC.
fn date_folder(metadata: &ConsolidatedMetadata) -> Option<PathBuf> {
    let local = metadata.primary_date()?.local();
    Some(
        PathBuf::from(local.format("%Y").to_string()).join(local.format("%m").to_string()),
    )
}

fn cmd_quarantine(config: &VaultConfig, mut args: Vec<String>) -> Result<()> {
    if args.is_empty() {
        return Err(Error::InvalidInput(
            "missing quarantine subcommand (list|stats|retry)".to_string(),
        ));
    }
    let sub = args.remove(0);
    let mover = open_mover(config)?;
    let quarantine = mover.quarantine();

    match sub.as_str() {
        "list" => {
            let reason = take_value(&mut args, "--reason")?
                .map(|r| r.parse::<QuarantineReason>())
                .transpose()?;
            for record in quarantine.list_quarantined_files(reason)? {
                println!(
                    "{}  {:<20} {:<8} retry={} {}",
                    record.quarantine_id,
                    record.error_type,
                    record.severity,
                    record.can_retry,
                    record.original_path.display()
                );
            }
            Ok(())
        }
        "stats" => {
            println!("{}", serde_json::to_string_pretty(&quarantine.statistics()?)?);
            Ok(())
        }
        "retry" => {
            let all = take_flag(&mut args, "--all");
            let wanted = args.first().cloned();
            if !all && wanted.is_none() {
                return Err(Error::InvalidInput(
                    "retry needs <quarantine_id> or --all".to_string(),
                ));
            }
            let mut recovered = 0usize;
            let mut attempted = 0usize;
            for record in quarantine.list_quarantined_files(None)? {
                let selected = (all && record.can_retry)
                    || wanted.as_deref() == Some(record.quarantine_id.to_string().as_str());
                if !selected {
                    continue;
                }
                attempted += 1;
                let result = mover.retry_quarantined(&record)?;
                if result.success {
                    recovered += 1;
                }
            }
            println!("retried: {attempted}, recovered: {recovered}");
            Ok(())
        }
        _ => Err(Error::InvalidInput(format!("unknown quarantine subcommand: {sub}"))),
    }
}

fn take_flag(args: &mut Vec<String>, name: &str) -> bool {
    match args.iter().position(|a| a == name) {
        Some(idx) => {
            args.remove(idx);
            true
        }
        None => false,
    }
}

fn take_value(args: &mut Vec<String>, name: &str) -> Result<Option<String>> {
    let Some(idx) = args.iter().position(|a| a == name) else {
        return Ok(None);
    };
    args.remove(idx);
    if idx >= args.len() {
        return Err(Error::InvalidInput(format!("missing value for {name}")));
    }
    Ok(Some(args.remove(idx)))
}

fn positional<const N: usize>(args: Vec<String>, usage: &str) -> Result<[String; N]> {
    if let Some(unknown) = args.iter().find(|a| a.starts_with("--")) {
        return Err(Error::InvalidInput(format!("unknown arg: {unknown}")));
    }
    args.try_into()
        .map_err(|_| Error::InvalidInput(format!("expected {usage}")))
}

fn print_help() {
    println!(
        r#"vault

USAGE:
  vault [--config <file>] [--vault <dir>] <command> ...

COMMANDS:
  ingest <path>... [--no-recursive]       index files and detect duplicate content
  duplicates                              list groups of identical files
  consolidate <file>                      print the merged metadata as JSON
  preview <source> <destination>          report what a move would do
  move <source> <destination>             verified move into the vault
  import <dir> [--parallel <n>] [--stop-on-error] [--no-recursive]
                                          move a directory into <vault>/<YYYY>/<MM>/
  quarantine list [--reason <reason>]
  quarantine stats
  quarantine retry (<quarantine_id> | --all)

NOTES:
  - Config is read from --config, else <config dir>/vault/config.json.
  - Set RUST_LOG (e.g. RUST_LOG=vault_core=debug) for more detail on stderr.
"#
    );
}
