use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;
use tessera_blobsource::{
    Attrs, BlobIdentifier, BlobSource, FsMaterializer, Materializer, SourceManager,
    ATTR_MEDIA_TYPE, ATTR_SIZE,
};
use tessera_cachedb::{CallCacheStore, CallEntry, GcReport};
use tessera_call::CallId;
use tessera_contenthash::search_content_hash;
use tessera_handle::decode_id;
use tessera_memo::{spawn_gc_loop, CacheConfig, CallCache};
use tessera_types::{format_epoch, unix_now, Digest, OpContext};
use tokio_util::sync::CancellationToken;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref(), cli.db)?;
    tracing::debug!(db = %config.db_path.display(), "using call cache");
    let format = cli.format;
    match cli.command {
        Command::Decode(args) => cmd_decode(args, format),
        Command::Lookup(args) => cmd_lookup(&config, args, format),
        Command::Invalidate(args) => cmd_invalidate(&config, args, format),
        Command::Gc(args) => cmd_gc(&config, args, format),
        Command::Sweep(args) => cmd_sweep(&config, args),
        Command::Search(args) => cmd_search(&config, args, format),
        Command::Blob(args) => cmd_blob(&config, args, format),
        Command::Config => cmd_config(&config),
    }
}

fn load_config(path: Option<&Path>, db: Option<PathBuf>) -> anyhow::Result<CacheConfig> {
    let mut config = match path {
        Some(path) => CacheConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => CacheConfig::default(),
    };
    if let Some(db) = db {
        config.db_path = db;
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn decode_handle(text: &str) -> anyhow::Result<CallId> {
    match decode_id(text).context("invalid handle")? {
        Some(id) => Ok(id),
        None => bail!("empty handle does not name a call"),
    }
}

// --------------------------------------------------------------------------
// decode
// --------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CallReport {
    type_name: String,
    root_type: String,
    path: String,
    steps: usize,
    tainted: bool,
    digest: String,
    canonical_digest: String,
    inputs: Vec<String>,
}

fn describe(id: &CallId) -> anyhow::Result<CallReport> {
    Ok(CallReport {
        type_name: id.type_name().to_string(),
        root_type: id.root_type().to_string(),
        path: id.path(),
        steps: id.len(),
        tainted: id.is_tainted(),
        digest: id.digest()?.to_string(),
        canonical_digest: id.canonical_digest()?.to_string(),
        inputs: id.inputs()?.iter().map(Digest::to_string).collect(),
    })
}

fn cmd_decode(args: DecodeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let Some(id) = decode_id(&args.handle).context("invalid handle")? else {
        match format {
            OutputFormat::Json => println!("null"),
            OutputFormat::Text => println!("{}", "(no ID)".dimmed()),
        }
        return Ok(());
    };
    let report = describe(&id)?;
    if format == OutputFormat::Json {
        return print_json(&report);
    }
    println!("{} {}", report.type_name.yellow().bold(), report.path);
    println!("  Root:      {}", report.root_type);
    println!("  Steps:     {}", report.steps);
    println!(
        "  Tainted:   {}",
        if report.tainted { "yes".red() } else { "no".green() }
    );
    println!("  Digest:    {}", report.digest.cyan());
    println!("  Canonical: {}", report.canonical_digest.cyan());
    for input in &report.inputs {
        println!("  Input:     {}", input.dimmed());
    }
    Ok(())
}

// --------------------------------------------------------------------------
// lookup / invalidate
// --------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct LookupReport {
    call_key: Option<String>,
    entry: Option<CallEntry>,
    expired: bool,
}

fn cmd_lookup(config: &CacheConfig, args: LookupArgs, format: OutputFormat) -> anyhow::Result<()> {
    let id = decode_handle(&args.handle)?;
    let cache = CallCache::open(config)?;
    let cx = OpContext::background();
    let call_key = cache.call_key(&id, &args.session)?;
    let entry = match &call_key {
        Some(key) => cache.store().lookup(&cx, key)?,
        None => None,
    };
    let expired = entry.as_ref().is_some_and(|e| e.is_expired(unix_now()));
    let report = LookupReport {
        call_key,
        entry,
        expired,
    };
    if format == OutputFormat::Json {
        return print_json(&report);
    }
    let Some(call_key) = &report.call_key else {
        println!(
            "{} tainted call is not cached under the {:?} policy",
            "-".dimmed(),
            cache.taint_policy()
        );
        return Ok(());
    };
    println!("Call key: {}", call_key.cyan());
    match &report.entry {
        Some(entry) => {
            let state = if report.expired { "expired".red() } else { "live".green() };
            println!("  Storage key: {}", entry.storage_key.yellow());
            println!("  Expires:     {} ({state})", format_epoch(entry.expiration));
        }
        None => println!("  {}", "not cached".dimmed()),
    }
    Ok(())
}

fn cmd_invalidate(
    config: &CacheConfig,
    args: LookupArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let id = decode_handle(&args.handle)?;
    let cache = CallCache::open(config)?;
    let removed = cache.invalidate(&OpContext::background(), &id, &args.session)?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "removed": removed }))?,
        OutputFormat::Text if removed => println!("{} Removed cache entry.", "✓".green()),
        OutputFormat::Text => println!("No cache entry."),
    }
    Ok(())
}

// --------------------------------------------------------------------------
// gc / sweep
// --------------------------------------------------------------------------

fn cmd_gc(config: &CacheConfig, args: GcArgs, format: OutputFormat) -> anyhow::Result<()> {
    let cache = CallCache::open(config)?;
    let cx = OpContext::background();
    let report: GcReport = match args.now {
        Some(now) => cache.store().gc_expired(&cx, now)?,
        None => cache.gc(&cx)?,
    };
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => println!(
            "{} GC: {} entries removed in {} batches.",
            "✓".green(),
            report.deleted.to_string().bold(),
            report.batches
        ),
    }
    Ok(())
}

fn cmd_sweep(config: &CacheConfig, args: SweepArgs) -> anyhow::Result<()> {
    let every = args
        .interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.gc_interval());
    let cache = CallCache::open(config)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let shutdown = CancellationToken::new();
        let sweeper = spawn_gc_loop(Arc::clone(cache.store()), every, shutdown.clone());
        println!(
            "Sweeping {} every {}s, Ctrl-C to stop.",
            config.db_path.display().to_string().bold(),
            every.as_secs()
        );
        tokio::signal::ctrl_c().await?;
        shutdown.cancel();
        sweeper.await?;
        anyhow::Ok(())
    })?;
    println!("{} Sweeper stopped.", "✓".green());
    Ok(())
}

// --------------------------------------------------------------------------
// search / blob
// --------------------------------------------------------------------------

fn cmd_search(config: &CacheConfig, args: SearchArgs, format: OutputFormat) -> anyhow::Result<()> {
    let digest = Digest::parse(&args.digest).context("invalid digest")?;
    let cache = CallCache::open(config)?;
    let records: Vec<String> = search_content_hash(cache.index(), &OpContext::background(), &digest)?
        .iter()
        .map(|r| r.id().to_string())
        .collect();
    match format {
        OutputFormat::Json => print_json(&records)?,
        OutputFormat::Text if records.is_empty() => {
            println!("No records hold {}.", digest.short().cyan())
        }
        OutputFormat::Text => {
            for record in &records {
                println!("{}", record.yellow());
            }
        }
    }
    Ok(())
}

fn blob_attrs(args: &BlobArgs) -> Attrs {
    let mut attrs = Attrs::new();
    if let Some(media_type) = &args.media_type {
        attrs.insert(ATTR_MEDIA_TYPE.to_string(), media_type.clone());
    }
    if let Some(size) = args.size {
        attrs.insert(ATTR_SIZE.to_string(), size.to_string());
    }
    attrs
}

#[derive(Debug, Serialize)]
struct BlobReport {
    digest: String,
    media_type: Option<String>,
    size: Option<u64>,
    cache_key: String,
    snapshot: Option<PathBuf>,
}

fn cmd_blob(config: &CacheConfig, args: BlobArgs, format: OutputFormat) -> anyhow::Result<()> {
    let cache = CallCache::open(config)?;
    let root = args.root.clone().unwrap_or_else(|| PathBuf::from("."));
    let materializer: Arc<dyn Materializer> = Arc::new(FsMaterializer::new(root));
    let mut sources = SourceManager::new();
    sources.register(Arc::new(BlobSource::new(Arc::clone(cache.index()), materializer)))?;

    let cx = OpContext::background();
    let id = sources.identify(&args.uri, &blob_attrs(&args))?;
    let instance = sources.resolve(id.as_ref())?;
    let Some(blob) = id.as_any().downcast_ref::<BlobIdentifier>() else {
        bail!("{} is not a blob reference", args.uri);
    };
    let snapshot = match &args.root {
        Some(_) => Some(instance.snapshot(&cx)?.location),
        None => None,
    };
    let report = BlobReport {
        digest: blob.digest.to_string(),
        media_type: blob.media_type.clone(),
        size: blob.size,
        cache_key: instance.cache_key(&cx)?.key,
        snapshot,
    };
    if format == OutputFormat::Json {
        return print_json(&report);
    }
    println!("Blob {}", report.digest.cyan());
    if let Some(media_type) = &report.media_type {
        println!("  Media type: {media_type}");
    }
    if let Some(size) = report.size {
        println!("  Size:       {size}");
    }
    println!("  Cache key:  {}", report.cache_key);
    if let Some(location) = &report.snapshot {
        println!("  {} {}", "Resolved:".green(), location.display());
    }
    Ok(())
}

fn cmd_config(config: &CacheConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tessera_call::Selector;
    use tessera_handle::encode_id;
    use tessera_memo::TaintPolicy;

    fn sample() -> CallId {
        let src = CallId::new("Query")
            .select("Directory", Selector::new("host"))
            .append(Selector::new("directory").arg("path", ".").tainted());
        CallId::new("Query")
            .select("Container", Selector::new("container"))
            .append(Selector::new("withDirectory").arg("source", src))
    }

    #[test]
    fn describe_reports_chain() {
        let report = describe(&sample()).unwrap();
        assert_eq!(report.type_name, "Container");
        assert_eq!(report.root_type, "Query");
        assert_eq!(report.steps, 2);
        assert!(report.tainted);
        assert_eq!(report.inputs.len(), 1);
        assert!(report.digest.starts_with("blake3:"));
    }

    #[test]
    fn db_flag_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.toml");
        std::fs::write(&path, "db_path = \"from-file.db\"\ntaint_policy = \"session\"\n").unwrap();
        let config = load_config(Some(&path), Some(PathBuf::from("flag.db"))).unwrap();
        assert_eq!(config.db_path, PathBuf::from("flag.db"));
        assert_eq!(config.taint_policy, TaintPolicy::Session);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/tessera.toml")), None).is_err());
    }

    #[test]
    fn empty_handle_is_refused_where_a_call_is_needed() {
        assert!(decode_handle("").is_err());
        assert!(decode_handle(&encode_id(&sample()).unwrap()).is_ok());
    }

    #[test]
    fn blob_attrs_from_flags() {
        let cli = Cli::try_parse_from([
            "tessera",
            "blob",
            "blob://x",
            "--media-type",
            "application/octet-stream",
            "--size",
            "3",
        ])
        .unwrap();
        let Command::Blob(args) = cli.command else {
            panic!("wrong command");
        };
        let attrs = blob_attrs(&args);
        assert_eq!(attrs[ATTR_MEDIA_TYPE], "application/octet-stream");
        assert_eq!(attrs[ATTR_SIZE], "3");
    }

    #[test]
    fn gc_and_lookup_against_a_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("cache.db");
        let db_arg = db.to_string_lossy().to_string();
        let handle = encode_id(&sample()).unwrap();
        for argv in [
            vec!["tessera", "gc", "--db", &db_arg],
            vec!["tessera", "gc", "--now", "0", "--db", &db_arg, "--format", "json"],
            vec!["tessera", "lookup", &handle, "--db", &db_arg],
            vec!["tessera", "invalidate", &handle, "--db", &db_arg],
        ] {
            run_command(Cli::try_parse_from(argv).unwrap()).unwrap();
        }
        assert!(db.exists());
    }
}
