use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use linkpipe_core::{AcceptedSuggestion, CandidateSuggestion, Inventory, InventoryEntry, JsonCache};
use linkpipe_local::links::{extract_existing_links, LinkScope};
use linkpipe_local::openai_compat::ChatOptions;
use linkpipe_local::reduce::reduce;
use linkpipe_local::suggest::{fan_out_suggestions, parse_model_output, CachedModel, OpenAiCompatModel};
use linkpipe_local::{FsCache, Pipeline, PipelineConfig, PipelineOutcome};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "linkpipe")]
#[command(about = "Validate, deduplicate and place model-suggested internal links", long_about = None)]
struct Cli {
    /// Debug logging on stderr (overrides RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the reduced prompt content of a document.
    Reduce(ReduceCmd),
    /// List existing same-site links (json).
    Links(LinksCmd),
    /// Validate candidates against a document and insert the survivors (json report).
    Apply(ApplyCmd),
    /// Ask the configured model for candidates (json).
    Suggest(SuggestCmd),
    /// `suggest` followed by `apply`.
    Run(RunCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct ReduceCmd {
    #[arg(long)]
    html: PathBuf,
    #[arg(long)]
    max_chars: Option<usize>,
    /// Emit the reduced blocks as json instead of plain text.
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct LinksCmd {
    #[arg(long)]
    html: PathBuf,
    #[arg(long)]
    site_host: Option<String>,
    /// File of known site URLs or paths (one per line; blank lines and #comments ignored).
    #[arg(long)]
    known_paths: Option<PathBuf>,
    #[arg(long)]
    max_links: Option<usize>,
}

/// Pipeline knobs; `--config` is loaded first, then individual flags override it.
#[derive(clap::Args, Debug)]
struct ConfigArgs {
    /// PipelineConfig json file.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    site_host: Option<String>,
    /// URL of the document itself (links to it are rejected).
    #[arg(long)]
    page_url: Option<String>,
    /// Minimum character gap between accepted suggestions.
    #[arg(long)]
    min_distance: Option<usize>,
    #[arg(long)]
    max_chars: Option<usize>,
    /// Reject targets that are not in the inventory.
    #[arg(long)]
    require_inventory_target: bool,
}

#[derive(clap::Args, Debug)]
struct ModelArgs {
    /// Model name (default: LINKPIPE_OPENAI_COMPAT_MODEL).
    #[arg(long)]
    model: Option<String>,
    /// Inventory entries per model call; batches run concurrently.
    #[arg(long, default_value_t = 25)]
    batch_size: usize,
    #[arg(long, default_value_t = 20)]
    max_suggestions: usize,
    #[arg(long, default_value_t = 60_000)]
    timeout_ms: u64,
    #[arg(long, env = "LINKPIPE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,
    #[arg(long, default_value_t = 86_400)]
    cache_ttl_s: u64,
    #[arg(long)]
    no_cache: bool,
}

#[derive(clap::Args, Debug)]
struct ApplyCmd {
    #[arg(long)]
    html: PathBuf,
    /// Candidates json (array, `{"suggestions": [...]}`, or raw model output).
    #[arg(long)]
    candidates: PathBuf,
    /// Accepted suggestions from an earlier run (array or an earlier apply report).
    #[arg(long)]
    prior: Option<PathBuf>,
    #[arg(long)]
    inventory: Option<PathBuf>,
    #[command(flatten)]
    cfg: ConfigArgs,
    /// Write the updated document here instead of embedding it in the report.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct SuggestCmd {
    #[arg(long)]
    html: PathBuf,
    #[arg(long)]
    inventory: PathBuf,
    #[arg(long)]
    max_chars: Option<usize>,
    #[command(flatten)]
    model: ModelArgs,
}

#[derive(clap::Args, Debug)]
struct RunCmd {
    #[arg(long)]
    html: PathBuf,
    #[arg(long)]
    inventory: PathBuf,
    #[arg(long)]
    prior: Option<PathBuf>,
    #[command(flatten)]
    cfg: ConfigArgs,
    #[command(flatten)]
    model: ModelArgs,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = read_text(path)?;
    serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    Ok(read_text(path)?
        .lines()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Either a full `Inventory` object or a bare array of entries.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum InventoryFile {
    Entries(Vec<InventoryEntry>),
    Full(Inventory),
}

fn load_inventory(path: &Path) -> Result<Inventory> {
    Ok(match read_json::<InventoryFile>(path)? {
        InventoryFile::Full(inv) => inv,
        InventoryFile::Entries(entries) => Inventory {
            entries,
            ..Inventory::default()
        },
    })
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum PriorFile {
    Report { accepted: Vec<AcceptedSuggestion> },
    List(Vec<AcceptedSuggestion>),
}

fn load_prior(path: Option<&Path>) -> Result<Vec<AcceptedSuggestion>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    Ok(match read_json::<PriorFile>(path)? {
        PriorFile::Report { accepted } => accepted,
        PriorFile::List(v) => v,
    })
}

fn load_candidates(path: &Path) -> Result<Vec<CandidateSuggestion>> {
    let text = read_text(path)?;
    parse_model_output(&text).with_context(|| format!("parse candidates {}", path.display()))
}

fn load_config(args: &ConfigArgs) -> Result<PipelineConfig> {
    let mut cfg: PipelineConfig = match &args.config {
        Some(p) => read_json(p)?,
        None => PipelineConfig::default(),
    };
    if let Some(h) = &args.site_host {
        cfg.site_host = Some(h.clone());
    }
    if let Some(u) = &args.page_url {
        cfg.page_url = Some(u.clone());
    }
    if let Some(d) = args.min_distance {
        cfg.resolve.min_distance = d;
    }
    if let Some(n) = args.max_chars {
        cfg.reduce.max_chars = n;
    }
    if args.require_inventory_target {
        cfg.require_inventory_target = true;
    }
    Ok(cfg)
}

async fn suggest_candidates(
    html: &str,
    inventory: &Inventory,
    cfg: &PipelineConfig,
    args: &ModelArgs,
) -> Result<Vec<CandidateSuggestion>> {
    let reduced = reduce(html, &cfg.reduce);
    let opts = ChatOptions {
        timeout: Duration::from_millis(args.timeout_ms),
        ..ChatOptions::default()
    };
    let model = OpenAiCompatModel::from_env(args.model.clone(), opts)?;
    let out = if args.no_cache {
        fan_out_suggestions(
            &model,
            &reduced.text,
            &inventory.entries,
            args.batch_size,
            args.max_suggestions,
        )
        .await?
    } else {
        let dir = args.cache_dir.clone().unwrap_or_else(FsCache::default_dir);
        let cache: Arc<dyn JsonCache> = Arc::new(FsCache::new(dir));
        let cached = CachedModel::new(model, cache, Some(Duration::from_secs(args.cache_ttl_s)));
        fan_out_suggestions(
            &cached,
            &reduced.text,
            &inventory.entries,
            args.batch_size,
            args.max_suggestions,
        )
        .await?
    };
    Ok(out)
}

fn report(outcome: &PipelineOutcome, out: Option<&Path>) -> Result<serde_json::Value> {
    let mut v = serde_json::json!({
        "schema_version": 1,
        "kind": "apply",
        "ok": true,
        "summary": outcome.summary(),
        "total_candidates": outcome.total_candidates,
        "target_count": outcome.target_count,
        "reduced_chars": outcome.reduced_chars,
        "accepted": outcome.accepted,
        "rejected": outcome.rejected,
        "issues": outcome.issues,
    });
    match out {
        Some(p) => {
            std::fs::write(p, &outcome.html).with_context(|| format!("write {}", p.display()))?;
            v["out"] = serde_json::json!(p.display().to_string());
        }
        None => v["html"] = serde_json::json!(outcome.html),
    }
    Ok(v)
}

fn init_logging(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    // stdout carries json; logs go to stderr.
    builder.target(env_logger::Target::Stderr).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Reduce(args) => {
            let html = read_text(&args.html)?;
            let mut cfg = linkpipe_local::reduce::ReduceConfig::default();
            if let Some(n) = args.max_chars {
                cfg.max_chars = n;
            }
            let reduced = reduce(&html, &cfg);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&reduced)?);
            } else {
                println!("{}", reduced.text);
            }
        }
        Commands::Links(args) => {
            let html = read_text(&args.html)?;
            let mut scope = LinkScope::new(args.site_host.as_deref());
            if let Some(p) = &args.known_paths {
                let urls = read_lines(p)?;
                scope = scope.with_known_urls(urls.iter().map(String::as_str));
            }
            if let Some(n) = args.max_links {
                scope.max_links = n;
            }
            let links = extract_existing_links(&html, &scope);
            println!("{}", serde_json::to_string_pretty(&links)?);
        }
        Commands::Apply(args) => {
            let html = read_text(&args.html)?;
            let candidates = load_candidates(&args.candidates)?;
            let prior = load_prior(args.prior.as_deref())?;
            let inventory = match &args.inventory {
                Some(p) => load_inventory(p)?,
                None => Inventory::default(),
            };
            let cfg = load_config(&args.cfg)?;
            let outcome = Pipeline::new(cfg)
                .run(&html, &candidates, &prior, &inventory)
                .with_context(|| format!("apply {}", args.html.display()))?;
            eprintln!("{}", outcome.summary());
            println!("{}", report(&outcome, args.out.as_deref())?);
        }
        Commands::Suggest(args) => {
            let html = read_text(&args.html)?;
            if html.trim().is_empty() {
                bail!("{} is empty", args.html.display());
            }
            let inventory = load_inventory(&args.inventory)?;
            let mut cfg = PipelineConfig::default();
            if let Some(n) = args.max_chars {
                cfg.reduce.max_chars = n;
            }
            let candidates = suggest_candidates(&html, &inventory, &cfg, &args.model).await?;
            println!("{}", serde_json::to_string_pretty(&candidates)?);
        }
        Commands::Run(args) => {
            let html = read_text(&args.html)?;
            let inventory = load_inventory(&args.inventory)?;
            let prior = load_prior(args.prior.as_deref())?;
            let cfg = load_config(&args.cfg)?;
            if html.trim().is_empty() {
                bail!("{} is empty", args.html.display());
            }
            let candidates = suggest_candidates(&html, &inventory, &cfg, &args.model).await?;
            let outcome = Pipeline::new(cfg)
                .run(&html, &candidates, &prior, &inventory)
                .with_context(|| format!("apply {}", args.html.display()))?;
            eprintln!("{}", outcome.summary());
            println!("{}", report(&outcome, args.out.as_deref())?);
        }
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "linkpipe",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("linkpipe {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{v}"),
            }
        }
    }
    Ok(())
}
