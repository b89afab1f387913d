use anyhow::{Context as _, Result};
use clap::Args;
use observance_sdk::api::{self, RescanRequest};
use observance_sdk::catalog::{AttendeeContext, Catalog};
use observance_sdk::config::EngineConfig;
use observance_sdk::eval::Outcome;
use observance_sdk::expand::ObservanceInstance;
use observance_sdk::policy::ObservanceCategory;
use observance_sdk::provider::{DeadlineProvider, StaticPrayerTable, TabularIslamicCalendar};
use observance_sdk::rule::{Recurrence, RecurrenceRule};
use observance_sdk::scan::CancellationFlag;
use observance_sdk::store::{parse_rule, CatalogStore, FileCatalogStore};
use observance_sdk::window::{merge, TimeWindow};
use observance_sdk::Engine;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Args)]
pub(crate) struct WindowArgs {
    /// Window start (RFC 3339, e.g. 2024-06-03T12:00:00+04:00)
    #[arg(long)]
    start: String,

    /// Window end (RFC 3339)
    #[arg(long)]
    end: String,

    /// IANA zone the window is expressed in
    #[arg(long, default_value = "Asia/Dubai")]
    zone: String,

    /// Attendee nationality tag (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Only consider this category (repeatable, e.g. prayer_window); all when omitted
    #[arg(long = "category")]
    categories: Vec<String>,
}

impl WindowArgs {
    fn window(&self) -> Result<TimeWindow> {
        TimeWindow::parse(&self.start, &self.end, &self.zone).context("Invalid window")
    }

    fn attendees(&self) -> AttendeeContext {
        AttendeeContext::with_tags(self.tags.iter().cloned())
    }

    fn categories(&self) -> Result<BTreeSet<ObservanceCategory>> {
        if self.categories.is_empty() {
            return Ok(ObservanceCategory::ALL.into_iter().collect());
        }
        self.categories
            .iter()
            .map(|c| c.parse::<ObservanceCategory>().context("Invalid --category"))
            .collect()
    }
}

pub(crate) struct Context {
    store: FileCatalogStore,
    config: EngineConfig,
    prayer_table: Option<PathBuf>,
}

impl Context {
    pub(crate) fn new(catalog: PathBuf, config: Option<PathBuf>, prayer_table: Option<PathBuf>) -> Result<Self> {
        let config = match config {
            Some(path) => EngineConfig::load(&path)
                .with_context(|| format!("Failed to load config {:?}", path))?,
            None => EngineConfig::default(),
        };
        Ok(Self {
            store: FileCatalogStore::new(catalog),
            config,
            prayer_table,
        })
    }

    fn open_catalog(&self) -> Result<Catalog> {
        match self.store.open_catalog() {
            Ok(c) => Ok(c),
            Err(observance_sdk::Error::Io(ref io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                anyhow::bail!(
                    "Catalog file not found at {:?}.\nAdd a rule with 'observance catalog add --file <rule>' first.",
                    self.store.path()
                );
            }
            Err(e) => Err(e).with_context(|| format!("Catalog at {:?} is invalid", self.store.path())),
        }
    }

    fn existing_rules(&self) -> Result<Vec<RecurrenceRule>> {
        if !self.store.exists() {
            return Ok(Vec::new());
        }
        self.store
            .load()
            .with_context(|| format!("Failed to read catalog {:?}", self.store.path()))
    }

    fn engine(&self) -> Result<Engine> {
        let table = match &self.prayer_table {
            Some(path) => StaticPrayerTable::load(path)
                .with_context(|| format!("Failed to load prayer table {:?}", path))?,
            None => StaticPrayerTable::uae_default(),
        };
        let prayer = DeadlineProvider::new(table, self.config.providers.timeout());
        Ok(Engine::new(
            Arc::new(self.open_catalog()?),
            Arc::new(prayer),
            Arc::new(TabularIslamicCalendar),
            &self.config,
        ))
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn check(ctx: &Context, args: WindowArgs) -> Result<()> {
    let window = args.window()?;
    let engine = ctx.engine()?;
    let decision = engine.check_in(&window, &args.attendees(), &args.categories()?)?;

    let verdict = match &decision.outcome {
        Outcome::Allowed => "allowed".to_string(),
        Outcome::AllowedWithWarning => "allowed with warning".to_string(),
        Outcome::AdjustedWindow { window } => format!("adjusted to {}", window),
        Outcome::Blocked => "blocked".to_string(),
    };
    info!(window = %window, verdict = %verdict, "checked window");
    print_json(&decision)
}

pub async fn rescan(ctx: &Context, bookings_path: PathBuf) -> Result<()> {
    let content = fs::read_to_string(&bookings_path).context("Failed to read bookings file")?;
    let request: RescanRequest = serde_json::from_str(&content).context("Failed to parse bookings JSON")?;
    let engine = Arc::new(ctx.engine()?);
    let cancel = CancellationFlag::new();

    let mut task = {
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || api::rescan(&engine, request, &cancel))
    };

    let joined = tokio::select! {
        res = &mut task => res,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received, finishing in-flight bookings");
            cancel.cancel();
            (&mut task).await
        }
    };
    let response = joined.context("Rescan worker panicked")??;
    print_json(&response)
}

fn instances_in(ctx: &Context, args: &WindowArgs) -> Result<(TimeWindow, Vec<ObservanceInstance>)> {
    let window = args.window()?;
    let engine = ctx.engine()?;
    let snapshot = engine.catalog().snapshot()?;
    let expander = engine.evaluator().expander();
    let expansion = snapshot.instances_in(&args.categories()?, &args.attendees(), &window, &expander)?;
    for w in &expansion.warnings {
        warn!(kind = ?w.kind, rule = ?w.rule_id, "{}", w.message);
    }
    let mut instances = expansion.instances;
    instances.sort_by(|a, b| {
        a.window
            .start()
            .cmp(&b.window.start())
            .then_with(|| a.source_rule_id.cmp(&b.source_rule_id))
    });
    Ok((window, instances))
}

pub async fn expand(ctx: &Context, args: WindowArgs) -> Result<()> {
    let (_, instances) = instances_in(ctx, &args)?;
    print_json(&instances)
}

pub async fn busy(ctx: &Context, args: WindowArgs) -> Result<()> {
    let (window, instances) = instances_in(ctx, &args)?;
    let windows: Vec<TimeWindow> = instances
        .iter()
        .map(|i| i.window.with_zone(window.zone()))
        .collect();
    let periods = merge(&windows);

    if periods.is_empty() {
        println!("No observances between {}.", window);
    } else {
        for p in periods {
            println!("{}", p);
        }
    }
    Ok(())
}

pub async fn catalog_add(ctx: &Context, id: Option<String>, file: PathBuf) -> Result<()> {
    let content = fs::read_to_string(&file).context("Failed to read rule file")?;
    let mut rule = parse_rule(&content).context("Failed to parse rule as JSON or TOML")?;
    if let Some(new_id) = id {
        rule.id = new_id;
    }

    let catalog = Catalog::with_rules(ctx.existing_rules()?)?;
    let snapshot = catalog.upsert(rule.clone())?;
    ctx.store.save(&snapshot.rules().cloned().collect::<Vec<_>>())?;
    println!("Rule '{}' added/updated.", rule.id);
    Ok(())
}

pub async fn catalog_get(ctx: &Context, id: String) -> Result<()> {
    let catalog = ctx.open_catalog()?;
    let snapshot = catalog.snapshot()?;
    match snapshot.rule(&id) {
        Some(rule) => print_json(rule),
        None => anyhow::bail!("Rule '{}' not found", id),
    }
}

fn recurrence_kind(rule: &RecurrenceRule) -> &'static str {
    match rule.recurrence {
        Recurrence::Daily { .. } => "daily",
        Recurrence::YearlyFixed { .. } => "yearly",
        Recurrence::YearlyLunar { .. } => "yearly-lunar",
        Recurrence::RangeOverride { .. } => "range",
    }
}

pub async fn catalog_list(ctx: &Context) -> Result<()> {
    let rules = ctx.existing_rules()?;
    if rules.is_empty() {
        println!("No rules found.");
        println!("\nHint: Add a rule using:");
        println!("  observance catalog add --file <rule.toml>");
        return Ok(());
    }

    println!("{:<24} {:<20} {:<14} {:<10} {:<10}", "ID", "Category", "Recurrence", "Severity", "Tag");
    println!("{:-<24} {:-<20} {:-<14} {:-<10} {:-<10}", "", "", "", "", "");
    for rule in &rules {
        println!(
            "{:<24} {:<20} {:<14} {:<10} {:<10}",
            rule.id,
            rule.category.to_string(),
            recurrence_kind(rule),
            format!("{:?}", rule.effective_policy().severity),
            rule.nationality.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub async fn catalog_remove(ctx: &Context, id: String) -> Result<()> {
    let catalog = ctx.open_catalog()?;
    let snapshot = catalog.remove(&id)?;
    ctx.store.save(&snapshot.rules().cloned().collect::<Vec<_>>())?;
    println!("Rule '{}' removed.", id);
    Ok(())
}
