use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use dose_core::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "dosewatch")]
#[command(about = "Medicine dose availability tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current per-drug availability (default)
    Status,

    /// Log a dose taken now (or at a given time)
    Log {
        /// Drug name, matched against the catalog
        drug: String,

        /// Quantity taken; must be positive
        #[arg(long, default_value_t = 1.0)]
        quantity: f64,

        /// Time taken as RFC 3339 (defaults to now)
        #[arg(long)]
        at: Option<String>,
    },

    /// Follow availability live as entries, drugs, and time change
    Watch {
        /// Exit after this many snapshots (runs until Ctrl-C if omitted)
        #[arg(long)]
        updates: Option<usize>,
    },

    /// Manage the drug catalog
    Drugs {
        #[command(subcommand)]
        command: DrugCommands,
    },

    /// Export the entry log to CSV
    Export {
        /// Output path
        csv_path: PathBuf,
    },
}

#[derive(Subcommand)]
enum DrugCommands {
    /// List catalog drugs and their re-dose intervals
    List,

    /// Add a drug to the catalog
    Add {
        name: String,

        /// Minimum hours between doses
        #[arg(long)]
        interval_hours: f64,

        /// Comma-separated ingredient names
        #[arg(long, value_delimiter = ',')]
        ingredients: Vec<String>,
    },

    /// Remove a drug from the catalog by name
    Remove { name: String },
}

fn main() -> Result<()> {
    // Initialize logging
    dose_core::logging::init();

    let cli = Cli::parse();

    // Determine data directory
    let config = Config::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());

    match cli.command {
        Some(Commands::Status) | None => cmd_status(data_dir, &config),
        Some(Commands::Log { drug, quantity, at }) => {
            cmd_log(data_dir, &config, drug, quantity, at)
        }
        Some(Commands::Watch { updates }) => cmd_watch(data_dir, &config, updates),
        Some(Commands::Drugs { command }) => cmd_drugs(data_dir, command),
        Some(Commands::Export { csv_path }) => cmd_export(data_dir, csv_path),
    }
}

/// Open the store and make sure a fresh data dir has a usable catalog
fn open_store(data_dir: PathBuf) -> Result<FlatFileStore> {
    let store = FlatFileStore::open(data_dir);
    seed_default_drugs(&store)?;

    let drugs = store.load_drugs()?;
    let errors = catalog::validate(&drugs);
    if !errors.is_empty() {
        eprintln!("Catalog validation errors:");
        for error in &errors {
            eprintln!("  - {}", error);
        }
        return Err(Error::CatalogValidation("Invalid catalog".into()));
    }

    Ok(store)
}

fn compute_once(store: &FlatFileStore, config: &Config) -> Result<AvailabilityInfo> {
    let now = Utc::now();
    let cutoff = now - config.engine.window_cutoff();
    let drugs = store.load_drugs()?;
    let entries = store.load_entries(Some(cutoff))?;
    Ok(compute(&entries, &drugs, now))
}

fn cmd_status(data_dir: PathBuf, config: &Config) -> Result<()> {
    let store = open_store(data_dir)?;
    let info = compute_once(&store, config)?;

    display_availability(&info);
    Ok(())
}

fn cmd_log(
    data_dir: PathBuf,
    config: &Config,
    drug_name: String,
    quantity: f64,
    at: Option<String>,
) -> Result<()> {
    // Zero and negative doses are rejected at the edge; the engine only
    // ever sees real doses
    if quantity <= 0.0 {
        return Err(Error::Other(format!(
            "Quantity must be positive, got {}",
            quantity
        )));
    }

    let taken_at = match at {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map_err(|e| Error::Other(format!("Invalid --at timestamp: {}", e)))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let store = open_store(data_dir)?;
    let drugs = store.load_drugs()?;
    let drug = drugs
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(&drug_name))
        .ok_or_else(|| {
            let known: Vec<_> = drugs.iter().map(|d| d.name.as_str()).collect();
            Error::Other(format!(
                "Unknown drug '{}'. Known drugs: {}",
                drug_name,
                known.join(", ")
            ))
        })?;

    let entry = MedicineEntry::single(drug, quantity, taken_at);
    store.add_entry(entry)?;
    println!("✓ Logged {} x {}", quantity, drug.name);

    let info = compute_once(&store, config)?;
    if let Some(record) = info.by_drug.get(&drug.id) {
        if record.can_take {
            println!("  {} may be taken again now", record.drug.name);
        } else {
            println!(
                "  Next {} dose at {}",
                record.drug.name,
                format_when(record.when)
            );
        }
    }
    Ok(())
}

fn cmd_watch(data_dir: PathBuf, config: &Config, updates: Option<usize>) -> Result<()> {
    let store = Arc::new(FlatFileStore::open(data_dir));
    let pipeline = AvailabilityPipeline::new(store, config.engine.clone());

    let errors = pipeline.subscribe_errors();
    let sub = pipeline.subscribe();

    println!(
        "Watching availability (tick every {}s, window {} days). Ctrl-C to stop.",
        config.engine.tick_seconds, config.engine.window_days
    );

    let mut seen = 0usize;
    loop {
        while let Some(message) = errors.try_recv() {
            eprintln!("⚠ {}", message);
        }

        if let Some(info) = sub.recv_timeout(Duration::from_millis(500)) {
            println!();
            display_availability(&info);
            seen += 1;
            if let Some(limit) = updates {
                if seen >= limit {
                    break;
                }
            }
        }
    }

    Ok(())
}

fn cmd_drugs(data_dir: PathBuf, command: DrugCommands) -> Result<()> {
    match command {
        DrugCommands::List => {
            let store = open_store(data_dir)?;
            let mut drugs = store.load_drugs()?;
            drugs.sort_by(|a, b| a.name.cmp(&b.name));

            for drug in &drugs {
                let ingredients = if drug.ingredients.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", drug.ingredients.join(", "))
                };
                println!(
                    "  {}  every {} h{}",
                    drug.name, drug.redose_hours, ingredients
                );
            }
            Ok(())
        }

        DrugCommands::Add {
            name,
            interval_hours,
            ingredients,
        } => {
            let store = open_store(data_dir)?;
            let drug = Drug {
                id: uuid::Uuid::new_v4(),
                name: name.clone(),
                ingredients,
                redose_hours: interval_hours,
            };

            let mut drugs = store.load_drugs()?;
            drugs.push(drug.clone());
            let errors = catalog::validate(&drugs);
            if !errors.is_empty() {
                return Err(Error::CatalogValidation(errors.join("; ")));
            }

            store.add_drug(drug)?;
            println!("✓ Added {} (every {} h)", name, interval_hours);
            Ok(())
        }

        DrugCommands::Remove { name } => {
            let store = open_store(data_dir)?;
            let drugs = store.load_drugs()?;
            let drug = drugs
                .iter()
                .find(|d| d.name.eq_ignore_ascii_case(&name))
                .ok_or_else(|| Error::Other(format!("Unknown drug '{}'", name)))?;

            store.remove_drug(drug.id)?;
            println!("✓ Removed {}", drug.name);
            Ok(())
        }
    }
}

fn cmd_export(data_dir: PathBuf, csv_path: PathBuf) -> Result<()> {
    let store = open_store(data_dir)?;
    let count = entries_to_csv(&store, &csv_path)?;

    println!("✓ Exported {} dose rows", count);
    println!("  CSV: {}", csv_path.display());
    Ok(())
}

fn display_availability(info: &AvailabilityInfo) {
    println!("╭─────────────────────────────────────────╮");
    println!("│  DRUG AVAILABILITY");
    println!("╰─────────────────────────────────────────╯");

    if info.by_drug.is_empty() {
        println!("  (no drugs known)");
        return;
    }

    for record in info.sorted_by_name() {
        if record.can_take {
            println!("  ✓ {}", record.drug.name);
        } else {
            println!(
                "  ✗ {}  available at {}",
                record.drug.name,
                format_when(record.when)
            );
        }
    }
}

fn format_when(when: DateTime<Utc>) -> String {
    let now = Utc::now();
    let formatted = when.format("%Y-%m-%d %H:%M UTC");
    if when > now {
        let remaining = when - now;
        let hours = remaining.num_hours();
        let minutes = remaining.num_minutes() % 60;
        format!("{} (in {}h {:02}m)", formatted, hours, minutes)
    } else {
        formatted.to_string()
    }
}
