//! RatingPart command line
//!
//! Usage:
//!   ratingpart --dir /path/to/data load ratings.dat
//!   ratingpart --dir /path/to/data range-partition 5
//!   ratingpart --dir /path/to/data rrobin-insert 100 2 3.0

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use ratingpart::{
    drop_partitions, load_ratings_file, InsertRouter, PartitionCatalog, PartitionConfig,
    RangePartitioner, Rating, RoundRobinPartitioner, FileStore, Strategy,
};

#[derive(Parser, Debug)]
#[command(name = "ratingpart")]
#[command(about = "Range and round-robin partitioning of a ratings table")]
#[command(version)]
struct Args {
    /// Directory holding the relation files
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// JSON file overriding relation names, prefixes and the rating domain
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// fsync every write
    #[arg(long)]
    sync: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a `user::item::rating::timestamp` file into the base relation
    Load { file: PathBuf },
    /// Split the base relation into N rating ranges
    RangePartition {
        #[arg(allow_hyphen_values = true)]
        n: i64,
    },
    /// Deal the base relation round-robin into N partitions
    RrobinPartition {
        #[arg(allow_hyphen_values = true)]
        n: i64,
    },
    /// Insert one row into the base relation and its range partition
    RangeInsert { user: i64, item: i64, rating: f64 },
    /// Insert one row into the base relation and the next round-robin partition
    RrobinInsert { user: i64, item: i64, rating: f64 },
    /// Print how many partitions a strategy has
    Count { strategy: StrategyArg },
    /// Drop every partition of a strategy
    Drop { strategy: StrategyArg },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Range,
    Rrobin,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Range => Strategy::Range,
            StrategyArg::Rrobin => Strategy::RoundRobin,
        }
    }
}

fn run(args: Args) -> ratingpart::Result<()> {
    let config = match &args.config {
        Some(path) => PartitionConfig::from_json_file(path)?,
        None => PartitionConfig::default(),
    };
    let store = FileStore::open(&args.dir)?.with_sync_writes(args.sync);

    match args.command {
        Command::Load { file } => {
            let rows = load_ratings_file(&store, &config, &file)?;
            println!("Loaded {} rows into {}", rows, config.base_relation);
        }
        Command::RangePartition { n } => {
            let report = RangePartitioner::new(&config).partition(&store, n)?;
            println!(
                "Created {} range partitions over {} rows in {:.2}s",
                report.partitions,
                report.rows,
                report.elapsed.as_secs_f64()
            );
        }
        Command::RrobinPartition { n } => {
            let report = RoundRobinPartitioner::new(&config).partition(&store, n)?;
            println!(
                "Created {} round-robin partitions over {} rows in {:.2}s",
                report.partitions,
                report.rows,
                report.elapsed.as_secs_f64()
            );
        }
        Command::RangeInsert { user, item, rating } => {
            let routed = InsertRouter::new(&store, &config).range_insert(Rating::new(user, item, rating))?;
            println!("Inserted into {} and {}", config.base_relation, routed.partition);
        }
        Command::RrobinInsert { user, item, rating } => {
            let routed =
                InsertRouter::new(&store, &config).round_robin_insert(Rating::new(user, item, rating))?;
            println!("Inserted into {} and {}", config.base_relation, routed.partition);
        }
        Command::Count { strategy } => {
            let prefix = config.prefix(strategy.into());
            println!("{}", PartitionCatalog::new(&store).count(prefix)?);
        }
        Command::Drop { strategy } => {
            let dropped = drop_partitions(&store, config.prefix(strategy.into()))?;
            println!("Dropped {} partitions", dropped);
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
