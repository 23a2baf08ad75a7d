use clap::{Args, Parser, Subcommand};

use daemon::run_daemon;
use database::{
    add_item, display_history, edit_item, list_items, refill_stock, remove_item, show_stock,
    skip_dose, take_all_due, take_dose, untake_dose, ScheduleOpts, StockOpts,
};

pub mod daemon;
pub mod database;
pub mod schedule;
pub mod stock;
pub mod time;

#[derive(Parser)]
#[command(name = "horamed")]
#[command(
    about = "CLI-first medication adherence tracker",
    long_about = "A simple CLI tool to schedule your medications, confirm doses, and keep an eye on how much you have left. Everything is saved as JSON for easy import/export."
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ScheduleArgs {
    /// Dose time (repeatable, e.g. "8:00", "noon")
    #[arg(short, long)]
    time: Vec<String>,
    /// Weekdays to dose on (e.g. "mon,wed,fri")
    #[arg(long, value_name = "DAYS")]
    on: Option<String>,
    /// Schedule a dose every N hours through the day
    #[arg(long, value_name = "HOURS")]
    every_hours: Option<u32>,
    /// First dose of the day for --every-hours (default 08:00)
    #[arg(long, value_name = "TIME")]
    start: Option<String>,
    /// Number of doses per day at the standard slots
    #[arg(long, value_name = "COUNT")]
    times_per_day: Option<u32>,
    /// How often explicit --time doses repeat: daily, weekly or manual
    #[arg(short, long)]
    freq: Option<String>,
}

impl ScheduleArgs {
    fn into_opts(self) -> ScheduleOpts {
        ScheduleOpts {
            times: self.time,
            days: self.on,
            every_hours: self.every_hours,
            start: self.start,
            times_per_day: self.times_per_day,
            freq: self.freq,
        }
    }
}

#[derive(Args)]
struct StockArgs {
    /// Total units on hand (enables stock tracking)
    #[arg(long, value_name = "UNITS")]
    stock: Option<u32>,
    /// Unit name for stock ("pills", "ml", "patches")
    #[arg(long, value_name = "NAME")]
    unit: Option<String>,
    /// Units consumed per dose (default 1)
    #[arg(long, value_name = "UNITS")]
    dose_quantity: Option<u32>,
    /// Low-stock alert at an absolute unit count
    #[arg(long, value_name = "UNITS")]
    alert: Option<u32>,
    /// Low-stock alert at a percentage of the total
    #[arg(long, value_name = "PERCENT")]
    alert_percent: Option<u32>,
}

impl StockArgs {
    fn into_opts(self) -> StockOpts {
        StockOpts {
            units: self.stock,
            unit_label: self.unit,
            dose_quantity: self.dose_quantity,
            alert: self.alert,
            alert_percent: self.alert_percent,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    #[command(visible_aliases = ["a", "ad"])]
    /// Add a new medication with a dosing schedule
    Add {
        /// Name of the medication
        name: String,
        /// Dosage (e.g., "500mg", "10ml")
        #[arg(short, long)]
        dose: String,
        #[command(flatten)]
        schedule: ScheduleArgs,
        #[command(flatten)]
        stock: StockArgs,
        /// Fixed treatment duration in days
        #[arg(long, value_name = "DAYS")]
        for_days: Option<u32>,
        /// Optional notes
        #[arg(short, long)]
        notes: Option<String>,
    },
    /// Remove a medication (archives it, history is kept)
    #[command(visible_alias = "r")]
    Remove {
        /// Name of the medication
        name: String,
    },
    /// Mark the next pending dose as taken
    #[command(visible_alias = "t")]
    Take { name: String },
    /// Mark the next pending dose as skipped
    Skip { name: String },
    #[command(visible_alias = "u")]
    /// Undo the most recent taken dose
    Untake { name: String },
    /// Mark every currently due dose as taken
    #[command(visible_alias = "ta")]
    TakeAll,
    /// Edit an existing medication
    #[command(visible_alias = "e")]
    Edit {
        /// Name of the medication to edit
        name: String,
        /// New dosage
        #[arg(long)]
        dose: Option<String>,
        #[command(flatten)]
        schedule: ScheduleArgs,
        #[command(flatten)]
        stock: StockArgs,
        /// New treatment duration in days (0 to clear)
        #[arg(long, value_name = "DAYS")]
        for_days: Option<u32>,
        /// New notes (use empty string to clear)
        #[arg(long)]
        notes: Option<String>,
    },
    /// List all medications
    #[command(visible_aliases = ["l", "ls"])]
    List {
        /// Show archived medications instead of active ones
        #[arg(short, long)]
        archived: bool,
        /// Show only medications with a dose due now
        #[arg(long)]
        due: bool,
    },
    /// Show stock levels and days-of-supply projections
    #[command(visible_alias = "st")]
    Stock {
        /// Name of medication (optional - shows all if not specified)
        name: Option<String>,
    },
    /// Add units to a medication's stock
    Refill {
        /// Name of the medication
        name: String,
        /// Number of units to add
        amount: u32,
    },
    /// View medication history
    #[command(visible_alias = "h")]
    History {
        /// Name of medication (optional - shows all if not specified)
        name: Option<String>,
        /// Number of days to show (default: 30)
        #[arg(short, long)]
        days: Option<u32>,
        /// Show only archived medications
        #[arg(short, long)]
        archived: bool,
    },
    /// Start the background daemon for reminders
    #[command(visible_alias = "d")]
    Daemon,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Add {
            name,
            dose,
            schedule,
            stock,
            for_days,
            notes,
        } => {
            add_item(
                name,
                dose,
                schedule.into_opts(),
                stock.into_opts(),
                for_days,
                notes,
            );
        }
        Commands::Remove { name } => {
            remove_item(name);
        }
        Commands::Take { name } => {
            take_dose(name);
        }
        Commands::Skip { name } => {
            skip_dose(name);
        }
        Commands::Untake { name } => {
            untake_dose(name);
        }
        Commands::TakeAll => take_all_due(),
        Commands::Edit {
            name,
            dose,
            schedule,
            stock,
            for_days,
            notes,
        } => {
            edit_item(
                name,
                dose,
                schedule.into_opts(),
                stock.into_opts(),
                for_days,
                notes,
            );
        }
        Commands::List { archived, due } => {
            list_items(archived, due);
        }
        Commands::Stock { name } => {
            show_stock(name);
        }
        Commands::Refill { name, amount } => {
            refill_stock(name, amount);
        }
        Commands::History {
            name,
            days,
            archived,
        } => {
            display_history(name, days, archived);
        }
        Commands::Daemon => {
            run_daemon();
        }
    }
}
