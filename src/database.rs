use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use chrono::{Duration, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::schedule::{
    derive_schedule, materialize_dose_instances, parse_frequency_kind, DoseInstance, DoseStatus,
    Frequency, FrequencySpec, ScheduleError, WINDOW_DAYS,
};
use crate::stock::{self, StockState, Threshold};
use crate::time::{format_time, parse_time, parse_weekdays, weekday_name};

const HISTORY_TIMESTAMP: &str = "%H:%M:%S - %Y/%m/%d";
const DEFAULT_ALERT_PERCENT: u32 = 20;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DoseRecord {
    pub timestamp: String, // Full datetime: "08:30:15 - 2026/03/02"
    pub dose: String,      // Dose at time of taking (in case it changes)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Item {
    pub name: String,
    pub dose: String,
    /// The dosing pattern the schedule is derived from.
    pub spec: FrequencySpec,
    /// Derived dose times, persisted alongside the spec.
    pub times: Vec<(u32, u32)>,
    /// Materialized dose window; fully regenerated on every edit.
    #[serde(default)]
    pub instances: Vec<DoseInstance>,
    #[serde(default)]
    pub stock: Option<StockState>,
    /// Fixed treatment duration in days, when one was prescribed.
    #[serde(default)]
    pub treatment_days: Option<u32>,
    pub notes: Option<String>,
    /// Complete history of all doses taken
    #[serde(default)]
    pub history: Vec<DoseRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Database {
    pub items: Vec<Item>,
    #[serde(default)]
    pub archived_items: Vec<Item>,
}

/// Raw scheduling flags as collected from the command line.
#[derive(Debug, Default, Clone)]
pub struct ScheduleOpts {
    pub times: Vec<String>,
    pub days: Option<String>,
    pub every_hours: Option<u32>,
    pub start: Option<String>,
    pub times_per_day: Option<u32>,
    pub freq: Option<String>,
}

impl ScheduleOpts {
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
            && self.days.is_none()
            && self.every_hours.is_none()
            && self.start.is_none()
            && self.times_per_day.is_none()
            && self.freq.is_none()
    }
}

/// Raw stock flags as collected from the command line.
#[derive(Debug, Default, Clone)]
pub struct StockOpts {
    pub units: Option<u32>,
    pub unit_label: Option<String>,
    pub dose_quantity: Option<u32>,
    pub alert: Option<u32>,
    pub alert_percent: Option<u32>,
}

impl StockOpts {
    pub fn is_empty(&self) -> bool {
        self.units.is_none()
            && self.unit_label.is_none()
            && self.dose_quantity.is_none()
            && self.alert.is_none()
            && self.alert_percent.is_none()
    }
}

/// Returns the path to the medication database file.
///
/// Uses the `dirs` crate to reliably locate the home directory across
/// platforms. Falls back to `./.horamed.json` if no home directory is found.
pub fn get_data_file() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".horamed.json")
}

/// Loads the medication database from disk.
///
/// Handles automatic migration from the old format (just `Vec<Item>`)
/// to the current format with archive support.
///
/// If the file is corrupted, creates a backup and returns an empty database.
/// If the file doesn't exist, returns an empty database.
pub fn load_database() -> Database {
    let file_path = get_data_file();
    if !file_path.exists() {
        return Database::default();
    }

    let contents = match fs::read_to_string(&file_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: Failed to read medications file: {}", e);
            eprintln!(
                "Using empty medication list. Check file permissions on: {}",
                file_path.display()
            );
            return Database::default();
        }
    };

    if let Ok(db) = serde_json::from_str::<Database>(&contents) {
        return db;
    }

    // Old format without the archive wrapper
    if let Ok(items) = serde_json::from_str::<Vec<Item>>(&contents) {
        eprintln!("Migrating medication database to new format with archive support...");
        let db = Database {
            items,
            archived_items: Vec::new(),
        };
        save_database(&db);
        eprintln!("Migration complete!");
        return db;
    }

    // File is corrupted - neither format worked
    eprintln!("WARNING: Medications file is corrupted and cannot be parsed!");
    eprintln!("File location: {}", file_path.display());
    eprintln!("Creating backup at: {}.corrupted", file_path.display());

    let backup_path = file_path.with_extension("json.corrupted");
    if let Err(backup_err) = fs::copy(&file_path, &backup_path) {
        eprintln!("Failed to create backup: {}", backup_err);
    } else {
        eprintln!("Backup created successfully.");
    }

    eprintln!("Starting with empty medication database.");
    Database::default()
}

/// Saves the complete medication database to disk atomically.
///
/// The whole database is rewritten in one temp-file-plus-rename step, so
/// a schedule regeneration is never observable half-done. Sets file
/// permissions to 0600 on Unix systems for privacy.
pub fn save_database(db: &Database) {
    let file_path = get_data_file();

    let json = match serde_json::to_string_pretty(db) {
        Ok(j) => j,
        Err(e) => {
            eprintln!("Error: Failed to serialize medication database: {}", e);
            return;
        }
    };

    let temp_path = file_path.with_extension("json.tmp");

    if let Err(e) = fs::write(&temp_path, &json) {
        eprintln!("Error: Failed to write temporary file: {}", e);
        return;
    }

    // Rename is atomic on POSIX systems
    if let Err(e) = fs::rename(&temp_path, &file_path) {
        eprintln!("Error: Failed to save medications file: {}", e);
        let _ = fs::remove_file(&temp_path);
        return;
    }

    #[cfg(unix)]
    {
        if let Ok(metadata) = fs::metadata(&file_path) {
            let mut perms = metadata.permissions();
            perms.set_mode(0o600);
            if let Err(e) = fs::set_permissions(&file_path, perms) {
                eprintln!("Warning: Failed to set file permissions: {}", e);
            }
        }
    }
}

fn print_time_help(raw: &str) {
    eprintln!("Error: Invalid time format '{}'", raw);
    eprintln!("Valid formats:");
    eprintln!("  - Named times: 'morning', 'noon', 'evening', 'bedtime'");
    eprintln!("  - Time format: '8:00', '08:30', '14:15'");
    eprintln!("  - Hour only: '8', '14' (defaults to :00)");
}

/// Build a `FrequencySpec` from raw command-line flags.
///
/// Exactly one scheduling mode must be selected: explicit times (with an
/// optional weekday list), a fixed hour interval, or a times-per-day
/// count. Prints a validation message and returns None on bad input.
pub fn build_spec(opts: &ScheduleOpts) -> Option<FrequencySpec> {
    let mut explicit_times = Vec::new();
    for raw in &opts.times {
        let Some(time) = parse_time(raw) else {
            print_time_help(raw);
            return None;
        };
        explicit_times.push(time);
    }

    let selectors = [
        opts.every_hours.is_some(),
        opts.times_per_day.is_some(),
        !opts.times.is_empty() || opts.days.is_some(),
    ];
    match selectors.iter().filter(|&&s| s).count() {
        0 => {
            eprintln!("Error: no schedule specified");
            eprintln!("Use --time (with optional --on), --every-hours, or --times-per-day");
            return None;
        }
        1 => {}
        _ => {
            eprintln!(
                "Error: choose one scheduling mode: --time/--on, --every-hours, or --times-per-day"
            );
            return None;
        }
    }

    if let Some(hours) = opts.every_hours {
        let start_time = match &opts.start {
            Some(raw) => match parse_time(raw) {
                Some(time) => Some(time),
                None => {
                    print_time_help(raw);
                    return None;
                }
            },
            None => None,
        };
        return Some(FrequencySpec {
            frequency: Frequency::IntervalHours,
            explicit_times: Vec::new(),
            days_of_week: Vec::new(),
            interval_hours: Some(hours),
            start_time,
            times_per_day: None,
        });
    }

    if let Some(count) = opts.times_per_day {
        return Some(FrequencySpec {
            frequency: Frequency::TimesPerDay,
            explicit_times: Vec::new(),
            days_of_week: Vec::new(),
            interval_hours: None,
            start_time: None,
            times_per_day: Some(count),
        });
    }

    if let Some(days_str) = &opts.days {
        let Some(days_of_week) = parse_weekdays(days_str) else {
            eprintln!("Error: Invalid weekday list '{}'", days_str);
            eprintln!("Use comma-separated names or indices, e.g. 'mon,wed,fri' or '1,3,5'");
            return None;
        };
        if explicit_times.is_empty() {
            eprintln!("Error: --on requires at least one --time");
            return None;
        }
        return Some(FrequencySpec {
            frequency: Frequency::SpecificDays,
            explicit_times,
            days_of_week,
            interval_hours: None,
            start_time: None,
            times_per_day: None,
        });
    }

    let frequency = match &opts.freq {
        Some(raw) => match parse_frequency_kind(raw) {
            Some(kind) => kind,
            None => {
                eprintln!("Error: Unknown frequency '{}'. Use daily, weekly or manual.", raw);
                return None;
            }
        },
        None => Frequency::Daily,
    };

    Some(FrequencySpec {
        frequency,
        explicit_times,
        days_of_week: Vec::new(),
        interval_hours: None,
        start_time: None,
        times_per_day: None,
    })
}

/// Build a `StockState` from raw command-line flags.
///
/// Returns Some(None) when no stock flag was given at all. Missing fields
/// fall back to `existing` (for edits) and then to defaults. A rebuilt
/// stock always starts full: editing stock resets consumption progress.
fn build_stock(
    opts: &StockOpts,
    existing: Option<&StockState>,
    doses_per_day: usize,
) -> Option<Option<StockState>> {
    if opts.is_empty() {
        return Some(None);
    }

    let units_total = match opts.units.or(existing.map(|s| s.units_total)) {
        Some(units) => units,
        None => {
            eprintln!("Error: --stock <UNITS> is required to enable stock tracking");
            return None;
        }
    };

    if opts.alert.is_some() && opts.alert_percent.is_some() {
        eprintln!("Error: use either --alert or --alert-percent, not both");
        return None;
    }
    let alert_threshold = match (opts.alert, opts.alert_percent) {
        (Some(count), _) => Threshold::Units(count),
        (None, Some(percent)) => {
            if percent > 100 {
                eprintln!("Error: --alert-percent must be between 0 and 100");
                return None;
            }
            Threshold::Percent(percent)
        }
        (None, None) => match existing {
            Some(s) => s.alert_threshold,
            None => Threshold::Percent(DEFAULT_ALERT_PERCENT),
        },
    };

    let state = StockState {
        units_total,
        units_left: units_total,
        unit_label: opts
            .unit_label
            .clone()
            .or_else(|| existing.map(|s| s.unit_label.clone()))
            .unwrap_or_else(|| "units".to_string()),
        dose_quantity: opts
            .dose_quantity
            .or(existing.map(|s| s.dose_quantity))
            .unwrap_or(1),
        alert_threshold,
    };

    if let Err(e) = stock::validate(&state, doses_per_day) {
        eprintln!("Error: {}", e);
        return None;
    }
    Some(Some(state))
}

/// Expected dose count over `days` calendar days for a schedule.
///
/// Specific-day schedules only consume on their selected weekdays.
fn doses_in_days(spec: &FrequencySpec, doses_per_day: usize, days: u32) -> u32 {
    let per_week_days = match spec.frequency {
        Frequency::SpecificDays => spec.days_of_week.len() as u32,
        _ => 7,
    };
    (days * doses_per_day as u32 * per_week_days).div_ceil(7)
}

/// Human-readable one-line description of an item's schedule.
fn describe_schedule(item: &Item) -> String {
    let times = item
        .times
        .iter()
        .map(|&t| format_time(t))
        .collect::<Vec<_>>()
        .join(", ");

    match item.spec.frequency {
        Frequency::Daily => format!("daily at {}", times),
        Frequency::SpecificDays => {
            let days = item
                .spec
                .days_of_week
                .iter()
                .map(|&d| weekday_name(d))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{} at {}", days, times)
        }
        Frequency::Weekly => format!("weekly at {}", times),
        Frequency::IntervalHours => match item.spec.interval_hours {
            Some(hours) => format!("every {} hours ({})", hours, times),
            None => format!("at {}", times),
        },
        Frequency::TimesPerDay => format!("{} times per day ({})", item.times.len(), times),
        Frequency::Manual => format!("at {}", times),
    }
}

fn stock_summary(stock_state: &StockState, doses_per_day: usize) -> String {
    match stock::project_remaining(stock_state, doses_per_day) {
        Some(p) => format!(
            "Stock:    {}/{} {} ({}), about {} day(s) left",
            stock_state.units_left,
            stock_state.units_total,
            stock_state.unit_label,
            p.level.as_str(),
            p.days_until_empty
        ),
        None => format!(
            "Stock:    {}/{} {}",
            stock_state.units_left, stock_state.units_total, stock_state.unit_label
        ),
    }
}

/// Index of the earliest pending dose instance, if any.
///
/// Instances are kept sorted by due time, so the first scheduled one is
/// the next to confirm whether it is already due or still upcoming.
fn next_pending_index(item: &Item) -> Option<usize> {
    item.instances
        .iter()
        .position(|inst| inst.status == DoseStatus::Scheduled)
}

fn next_scheduled(item: &Item) -> Option<&DoseInstance> {
    item.instances
        .iter()
        .find(|inst| inst.status == DoseStatus::Scheduled)
}

fn has_due_dose(item: &Item, now: NaiveDateTime) -> bool {
    item.instances
        .iter()
        .any(|inst| inst.status == DoseStatus::Scheduled && inst.due_at <= now)
}

fn find_item(db: &Database, name: &str) -> Option<usize> {
    let name_lower = name.to_lowercase();
    db.items
        .iter()
        .position(|item| item.name.to_lowercase() == name_lower)
}

fn report_not_found(db: &Database, name: &str) {
    let name_lower = name.to_lowercase();
    let is_archived = db
        .archived_items
        .iter()
        .any(|item| item.name.to_lowercase() == name_lower);

    if is_archived {
        eprintln!("Error: Medication '{}' is archived.", name);
        eprintln!(
            "To restart taking it, use: horamed add {} --dose <DOSE> <schedule flags>",
            name
        );
    } else {
        eprintln!("Error: Medication '{}' not found!", name);
    }
}

/// Marks scheduled instances from past days as missed. Returns the count.
pub fn sweep_missed(item: &mut Item, now: NaiveDateTime) -> usize {
    let today = now.date();
    let mut count = 0;
    for inst in item.instances.iter_mut() {
        if inst.status == DoseStatus::Scheduled && inst.due_at.date() < today {
            inst.status = DoseStatus::Missed;
            count += 1;
        }
    }
    count
}

/// Top the materialized dose window back up to its full length.
///
/// Confirmed/missed/skipped instances from the last window are kept as a
/// record; pending ones are dropped and regenerated from `now`, skipping
/// any due time that already exists so no two instances share one.
pub fn roll_window(item: &mut Item, now: NaiveDateTime) -> Result<(), ScheduleError> {
    let schedule = derive_schedule(&item.spec)?;

    let retention = now.date() - Duration::days(WINDOW_DAYS as i64);
    item.instances
        .retain(|inst| inst.status != DoseStatus::Scheduled && inst.due_at.date() >= retention);

    let kept: HashSet<NaiveDateTime> = item.instances.iter().map(|inst| inst.due_at).collect();
    let fresh = materialize_dose_instances(&schedule, &item.spec, WINDOW_DAYS, now);
    item.instances
        .extend(fresh.into_iter().filter(|inst| !kept.contains(&inst.due_at)));
    item.instances.sort_by_key(|inst| inst.due_at);

    item.times = schedule.times_of_day;
    Ok(())
}

/// Sweep missed doses and roll the window for every active item.
///
/// Called by the daemon at startup and at day rollover. Returns the
/// number of doses newly marked as missed.
pub fn maintain_windows() -> usize {
    let now = Local::now().naive_local();
    let mut db = load_database();
    let mut missed = 0;

    for item in db.items.iter_mut() {
        missed += sweep_missed(item, now);
        if let Err(e) = roll_window(item, now) {
            eprintln!("Error: cannot roll schedule window for '{}': {}", item.name, e);
        }
    }

    save_database(&db);
    missed
}

/// Adds a new medication or unarchives an existing archived one.
///
/// The schedule and (optional) stock configuration are validated before
/// anything is written; on any validation failure the database is left
/// untouched. If a medication with the same name (case-insensitive)
/// exists in the archive, it is moved back to active with updated fields
/// but preserved history.
pub fn add_item(
    name: String,
    dose: String,
    schedule_opts: ScheduleOpts,
    stock_opts: StockOpts,
    for_days: Option<u32>,
    notes: Option<String>,
) {
    if name.trim().is_empty() {
        eprintln!("Error: Medication name cannot be empty!");
        return;
    }
    if dose.trim().is_empty() {
        eprintln!("Error: Dose cannot be empty!");
        return;
    }

    let Some(spec) = build_spec(&schedule_opts) else {
        return;
    };
    let schedule = match derive_schedule(&spec) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return;
        }
    };
    let Some(new_stock) = build_stock(&stock_opts, None, schedule.doses_per_day) else {
        return;
    };

    if let (Some(days), Some(state)) = (for_days, new_stock.as_ref()) {
        let doses_needed = doses_in_days(&spec, schedule.doses_per_day, days);
        if stock::is_insufficient_for_treatment(state, doses_needed) {
            println!(
                "Warning: {} {} won't cover the full {}-day treatment ({} doses needed).",
                state.units_total, state.unit_label, days, doses_needed
            );
        }
    }

    let mut db = load_database();
    let name_lower = name.to_lowercase();

    if db
        .items
        .iter()
        .any(|item| item.name.to_lowercase() == name_lower)
    {
        eprintln!(
            "Error: Medication '{}' already exists in active medications!",
            name
        );
        return;
    }

    let now = Local::now().naive_local();
    let instances = materialize_dose_instances(&schedule, &spec, WINDOW_DAYS, now);

    // Check if medication exists in archive - if so, unarchive it
    let archived_index = db
        .archived_items
        .iter()
        .position(|item| item.name.to_lowercase() == name_lower);

    let item = if let Some(index) = archived_index {
        let mut item = db.archived_items.remove(index);
        item.dose = dose;
        item.spec = spec;
        item.times = schedule.times_of_day.clone();
        item.instances = instances;
        item.stock = new_stock;
        item.treatment_days = for_days;
        item.notes = notes;
        // Keep history
        item
    } else {
        Item {
            name: name.clone(),
            dose,
            spec,
            times: schedule.times_of_day.clone(),
            instances,
            stock: new_stock,
            treatment_days: for_days,
            notes,
            history: Vec::new(),
        }
    };

    let unarchived = archived_index.is_some();
    let history_count = item.history.len();
    let schedule_line = describe_schedule(&item);
    let supply_line = item
        .stock
        .as_ref()
        .and_then(|state| stock::project(state, item.times.len()).map(|p| (state, p)))
        .map(|(state, p)| {
            format!(
                "Supply:   {} {} at {}/day -> about {} day(s); alert below {} (~{} day(s) away)",
                state.units_total,
                state.unit_label,
                p.units_per_day,
                p.days_until_empty,
                p.alert_threshold_units,
                p.days_until_alert
            )
        });

    db.items.push(item);
    save_database(&db);

    if unarchived {
        println!("Unarchived medication: {}", name);
        if history_count > 0 {
            println!("  Restored {} dose record(s) from archive", history_count);
            println!("  View history with: horamed history {}", name);
        }
    } else {
        println!("Added medication: {}", name);
    }
    println!("  Schedule: {}", schedule_line);
    if let Some(line) = supply_line {
        println!("  {}", line);
    }
}

/// Removes a medication from the active list and archives it.
///
/// The medication is moved to the archive, preserving all dose records.
/// It can be unarchived later by adding it again with the same name.
pub fn remove_item(name: String) {
    let mut db = load_database();
    let name_lower = name.to_lowercase();

    let mut found_item: Option<Item> = None;
    db.items.retain(|item| {
        if item.name.to_lowercase() == name_lower {
            found_item = Some(item.clone());
            false
        } else {
            true
        }
    });

    if let Some(item) = found_item {
        db.archived_items.push(item.clone());
        save_database(&db);

        let history_count = item.history.len();
        println!("Archived medication: {}", name);
        if history_count > 0 {
            println!("  Preserved {} dose record(s) in archive", history_count);
            println!(
                "  View history anytime with: horamed history {} --archived",
                name
            );
        }
    } else {
        println!("Medication '{}' not found!", name);
    }
}

/// Marks the next pending dose of a medication as taken.
///
/// Confirms the earliest scheduled instance (overdue first, upcoming
/// otherwise), records it in history, and consumes stock if tracked.
pub fn take_dose(name: String) {
    let mut db = load_database();
    let now = Local::now().naive_local();

    let Some(pos) = find_item(&db, &name) else {
        report_not_found(&db, &name);
        return;
    };

    let mut lines = Vec::new();
    {
        let item = &mut db.items[pos];
        let Some(index) = next_pending_index(item) else {
            println!("No pending doses for '{}' in the current window.", item.name);
            return;
        };

        let due_at = item.instances[index].due_at;
        item.instances[index].status = DoseStatus::Taken;
        item.instances[index].taken_at = Some(now);

        item.history.push(DoseRecord {
            timestamp: now.format(HISTORY_TIMESTAMP).to_string(),
            dose: item.dose.clone(),
        });

        lines.push(format!(
            "Marked '{}' as taken (dose due {})",
            item.name,
            due_at.format("%Y/%m/%d %H:%M")
        ));

        if let Some(state) = &mut item.stock {
            state.units_left = state.units_left.saturating_sub(state.dose_quantity);
            lines.push(format!("  {}", stock_summary(state, item.times.len())));
            if state.units_left == 0 {
                lines.push(format!("  Out of {}! Refill with: horamed refill {} <AMOUNT>",
                    state.unit_label, item.name));
            }
        }
    }

    save_database(&db);
    for line in lines {
        println!("{}", line);
    }
}

/// Marks the next pending dose as skipped. Stock is not consumed.
pub fn skip_dose(name: String) {
    let mut db = load_database();

    let Some(pos) = find_item(&db, &name) else {
        report_not_found(&db, &name);
        return;
    };

    let message;
    {
        let item = &mut db.items[pos];
        let Some(index) = next_pending_index(item) else {
            println!("No pending doses for '{}' in the current window.", item.name);
            return;
        };

        let due_at = item.instances[index].due_at;
        item.instances[index].status = DoseStatus::Skipped;
        message = format!(
            "Skipped dose of '{}' due {}",
            item.name,
            due_at.format("%Y/%m/%d %H:%M")
        );
    }

    save_database(&db);
    println!("{}", message);
}

/// Undoes the most recent taken dose (reverts it to pending).
///
/// Restores the consumed stock and removes the matching history entry.
pub fn untake_dose(name: String) {
    let mut db = load_database();

    let Some(pos) = find_item(&db, &name) else {
        report_not_found(&db, &name);
        return;
    };

    let message;
    {
        let item = &mut db.items[pos];
        let last_taken = item
            .instances
            .iter()
            .enumerate()
            .filter(|(_, inst)| inst.status == DoseStatus::Taken)
            .max_by_key(|(_, inst)| inst.taken_at)
            .map(|(i, _)| i);

        let Some(index) = last_taken else {
            println!("Medication '{}' has no taken doses to undo", item.name);
            return;
        };

        item.instances[index].status = DoseStatus::Scheduled;
        item.instances[index].taken_at = None;

        if !item.history.is_empty() {
            item.history.pop();
        }

        if let Some(state) = &mut item.stock {
            state.units_left = (state.units_left + state.dose_quantity).min(state.units_total);
        }

        message = format!("Unmarked dose of '{}' as taken", item.name);
    }

    save_database(&db);
    println!("{}", message);
}

/// Marks every currently due dose (across all medications) as taken.
pub fn take_all_due() {
    let mut db = load_database();
    let now = Local::now().naive_local();
    let mut taken = 0;

    for item in db.items.iter_mut() {
        let due_index = item
            .instances
            .iter()
            .position(|inst| inst.status == DoseStatus::Scheduled && inst.due_at <= now);
        let Some(index) = due_index else {
            continue;
        };

        item.instances[index].status = DoseStatus::Taken;
        item.instances[index].taken_at = Some(now);
        item.history.push(DoseRecord {
            timestamp: now.format(HISTORY_TIMESTAMP).to_string(),
            dose: item.dose.clone(),
        });
        if let Some(state) = &mut item.stock {
            state.units_left = state.units_left.saturating_sub(state.dose_quantity);
        }

        println!("Marked '{}' as taken", item.name);
        taken += 1;
    }

    if taken == 0 {
        println!("No doses are currently due.");
        return;
    }

    save_database(&db);
    println!("Marked {} dose(s) as taken.", taken);
}

pub fn list_items(archived: bool, due: bool) {
    let db = load_database();
    let now = Local::now().naive_local();

    let source = if archived {
        &db.archived_items
    } else {
        &db.items
    };

    let filtered: Vec<&Item> = if due {
        source.iter().filter(|item| has_due_dose(item, now)).collect()
    } else {
        source.iter().collect()
    };

    if filtered.is_empty() {
        if due {
            println!("No medications are currently due.");
        } else if archived {
            println!("No archived medications found.");
        } else {
            println!("No active medications found.");
        }
        return;
    }

    if due {
        println!("\nMedications Due Now:");
    } else if archived {
        println!("\nArchived Medications:");
    } else {
        println!("\nActive Medications:");
    }
    println!("{}", "=".repeat(60));

    for item in filtered {
        println!("\n{}", item.name);
        println!("  Dose:     {}", item.dose);
        println!("  Schedule: {}", describe_schedule(item));

        if !archived {
            match next_scheduled(item) {
                Some(inst) => println!("  Next:     {}", inst.due_at.format("%Y/%m/%d %H:%M")),
                None => println!("  Next:     (no pending doses this week)"),
            }

            let taken_today = item
                .instances
                .iter()
                .filter(|inst| {
                    inst.status == DoseStatus::Taken
                        && inst.taken_at.map(|t| t.date()) == Some(now.date())
                })
                .count();
            println!("  Today:    {}/{} dose(s) taken", taken_today, item.times.len());

            if let Some(state) = &item.stock {
                println!("  {}", stock_summary(state, item.times.len()));
            }
        }

        if let Some(notes) = &item.notes {
            println!("  Notes:    {}", notes);
        }

        if !item.history.is_empty() {
            println!("  History:  {} dose(s) recorded", item.history.len());
        }
    }
    println!();
}

/// Shows stock levels and supply projections for tracked medications.
pub fn show_stock(name: Option<String>) {
    let db = load_database();
    let name_lower = name.as_ref().map(|n| n.to_lowercase());

    let mut shown = 0;
    for item in &db.items {
        if let Some(filter) = &name_lower {
            if item.name.to_lowercase() != *filter {
                continue;
            }
        }
        let Some(state) = &item.stock else {
            continue;
        };

        shown += 1;
        println!("\n{}", item.name);
        println!(
            "  On hand:   {}/{} {}",
            state.units_left, state.units_total, state.unit_label
        );
        match stock::project_remaining(state, item.times.len()) {
            Some(p) => {
                println!("  Daily use: {} {}", p.units_per_day, state.unit_label);
                println!("  Days left: {}", p.days_until_empty);
                println!(
                    "  Alert at:  {} {} (~{} day(s) away)",
                    p.alert_threshold_units, state.unit_label, p.days_until_alert
                );
                println!("  Level:     {}", p.level.as_str());
            }
            None => println!("  (no projection: no scheduled daily consumption)"),
        }
    }

    if shown == 0 {
        match name {
            Some(n) => println!("No stock tracking for '{}'.", n),
            None => println!("No medications track stock."),
        }
    } else {
        println!();
    }
}

/// Adds units to a medication's stock (a refill or a new pack).
pub fn refill_stock(name: String, amount: u32) {
    let mut db = load_database();

    let Some(pos) = find_item(&db, &name) else {
        report_not_found(&db, &name);
        return;
    };

    let message;
    {
        let item = &mut db.items[pos];
        match item.stock.as_mut() {
            Some(state) => {
                state.units_left += amount;
                if state.units_left > state.units_total {
                    state.units_total = state.units_left;
                }
                message = format!(
                    "Refilled '{}' (+{} {})\n  {}",
                    item.name,
                    amount,
                    state.unit_label,
                    stock_summary(state, item.times.len())
                );
            }
            None => {
                println!("'{}' does not track stock.", name);
                println!("Enable it with: horamed edit {} --stock <UNITS>", name);
                return;
            }
        }
    }

    save_database(&db);
    println!("{}", message);
}

/// Edits an existing medication.
///
/// A changed schedule is fully re-derived and its dose window regenerated
/// (never patched incrementally); changed stock is rebuilt starting full.
/// All validation happens before any field is mutated, and the database
/// is saved once at the end.
pub fn edit_item(
    name: String,
    new_dose: Option<String>,
    schedule_opts: ScheduleOpts,
    stock_opts: StockOpts,
    for_days: Option<u32>,
    new_notes: Option<String>,
) {
    let mut db = load_database();

    let Some(pos) = find_item(&db, &name) else {
        report_not_found(&db, &name);
        return;
    };

    if let Some(ref dose) = new_dose {
        if dose.trim().is_empty() {
            eprintln!("Error: Dose cannot be empty!");
            return;
        }
    }

    // Validate the new schedule before touching the item
    let new_schedule = if schedule_opts.is_empty() {
        None
    } else {
        let Some(spec) = build_spec(&schedule_opts) else {
            return;
        };
        match derive_schedule(&spec) {
            Ok(schedule) => Some((spec, schedule)),
            Err(e) => {
                eprintln!("Error: {}", e);
                return;
            }
        }
    };

    let doses_per_day = new_schedule
        .as_ref()
        .map(|(_, s)| s.doses_per_day)
        .unwrap_or(db.items[pos].times.len());

    let new_stock = if stock_opts.is_empty() {
        None
    } else {
        let Some(state) = build_stock(&stock_opts, db.items[pos].stock.as_ref(), doses_per_day)
        else {
            return;
        };
        state
    };

    let mut changes = Vec::new();
    let mut warning = None;
    {
        let item = &mut db.items[pos];
        let now = Local::now().naive_local();

        if let Some(dose) = new_dose {
            item.dose = dose.clone();
            changes.push(format!("dose -> {}", dose));
        }

        if let Some((spec, schedule)) = new_schedule {
            item.instances = materialize_dose_instances(&schedule, &spec, WINDOW_DAYS, now);
            item.times = schedule.times_of_day;
            item.spec = spec;
            changes.push(format!("schedule -> {}", describe_schedule(item)));
        }

        if let Some(state) = new_stock {
            changes.push(format!(
                "stock -> {} {}",
                state.units_total, state.unit_label
            ));
            item.stock = Some(state);
        }

        if let Some(days) = for_days {
            if days == 0 {
                item.treatment_days = None;
                changes.push("treatment duration -> (cleared)".to_string());
            } else {
                item.treatment_days = Some(days);
                changes.push(format!("treatment duration -> {} days", days));
            }
        }

        if let Some(notes) = new_notes {
            if notes.is_empty() {
                item.notes = None;
                changes.push("notes -> (cleared)".to_string());
            } else {
                item.notes = Some(notes.clone());
                changes.push(format!("notes -> {}", notes));
            }
        }

        if changes.is_empty() {
            println!("No changes specified for '{}'", item.name);
            return;
        }

        if let (Some(days), Some(state)) = (item.treatment_days, item.stock.as_ref()) {
            let doses_needed = doses_in_days(&item.spec, item.times.len(), days);
            if stock::is_insufficient_for_treatment(state, doses_needed) {
                warning = Some(format!(
                    "Warning: {} {} won't cover the full {}-day treatment ({} doses needed).",
                    state.units_total, state.unit_label, days, doses_needed
                ));
            }
        }

        println!("Updated '{}': {}", item.name, changes.join(", "));
    }

    save_database(&db);
    if let Some(warning) = warning {
        println!("{}", warning);
    }
}

/// Displays medication history with adherence metrics.
///
/// # Arguments
/// * `medication_name` - Optional specific medication name (shows all if None)
/// * `days` - Optional number of days to show (default: 30)
/// * `archived` - If true, only shows archived medications; if false, shows both
///
/// Shows all dose records newest first, plus an adherence percentage
/// based on the expected dose count for the schedule.
pub fn display_history(medication_name: Option<String>, days: Option<u32>, archived: bool) {
    let db = load_database();

    let all_items: Vec<&Item> = if archived {
        db.archived_items.iter().collect()
    } else {
        db.items.iter().chain(db.archived_items.iter()).collect()
    };

    if all_items.is_empty() {
        if archived {
            println!("No archived medications found.");
        } else {
            println!("No medications found.");
        }
        return;
    }

    let now = Local::now().naive_local();
    let cutoff = days.map(|d| now - Duration::days(d as i64));

    let filtered: Vec<&Item> = if let Some(ref name) = medication_name {
        let name_lower = name.to_lowercase();
        all_items
            .into_iter()
            .filter(|item| item.name.to_lowercase() == name_lower)
            .collect()
    } else {
        all_items
    };

    if filtered.is_empty() {
        if let Some(name) = medication_name {
            println!("Medication '{}' not found!", name);
        }
        return;
    }

    for item in filtered {
        let is_archived = db.archived_items.iter().any(|a| a.name == item.name);

        let history: Vec<&DoseRecord> = item
            .history
            .iter()
            .filter(|record| {
                let Some(cutoff) = cutoff else {
                    return true;
                };
                match NaiveDateTime::parse_from_str(&record.timestamp, HISTORY_TIMESTAMP) {
                    Ok(timestamp) => timestamp >= cutoff,
                    Err(_) => true, // Include if we can't parse
                }
            })
            .collect();

        let tag = if is_archived { " [ARCHIVED]" } else { "" };

        if history.is_empty() {
            println!("\n{}{} - No history recorded", item.name, tag);
            if let Some(d) = days {
                println!("  (No doses in last {} days)", d);
            }
            continue;
        }

        println!("\n{}{} - History", item.name, tag);
        if let Some(d) = days {
            println!("  (Last {} days)", d);
        }
        println!("{}", "=".repeat(60));

        // Newest first
        for record in history.iter().rev() {
            println!("  {} - {}", record.timestamp, record.dose);
        }

        let days_to_check = days.unwrap_or(30);
        let expected = doses_in_days(&item.spec, item.times.len(), days_to_check).max(1);
        let actual = history.len() as u32;
        let adherence = (actual as f32 / expected as f32 * 100.0).min(100.0);

        println!("\n  Total doses: {} (Expected: ~{})", actual, expected);
        println!("  Adherence: {:.1}%", adherence);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn daily_item(times: Vec<(u32, u32)>) -> Item {
        let spec = FrequencySpec {
            frequency: Frequency::Daily,
            explicit_times: times,
            days_of_week: Vec::new(),
            interval_hours: None,
            start_time: None,
            times_per_day: None,
        };
        let schedule = derive_schedule(&spec).unwrap();
        let instances =
            materialize_dose_instances(&schedule, &spec, WINDOW_DAYS, at(2026, 3, 2, 0, 0));
        Item {
            name: "Test".to_string(),
            dose: "10mg".to_string(),
            spec,
            times: schedule.times_of_day,
            instances,
            stock: None,
            treatment_days: None,
            notes: None,
            history: Vec::new(),
        }
    }

    #[test]
    fn test_build_spec_interval_hours() {
        let opts = ScheduleOpts {
            every_hours: Some(8),
            start: Some("8:00".to_string()),
            ..Default::default()
        };
        let spec = build_spec(&opts).unwrap();
        assert_eq!(spec.frequency, Frequency::IntervalHours);
        assert_eq!(spec.interval_hours, Some(8));
        assert_eq!(spec.start_time, Some((8, 0)));
    }

    #[test]
    fn test_build_spec_specific_days() {
        let opts = ScheduleOpts {
            times: vec!["9:00".to_string()],
            days: Some("mon,wed,fri".to_string()),
            ..Default::default()
        };
        let spec = build_spec(&opts).unwrap();
        assert_eq!(spec.frequency, Frequency::SpecificDays);
        assert_eq!(spec.days_of_week, vec![1, 3, 5]);
        assert_eq!(spec.explicit_times, vec![(9, 0)]);
    }

    #[test]
    fn test_build_spec_times_default_to_daily() {
        let opts = ScheduleOpts {
            times: vec!["morning".to_string(), "evening".to_string()],
            ..Default::default()
        };
        let spec = build_spec(&opts).unwrap();
        assert_eq!(spec.frequency, Frequency::Daily);
        assert_eq!(spec.explicit_times, vec![(8, 0), (18, 0)]);
    }

    #[test]
    fn test_build_spec_rejects_conflicts_and_gaps() {
        // Two scheduling modes at once
        let opts = ScheduleOpts {
            every_hours: Some(8),
            times_per_day: Some(3),
            ..Default::default()
        };
        assert!(build_spec(&opts).is_none());

        // Nothing at all
        assert!(build_spec(&ScheduleOpts::default()).is_none());

        // Weekdays without a time
        let opts = ScheduleOpts {
            days: Some("mon".to_string()),
            ..Default::default()
        };
        assert!(build_spec(&opts).is_none());

        // Unparseable time
        let opts = ScheduleOpts {
            times: vec!["25:00".to_string()],
            ..Default::default()
        };
        assert!(build_spec(&opts).is_none());
    }

    #[test]
    fn test_build_stock_defaults_and_conflicts() {
        let opts = StockOpts {
            units: Some(30),
            ..Default::default()
        };
        let state = build_stock(&opts, None, 3).unwrap().unwrap();
        assert_eq!(state.units_total, 30);
        assert_eq!(state.units_left, 30);
        assert_eq!(state.unit_label, "units");
        assert_eq!(state.dose_quantity, 1);
        assert_eq!(state.alert_threshold, Threshold::Percent(DEFAULT_ALERT_PERCENT));

        // No flags at all means no stock tracking
        assert_eq!(build_stock(&StockOpts::default(), None, 3), Some(None));

        // Both threshold styles at once
        let opts = StockOpts {
            units: Some(30),
            alert: Some(5),
            alert_percent: Some(20),
            ..Default::default()
        };
        assert_eq!(build_stock(&opts, None, 3), None);

        // Units required without an existing stock to fall back on
        let opts = StockOpts {
            alert: Some(5),
            ..Default::default()
        };
        assert_eq!(build_stock(&opts, None, 3), None);
    }

    #[test]
    fn test_build_stock_edit_falls_back_to_existing() {
        let existing = StockState {
            units_total: 30,
            units_left: 12,
            unit_label: "capsules".to_string(),
            dose_quantity: 2,
            alert_threshold: Threshold::Units(6),
        };
        let opts = StockOpts {
            units: Some(60),
            ..Default::default()
        };
        let state = build_stock(&opts, Some(&existing), 3).unwrap().unwrap();

        // Rebuilt stock starts full with carried-over settings
        assert_eq!(state.units_total, 60);
        assert_eq!(state.units_left, 60);
        assert_eq!(state.unit_label, "capsules");
        assert_eq!(state.dose_quantity, 2);
        assert_eq!(state.alert_threshold, Threshold::Units(6));
    }

    #[test]
    fn test_doses_in_days() {
        let daily = daily_item(vec![(8, 0), (20, 0)]);
        assert_eq!(doses_in_days(&daily.spec, 2, 7), 14);
        assert_eq!(doses_in_days(&daily.spec, 2, 10), 20);

        let spec = FrequencySpec {
            frequency: Frequency::SpecificDays,
            explicit_times: vec![(9, 0)],
            days_of_week: vec![1, 3, 5],
            interval_hours: None,
            start_time: None,
            times_per_day: None,
        };
        assert_eq!(doses_in_days(&spec, 1, 7), 3);
        assert_eq!(doses_in_days(&spec, 1, 14), 6);
    }

    #[test]
    fn test_next_pending_index_is_earliest() {
        let mut item = daily_item(vec![(8, 0), (20, 0)]);
        assert_eq!(next_pending_index(&item), Some(0));

        item.instances[0].status = DoseStatus::Taken;
        assert_eq!(next_pending_index(&item), Some(1));

        for inst in item.instances.iter_mut() {
            inst.status = DoseStatus::Skipped;
        }
        assert_eq!(next_pending_index(&item), None);
    }

    #[test]
    fn test_sweep_missed_marks_only_past_days() {
        let mut item = daily_item(vec![(8, 0), (20, 0)]);

        // Two days later at 09:00: Mar 2 and Mar 3 doses are stale
        let missed = sweep_missed(&mut item, at(2026, 3, 4, 9, 0));
        assert_eq!(missed, 4);

        // Today's 08:00 dose is overdue but not yet missed
        assert!(item
            .instances
            .iter()
            .filter(|i| i.due_at.date() == NaiveDate::from_ymd_opt(2026, 3, 4).unwrap())
            .all(|i| i.status == DoseStatus::Scheduled));

        // Second sweep finds nothing new
        assert_eq!(sweep_missed(&mut item, at(2026, 3, 4, 9, 0)), 0);
    }

    #[test]
    fn test_roll_window_tops_up_and_keeps_record() {
        let mut item = daily_item(vec![(8, 0), (20, 0)]);
        item.instances[0].status = DoseStatus::Taken;
        item.instances[0].taken_at = Some(at(2026, 3, 2, 8, 5));
        item.instances[1].status = DoseStatus::Missed;

        let now = at(2026, 3, 4, 9, 0);
        roll_window(&mut item, now).unwrap();

        // Terminal instances survive the roll
        assert!(item
            .instances
            .iter()
            .any(|i| i.status == DoseStatus::Taken && i.due_at == at(2026, 3, 2, 8, 0)));
        assert!(item
            .instances
            .iter()
            .any(|i| i.status == DoseStatus::Missed && i.due_at == at(2026, 3, 2, 20, 0)));

        // Pending doses now extend a full window ahead: Mar 4 20:00
        // through Mar 10, 13 future slots in all
        let pending: Vec<_> = item
            .instances
            .iter()
            .filter(|i| i.status == DoseStatus::Scheduled)
            .collect();
        assert_eq!(pending.len(), 13);
        assert!(pending.iter().all(|i| i.due_at > now));
        assert_eq!(pending.last().unwrap().due_at, at(2026, 3, 10, 20, 0));

        // No duplicate due times and globally sorted
        let mut due_times: Vec<_> = item.instances.iter().map(|i| i.due_at).collect();
        let before = due_times.len();
        due_times.dedup();
        assert_eq!(due_times.len(), before);
        assert!(due_times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_roll_window_prunes_old_terminal_instances() {
        let mut item = daily_item(vec![(8, 0)]);
        for inst in item.instances.iter_mut() {
            inst.status = DoseStatus::Taken;
        }

        // Far past the retention horizon
        roll_window(&mut item, at(2026, 4, 1, 0, 0)).unwrap();
        assert!(item
            .instances
            .iter()
            .all(|i| i.status == DoseStatus::Scheduled));
    }

    #[test]
    fn test_describe_schedule() {
        let item = daily_item(vec![(8, 0), (20, 0)]);
        assert_eq!(describe_schedule(&item), "daily at 08:00, 20:00");

        let mut item = daily_item(vec![(9, 0)]);
        item.spec.frequency = Frequency::SpecificDays;
        item.spec.days_of_week = vec![1, 3, 5];
        assert_eq!(describe_schedule(&item), "Mon, Wed, Fri at 09:00");

        let mut item = daily_item(vec![(8, 0)]);
        item.spec.frequency = Frequency::IntervalHours;
        item.spec.interval_hours = Some(8);
        item.times = vec![(0, 0), (8, 0), (16, 0)];
        assert_eq!(
            describe_schedule(&item),
            "every 8 hours (00:00, 08:00, 16:00)"
        );
    }
}
