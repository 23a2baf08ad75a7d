use chrono::{Datelike, Local, NaiveDateTime};
use notify_rust::Notification;
use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use crate::database::{load_database, maintain_windows};
use crate::schedule::DoseStatus;

pub fn run_daemon() {
    println!("Daemon started. Checking for medication reminders...");
    println!("Press Ctrl+C to stop.");

    // Catch up on anything that went stale while the daemon was down
    let missed = maintain_windows();
    if missed > 0 {
        println!("Marked {} stale dose(s) as missed on startup", missed);
    }

    // Track which dose instances we've already notified about
    let mut notified: HashSet<(String, NaiveDateTime)> = HashSet::new();
    let mut current_day = Local::now().day();

    loop {
        let now_local = Local::now();
        let now = now_local.naive_local();

        // Sweep missed doses and roll the schedule windows at midnight
        if now_local.day() != current_day {
            current_day = now_local.day();
            notified.clear();
            println!(
                "[{}] New day detected - sweeping missed doses and rolling windows",
                now_local.format("%H:%M:%S")
            );
            let missed = maintain_windows();
            if missed > 0 {
                println!(
                    "[{}] Marked {} dose(s) as missed",
                    now_local.format("%H:%M:%S"),
                    missed
                );
            }
        }

        let db = load_database();

        // Drop reminder flags for instances that are no longer pending,
        // so an undone dose can be reminded about again
        let pending: HashSet<(String, NaiveDateTime)> = db
            .items
            .iter()
            .flat_map(|item| {
                item.instances
                    .iter()
                    .filter(|inst| inst.status == DoseStatus::Scheduled)
                    .map(move |inst| (item.name.clone(), inst.due_at))
            })
            .collect();
        notified.retain(|key| pending.contains(key));

        for item in &db.items {
            for inst in &item.instances {
                if inst.status != DoseStatus::Scheduled || inst.due_at > now {
                    continue;
                }
                let key = (item.name.clone(), inst.due_at);
                if notified.contains(&key) {
                    continue;
                }

                let result = Notification::new()
                    .summary("Medication Reminder")
                    .body(&format!(
                        "Time to take: {} ({})\nScheduled for: {}",
                        item.name,
                        item.dose,
                        inst.due_at.format("%H:%M")
                    ))
                    .icon("medication")
                    .timeout(0) // Don't auto-dismiss
                    .show();

                if result.is_ok() {
                    notified.insert(key);
                    println!(
                        "[{}] Reminder sent: {} - {}",
                        now_local.format("%H:%M:%S"),
                        item.name,
                        item.dose
                    );
                } else {
                    eprintln!(
                        "[{}] Failed to send notification for: {}",
                        now_local.format("%H:%M:%S"),
                        item.name
                    );
                }
            }
        }

        // Check every 60 seconds
        thread::sleep(Duration::from_secs(60));
    }
}
