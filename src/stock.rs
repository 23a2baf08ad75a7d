use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Low-stock alert threshold, as the user expressed it.
///
/// The simple flow captures an absolute unit count, the advanced flow a
/// percentage of the total; both are carried explicitly rather than
/// guessed from magnitude.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    Units(u32),
    Percent(u32),
}

/// On-hand stock for a medication.
///
/// Invariant: `units_left <= units_total`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StockState {
    pub units_total: u32,
    pub units_left: u32,
    /// Free-text unit name ("pills", "ml", "patches").
    pub unit_label: String,
    /// Units consumed by a single dose event.
    pub dose_quantity: u32,
    pub alert_threshold: Threshold,
}

/// UI classification of the current stock level. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockLevel {
    Ok,
    GettingLow,
    Low,
}

impl StockLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockLevel::Ok => "ok",
            StockLevel::GettingLow => "getting low",
            StockLevel::Low => "LOW",
        }
    }
}

/// Computed days-of-supply forecast for display. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockProjection {
    pub units_per_day: u32,
    pub days_until_empty: u32,
    pub days_until_alert: u32,
    pub alert_threshold_units: u32,
    pub level: StockLevel,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StockError {
    #[error("dose consumption per day must be greater than zero")]
    ZeroConsumption,
    #[error("units left ({left}) cannot exceed total units ({total})")]
    LeftExceedsTotal { left: u32, total: u32 },
}

/// Resolve the alert threshold to a concrete unit count.
///
/// Percentages round up, so a 1% threshold on a small pack still alerts
/// before the last unit.
pub fn alert_threshold_units(stock: &StockState) -> u32 {
    match stock.alert_threshold {
        Threshold::Units(count) => count,
        Threshold::Percent(percent) => (stock.units_total * percent).div_ceil(100),
    }
}

/// Classify the remaining stock against the alert threshold.
///
/// `Low` at or below the threshold, `GettingLow` at or below 1.5x it.
pub fn stock_level(stock: &StockState) -> StockLevel {
    let threshold = alert_threshold_units(stock);
    if stock.units_left <= threshold {
        StockLevel::Low
    } else if stock.units_left * 2 <= threshold * 3 {
        StockLevel::GettingLow
    } else {
        StockLevel::Ok
    }
}

fn project_from(stock: &StockState, doses_per_day: usize, basis_units: u32) -> Option<StockProjection> {
    let units_per_day = (doses_per_day as u32).checked_mul(stock.dose_quantity)?;
    if units_per_day == 0 {
        return None;
    }

    let alert_units = alert_threshold_units(stock);
    Some(StockProjection {
        units_per_day,
        days_until_empty: basis_units / units_per_day,
        days_until_alert: alert_units / units_per_day,
        alert_threshold_units: alert_units,
        level: stock_level(stock),
    })
}

/// Project supply duration from the full pack size.
///
/// This is the creation-time preview shown while the user is still
/// filling in the form; nothing has been consumed yet.
pub fn project(stock: &StockState, doses_per_day: usize) -> Option<StockProjection> {
    project_from(stock, doses_per_day, stock.units_total)
}

/// Project supply duration from what is actually left on hand.
///
/// Returns None when the daily consumption is zero, since no meaningful
/// forecast exists.
pub fn project_remaining(stock: &StockState, doses_per_day: usize) -> Option<StockProjection> {
    project_from(stock, doses_per_day, stock.units_left)
}

/// Check a stock configuration before it is saved.
pub fn validate(stock: &StockState, doses_per_day: usize) -> Result<(), StockError> {
    if stock.units_left > stock.units_total {
        return Err(StockError::LeftExceedsTotal {
            left: stock.units_left,
            total: stock.units_total,
        });
    }
    if stock.dose_quantity == 0 || doses_per_day == 0 {
        return Err(StockError::ZeroConsumption);
    }
    Ok(())
}

/// Whether the pack is too small for a fixed-duration treatment.
pub fn is_insufficient_for_treatment(stock: &StockState, total_doses_needed: u32) -> bool {
    let needed = total_doses_needed as u64 * stock.dose_quantity as u64;
    (stock.units_total as u64) < needed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock(total: u32, left: u32, dose_quantity: u32, threshold: Threshold) -> StockState {
        StockState {
            units_total: total,
            units_left: left,
            unit_label: "pills".to_string(),
            dose_quantity,
            alert_threshold: threshold,
        }
    }

    #[test]
    fn test_project_basic() {
        let s = stock(30, 30, 1, Threshold::Units(6));
        let p = project(&s, 3).unwrap();

        assert_eq!(p.units_per_day, 3);
        assert_eq!(p.days_until_empty, 10);
        assert_eq!(p.alert_threshold_units, 6);
        assert_eq!(p.days_until_alert, 2);
    }

    #[test]
    fn test_project_zero_consumption_is_none() {
        let s = stock(30, 30, 0, Threshold::Units(5));
        assert_eq!(project(&s, 3), None);

        let s = stock(30, 30, 1, Threshold::Units(5));
        assert_eq!(project(&s, 0), None);
        assert_eq!(project_remaining(&s, 0), None);
    }

    #[test]
    fn test_project_absolute_threshold() {
        // 10 units, threshold 5, one 2-unit dose per day
        let s = stock(10, 10, 2, Threshold::Units(5));
        let p = project(&s, 1).unwrap();

        assert_eq!(p.units_per_day, 2);
        assert_eq!(p.days_until_empty, 5);
        assert_eq!(p.days_until_alert, 2);
    }

    #[test]
    fn test_project_percent_threshold_rounds_up() {
        let s = stock(30, 30, 1, Threshold::Percent(20));
        let p = project(&s, 3).unwrap();
        assert_eq!(p.alert_threshold_units, 6);

        // 15% of 30 = 4.5 -> 5
        let s = stock(30, 30, 1, Threshold::Percent(15));
        assert_eq!(alert_threshold_units(&s), 5);

        // Tiny percentages never round to zero
        let s = stock(10, 10, 1, Threshold::Percent(1));
        assert_eq!(alert_threshold_units(&s), 1);
    }

    #[test]
    fn test_project_remaining_uses_units_left() {
        let s = stock(30, 12, 1, Threshold::Units(6));
        let preview = project(&s, 3).unwrap();
        let remaining = project_remaining(&s, 3).unwrap();

        assert_eq!(preview.days_until_empty, 10);
        assert_eq!(remaining.days_until_empty, 4);
    }

    #[test]
    fn test_stock_level_tri_state() {
        let s = stock(30, 20, 1, Threshold::Units(6));
        assert_eq!(stock_level(&s), StockLevel::Ok);

        // 9 <= 1.5 * 6
        let s = stock(30, 9, 1, Threshold::Units(6));
        assert_eq!(stock_level(&s), StockLevel::GettingLow);

        let s = stock(30, 6, 1, Threshold::Units(6));
        assert_eq!(stock_level(&s), StockLevel::Low);

        let s = stock(30, 0, 1, Threshold::Units(6));
        assert_eq!(stock_level(&s), StockLevel::Low);
    }

    #[test]
    fn test_validate() {
        let s = stock(30, 30, 1, Threshold::Units(5));
        assert!(validate(&s, 2).is_ok());

        let s = stock(30, 31, 1, Threshold::Units(5));
        assert_eq!(
            validate(&s, 2),
            Err(StockError::LeftExceedsTotal { left: 31, total: 30 })
        );

        let s = stock(30, 30, 0, Threshold::Units(5));
        assert_eq!(validate(&s, 2), Err(StockError::ZeroConsumption));

        let s = stock(30, 30, 1, Threshold::Units(5));
        assert_eq!(validate(&s, 0), Err(StockError::ZeroConsumption));
    }

    #[test]
    fn test_insufficient_for_treatment() {
        // 10-day treatment at 3 doses/day of 1 unit needs 30 units
        let s = stock(30, 30, 1, Threshold::Units(5));
        assert!(!is_insufficient_for_treatment(&s, 30));

        let s = stock(29, 29, 1, Threshold::Units(5));
        assert!(is_insufficient_for_treatment(&s, 30));

        let s = stock(20, 20, 2, Threshold::Units(5));
        assert!(is_insufficient_for_treatment(&s, 14));
    }
}
