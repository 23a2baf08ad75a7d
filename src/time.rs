/// Parse a time-of-day string into an (hour, minute) pair.
///
/// Accepts flexible formats:
/// - Named times: "morning", "noon", "evening", "bedtime", etc.
/// - HH:MM format: "08:00", "8:00", "8:5" (with or without leading zeros)
/// - Hour only: "8", "08" (defaults to :00)
pub fn parse_time(time_str: &str) -> Option<(u32, u32)> {
    let trimmed = time_str.trim();

    if let Some(time) = parse_named_time(trimmed) {
        return Some(time);
    }

    if trimmed.contains(':') {
        let (hour_str, minute_str) = trimmed.split_once(':')?;
        if minute_str.contains(':') {
            return None;
        }

        let hour = hour_str.trim().parse::<u32>().ok()?;
        let minute = minute_str.trim().parse::<u32>().ok()?;

        if hour >= 24 || minute >= 60 {
            return None;
        }

        return Some((hour, minute));
    }

    // Bare hour, e.g. "8" means "08:00"
    let hour = trimmed.parse::<u32>().ok()?;
    if hour >= 24 {
        return None;
    }
    Some((hour, 0))
}

fn parse_named_time(s: &str) -> Option<(u32, u32)> {
    match s.to_lowercase().as_str() {
        "morning" | "breakfast" => Some((8, 0)),
        "midmorning" | "mid-morning" => Some((10, 0)),
        "noon" | "midday" | "lunch" => Some((12, 0)),
        "afternoon" => Some((15, 0)),
        "evening" | "dinner" => Some((18, 0)),
        "night" | "bedtime" => Some((21, 0)),
        "midnight" => Some((0, 0)),
        _ => None,
    }
}

/// Format an (hour, minute) pair as zero-padded "HH:MM".
pub fn format_time(time: (u32, u32)) -> String {
    format!("{:02}:{:02}", time.0, time.1)
}

/// Parse a single weekday name or index into 0=Sunday..6=Saturday.
pub fn parse_weekday(day_str: &str) -> Option<u32> {
    let lower = day_str.trim().to_lowercase();

    // Numeric index straight through
    if let Ok(n) = lower.parse::<u32>() {
        return if n <= 6 { Some(n) } else { None };
    }

    match lower.as_str() {
        "sun" | "sunday" => Some(0),
        "mon" | "monday" => Some(1),
        "tue" | "tues" | "tuesday" => Some(2),
        "wed" | "wednesday" => Some(3),
        "thu" | "thur" | "thurs" | "thursday" => Some(4),
        "fri" | "friday" => Some(5),
        "sat" | "saturday" => Some(6),
        _ => None,
    }
}

/// Parse a comma-separated weekday list ("mon,wed,fri") into sorted,
/// deduplicated indices. Returns None if any entry is unrecognized.
pub fn parse_weekdays(days_str: &str) -> Option<Vec<u32>> {
    let mut days = days_str
        .split(',')
        .map(parse_weekday)
        .collect::<Option<Vec<u32>>>()?;
    days.sort_unstable();
    days.dedup();
    if days.is_empty() {
        return None;
    }
    Some(days)
}

/// Short display name for a 0=Sunday..6=Saturday weekday index.
pub fn weekday_name(day: u32) -> &'static str {
    match day {
        0 => "Sun",
        1 => "Mon",
        2 => "Tue",
        3 => "Wed",
        4 => "Thu",
        5 => "Fri",
        6 => "Sat",
        _ => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_named() {
        assert_eq!(parse_time("morning"), Some((8, 0)));
        assert_eq!(parse_time("MORNING"), Some((8, 0)));
        assert_eq!(parse_time("breakfast"), Some((8, 0)));
        assert_eq!(parse_time("noon"), Some((12, 0)));
        assert_eq!(parse_time("lunch"), Some((12, 0)));
        assert_eq!(parse_time("afternoon"), Some((15, 0)));
        assert_eq!(parse_time("evening"), Some((18, 0)));
        assert_eq!(parse_time("night"), Some((21, 0)));
        assert_eq!(parse_time("bedtime"), Some((21, 0)));
        assert_eq!(parse_time("midnight"), Some((0, 0)));
        assert_eq!(parse_time("mid-morning"), Some((10, 0)));
    }

    #[test]
    fn test_parse_time_hhmm_format() {
        assert_eq!(parse_time("08:00"), Some((8, 0)));
        assert_eq!(parse_time("14:30"), Some((14, 30)));
        assert_eq!(parse_time("23:59"), Some((23, 59)));
        assert_eq!(parse_time("00:00"), Some((0, 0)));

        // Without leading zeros
        assert_eq!(parse_time("8:00"), Some((8, 0)));
        assert_eq!(parse_time("8:5"), Some((8, 5)));

        // With whitespace
        assert_eq!(parse_time(" 8:00 "), Some((8, 0)));
        assert_eq!(parse_time("  14:30  "), Some((14, 30)));
    }

    #[test]
    fn test_parse_time_hour_only() {
        assert_eq!(parse_time("8"), Some((8, 0)));
        assert_eq!(parse_time("14"), Some((14, 0)));
        assert_eq!(parse_time("0"), Some((0, 0)));
        assert_eq!(parse_time("23"), Some((23, 0)));
        assert_eq!(parse_time(" 8 "), Some((8, 0)));
    }

    #[test]
    fn test_parse_time_invalid() {
        assert_eq!(parse_time("24:00"), None);
        assert_eq!(parse_time("25:00"), None);
        assert_eq!(parse_time("24"), None);
        assert_eq!(parse_time("8:60"), None);
        assert_eq!(parse_time("8:99"), None);
        assert_eq!(parse_time("garbage"), None);
        assert_eq!(parse_time("8:30:00"), None);
        assert_eq!(parse_time("abc:def"), None);
        assert_eq!(parse_time(""), None);
        assert_eq!(parse_time(":30"), None);
        assert_eq!(parse_time("8:"), None);
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time((8, 0)), "08:00");
        assert_eq!(format_time((0, 0)), "00:00");
        assert_eq!(format_time((23, 59)), "23:59");
        assert_eq!(format_time((9, 5)), "09:05");
    }

    #[test]
    fn test_parse_weekday() {
        assert_eq!(parse_weekday("sun"), Some(0));
        assert_eq!(parse_weekday("Sunday"), Some(0));
        assert_eq!(parse_weekday("MON"), Some(1));
        assert_eq!(parse_weekday("tues"), Some(2));
        assert_eq!(parse_weekday("saturday"), Some(6));
        assert_eq!(parse_weekday("3"), Some(3));
        assert_eq!(parse_weekday("7"), None);
        assert_eq!(parse_weekday("someday"), None);
    }

    #[test]
    fn test_parse_weekdays() {
        assert_eq!(parse_weekdays("mon,wed,fri"), Some(vec![1, 3, 5]));
        assert_eq!(parse_weekdays("fri, mon, wed"), Some(vec![1, 3, 5]));
        assert_eq!(parse_weekdays("mon,mon"), Some(vec![1]));
        assert_eq!(parse_weekdays("0,6"), Some(vec![0, 6]));
        assert_eq!(parse_weekdays("mon,funday"), None);
        assert_eq!(parse_weekdays(""), None);
    }
}
