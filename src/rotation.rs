use crate::ledger::CategoryUsage;

use chrono::{Datelike, Duration, NaiveDate};
use std::collections::HashMap;

/// Pick the discovery category for a run.
///
/// An explicit override always wins. Otherwise categories unused within the
/// cooldown window are eligible and the pick is derived from the calendar
/// day, so a rerun on the same day selects the same category. When every
/// category is cooling down, the least-recently-used one is returned anyway:
/// having something to crawl beats strict cooldown adherence.
pub fn next_category(
    categories: &[String],
    usage: &[CategoryUsage],
    cooldown_days: u32,
    today: NaiveDate,
    override_category: Option<&str>,
) -> anyhow::Result<String> {
    if let Some(forced) = override_category {
        log::info!("Using category override: {forced}");
        return Ok(forced.to_string());
    }
    if categories.is_empty() {
        anyhow::bail!("Category list is empty; nothing to crawl");
    }

    let mut last_used: HashMap<&str, NaiveDate> = HashMap::new();
    for row in usage {
        last_used
            .entry(row.category.as_str())
            .and_modify(|d| {
                if row.day > *d {
                    *d = row.day;
                }
            })
            .or_insert(row.day);
    }

    let window_start = today - Duration::days(cooldown_days as i64);
    let eligible: Vec<&String> = categories
        .iter()
        .filter(|c| match last_used.get(c.as_str()) {
            Some(day) => *day <= window_start,
            None => true,
        })
        .collect();

    if !eligible.is_empty() {
        let idx = today.num_days_from_ce() as usize % eligible.len();
        return Ok(eligible[idx].clone());
    }

    // Everything is in cooldown; take the least-recently-used, roster order
    // breaking ties.
    let fallback = categories
        .iter()
        .min_by_key(|c| last_used.get(c.as_str()).copied().unwrap_or(NaiveDate::MIN))
        .expect("categories checked non-empty");
    log::warn!("All categories in cooldown; falling back to LRU: {fallback}");
    Ok(fallback.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cats(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn used(category: &str, day: NaiveDate) -> CategoryUsage {
        CategoryUsage {
            category: category.to_string(),
            day,
            domains_found: 10,
            domains_new: 5,
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_override_bypasses_cooldown() {
        let today = day(2025, 6, 10);
        let usage = vec![used("plumber", today)];
        let picked = next_category(&cats(&["plumber"]), &usage, 7, today, Some("plumber")).unwrap();
        assert_eq!(picked, "plumber");
    }

    #[test]
    fn test_same_day_pick_is_deterministic() {
        let today = day(2025, 6, 10);
        let categories = cats(&["plumber", "dentist", "florist"]);
        let a = next_category(&categories, &[], 7, today, None).unwrap();
        let b = next_category(&categories, &[], 7, today, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_recently_used_categories_excluded() {
        let today = day(2025, 6, 10);
        let categories = cats(&["plumber", "dentist"]);
        let usage = vec![used("plumber", day(2025, 6, 8))];
        for _ in 0..3 {
            let picked = next_category(&categories, &usage, 7, today, None).unwrap();
            assert_eq!(picked, "dentist");
        }
    }

    #[test]
    fn test_usage_outside_window_is_eligible_again() {
        let today = day(2025, 6, 10);
        let categories = cats(&["plumber"]);
        let usage = vec![used("plumber", day(2025, 6, 1))];
        let picked = next_category(&categories, &usage, 7, today, None).unwrap();
        assert_eq!(picked, "plumber");
    }

    #[test]
    fn test_all_in_cooldown_falls_back_to_lru() {
        let today = day(2025, 6, 10);
        let categories = cats(&["plumber", "dentist", "florist"]);
        let usage = vec![
            used("plumber", day(2025, 6, 7)),
            used("dentist", day(2025, 6, 5)),
            used("florist", day(2025, 6, 9)),
        ];
        let picked = next_category(&categories, &usage, 7, today, None).unwrap();
        assert_eq!(picked, "dentist");
    }

    #[test]
    fn test_empty_category_list_is_an_error() {
        let today = day(2025, 6, 10);
        assert!(next_category(&[], &[], 7, today, None).is_err());
    }
}
