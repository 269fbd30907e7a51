//! Pull simulation parameters out of the model's free-text answers.

use std::sync::LazyLock;

use regex::Regex;

static TEMPERATURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*(?:K|[Kk]elvins?)\b").expect("temperature pattern is valid"));

static DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*ns\b").expect("duration pattern is valid"));

fn positive(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

/// First positive `<number> K` (or `<number> Kelvin`) in `text`.
pub fn extract_temperature(text: &str) -> Option<f64> {
    TEMPERATURE
        .captures_iter(text)
        .find_map(|c| positive(&c[1]))
}

/// Last positive `<number> ns` in `text`. Answers tend to discuss longer runs
/// before settling on the chosen one.
pub fn extract_duration(text: &str) -> Option<f64> {
    DURATION
        .captures_iter(text)
        .filter_map(|c| positive(&c[1]))
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_takes_first_match() {
        assert_eq!(extract_temperature("I suggest 310 K, close to 37 C. Not 300 K."), Some(310.0));
        assert_eq!(extract_temperature("Use 298.15K for standard conditions."), Some(298.15));
        assert_eq!(extract_temperature("Room temperature is fine."), None);
        assert_eq!(extract_temperature("310 KJ/mol"), None);
        assert_eq!(extract_temperature("0 K would freeze it; use 300 K"), Some(300.0));
        assert_eq!(
            extract_temperature("I recommend 300 Kelvin, close to room temperature."),
            Some(300.0)
        );
        assert_eq!(extract_temperature("Simulate at 310 kelvins."), Some(310.0));
        assert_eq!(extract_temperature("310 Kelvinator"), None);
    }

    #[test]
    fn duration_takes_last_match() {
        assert_eq!(
            extract_duration("A full study needs 100 ns, but here 0.5 ns is enough."),
            Some(0.5)
        );
        assert_eq!(extract_duration("Run for 0.1ns."), Some(0.1));
        assert_eq!(extract_duration("about a nanosecond"), None);
        assert_eq!(extract_duration("10 nsteps"), None);
    }
}
