//! Channel filter matching with MQTT wildcards.

/// Check whether `topic` matches `filter`.
///
/// `+` matches exactly one level and `#` (last level only) matches any number
/// of remaining levels, including none.
///
/// ```
/// use vemo_publisher::topic_matches;
///
/// assert!(topic_matches("vehicles/+/emission/results", "vehicles/device_1/emission/results"));
/// assert!(topic_matches("vehicle/#", "vehicle/emission/data"));
/// assert!(!topic_matches("vehicle/+", "vehicle/emission/data"));
/// ```
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("vehicle/emission/data", "vehicle/emission/data"));
        assert!(!topic_matches("vehicle/emission/data", "vehicle/emission"));
        assert!(!topic_matches("vehicle/emission", "vehicle/emission/data"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("vehicles/+/data", "vehicles/device7/data"));
        assert!(!topic_matches("vehicles/+/data", "vehicles/a/b/data"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("#", "anything/at/all"));
        assert!(topic_matches("vehicles/#", "vehicles"));
        assert!(topic_matches("vehicles/#", "vehicles/device_0/emission/results"));
        assert!(!topic_matches("vehicles/#/results", "vehicles/x/results"));
    }
}
