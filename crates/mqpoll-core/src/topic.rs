//! Topic filter matching.

/// Check whether `topic` matches subscription `filter`.
///
/// Levels are split on `/`. `+` matches exactly one level. A trailing `#`
/// matches the rest of the topic, including no levels at all, so
/// `sensor/#` matches `sensor`. A `#` anywhere else is compared literally.
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/').peekable();
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) if filter_levels.peek().is_none() => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
