use regex::Regex;

/// Glob-then-regex pattern match (spec.md §4.4): a pattern built only from
/// `*`/`?` is treated as a glob, anything else as a regex. Both forms are
/// case-insensitive. `*` alone always matches, including against an absent
/// field (callers pass `""` for `None`).
pub fn pattern_matches(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if value.is_empty() {
        return false;
    }
    if is_glob(pattern) {
        glob_matches(pattern, value)
    } else {
        Regex::new(&format!("(?i){pattern}"))
            .map(|re| re.is_match(value))
            .unwrap_or(false)
    }
}

fn is_glob(pattern: &str) -> bool {
    pattern.chars().all(|c| c.is_alphanumeric() || c == '*' || c == '?' || c == '-' || c == '_' || c == '.')
}

fn glob_matches(pattern: &str, value: &str) -> bool {
    let mut regex = String::from("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    Regex::new(&regex).map(|re| re.is_match(value)).unwrap_or(false)
}
