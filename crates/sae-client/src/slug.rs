use rand::Rng;
use rand::distr::Alphanumeric;

/// Fallback when a name has no usable characters.
pub const EMPTY_SLUG: &str = "startup";

/// Lowercase, collapse every run of non-alphanumerics into one hyphen and trim
/// hyphens from both ends.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    if slug.is_empty() { EMPTY_SLUG.to_string() } else { slug }
}

/// `-<unix millis>-<6 random lowercase alphanumerics>`
pub fn unique_suffix() -> String {
    let random: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("-{}-{}", chrono::Utc::now().timestamp_millis(), random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_and_trims() {
        assert_eq!(slugify("Acme Rockets"), "acme-rockets");
        assert_eq!(slugify("  --Hello,   World!!  "), "hello-world");
        assert_eq!(slugify("a__b"), "a-b");
        assert_eq!(slugify("Café 24/7"), "café-24-7");
    }

    #[test]
    fn empty_names_get_a_fallback() {
        assert_eq!(slugify("!!!"), EMPTY_SLUG);
        assert_eq!(slugify(""), EMPTY_SLUG);
    }

    #[test]
    fn suffix_shape() {
        let suffix = unique_suffix();
        let parts: Vec<&str> = suffix.trim_start_matches('-').split('-').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].parse::<i64>().is_ok());
        assert_eq!(parts[1].len(), 6);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(unique_suffix(), unique_suffix());
    }
}
