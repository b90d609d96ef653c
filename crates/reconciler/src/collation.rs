use std::cmp::Ordering;

/// Orders names the way a root-locale collator does for the text the worker
/// produces: letters compare case-insensitively first, then lowercase sorts
/// before uppercase, then the raw strings decide.
pub fn locale_cmp(a: &str, b: &str) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    folded
        .then_with(|| case_rank(a).cmp(&case_rank(b)))
        .then_with(|| a.cmp(b))
}

fn case_rank(s: &str) -> Vec<bool> {
    s.chars().map(char::is_uppercase).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_case_before_anything_else() {
        assert_eq!(locale_cmp("apple", "Banana"), Ordering::Less);
        assert_eq!(locale_cmp("Zeus", "athena"), Ordering::Greater);
    }

    #[test]
    fn lowercase_wins_ties() {
        assert_eq!(locale_cmp("rome", "Rome"), Ordering::Less);
        assert_eq!(locale_cmp("Rome", "Rome"), Ordering::Equal);
    }
}
