//! Text normalisation applied to localised names.

/// Title-case text that arrives entirely in upper case.
///
/// Text containing at least one lower-case letter is returned unchanged.
/// Whitespace between words is preserved.
///
/// # Examples
/// ```
/// use munigeo_core::fix_capitalization;
///
/// assert_eq!(fix_capitalization("VÄSTRA HAMNEN"), "Västra Hamnen");
/// assert_eq!(fix_capitalization("Töölö"), "Töölö");
/// ```
#[must_use]
pub fn fix_capitalization(text: &str) -> String {
    if text.chars().any(char::is_lowercase) {
        return text.to_owned();
    }

    let mut fixed = String::with_capacity(text.len());
    let mut word_start = true;
    for ch in text.chars() {
        if ch.is_whitespace() {
            word_start = true;
            fixed.push(ch);
        } else if word_start {
            word_start = false;
            fixed.extend(ch.to_uppercase());
        } else {
            fixed.extend(ch.to_lowercase());
        }
    }
    fixed
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("HELSINKI", "Helsinki")]
    #[case("VÄSTRA HAMNEN", "Västra Hamnen")]
    #[case("Töölö", "Töölö")]
    #[case("ALPPILA-KALLIO", "Alppila-kallio")]
    #[case("KALLIO  II", "Kallio  Ii")]
    #[case("", "")]
    #[case("123", "123")]
    fn upper_case_text_is_title_cased(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(fix_capitalization(input), expected);
    }

    #[rstest]
    fn mixed_case_is_untouched() {
        assert_eq!(fix_capitalization("pOHJOIS-haaga"), "pOHJOIS-haaga");
    }
}
