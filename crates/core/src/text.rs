//! Persian text normalization applied to every inbound user message before
//! classification, similarity search, or prompt assembly.

const PERSIAN_DIGITS: [char; 10] = ['۰', '۱', '۲', '۳', '۴', '۵', '۶', '۷', '۸', '۹'];
const ARABIC_DIGITS: [char; 10] = ['٠', '١', '٢', '٣', '٤', '٥', '٦', '٧', '٨', '٩'];

/// Arabic-presentation variants that must collapse onto their Persian forms
/// so catalog lookups behave the same regardless of the user's keyboard.
const LETTER_MAP: [(char, char); 8] = [
    ('ي', 'ی'),
    ('ك', 'ک'),
    ('ۀ', 'ه'),
    ('ة', 'ه'),
    ('ؤ', 'و'),
    ('إ', 'ا'),
    ('أ', 'ا'),
    ('آ', 'ا'),
];

const PUNCTUATION_MAP: [(char, char); 3] = [('،', ','), ('؛', ';'), ('؟', '?')];

const TATWEEL: char = 'ـ';

/// Normalize Persian text: digits to ASCII, Arabic letter variants to
/// Persian, Persian punctuation to ASCII, tatweel stripped, whitespace
/// collapsed.
pub fn normalize_persian(text: &str) -> String {
    let mut out = String::with_capacity(text.len());

    for ch in text.chars() {
        if ch == TATWEEL {
            continue;
        }
        if let Some(index) = PERSIAN_DIGITS.iter().position(|d| *d == ch) {
            out.push(char::from(b'0' + index as u8));
            continue;
        }
        if let Some(index) = ARABIC_DIGITS.iter().position(|d| *d == ch) {
            out.push(char::from(b'0' + index as u8));
            continue;
        }
        if let Some((_, replacement)) = LETTER_MAP.iter().find(|(from, _)| *from == ch) {
            out.push(*replacement);
            continue;
        }
        if let Some((_, replacement)) = PUNCTUATION_MAP.iter().find(|(from, _)| *from == ch) {
            out.push(*replacement);
            continue;
        }
        out.push(ch);
    }

    collapse_whitespace(&out)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::normalize_persian;

    #[test]
    fn converts_persian_and_arabic_digits() {
        assert_eq!(normalize_persian("کد ۱۲۳"), "کد 123");
        assert_eq!(normalize_persian("قیمت ٤٥٦"), "قیمت 456");
    }

    #[test]
    fn unifies_arabic_letter_variants() {
        assert_eq!(normalize_persian("كتاب"), "کتاب");
        assert_eq!(normalize_persian("مي خواهم"), "می خواهم");
    }

    #[test]
    fn standardizes_punctuation_and_strips_tatweel() {
        assert_eq!(normalize_persian("سلام، خوبی؟"), "سلام, خوبی?");
        assert_eq!(normalize_persian("میـــز"), "میز");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(normalize_persian("  میز   تحریر \n چوبی "), "میز تحریر چوبی");
    }

    #[test]
    fn plain_ascii_passes_through() {
        assert_eq!(normalize_persian("ping"), "ping");
    }
}
