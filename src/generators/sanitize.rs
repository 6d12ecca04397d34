// Raw model output → one bounded question

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::constants::MAX_QUESTION_WORDS;

/// Sentence punctuation followed by whitespace.
static SENTENCE_BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"[.!?]\s").unwrap()
});

/// Reduce decoded text to a single question.
///
/// Keeps the first sentence, forces a trailing `?` and caps the result at
/// [`MAX_QUESTION_WORDS`] words. Truncation at the word cap can cut a clause
/// in half; the output is still a single `?`-terminated line.
pub fn sanitize_question(raw: &str) -> String {
    let text = raw.trim();

    // First sentence only; the matched punctuation is a single ASCII byte
    let segment = match SENTENCE_BOUNDARY.find(text) {
        Some(m) => text[..=m.start()].trim(),
        None => text,
    };

    let question = if segment.ends_with('?') {
        segment.to_string()
    } else if let Some(pos) = segment.find('?') {
        segment[..=pos].trim().to_string()
    } else {
        let stem = segment.trim_end_matches(|c: char| c == '.' || c == '!' || c.is_whitespace());
        format!("{}?", stem)
    };

    let words: Vec<&str> = question.split_whitespace().collect();
    if words.len() <= MAX_QUESTION_WORDS {
        return question;
    }

    let mut kept = words[..MAX_QUESTION_WORDS].to_vec();
    if let Some(last) = kept.pop() {
        let stripped = last.trim_end_matches(|c: char| c.is_ascii_punctuation());
        // A punctuation-only word still counts toward the cap
        kept.push(if stripped.is_empty() { last } else { stripped });
    }
    format!("{}?", kept.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_count(s: &str) -> usize {
        s.split_whitespace().count()
    }

    #[test]
    fn test_keeps_first_sentence() {
        assert_eq!(
            sanitize_question("How long have you had this pain? It started yesterday."),
            "How long have you had this pain?"
        );
    }

    #[test]
    fn test_statement_becomes_question() {
        assert_eq!(
            sanitize_question("I think you should rest more."),
            "I think you should rest more?"
        );
    }

    #[test]
    fn test_mid_sentence_gets_single_question_mark() {
        let out = sanitize_question("  Have you noticed any swelling around the");
        assert_eq!(out, "Have you noticed any swelling around the?");
        assert!(out.ends_with('?'));
        assert!(!out.ends_with("??"));
    }

    #[test]
    fn test_embedded_question_mark_truncates() {
        assert_eq!(sanitize_question("Any fever?Also chills"), "Any fever?");
        assert_eq!(sanitize_question("Really?!"), "Really?");
    }

    #[test]
    fn test_trailing_punctuation_replaced() {
        assert_eq!(sanitize_question("Tell me more!!"), "Tell me more?");
        assert_eq!(sanitize_question("Go on. "), "Go on?");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(sanitize_question(""), "?");
        assert_eq!(sanitize_question("   \n"), "?");
    }

    #[test]
    fn test_long_output_capped_at_twenty_words() {
        let raw = (1..=30).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let out = sanitize_question(&raw);
        assert_eq!(word_count(&out), 20);
        assert!(out.ends_with("w20?"));
    }

    #[test]
    fn test_cap_replaces_trailing_punctuation() {
        let mut words: Vec<String> = (1..=19).map(|i| format!("w{}", i)).collect();
        words.push("pain,".to_string());
        words.extend((0..5).map(|_| "more".to_string()));
        let out = sanitize_question(&words.join(" "));
        assert_eq!(word_count(&out), 20);
        assert!(out.ends_with(" pain?"));
    }

    #[test]
    fn test_cap_keeps_punctuation_only_word() {
        for filler in ["-", "--", "*"] {
            let mut words: Vec<String> = (1..=19).map(|i| format!("w{}", i)).collect();
            words.push(filler.to_string());
            words.extend((21..=25).map(|i| format!("w{}", i)));

            let out = sanitize_question(&words.join(" "));
            assert_eq!(word_count(&out), 20, "{}", out);
            assert!(out.ends_with(&format!(" {}?", filler)), "{}", out);
            assert_eq!(sanitize_question(&out), out);
        }
    }

    #[test]
    fn test_only_first_line_sentence_survives() {
        let out = sanitize_question("Where is the pain located?\nDoes it spread to your arm?");
        assert_eq!(out, "Where is the pain located?");
    }

    #[test]
    fn test_is_deterministic_and_idempotent() {
        let inputs = [
            "Do you smoke",
            "How often do you exercise? I ask because",
            "one two three four five six seven eight nine ten eleven twelve thirteen fourteen fifteen sixteen seventeen eighteen nineteen twenty twentyone",
        ];
        for input in inputs {
            let once = sanitize_question(input);
            assert_eq!(once, sanitize_question(input));
            assert_eq!(sanitize_question(&once), once);
            assert!(once.ends_with('?'));
            assert!(word_count(&once) <= MAX_QUESTION_WORDS);
        }
    }
}
