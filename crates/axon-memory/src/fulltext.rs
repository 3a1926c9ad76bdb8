//! Keyword extraction and scoring for full-text search.
//!
//! Keyword classes:
//! - lowercase contiguous ASCII-letter runs of length ≥ 2
//! - all 2-grams of CJK code point runs, plus 3-grams when the text
//!   contains at least 4 CJK characters
//! - digit runs of length ≥ 2
//!
//! A candidate's score is the sum of substring occurrences of each keyword
//! in its (lowercased) content.

/// Minimum length for letter and digit keywords.
const MIN_RUN_LEN: usize = 2;
/// CJK character count that enables 3-gram extraction.
const CJK_TRIGRAM_MIN: usize = 4;

/// Extract search keywords from a query, deduplicated in first-seen order.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    let mut push = |kw: String| {
        if !keywords.contains(&kw) {
            keywords.push(kw);
        }
    };

    let total_cjk = text.chars().filter(|c| is_cjk(*c)).count();

    let mut letters = String::new();
    let mut digits = String::new();
    let mut cjk_run: Vec<char> = Vec::new();

    let flush_letters = |buf: &mut String, push: &mut dyn FnMut(String)| {
        if buf.chars().count() >= MIN_RUN_LEN {
            push(buf.to_ascii_lowercase());
        }
        buf.clear();
    };
    let flush_digits = |buf: &mut String, push: &mut dyn FnMut(String)| {
        if buf.chars().count() >= MIN_RUN_LEN {
            push(buf.clone());
        }
        buf.clear();
    };
    let flush_cjk = |run: &mut Vec<char>, push: &mut dyn FnMut(String)| {
        for window in run.windows(2) {
            push(window.iter().collect());
        }
        if total_cjk >= CJK_TRIGRAM_MIN {
            for window in run.windows(3) {
                push(window.iter().collect());
            }
        }
        run.clear();
    };

    for c in text.chars() {
        if c.is_ascii_alphabetic() {
            flush_digits(&mut digits, &mut push);
            flush_cjk(&mut cjk_run, &mut push);
            letters.push(c);
        } else if c.is_ascii_digit() {
            flush_letters(&mut letters, &mut push);
            flush_cjk(&mut cjk_run, &mut push);
            digits.push(c);
        } else if is_cjk(c) {
            flush_letters(&mut letters, &mut push);
            flush_digits(&mut digits, &mut push);
            cjk_run.push(c);
        } else {
            flush_letters(&mut letters, &mut push);
            flush_digits(&mut digits, &mut push);
            flush_cjk(&mut cjk_run, &mut push);
        }
    }
    flush_letters(&mut letters, &mut push);
    flush_digits(&mut digits, &mut push);
    flush_cjk(&mut cjk_run, &mut push);

    keywords
}

/// Sum of (non-overlapping) occurrences of each keyword in `content`.
///
/// Matching is case-insensitive for ASCII keywords.
pub fn score_content(content: &str, keywords: &[String]) -> u32 {
    if keywords.is_empty() {
        return 0;
    }
    let haystack = content.to_lowercase();
    keywords
        .iter()
        .map(|kw| haystack.matches(kw.as_str()).count() as u32)
        .sum()
}

/// CJK Unified Ideographs (base block, extension A, compatibility block).
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{F900}'..='\u{FAFF}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_runs_are_lowercased_and_filtered() {
        let kws = extract_keywords("Dark Theme v2 a");
        assert!(kws.contains(&"dark".to_string()));
        assert!(kws.contains(&"theme".to_string()));
        // single letters are dropped, single digit too
        assert!(!kws.contains(&"a".to_string()));
        assert!(!kws.contains(&"v".to_string()));
        assert!(!kws.contains(&"2".to_string()));
    }

    #[test]
    fn digit_runs_of_two_or_more_are_kept() {
        let kws = extract_keywords("order 12345 from 2026");
        assert!(kws.contains(&"12345".to_string()));
        assert!(kws.contains(&"2026".to_string()));
    }

    #[test]
    fn cjk_bigrams_always_extracted() {
        let kws = extract_keywords("你好");
        assert_eq!(kws, vec!["你好".to_string()]);
    }

    #[test]
    fn cjk_trigrams_only_with_four_or_more_chars() {
        // three CJK chars: bigrams only
        let kws = extract_keywords("深色模");
        assert!(kws.contains(&"深色".to_string()));
        assert!(kws.contains(&"色模".to_string()));
        assert!(!kws.iter().any(|k| k.chars().count() == 3));

        // four CJK chars: trigrams join in
        let kws = extract_keywords("深色模式");
        assert!(kws.contains(&"深色模".to_string()));
        assert!(kws.contains(&"色模式".to_string()));
    }

    #[test]
    fn mixed_script_query() {
        let kws = extract_keywords("把theme换成深色模式123");
        assert!(kws.contains(&"theme".to_string()));
        assert!(kws.contains(&"123".to_string()));
        assert!(kws.contains(&"深色".to_string()));
    }

    #[test]
    fn duplicates_are_removed() {
        let kws = extract_keywords("theme theme theme");
        assert_eq!(kws, vec!["theme".to_string()]);
    }

    #[test]
    fn scoring_counts_occurrences() {
        let kws = extract_keywords("dark theme");
        let score = score_content("the Dark theme is a dark look", &kws);
        // "dark" twice + "theme" once
        assert_eq!(score, 3);
    }

    #[test]
    fn scoring_empty_keywords_is_zero() {
        assert_eq!(score_content("anything", &[]), 0);
    }
}
