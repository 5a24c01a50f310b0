//! Spoken completion summaries and text clean-up before synthesis

use crate::events::Announcement;
use smallvec::SmallVec;

/// Changes read in full up to this many
pub const MAX_CHANGES: usize = 3;
/// Notes read in full up to this many
pub const MAX_NOTES: usize = 4;
/// Risks read individually up to this many
pub const MAX_RISKS: usize = 2;
/// Items read from a list that is too long
const TRUNCATED_ITEMS: usize = 3;

/// Build the sentence read aloud for an `announce` command.
pub fn compose_announcement(a: &Announcement) -> String {
    let mut out = a.text.clone();

    if !a.changes.is_empty() {
        out.push_str(". ");
        let (read, remaining) = read_list(&a.changes, MAX_CHANGES);
        out.push_str(&join_with_and(&read));
        if remaining > 0 {
            out.push_str(&format!(
                ", and {} more change{}",
                remaining,
                if remaining > 1 { "s" } else { "" }
            ));
        }
    }

    if !a.notes.is_empty() {
        out.push_str(". ");
        let (read, remaining) = read_list(&a.notes, MAX_NOTES);
        out.push_str(&join_with_and(&read));
        if remaining > 0 {
            out.push_str(&format!(
                ". There are {} more important things that need further investigation",
                remaining
            ));
        }
    }

    if !a.risks.is_empty() {
        if a.risks.len() <= MAX_RISKS {
            out.push_str(". However, ");
            let read: SmallVec<[&str; 4]> = a.risks.iter().map(String::as_str).collect();
            out.push_str(&join_with_and(&read));
        } else {
            out.push_str(&format!(
                ". Note: {} potential risks to be aware of",
                a.risks.len()
            ));
        }
    }

    if let Some((first, rest)) = a.next_questions.split_first() {
        out.push_str(". ");
        out.push_str(first);
        for q in rest {
            out.push_str(" Also, ");
            out.push_str(q);
        }
    }

    out
}

/// Items to read aloud and how many were left out.
fn read_list(items: &[String], limit: usize) -> (SmallVec<[&str; 4]>, usize) {
    let take = if items.len() <= limit {
        items.len()
    } else {
        TRUNCATED_ITEMS
    };
    let read = items[..take].iter().map(String::as_str).collect();
    (read, items.len() - take)
}

/// "a", "a, and b", "a, b, and c"
fn join_with_and(items: &[&str]) -> String {
    match items {
        [] => String::new(),
        [only] => (*only).to_string(),
        [init @ .., last] => format!("{}, and {}", init.join(", "), last),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Placement {
    Anywhere,
    /// Only expanded when a number follows ("No. 5")
    BeforeNumber,
    /// May close a sentence; the full stop is kept in that case
    SentenceFinal,
}

struct Abbreviation {
    written: &'static str,
    spoken: &'static str,
    placement: Placement,
}

const fn abbr(written: &'static str, spoken: &'static str, placement: Placement) -> Abbreviation {
    Abbreviation {
        written,
        spoken,
        placement,
    }
}

// Longer forms first so "mrs." wins over "mr.".
const ABBREVIATIONS: &[Abbreviation] = &[
    abbr("prof.", "Professor", Placement::Anywhere),
    abbr("dept.", "Department", Placement::Anywhere),
    abbr("mrs.", "Missus", Placement::Anywhere),
    abbr("e.g.", "for example", Placement::Anywhere),
    abbr("i.e.", "that is", Placement::Anywhere),
    abbr("etc.", "et cetera", Placement::SentenceFinal),
    abbr("ave.", "Avenue", Placement::Anywhere),
    abbr("inc.", "Incorporated", Placement::SentenceFinal),
    abbr("ltd.", "Limited", Placement::SentenceFinal),
    abbr("vs.", "versus", Placement::Anywhere),
    abbr("mr.", "Mister", Placement::Anywhere),
    abbr("ms.", "Miss", Placement::Anywhere),
    abbr("dr.", "Doctor", Placement::Anywhere),
    abbr("sr.", "Senior", Placement::SentenceFinal),
    abbr("jr.", "Junior", Placement::SentenceFinal),
    abbr("no.", "Number", Placement::BeforeNumber),
    abbr("st.", "Street", Placement::Anywhere),
    abbr("co.", "Company", Placement::SentenceFinal),
];

/// Expand abbreviations so the synthesizer reads them as words, and collapse
/// whitespace. Periods that are not part of a known abbreviation are kept.
pub fn format_for_tts(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut prev: Option<char> = None;
    let mut i = 0;

    'scan: while i < text.len() {
        if prev.map_or(true, |c| !c.is_alphanumeric()) {
            for a in ABBREVIATIONS {
                let end = i + a.written.len();
                let Some(candidate) = text.get(i..end) else {
                    continue;
                };
                if !candidate.eq_ignore_ascii_case(a.written) {
                    continue;
                }
                let rest = &text[end..];
                // "co.uk" and "vs.code" are single tokens, not abbreviations
                if rest.starts_with(|c: char| c.is_alphanumeric()) {
                    continue;
                }
                if a.placement == Placement::BeforeNumber
                    && !rest.trim_start().starts_with(|c: char| c.is_ascii_digit())
                {
                    continue;
                }

                out.push_str(a.spoken);
                if a.placement == Placement::SentenceFinal && closes_sentence(rest) {
                    out.push('.');
                }
                prev = Some('.');
                i = end;
                continue 'scan;
            }
        }

        let Some(c) = text[i..].chars().next() else {
            break;
        };
        out.push(c);
        prev = Some(c);
        i += c.len_utf8();
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn closes_sentence(rest: &str) -> bool {
    let trimmed = rest.trim_start();
    trimmed.is_empty()
        || (trimmed.len() < rest.len() && trimmed.starts_with(|c: char| c.is_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_changes(changes: &[&str]) -> Announcement {
        Announcement {
            changes: changes.iter().map(|s| s.to_string()).collect(),
            ..Announcement::new("Done")
        }
    }

    #[test]
    fn test_text_only() {
        assert_eq!(compose_announcement(&Announcement::new("Task completed")), "Task completed");
    }

    #[test]
    fn test_changes_in_full() {
        assert_eq!(compose_announcement(&with_changes(&["a"])), "Done. a");
        assert_eq!(compose_announcement(&with_changes(&["a", "b"])), "Done. a, and b");
        assert_eq!(
            compose_announcement(&with_changes(&["a", "b", "c"])),
            "Done. a, b, and c"
        );
    }

    #[test]
    fn test_changes_truncated() {
        assert_eq!(
            compose_announcement(&with_changes(&["a", "b", "c", "d"])),
            "Done. a, b, and c, and 1 more change"
        );
        assert_eq!(
            compose_announcement(&with_changes(&["a", "b", "c", "d", "e", "f"])),
            "Done. a, b, and c, and 3 more changes"
        );
    }

    #[test]
    fn test_notes() {
        let a = Announcement {
            notes: vec!["n1".into(), "n2".into(), "n3".into(), "n4".into()],
            ..Announcement::new("Analysis done")
        };
        assert_eq!(compose_announcement(&a), "Analysis done. n1, n2, n3, and n4");

        let a = Announcement {
            notes: (1..=6).map(|i| format!("n{}", i)).collect(),
            ..Announcement::new("Analysis done")
        };
        assert_eq!(
            compose_announcement(&a),
            "Analysis done. n1, n2, and n3. There are 3 more important things that need further investigation"
        );
    }

    #[test]
    fn test_risks() {
        let a = Announcement {
            risks: vec!["tests are slow".into(), "the API changed".into()],
            ..Announcement::new("Done")
        };
        assert_eq!(
            compose_announcement(&a),
            "Done. However, tests are slow, and the API changed"
        );

        let a = Announcement {
            risks: vec!["r1".into(), "r2".into(), "r3".into()],
            ..Announcement::new("Done")
        };
        assert_eq!(
            compose_announcement(&a),
            "Done. Note: 3 potential risks to be aware of"
        );
    }

    #[test]
    fn test_full_announcement_order() {
        let a = Announcement {
            text: "Refactor finished".into(),
            changes: vec!["moved the parser".into(), "renamed the config".into()],
            notes: vec!["the cache is unused".into()],
            risks: vec!["one flaky test".into()],
            next_questions: vec!["Should I commit?".into(), "should I push?".into()],
        };
        assert_eq!(
            compose_announcement(&a),
            "Refactor finished. moved the parser, and renamed the config. the cache is unused. \
             However, one flaky test. Should I commit? Also, should I push?"
        );
    }

    #[test]
    fn test_format_expands_abbreviations() {
        assert_eq!(
            format_for_tts("Use a tool, e.g. grep, etc. Then ask Dr. Who"),
            "Use a tool, for example grep, et cetera. Then ask Doctor Who"
        );
        assert_eq!(format_for_tts("I.E. this one"), "that is this one");
        assert_eq!(format_for_tts("Mrs. Hudson and Mr. Holmes"), "Missus Hudson and Mister Holmes");
        assert_eq!(format_for_tts("Built by Acme Inc."), "Built by Acme Incorporated.");
        assert_eq!(format_for_tts("rust vs. go"), "rust versus go");
    }

    #[test]
    fn test_format_number_abbreviation() {
        assert_eq!(format_for_tts("See No. 10 Downing St. now"), "See Number 10 Downing Street now");
        assert_eq!(format_for_tts("I said no. Then left"), "I said no. Then left");
    }

    #[test]
    fn test_format_leaves_other_periods() {
        assert_eq!(format_for_tts("Version 1.2.3 is out."), "Version 1.2.3 is out.");
        assert_eq!(format_for_tts("The first. The last."), "The first. The last.");
        assert_eq!(format_for_tts("a taco. done"), "a taco. done");
    }

    #[test]
    fn test_abbreviation_inside_token_is_kept() {
        assert_eq!(
            format_for_tts("Deployed to example co.uk today"),
            "Deployed to example co.uk today"
        );
        assert_eq!(format_for_tts("Open it in vs.code now"), "Open it in vs.code now");
        assert_eq!(format_for_tts("Ask st.john"), "Ask st.john");
        assert_eq!(format_for_tts("See No.5"), "See No.5");
        assert_eq!(format_for_tts("Ask Dr.(Who)"), "Ask Doctor(Who)");
    }

    #[test]
    fn test_format_collapses_whitespace() {
        assert_eq!(format_for_tts("  one \n\n two\tthree  "), "one two three");
        assert_eq!(format_for_tts(""), "");
    }
}
