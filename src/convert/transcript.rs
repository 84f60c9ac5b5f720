use std::sync::LazyLock;

use regex::Regex;

// H:MM:SS or MM:SS, optionally bracketed. The trailing \b keeps clock-like
// prose such as "12:30pm" intact.
static TIMESTAMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[?\b\d{1,2}:\d{2}(?::\d{2})?\b\]?").unwrap());

// Speaker label at the start of an utterance: up to three capitalized tokens,
// or the generic "Speaker N" / "Host" / "Guest" forms, followed by a colon.
static SPEAKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:[A-Z][A-Za-z'.-]*\s+){0,2}[A-Z][A-Za-z'.-]*|[Ss]peaker\s*\d+|[Hh]ost|[Gg]uest)\s*:\s*")
        .unwrap()
});

/// Clean a raw transcript block into prose paragraphs.
///
/// Timestamps and speaker labels are removed; the utterance text itself is
/// never altered. Consecutive cleaned lines merge into one paragraph; blank
/// lines separate paragraphs.
pub fn clean_transcript(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<String> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
            continue;
        }
        let cleaned = clean_line(line);
        if !cleaned.is_empty() {
            current.push(cleaned);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }
    paragraphs
}

/// Line-level scrub for cleanup-only reprocessing of exported files: same
/// marker removal as [`clean_transcript`], but line structure is preserved.
pub fn scrub_lines(text: &str) -> String {
    text.lines()
        .map(clean_line)
        .collect::<Vec<_>>()
        .join("\n")
}

// Timestamps mark utterance boundaries; a speaker label is only stripped at
// the start of an utterance (line start or right after a timestamp).
fn clean_line(line: &str) -> String {
    let marked = TIMESTAMP_RE.replace_all(line, "\u{1}");
    let segments: Vec<String> = marked
        .split('\u{1}')
        .map(|seg| SPEAKER_RE.replace(seg.trim(), "").trim().to_string())
        .filter(|seg| !seg.is_empty())
        .collect();
    segments.join(" ")
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_inline_timestamps_and_speakers() {
        let got = clean_transcript("0:42 Alice: Hello there. 0:45 Bob: Hi!");
        assert_eq!(got, vec!["Hello there. Hi!".to_string()]);
    }

    #[test]
    fn timestamp_only_lines_do_not_break_utterances() {
        let got = clean_transcript("[0:05]\nWelcome back everyone.\n1:10\nto the show.");
        assert_eq!(got, vec!["Welcome back everyone. to the show.".to_string()]);
    }

    #[test]
    fn blank_lines_separate_paragraphs() {
        let got = clean_transcript("Host: First thought.\n\nGuest: Second thought.");
        assert_eq!(
            got,
            vec!["First thought.".to_string(), "Second thought.".to_string()]
        );
    }

    #[test]
    fn hour_long_timestamps() {
        let got = clean_transcript("1:02:33 Dave Shapiro: Deep into the episode.");
        assert_eq!(got, vec!["Deep into the episode.".to_string()]);
    }

    #[test]
    fn clock_prose_is_untouched() {
        let got = clean_transcript("We met at 12:30pm near the office.");
        assert_eq!(got, vec!["We met at 12:30pm near the office.".to_string()]);
    }

    #[test]
    fn mid_sentence_names_are_kept() {
        let got = clean_transcript("And then I told Bob: never again.");
        // "And then I told Bob" is four tokens with lowercase words, so the
        // speaker pattern must not fire mid-utterance.
        assert_eq!(got, vec!["And then I told Bob: never again.".to_string()]);
    }

    #[test]
    fn scrub_preserves_line_structure() {
        let got = scrub_lines("0:10 Alice: one\ntwo\n\n0:20 Bob: three");
        assert_eq!(got, "one\ntwo\n\nthree");
    }
}
