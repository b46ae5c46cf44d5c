//! Deterministic text chunking.
//!
//! Splitting is pure: the same text and settings always produce the same
//! chunks, which is what makes re-running the chunk stage idempotent.
//!
//! Text is divided along paragraph boundaries first, then sentences, then
//! hard character cuts for anything still too large. Consecutive chunks
//! share a configurable character overlap so retrieval does not lose
//! context at chunk edges.

/// A single chunk of document text
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub index: usize,
    pub text: String,
}

struct Unit {
    text: String,
    /// Whether this unit started a new paragraph in the source text
    paragraph_break: bool,
}

/// Split text into overlapping chunks of at most `max_chunk_chars` characters.
///
/// `overlap_chars` is clamped below `max_chunk_chars`; each chunk after the
/// first begins with the trailing overlap of the previous chunk. Chunk
/// indices are contiguous starting at zero.
pub fn chunk(text: &str, max_chunk_chars: usize, overlap_chars: usize) -> Vec<ChunkSpan> {
    let text = text.trim();
    if text.is_empty() || max_chunk_chars == 0 {
        return Vec::new();
    }

    let overlap = overlap_chars.min(max_chunk_chars - 1);
    // Room left for fresh content once the overlap prefix is in place
    let budget = max_chunk_chars - overlap;

    let units = split_units(text, budget);

    let mut bodies: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut units_in_current = 0usize;

    for unit in units {
        let joiner = if units_in_current == 0 {
            ""
        } else if unit.paragraph_break {
            "\n\n"
        } else {
            " "
        };

        let added = char_len(joiner) + char_len(&unit.text);
        if units_in_current > 0 && char_len(&current) + added > max_chunk_chars {
            let finished = std::mem::take(&mut current);
            current = tail_chars(&finished, overlap);
            bodies.push(finished);
            units_in_current = 0;
            // Prefix plus one unit always fits: units are capped at budget
            current.push_str(&unit.text);
        } else {
            current.push_str(joiner);
            current.push_str(&unit.text);
        }
        units_in_current += 1;
    }

    if units_in_current > 0 {
        bodies.push(current);
    }

    bodies
        .into_iter()
        .enumerate()
        .map(|(index, text)| ChunkSpan { index, text })
        .collect()
}

/// Break text into units no larger than `budget` characters.
/// Paragraphs that fit stay whole; otherwise sentences; otherwise hard cuts.
fn split_units(text: &str, budget: usize) -> Vec<Unit> {
    let mut units = Vec::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        let mut first_in_paragraph = true;
        let mut push = |piece: &str, units: &mut Vec<Unit>| {
            let paragraph_break = first_in_paragraph && !units.is_empty();
            units.push(Unit {
                text: piece.to_string(),
                paragraph_break,
            });
            first_in_paragraph = false;
        };

        if char_len(paragraph) <= budget {
            push(paragraph, &mut units);
            continue;
        }

        for sentence in split_sentences(paragraph) {
            if char_len(sentence) <= budget {
                push(sentence, &mut units);
            } else {
                for piece in hard_cut(sentence, budget) {
                    push(&piece, &mut units);
                }
            }
        }
    }

    units
}

/// Split a paragraph into sentences at `.`, `!`, or `?` followed by whitespace
fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev_terminator = false;

    for (pos, c) in paragraph.char_indices() {
        if prev_terminator && c.is_whitespace() {
            let sentence = paragraph[start..pos].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = pos;
        }
        prev_terminator = matches!(c, '.' | '!' | '?');
    }

    let tail = paragraph[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

/// Cut text into pieces of at most `budget` characters
fn hard_cut(text: &str, budget: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(budget.max(1))
        .map(|piece| piece.iter().collect())
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of a string
fn tail_chars(s: &str, n: usize) -> String {
    let len = char_len(s);
    s.chars().skip(len.saturating_sub(n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunk("", 100, 20).is_empty());
        assert!(chunk("   \n\n  ", 100, 20).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk("just a short note", 100, 20);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "just a short note");
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let text = "First paragraph with some words.\n\nSecond paragraph here. \
                    It has two sentences.\n\nThird paragraph closes things out.";
        let a = chunk(text, 60, 10);
        let b = chunk(text, 60, 10);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_indices_are_contiguous_from_zero() {
        let text = "word ".repeat(200);
        let chunks = chunk(&text, 50, 10);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn test_chunks_respect_max_size() {
        let text = "Sentences vary in length. Some are short. Others ramble on \
                    for quite a while before arriving at any sort of point at all. \
                    Tiny one. And then another moderately sized sentence follows."
            .repeat(5);
        for c in chunk(&text, 80, 15) {
            assert!(
                c.text.chars().count() <= 80,
                "chunk {} has {} chars",
                c.index,
                c.text.chars().count()
            );
        }
    }

    #[test]
    fn test_overlap_prefix_matches_previous_chunk() {
        let text = "Alpha bravo charlie delta echo foxtrot golf hotel india \
                    juliett kilo lima mike november oscar papa quebec romeo \
                    sierra tango uniform victor whiskey xray yankee zulu.";
        let overlap = 20;
        let chunks = chunk(text, 60, overlap);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let expected = tail_chars(&pair[0].text, overlap);
            assert!(
                pair[1].text.starts_with(&expected),
                "chunk {} does not start with overlap of chunk {}",
                pair[1].index,
                pair[0].index
            );
        }
    }

    #[test]
    fn test_zero_overlap_has_no_prefix() {
        let text = "one two three four five six seven eight nine ten ".repeat(10);
        let chunks = chunk(&text, 50, 0);
        assert!(chunks.len() > 1);
        // With no overlap the concatenation loses nothing but joiners
        for c in &chunks {
            assert!(c.text.chars().count() <= 50);
        }
    }

    #[test]
    fn test_three_paragraphs_max_100_overlap_20() {
        let text = "The first paragraph describes the setting in a moderate amount of words for testing.\n\n\
                    The second paragraph continues the discussion and adds further detail to the body.\n\n\
                    The third paragraph concludes the document with a final remark of similar length.";
        let chunks = chunk(text, 100, 20);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 100);
        }
        for pair in chunks.windows(2) {
            let expected = tail_chars(&pair[0].text, 20);
            assert!(pair[1].text.starts_with(&expected));
        }
        // Identical input, identical output
        assert_eq!(chunks, chunk(text, 100, 20));
    }

    #[test]
    fn test_oversized_token_is_hard_cut() {
        let text = "x".repeat(500);
        let chunks = chunk(&text, 100, 20);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 100);
        }
        // All 500 characters survive, counting each chunk's fresh content
        let total: usize = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| {
                if i == 0 {
                    c.text.chars().count()
                } else {
                    c.text.chars().count() - 20
                }
            })
            .sum();
        assert_eq!(total, 500);
    }

    #[test]
    fn test_overlap_clamped_below_max() {
        // Overlap larger than max must not panic or loop
        let text = "some words repeated ".repeat(20);
        let chunks = chunk(&text, 30, 500);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.text.chars().count() <= 30);
        }
    }

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("One. Two! Three? Four");
        assert_eq!(sentences, vec!["One.", "Two!", "Three?", "Four"]);
    }

    #[test]
    fn test_unicode_boundaries() {
        let text = "héllo wörld ünïcode ".repeat(30);
        let chunks = chunk(&text, 40, 8);
        for c in &chunks {
            assert!(c.text.chars().count() <= 40);
        }
    }
}
