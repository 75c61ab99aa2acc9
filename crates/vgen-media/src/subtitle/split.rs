//! Sentence splitting on punctuation.

/// Characters that end a subtitle line, ASCII and full-width.
pub const PUNCTUATIONS: &[char] = &[
    '?', ',', '.', '、', ';', ':', '!', '…', '？', '，', '。', '；', '：', '！',
];

/// Split `text` into trimmed, non-empty sentences.
///
/// Breaks at any punctuation character or newline. Punctuation is dropped. A
/// `.` with ASCII digits on both sides is part of a number and never breaks.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        let is_break = c == '\n' || (PUNCTUATIONS.contains(&c) && !is_decimal_point(&chars, i));
        if is_break {
            push_trimmed(&mut sentences, &current);
            current.clear();
        } else {
            current.push(c);
        }
    }
    push_trimmed(&mut sentences, &current);
    sentences
}

fn is_decimal_point(chars: &[char], i: usize) -> bool {
    chars[i] == '.'
        && i > 0
        && chars[i - 1].is_ascii_digit()
        && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit())
}

fn push_trimmed(out: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ascii() {
        assert_eq!(
            split_sentences("Hello, world. How are you?"),
            vec!["Hello", "world", "How are you"]
        );
    }

    #[test]
    fn test_decimal_point_is_not_a_break() {
        assert_eq!(
            split_sentences("Get a discount 2.5% today. Really."),
            vec!["Get a discount 2.5% today", "Really"]
        );
        // Trailing period after a number still breaks
        assert_eq!(split_sentences("Version 3. Next"), vec!["Version 3", "Next"]);
    }

    #[test]
    fn test_full_width_and_newlines() {
        assert_eq!(
            split_sentences("跑步是一项运动，简单易行。\n坚持下去！"),
            vec!["跑步是一项运动", "简单易行", "坚持下去"]
        );
    }

    #[test]
    fn test_empty_pieces_dropped() {
        assert_eq!(split_sentences("Wait... what?!"), vec!["Wait", "what"]);
        assert!(split_sentences("  ,.;  ").is_empty());
    }
}
