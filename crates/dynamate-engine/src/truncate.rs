/// Characters kept from each end of a long tool output.
pub const DEFAULT_EDGE_CHARS: usize = 5000;

/// Placed between the kept head and tail.
pub const ELISION_MARKER: &str = "... truncated ...";

/// Keep the first and last `edge` characters of `output` when it is longer than
/// `2 * edge`. Output already in truncated shape is returned unchanged.
pub fn truncate_output(output: &str, edge: usize) -> String {
    let chars = output.chars().count();
    if chars <= 2 * edge || is_truncated(output, chars, edge) {
        return output.to_string();
    }
    let head: String = output.chars().take(edge).collect();
    let tail: String = output.chars().skip(chars - edge).collect();
    format!("{head}{ELISION_MARKER}{tail}")
}

fn is_truncated(output: &str, chars: usize, edge: usize) -> bool {
    if chars != 2 * edge + ELISION_MARKER.chars().count() {
        return false;
    }
    output
        .char_indices()
        .nth(edge)
        .is_some_and(|(at, _)| output[at..].starts_with(ELISION_MARKER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_untouched() {
        assert_eq!(truncate_output("hello", 5000), "hello");
        assert_eq!(truncate_output("", 5000), "");
    }

    #[test]
    fn exact_double_bound_untouched() {
        let input = "a".repeat(10_000);
        assert_eq!(truncate_output(&input, 5000), input);
    }

    #[test]
    fn twelve_thousand_chars_keep_both_edges() {
        let input = format!("{}{}{}", "h".repeat(5000), "m".repeat(2000), "t".repeat(5000));
        let out = truncate_output(&input, DEFAULT_EDGE_CHARS);
        assert_eq!(out, format!("{}{ELISION_MARKER}{}", "h".repeat(5000), "t".repeat(5000)));
        assert!(!out.contains('m'));
    }

    #[test]
    fn truncating_twice_is_a_no_op() {
        let input = "x".repeat(12_000);
        let once = truncate_output(&input, 5000);
        assert_eq!(truncate_output(&once, 5000), once);
    }

    #[test]
    fn multibyte_characters_are_not_split() {
        let input = "é".repeat(30);
        let out = truncate_output(&input, 10);
        assert_eq!(out, format!("{}{ELISION_MARKER}{}", "é".repeat(10), "é".repeat(10)));
    }

    #[test]
    fn marker_elsewhere_still_truncates() {
        let input = format!("{ELISION_MARKER}{}", "y".repeat(40));
        let out = truncate_output(&input, 10);
        assert!(out.ends_with(&"y".repeat(10)));
        assert_eq!(out.chars().count(), 20 + ELISION_MARKER.chars().count());
    }
}
