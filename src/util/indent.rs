//! Removal of common leading indentation from code blocks.
//!
//! Used when inline scripts or multi-line string arguments arrive indented
//! to the nesting depth of the surrounding pipeline definition.

/// Strips the longest common leading whitespace prefix from all non-blank
/// lines of `code`.
///
/// Blank lines do not contribute to the common prefix. If the lines share no
/// common indentation the input is returned unchanged, which makes the
/// operation idempotent: `strip(strip(code)) == strip(code)`.
pub fn strip_leading_indentation(code: &str) -> String {
    fn leading_whitespace(line: &str) -> Option<&str> {
        let end = line.find(|c: char| !matches!(c, ' ' | '\t'))?;
        if line[end..].starts_with('\n') || line[end..].is_empty() {
            // Whitespace-only line.
            return None;
        }
        Some(&line[..end])
    }

    fn common_prefix<'a>(lhs: &'a str, rhs: &str) -> &'a str {
        let len = lhs
            .bytes()
            .zip(rhs.bytes())
            .take_while(|(a, b)| a == b)
            .count();
        &lhs[..len]
    }

    let mut indentation: Option<&str> = None;
    for line in code.split_inclusive('\n') {
        if let Some(indent) = leading_whitespace(line) {
            indentation = Some(match indentation {
                None => indent,
                Some(current) => common_prefix(current, indent),
            });
        }
    }
    let indentation = match indentation {
        Some(i) if !i.is_empty() => i,
        _ => return code.to_string(),
    };
    let mut stripped = String::with_capacity(code.len());
    for line in code.split_inclusive('\n') {
        stripped.push_str(line.strip_prefix(indentation).unwrap_or(line));
    }
    stripped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_common_prefix() {
        let code = "    foo\n      bar\n    baz\n";
        assert_eq!(strip_leading_indentation(code), "foo\n  bar\nbaz\n");
    }

    #[test]
    fn test_no_common_prefix_is_noop() {
        let code = "foo\n  bar\n";
        assert_eq!(strip_leading_indentation(code), code);
    }

    #[test]
    fn test_idempotent() {
        let code = "\t\tif x {\n\t\t\ty()\n\t\t}\n";
        let once = strip_leading_indentation(code);
        let twice = strip_leading_indentation(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_blank_lines_ignored() {
        let code = "  a\n\n  b\n";
        assert_eq!(strip_leading_indentation(code), "a\n\nb\n");
    }

    #[test]
    fn test_mixed_tabs_and_spaces() {
        let code = " \ta\n \t b\n";
        assert_eq!(strip_leading_indentation(code), "a\n b\n");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(strip_leading_indentation(""), "");
    }

    #[test]
    fn test_no_trailing_newline() {
        let code = "  a\n  b";
        assert_eq!(strip_leading_indentation(code), "a\nb");
    }
}
