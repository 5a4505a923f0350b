/// Maps a title to a single filesystem-safe path segment.
///
/// Every reserved character becomes `_`, then only the first whitespace
/// character is removed. Existing progress files were written with exactly
/// this mapping, so paths recorded by earlier runs keep resolving.
pub fn sanitize(title: &str) -> String {
    let mut out: String = title
        .chars()
        .map(|ch| if is_reserved(ch) { '_' } else { ch })
        .collect();

    if let Some((idx, ch)) = out.char_indices().find(|(_, ch)| ch.is_whitespace()) {
        out.replace_range(idx..idx + ch.len_utf8(), "");
    }
    out
}

fn is_reserved(ch: char) -> bool {
    matches!(
        ch,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\n' | '\r'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_reserved_characters() {
        assert_eq!(sanitize(r#"a/b\c:d*e?f"g<h>i|j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize("line\r\nbreak"), "line__break");
    }

    #[test]
    fn strips_only_the_first_whitespace() {
        assert_eq!(sanitize("Getting Started Guide"), "GettingStarted Guide");
        assert_eq!(sanitize(" leading and inner"), "leading and inner");
        assert_eq!(sanitize("tab\there too"), "tabthere too");
    }

    #[test]
    fn reserved_newline_is_not_counted_as_whitespace() {
        assert_eq!(sanitize("a\nb c"), "a_bc");
    }

    #[test]
    fn empty_and_plain_titles() {
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("Plain"), "Plain");
        assert_eq!(sanitize("全角　スペース"), "全角スペース");
    }
}
