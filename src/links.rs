/// Find the first HTTP/HTTPS link in message text.
///
/// Returns the maximal run of non-whitespace characters starting at the first
/// `http://` or `https://` occurrence. No validation beyond the scheme prefix;
/// whatever the sender typed up to the next whitespace is what gets handed to
/// the downloader.
pub fn extract_link(text: &str) -> Option<&str> {
    let start = match (text.find("http://"), text.find("https://")) {
        (Some(plain), Some(tls)) => plain.min(tls),
        (Some(plain), None) => plain,
        (None, Some(tls)) => tls,
        (None, None) => return None,
    };

    let rest = &text[start..];
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_link() {
        assert_eq!(
            extract_link("check https://example.com for info"),
            Some("https://example.com")
        );
    }

    #[test]
    fn first_of_multiple_wins() {
        assert_eq!(
            extract_link("visit https://a.com and http://b.org today"),
            Some("https://a.com")
        );
        assert_eq!(
            extract_link("visit http://b.org and https://a.com today"),
            Some("http://b.org")
        );
    }

    #[test]
    fn token_runs_to_whitespace() {
        assert_eq!(
            extract_link("https://example.com/watch?v=abc#t=3 rest"),
            Some("https://example.com/watch?v=abc#t=3")
        );
        assert_eq!(
            extract_link("wrapped <https://example.com> here"),
            Some("https://example.com>")
        );
    }

    #[test]
    fn link_at_start_and_end() {
        assert_eq!(extract_link("https://a.com"), Some("https://a.com"));
        assert_eq!(extract_link("grab this: http://a.com"), Some("http://a.com"));
    }

    #[test]
    fn scheme_mid_word_still_matches() {
        assert_eq!(extract_link("seehttps://a.com now"), Some("https://a.com"));
    }

    #[test]
    fn no_link() {
        assert_eq!(extract_link("just some regular text with no links"), None);
        assert_eq!(extract_link(""), None);
    }

    #[test]
    fn scheme_prefix_alone_is_not_a_match() {
        assert_eq!(extract_link("the http protocol"), None);
        assert_eq!(extract_link("https:/ /broken"), None);
    }

    #[test]
    fn non_http_schemes_ignored() {
        assert_eq!(extract_link("ftp://files.example.com"), None);
        assert_eq!(extract_link("mailto:user@example.com"), None);
    }

    #[test]
    fn newline_terminates_token() {
        assert_eq!(
            extract_link("line one https://a.com\nline two"),
            Some("https://a.com")
        );
    }
}
