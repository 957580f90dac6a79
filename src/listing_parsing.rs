use regex::Regex;

lazy_static::lazy_static! {
    static ref REGEX_LISTING_LINK: Regex =
        Regex::new(r#"<a class="js-navigation-open.*?".*?title="(.*?)".*?href="(.*?)".*?>"#)
            .unwrap();
    static ref REGEX_BLOB_PATH: Regex = Regex::new(r"(/.*?/.*?/)blob/(.*$)").unwrap();
}

/// One entry scraped from a repository directory-listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingLink {
    pub title: String,
    pub href: String,
}

/// Scrapes all navigation anchors out of a listing page, in document order.
///
/// This is a textual match against GitHub's current markup, not an HTML
/// parse; if the markup convention changes this yields no entries.
pub fn parse_listing(data: &[u8]) -> Vec<ListingLink> {
    let source = String::from_utf8_lossy(data);
    REGEX_LISTING_LINK
        .captures_iter(&source)
        .map(|cap| ListingLink {
            title: cap[1].to_string(),
            href: cap[2].to_string(),
        })
        .collect()
}

/// GitHub serves subdirectories under `/tree/` and files under `/blob/`.
/// A bare substring check, so a file path containing `tree` elsewhere still
/// classifies as a directory.
pub fn is_tree_path(href: &str) -> bool {
    href.contains("tree")
}

/// Maps a file's listing href (`/owner/repo/blob/<ref>/<path>`) to the URL
/// serving its raw bytes. Returns `None` when the href has no `blob`
/// segment.
pub fn resolve_raw_url(content_host: &str, href: &str) -> Option<String> {
    let cap = REGEX_BLOB_PATH.captures(href)?;
    Some(format!("{content_host}{}{}", &cap[1], &cap[2]))
}

/// Last path segment, ignoring a trailing slash.
pub fn last_segment(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Whether a scraped name is usable as a single local path component.
/// Scraped pages are untrusted; names that could escape the destination
/// directory are rejected.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && name != ".." && !name.contains('/') && !name.contains('\\')
}
