use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::Element;

static XML_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[^\s"']+\.xml"#).expect("xml url pattern is valid")
});

/// Which documents of the master index to keep
#[derive(Debug, Clone, Default)]
pub struct IndexFilter {
    /// Region short codes (atl, ont, pnr, pyr, que), empty keeps every region
    pub regions: Vec<String>,
    /// Keep only the newest N documents, `None` or 0 keeps all
    pub limit: Option<usize>,
}

/// Pulls the absolute `.xml` URLs out of the master index.
///
/// The index is read as XML first; if it doesn't parse, or parses without
/// yielding a single URL, the raw text is scanned with a pattern instead.
/// Duplicates are dropped, first occurrence wins.
pub fn parse_master_list(raw: &[u8]) -> Vec<String> {
    let mut urls: Vec<String> = match Element::parse(raw) {
        Ok(root) => root
            .descendants()
            .filter(|element| looks_like_xml_url(&element.text))
            .map(|element| element.text.clone())
            .collect(),
        Err(_) => Vec::new(),
    };

    if urls.is_empty() {
        let text = String::from_utf8_lossy(raw);
        urls = XML_URL
            .find_iter(&text)
            .map(|found| found.as_str().to_string())
            .collect();
    }

    let mut seen = HashSet::new();
    urls.retain(|url| seen.insert(url.clone()));
    urls
}

fn looks_like_xml_url(text: &str) -> bool {
    text.starts_with("http") && text.to_lowercase().ends_with(".xml")
}

/// Keeps realtime observation documents, optionally limited to some regions,
/// sorted lexically (file names embed their timestamp) and trimmed to the
/// newest `limit` entries.
pub fn filter_realtime_observation_urls(urls: &[String], filter: &IndexFilter) -> Vec<String> {
    let region_segments: Vec<String> = filter
        .regions
        .iter()
        .map(|region| format!("/{}/", region.to_lowercase()))
        .collect();

    let mut kept: Vec<String> = urls
        .iter()
        .filter(|url| {
            let lower = url.to_lowercase();
            lower.contains("observation")
                && lower.contains("realtime")
                && lower.ends_with(".xml")
                && (region_segments.is_empty()
                    || region_segments
                        .iter()
                        .any(|segment| lower.contains(segment.as_str())))
        })
        .cloned()
        .collect();

    kept.sort();
    if let Some(limit) = filter.limit.filter(|limit| *limit > 0) {
        let skip = kept.len().saturating_sub(limit);
        kept.drain(..skip);
    }
    kept
}
