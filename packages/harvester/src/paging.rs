//! Page URL sequencing for sources that page through query parameters.
//!
//! A paged source URL carries a page-size and a page-from parameter, e.g.
//! `https://example.org/api/search?rows=10&start=0`. Together with the total
//! number of records reported by the first response, these give the list of
//! URLs to fetch.

use crate::config::MAX_PAGES;

/// Build the ordered list of page URLs for `url`.
///
/// Falls back to the single original URL when paging is not configured, when
/// either parameter is missing or non-numeric in the URL, when the page size
/// is zero, when the total record count is unknown or zero, or when it would
/// need more than [`MAX_PAGES`] pages. The from-value
/// found in the URL decides between 0-based (`0`) and 1-based paging.
///
/// # Examples
/// ```
/// use simpleurl_harvester::paging::sequence;
///
/// let pages = sequence("https://example.org/api?from=0&size=10", Some("size"), Some("from"), Some(25));
/// assert_eq!(pages, vec![
///     "https://example.org/api?from=0&size=10",
///     "https://example.org/api?from=10&size=10",
///     "https://example.org/api?from=20&size=5",
/// ]);
/// ```
#[must_use]
pub fn sequence(
    url: &str,
    size_param: Option<&str>,
    from_param: Option<&str>,
    total: Option<u64>,
) -> Vec<String> {
    let single = || vec![url.to_string()];

    let Some(size_param) = size_param.filter(|p| !p.is_empty()) else {
        return single();
    };

    let Some(page_size) = query_value(url, size_param).and_then(parse_numeric) else {
        tracing::warn!(
            param = size_param,
            url,
            "Page size param not found or not numeric, can't build a list of pages"
        );
        return single();
    };
    if page_size == 0 {
        tracing::warn!(param = size_param, url, "Page size is zero, can't build a list of pages");
        return single();
    }

    let Some(from_param) = from_param.filter(|p| !p.is_empty()) else {
        tracing::warn!(url, "Page from param not configured, can't build a list of pages");
        return single();
    };
    let Some(from_value) = query_value(url, from_param).and_then(parse_numeric) else {
        tracing::warn!(
            param = from_param,
            url,
            "Page from param not found or not numeric, can't build a list of pages"
        );
        return single();
    };

    let total = match total {
        Some(total) if total > 0 => total,
        _ => {
            tracing::debug!(url, "Total record count unknown, harvesting a single page");
            return single();
        }
    };

    let start_at_zero = from_value == 0;
    let first = u64::from(!start_at_zero);
    let page_count = ((total - first) / page_size).checked_add(1);
    let Some(page_count) = page_count.filter(|count| *count <= MAX_PAGES) else {
        tracing::warn!(
            url,
            total,
            page_size,
            max_pages = MAX_PAGES,
            "Too many pages, harvesting a single page"
        );
        return single();
    };

    let mut pages = Vec::new();
    for i in 0..page_count {
        // i * page_size never exceeds total - first
        let from = i * page_size + first;
        let size = if i == page_count - 1 {
            (total - from).saturating_add(first)
        } else {
            page_size
        };
        // 1-based paging over an exact multiple leaves an empty last page
        if size == 0 {
            continue;
        }
        pages.push(replace_query_values(
            url,
            &[(from_param, from), (size_param, size)],
        ));
    }

    tracing::debug!(url, pages = pages.len(), total, page_size, "Built page sequence");
    pages
}

/// Get the raw value of the first query parameter called `name`.
#[must_use]
pub fn query_value<'u>(url: &'u str, name: &str) -> Option<&'u str> {
    let (_, rest) = url.split_once('?')?;
    let query = rest.split('#').next().unwrap_or_default();
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then_some(value)
    })
}

fn parse_numeric(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Replace the values of the given query parameters, preserving everything
/// else (other parameters, their order and the fragment).
fn replace_query_values(url: &str, replacements: &[(&str, u64)]) -> String {
    let Some((base, rest)) = url.split_once('?') else {
        return url.to_string();
    };
    let (query, fragment) = match rest.split_once('#') {
        Some((query, fragment)) => (query, Some(fragment)),
        None => (rest, None),
    };

    let pairs: Vec<String> = query
        .split('&')
        .map(|pair| {
            let replacement = pair.split_once('=').and_then(|(key, _)| {
                replacements
                    .iter()
                    .find(|(name, _)| *name == key)
                    .map(|(name, value)| format!("{name}={value}"))
            });
            replacement.unwrap_or_else(|| pair.to_string())
        })
        .collect();

    let mut out = format!("{base}?{}", pairs.join("&"));
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn from_size(url: &str) -> (u64, u64) {
        (
            query_value(url, "from").and_then(parse_numeric).unwrap(),
            query_value(url, "size").and_then(parse_numeric).unwrap(),
        )
    }

    #[test]
    fn test_zero_based_paging() {
        let pages = sequence("https://example.org/api?from=0&size=10", Some("size"), Some("from"), Some(25));
        let pairs: Vec<_> = pages.iter().map(|u| from_size(u)).collect();
        assert_eq!(pairs, vec![(0, 10), (10, 10), (20, 5)]);
    }

    #[test]
    fn test_one_based_paging() {
        let pages = sequence("https://example.org/api?from=1&size=10", Some("size"), Some("from"), Some(25));
        let pairs: Vec<_> = pages.iter().map(|u| from_size(u)).collect();
        assert_eq!(pairs, vec![(1, 10), (11, 10), (21, 5)]);
    }

    #[test]
    fn test_exact_multiple() {
        let zero = sequence("https://example.org/api?from=0&size=10", Some("size"), Some("from"), Some(20));
        let pairs: Vec<_> = zero.iter().map(|u| from_size(u)).collect();
        assert_eq!(pairs, vec![(0, 10), (10, 10)]);

        let one = sequence("https://example.org/api?from=1&size=10", Some("size"), Some("from"), Some(20));
        let pairs: Vec<_> = one.iter().map(|u| from_size(u)).collect();
        assert_eq!(pairs, vec![(1, 10), (11, 10)]);
    }

    #[test]
    fn test_fewer_records_than_page_size() {
        let pages = sequence("https://example.org/api?from=0&size=10", Some("size"), Some("from"), Some(3));
        assert_eq!(pages, vec!["https://example.org/api?from=0&size=3"]);
    }

    #[test]
    fn test_preserves_other_parameters_and_fragment() {
        let url = "https://example.org/api?q=roads&rows=2&fq=res_format:WMS&start=0#top";
        let pages = sequence(url, Some("rows"), Some("start"), Some(3));
        assert_eq!(
            pages,
            vec![
                "https://example.org/api?q=roads&rows=2&fq=res_format:WMS&start=0#top",
                "https://example.org/api?q=roads&rows=1&fq=res_format:WMS&start=2#top",
            ]
        );
    }

    #[test]
    fn test_does_not_touch_similar_parameter_names() {
        let url = "https://example.org/api?xsize=99&size=10&from=0";
        let pages = sequence(url, Some("size"), Some("from"), Some(15));
        assert_eq!(pages[1], "https://example.org/api?xsize=99&size=5&from=10");
    }

    #[test]
    fn test_single_url_fallbacks() {
        let url = "https://example.org/api?from=0&size=10";
        assert_eq!(sequence(url, None, Some("from"), Some(25)), vec![url]);
        assert_eq!(sequence(url, Some("rows"), Some("from"), Some(25)), vec![url]);
        assert_eq!(sequence(url, Some("size"), Some("start"), Some(25)), vec![url]);
        assert_eq!(sequence(url, Some("size"), None, Some(25)), vec![url]);
        assert_eq!(sequence(url, Some("size"), Some("from"), None), vec![url]);
        assert_eq!(sequence(url, Some("size"), Some("from"), Some(0)), vec![url]);

        let non_numeric = "https://example.org/api?from=0&size=ten";
        assert_eq!(sequence(non_numeric, Some("size"), Some("from"), Some(25)), vec![non_numeric]);

        let zero_size = "https://example.org/api?from=0&size=0";
        assert_eq!(sequence(zero_size, Some("size"), Some("from"), Some(25)), vec![zero_size]);
    }

    #[test]
    fn test_huge_totals_fall_back_to_single_url() {
        for url in ["https://example.org/api?from=0&size=10", "https://example.org/api?from=1&size=10"] {
            assert_eq!(sequence(url, Some("size"), Some("from"), Some(u64::MAX)), vec![url]);
            assert_eq!(
                sequence(url, Some("size"), Some("from"), Some(MAX_PAGES * 10 + 1)),
                vec![url]
            );
        }

        let one = "https://example.org/api?from=0&size=1";
        assert_eq!(sequence(one, Some("size"), Some("from"), Some(u64::MAX)), vec![one]);
    }

    #[test]
    fn test_page_count_at_limit() {
        let pages = sequence(
            "https://example.org/api?from=0&size=10",
            Some("size"),
            Some("from"),
            Some(MAX_PAGES * 10),
        );
        assert_eq!(pages.len() as u64, MAX_PAGES);
        assert_eq!(from_size(pages.last().unwrap()), ((MAX_PAGES - 1) * 10, 10));
    }

    #[test]
    fn test_sequence_is_idempotent() {
        for (url, total) in [
            ("https://example.org/api?from=0&size=10", 25),
            ("https://example.org/api?from=1&size=7", 50),
            ("https://example.org/api?size=3&from=0&q=x", 3),
        ] {
            let first = sequence(url, Some("size"), Some("from"), Some(total));
            let again = sequence(url, Some("size"), Some("from"), Some(total));
            assert_eq!(first, again);

            // Starting from the first generated page reproduces the list
            let replay = sequence(&first[0], Some("size"), Some("from"), Some(total));
            assert_eq!(first, replay);
        }
    }

    #[test]
    fn test_query_value() {
        let url = "https://example.org/api?a=1&b=&c=3#c=4";
        assert_eq!(query_value(url, "a"), Some("1"));
        assert_eq!(query_value(url, "b"), Some(""));
        assert_eq!(query_value(url, "c"), Some("3"));
        assert_eq!(query_value(url, "d"), None);
        assert_eq!(query_value("https://example.org/api", "a"), None);
    }
}
