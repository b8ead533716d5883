//! Crawl frontier for one job: FIFO queue plus a seen-set.

use std::collections::{HashSet, VecDeque};

use url::Url;

/// Normalize a URL for deduplication (strip fragment and trailing slash).
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    // Keep the root path's slash.
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}

/// URLs waiting to be fetched, in discovery order, each at most once.
#[derive(Debug)]
pub struct Frontier {
    queue: VecDeque<String>,
    seen: HashSet<String>,
    limit: usize,
    dropped: usize,
}

impl Frontier {
    /// A frontier that accepts at most `limit` distinct URLs.
    pub fn new(limit: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            seen: HashSet::new(),
            limit,
            dropped: 0,
        }
    }

    /// Queue `url` unless it was already seen, is not http(s), or the limit
    /// is reached. Returns whether it was queued.
    pub fn push(&mut self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }
        let key = normalize_url(&parsed);
        if self.seen.contains(&key) {
            return false;
        }
        if self.seen.len() >= self.limit {
            self.dropped += 1;
            return false;
        }
        self.seen.insert(key);
        self.queue.push_back(url.to_string());
        true
    }

    /// Queue every URL, returning how many were new.
    pub fn extend<I, S>(&mut self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        urls.into_iter().filter(|u| self.push(u.as_ref())).count()
    }

    pub fn pop(&mut self) -> Option<String> {
        self.queue.pop_front()
    }

    /// Number of distinct URLs accepted so far.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// URLs rejected because the limit was reached.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// URLs still waiting to be fetched.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_fragment_and_slash() {
        let url = Url::parse("https://city.ca/bylaws/zoning/#part-3").unwrap();
        assert_eq!(normalize_url(&url), "https://city.ca/bylaws/zoning");
        let root = Url::parse("https://city.ca/").unwrap();
        assert_eq!(normalize_url(&root), "https://city.ca/");
    }

    #[test]
    fn skips_seen_and_queued_urls() {
        let mut frontier = Frontier::new(10);
        assert!(frontier.push("https://city.ca/bylaws?page=2"));
        assert!(!frontier.push("https://city.ca/bylaws?page=2#top"));
        assert_eq!(frontier.pop().as_deref(), Some("https://city.ca/bylaws?page=2"));
        // Already fetched: still rejected, so page 2 -> 3 -> 2 cannot loop.
        assert!(!frontier.push("https://city.ca/bylaws?page=2"));
        assert!(frontier.is_empty());
    }

    #[test]
    fn enforces_limit_and_scheme() {
        let mut frontier = Frontier::new(2);
        let added = frontier.extend([
            "https://city.ca/a",
            "ftp://city.ca/b",
            "https://city.ca/c",
            "https://city.ca/d",
        ]);
        assert_eq!(added, 2);
        assert_eq!(frontier.seen_count(), 2);
        assert_eq!(frontier.dropped(), 1);
    }
}
