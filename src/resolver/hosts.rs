//! Image-host allow-list. Every strategy's output passes through [HostAllowList::filter].

use reqwest::Url;

/// Content hosts the comic CDN serves chapter images from.
pub const DEFAULT_IMAGE_HOSTS: [&str; 4] = ["acimg.cn", "qpic.cn", "gtimg.com", "gtimg.cn"];

/// Domains whose hosts (or subdomains) may appear in an image list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAllowList {
    domains: Vec<String>,
}

impl Default for HostAllowList {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_HOSTS.iter().copied())
    }
}

impl HostAllowList {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|d| d.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self { domains }
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Absolute http(s) URL whose host equals an allowed domain or is a subdomain of one.
    pub fn permits(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return false;
        }
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.domains.iter().any(|d| {
            host == *d
                || (host.len() > d.len()
                    && host.ends_with(d.as_str())
                    && host.as_bytes()[host.len() - d.len() - 1] == b'.')
        })
    }

    /// Keep allowed URLs in order; everything else is dropped silently.
    pub fn filter(&self, urls: Vec<String>) -> Vec<String> {
        urls.into_iter().filter(|u| self.permits(u)).collect()
    }
}
