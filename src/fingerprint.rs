//! Browser header profiles.
//!
//! Hosting sites commonly block obvious bot traffic, so every outbound
//! request carries the headers of a real desktop browser. The profile is
//! picked once per [`Fetcher`](crate::fetcher::Fetcher); only the
//! `Accept-Language` header follows the request's country.

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};

use crate::context::CountryCode;

/// Browser profile with realistic fingerprint
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub user_agent: String,
    pub accept: &'static str,
    /// Empty for browsers that don't send client hints.
    pub sec_ch_ua: String,
    pub sec_ch_ua_platform: &'static str,
}

/// Real Chrome versions (major, full)
const CHROME_VERSIONS: &[(&str, &str)] = &[
    ("131", "131.0.0.0"),
    ("130", "130.0.0.0"),
    ("129", "129.0.0.0"),
];

const FIREFOX_VERSIONS: &[&str] = &["133.0", "132.0", "131.0"];

#[derive(Debug, Clone, Copy)]
enum Platform {
    MacOS,
    Windows,
    Linux,
}

impl Platform {
    fn random() -> Self {
        let mut rng = rand::thread_rng();
        // Windows 65%, macOS 20%, Linux 15%
        let roll: f32 = rng.gen();
        if roll < 0.65 {
            Platform::Windows
        } else if roll < 0.85 {
            Platform::MacOS
        } else {
            Platform::Linux
        }
    }

    fn os_string(self) -> &'static str {
        match self {
            Platform::MacOS => "Macintosh; Intel Mac OS X 10_15_7",
            Platform::Windows => "Windows NT 10.0; Win64; x64",
            Platform::Linux => "X11; Linux x86_64",
        }
    }

    fn sec_ch_platform(self) -> &'static str {
        match self {
            Platform::MacOS => "\"macOS\"",
            Platform::Windows => "\"Windows\"",
            Platform::Linux => "\"Linux\"",
        }
    }
}

#[must_use]
pub fn chrome_profile() -> BrowserProfile {
    let mut rng = rand::thread_rng();
    let platform = Platform::random();
    let (major, full) = CHROME_VERSIONS
        .choose(&mut rng)
        .copied()
        .unwrap_or(("131", "131.0.0.0"));

    BrowserProfile {
        user_agent: format!(
            "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{full} Safari/537.36",
            platform.os_string()
        ),
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        sec_ch_ua: format!(
            "\"Google Chrome\";v=\"{major}\", \"Chromium\";v=\"{major}\", \"Not_A Brand\";v=\"24\""
        ),
        sec_ch_ua_platform: platform.sec_ch_platform(),
    }
}

#[must_use]
pub fn firefox_profile() -> BrowserProfile {
    let mut rng = rand::thread_rng();
    let platform = Platform::random();
    let version = FIREFOX_VERSIONS.choose(&mut rng).copied().unwrap_or("133.0");

    BrowserProfile {
        user_agent: format!(
            "Mozilla/5.0 ({}; rv:{version}) Gecko/20100101 Firefox/{version}",
            platform.os_string()
        ),
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        sec_ch_ua: String::new(),
        sec_ch_ua_platform: platform.sec_ch_platform(),
    }
}

/// Random profile weighted by market share (Chrome 80%, Firefox 20%).
#[must_use]
pub fn random_profile() -> BrowserProfile {
    if rand::thread_rng().gen::<f32>() < 0.8 {
        chrome_profile()
    } else {
        firefox_profile()
    }
}

impl BrowserProfile {
    /// Headers for a request made on behalf of a user in `country`.
    ///
    /// `Accept-Encoding` is left to reqwest so responses are decompressed
    /// transparently.
    #[must_use]
    pub fn to_headers(&self, country: CountryCode) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Ok(value) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, value);
        }
        headers.insert(ACCEPT, HeaderValue::from_static(self.accept));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static(country.accept_language()),
        );

        if !self.sec_ch_ua.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.sec_ch_ua) {
                headers.insert("Sec-CH-UA", value);
            }
            headers.insert("Sec-CH-UA-Mobile", HeaderValue::from_static("?0"));
            headers.insert(
                "Sec-CH-UA-Platform",
                HeaderValue::from_static(self.sec_ch_ua_platform),
            );
        }

        headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("none"));
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_profile() {
        let profile = chrome_profile();
        assert!(profile.user_agent.contains("Chrome"));
        assert!(!profile.sec_ch_ua.is_empty());
    }

    #[test]
    fn test_firefox_profile() {
        let profile = firefox_profile();
        assert!(profile.user_agent.contains("Firefox"));
        assert!(profile.sec_ch_ua.is_empty());
        assert!(!profile.to_headers(CountryCode::En).contains_key("Sec-CH-UA"));
    }

    #[test]
    fn accept_language_follows_country() {
        let profile = random_profile();
        let headers = profile.to_headers(CountryCode::De);
        assert!(headers.contains_key(USER_AGENT));
        assert_eq!(headers[ACCEPT_LANGUAGE], "de-DE,de;q=0.9,en;q=0.8");
    }
}
