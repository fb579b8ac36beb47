//! Browser request profiles.
//!
//! The platform serves a stripped page (no hydration payload) to clients that
//! do not look like a desktop browser, so every page request carries a
//! coherent set of navigation headers drawn from one of these profiles.
//! Manifest calls reuse the same User-Agent with XHR-style headers.

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT,
};

/// Browser profile with realistic fingerprint
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    pub sec_ch_ua: String,
    pub sec_ch_ua_platform: String,
}

const CHROME_VERSIONS: &[(&str, &str)] = &[
    ("131", "131.0.0.0"),
    ("130", "130.0.0.0"),
    ("129", "129.0.0.0"),
    ("128", "128.0.0.0"),
];

const FIREFOX_VERSIONS: &[&str] = &["133.0", "132.0", "131.0"];

const SAFARI_VERSIONS: &[(&str, &str)] = &[("17.6", "605.1.15"), ("17.5", "605.1.15")];

// The platform localizes subtitles and titles off Accept-Language; keep English first.
const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.9",
    "en-US,en;q=0.9,zh-CN;q=0.8",
    "en-US,en;q=0.9,id;q=0.8",
];

#[derive(Debug, Clone, Copy)]
enum Platform {
    MacOS,
    Windows,
    Linux,
}

impl Platform {
    fn random() -> Self {
        let roll: f32 = rand::thread_rng().gen();
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

fn pick<'a, T>(items: &'a [T], fallback: &'a T) -> &'a T {
    items.choose(&mut rand::thread_rng()).unwrap_or(fallback)
}

fn random_accept_language() -> String {
    (*pick(ACCEPT_LANGUAGES, &ACCEPT_LANGUAGES[0])).to_string()
}

/// Generate a realistic Chrome browser profile
pub fn chrome_profile() -> BrowserProfile {
    let platform = Platform::random();
    let (major, full) = pick(CHROME_VERSIONS, &CHROME_VERSIONS[0]);

    BrowserProfile {
        user_agent: format!(
            "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{full} Safari/537.36",
            platform.os_string()
        ),
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8".to_string(),
        accept_language: random_accept_language(),
        sec_ch_ua: format!(
            "\"Google Chrome\";v=\"{major}\", \"Chromium\";v=\"{major}\", \"Not_A Brand\";v=\"24\""
        ),
        sec_ch_ua_platform: platform.sec_ch_platform().to_string(),
    }
}

/// Generate a realistic Firefox browser profile
pub fn firefox_profile() -> BrowserProfile {
    let platform = Platform::random();
    let version = pick(FIREFOX_VERSIONS, &FIREFOX_VERSIONS[0]);

    BrowserProfile {
        user_agent: format!(
            "Mozilla/5.0 ({}; rv:{version}) Gecko/20100101 Firefox/{version}",
            platform.os_string()
        ),
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"
            .to_string(),
        accept_language: random_accept_language(),
        // Firefox doesn't send Sec-CH-UA headers
        sec_ch_ua: String::new(),
        sec_ch_ua_platform: String::new(),
    }
}

/// Generate a realistic Safari browser profile
pub fn safari_profile() -> BrowserProfile {
    let (version, webkit) = pick(SAFARI_VERSIONS, &SAFARI_VERSIONS[0]);

    BrowserProfile {
        user_agent: format!(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/{webkit} (KHTML, like Gecko) Version/{version} Safari/{webkit}"
        ),
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        accept_language: random_accept_language(),
        sec_ch_ua: String::new(),
        sec_ch_ua_platform: String::new(),
    }
}

/// Generate a random browser profile (weighted by market share)
pub fn random_profile() -> BrowserProfile {
    let roll: f32 = rand::thread_rng().gen();
    if roll < 0.7 {
        chrome_profile()
    } else if roll < 0.9 {
        safari_profile()
    } else {
        firefox_profile()
    }
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

impl BrowserProfile {
    /// Navigation headers sent with every page request.
    pub fn to_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert(&mut headers, USER_AGENT, &self.user_agent);
        insert(&mut headers, ACCEPT, &self.accept);
        insert(&mut headers, ACCEPT_LANGUAGE, &self.accept_language);

        if !self.sec_ch_ua.is_empty() {
            insert(&mut headers, HeaderName::from_static("sec-ch-ua"), &self.sec_ch_ua);
            insert(&mut headers, HeaderName::from_static("sec-ch-ua-mobile"), "?0");
            insert(
                &mut headers,
                HeaderName::from_static("sec-ch-ua-platform"),
                &self.sec_ch_ua_platform,
            );
        }

        insert(&mut headers, HeaderName::from_static("sec-fetch-dest"), "document");
        insert(&mut headers, HeaderName::from_static("sec-fetch-mode"), "navigate");
        insert(&mut headers, HeaderName::from_static("sec-fetch-site"), "none");
        headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));

        headers
    }
}

/// Header overrides for manifest API calls made on behalf of `referer`.
pub fn api_headers(referer: &str) -> Vec<(String, String)> {
    vec![
        (
            "accept".to_string(),
            "application/json, text/plain, */*".to_string(),
        ),
        ("referer".to_string(), referer.to_string()),
        ("sec-fetch-dest".to_string(), "empty".to_string()),
        ("sec-fetch-mode".to_string(), "cors".to_string()),
        ("sec-fetch-site".to_string(), "cross-site".to_string()),
    ]
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
    }

    #[test]
    fn test_safari_profile_is_macos() {
        let profile = safari_profile();
        assert!(profile.user_agent.contains("Macintosh"));
    }

    #[test]
    fn test_navigation_headers() {
        let headers = chrome_profile().to_headers();
        assert!(headers.contains_key(USER_AGENT));
        assert!(headers.contains_key("sec-ch-ua"));
        assert_eq!(headers.get("sec-fetch-mode").unwrap(), "navigate");
    }

    #[test]
    fn test_api_headers_carry_referer() {
        let headers = api_headers("https://www.iq.com/play/x");
        assert!(headers
            .iter()
            .any(|(k, v)| k == "referer" && v == "https://www.iq.com/play/x"));
        assert!(headers.iter().any(|(k, v)| k == "sec-fetch-mode" && v == "cors"));
    }
}
