//! User-Agent classification for referral clicks.
//!
//! Only the coarse facts the matcher can use are extracted: which mobile
//! platform the browser runs on, its OS version, and the device family.

use url::Url;

use crate::config::AppLinks;
use crate::fingerprint::Platform;

/// Parsed information from a User-Agent header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// `None` for desktop browsers and anything unrecognised.
    pub platform: Option<Platform>,
    pub os_version: Option<String>,
    pub device_model: Option<String>,
}

impl DeviceInfo {
    pub fn parse(user_agent: &str) -> Self {
        if let Some(model) = ["iPhone", "iPad", "iPod"]
            .into_iter()
            .find(|family| user_agent.contains(*family))
        {
            return Self {
                platform: Some(Platform::Ios),
                os_version: ios_version(user_agent),
                device_model: Some(model.to_string()),
            };
        }

        if user_agent.contains("Android") {
            let (os_version, device_model) = android_details(user_agent);
            return Self {
                platform: Some(Platform::Android),
                os_version,
                device_model,
            };
        }

        Self::desktop()
    }

    fn desktop() -> Self {
        Self {
            platform: None,
            os_version: None,
            device_model: None,
        }
    }
}

/// `... CPU iPhone OS 15_0 like Mac OS X ...` yields `15.0`.
fn ios_version(ua: &str) -> Option<String> {
    let start = ua.find(" OS ")? + " OS ".len();
    let token = ua[start..].split([' ', ';', ')']).next()?;
    if token.is_empty() || !token.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    Some(token.replace('_', "."))
}

/// `(Linux; Android 12; Pixel 6 Build/SQ1D)` yields `("12", "Pixel 6")`.
fn android_details(ua: &str) -> (Option<String>, Option<String>) {
    let Some(start) = ua.find("Android") else {
        return (None, None);
    };
    let comment = &ua[start..];
    let comment = comment.split(')').next().unwrap_or(comment);
    let mut parts = comment.split(';').map(str::trim);

    let os_version = parts
        .next()
        .and_then(|p| p.strip_prefix("Android"))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let device_model = parts
        .find(|p| !p.is_empty() && *p != "wv" && *p != "K")
        .map(|p| p.split(" Build/").next().unwrap_or(p).trim().to_string())
        .filter(|m| !m.is_empty());

    (os_version, device_model)
}

/// Where a clicking browser is sent after its click is recorded.
pub fn redirect_url(device: &DeviceInfo, referral_code: &str, links: &AppLinks) -> String {
    match device.platform {
        Some(Platform::Ios) => links.ios_app_store_url.clone(),
        Some(Platform::Android) => {
            let referrer = format!("referral_code={referral_code}");
            match Url::parse_with_params(
                "https://play.google.com/store/apps/details",
                &[("id", links.android_package.as_str()), ("referrer", referrer.as_str())],
            ) {
                Ok(url) => url.to_string(),
                Err(_) => links.web_fallback_url.clone(),
            }
        }
        None => links.web_fallback_url.clone(),
    }
}
