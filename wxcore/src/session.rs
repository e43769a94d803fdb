use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const SID_COOKIE: &str = "wxsid";
const UIN_COOKIE: &str = "wxuin";

/// Identity block the backend expects inside every structured request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRequest {
    #[serde(rename = "Uin")]
    pub uin: i64,
    #[serde(rename = "Sid")]
    pub sid: String,
    #[serde(rename = "Skey")]
    pub skey: String,
    #[serde(rename = "DeviceID")]
    pub device_id: String,
}

impl BaseRequest {
    /// Pulls the session id and uin forward from the cookie cache. The server
    /// rotates them through `Set-Cookie` during long polling.
    ///
    /// Returns true if anything changed.
    pub fn refresh_from_cookies(&mut self, cookies: &CookieCache) -> bool {
        let mut changed = false;

        if let Some(sid) = cookies.get(SID_COOKIE)
            && sid != self.sid
        {
            self.sid = sid.to_string();
            changed = true;
        }

        if let Some(uin) = cookies.get(UIN_COOKIE).and_then(|v| v.parse::<i64>().ok())
            && uin != self.uin
        {
            self.uin = uin;
            changed = true;
        }

        changed
    }
}

/// Name/value view of the cookies the backend has handed out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieCache {
    cookies: BTreeMap<String, String>,
}

impl CookieCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Applies raw `Set-Cookie` header values. An empty value deletes the
    /// cookie. Returns how many entries were written or removed.
    pub fn refresh(&mut self, set_cookies: &[String]) -> usize {
        let mut touched = 0;
        for raw in set_cookies {
            match cookie::Cookie::parse(raw.as_str()) {
                Ok(c) if c.value().is_empty() => {
                    if self.cookies.remove(c.name()).is_some() {
                        touched += 1;
                    }
                }
                Ok(c) => {
                    self.cookies
                        .insert(c.name().to_string(), c.value().to_string());
                    touched += 1;
                }
                Err(e) => debug!(target: "Sync/Cookies", "Ignoring unparseable cookie: {e}"),
            }
        }
        touched
    }

    /// Value for an outgoing `Cookie` header, if there is anything to send.
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_parses_set_cookie_headers() {
        let mut cache = CookieCache::new();
        let touched = cache.refresh(&[
            "wxsid=abc123; Domain=wx.qq.com; Path=/; Max-Age=3600".to_string(),
            "wxuin=987654; Path=/".to_string(),
            "=".to_string(),
        ]);

        assert_eq!(touched, 2);
        assert_eq!(cache.get("wxsid"), Some("abc123"));
        assert_eq!(
            cache.header_value().as_deref(),
            Some("wxsid=abc123; wxuin=987654")
        );
    }

    #[test]
    fn test_refresh_empty_value_removes_cookie() {
        let mut cache = CookieCache::new();
        cache.insert("webwx_data_ticket", "t1");
        cache.refresh(&["webwx_data_ticket=; Path=/".to_string()]);
        assert!(cache.is_empty());
        assert_eq!(cache.header_value(), None);
    }

    #[test]
    fn test_base_request_follows_cookies() {
        let mut base = BaseRequest {
            uin: 1,
            sid: "old".to_string(),
            skey: "@crypt_1".to_string(),
            device_id: "e1".to_string(),
        };
        let mut cache = CookieCache::new();
        cache.insert("wxsid", "new");
        cache.insert("wxuin", "42");

        assert!(base.refresh_from_cookies(&cache));
        assert_eq!(base.sid, "new");
        assert_eq!(base.uin, 42);
        assert!(!base.refresh_from_cookies(&cache));
    }

    #[test]
    fn test_base_request_wire_names() {
        let base = BaseRequest {
            uin: 7,
            sid: "s".to_string(),
            skey: "k".to_string(),
            device_id: "e9".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&base).unwrap(),
            r#"{"Uin":7,"Sid":"s","Skey":"k","DeviceID":"e9"}"#
        );
    }
}
