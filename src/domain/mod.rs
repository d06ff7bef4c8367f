//! 域名匹配：规范化为可注册域名、展开等价域名集合、识别黑名单主机
//!
//! 可注册域名按公共后缀列表（psl，含 github.io 这类私有后缀）计算：公共后缀再加一级。
//! IP、单标签主机（localhost）以及本身就是公共后缀的主机原样保留。

use std::collections::{HashMap, HashSet};

use crate::config::DomainsSection;

/// 从 URL 或裸主机名中提取小写 host（去掉协议、路径、端口、凭据与末尾点号）
fn extract_host(input: &str) -> Option<String> {
    let input = input.trim();
    let rest = match input.find("://") {
        Some(idx) => &input[idx + 3..],
        None => input,
    };
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?;
    let host = if host.starts_with('[') {
        // IPv6 字面量
        host.split(']').next()?.trim_start_matches('[')
    } else {
        host.split(':').next()?
    };
    let host = host.trim_end_matches('.').to_lowercase();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

fn is_ip_literal(host: &str) -> bool {
    host.parse::<std::net::IpAddr>().is_ok()
}

fn valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// 域名匹配器（等价表与黑名单来自配置）
#[derive(Debug, Clone, Default)]
pub struct DomainMatcher {
    /// 规范域名 -> 所在等价组下标
    group_index: HashMap<String, usize>,
    groups: Vec<Vec<String>>,
    blacklist: HashSet<String>,
}

impl DomainMatcher {
    pub fn new(equivalents: Vec<Vec<String>>, blacklist: Vec<String>) -> Self {
        let mut matcher = Self {
            blacklist: blacklist
                .into_iter()
                .filter_map(|h| extract_host(&h))
                .collect(),
            ..Self::default()
        };
        for group in equivalents {
            let mut members: Vec<String> = group
                .iter()
                .filter_map(|d| matcher.canonicalize(d))
                .collect();
            members.sort();
            members.dedup();
            if members.len() < 2 {
                continue;
            }
            let idx = matcher.groups.len();
            for member in &members {
                matcher.group_index.entry(member.clone()).or_insert(idx);
            }
            matcher.groups.push(members);
        }
        matcher
    }

    pub fn from_config(section: &DomainsSection) -> Self {
        Self::new(section.equivalents.clone(), section.blacklist.clone())
    }

    /// 规范化为可注册域名；无法解析时返回 None
    pub fn canonicalize(&self, input: &str) -> Option<String> {
        let host = extract_host(input)?;
        if is_ip_literal(&host) {
            return Some(host);
        }
        if !host.split('.').all(valid_label) {
            return None;
        }
        match psl::domain_str(&host) {
            Some(domain) => Some(domain.to_string()),
            None => Some(host),
        }
    }

    /// 等价域名集合（包含自身，已排序）
    pub fn equivalent_domains(&self, canonical: &str) -> Vec<String> {
        match self.group_index.get(canonical) {
            Some(&idx) => self.groups[idx].clone(),
            None => vec![canonical.to_string()],
        }
    }

    /// 两个输入（URL / 主机 / 域名）是否属于同一等价集合
    pub fn is_equivalent(&self, a: &str, b: &str) -> bool {
        match (self.canonicalize(a), self.canonicalize(b)) {
            (Some(a), Some(b)) => a == b || self.equivalent_domains(&a).contains(&b),
            _ => false,
        }
    }

    /// 主机或其可注册域名在黑名单中
    pub fn is_blacklisted(&self, input: &str) -> bool {
        let Some(host) = extract_host(input) else {
            return false;
        };
        if self.blacklist.contains(&host) {
            return true;
        }
        self.canonicalize(&host)
            .map(|canonical| self.blacklist.contains(&canonical))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> DomainMatcher {
        DomainMatcher::new(
            vec![vec![
                "google.com".into(),
                "youtube.com".into(),
                "gmail.com".into(),
            ]],
            vec!["localhost".into(), "accounts.google.com".into()],
        )
    }

    #[test]
    fn test_canonicalize_strips_subdomains() {
        let m = matcher();
        assert_eq!(m.canonicalize("https://login.sub.example.com:8443/path?q=1").as_deref(), Some("example.com"));
        assert_eq!(m.canonicalize("WWW.Example.COM.").as_deref(), Some("example.com"));
        assert_eq!(m.canonicalize("shop.bbc.co.uk").as_deref(), Some("bbc.co.uk"));
        assert_eq!(m.canonicalize("http://user:pw@bank.com/").as_deref(), Some("bank.com"));
    }

    #[test]
    fn test_canonicalize_uses_public_suffix_list() {
        let m = matcher();
        assert_eq!(m.canonicalize("shop.example.com.ar").as_deref(), Some("example.com.ar"));
        assert_eq!(m.canonicalize("https://alice.github.io/").as_deref(), Some("alice.github.io"));
        assert_eq!(m.canonicalize("www.myapp.herokuapp.com").as_deref(), Some("myapp.herokuapp.com"));
        // 主机本身是公共后缀
        assert_eq!(m.canonicalize("github.io").as_deref(), Some("github.io"));
    }

    #[test]
    fn test_sites_under_private_suffix_are_not_equivalent() {
        let m = matcher();
        assert!(!m.is_equivalent("alice.github.io", "bob.github.io"));
        assert!(!m.is_equivalent("a.blogspot.com", "b.blogspot.com"));
        assert!(m.is_equivalent("docs.alice.github.io", "alice.github.io"));
    }

    #[test]
    fn test_canonicalize_ip_and_single_label() {
        let m = matcher();
        assert_eq!(m.canonicalize("http://192.168.1.10:8080").as_deref(), Some("192.168.1.10"));
        assert_eq!(m.canonicalize("localhost").as_deref(), Some("localhost"));
    }

    #[test]
    fn test_canonicalize_rejects_garbage() {
        let m = matcher();
        assert!(m.canonicalize("").is_none());
        assert!(m.canonicalize("https://").is_none());
        assert!(m.canonicalize("bad host.com").is_none());
        assert!(m.canonicalize("a..b.com").is_none());
    }

    #[test]
    fn test_equivalence_set() {
        let m = matcher();
        let set = m.equivalent_domains("youtube.com");
        assert_eq!(set, vec!["gmail.com", "google.com", "youtube.com"]);
        assert_eq!(m.equivalent_domains("bank.com"), vec!["bank.com"]);
        assert!(m.is_equivalent("mail.google.com", "https://youtube.com"));
        assert!(m.is_equivalent("sub.example.com", "example.com"));
        assert!(!m.is_equivalent("example.com", "other.com"));
    }

    #[test]
    fn test_blacklist_matches_host_or_registrable_domain() {
        let m = matcher();
        assert!(m.is_blacklisted("http://localhost:3000/login"));
        assert!(m.is_blacklisted("accounts.google.com"));
        assert!(!m.is_blacklisted("mail.google.com"));
    }
}
