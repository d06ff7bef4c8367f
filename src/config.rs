//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PASSGATE__*` 覆盖（双下划线表示嵌套，如 `PASSGATE__CACHE__DOMAIN_TTL_MS=5000`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub pending: PendingSection,
    #[serde(default)]
    pub tracker: TrackerSection,
    #[serde(default)]
    pub gates: GatesSection,
    #[serde(default)]
    pub domains: DomainsSection,
}

/// [app] 段：应用名、持久化目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 持久化 KV 所在目录，未设置时用 ./data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// [api] 段：条目/组织服务地址与超时
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_api_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8087/api".to_string()
}

fn default_api_timeout_secs() -> u64 {
    15
}

/// [cache] 段：域名凭据缓存有效期
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_domain_ttl_ms")]
    pub domain_ttl_ms: i64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            domain_ttl_ms: default_domain_ttl_ms(),
        }
    }
}

fn default_domain_ttl_ms() -> i64 {
    10_000
}

/// [pending] 段：待保存凭据 / 待保存 TOTP 的过期时间（秒）
#[derive(Debug, Clone, Deserialize)]
pub struct PendingSection {
    #[serde(default = "default_save_ttl_secs")]
    pub save_ttl_secs: i64,
    #[serde(default = "default_totp_ttl_secs")]
    pub totp_ttl_secs: i64,
}

impl Default for PendingSection {
    fn default() -> Self {
        Self {
            save_ttl_secs: default_save_ttl_secs(),
            totp_ttl_secs: default_totp_ttl_secs(),
        }
    }
}

fn default_save_ttl_secs() -> i64 {
    60
}

fn default_totp_ttl_secs() -> i64 {
    300
}

/// [tracker] 段：表单提交请求的清扫时间与结果有效期（秒）
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerSection {
    #[serde(default = "default_request_ttl_secs")]
    pub request_ttl_secs: i64,
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: i64,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            request_ttl_secs: default_request_ttl_secs(),
            result_ttl_secs: default_result_ttl_secs(),
        }
    }
}

fn default_request_ttl_secs() -> i64 {
    30
}

fn default_result_ttl_secs() -> i64 {
    5
}

/// [gates] 段：明文披露的每标签页冷却时间
#[derive(Debug, Clone, Deserialize)]
pub struct GatesSection {
    #[serde(default = "default_secret_cooldown_ms")]
    pub secret_cooldown_ms: i64,
}

impl Default for GatesSection {
    fn default() -> Self {
        Self {
            secret_cooldown_ms: default_secret_cooldown_ms(),
        }
    }
}

fn default_secret_cooldown_ms() -> i64 {
    300
}

/// [domains] 段：等价域名组与黑名单主机
#[derive(Debug, Clone, Deserialize)]
pub struct DomainsSection {
    #[serde(default = "default_equivalents")]
    pub equivalents: Vec<Vec<String>>,
    #[serde(default = "default_blacklist")]
    pub blacklist: Vec<String>,
}

impl Default for DomainsSection {
    fn default() -> Self {
        Self {
            equivalents: default_equivalents(),
            blacklist: default_blacklist(),
        }
    }
}

fn default_equivalents() -> Vec<Vec<String>> {
    let groups: &[&[&str]] = &[
        &["google.com", "youtube.com", "gmail.com"],
        &["apple.com", "icloud.com"],
        &["microsoft.com", "live.com", "outlook.com", "office.com", "microsoftonline.com"],
        &["amazon.com", "amazon.co.uk", "amazon.de", "amazon.co.jp"],
        &["ebay.com", "ebay.co.uk", "ebay.de"],
        &["github.com", "githubusercontent.com"],
    ];
    groups
        .iter()
        .map(|g| g.iter().map(|d| d.to_string()).collect())
        .collect()
}

fn default_blacklist() -> Vec<String> {
    vec![
        // 本机
        "localhost".into(),
        "127.0.0.1".into(),
        "0.0.0.0".into(),
        // 云控制台统一登录入口（同一入口承载大量租户，容易误填）
        "accounts.google.com".into(),
        "signin.aws.amazon.com".into(),
        "login.microsoftonline.com".into(),
        "console.cloud.google.com".into(),
        "portal.azure.com".into(),
    ]
}

/// 从 config 目录加载配置，环境变量 PASSGATE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PASSGATE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PASSGATE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_carry_reference_ttls() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.cache.domain_ttl_ms, 10_000);
        assert_eq!(cfg.pending.save_ttl_secs, 60);
        assert_eq!(cfg.pending.totp_ttl_secs, 300);
        assert_eq!(cfg.tracker.request_ttl_secs, 30);
        assert_eq!(cfg.tracker.result_ttl_secs, 5);
        assert_eq!(cfg.gates.secret_cooldown_ms, 300);
        assert!(cfg.domains.blacklist.iter().any(|h| h == "localhost"));
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[cache]\ndomain_ttl_ms = 2500\n\n[domains]\nblacklist = [\"intranet.local\"]\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.cache.domain_ttl_ms, 2500);
        assert_eq!(cfg.domains.blacklist, vec!["intranet.local".to_string()]);
        assert_eq!(cfg.pending.save_ttl_secs, 60);
    }
}
