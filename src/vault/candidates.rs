//! 域名凭据缓存：按规范域名返回跨组织的已解密候选凭据
//!
//! 读取流程：规范化 → 黑名单 → TTL 缓存 → 加入进行中的请求 → 发起新请求。
//! 同一域名同一时刻只会有一个上游批量请求（single-flight），所有并发调用方拿到同一个结果。
//! 进行中的请求完成后，无论成功失败都会移除其标记；invalidate() 通过代数（generation）让旧请求的结果不再写回缓存。

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{VaultApi, VaultItem};
use crate::core::{Clock, VaultError};
use crate::crypto::VaultCrypto;
use crate::domain::DomainMatcher;
use crate::vault::{CredentialCandidate, ItemPayload, OrgKeyResolver, OrganizationDirectory, UsageLedger};

/// 候选列表（共享给所有等待者）
pub type Candidates = Arc<Vec<CredentialCandidate>>;

type FetchResult = Result<Candidates, VaultError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

struct CacheEntry {
    fetched_at: i64,
    candidates: Candidates,
}

struct InFlight {
    generation: u64,
    fetch: SharedFetch,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    in_flight: HashMap<String, InFlight>,
    generation: u64,
}

struct CacheInner {
    state: Mutex<CacheState>,
    matcher: Arc<DomainMatcher>,
    directory: Arc<OrganizationDirectory>,
    org_keys: Arc<OrgKeyResolver>,
    api: Arc<dyn VaultApi>,
    crypto: Arc<dyn VaultCrypto>,
    usage: Arc<UsageLedger>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
}

pub struct DomainCredentialCache {
    inner: Arc<CacheInner>,
}

impl DomainCredentialCache {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        matcher: Arc<DomainMatcher>,
        directory: Arc<OrganizationDirectory>,
        org_keys: Arc<OrgKeyResolver>,
        api: Arc<dyn VaultApi>,
        crypto: Arc<dyn VaultCrypto>,
        usage: Arc<UsageLedger>,
        clock: Arc<dyn Clock>,
        ttl_ms: i64,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState::default()),
                matcher,
                directory,
                org_keys,
                api,
                crypto,
                usage,
                clock,
                ttl_ms,
            }),
        }
    }

    pub async fn request(&self, domain_raw: &str) -> FetchResult {
        let matcher = &self.inner.matcher;
        let domain = matcher
            .canonicalize(domain_raw)
            .ok_or_else(|| VaultError::Validation(format!("unparseable domain: {}", domain_raw)))?;

        if matcher.is_blacklisted(domain_raw) || matcher.is_blacklisted(&domain) {
            debug!(domain = %domain, "Blacklisted domain, refusing lookup");
            return Err(VaultError::NoLogins);
        }

        let fetch = {
            let mut state = self.inner.state.lock().await;
            let now = self.inner.clock.now_ms();

            match state.entries.get(&domain) {
                Some(entry) if now - entry.fetched_at < self.inner.ttl_ms => {
                    debug!(domain = %domain, "Domain cache hit");
                    return Ok(entry.candidates.clone());
                }
                Some(_) => {
                    state.entries.remove(&domain);
                }
                None => {}
            }

            if let Some(in_flight) = state.in_flight.get(&domain) {
                debug!(domain = %domain, "Joining in-flight fetch");
                in_flight.fetch.clone()
            } else {
                let generation = state.generation;
                let fetch = Self::fetch(self.inner.clone(), domain.clone(), generation)
                    .boxed()
                    .shared();
                state.in_flight.insert(
                    domain.clone(),
                    InFlight {
                        generation,
                        fetch: fetch.clone(),
                    },
                );
                fetch
            }
        };

        fetch.await
    }

    /// 整体清空缓存与进行中标记（任何写入之后调用）
    pub async fn invalidate(&self) {
        let mut state = self.inner.state.lock().await;
        state.entries.clear();
        state.in_flight.clear();
        state.generation += 1;
        debug!("Domain credential cache invalidated");
    }

    async fn fetch(inner: Arc<CacheInner>, domain: String, generation: u64) -> FetchResult {
        let result = inner.load(&domain).await;

        // 收尾：成功或失败都移除进行中标记；缓存已被 invalidate 时丢弃结果
        let mut state = inner.state.lock().await;
        if state.generation == generation {
            let ours = state
                .in_flight
                .get(&domain)
                .map(|f| f.generation == generation)
                .unwrap_or(false);
            if ours {
                state.in_flight.remove(&domain);
            }
            if let Ok(candidates) = &result {
                state.entries.insert(
                    domain.clone(),
                    CacheEntry {
                        fetched_at: inner.clock.now_ms(),
                        candidates: candidates.clone(),
                    },
                );
            }
        }
        result
    }
}

impl CacheInner {
    async fn load(&self, domain: &str) -> FetchResult {
        let orgs = self.directory.ensure_loaded().await?;
        let equivalents = self.matcher.equivalent_domains(domain);

        // 每个组织一次列表查询，并行执行，单个组织失败不影响整体
        let settled = join_all(orgs.iter().map(|org| {
            let equivalents = &equivalents;
            async move { (org.id.clone(), self.api.list_items(&org.id, equivalents).await) }
        }))
        .await;

        let mut items: Vec<(String, VaultItem)> = Vec::new();
        let mut failures = 0usize;
        for (org_id, result) in settled {
            match result {
                Ok(list) => items.extend(list.into_iter().map(|item| (org_id.clone(), item))),
                Err(e) => {
                    let err = e.into_fetch_error();
                    if err == VaultError::AuthExpired {
                        return Err(err);
                    }
                    warn!(org_id = %org_id, error = %err, "Listing items failed for organization");
                    failures += 1;
                }
            }
        }
        if !orgs.is_empty() && failures == orgs.len() {
            return Err(VaultError::Fetch(format!(
                "all {} organization lookups failed",
                failures
            )));
        }

        let usage = self.usage.snapshot().await;
        let mut candidates = Vec::with_capacity(items.len());
        for (org_id, item) in items {
            // 本地复核域名提示，防止上游过滤过宽
            let hint_ok = item
                .domain_hint
                .as_deref()
                .and_then(|hint| self.matcher.canonicalize(hint))
                .map(|hint| equivalents.contains(&hint))
                .unwrap_or(false);
            if !hint_ok {
                debug!(item_id = %item.id, "Dropping item whose domain hint does not match");
                continue;
            }

            match self.decrypt_candidate(&org_id, &item).await {
                Ok(mut candidate) => {
                    if let Some(stamp) = usage.get(&candidate.id) {
                        candidate.last_used_at = stamp.last_used_at;
                        candidate.last_launched_at = stamp.last_launched_at;
                    }
                    candidates.push(candidate);
                }
                Err(e @ (VaultError::NoUserKey | VaultError::NoAuth | VaultError::AuthExpired)) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(item_id = %item.id, org_id = %org_id, error = %e, "Dropping undecryptable item");
                }
            }
        }

        if candidates.is_empty() {
            return Err(VaultError::NoLogins);
        }
        info!(domain, count = candidates.len(), "Fetched credential candidates");
        Ok(Arc::new(candidates))
    }

    async fn decrypt_candidate(&self, org_id: &str, item: &VaultItem) -> Result<CredentialCandidate, VaultError> {
        let key = self.org_keys.resolve(org_id).await?;
        let plaintext = self
            .crypto
            .decrypt(&item.data, &key)
            .map_err(|e| VaultError::Crypto(e.to_string()))?;
        let payload = ItemPayload::from_plaintext(&plaintext)?;
        Ok(CredentialCandidate {
            id: item.id.clone(),
            title: payload.title.clone(),
            username: payload.username.clone(),
            url: payload.url.clone(),
            item_type: item.item_type,
            auto_fill: item.auto_fill,
            auto_login: item.auto_login,
            source_org_id: org_id.to_string(),
            last_used_at: None,
            last_launched_at: None,
        })
    }
}
