//! 表单提交追踪：把写请求（POST/PUT/PATCH）与其最终网络结果关联，决定何时弹出保存提示
//!
//! 三种结果竞争：
//! - 完成且状态码在 [200,400)：成功，移除追踪条目
//! - 完成前先观察到 3xx 重定向：立即按标签页记为成功，但保留追踪条目，后续完成事件覆盖该临时结果
//! - 网络错误：失败，状态码 0
//!
//! 重定向链中后续一跳出错时，之前记录的乐观成功不会被撤回。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::Clock;
use crate::pending::TabId;

const TRACKED_METHODS: [&str; 3] = ["POST", "PUT", "PATCH"];

/// 某标签页最近一次表单提交的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSubmissionResult {
    pub success: bool,
    pub status_code: u16,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: i64,
}

#[derive(Debug, Clone)]
struct TrackedRequest {
    tab: TabId,
    url: String,
    started_at: i64,
}

#[derive(Default)]
struct TrackerState {
    requests: HashMap<String, TrackedRequest>,
    results: HashMap<TabId, FormSubmissionResult>,
}

pub struct FormSubmissionTracker {
    state: RwLock<TrackerState>,
    clock: Arc<dyn Clock>,
    request_ttl_ms: i64,
    result_ttl_ms: i64,
}

impl FormSubmissionTracker {
    pub fn new(clock: Arc<dyn Clock>, request_ttl_ms: i64, result_ttl_ms: i64) -> Self {
        Self {
            state: RwLock::new(TrackerState::default()),
            clock,
            request_ttl_ms,
            result_ttl_ms,
        }
    }

    /// 开始追踪一个请求；非写方法忽略并返回 false
    pub async fn track(&self, request_id: &str, tab: TabId, url: &str, method: &str) -> bool {
        let method = method.to_ascii_uppercase();
        if !TRACKED_METHODS.contains(&method.as_str()) {
            return false;
        }
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;
        self.sweep(&mut state, now);
        state.requests.insert(
            request_id.to_string(),
            TrackedRequest {
                tab,
                url: url.to_string(),
                started_at: now,
            },
        );
        debug!(request_id, tab, method = %method, "Tracking form submission");
        true
    }

    /// 重定向：3xx 立即记为成功，追踪条目保留
    pub async fn on_redirect(&self, request_id: &str, status_code: u16, redirect_url: &str) -> bool {
        if !(300..400).contains(&status_code) {
            return false;
        }
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;
        self.sweep(&mut state, now);
        let Some(tracked) = state.requests.get(request_id).cloned() else {
            return false;
        };
        state.results.insert(
            tracked.tab,
            FormSubmissionResult {
                success: true,
                status_code,
                url: tracked.url,
                redirect_url: Some(redirect_url.to_string()),
                error: None,
                at: now,
            },
        );
        debug!(request_id, tab = tracked.tab, status_code, "Form submission redirected");
        true
    }

    pub async fn on_completed(&self, request_id: &str, status_code: u16) -> bool {
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;
        self.sweep(&mut state, now);
        let Some(tracked) = state.requests.remove(request_id) else {
            return false;
        };
        let success = (200..400).contains(&status_code);
        state.results.insert(
            tracked.tab,
            FormSubmissionResult {
                success,
                status_code,
                url: tracked.url,
                redirect_url: None,
                error: None,
                at: now,
            },
        );
        debug!(request_id, tab = tracked.tab, status_code, success, "Form submission completed");
        true
    }

    pub async fn on_error(&self, request_id: &str, error: &str) -> bool {
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;
        self.sweep(&mut state, now);
        let Some(tracked) = state.requests.remove(request_id) else {
            return false;
        };
        state.results.insert(
            tracked.tab,
            FormSubmissionResult {
                success: false,
                status_code: 0,
                url: tracked.url,
                redirect_url: None,
                error: Some(error.to_string()),
                at: now,
            },
        );
        debug!(request_id, tab = tracked.tab, "Form submission failed");
        true
    }

    /// 标签页最近的结果；超过有效期视为不存在
    pub async fn result(&self, tab: TabId) -> Option<FormSubmissionResult> {
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;
        self.sweep(&mut state, now);
        state.results.get(&tab).cloned()
    }

    pub async fn clear_tab(&self, tab: TabId) {
        let mut state = self.state.write().await;
        state.results.remove(&tab);
        state.requests.retain(|_, r| r.tab != tab);
    }

    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.requests.clear();
        state.results.clear();
    }

    fn sweep(&self, state: &mut TrackerState, now: i64) {
        let request_ttl = self.request_ttl_ms;
        let result_ttl = self.result_ttl_ms;
        state.requests.retain(|_, r| now - r.started_at < request_ttl);
        state.results.retain(|_, r| now - r.at < result_ttl);
    }

    #[cfg(test)]
    async fn tracked_count(&self) -> usize {
        self.state.read().await.requests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;

    fn tracker() -> (Arc<ManualClock>, FormSubmissionTracker) {
        let clock = Arc::new(ManualClock::new(1_000));
        (clock.clone(), FormSubmissionTracker::new(clock, 30_000, 5_000))
    }

    #[tokio::test]
    async fn test_ignores_read_methods() {
        let (_clock, t) = tracker();
        assert!(!t.track("r1", 1, "https://a.com/search", "GET").await);
        assert!(!t.on_completed("r1", 200).await);
        assert!(t.result(1).await.is_none());
    }

    #[tokio::test]
    async fn test_redirect_without_completion_is_success() {
        let (_clock, t) = tracker();
        assert!(t.track("r1", 4, "https://bank.com/login", "post").await);
        assert!(t.on_redirect("r1", 302, "https://bank.com/home").await);

        let result = t.result(4).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status_code, 302);
        assert_eq!(result.redirect_url.as_deref(), Some("https://bank.com/home"));
        // 重定向链可能还有后续跳转
        assert_eq!(t.tracked_count().await, 1);
    }

    #[tokio::test]
    async fn test_completion_overwrites_provisional_result() {
        let (_clock, t) = tracker();
        t.track("r1", 4, "https://bank.com/login", "POST").await;
        t.on_redirect("r1", 302, "https://bank.com/mfa").await;
        assert!(t.on_completed("r1", 401).await);

        let result = t.result(4).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.status_code, 401);
        assert_eq!(t.tracked_count().await, 0);
    }

    #[tokio::test]
    async fn test_network_error_is_status_zero() {
        let (_clock, t) = tracker();
        t.track("r1", 2, "https://bank.com/login", "PUT").await;
        assert!(t.on_error("r1", "net::ERR_CONNECTION_RESET").await);
        let result = t.result(2).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.status_code, 0);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_result_expires_after_five_seconds() {
        let (clock, t) = tracker();
        t.track("r1", 3, "https://bank.com/login", "POST").await;
        t.on_completed("r1", 200).await;
        clock.advance(4_999);
        assert!(t.result(3).await.is_some());
        clock.advance(1);
        assert!(t.result(3).await.is_none());
    }

    #[tokio::test]
    async fn test_stale_requests_are_swept() {
        let (clock, t) = tracker();
        t.track("r1", 3, "https://bank.com/login", "POST").await;
        clock.advance(30_000);
        assert!(!t.on_completed("r1", 200).await);
        assert_eq!(t.tracked_count().await, 0);
    }

    #[tokio::test]
    async fn test_clear_tab() {
        let (_clock, t) = tracker();
        t.track("r1", 3, "https://bank.com/login", "POST").await;
        t.track("r2", 9, "https://shop.com/login", "POST").await;
        t.on_redirect("r1", 301, "https://bank.com/").await;
        t.clear_tab(3).await;
        assert!(t.result(3).await.is_none());
        assert_eq!(t.tracked_count().await, 1);
    }
}
