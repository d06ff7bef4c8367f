//! 会话生命周期集成测试：恢复、锁定、解锁、登出

mod common;

use std::time::Duration;

use common::{settle, Fixture};
use passgate::core::SessionPhase;
use passgate::storage::{
    KeyValueStore, ACCESS_TOKEN, ITEM_USAGE, ORGANIZATIONS, PIN_PROTECTED_USER_KEY, PROTECTED_PIN,
    USER_KEY,
};
use serde_json::json;

async fn seed_pin_material(fx: &Fixture) {
    fx.durable
        .set(PIN_PROTECTED_USER_KEY, json!("wrapped-by-pin"))
        .await
        .unwrap();
    fx.durable.set(PROTECTED_PIN, json!("encrypted-pin")).await.unwrap();
}

#[tokio::test]
async fn test_init_without_token_logs_out() {
    let fx = Fixture::new();
    let phase = fx.manager.init().await.unwrap();
    assert_eq!(phase, SessionPhase::LoggedOut);
    assert_eq!(fx.api.list_org_calls(), 0);
}

#[tokio::test]
async fn test_init_restores_token_and_resident_key() {
    let fx = Fixture::new();
    fx.add_org("o1", true);
    fx.durable.set(ACCESS_TOKEN, json!("token-1")).await.unwrap();
    fx.ephemeral.set(USER_KEY, json!(fx.encoded_user_key())).await.unwrap();

    let phase = fx.manager.init().await.unwrap();
    settle().await;

    assert_eq!(phase, SessionPhase::Authenticated);
    let status = fx.manager.status().await;
    assert!(status.has_user_key);
    assert_eq!(status.organizations, 1);
    assert!(fx.durable.contains(ORGANIZATIONS).await);
}

#[tokio::test]
async fn test_init_without_resident_key_is_still_authenticated() {
    let fx = Fixture::new();
    fx.add_org("o1", true);
    fx.add_login("a", "o1", "bank.com", "alice", "pw");
    fx.durable.set(ACCESS_TOKEN, json!("token-1")).await.unwrap();

    assert_eq!(fx.manager.init().await.unwrap(), SessionPhase::Authenticated);
    assert!(!fx.manager.status().await.has_user_key);

    let err = fx.manager.fill_secret(1, "a", true).await.unwrap_err();
    assert_eq!(err.code(), "NO_USER_KEY");
    let err = fx.manager.request_passwords("bank.com").await.unwrap_err();
    assert_eq!(err.code(), "NO_USER_KEY");
}

#[tokio::test]
async fn test_lock_keeps_pin_material() {
    let fx = Fixture::new();
    fx.add_org("o1", true);
    fx.add_login("a", "o1", "bank.com", "alice", "pw");
    fx.sign_in().await;
    seed_pin_material(&fx).await;
    fx.manager.request_passwords("bank.com").await.unwrap();

    assert_eq!(fx.manager.lock().await.unwrap(), SessionPhase::Locked);

    let status = fx.manager.status().await;
    assert_eq!(status.organizations, 0);
    assert!(!status.has_user_key);
    assert!(!fx.has_resident_key().await);
    assert!(fx.durable.contains(PIN_PROTECTED_USER_KEY).await);
    assert!(fx.durable.contains(PROTECTED_PIN).await);
    assert!(fx.durable.contains(ACCESS_TOKEN).await);

    let err = fx.manager.request_passwords("bank.com").await.unwrap_err();
    assert_eq!(err.code(), "NO_AUTH");
}

#[tokio::test]
async fn test_unlock_after_lock_resolves_keys_again() {
    let fx = Fixture::new();
    fx.add_org("o1", true);
    fx.add_login("a", "o1", "bank.com", "alice", "pw");
    fx.sign_in().await;
    fx.manager.request_passwords("bank.com").await.unwrap();
    let unwraps = fx.crypto.unwrap_calls();

    fx.manager.lock().await.unwrap();
    assert_eq!(
        fx.manager.unlock(fx.user_key.clone()).await.unwrap(),
        SessionPhase::Authenticated
    );
    assert!(fx.has_resident_key().await);

    fx.manager.request_passwords("bank.com").await.unwrap();
    // 锁定清空了组织密钥缓存，需要重新解包
    assert_eq!(fx.crypto.unwrap_calls(), unwraps + 1);
}

#[tokio::test]
async fn test_logout_wipes_everything_lock_keeps() {
    let fx = Fixture::new();
    fx.add_org("o1", true);
    fx.add_login("a", "o1", "bank.com", "alice", "pw");
    fx.sign_in().await;
    seed_pin_material(&fx).await;
    fx.manager.record_launched("a").await.unwrap();
    assert!(fx.durable.contains(ITEM_USAGE).await);

    assert_eq!(fx.manager.logout().await.unwrap(), SessionPhase::LoggedOut);

    for key in [
        PIN_PROTECTED_USER_KEY,
        PROTECTED_PIN,
        ACCESS_TOKEN,
        ORGANIZATIONS,
        ITEM_USAGE,
    ] {
        assert!(!fx.durable.contains(key).await, "{} should be removed", key);
    }
    assert!(!fx.has_resident_key().await);

    let err = fx.manager.unlock(fx.user_key.clone()).await.unwrap_err();
    assert_eq!(err.code(), "NO_AUTH");
}

#[tokio::test]
async fn test_lock_clears_pending_state() {
    let fx = Fixture::new();
    fx.add_org("o1", true);
    fx.sign_in().await;
    fx.manager
        .stage_pending_save(
            5,
            serde_json::from_value(json!({"username": "a", "password": "p", "url": "https://bank.com"}))
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(fx.manager.check_pending_save(5).await.is_some());

    fx.manager.lock().await.unwrap();
    assert!(fx.manager.check_pending_save(5).await.is_none());
}

#[tokio::test]
async fn test_org_snapshot_survives_listing_outage() {
    let fx = Fixture::new();
    fx.add_org("o1", true);
    fx.add_login("a", "o1", "bank.com", "alice", "pw");
    fx.sign_in().await;
    assert!(fx.durable.contains(ORGANIZATIONS).await);

    // 锁定只清内存，快照仍在
    fx.manager.lock().await.unwrap();
    fx.api.fail_org_listing(true);
    fx.manager.unlock(fx.user_key.clone()).await.unwrap();

    let candidates = fx.manager.request_passwords("bank.com").await.unwrap();
    assert_eq!(candidates.len(), 1);
}

#[tokio::test]
async fn test_logout_discards_background_refresh() {
    let fx = Fixture::new();
    fx.add_org("o1", true);
    fx.api.set_latency(Duration::from_millis(50));

    fx.manager.sign_in("token-1", fx.user_key.clone()).await.unwrap();
    fx.manager.logout().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(fx.manager.phase().await, SessionPhase::LoggedOut);
    assert_eq!(fx.manager.status().await.organizations, 0);
    assert!(!fx.durable.contains(ORGANIZATIONS).await);
}

#[tokio::test]
async fn test_lock_discards_background_refresh() {
    let fx = Fixture::new();
    fx.add_org("o1", true);
    fx.api.set_latency(Duration::from_millis(50));

    fx.manager.sign_in("token-1", fx.user_key.clone()).await.unwrap();
    fx.manager.lock().await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(fx.manager.phase().await, SessionPhase::Locked);
    assert_eq!(fx.manager.status().await.organizations, 0);
}
