//! Postgres session store against a real database.
//!
//! Each test creates a fresh database from `configuration.yaml` (overridable
//! with `APP_DATABASE__*`). Tests return early when no server is reachable.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use finance_sessions::configuration::{get_configuration, DatabaseSettings};
use finance_sessions::error::StoreError;
use finance_sessions::session::{Delegation, NewRefreshToken, PgSessionStore, SessionStore};
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use uuid::Uuid;

pub struct TestStore {
    pub store: PgSessionStore,
    pub db_pool: PgPool,
}

async fn spawn_store() -> Option<TestStore> {
    let mut configuration = get_configuration().expect("Failed to read configuration.");
    configuration.database.database_name = Uuid::new_v4().to_string();
    let db_pool = configure_database(&configuration.database).await?;

    Some(TestStore {
        store: PgSessionStore::new(db_pool.clone()),
        db_pool,
    })
}

pub async fn configure_database(config: &DatabaseSettings) -> Option<PgPool> {
    let server = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.username)
        .password(&config.password);

    // Create database
    let mut connection = match PgConnection::connect_with(&server).await {
        Ok(connection) => connection,
        Err(e) => {
            eprintln!("Skipping Postgres store test, no database: {}", e);
            return None;
        }
    };
    connection
        .execute(&*format!(r#"CREATE DATABASE "{}";"#, config.database_name))
        .await
        .expect("Failed to create database.");

    // Migrate database
    let connection_pool = PgPool::connect_with(server.database(&config.database_name))
        .await
        .expect("Failed to connect to Postgres.");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate the database.");
    Some(connection_pool)
}

/// Postgres keeps microseconds; keep test timestamps comparable.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

async fn seed_delegation(app: &TestStore, at: DateTime<Utc>) -> Delegation {
    let user_id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, email, password_hash, is_verified) VALUES ($1, $2, $3, true)")
        .bind(user_id)
        .bind(format!("{}@example.com", user_id))
        .bind("not-a-real-hash")
        .execute(&app.db_pool)
        .await
        .expect("Failed to seed user");

    app.store
        .create_delegation(user_id, at, at + Duration::days(1))
        .await
        .expect("Failed to create delegation")
}

fn new_token(delegation: &Delegation, hash: &str, at: DateTime<Utc>) -> NewRefreshToken {
    NewRefreshToken {
        token_hash: hash.to_string(),
        user_id: delegation.user_id,
        delegation_id: delegation.id,
        created_at: at,
        expires_at: at + Duration::hours(1),
    }
}

#[tokio::test]
async fn claim_succeeds_once_then_reports_false() {
    let Some(app) = spawn_store().await else { return };
    let at = now();
    let delegation = seed_delegation(&app, at).await;
    app.store
        .insert_refresh_token(new_token(&delegation, "claim-once", at))
        .await
        .unwrap();

    assert!(app.store.claim_refresh_token("claim-once", at).await.unwrap());
    assert!(!app.store.claim_refresh_token("claim-once", at).await.unwrap());

    let record = app
        .store
        .find_refresh_token_by_hash("claim-once")
        .await
        .unwrap()
        .unwrap();
    assert!(record.is_used);
    assert_eq!(record.used_at, Some(at));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_flip_the_flag_exactly_once() {
    let Some(app) = spawn_store().await else { return };
    let at = now();
    let delegation = seed_delegation(&app, at).await;
    app.store
        .insert_refresh_token(new_token(&delegation, "contended", at))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = app.store.clone();
        handles.push(tokio::spawn(async move {
            store.claim_refresh_token("contended", at).await
        }));
    }

    let mut claimed = 0;
    for handle in handles {
        if handle.await.expect("task panicked").unwrap() {
            claimed += 1;
        }
    }
    assert_eq!(claimed, 1);
}

#[tokio::test]
async fn cascade_revokes_one_delegation_and_expires_its_tokens() {
    let Some(app) = spawn_store().await else { return };
    let at = now();
    let a = seed_delegation(&app, at).await;
    let b = seed_delegation(&app, at).await;
    app.store.insert_refresh_token(new_token(&a, "a-1", at)).await.unwrap();
    app.store.insert_refresh_token(new_token(&b, "b-1", at)).await.unwrap();

    let revoked_at = at + Duration::minutes(1);
    app.store.revoke_delegation_cascade(a.id, revoked_at).await.unwrap();
    // Repeating it keeps the first revocation time
    app.store
        .revoke_delegation_cascade(a.id, revoked_at + Duration::minutes(1))
        .await
        .unwrap();

    let a_row = app.store.get_delegation(a.id).await.unwrap().unwrap();
    let b_row = app.store.get_delegation(b.id).await.unwrap().unwrap();
    assert_eq!(a_row.revoked_at, Some(revoked_at));
    assert!(!b_row.is_revoked());

    let a_token = app.store.find_refresh_token_by_hash("a-1").await.unwrap().unwrap();
    let b_token = app.store.find_refresh_token_by_hash("b-1").await.unwrap().unwrap();
    assert_eq!(a_token.expires_at, revoked_at);
    assert_eq!(b_token.expires_at, at + Duration::hours(1));
}

#[tokio::test]
async fn repeated_hash_maps_to_duplicate_hash() {
    let Some(app) = spawn_store().await else { return };
    let at = now();
    let a = seed_delegation(&app, at).await;
    let b = seed_delegation(&app, at).await;
    app.store.insert_refresh_token(new_token(&a, "same", at)).await.unwrap();

    let result = app.store.insert_refresh_token(new_token(&b, "same", at)).await;

    assert!(matches!(result, Err(StoreError::DuplicateHash)));
}

#[tokio::test]
async fn second_unused_token_in_delegation_is_rejected() {
    let Some(app) = spawn_store().await else { return };
    let at = now();
    let delegation = seed_delegation(&app, at).await;
    app.store
        .insert_refresh_token(new_token(&delegation, "current", at))
        .await
        .unwrap();

    let result = app
        .store
        .insert_refresh_token(new_token(&delegation, "another", at))
        .await;
    assert!(matches!(result, Err(StoreError::CurrentTokenExists)));

    assert!(app.store.claim_refresh_token("current", at).await.unwrap());
    app.store
        .insert_refresh_token(new_token(&delegation, "another", at))
        .await
        .unwrap();
}
