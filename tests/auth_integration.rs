use serde_json::{json, Value};
use sqlx::{Connection, Executor, PgConnection, PgPool, Row};
use std::net::TcpListener;
use trailmark::auth::generate_access_token;
use trailmark::configuration::{get_configuration, DatabaseSettings, JwtSettings};
use trailmark::startup::run;

pub struct TestApp {
    pub address: String,
    pub db_pool: PgPool,
    pub jwt_config: JwtSettings,
}

async fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let mut configuration = get_configuration().expect("Failed to read configuration.");
    configuration.database.database_name = uuid::Uuid::new_v4().to_string();
    configuration.jwt.validate().expect("Invalid JWT settings");
    let connection_pool = configure_database(&configuration.database).await;

    let jwt_config = configuration.jwt.clone();
    let server = run(listener, connection_pool.clone(), jwt_config.clone())
        .expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        db_pool: connection_pool,
        jwt_config,
    }
}

pub async fn configure_database(config: &DatabaseSettings) -> PgPool {
    let mut connection = PgConnection::connect(&config.connection_string_without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"CREATE DATABASE "{}";"#, config.database_name))
        .await
        .expect("Failed to create database.");

    let connection_pool = PgPool::connect(&config.connection_string())
        .await
        .expect("Failed to connect to Postgres.");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate the database.");
    connection_pool
}

async fn register_user(app: &TestApp, email: &str) -> Value {
    let client = reqwest::Client::new();
    let response = client
        .post(&format!("{}/auth/register", &app.address))
        .json(&json!({
            "email": email,
            "name": "Test User",
            "password": "password123"
        }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(201, response.status().as_u16());
    response.json().await.expect("Failed to parse response")
}

async fn login_user(app: &TestApp, email: &str) -> Value {
    let client = reqwest::Client::new();
    let response = client
        .post(&format!("{}/auth/login", &app.address))
        .json(&json!({ "email": email, "password": "password123" }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());
    response.json().await.expect("Failed to parse response")
}

// --- Registration ---

#[tokio::test]
async fn register_returns_201_and_never_echoes_the_password() {
    let app = spawn_app().await;

    let body = register_user(&app, "john@example.com").await;

    assert_eq!(body["email"], "john@example.com");
    assert_eq!(body["name"], "Test User");
    assert_eq!(body["role"], "user");
    assert!(body.get("password").is_none());
    assert!(body.get("password_hash").is_none());
    assert!(body.get("access_token").is_none());

    let row = sqlx::query("SELECT email, password_hash FROM users WHERE email = $1")
        .bind("john@example.com")
        .fetch_one(&app.db_pool)
        .await
        .expect("User was not persisted");
    let stored_hash: String = row.get("password_hash");
    assert!(stored_hash.starts_with("$2"));
}

#[tokio::test]
async fn register_normalizes_email_to_lowercase() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .post(&format!("{}/auth/register", &app.address))
        .json(&json!({
            "email": "  MiXeD@Example.COM ",
            "name": "Case Test",
            "password": "password123"
        }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(201, response.status().as_u16());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["email"], "mixed@example.com");
}

#[tokio::test]
async fn register_duplicate_email_returns_409() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    register_user(&app, "dup@example.com").await;

    let response = client
        .post(&format!("{}/auth/register", &app.address))
        .json(&json!({
            "email": "dup@example.com",
            "name": "Other Name",
            "password": "password456"
        }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(409, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "DUPLICATE_ENTRY");
}

#[tokio::test]
async fn register_rejects_invalid_input() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let cases = vec![
        json!({ "email": "not-an-email", "name": "A", "password": "password123" }),
        json!({ "email": "ok@example.com", "name": "", "password": "password123" }),
        json!({ "email": "ok@example.com", "name": "A", "password": "short" }),
    ];

    for body in cases {
        let response = client
            .post(&format!("{}/auth/register", &app.address))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request.");
        assert_eq!(400, response.status().as_u16(), "payload: {}", body);
    }
}

// --- Login ---

#[tokio::test]
async fn login_returns_token_pair_and_user() {
    let app = spawn_app().await;
    register_user(&app, "login@example.com").await;

    let body = login_user(&app, "login@example.com").await;

    assert!(body["access_token"].as_str().unwrap().contains('.'));
    assert_eq!(body["refresh_token"].as_str().unwrap().len(), 64);
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], app.jwt_config.access_token_expiry);
    assert_eq!(body["user"]["email"], "login@example.com");
    assert!(body["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn each_login_opens_a_distinct_session() {
    let app = spawn_app().await;
    register_user(&app, "sessions@example.com").await;

    let first = login_user(&app, "sessions@example.com").await;
    let second = login_user(&app, "sessions@example.com").await;

    assert_ne!(first["access_token"], second["access_token"]);
    assert_ne!(first["refresh_token"], second["refresh_token"]);
}

#[tokio::test]
async fn wrong_password_and_unknown_email_are_indistinguishable() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    register_user(&app, "known@example.com").await;

    let wrong_password = client
        .post(&format!("{}/auth/login", &app.address))
        .json(&json!({ "email": "known@example.com", "password": "wrongpassword" }))
        .send()
        .await
        .expect("Failed to execute request.");
    let unknown_email = client
        .post(&format!("{}/auth/login", &app.address))
        .json(&json!({ "email": "nobody@example.com", "password": "password123" }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, wrong_password.status().as_u16());
    assert_eq!(401, unknown_email.status().as_u16());

    let a: Value = wrong_password.json().await.unwrap();
    let b: Value = unknown_email.json().await.unwrap();
    assert_eq!(a["message"], b["message"]);
    assert_eq!(a["code"], b["code"]);
    assert_eq!(a["code"], "INVALID_CREDENTIALS");
}

// --- Refresh ---

#[tokio::test]
async fn refresh_rotates_the_token_pair() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    register_user(&app, "rotate@example.com").await;
    let login = login_user(&app, "rotate@example.com").await;
    let refresh_token = login["refresh_token"].as_str().unwrap();

    let response = client
        .post(&format!("{}/auth/refresh", &app.address))
        .json(&json!({ "refresh_token": refresh_token }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());

    let body: Value = response.json().await.unwrap();
    assert_ne!(body["refresh_token"], login["refresh_token"]);
    assert_eq!(body["token_type"], "Bearer");

    // The new access token must be accepted at the gate.
    let me = client
        .get(&format!("{}/auth/me", &app.address))
        .bearer_auth(body["access_token"].as_str().unwrap())
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, me.status().as_u16());
}

#[tokio::test]
async fn a_refresh_token_is_single_use() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    register_user(&app, "single@example.com").await;
    let login = login_user(&app, "single@example.com").await;
    let refresh_token = login["refresh_token"].as_str().unwrap();

    let first = client
        .post(&format!("{}/auth/refresh", &app.address))
        .json(&json!({ "refresh_token": refresh_token }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, first.status().as_u16());

    // Replay of the consumed token must fail exactly like an unknown one.
    let second = client
        .post(&format!("{}/auth/refresh", &app.address))
        .json(&json!({ "refresh_token": refresh_token }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(401, second.status().as_u16());

    let body: Value = second.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_REFRESH_TOKEN");

    let fabricated = client
        .post(&format!("{}/auth/refresh", &app.address))
        .json(&json!({ "refresh_token": "A".repeat(64) }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(401, fabricated.status().as_u16());
    let fabricated_body: Value = fabricated.json().await.unwrap();
    assert_eq!(fabricated_body["message"], body["message"]);
}

#[tokio::test]
async fn concurrent_refreshes_of_one_token_have_exactly_one_winner() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    register_user(&app, "race@example.com").await;
    let login = login_user(&app, "race@example.com").await;
    let refresh_token = login["refresh_token"].as_str().unwrap().to_string();

    let send = |token: String| {
        let client = client.clone();
        let url = format!("{}/auth/refresh", &app.address);
        async move {
            client
                .post(&url)
                .json(&json!({ "refresh_token": token }))
                .send()
                .await
                .expect("Failed to execute request.")
                .status()
                .as_u16()
        }
    };

    let (a, b, c, d) = tokio::join!(
        send(refresh_token.clone()),
        send(refresh_token.clone()),
        send(refresh_token.clone()),
        send(refresh_token.clone())
    );

    let statuses = [a, b, c, d];
    let successes = statuses.iter().filter(|&&s| s == 200).count();
    let failures = statuses.iter().filter(|&&s| s == 401).count();
    assert_eq!(1, successes, "statuses: {:?}", statuses);
    assert_eq!(3, failures, "statuses: {:?}", statuses);
}

#[tokio::test]
async fn store_active_predicate_tracks_rotation() {
    use trailmark::auth::refresh_token::{find_active_by_digest, hash_refresh_token};

    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let user = register_user(&app, "store@example.com").await;
    let user_id = uuid::Uuid::parse_str(user["id"].as_str().unwrap()).unwrap();
    let login = login_user(&app, "store@example.com").await;
    let digest = hash_refresh_token(login["refresh_token"].as_str().unwrap());

    // Active right after login, owned by the registered user.
    let record = find_active_by_digest(&app.db_pool, &digest)
        .await
        .expect("Lookup failed");
    let (owner, expires_at) = record.expect("Token should be active");
    assert_eq!(owner, user_id);
    assert!(expires_at > chrono::Utc::now());

    // Consumed by rotation: the same digest no longer satisfies the
    // active predicate.
    let response = client
        .post(&format!("{}/auth/refresh", &app.address))
        .json(&json!({ "refresh_token": login["refresh_token"] }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());

    let after = find_active_by_digest(&app.db_pool, &digest)
        .await
        .expect("Lookup failed");
    assert!(after.is_none());
}

// --- Logout ---

#[tokio::test]
async fn logout_revokes_every_open_session() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    register_user(&app, "logout@example.com").await;

    // Two concurrent sessions for the same user.
    let first = login_user(&app, "logout@example.com").await;
    let second = login_user(&app, "logout@example.com").await;

    let response = client
        .post(&format!("{}/auth/logout", &app.address))
        .bearer_auth(first["access_token"].as_str().unwrap())
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());

    for login in [&first, &second] {
        let refresh = client
            .post(&format!("{}/auth/refresh", &app.address))
            .json(&json!({ "refresh_token": login["refresh_token"] }))
            .send()
            .await
            .expect("Failed to execute request.");
        assert_eq!(401, refresh.status().as_u16());
    }
}

#[tokio::test]
async fn access_token_outlives_logout_until_expiry() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    register_user(&app, "residual@example.com").await;
    let login = login_user(&app, "residual@example.com").await;
    let access_token = login["access_token"].as_str().unwrap();

    client
        .post(&format!("{}/auth/logout", &app.address))
        .bearer_auth(access_token)
        .send()
        .await
        .expect("Failed to execute request.");

    // Access tokens are not revocable; the short TTL is the mitigation.
    let me = client
        .get(&format!("{}/auth/me", &app.address))
        .bearer_auth(access_token)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, me.status().as_u16());
}

// --- Auth gate ---

#[tokio::test]
async fn gate_distinguishes_missing_expired_and_invalid_tokens() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    let user = register_user(&app, "gate@example.com").await;
    let user_id = uuid::Uuid::parse_str(user["id"].as_str().unwrap()).unwrap();

    // Missing header
    let missing = client
        .get(&format!("{}/auth/me", &app.address))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(401, missing.status().as_u16());
    let missing_body: Value = missing.json().await.unwrap();
    assert_eq!(missing_body["message"], "Authorization header required");

    // Expired token, signed with the server's own secret
    let mut expired_config = app.jwt_config.clone();
    expired_config.access_token_expiry = -3600;
    let expired_token =
        generate_access_token(user_id, "gate@example.com", "user", &expired_config)
            .expect("Failed to generate token");

    let expired = client
        .get(&format!("{}/auth/me", &app.address))
        .bearer_auth(expired_token)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(401, expired.status().as_u16());
    let expired_body: Value = expired.json().await.unwrap();
    assert_eq!(expired_body["message"], "Token has expired");

    // Garbage token
    let invalid = client
        .get(&format!("{}/auth/me", &app.address))
        .bearer_auth("not.a.jwt")
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(401, invalid.status().as_u16());
    let invalid_body: Value = invalid.json().await.unwrap();
    assert_eq!(invalid_body["message"], "Invalid token");
}

#[tokio::test]
async fn gate_accepts_case_insensitive_bearer_scheme() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    register_user(&app, "scheme@example.com").await;
    let login = login_user(&app, "scheme@example.com").await;
    let access_token = login["access_token"].as_str().unwrap();

    let response = client
        .get(&format!("{}/auth/me", &app.address))
        .header("Authorization", format!("bearer {}", access_token))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());

    let wrong_scheme = client
        .get(&format!("{}/auth/me", &app.address))
        .header("Authorization", format!("Basic {}", access_token))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(401, wrong_scheme.status().as_u16());
}

#[tokio::test]
async fn me_returns_fresh_user_data() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    register_user(&app, "me@example.com").await;
    let login = login_user(&app, "me@example.com").await;

    // Role changes after the token was issued; /auth/me reads storage, not
    // the token snapshot.
    sqlx::query("UPDATE users SET role = 'admin' WHERE email = $1")
        .bind("me@example.com")
        .execute(&app.db_pool)
        .await
        .expect("Failed to update role");

    let me = client
        .get(&format!("{}/auth/me", &app.address))
        .bearer_auth(login["access_token"].as_str().unwrap())
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, me.status().as_u16());

    let body: Value = me.json().await.unwrap();
    assert_eq!(body["email"], "me@example.com");
    assert_eq!(body["role"], "admin");
}

#[tokio::test]
async fn refresh_reflects_current_role_in_new_access_token() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();
    register_user(&app, "promote@example.com").await;
    let login = login_user(&app, "promote@example.com").await;

    sqlx::query("UPDATE users SET role = 'admin' WHERE email = $1")
        .bind("promote@example.com")
        .execute(&app.db_pool)
        .await
        .expect("Failed to update role");

    let response = client
        .post(&format!("{}/auth/refresh", &app.address))
        .json(&json!({ "refresh_token": login["refresh_token"] }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());

    let body: Value = response.json().await.unwrap();
    let access_token = body["access_token"].as_str().unwrap();
    let claims = trailmark::auth::validate_access_token(access_token, &app.jwt_config)
        .expect("New access token should validate");
    assert_eq!(claims.role, "admin");
}

// --- Health check ---

#[tokio::test]
async fn health_check_works() {
    let app = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(&format!("{}/health_check", &app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert!(response.status().is_success());
}
