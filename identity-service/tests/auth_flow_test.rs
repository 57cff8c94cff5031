mod common;

use common::{bearer, register_body, TestApp, PASSWORD};
use identity_service::models::AuditAction;
use service_core::axum::http::{Method, StatusCode};
use serde_json::json;

#[tokio::test]
async fn register_then_login_yields_tokens_for_the_same_user() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant("Acme").await;

    let registered = app.register(&tenant, "A@X.com").await;
    assert_eq!(registered.status, StatusCode::CREATED, "{}", registered.body);
    assert_eq!(registered.body["user"]["email"], "a@x.com");
    assert_eq!(registered.body["user"]["tenant_id"], tenant.tenant_id.to_string());
    assert!(registered.body["access_token"].is_string());
    assert!(registered.body["refresh_token"].is_string());
    assert!(registered.body["user"].get("password_hash").is_none());

    let logged_in = app.login(&tenant, "a@x.com", PASSWORD).await;
    assert_eq!(logged_in.status, StatusCode::OK, "{}", logged_in.body);

    let token = logged_in.body["access_token"].as_str().unwrap();
    let claims = app.state.jwt.validate_access_token(token).unwrap();
    assert_eq!(claims.sub, registered.body["user"]["user_id"].as_str().unwrap());
    assert_eq!(claims.tid.as_deref(), Some(tenant.tenant_id.to_string().as_str()));

    let actions: Vec<AuditAction> = app.audit.recorded().into_iter().map(|e| e.action).collect();
    assert!(actions.contains(&AuditAction::UserRegistered));
    assert!(actions.contains(&AuditAction::LoginSucceeded));
}

#[tokio::test]
async fn duplicate_email_in_tenant_conflicts() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant("Acme").await;

    assert_eq!(app.register(&tenant, "a@x.com").await.status, StatusCode::CREATED);
    let again = app.register(&tenant, "A@x.COM").await;
    assert_eq!(again.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn same_email_is_independent_across_tenants() {
    let app = TestApp::spawn().await;
    let acme = app.create_tenant("Acme").await;
    let globex = app.create_tenant("Globex").await;

    assert_eq!(app.register(&acme, "a@x.com").await.status, StatusCode::CREATED);
    assert_eq!(app.register(&globex, "a@x.com").await.status, StatusCode::CREATED);

    let acme_login = app.login(&acme, "a@x.com", PASSWORD).await;
    let globex_login = app.login(&globex, "a@x.com", PASSWORD).await;
    assert_eq!(acme_login.status, StatusCode::OK);
    assert_eq!(globex_login.status, StatusCode::OK);
    assert_ne!(acme_login.body["user"]["user_id"], globex_login.body["user"]["user_id"]);
}

#[tokio::test]
async fn user_cannot_sign_in_through_another_tenant() {
    let app = TestApp::spawn().await;
    let acme = app.create_tenant("Acme").await;
    let globex = app.create_tenant("Globex").await;

    assert_eq!(app.register(&acme, "a@x.com").await.status, StatusCode::CREATED);
    let response = app.login(&globex, "a@x.com", PASSWORD).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn weak_password_is_rejected() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant("Acme").await;

    let mut body = register_body("a@x.com");
    body["password"] = json!("alllowercase");
    let response = app
        .post(
            "/auth/register",
            &[("x-api-key", tenant.primary_api_key.as_str())],
            body,
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tenant_routes_require_an_api_key() {
    let app = TestApp::spawn().await;

    let missing = app.post("/auth/register", &[], register_body("a@x.com")).await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);

    let unknown = app
        .post(
            "/auth/register",
            &[("x-api-key", "not-a-key")],
            register_body("a@x.com"),
        )
        .await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sixth_wrong_password_is_rate_limited() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant("Acme").await;
    assert_eq!(app.register(&tenant, "a@x.com").await.status, StatusCode::CREATED);

    for _ in 0..5 {
        let response = app.login(&tenant, "a@x.com", "Wrong123!").await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.body["error"], "Invalid credentials");
    }

    let blocked = app.login(&tenant, "a@x.com", PASSWORD).await;
    assert_eq!(blocked.status, StatusCode::TOO_MANY_REQUESTS);
    assert!(blocked.header("retry-after").is_some());
}

#[tokio::test]
async fn unknown_email_and_wrong_password_look_the_same() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant("Acme").await;
    assert_eq!(app.register(&tenant, "a@x.com").await.status, StatusCode::CREATED);

    let wrong_password = app.login(&tenant, "a@x.com", "Wrong123!").await;
    let unknown_user = app.login(&tenant, "b@x.com", "Wrong123!").await;
    assert_eq!(wrong_password.status, unknown_user.status);
    assert_eq!(wrong_password.body, unknown_user.body);
}

#[tokio::test]
async fn refresh_rotates_and_old_token_is_rejected() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant("Acme").await;
    let registered = app.register(&tenant, "a@x.com").await;
    let first = registered.body["refresh_token"].as_str().unwrap().to_string();

    let rotated = app.post("/auth/refresh", &[], json!({ "refresh_token": first })).await;
    assert_eq!(rotated.status, StatusCode::OK, "{}", rotated.body);
    let second = rotated.body["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(first, second);

    let replay = app.post("/auth/refresh", &[], json!({ "refresh_token": first })).await;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);

    let current = app.post("/auth/refresh", &[], json!({ "refresh_token": second })).await;
    assert_eq!(current.status, StatusCode::OK);
}

#[tokio::test]
async fn access_token_is_not_a_refresh_token() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant("Acme").await;
    let registered = app.register(&tenant, "a@x.com").await;
    let access = registered.body["access_token"].as_str().unwrap();

    let response = app.post("/auth/refresh", &[], json!({ "refresh_token": access })).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_revokes_the_refresh_token() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant("Acme").await;
    let registered = app.register(&tenant, "a@x.com").await;
    let access = registered.body["access_token"].as_str().unwrap();
    let refresh = registered.body["refresh_token"].as_str().unwrap();

    let auth = bearer(access);
    let logout = app
        .request(Method::POST, "/auth/logout", &[("authorization", auth.as_str())], None)
        .await;
    assert_eq!(logout.status, StatusCode::OK);

    let response = app.post("/auth/refresh", &[], json!({ "refresh_token": refresh })).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn profile_requires_a_bearer_token() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant("Acme").await;
    let registered = app.register(&tenant, "a@x.com").await;
    let auth = bearer(registered.body["access_token"].as_str().unwrap());

    let profile = app.get("/auth/profile", &[("authorization", auth.as_str())]).await;
    assert_eq!(profile.status, StatusCode::OK);
    assert_eq!(profile.body["email"], "a@x.com");
    assert_eq!(profile.body["first_name"], "Ada");

    let anonymous = app.get("/auth/profile", &[]).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let garbage = app
        .get("/auth/profile", &[("authorization", "Bearer not.a.jwt")])
        .await;
    assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn change_password_replaces_the_credential() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant("Acme").await;
    let registered = app.register(&tenant, "a@x.com").await;
    let auth = bearer(registered.body["access_token"].as_str().unwrap());

    let wrong = app
        .request(
            Method::PATCH,
            "/auth/change-password",
            &[("authorization", auth.as_str())],
            Some(json!({ "old_password": "Nope1234!", "new_password": "Changed123!" })),
        )
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

    let changed = app
        .request(
            Method::PATCH,
            "/auth/change-password",
            &[("authorization", auth.as_str())],
            Some(json!({ "old_password": PASSWORD, "new_password": "Changed123!" })),
        )
        .await;
    assert_eq!(changed.status, StatusCode::OK, "{}", changed.body);

    assert_eq!(
        app.login(&tenant, "a@x.com", PASSWORD).await.status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        app.login(&tenant, "a@x.com", "Changed123!").await.status,
        StatusCode::OK
    );
}

#[tokio::test]
async fn invalid_body_is_a_validation_error() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant("Acme").await;

    let response = app
        .post(
            "/auth/login",
            &[("x-api-key", tenant.primary_api_key.as_str())],
            json!({ "email": "not-an-email", "password": PASSWORD }),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(response.body["details"].is_string());
}
