mod common;

use common::{bearer, TestApp, FRONTEND_URL};
use identity_service::{
    models::{OAuthIdentity, OAuthProviderKind},
    services::oauth::generate_state,
};
use serde_json::json;
use service_core::axum::http::{Method, StatusCode};
use uuid::Uuid;

fn github_identity(provider_id: &str, email: &str) -> OAuthIdentity {
    OAuthIdentity {
        provider: OAuthProviderKind::Github,
        provider_id: provider_id.to_string(),
        email: email.to_string(),
        username: Some("octo".to_string()),
        first_name: Some("Octo".to_string()),
        last_name: Some("Cat".to_string()),
        avatar: None,
        access_token: Some("gh-access".to_string()),
        refresh_token: None,
    }
}

fn query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| urlencoding::decode(value).ok().map(|v| v.into_owned()))?
    })
}

#[tokio::test]
async fn redirect_points_at_the_provider() {
    let app = TestApp::spawn().await;

    let response = app.get("/auth/oauth/github", &[]).await;
    assert_eq!(response.status, StatusCode::SEE_OTHER);
    let location = response.header("location").unwrap();
    assert!(location.starts_with("https://github.com/login/oauth/authorize"));
    assert!(query_param(location, "state").is_some());

    let unsupported = app.get("/auth/oauth/myspace", &[]).await;
    assert_eq!(unsupported.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn callback_signs_in_and_redirects_with_tokens() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant("Acme").await;
    app.oauth.register("good-code", github_identity("gh-1", "Octo@x.com"));

    let state = generate_state(Some(tenant.tenant_id));
    let response = app
        .get(
            &format!("/auth/oauth/github/callback?code=good-code&state={}", state),
            &[],
        )
        .await;
    assert_eq!(response.status, StatusCode::SEE_OTHER);

    let location = response.header("location").unwrap().to_string();
    assert!(location.starts_with(&format!("{}/auth/callback?", FRONTEND_URL)));
    let access = query_param(&location, "access_token").unwrap();
    assert!(query_param(&location, "refresh_token").is_some());

    let claims = app.state.jwt.validate_access_token(&access).unwrap();
    assert_eq!(claims.email, "octo@x.com");
    assert_eq!(claims.tid, Some(tenant.tenant_id.to_string()));

    // Signing in again with the same provider identity reuses the account.
    let again = app
        .get(
            &format!("/auth/oauth/github/callback?code=good-code&state={}", state),
            &[],
        )
        .await;
    let second = query_param(again.header("location").unwrap(), "access_token").unwrap();
    let second_claims = app.state.jwt.validate_access_token(&second).unwrap();
    assert_eq!(second_claims.sub, claims.sub);
}

#[tokio::test]
async fn callback_failures_redirect_to_the_error_page() {
    let app = TestApp::spawn().await;
    let error_page = format!("{}/auth/error?error=oauth_callback_failed", FRONTEND_URL);
    let state = generate_state(None);

    let unknown_code = app
        .get(
            &format!("/auth/oauth/github/callback?code=bad-code&state={}", state),
            &[],
        )
        .await;
    assert_eq!(unknown_code.status, StatusCode::SEE_OTHER);
    assert_eq!(unknown_code.header("location"), Some(error_page.as_str()));

    let denied = app
        .get("/auth/oauth/github/callback?error=access_denied", &[])
        .await;
    assert_eq!(denied.header("location"), Some(error_page.as_str()));

    app.oauth.register("good-code", github_identity("gh-1", "octo@x.com"));
    let bad_state = app
        .get("/auth/oauth/github/callback?code=good-code&state=!!!", &[])
        .await;
    assert_eq!(bad_state.header("location"), Some(error_page.as_str()));

    let missing_tenant = app
        .get(
            &format!(
                "/auth/oauth/github/callback?code=good-code&state={}",
                generate_state(Some(Uuid::new_v4()))
            ),
            &[],
        )
        .await;
    assert_eq!(missing_tenant.header("location"), Some(error_page.as_str()));
}

#[tokio::test]
async fn provider_sign_in_links_an_existing_account_by_email() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant("Acme").await;
    let registered = app.register(&tenant, "octo@x.com").await;
    let user_id = registered.body["user"]["user_id"].as_str().unwrap().to_string();

    app.oauth.register("good-code", github_identity("gh-1", "octo@x.com"));
    let response = app
        .get(
            &format!(
                "/auth/oauth/github/callback?code=good-code&state={}",
                generate_state(Some(tenant.tenant_id))
            ),
            &[],
        )
        .await;
    let access = query_param(response.header("location").unwrap(), "access_token").unwrap();
    let claims = app.state.jwt.validate_access_token(&access).unwrap();
    assert_eq!(claims.sub, user_id);
}

#[tokio::test]
async fn link_list_and_unlink_accounts() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant("Acme").await;
    let registered = app.register(&tenant, "a@x.com").await;
    let auth = bearer(registered.body["access_token"].as_str().unwrap());
    let headers = [("authorization", auth.as_str())];

    app.oauth.register("link-code", github_identity("gh-7", "octo@elsewhere.com"));

    let linked = app
        .post("/auth/oauth/github/link", &headers, json!({ "code": "link-code" }))
        .await;
    assert_eq!(linked.status, StatusCode::CREATED, "{}", linked.body);
    assert_eq!(linked.body["accounts"][0]["provider"], "github");
    assert!(linked.body["accounts"][0].get("access_token").is_none());

    let twice = app
        .post("/auth/oauth/github/link", &headers, json!({ "code": "link-code" }))
        .await;
    assert_eq!(twice.status, StatusCode::CONFLICT);

    let listed = app.get("/auth/oauth/accounts", &headers).await;
    assert_eq!(listed.status, StatusCode::OK);
    assert_eq!(listed.body["accounts"].as_array().unwrap().len(), 1);

    let unlinked = app
        .request(Method::DELETE, "/auth/oauth/github", &headers, None)
        .await;
    assert_eq!(unlinked.status, StatusCode::OK);

    let gone = app
        .request(Method::DELETE, "/auth/oauth/github", &headers, None)
        .await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn identity_linked_to_someone_else_conflicts() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant("Acme").await;
    let first = app.register(&tenant, "first@x.com").await;
    let second = app.register(&tenant, "second@x.com").await;
    app.oauth.register("code-a", github_identity("gh-9", "octo@x.com"));
    app.oauth.register("code-b", github_identity("gh-9", "octo@x.com"));

    let first_auth = bearer(first.body["access_token"].as_str().unwrap());
    let linked = app
        .post(
            "/auth/oauth/github/link",
            &[("authorization", first_auth.as_str())],
            json!({ "code": "code-a" }),
        )
        .await;
    assert_eq!(linked.status, StatusCode::CREATED);

    let second_auth = bearer(second.body["access_token"].as_str().unwrap());
    let stolen = app
        .post(
            "/auth/oauth/github/link",
            &[("authorization", second_auth.as_str())],
            json!({ "code": "code-b" }),
        )
        .await;
    assert_eq!(stolen.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn link_with_bad_code_is_unauthorized() {
    let app = TestApp::spawn().await;
    let tenant = app.create_tenant("Acme").await;
    let registered = app.register(&tenant, "a@x.com").await;
    let auth = bearer(registered.body["access_token"].as_str().unwrap());

    let response = app
        .post(
            "/auth/oauth/github/link",
            &[("authorization", auth.as_str())],
            json!({ "code": "nope" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}
