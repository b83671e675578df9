//! End-to-end flows through the router: registration, sessions,
//! repositories and issues.

use axum::{
    Router,
    body::Body,
    http::{
        Request, Response, StatusCode,
        header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
    },
};
use http_body_util::BodyExt;
use issuehub::{AppState, Config, Database, app, verify_password};
use tower::ServiceExt;

struct TestApp {
    app: Router,
    db: Database,
}

impl TestApp {
    async fn new() -> Self {
        let db = Database::in_memory().await.unwrap();
        db.seed_defaults().await.unwrap();
        let state = AppState::new(db.clone(), &Config::default());
        Self { app: app(state), db }
    }

    async fn get(&self, path: &str, cookie: Option<&str>) -> Response<Body> {
        let mut request = Request::builder().method("GET").uri(path);
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        self.app
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn post(&self, path: &str, cookie: Option<&str>, fields: &[(&str, &str)]) -> Response<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri(path)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        let body = serde_urlencoded::to_string(fields).unwrap();
        self.app
            .clone()
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap()
    }

    async fn register(&self, username: &str, password: &str) -> Response<Body> {
        let email = format!("{username}@example.com");
        self.post(
            "/register/",
            None,
            &[
                ("username", username),
                ("email", email.as_str()),
                ("password", password),
                ("password2", password),
            ],
        )
        .await
    }

    /// Register `username` and log in, returning the `Cookie` header value.
    async fn signed_in(&self, username: &str) -> String {
        let response = self.register(username, "s3cret-pw").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let response = self
            .post(
                "/login/",
                None,
                &[("username", username), ("password", "s3cret-pw")],
            )
            .await;
        assert_eq!(location(&response), "/");
        session_cookie(&response).expect("login sets a session cookie")
    }

    async fn create_repository(&self, cookie: &str, name: &str) -> i64 {
        let response = self
            .post(
                "/create/repository/",
                Some(cookie),
                &[("name", name), ("description", "")],
            )
            .await;
        assert_eq!(location(&response), "/");

        let user = self
            .db
            .get_user_by_username(&self.username_of(cookie).await)
            .await
            .unwrap();
        self.db
            .list_repositories_by_owner(user.id)
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.name == name)
            .unwrap()
            .id
    }

    async fn username_of(&self, cookie: &str) -> String {
        let token = cookie.split_once('=').unwrap().1;
        let session = self.db.get_session(token).await.unwrap().unwrap();
        self.db
            .get_user_by_id(session.user_id.unwrap())
            .await
            .unwrap()
            .username
    }
}

fn location(response: &Response<Body>) -> &str {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// `name=value` of the session cookie set by a response.
fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .find(|pair| pair.starts_with("issuehub_session=") && pair.len() > "issuehub_session=".len())
        .map(str::to_string)
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_registration_persists_hashed_password() {
    let app = TestApp::new().await;

    let response = app.register("alice", "correct horse").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login/");

    assert!(app.db.email_exists("alice@example.com").await.unwrap());
    let user = app.db.get_user_by_username("alice").await.unwrap();
    assert_ne!(user.password_hash, "correct horse");
    assert!(verify_password("correct horse", &user.password_hash));
    assert!(!verify_password("wrong horse", &user.password_hash));
}

#[tokio::test]
async fn test_registration_flash_shown_on_login_page() {
    let app = TestApp::new().await;

    let response = app.register("alice", "pw").await;
    let cookie = session_cookie(&response).expect("anonymous session for the flash");

    let page = body_text(app.get("/login/", Some(&cookie)).await).await;
    assert!(page.contains("Congratulations, you are now a registered user!"));

    // Flashes are shown once.
    let page = body_text(app.get("/login/", Some(&cookie)).await).await;
    assert!(!page.contains("Congratulations"));
}

#[tokio::test]
async fn test_password_mismatch_persists_nothing() {
    let app = TestApp::new().await;

    let response = app
        .post(
            "/register/",
            None,
            &[
                ("username", "alice"),
                ("email", "alice@example.com"),
                ("password", "one"),
                ("password2", "two"),
            ],
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let page = body_text(response).await;
    assert!(page.contains("Field must be equal to password."));
    assert!(!app.db.username_exists("alice").await.unwrap());
    assert!(!app.db.email_exists("alice@example.com").await.unwrap());
}

#[tokio::test]
async fn test_duplicate_username_is_a_form_error() {
    let app = TestApp::new().await;
    app.register("alice", "pw").await;

    let response = app
        .post(
            "/register/",
            None,
            &[
                ("username", "alice"),
                ("email", "other@example.com"),
                ("password", "pw"),
                ("password2", "pw"),
            ],
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Please use a different username."));
    assert!(!app.db.email_exists("other@example.com").await.unwrap());
}

#[tokio::test]
async fn test_duplicate_email_is_a_form_error() {
    let app = TestApp::new().await;
    app.register("alice", "pw").await;

    let response = app
        .post(
            "/register/",
            None,
            &[
                ("username", "alicia"),
                ("email", "alice@example.com"),
                ("password", "pw"),
                ("password2", "pw"),
            ],
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response)
        .await
        .contains("Please use a different email address."));
    assert!(!app.db.username_exists("alicia").await.unwrap());
}

#[tokio::test]
async fn test_remember_me_sets_persistent_cookie() {
    let app = TestApp::new().await;
    app.register("alice", "pw").await;

    let response = app
        .post(
            "/login/",
            None,
            &[("username", "alice"), ("password", "pw"), ("remember_me", "y")],
        )
        .await;
    assert_eq!(location(&response), "/");
    let header = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("issuehub_session="))
        .unwrap()
        .to_string();
    assert!(header.contains("Max-Age=2592000"), "{header}");

    let response = app
        .post("/login/", None, &[("username", "alice"), ("password", "pw")])
        .await;
    let header = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
    assert!(!header.contains("Max-Age"), "{header}");
}

#[tokio::test]
async fn test_login_then_logout() {
    let app = TestApp::new().await;

    let response = app.get("/", None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login/");

    let cookie = app.signed_in("alice").await;
    let response = app.get("/", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("alice"));

    let response = app.get("/logout/", Some(&cookie)).await;
    assert_eq!(location(&response), "/login/");

    let response = app.get("/", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login/");
}

#[tokio::test]
async fn test_invalid_credentials_are_not_distinguished() {
    let app = TestApp::new().await;
    app.register("alice", "pw").await;

    for (username, password) in [("alice", "wrong"), ("nobody", "pw")] {
        let response = app
            .post(
                "/login/",
                None,
                &[("username", username), ("password", password)],
            )
            .await;
        assert_eq!(location(&response), "/login/");

        let cookie = session_cookie(&response).unwrap();
        let page = body_text(app.get("/login/", Some(&cookie)).await).await;
        assert!(page.contains("Invalid username or password"));

        // The flash session is anonymous.
        let response = app.get("/", Some(&cookie)).await;
        assert_eq!(location(&response), "/login/");
    }
}

#[tokio::test]
async fn test_authenticated_user_skips_login_and_register() {
    let app = TestApp::new().await;
    let cookie = app.signed_in("alice").await;

    for path in ["/login/", "/register/"] {
        let response = app.get(path, Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");
    }
}

#[tokio::test]
async fn test_protected_routes_redirect_to_login() {
    let app = TestApp::new().await;

    for path in [
        "/",
        "/logout/",
        "/create/repository/",
        "/repository/1/details/",
        "/repository/1/edit/",
        "/repository/1/create_issue/",
        "/1/issues/",
    ] {
        let response = app.get(path, None).await;
        assert_eq!(location(&response), "/login/", "GET {path}");
    }

    let response = app
        .post("/create/repository/", None, &[("name", "sneaky")])
        .await;
    assert_eq!(location(&response), "/login/");
}

#[tokio::test]
async fn test_home_lists_only_own_repositories() {
    let app = TestApp::new().await;
    let alice = app.signed_in("alice").await;
    let bob = app.signed_in("bob").await;

    app.create_repository(&alice, "alpha-repo").await;

    let alice_home = body_text(app.get("/", Some(&alice)).await).await;
    assert!(alice_home.contains("alpha-repo"));
    assert!(alice_home.contains("Repository created successfully"));

    let bob_home = body_text(app.get("/", Some(&bob)).await).await;
    assert!(!bob_home.contains("alpha-repo"));
}

#[tokio::test]
async fn test_duplicate_repository_name_is_a_form_error() {
    let app = TestApp::new().await;
    let alice = app.signed_in("alice").await;
    let bob = app.signed_in("bob").await;
    app.create_repository(&alice, "shared-name").await;

    let response = app
        .post("/create/repository/", Some(&bob), &[("name", "shared-name")])
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response)
        .await
        .contains("A repository with this name already exists."));
}

#[tokio::test]
async fn test_owner_edits_repository() {
    let app = TestApp::new().await;
    let alice = app.signed_in("alice").await;
    let repo_id = app.create_repository(&alice, "before").await;

    let edit_path = format!("/repository/{repo_id}/edit/");
    let form = body_text(app.get(&edit_path, Some(&alice)).await).await;
    assert!(form.contains("value=\"before\""));

    let response = app
        .post(
            &edit_path,
            Some(&alice),
            &[("name", "after"), ("description", "renamed")],
        )
        .await;
    assert_eq!(location(&response), format!("/repository/{repo_id}/details/"));

    let repo = app.db.get_repository(repo_id).await.unwrap();
    assert_eq!(repo.name, "after");
    assert_eq!(repo.description.as_deref(), Some("renamed"));
}

#[tokio::test]
async fn test_rename_to_taken_name_is_a_form_error() {
    let app = TestApp::new().await;
    let alice = app.signed_in("alice").await;
    let bob = app.signed_in("bob").await;
    let repo_id = app.create_repository(&alice, "first").await;
    app.create_repository(&bob, "second").await;

    let edit_path = format!("/repository/{repo_id}/edit/");
    let response = app
        .post(&edit_path, Some(&alice), &[("name", "second")])
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response)
        .await
        .contains("A repository with this name already exists."));
    assert_eq!(app.db.get_repository(repo_id).await.unwrap().name, "first");

    // Keeping its own name is not a conflict.
    let response = app
        .post(
            &edit_path,
            Some(&alice),
            &[("name", "first"), ("description", "same name")],
        )
        .await;
    assert_eq!(location(&response), format!("/repository/{repo_id}/details/"));
}

#[tokio::test]
async fn test_repository_detail_lists_its_issues() {
    let app = TestApp::new().await;
    let alice = app.signed_in("alice").await;
    let bob = app.signed_in("bob").await;
    let repo_id = app.create_repository(&alice, "tracker").await;
    let other_id = app.create_repository(&alice, "elsewhere").await;

    let status_id = app.db.list_statuses().await.unwrap()[0].id.to_string();
    let category_id = app.db.list_categories().await.unwrap()[0].id.to_string();
    for (repo, title) in [(repo_id, "tracked-issue"), (other_id, "foreign-issue")] {
        let response = app
            .post(
                &format!("/repository/{repo}/create_issue/"),
                Some(&bob),
                &[
                    ("title", title),
                    ("status", status_id.as_str()),
                    ("category", category_id.as_str()),
                ],
            )
            .await;
        assert_eq!(location(&response), format!("/{repo}/issues/"));
    }

    let detail_path = format!("/repository/{repo_id}/details/");
    let response = app.get(&detail_path, Some(&alice)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_text(response).await;
    assert!(page.contains("<h1>tracker</h1>"));
    assert!(page.contains("tracked-issue"));
    assert!(page.contains("bob"));
    assert!(!page.contains("foreign-issue"));
    assert!(page.contains(&format!("/repository/{repo_id}/edit/")));

    // Visible to other users, without the edit link.
    let page = body_text(app.get(&detail_path, Some(&bob)).await).await;
    assert!(page.contains("tracked-issue"));
    assert!(!page.contains(&format!("/repository/{repo_id}/edit/")));
}

#[tokio::test]
async fn test_non_owner_cannot_edit_repository() {
    let app = TestApp::new().await;
    let alice = app.signed_in("alice").await;
    let bob = app.signed_in("bob").await;
    let repo_id = app.create_repository(&alice, "mine").await;

    let edit_path = format!("/repository/{repo_id}/edit/");
    assert_eq!(
        app.get(&edit_path, Some(&bob)).await.status(),
        StatusCode::FORBIDDEN
    );
    let response = app.post(&edit_path, Some(&bob), &[("name", "yours")]).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.db.get_repository(repo_id).await.unwrap().name, "mine");
}

#[tokio::test]
async fn test_missing_repository_is_not_found() {
    let app = TestApp::new().await;
    let alice = app.signed_in("alice").await;

    for path in [
        "/repository/999/details/",
        "/repository/999/edit/",
        "/repository/999/create_issue/",
        "/999/issues/",
    ] {
        let response = app.get(path, Some(&alice)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "GET {path}");
    }
}

#[tokio::test]
async fn test_empty_issue_list() {
    let app = TestApp::new().await;
    let alice = app.signed_in("alice").await;
    let repo_id = app.create_repository(&alice, "quiet").await;

    let response = app.get(&format!("/{repo_id}/issues/"), Some(&alice)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("No issues yet."));
    assert!(app.db.list_issues_by_repository(repo_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_issue_and_list_newest_first() {
    let app = TestApp::new().await;
    let alice = app.signed_in("alice").await;
    let repo_id = app.create_repository(&alice, "tracker").await;

    let statuses = app.db.list_statuses().await.unwrap();
    let categories = app.db.list_categories().await.unwrap();
    let status = &statuses[1];
    let category = &categories[2];

    let form_page = body_text(
        app.get(&format!("/repository/{repo_id}/create_issue/"), Some(&alice))
            .await,
    )
    .await;
    assert!(form_page.contains(&status.title));
    assert!(form_page.contains(&category.title));

    let status_id = status.id.to_string();
    let category_id = category.id.to_string();
    for title in ["older-issue", "newer-issue"] {
        let response = app
            .post(
                &format!("/repository/{repo_id}/create_issue/"),
                Some(&alice),
                &[
                    ("title", title),
                    ("description", "details"),
                    ("status", status_id.as_str()),
                    ("category", category_id.as_str()),
                ],
            )
            .await;
        assert_eq!(location(&response), format!("/{repo_id}/issues/"));
    }

    let issues = app.db.list_issues_by_repository(repo_id).await.unwrap();
    let alice_id = app.db.get_user_by_username("alice").await.unwrap().id;
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].title, "newer-issue");
    assert_eq!(issues[0].repository_id, repo_id);
    assert_eq!(issues[0].status_id, status.id);
    assert_eq!(issues[0].category_id, category.id);
    assert_eq!(issues[0].created_by_id, alice_id);

    let page = body_text(app.get(&format!("/{repo_id}/issues/"), Some(&alice)).await).await;
    let newer = page.find("newer-issue").unwrap();
    let older = page.find("older-issue").unwrap();
    assert!(newer < older);
    assert!(page.contains("Issue created successfully"));
}

#[tokio::test]
async fn test_issue_with_unknown_status_is_rejected() {
    let app = TestApp::new().await;
    let alice = app.signed_in("alice").await;
    let repo_id = app.create_repository(&alice, "tracker").await;
    let category_id = app.db.list_categories().await.unwrap()[0].id.to_string();

    let response = app
        .post(
            &format!("/repository/{repo_id}/create_issue/"),
            Some(&alice),
            &[
                ("title", "ghost"),
                ("status", "12345"),
                ("category", category_id.as_str()),
            ],
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Not a valid choice."));
    assert!(app.db.list_issues_by_repository(repo_id).await.unwrap().is_empty());
}
