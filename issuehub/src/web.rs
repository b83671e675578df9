//! Web UI Handlers
//!
//! Server-rendered pages and form submissions:
//! - `GET /` - Repositories of the logged-in user
//! - `GET|POST /register/` - Create an account
//! - `GET|POST /login/` - Start a session
//! - `GET /logout/` - End the session
//! - `GET|POST /create/repository/` - New repository
//! - `GET /repository/{id}/details/` - Repository with its issues
//! - `GET|POST /repository/{id}/edit/` - Rename / describe a repository (owner only)
//! - `GET|POST /repository/{id}/create_issue/` - File an issue
//! - `GET /{id}/issues/` - Issues of a repository, newest first

use askama::Template;
use axum::{
    Form, Router,
    extract::{Path, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    auth::{self, CurrentUser, LOGIN_PATH, Session, SessionCookies, with_cookie},
    config::Config,
    database::{Database, DatabaseError, NewIssue, NewUser},
    error::AppError,
    forms::{
        self, FormErrors, IssueChoices, IssueForm, LoginForm, RegisterForm, RepositoryForm,
        SelectOption, check,
    },
    models::{Choice, Flash, Issue, Repository, User},
};

const HOME_PATH: &str = "/";

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub cookies: SessionCookies,
}

impl AppState {
    pub fn new(db: Database, config: &Config) -> Self {
        Self {
            db,
            cookies: SessionCookies::new(config),
        }
    }
}

// Template rendering helper
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => AppError::Template(err).into_response(),
        }
    }
}

/// What every page's layout needs: the title, who is logged in, and the
/// flash messages queued for this request.
#[derive(Debug, Default)]
pub struct PageContext {
    pub title: String,
    pub username: Option<String>,
    pub flashes: Vec<Flash>,
}

impl PageContext {
    pub fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Default::default()
        }
    }

    async fn load(state: &AppState, session: &Session, title: &str) -> Result<Self, AppError> {
        Ok(Self {
            title: title.to_string(),
            username: session.user.as_ref().map(|u| u.username.clone()),
            flashes: session.take_flashes(&state.db).await?,
        })
    }
}

// Templates
#[derive(Template)]
#[template(path = "home.html")]
struct HomeTemplate {
    ctx: PageContext,
    repositories: Vec<Repository>,
}

#[derive(Template)]
#[template(path = "register.html")]
struct RegisterTemplate {
    ctx: PageContext,
    form: RegisterForm,
    errors: FormErrors,
}

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    ctx: PageContext,
    form: LoginForm,
    errors: FormErrors,
}

#[derive(Template)]
#[template(path = "repository_form.html")]
struct RepositoryFormTemplate {
    ctx: PageContext,
    action: String,
    submit_label: &'static str,
    form: RepositoryForm,
    errors: FormErrors,
}

#[derive(Template)]
#[template(path = "repository.html")]
struct RepositoryTemplate {
    ctx: PageContext,
    repo: Repository,
    issues: Vec<Issue>,
    can_edit: bool,
}

#[derive(Template)]
#[template(path = "create_issue.html")]
struct CreateIssueTemplate {
    ctx: PageContext,
    repo: Repository,
    form: IssueForm,
    statuses: Vec<SelectOption>,
    categories: Vec<SelectOption>,
    errors: FormErrors,
}

#[derive(Template)]
#[template(path = "issues.html")]
struct IssuesTemplate {
    ctx: PageContext,
    repo: Repository,
    issues: Vec<Issue>,
}

fn repository_details_path(id: i64) -> String {
    format!("/repository/{}/details/", id)
}

fn issues_path(id: i64) -> String {
    format!("/{}/issues/", id)
}

/// Name a unique violation reported by the database after the form field it belongs to.
fn conflict_field(err: &DatabaseError) -> Option<(&'static str, &'static str)> {
    match err.conflicting_column()? {
        "users.username" => Some(("username", "Please use a different username.")),
        "users.email" => Some(("email", "Please use a different email address.")),
        "repositories.name" => Some(("name", "A repository with this name already exists.")),
        _ => None,
    }
}

async fn load_choices(db: &Database) -> Result<IssueChoices, AppError> {
    Ok(IssueChoices {
        statuses: db.list_statuses().await?.into_iter().map(Choice::from).collect(),
        categories: db
            .list_categories()
            .await?
            .into_iter()
            .map(Choice::from)
            .collect(),
    })
}

/// The repositories owned by the logged-in user
async fn home(State(state): State<AppState>, current: CurrentUser) -> Result<Response, AppError> {
    let repositories = state
        .db
        .list_repositories_by_owner(current.user.id)
        .await?
        .into_iter()
        .map(Repository::from)
        .collect();

    let ctx = PageContext::load(&state, &current.session, "Home").await?;
    Ok(HtmlTemplate(HomeTemplate { ctx, repositories }).into_response())
}

async fn register_page(
    State(state): State<AppState>,
    session: Session,
) -> Result<Response, AppError> {
    if session.is_authenticated() {
        return Ok(Redirect::to(HOME_PATH).into_response());
    }
    let ctx = PageContext::load(&state, &session, "Register").await?;
    Ok(HtmlTemplate(RegisterTemplate {
        ctx,
        form: RegisterForm::default(),
        errors: FormErrors::default(),
    })
    .into_response())
}

async fn register(
    State(state): State<AppState>,
    mut session: Session,
    Form(form): Form<RegisterForm>,
) -> Result<Response, AppError> {
    if session.is_authenticated() {
        return Ok(Redirect::to(HOME_PATH).into_response());
    }

    let form = form.normalized();
    let mut errors = check(&form).err().unwrap_or_default();
    if errors.field("username").is_empty() && state.db.username_exists(&form.username).await? {
        errors.add("username", "Please use a different username.");
    }
    if errors.field("email").is_empty() && state.db.email_exists(&form.email).await? {
        errors.add("email", "Please use a different email address.");
    }

    if errors.is_empty() {
        let password_hash = auth::hash_password(&form.password)?;
        let created = state
            .db
            .create_user(NewUser {
                username: &form.username,
                email: &form.email,
                password_hash: &password_hash,
                about_me: forms::optional(&form.about_me),
                location: forms::optional(&form.location),
            })
            .await;

        match created {
            Ok(user_id) => {
                info!(user_id, username = form.username.as_str(), "User registered");
                let cookie = session
                    .flash(&state, "success", "Congratulations, you are now a registered user!")
                    .await?;
                return Ok(with_cookie(Redirect::to(LOGIN_PATH), cookie));
            }
            Err(e) => match conflict_field(&e) {
                Some((field, message)) => errors.add(field, message),
                None => return Err(e.into()),
            },
        }
    }

    let ctx = PageContext::load(&state, &session, "Register").await?;
    Ok(HtmlTemplate(RegisterTemplate { ctx, form, errors }).into_response())
}

async fn login_page(State(state): State<AppState>, session: Session) -> Result<Response, AppError> {
    if session.is_authenticated() {
        return Ok(Redirect::to(HOME_PATH).into_response());
    }
    let ctx = PageContext::load(&state, &session, "Sign In").await?;
    Ok(HtmlTemplate(LoginTemplate {
        ctx,
        form: LoginForm::default(),
        errors: FormErrors::default(),
    })
    .into_response())
}

async fn login(
    State(state): State<AppState>,
    mut session: Session,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    if session.is_authenticated() {
        return Ok(Redirect::to(HOME_PATH).into_response());
    }

    if let Err(errors) = check(&form) {
        let ctx = PageContext::load(&state, &session, "Sign In").await?;
        let form = LoginForm {
            password: String::new(),
            ..form
        };
        return Ok(HtmlTemplate(LoginTemplate { ctx, form, errors }).into_response());
    }

    let username = form.username.trim();
    let user = match state.db.get_user_by_username(username).await {
        Ok(user) if auth::verify_password(&form.password, &user.password_hash) => user,
        Ok(_) | Err(DatabaseError::NotFound(_)) => {
            warn!(username, "Failed login attempt");
            let cookie = session
                .flash(&state, "danger", "Invalid username or password")
                .await?;
            return Ok(with_cookie(Redirect::to(LOGIN_PATH), cookie));
        }
        Err(e) => return Err(e.into()),
    };

    let user = User::from(user);
    info!(user_id = user.id, username = user.username.as_str(), "User logged in");
    let cookie = session.login(&state, user, form.remember()).await?;
    Ok(with_cookie(Redirect::to(HOME_PATH), Some(cookie)))
}

async fn logout(State(state): State<AppState>, current: CurrentUser) -> Result<Response, AppError> {
    let CurrentUser { user, mut session } = current;
    let cookie = session.logout(&state).await?;
    info!(user_id = user.id, "User logged out");
    Ok(with_cookie(Redirect::to(LOGIN_PATH), Some(cookie)))
}

async fn create_repository_page(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Response, AppError> {
    let ctx = PageContext::load(&state, &current.session, "Create Repo").await?;
    Ok(HtmlTemplate(RepositoryFormTemplate {
        ctx,
        action: "/create/repository/".to_string(),
        submit_label: "Create Repository",
        form: RepositoryForm::default(),
        errors: FormErrors::default(),
    })
    .into_response())
}

async fn create_repository(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<RepositoryForm>,
) -> Result<Response, AppError> {
    let CurrentUser { user, mut session } = current;
    let form = form.normalized();

    let mut errors = check(&form).err().unwrap_or_default();
    if errors.field("name").is_empty() && state.db.repository_name_taken(&form.name, None).await? {
        errors.add("name", "A repository with this name already exists.");
    }

    if errors.is_empty() {
        let created = state
            .db
            .create_repository(user.id, &form.name, forms::optional(&form.description))
            .await;

        match created {
            Ok(repo_id) => {
                info!(
                    repo_id,
                    owner = user.username.as_str(),
                    name = form.name.as_str(),
                    "Repository created"
                );
                let cookie = session
                    .flash(&state, "success", "Repository created successfully")
                    .await?;
                return Ok(with_cookie(Redirect::to(HOME_PATH), cookie));
            }
            Err(e) => match conflict_field(&e) {
                Some((field, message)) => errors.add(field, message),
                None => return Err(e.into()),
            },
        }
    }

    let ctx = PageContext::load(&state, &session, "Create Repo").await?;
    Ok(HtmlTemplate(RepositoryFormTemplate {
        ctx,
        action: "/create/repository/".to_string(),
        submit_label: "Create Repository",
        form,
        errors,
    })
    .into_response())
}

/// A repository with all of its issues
async fn repository_detail(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(repo_id): Path<i64>,
) -> Result<Response, AppError> {
    let repo = Repository::from(state.db.get_repository(repo_id).await?);
    let issues = state
        .db
        .list_issues_by_repository(repo.id)
        .await?
        .into_iter()
        .map(Issue::from)
        .collect();

    let can_edit = repo.is_owned_by(current.user.id);
    let ctx = PageContext::load(&state, &current.session, "Repo Details").await?;
    Ok(HtmlTemplate(RepositoryTemplate {
        ctx,
        repo,
        issues,
        can_edit,
    })
    .into_response())
}

/// Load a repository the current user is allowed to edit.
async fn owned_repository(
    state: &AppState,
    user: &User,
    repo_id: i64,
) -> Result<Repository, AppError> {
    let repo = Repository::from(state.db.get_repository(repo_id).await?);
    if !repo.is_owned_by(user.id) {
        warn!(repo_id, user_id = user.id, "Edit of a repository owned by someone else refused");
        return Err(AppError::Forbidden(
            "You can only edit repositories you own.".to_string(),
        ));
    }
    Ok(repo)
}

async fn edit_repository_page(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(repo_id): Path<i64>,
) -> Result<Response, AppError> {
    let repo = owned_repository(&state, &current.user, repo_id).await?;
    let form = RepositoryForm {
        name: repo.name,
        description: repo.description.unwrap_or_default(),
    };

    let ctx = PageContext::load(&state, &current.session, "Edit Repo").await?;
    Ok(HtmlTemplate(RepositoryFormTemplate {
        ctx,
        action: format!("/repository/{}/edit/", repo.id),
        submit_label: "Update Repository",
        form,
        errors: FormErrors::default(),
    })
    .into_response())
}

async fn edit_repository(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(repo_id): Path<i64>,
    Form(form): Form<RepositoryForm>,
) -> Result<Response, AppError> {
    let CurrentUser { user, mut session } = current;
    let repo = owned_repository(&state, &user, repo_id).await?;
    let form = form.normalized();

    let mut errors = check(&form).err().unwrap_or_default();
    if errors.field("name").is_empty()
        && state
            .db
            .repository_name_taken(&form.name, Some(repo.id))
            .await?
    {
        errors.add("name", "A repository with this name already exists.");
    }

    if errors.is_empty() {
        let updated = state
            .db
            .update_repository(repo.id, &form.name, forms::optional(&form.description))
            .await;

        match updated {
            Ok(()) => {
                info!(repo_id = repo.id, name = form.name.as_str(), "Repository updated");
                let cookie = session
                    .flash(&state, "success", "Repository updated successfully")
                    .await?;
                return Ok(with_cookie(
                    Redirect::to(&repository_details_path(repo.id)),
                    cookie,
                ));
            }
            Err(e) => match conflict_field(&e) {
                Some((field, message)) => errors.add(field, message),
                None => return Err(e.into()),
            },
        }
    }

    let ctx = PageContext::load(&state, &session, "Edit Repo").await?;
    Ok(HtmlTemplate(RepositoryFormTemplate {
        ctx,
        action: format!("/repository/{}/edit/", repo.id),
        submit_label: "Update Repository",
        form,
        errors,
    })
    .into_response())
}

async fn create_issue_page(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(repo_id): Path<i64>,
) -> Result<Response, AppError> {
    let repo = Repository::from(state.db.get_repository(repo_id).await?);
    let choices = load_choices(&state.db).await?;
    let form = IssueForm::default();

    let ctx = PageContext::load(&state, &current.session, "Issue").await?;
    Ok(HtmlTemplate(CreateIssueTemplate {
        ctx,
        repo,
        statuses: form.status_options(&choices),
        categories: form.category_options(&choices),
        form,
        errors: FormErrors::default(),
    })
    .into_response())
}

async fn create_issue(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(repo_id): Path<i64>,
    Form(form): Form<IssueForm>,
) -> Result<Response, AppError> {
    let CurrentUser { user, mut session } = current;
    let repo = Repository::from(state.db.get_repository(repo_id).await?);
    let choices = load_choices(&state.db).await?;

    let errors = match form.validate_against(&choices) {
        Ok(issue) => {
            let issue_id = state
                .db
                .create_issue(NewIssue {
                    title: &issue.title,
                    description: issue.description.as_deref(),
                    repository_id: repo.id,
                    status_id: issue.status_id,
                    category_id: issue.category_id,
                    created_by_id: user.id,
                })
                .await?;

            info!(
                issue_id,
                repo_id = repo.id,
                author = user.username.as_str(),
                "Issue created"
            );
            let cookie = session
                .flash(&state, "success", "Issue created successfully")
                .await?;
            return Ok(with_cookie(Redirect::to(&issues_path(repo.id)), cookie));
        }
        Err(errors) => errors,
    };

    let ctx = PageContext::load(&state, &session, "Issue").await?;
    Ok(HtmlTemplate(CreateIssueTemplate {
        ctx,
        repo,
        statuses: form.status_options(&choices),
        categories: form.category_options(&choices),
        form,
        errors,
    })
    .into_response())
}

/// Issues of a repository, most recent first
async fn issues_list(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(repo_id): Path<i64>,
) -> Result<Response, AppError> {
    let repo = Repository::from(state.db.get_repository(repo_id).await?);
    let issues = state
        .db
        .list_issues_by_repository(repo.id)
        .await?
        .into_iter()
        .map(Issue::from)
        .collect();

    let ctx = PageContext::load(&state, &current.session, "Issues").await?;
    Ok(HtmlTemplate(IssuesTemplate { ctx, repo, issues }).into_response())
}

async fn not_found() -> AppError {
    AppError::NotFound("The page you requested does not exist.".to_string())
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/register/", get(register_page).post(register))
        .route("/login/", get(login_page).post(login))
        .route("/logout/", get(logout))
        .route(
            "/create/repository/",
            get(create_repository_page).post(create_repository),
        )
        .route("/repository/{repo_id}/details/", get(repository_detail))
        .route(
            "/repository/{repo_id}/edit/",
            get(edit_repository_page).post(edit_repository),
        )
        .route(
            "/repository/{repo_id}/create_issue/",
            get(create_issue_page).post(create_issue),
        )
        .route("/{repo_id}/issues/", get(issues_list))
        .fallback(not_found)
}

/// The full application with request tracing, ready to serve.
pub fn app(state: AppState) -> Router {
    routes().layer(TraceLayer::new_for_http()).with_state(state)
}
