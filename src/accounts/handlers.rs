use anyhow::Context;
use axum::{
    extract::{FromRef, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::{
    accounts::{
        email::EmailMessage,
        extractors::{clear_session_cookie, session_cookie, AuthUser, LoginRedirect},
        forms::{FormErrors, LoginForm, SignUpForm, UpdateProfileForm, NON_FIELD},
        password::{hash_password, verify_password},
        repo::CreateUserError,
        repo_types::NewUser,
        routes,
        tokens::{decode_uid, encode_uid, JwtKeys},
    },
    config::AppConfig,
    error::AppError,
    state::AppState,
    templates::render_to_string,
};

const ACTIVATION_SUBJECT: &str = "Please Activate Your Account";
const BAD_CREDENTIALS: &str = "Please enter a correct username and password.";

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route(routes::HOME, get(home_view))
        .route(routes::ACTIVATION_SENT, get(activation_sent_view))
        .route(routes::PROFILE_UPDATED, get(profile_updated_view))
        .route(routes::SIGNUP, get(signup_form).post(signup))
        .route(routes::ACTIVATE, get(activate))
        .route(routes::PROFILE, get(update_profile_form).post(update_profile))
        .route(routes::LOGIN, get(login_form).post(login))
        .route(routes::LOGOUT, post(logout))
}

fn render(name: &str, context: Value) -> Result<Response, AppError> {
    Ok(Html(render_to_string(name, &context)?).into_response())
}

/// Domain for absolute links: the configured site, else the request `Host`
/// when its hostname is allowed. `None` means the host is not trusted.
fn current_domain(config: &AppConfig, headers: &HeaderMap) -> Option<String> {
    if let Some(domain) = &config.site_domain {
        return Some(domain.clone());
    }
    let host = match headers.get(header::HOST).and_then(|h| h.to_str().ok()) {
        Some(h) if !h.trim().is_empty() => h.trim(),
        _ => return Some("localhost".to_string()),
    };
    config.host_allowed(host).then(|| host.to_string())
}

#[instrument(skip(state, user))]
pub async fn home_view(
    State(state): State<AppState>,
    user: Option<AuthUser>,
) -> Result<Response, AppError> {
    let signed_in = match user {
        Some(AuthUser(id)) => state.users.find_by_id(id).await?,
        None => None,
    };
    let (greeting, nav) = match signed_in {
        Some(u) => (
            format!("Signed in as {}.", u.username),
            format!(
                "<a href=\"{}\">Update profile</a> | \
                 <form method=\"post\" action=\"{}\"><button type=\"submit\">Log out</button></form>",
                routes::PROFILE,
                routes::LOGOUT
            ),
        ),
        None => (
            "Welcome.".to_string(),
            format!(
                "<a href=\"{}\">Sign up</a> | <a href=\"{}\">Log in</a>",
                routes::SIGNUP,
                routes::LOGIN
            ),
        ),
    };
    render(
        "accounts/home.html",
        json!({ "greeting": greeting, "nav": nav }),
    )
}

pub async fn activation_sent_view() -> Result<Response, AppError> {
    render("accounts/activation_sent.html", json!({}))
}

pub async fn profile_updated_view() -> Result<Response, AppError> {
    render("accounts/profile_updated.html", json!({}))
}

fn render_signup(form: &SignUpForm, errors: &FormErrors) -> Result<Response, AppError> {
    render(
        "accounts/signup.html",
        json!({ "form": form.as_html(errors) }),
    )
}

pub async fn signup_form() -> Result<Response, AppError> {
    render_signup(&SignUpForm::default(), &FormErrors::default())
}

/// Create an inactive account and mail its activation link.
#[instrument(skip(state, headers, form))]
pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<SignUpForm>,
) -> Result<Response, AppError> {
    let Some(domain) = current_domain(&state.config, &headers) else {
        warn!(host = ?headers.get(header::HOST), "signup rejected, host not allowed");
        return Ok(
            (StatusCode::BAD_REQUEST, Html("<h1>Bad Request (400)</h1>")).into_response(),
        );
    };

    let cleaned = match form.clean() {
        Ok(c) => c,
        Err(errors) => {
            warn!("signup form invalid");
            return render_signup(&form, &errors);
        }
    };

    let password_hash = hash_password(&cleaned.password)?;
    let new_user = NewUser {
        username: cleaned.username,
        password_hash,
        first_name: cleaned.first_name,
        last_name: cleaned.last_name,
        email: cleaned.email,
    };
    // user can't log in until the link is confirmed
    let user = match state.users.create_inactive(new_user).await {
        Ok(u) => u,
        Err(CreateUserError::UsernameTaken) => {
            warn!(username = %form.username.trim(), "username already taken");
            let mut errors = FormErrors::default();
            errors.add("username", "A user with that username already exists.");
            return render_signup(&form, &errors);
        }
        Err(CreateUserError::Other(e)) => return Err(e.into()),
    };

    let keys = JwtKeys::from_ref(&state);
    let token = keys.make_activation_token(&user)?;
    let body = render_to_string(
        "accounts/activation_request.txt",
        &json!({
            "user": user,
            "domain": domain,
            "uid": encode_uid(user.id),
            "token": token,
        }),
    )?;
    state
        .mailer
        .send(EmailMessage {
            to_email: user.profile.email.clone(),
            subject: ACTIVATION_SUBJECT.into(),
            body,
        })
        .await
        .context("send activation email")?;

    info!(user_id = %user.id, username = %user.username, "user registered, activation email sent");
    Ok(Redirect::to(routes::ACTIVATION_SENT).into_response())
}

/// Activate the account named by the link and log it in.
#[instrument(skip(state, token))]
pub async fn activate(
    State(state): State<AppState>,
    Path((uidb64, token)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let user = match decode_uid(&uidb64) {
        Some(id) => state.users.find_by_id(id).await?,
        None => None,
    };

    let keys = JwtKeys::from_ref(&state);
    let Some(user) = user.filter(|u| keys.check_activation_token(u, &token)) else {
        warn!("invalid activation link");
        return render("accounts/activation_invalid.html", json!({}));
    };

    if !state.users.activate(user.id).await? {
        warn!(user_id = %user.id, "account already activated");
        return render("accounts/activation_invalid.html", json!({}));
    }

    let session = keys.sign_session(user.id)?;
    let cookie = session_cookie(
        &session,
        keys.session_ttl.as_secs(),
        state.config.session_cookie_secure,
    )?;
    state.users.record_login(user.id).await?;

    info!(user_id = %user.id, "account activated");
    Ok(([(header::SET_COOKIE, cookie)], Redirect::to(routes::HOME)).into_response())
}

fn render_profile(form: &UpdateProfileForm, errors: &FormErrors) -> Result<Response, AppError> {
    render(
        "accounts/update_profile.html",
        json!({ "form": form.as_html(errors) }),
    )
}

#[instrument(skip(state))]
pub async fn update_profile_form(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Response, AppError> {
    let Some(user) = state.users.find_by_id(user_id).await? else {
        warn!(%user_id, "session for missing user");
        return Ok(LoginRedirect {
            next: routes::PROFILE.into(),
        }
        .into_response());
    };
    let form = UpdateProfileForm {
        first_name: user.profile.first_name,
        last_name: user.profile.last_name,
    };
    render_profile(&form, &FormErrors::default())
}

/// Overwrite the signed-in user's names. Last writer wins.
#[instrument(skip(state, form))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Form(form): Form<UpdateProfileForm>,
) -> Result<Response, AppError> {
    if state.users.find_by_id(user_id).await?.is_none() {
        warn!(%user_id, "session for missing user");
        return Ok(LoginRedirect {
            next: routes::PROFILE.into(),
        }
        .into_response());
    }

    let cleaned = match form.clean() {
        Ok(c) => c,
        Err(errors) => return render_profile(&form, &errors),
    };
    state
        .users
        .update_names(user_id, &cleaned.first_name, &cleaned.last_name)
        .await?;

    info!(%user_id, "profile updated");
    Ok(Redirect::to(routes::PROFILE_UPDATED).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct NextQuery {
    #[serde(default)]
    pub next: String,
}

fn render_login(form: &LoginForm, errors: &FormErrors) -> Result<Response, AppError> {
    render("accounts/login.html", json!({ "form": form.as_html(errors) }))
}

pub async fn login_form(Query(q): Query<NextQuery>) -> Result<Response, AppError> {
    let form = LoginForm {
        next: q.next,
        ..LoginForm::default()
    };
    render_login(&form, &FormErrors::default())
}

#[instrument(skip(state, form))]
pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let (username, password) = match form.clean() {
        Ok(c) => c,
        Err(errors) => return render_login(&form, &errors),
    };

    let user = state.users.find_by_username(&username).await?;
    // inactive accounts are indistinguishable from bad credentials
    let authenticated = match &user {
        Some(u) if u.is_active => verify_password(&password, &u.password_hash)?,
        _ => false,
    };
    let Some(user) = user.filter(|_| authenticated) else {
        warn!(%username, "login rejected");
        let mut errors = FormErrors::default();
        errors.add(NON_FIELD, BAD_CREDENTIALS);
        return render_login(&form, &errors);
    };

    let keys = JwtKeys::from_ref(&state);
    let session = keys.sign_session(user.id)?;
    let cookie = session_cookie(
        &session,
        keys.session_ttl.as_secs(),
        state.config.session_cookie_secure,
    )?;
    state.users.record_login(user.id).await?;

    info!(user_id = %user.id, "user logged in");
    Ok(([(header::SET_COOKIE, cookie)], redirect_to_next(&form.next)).into_response())
}

/// Follow `next` when it is a local path that fits in a `Location` header.
fn redirect_to_next(next: &str) -> Redirect {
    if routes::is_safe_next(next) && HeaderValue::from_str(next).is_ok() {
        Redirect::to(next)
    } else {
        Redirect::to(routes::HOME)
    }
}

pub async fn logout(State(state): State<AppState>) -> Response {
    (
        [(
            header::SET_COOKIE,
            clear_session_cookie(state.config.session_cookie_secure),
        )],
        Redirect::to(routes::HOME),
    )
        .into_response()
}
