use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::templates::escape_html;

/// Key for errors that belong to the form as a whole.
pub const NON_FIELD: &str = "__all__";

const REQUIRED: &str = "This field is required.";

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref USERNAME_RE: Regex = Regex::new(r"^[\w.@+-]+$").unwrap();
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Validation messages keyed by field name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormErrors(BTreeMap<&'static str, Vec<String>>);

impl FormErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    fn finish<T>(self, cleaned: T) -> Result<T, FormErrors> {
        if self.is_empty() {
            Ok(cleaned)
        } else {
            Err(self)
        }
    }
}

fn required(errors: &mut FormErrors, field: &'static str, value: &str) -> bool {
    if value.is_empty() {
        errors.add(field, REQUIRED);
        return false;
    }
    true
}

fn max_length(errors: &mut FormErrors, field: &'static str, value: &str, max: usize) {
    let len = value.chars().count();
    if len > max {
        errors.add(
            field,
            format!("Ensure this value has at most {max} characters (it has {len})."),
        );
    }
}

fn clean_name(errors: &mut FormErrors, field: &'static str, raw: &str) -> String {
    let value = raw.trim().to_string();
    if required(errors, field, &value) {
        max_length(errors, field, &value, 100);
    }
    value
}

struct FieldDef<'a> {
    name: &'static str,
    label: &'static str,
    input_type: &'static str,
    value: &'a str,
    max_length: Option<usize>,
}

fn render_errors(out: &mut String, messages: &[String]) {
    if messages.is_empty() {
        return;
    }
    out.push_str("<ul class=\"errorlist\">");
    for m in messages {
        out.push_str("<li>");
        out.push_str(&escape_html(m));
        out.push_str("</li>");
    }
    out.push_str("</ul>\n");
}

fn render_fields(fields: &[FieldDef<'_>], errors: &FormErrors) -> String {
    let mut out = String::new();
    render_errors(&mut out, errors.get(NON_FIELD));
    for f in fields {
        if f.input_type == "hidden" {
            out.push_str(&format!(
                "<input type=\"hidden\" name=\"{}\" value=\"{}\">\n",
                f.name,
                escape_html(f.value)
            ));
            continue;
        }
        out.push_str("<p>");
        render_errors(&mut out, errors.get(f.name));
        out.push_str(&format!(
            "<label for=\"id_{name}\">{label}</label> \
             <input type=\"{ty}\" name=\"{name}\" id=\"id_{name}\" value=\"{value}\"",
            name = f.name,
            label = f.label,
            ty = f.input_type,
            value = escape_html(f.value),
        ));
        if let Some(max) = f.max_length {
            out.push_str(&format!(" maxlength=\"{max}\""));
        }
        out.push_str(" required></p>\n");
    }
    out
}

/// Registration form. Missing fields deserialize as empty and fail as required.
#[derive(Default, Deserialize)]
#[serde(default)]
pub struct SignUpForm {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password1: String,
    pub password2: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedSignUp {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

impl SignUpForm {
    pub fn clean(&self) -> Result<CleanedSignUp, FormErrors> {
        let mut errors = FormErrors::default();

        let username = self.username.trim().to_string();
        if required(&mut errors, "username", &username) {
            max_length(&mut errors, "username", &username, 150);
            if !USERNAME_RE.is_match(&username) {
                errors.add(
                    "username",
                    "Enter a valid username. This value may contain only letters, \
                     numbers, and @/./+/-/_ characters.",
                );
            }
        }

        let first_name = clean_name(&mut errors, "first_name", &self.first_name);
        let last_name = clean_name(&mut errors, "last_name", &self.last_name);

        let email = self.email.trim().to_lowercase();
        if required(&mut errors, "email", &email) {
            max_length(&mut errors, "email", &email, 150);
            if !is_valid_email(&email) {
                errors.add("email", "Enter a valid email address.");
            }
        }

        if required(&mut errors, "password1", &self.password1) {
            validate_password(&mut errors, &self.password1, &username);
        }
        if required(&mut errors, "password2", &self.password2)
            && !errors.has("password1")
            && self.password1 != self.password2
        {
            errors.add("password2", "The two password fields didn't match.");
        }

        errors.finish(CleanedSignUp {
            username,
            first_name,
            last_name,
            email,
            password: self.password1.clone(),
        })
    }

    /// Form markup. Passwords are never echoed back.
    pub fn as_html(&self, errors: &FormErrors) -> String {
        render_fields(
            &[
                FieldDef {
                    name: "username",
                    label: "Username",
                    input_type: "text",
                    value: &self.username,
                    max_length: Some(150),
                },
                FieldDef {
                    name: "first_name",
                    label: "First name",
                    input_type: "text",
                    value: &self.first_name,
                    max_length: Some(100),
                },
                FieldDef {
                    name: "last_name",
                    label: "Last name",
                    input_type: "text",
                    value: &self.last_name,
                    max_length: Some(100),
                },
                FieldDef {
                    name: "email",
                    label: "Email",
                    input_type: "email",
                    value: &self.email,
                    max_length: Some(150),
                },
                FieldDef {
                    name: "password1",
                    label: "Password",
                    input_type: "password",
                    value: "",
                    max_length: None,
                },
                FieldDef {
                    name: "password2",
                    label: "Password confirmation",
                    input_type: "password",
                    value: "",
                    max_length: None,
                },
            ],
            errors,
        )
    }
}

fn validate_password(errors: &mut FormErrors, password: &str, username: &str) {
    if password.chars().count() < 8 {
        errors.add(
            "password1",
            "This password is too short. It must contain at least 8 characters.",
        );
    }
    if password.chars().all(|c| c.is_ascii_digit()) {
        errors.add("password1", "This password is entirely numeric.");
    }
    if !username.is_empty() && password.eq_ignore_ascii_case(username) {
        errors.add("password1", "The password is too similar to the username.");
    }
}

/// Profile form. Only the names are editable.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct UpdateProfileForm {
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedProfile {
    pub first_name: String,
    pub last_name: String,
}

impl UpdateProfileForm {
    pub fn clean(&self) -> Result<CleanedProfile, FormErrors> {
        let mut errors = FormErrors::default();
        let first_name = clean_name(&mut errors, "first_name", &self.first_name);
        let last_name = clean_name(&mut errors, "last_name", &self.last_name);
        errors.finish(CleanedProfile {
            first_name,
            last_name,
        })
    }

    pub fn as_html(&self, errors: &FormErrors) -> String {
        render_fields(
            &[
                FieldDef {
                    name: "first_name",
                    label: "First name",
                    input_type: "text",
                    value: &self.first_name,
                    max_length: Some(100),
                },
                FieldDef {
                    name: "last_name",
                    label: "Last name",
                    input_type: "text",
                    value: &self.last_name,
                    max_length: Some(100),
                },
            ],
            errors,
        )
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub next: String,
}

impl LoginForm {
    pub fn clean(&self) -> Result<(String, String), FormErrors> {
        let mut errors = FormErrors::default();
        let username = self.username.trim().to_string();
        required(&mut errors, "username", &username);
        required(&mut errors, "password", &self.password);
        errors.finish((username, self.password.clone()))
    }

    pub fn as_html(&self, errors: &FormErrors) -> String {
        render_fields(
            &[
                FieldDef {
                    name: "username",
                    label: "Username",
                    input_type: "text",
                    value: &self.username,
                    max_length: Some(150),
                },
                FieldDef {
                    name: "password",
                    label: "Password",
                    input_type: "password",
                    value: "",
                    max_length: None,
                },
                FieldDef {
                    name: "next",
                    label: "",
                    input_type: "hidden",
                    value: &self.next,
                    max_length: None,
                },
            ],
            errors,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_signup() -> SignUpForm {
        SignUpForm {
            username: "ada".into(),
            first_name: " Ada ".into(),
            last_name: "Lovelace".into(),
            email: "Ada@Example.COM ".into(),
            password1: "analytical-engine".into(),
            password2: "analytical-engine".into(),
        }
    }

    #[test]
    fn signup_cleans_and_normalizes() {
        let cleaned = valid_signup().clean().expect("valid");
        assert_eq!(cleaned.first_name, "Ada");
        assert_eq!(cleaned.email, "ada@example.com");
        assert_eq!(cleaned.password, "analytical-engine");
    }

    #[test]
    fn signup_reports_every_missing_field() {
        let errors = SignUpForm::default().clean().unwrap_err();
        for field in [
            "username",
            "first_name",
            "last_name",
            "email",
            "password1",
            "password2",
        ] {
            assert_eq!(errors.get(field), [REQUIRED.to_string()], "{field}");
        }
    }

    #[test]
    fn signup_rejects_mismatched_passwords() {
        let mut form = valid_signup();
        form.password2 = "something-else".into();
        let errors = form.clean().unwrap_err();
        assert_eq!(errors.get("password2").len(), 1);
        assert!(errors.get("password1").is_empty());
    }

    #[test]
    fn signup_rejects_weak_passwords() {
        let mut form = valid_signup();
        form.password1 = "1234567".into();
        form.password2 = "1234567".into();
        let errors = form.clean().unwrap_err();
        assert_eq!(errors.get("password1").len(), 2);

        let mut form = valid_signup();
        form.username = "adaadaada".into();
        form.password1 = "AdaAdaAda".into();
        form.password2 = "AdaAdaAda".into();
        let errors = form.clean().unwrap_err();
        assert!(errors.get("password1")[0].contains("too similar"));
    }

    #[test]
    fn signup_rejects_bad_username_and_email() {
        let mut form = valid_signup();
        form.username = "ada lovelace".into();
        form.email = "not-an-email".into();
        let errors = form.clean().unwrap_err();
        assert!(!errors.get("username").is_empty());
        assert_eq!(errors.get("email"), ["Enter a valid email address.".to_string()]);
    }

    #[test]
    fn name_length_is_bounded() {
        let form = UpdateProfileForm {
            first_name: "x".repeat(101),
            last_name: "ok".into(),
        };
        let errors = form.clean().unwrap_err();
        assert!(errors.get("first_name")[0].contains("at most 100"));
    }

    #[test]
    fn html_escapes_values_and_hides_passwords() {
        let mut form = valid_signup();
        form.username = "<script>".into();
        let html = form.as_html(&FormErrors::default());
        assert!(html.contains("value=\"&lt;script&gt;\""));
        assert!(!html.contains("analytical-engine"));
    }

    #[test]
    fn html_lists_errors() {
        let mut errors = FormErrors::default();
        errors.add(NON_FIELD, "Bad credentials & more");
        errors.add("username", REQUIRED);
        let html = LoginForm::default().as_html(&errors);
        assert!(html.contains("<li>Bad credentials &amp; more</li>"));
        assert!(html.contains(&format!("<li>{REQUIRED}</li>")));
        assert!(html.contains("type=\"hidden\" name=\"next\""));
    }
}
