//! Form Validators
//!
//! One input schema per endpoint. Field rules are declared with `validator`;
//! checks that need the database (uniqueness, dropdown choices) run in the
//! handlers against explicitly loaded data.

use std::collections::BTreeMap;

use serde::Deserialize;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::models::Choice;

const REQUIRED: &str = "This field is required.";
const INVALID_CHOICE: &str = "Not a valid choice.";

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("required").with_message(REQUIRED.into()));
    }
    Ok(())
}

/// Empty text areas are stored as NULL.
pub fn optional(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Field name to messages, in the order they should be shown.
#[derive(Debug, Default, Clone)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn field(&self, name: &str) -> &[String] {
        self.0.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<ValidationErrors> for FormErrors {
    fn from(errors: ValidationErrors) -> Self {
        let mut out = FormErrors::default();
        for (field, errors) in errors.field_errors() {
            // A missing value makes every other rule on that field noise.
            let required = errors.iter().any(|e| e.code == "required");
            for error in errors
                .iter()
                .filter(|e| !required || e.code == "required")
            {
                let message = error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value ({}).", error.code));
                out.add(&field.to_string(), message);
            }
        }
        out
    }
}

/// Run the declarative rules of a form.
pub fn check<T: Validate>(form: &T) -> Result<(), FormErrors> {
    form.validate().map_err(FormErrors::from)
}

#[derive(Debug, Default, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct RegisterForm {
    #[validate(
        custom(function = "not_blank"),
        length(max = 64, message = "Username must be at most 64 characters.")
    )]
    pub username: String,
    #[validate(
        custom(function = "not_blank"),
        email(message = "Invalid email address."),
        length(max = 120, message = "Email must be at most 120 characters.")
    )]
    pub email: String,
    #[validate(custom(function = "not_blank"))]
    pub password: String,
    #[validate(
        custom(function = "not_blank"),
        must_match(other = "password", message = "Field must be equal to password.")
    )]
    pub password2: String,
    #[validate(length(max = 140, message = "About me must be at most 140 characters."))]
    pub about_me: String,
    #[validate(length(max = 20, message = "Location must be at most 20 characters."))]
    pub location: String,
}

impl RegisterForm {
    /// Trim the identifying fields. Passwords are kept verbatim.
    pub fn normalized(mut self) -> Self {
        self.username = self.username.trim().to_string();
        self.email = self.email.trim().to_string();
        self.about_me = self.about_me.trim().to_string();
        self.location = self.location.trim().to_string();
        self
    }
}

#[derive(Debug, Default, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct LoginForm {
    #[validate(custom(function = "not_blank"))]
    pub username: String,
    #[validate(custom(function = "not_blank"))]
    pub password: String,
    /// Checkbox; browsers send it only when ticked.
    pub remember_me: Option<String>,
}

impl LoginForm {
    pub fn remember(&self) -> bool {
        self.remember_me.is_some()
    }
}

/// Used both to create a repository and to edit one.
#[derive(Debug, Default, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct RepositoryForm {
    #[validate(
        custom(function = "not_blank"),
        length(max = 100, message = "Repository name must be at most 100 characters.")
    )]
    pub name: String,
    #[validate(length(max = 500, message = "Description must be at most 500 characters."))]
    pub description: String,
}

impl RepositoryForm {
    pub fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self
    }
}

/// The statuses and categories an issue may be filed under, loaded per request.
#[derive(Debug, Default, Clone)]
pub struct IssueChoices {
    pub statuses: Vec<Choice>,
    pub categories: Vec<Choice>,
}

#[derive(Debug, Default, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct IssueForm {
    #[validate(
        custom(function = "not_blank"),
        length(max = 100, message = "Issue title must be at most 100 characters.")
    )]
    pub title: String,
    #[validate(length(max = 400, message = "Description must be at most 400 characters."))]
    pub description: String,
    #[validate(custom(function = "not_blank"))]
    pub status: String,
    #[validate(custom(function = "not_blank"))]
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidIssue {
    pub title: String,
    pub description: Option<String>,
    pub status_id: i64,
    pub category_id: i64,
}

impl IssueForm {
    /// Field rules plus resolution of the selected status and category
    /// against `choices`.
    pub fn validate_against(&self, choices: &IssueChoices) -> Result<ValidIssue, FormErrors> {
        let mut errors = match check(self) {
            Ok(()) => FormErrors::default(),
            Err(errors) => errors,
        };

        let status_id = resolve_choice(&self.status, &choices.statuses);
        if status_id.is_none() && errors.field("status").is_empty() {
            errors.add("status", INVALID_CHOICE);
        }
        let category_id = resolve_choice(&self.category, &choices.categories);
        if category_id.is_none() && errors.field("category").is_empty() {
            errors.add("category", INVALID_CHOICE);
        }

        match (status_id, category_id) {
            (Some(status_id), Some(category_id)) if errors.is_empty() => Ok(ValidIssue {
                title: self.title.trim().to_string(),
                description: optional(&self.description).map(str::to_string),
                status_id,
                category_id,
            }),
            _ => Err(errors),
        }
    }

    pub fn status_options(&self, choices: &IssueChoices) -> Vec<SelectOption> {
        select_options(&choices.statuses, &self.status)
    }

    pub fn category_options(&self, choices: &IssueChoices) -> Vec<SelectOption> {
        select_options(&choices.categories, &self.category)
    }
}

/// A dropdown entry ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub id: i64,
    pub title: String,
    pub selected: bool,
}

fn select_options(choices: &[Choice], submitted: &str) -> Vec<SelectOption> {
    let submitted = submitted.trim();
    choices
        .iter()
        .map(|c| SelectOption {
            id: c.id,
            title: c.title.clone(),
            selected: c.id.to_string() == submitted,
        })
        .collect()
}

fn resolve_choice(raw: &str, choices: &[Choice]) -> Option<i64> {
    let id: i64 = raw.trim().parse().ok()?;
    choices.iter().any(|c| c.id == id).then_some(id)
}
