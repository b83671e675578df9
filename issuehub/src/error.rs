//! Error Types
//!
//! Handler-level errors and how each one is shown to the browser.
//! Details of internal failures are logged, never rendered.

use askama::Template;
use axum::{
    http::{StatusCode, header::InvalidHeaderValue},
    response::{Html, IntoResponse, Response},
};

use crate::{auth::AuthError, database::DatabaseError, web::PageContext};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),
    #[error("Invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate {
    ctx: PageContext,
    heading: String,
    description: String,
    back_url: String,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) | AppError::Database(DatabaseError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::NotFound(msg) | AppError::Forbidden(msg) => msg.clone(),
            AppError::Database(DatabaseError::NotFound(msg)) => msg.clone(),
            _ => "Something went wrong while handling your request.".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let page = ErrorTemplate {
            ctx: PageContext::titled("Error"),
            heading: status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            description: self.public_message(),
            back_url: "/".to_string(),
        };

        match page.render() {
            Ok(html) => (status, Html(html)).into_response(),
            Err(err) => {
                tracing::error!("Template error: {}", err);
                (status, self.public_message()).into_response()
            }
        }
    }
}
