use std::convert::Infallible;

use thiserror::Error;
use warp::{http::StatusCode, reject::Rejection, reply::Reply};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Add at least one ingredient")]
    EmptyIngredients,
    #[error("An ingredient may appear only once per recipe")]
    DuplicateIngredient,
    #[error("Add at least one tag")]
    EmptyTags,
    #[error("A tag may appear only once per recipe")]
    DuplicateTag,
    #[error("Cooking time must be at least one minute")]
    CookingTime,
    #[error("Ingredient amount must be at least one")]
    Amount,
    #[error("Unknown {0} reference")]
    UnknownReference(&'static str),
    #[error("Image must be a base64 data URI")]
    InvalidImage,
    #[error("Flag filters accept only 0 or 1")]
    InvalidFlag,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("You don't have permission to perform this action")]
    PermissionDenied,
    #[error("Authentication required")]
    AuthenticationRequired,
    #[error("No {0} exists with the specified id")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(&'static str),
    #[error("You cannot subscribe to yourself")]
    SelfReferenceRejected,
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            // Conflicts and self-references report 400, not 409; clients
            // distinguish them by message.
            ApiError::Validation(_) | ApiError::Conflict(_) | ApiError::SelfReferenceRejected => {
                StatusCode::BAD_REQUEST
            }
            ApiError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            ApiError::PermissionDenied => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Query(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl warp::reject::Reject for ApiError {}

impl From<sqlx::Error> for ApiError {
    fn from(value: sqlx::Error) -> Self {
        // Store-level constraint failures carry request semantics; everything
        // else is a plain query failure.
        if let sqlx::Error::Database(e) = &value {
            if e.is_unique_violation() {
                return ApiError::Conflict("The entry already exists");
            }
            if e.is_foreign_key_violation() {
                return ApiError::Validation(ValidationError::UnknownReference("row"));
            }
        }
        ApiError::Query(QueryError::from(value))
    }
}

#[derive(Debug, Error)]
#[error("{info}")]
pub struct QueryError {
    info: String,
}

impl QueryError {
    pub fn new(info: String) -> Self {
        Self { info }
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(value: sqlx::Error) -> Self {
        match value {
            sqlx::Error::Configuration(e) => Self::new(format!("{e}")),
            sqlx::Error::Database(e) => Self::new(format!("{e}")),
            sqlx::Error::Io(e) => Self::new(format!("{e}")),
            sqlx::Error::Tls(e) => Self::new(format!("{e}")),
            sqlx::Error::Protocol(e) => Self::new(format!("{e}")),
            sqlx::Error::RowNotFound => Self::new(String::from("RowNotFound")),
            sqlx::Error::TypeNotFound { type_name } => {
                Self::new(format!("Type not found: {type_name}"))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => {
                Self::new(format!("Column index out of bounds {index} ({len})"))
            }
            sqlx::Error::ColumnNotFound(e) => Self::new(format!("{e}")),
            sqlx::Error::ColumnDecode { index, source } => {
                Self::new(format!("Column decode {index} ({source})"))
            }
            sqlx::Error::Decode(e) => Self::new(format!("{e}")),
            sqlx::Error::AnyDriverError(e) => Self::new(format!("{e}")),
            sqlx::Error::PoolTimedOut => Self::new(String::from("Pool timed out")),
            sqlx::Error::PoolClosed => Self::new(String::from("Pool closed")),
            sqlx::Error::WorkerCrashed => Self::new(String::from("Worker crashed")),
            sqlx::Error::Migrate(e) => Self::new(format!("{e}")),
            _ => Self::new(String::from("Unknown error")),
        }
    }
}

/// Renders any rejection raised by the SDK as `{"errors": "..."}` JSON.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(e) = err.find::<ApiError>() {
        if matches!(e, ApiError::Query(_)) {
            log::error!("{e}");
        }
        (e.status(), e.to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, String::from("Not found"))
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            String::from("Internal server error"),
        )
    };

    let json = warp::reply::json(&serde_json::json!({ "errors": message }));
    Ok(warp::reply::with_status(json, status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_report_bad_request() {
        let err = ApiError::from(ValidationError::DuplicateIngredient);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn conflict_reports_bad_request_not_conflict() {
        assert_eq!(
            ApiError::Conflict("The entry already exists").status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn taxonomy_maps_to_distinct_statuses() {
        assert_eq!(
            ApiError::AuthenticationRequired.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::PermissionDenied.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound("recipe").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::SelfReferenceRejected.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Query(QueryError::new(String::from("boom"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn row_not_found_maps_to_query_error() {
        let err = ApiError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, ApiError::Query(_)));
    }
}
