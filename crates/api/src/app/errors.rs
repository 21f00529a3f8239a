use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use recalc_engine::RecalcError;

pub fn recalc_error_to_response(err: RecalcError) -> axum::response::Response {
    let status = match &err {
        RecalcError::SchedulerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        RecalcError::Catalog(_) => StatusCode::BAD_GATEWAY,
        RecalcError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        RecalcError::Domain(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RecalcError::State(_)
        | RecalcError::Scheduler(_)
        | RecalcError::Recompute { .. }
        | RecalcError::Relevance(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, err.code(), err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use recalc_core::DomainError;

    #[test]
    fn scheduler_unavailable_is_503() {
        let res = recalc_error_to_response(RecalcError::SchedulerUnavailable);
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn domain_errors_are_unprocessable() {
        let res = recalc_error_to_response(RecalcError::Domain(DomainError::Validation(
            "batch size must be positive".to_string(),
        )));
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
