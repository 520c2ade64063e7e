//! Request body extraction
//!
//! The payment provider posts `application/x-www-form-urlencoded`; the bot and
//! mini-app post JSON. [`Payload`] accepts either, chosen by `Content-Type`.

use axum::extract::{FromRequest, Request};
use axum::http::header;
use axum::{Form, Json};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|content_type| {
                content_type.starts_with("application/x-www-form-urlencoded")
            });

        if is_form {
            let Form(value) = Form::<T>::from_request(req, state).await.map_err(|e| {
                tracing::warn!(error = %e.body_text(), "Rejected form body");
                ApiError::BadRequest("Invalid request body".into())
            })?;
            return Ok(Payload(value));
        }

        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
            tracing::warn!(error = %e.body_text(), "Rejected JSON body");
            ApiError::BadRequest("Invalid request body".into())
        })?;
        Ok(Payload(value))
    }
}
