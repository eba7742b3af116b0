/// Bearer Authentication Middleware
///
/// Extracts the access token from `Authorization: Bearer <token>`, validates
/// it, and injects the caller's [`AuthenticatedUser`] into request extensions
/// for handlers to take as `web::ReqData<AuthenticatedUser>`.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderValue, AUTHORIZATION},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;
use uuid::Uuid;

use crate::auth::AccessTokenMinter;
use crate::error::{AppError, AuthError};

/// The user an access token was issued to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

/// Parse the value of an `Authorization` header into a bearer token.
///
/// Rejects a missing header, any scheme but `Bearer`, an empty token, and
/// tokens with characters outside the compact-JWS alphabet (which covers
/// quoting and embedded whitespace).
pub fn extract_bearer_token(header: Option<&HeaderValue>) -> Result<&str, AuthError> {
    let value = header
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let (scheme, token) = value.split_once(' ').ok_or(AuthError::MissingToken)?;
    if !scheme.eq_ignore_ascii_case("Bearer") {
        return Err(AuthError::MissingToken);
    }

    let well_formed = !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if !well_formed {
        return Err(AuthError::MissingToken);
    }

    Ok(token)
}

/// Bearer middleware for protecting routes
pub struct JwtMiddleware {
    minter: AccessTokenMinter,
}

impl JwtMiddleware {
    pub fn new(minter: AccessTokenMinter) -> Self {
        Self { minter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
            minter: self.minter.clone(),
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
    minter: AccessTokenMinter,
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let user_id = extract_bearer_token(req.headers().get(AUTHORIZATION))
            .map_err(AppError::from)
            .and_then(|token| self.minter.validate(token).map_err(AppError::from));

        match user_id {
            Ok(user_id) => {
                req.extensions_mut().insert(AuthenticatedUser { user_id });
                tracing::debug!(user_id = %user_id, "Access token validated");

                let service = self.service.clone();
                Box::pin(async move { service.call(req).await })
            }
            Err(e) => Box::pin(async move { Err(e.into()) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(value: &str) -> HeaderValue {
        HeaderValue::from_str(value).unwrap()
    }

    #[test]
    fn test_extracts_bearer_token() {
        let value = header("Bearer abc.def-ghi_jkl");
        assert_eq!(extract_bearer_token(Some(&value)).unwrap(), "abc.def-ghi_jkl");

        let lowercase = header("bearer abc.def");
        assert_eq!(extract_bearer_token(Some(&lowercase)).unwrap(), "abc.def");
    }

    #[test]
    fn test_rejects_malformed_headers() {
        assert!(matches!(
            extract_bearer_token(None),
            Err(AuthError::MissingToken)
        ));

        let rejected = [
            "Bearer",
            "Bearer ",
            "Basic dXNlcjpwYXNz",
            "Bearer \"abc.def\"",
            "Bearer abc def",
            "Bearer  abc.def",
            "Token abc.def",
            "abc.def",
        ];
        for value in rejected {
            let value = header(value);
            assert!(
                extract_bearer_token(Some(&value)).is_err(),
                "should reject {:?}",
                value
            );
        }
    }

    mod service {
        use std::sync::Arc;

        use actix_web::{http::StatusCode, test, web, App, HttpResponse};
        use chrono::Utc;

        use super::*;
        use crate::clock::ManualClock;
        use crate::configuration::JwtSettings;

        fn minter() -> AccessTokenMinter {
            let settings = JwtSettings {
                secret: "middleware-test-secret-at-least-32-chars".to_string(),
                issuer: "finance-api".to_string(),
                audience: vec!["finance-app".to_string()],
                access_token_expiry: 900,
                refresh_token_expiry: 3600,
                session_expiry: 86400,
            };
            AccessTokenMinter::new(settings, Arc::new(ManualClock::new(Utc::now())))
        }

        async fn whoami(user: web::ReqData<AuthenticatedUser>) -> HttpResponse {
            HttpResponse::Ok().body(user.user_id.to_string())
        }

        async fn status_of(minter: AccessTokenMinter, auth: Option<&str>) -> (StatusCode, String) {
            let app = test::init_service(
                App::new()
                    .wrap(JwtMiddleware::new(minter))
                    .route("/me", web::get().to(whoami)),
            )
            .await;

            let mut req = test::TestRequest::get().uri("/me");
            if let Some(value) = auth {
                req = req.insert_header((AUTHORIZATION, value));
            }

            match app.call(req.to_request()).await {
                Ok(res) => {
                    let status = res.status();
                    let body = test::read_body(res).await;
                    (status, String::from_utf8(body.to_vec()).unwrap())
                }
                Err(e) => (e.as_response_error().status_code(), String::new()),
            }
        }

        #[actix_web::test]
        async fn test_valid_token_reaches_handler_with_user() {
            let minter = minter();
            let user_id = Uuid::new_v4();
            let token = minter.mint(user_id).unwrap();

            let (status, body) =
                status_of(minter, Some(&format!("Bearer {}", token))).await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, user_id.to_string());
        }

        #[actix_web::test]
        async fn test_missing_or_invalid_token_is_unauthorized() {
            let (status, _) = status_of(minter(), None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);

            let (status, _) = status_of(minter(), Some("Bearer not.a.jwt")).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
    }
}
