// 防伪令牌中间件
// 所有POST请求需携带一次性的 X-CSRF-Token，网关回调端点除外

use actix_web::{
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::Method,
    web, Error,
};
use futures_util::future::{ok, Ready};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::error::AppError;
use crate::services::token_service::CSRF_PURPOSE;
use crate::state::AppState;

/// 防伪令牌请求头
pub const CSRF_HEADER: &str = "X-CSRF-Token";

/// 防伪令牌中间件
pub struct CsrfProtection;

impl<S, B> Transform<S, ServiceRequest> for CsrfProtection
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = CsrfProtectionMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(CsrfProtectionMiddleware {
            service: Rc::new(service),
        })
    }
}

pub struct CsrfProtectionMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for CsrfProtectionMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);

        Box::pin(async move {
            if req.method() != Method::POST || is_csrf_exempt(req.path()) {
                return service.call(req).await.map(ServiceResponse::map_into_left_body);
            }

            let token = req
                .headers()
                .get(CSRF_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let checked = match (req.app_data::<web::Data<AppState>>(), token) {
                (Some(state), Some(token)) => state
                    .tokens
                    .consume(&token, CSRF_PURPOSE)
                    .await
                    .map_err(|e| (e, state.environment())),
                (Some(state), None) => Err((AppError::TokenInvalid, state.environment())),
                (None, _) => Err((
                    AppError::Internal("application state unavailable".to_string()),
                    crate::config::Environment::Production,
                )),
            };

            if let Err((e, env)) = checked {
                log::warn!("Rejected {} {}: {}", req.method(), req.path(), e);
                let response = e.to_response(env);
                return Ok(req.into_response(response).map_into_right_body());
            }

            service.call(req).await.map(ServiceResponse::map_into_left_body)
        })
    }
}

/// 检查路径是否免除防伪令牌 (网关直接回传的端点无法携带令牌)
fn is_csrf_exempt(path: &str) -> bool {
    let exempt_paths = ["/payment-return", "/payuni-webhook"];

    exempt_paths.iter().any(|&exempt| path == exempt)
}
