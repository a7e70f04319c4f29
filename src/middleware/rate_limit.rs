// 请求限流中间件
// 按路由类别与调用方地址检查滑动窗口额度，超出时直接返回429

use actix_web::{
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, HttpRequest,
};
use futures_util::future::{ok, Ready};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::error::AppError;
use crate::services::RouteClass;
use crate::state::AppState;

/// 请求限流中间件
pub struct RateLimit {
    class: RouteClass,
}

impl RateLimit {
    pub fn new(class: RouteClass) -> Self {
        Self { class }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimitMiddleware {
            service: Rc::new(service),
            class: self.class,
        })
    }
}

pub struct RateLimitMiddleware<S> {
    service: Rc<S>,
    class: RouteClass,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
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
        let class = self.class;

        Box::pin(async move {
            let Some(state) = req.app_data::<web::Data<AppState>>().cloned() else {
                log::error!("Rate limiter has no application state");
                let response = AppError::Internal("application state unavailable".to_string())
                    .to_response(crate::config::Environment::Production);
                return Ok(req.into_response(response).map_into_right_body());
            };

            let caller = caller_address(req.request(), state.config.server.trust_forwarded_for);
            if let Err(e) = state.gate.check_budget(class, &caller).await {
                let response = e.to_response(state.environment());
                return Ok(req.into_response(response).map_into_right_body());
            }

            let res = service.call(req).await?;
            Ok(res.map_into_left_body())
        })
    }
}

/// 调用方IP
///
/// 只有部署在会覆写 X-Forwarded-For 的反向代理之后才信任该头，否则使用连接的对端地址。
pub fn caller_ip(req: &HttpRequest, trust_forwarded_for: bool) -> Option<String> {
    if trust_forwarded_for {
        req.connection_info().realip_remote_addr().map(str::to_string)
    } else {
        req.peer_addr().map(|addr| addr.ip().to_string())
    }
}

/// 限流使用的调用方标识
pub fn caller_address(req: &HttpRequest, trust_forwarded_for: bool) -> String {
    caller_ip(req, trust_forwarded_for).unwrap_or_else(|| "unknown".to_string())
}
