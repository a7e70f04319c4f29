// 请求日志中间件
// 记录每个请求的调用方、方法、路径、耗时与状态码

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::{ok, Ready};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

/// 请求日志中间件
pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestLoggingMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RequestLoggingMiddleware { service })
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let remote_addr = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let elapsed = start_time.elapsed().as_millis();

            match &result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() {
                        log::error!("{} {} {} {}ms - {}", remote_addr, method, path, elapsed, status.as_u16());
                    } else if status.is_client_error() {
                        log::warn!("{} {} {} {}ms - {}", remote_addr, method, path, elapsed, status.as_u16());
                    } else if is_quiet_path(&path) {
                        log::debug!("{} {} {} {}ms - {}", remote_addr, method, path, elapsed, status.as_u16());
                    } else {
                        log::info!("{} {} {} {}ms - {}", remote_addr, method, path, elapsed, status.as_u16());
                    }
                }
                Err(e) => {
                    log::error!("{} {} {} {}ms - ERROR: {}", remote_addr, method, path, elapsed, e);
                }
            }

            result
        })
    }
}

/// 高频轮询路径只在debug级别记录成功请求
fn is_quiet_path(path: &str) -> bool {
    path == "/health" || path.starts_with("/order-status/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_quiet_path() {
        assert!(is_quiet_path("/health"));
        assert!(is_quiet_path("/order-status/P240101000000ABCDEF"));
        assert!(!is_quiet_path("/create-payment"));
        assert!(!is_quiet_path("/payuni-webhook"));
    }
}
