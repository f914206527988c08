//! Throttle middleware.
//!
//! Two phases around the handler: `check_and_admit` before it runs, usage
//! headers merged into its response afterwards. Routes without a registered
//! quota pass straight through.

use actix_web::{
    Error, ResponseError,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{HeaderMap, HeaderName, HeaderValue},
};
use sluice_core::{Decision, HeaderSet, RequestInfo};
use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use super::error::AppError;
use crate::throttle::Throttle;

/// Throttle middleware factory.
pub struct ThrottleMiddleware {
    throttle: Arc<Throttle>,
}

impl ThrottleMiddleware {
    pub fn new(throttle: Arc<Throttle>) -> Self {
        Self { throttle }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ThrottleMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = ThrottleMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ThrottleMiddlewareService {
            service: Rc::new(service),
            throttle: self.throttle.clone(),
        }))
    }
}

pub struct ThrottleMiddlewareService<S> {
    service: Rc<S>,
    throttle: Arc<Throttle>,
}

impl<S, B> Service<ServiceRequest> for ThrottleMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let throttle = self.throttle.clone();

        Box::pin(async move {
            let policy = req
                .match_pattern()
                .and_then(|pattern| throttle.routes.lookup(req.method().as_str(), &pattern))
                .cloned();

            let Some(policy) = policy else {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            };

            let info = request_info(&req);

            match throttle.engine.check_and_admit(&policy, &info).await {
                Decision::Denied(denied) => {
                    tracing::warn!(
                        route = %policy.route,
                        caller = ?info.remote_addr,
                        "Throttle quota exceeded"
                    );

                    let response = AppError::from(denied).error_response();
                    let (http_req, _payload) = req.into_parts();
                    Ok(ServiceResponse::new(http_req, response).map_into_right_body())
                }
                Decision::Admitted(admission) => {
                    let mut res = service.call(req).await?;
                    apply_headers(res.headers_mut(), &throttle.engine.headers(&admission));
                    Ok(res.map_into_left_body())
                }
            }
        })
    }
}

fn request_info(req: &ServiceRequest) -> RequestInfo {
    let mut info = RequestInfo::new(req.method().as_str(), req.path());

    if let Some(peer) = req.peer_addr() {
        info = info.with_remote_addr(peer.ip().to_string());
    }

    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            info = info.with_header(name.as_str(), value);
        }
    }

    info
}

/// Merge rendered usage headers into a response.
pub(crate) fn apply_headers(map: &mut HeaderMap, headers: &HeaderSet) {
    for (name, value) in headers.iter() {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid throttle header"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{App, HttpResponse, test, web};
    use async_trait::async_trait;
    use sluice_core::ports::{CounterStore, StoreUnavailable};
    use sluice_core::{HeaderConfig, ThrottleEngine, ThrottleSettings, Ttl};
    use sluice_infra::InMemoryCounterStore;
    use std::net::SocketAddr;
    use std::time::Duration;

    use crate::throttle::RouteTable;

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn ping(&self) -> Result<(), StoreUnavailable> {
            Err(StoreUnavailable::Connection("connection refused".into()))
        }

        async fn get(&self, _key: &str) -> Result<u64, StoreUnavailable> {
            Err(StoreUnavailable::Connection("connection refused".into()))
        }

        async fn ttl(&self, _key: &str) -> Result<Ttl, StoreUnavailable> {
            Err(StoreUnavailable::Connection("connection refused".into()))
        }

        async fn increment(
            &self,
            _key: &str,
            _window: Duration,
            _renew_expiry: bool,
        ) -> Result<u64, StoreUnavailable> {
            Err(StoreUnavailable::Connection("connection refused".into()))
        }
    }

    fn throttle_with(store: Arc<dyn CounterStore>, limit: u64) -> Arc<Throttle> {
        let mut routes = RouteTable::new();
        routes
            .register(
                "GET",
                "/widgets",
                &ThrottleSettings::per_period(limit, Duration::from_secs(3600)),
            )
            .unwrap();

        let engine = ThrottleEngine::new(store).with_headers(HeaderConfig::all());
        Arc::new(Throttle::new(engine, routes))
    }

    fn peer(ip: &str) -> SocketAddr {
        format!("{ip}:40000").parse().unwrap()
    }

    async fn ok() -> HttpResponse {
        HttpResponse::Ok().body("ok")
    }

    #[actix_web::test]
    async fn test_denies_after_limit() {
        let throttle = throttle_with(Arc::new(InMemoryCounterStore::new()), 2);
        let app = test::init_service(
            App::new()
                .wrap(ThrottleMiddleware::new(throttle))
                .route("/widgets", web::get().to(ok)),
        )
        .await;

        for expected_remaining in ["2", "1"] {
            let req = test::TestRequest::get()
                .uri("/widgets")
                .peer_addr(peer("1.2.3.4"))
                .to_request();
            let res = test::call_service(&app, req).await;
            assert_eq!(res.status(), StatusCode::OK);
            assert_eq!(
                res.headers().get("X-Throttle-Remaining").unwrap(),
                expected_remaining
            );
            assert_eq!(res.headers().get("X-Throttle-Limit").unwrap(), "2");
            assert!(res.headers().contains_key("X-Throttle-Reset"));
        }

        let req = test::TestRequest::get()
            .uri("/widgets")
            .peer_addr(peer("1.2.3.4"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers().get("X-Throttle-Remaining").unwrap(), "0");
        assert_eq!(res.headers().get("X-Throttle-Limit").unwrap(), "2");
        assert!(res.headers().contains_key("retry-after"));

        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["status"], 429);
        assert_eq!(body["detail"], "too many requests, please try again later");
        assert_eq!(body["limit"], 2);

        // Another caller still has its own quota
        let req = test::TestRequest::get()
            .uri("/widgets")
            .peer_addr(peer("5.6.7.8"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_unthrottled_routes_pass_through() {
        let throttle = throttle_with(Arc::new(InMemoryCounterStore::new()), 1);
        let app = test::init_service(
            App::new()
                .wrap(ThrottleMiddleware::new(throttle))
                .route("/health", web::get().to(ok)),
        )
        .await;

        for _ in 0..3 {
            let req = test::TestRequest::get().uri("/health").to_request();
            let res = test::call_service(&app, req).await;
            assert_eq!(res.status(), StatusCode::OK);
            assert!(!res.headers().contains_key("X-Throttle-Remaining"));
        }
    }

    #[actix_web::test]
    async fn test_store_outage_fails_open() {
        let throttle = throttle_with(Arc::new(DownStore), 1);
        let app = test::init_service(
            App::new()
                .wrap(ThrottleMiddleware::new(throttle))
                .route("/widgets", web::get().to(ok)),
        )
        .await;

        for _ in 0..3 {
            let req = test::TestRequest::get()
                .uri("/widgets")
                .peer_addr(peer("1.2.3.4"))
                .to_request();
            let res = test::call_service(&app, req).await;
            assert_eq!(res.status(), StatusCode::OK);
            assert!(!res.headers().contains_key("X-Throttle-Remaining"));
        }
    }

    #[actix_web::test]
    async fn test_request_info_from_service_request() {
        let req = test::TestRequest::post()
            .uri("/widgets")
            .peer_addr(peer("9.9.9.9"))
            .insert_header(("X-Api-Key", "k-1"))
            .to_srv_request();

        let info = request_info(&req);
        assert_eq!(info.method, "POST");
        assert_eq!(info.path, "/widgets");
        assert_eq!(info.remote_addr.as_deref(), Some("9.9.9.9"));
        assert_eq!(info.header("x-api-key"), Some("k-1"));
    }
}
