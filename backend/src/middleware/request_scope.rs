//! Per-request scope: context, cancellation and common response headers.
//!
//! Every request gets an HTTP [`Ctx`] stored in its extensions, which handlers
//! receive through the `Ctx` extractor. The context is canceled once the
//! request future completes or is dropped, so a client disconnect cancels the
//! work done on its behalf.
//!
//! Responses are marked uncacheable and carry permissive CORS headers.
//! Preflight `OPTIONS` requests are answered directly with an empty 200.

use std::task::{Context, Poll};

use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::Method;
use actix_web::http::header::{self, HeaderMap, HeaderValue};
use actix_web::{Error, HttpMessage, HttpResponse};
use futures_util::future::{LocalBoxFuture, Ready, ready};

use crate::domain::{Ctx, TxHandle};

const NO_CACHE: &str = "must-revalidate, no-cache, no-store, proxy-revalidate, max-age=0";
const ALLOWED_METHODS: &str = "OPTIONS, GET, HEAD, POST, PUT, PATCH, DELETE";

fn apply_headers(headers: &mut HeaderMap) {
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
}

/// Middleware attaching a request [`Ctx`] and the shared response headers.
///
/// # Examples
/// ```
/// use actix_web::App;
/// use starter::middleware::RequestScope;
///
/// let app = App::new().wrap(RequestScope::new());
/// ```
#[derive(Clone, Default)]
pub struct RequestScope {
    transaction: Option<TxHandle>,
}

impl RequestScope {
    /// Scope giving each request a fresh context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every request inside `handle` instead of its own transaction.
    ///
    /// Handlers join the transaction and never commit it; whoever created
    /// it rolls it back. Used by tests that must not leave data behind.
    #[must_use]
    pub fn with_transaction(mut self, handle: TxHandle) -> Self {
        self.transaction = Some(handle);
        self
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequestScope
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestScopeMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestScopeMiddleware {
            service,
            transaction: self.transaction.clone(),
        }))
    }
}

/// Service wrapper produced by [`RequestScope`].
pub struct RequestScopeMiddleware<S> {
    service: S,
    transaction: Option<TxHandle>,
}

impl<S> RequestScopeMiddleware<S> {
    fn request_ctx(&self) -> Ctx {
        match &self.transaction {
            Some(handle) => Ctx::http().with_transaction(handle.clone()),
            None => Ctx::http(),
        }
    }
}

impl<S, B> Service<ServiceRequest> for RequestScopeMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if req.method() == Method::OPTIONS {
            let mut res = req
                .into_response(HttpResponse::Ok().finish())
                .map_into_right_body();
            apply_headers(res.headers_mut());
            return Box::pin(ready(Ok(res)));
        }

        let ctx = self.request_ctx();
        let guard = ctx.cancel_on_drop();
        req.extensions_mut().insert(ctx);
        let fut = self.service.call(req);
        Box::pin(async move {
            let _guard = guard;
            let mut res = fut.await?;
            apply_headers(res.headers_mut());
            Ok(res.map_into_left_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use actix_web::body::BoxBody;
    use actix_web::{App, test, web};
    use rstest::rstest;

    use crate::test_support::{FakeTransactionProvider, TestTransaction};

    type Seen = Arc<Mutex<Option<Ctx>>>;

    async fn remember(seen: web::Data<Seen>, ctx: Ctx) -> HttpResponse {
        *seen.lock().expect("seen lock") = Some(ctx);
        HttpResponse::Ok().body("handled")
    }

    async fn call(
        scope: RequestScope,
        req: test::TestRequest,
    ) -> (ServiceResponse<EitherBody<BoxBody>>, Seen) {
        let seen: Seen = Arc::default();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(Arc::clone(&seen)))
                .wrap(scope)
                .default_service(web::to(remember)),
        )
        .await;
        let res = test::call_service(&app, req.to_request()).await;
        (res, seen)
    }

    #[rstest]
    #[actix_web::test]
    async fn adds_no_cache_and_cors_headers() {
        let (res, _) = call(RequestScope::new(), test::TestRequest::get().uri("/")).await;
        let headers = res.headers();
        assert_eq!(headers.get(header::CACHE_CONTROL).expect("cache-control"), NO_CACHE);
        assert_eq!(headers.get(header::EXPIRES).expect("expires"), "0");
        assert_eq!(
            headers
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .expect("allow-origin"),
            "*"
        );
        assert_eq!(
            headers
                .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
                .expect("allow-credentials"),
            "true"
        );
    }

    #[rstest]
    #[actix_web::test]
    async fn preflight_short_circuits() {
        let (res, seen) = call(
            RequestScope::new(),
            test::TestRequest::default().method(Method::OPTIONS).uri("/anything"),
        )
        .await;
        assert_eq!(res.status(), actix_web::http::StatusCode::OK);
        assert!(res.headers().contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
        assert!(test::read_body(res).await.is_empty());
        assert!(seen.lock().expect("seen lock").is_none());
    }

    #[rstest]
    #[actix_web::test]
    async fn handler_context_is_http_and_canceled_afterwards() {
        let (res, seen) = call(RequestScope::new(), test::TestRequest::get().uri("/")).await;
        assert_eq!(test::read_body(res).await, "handled");
        let ctx = seen.lock().expect("seen lock").take().expect("handler ran");
        assert!(ctx.is_http());
        assert!(ctx.transaction().is_none());
        assert!(ctx.is_canceled());
    }

    #[rstest]
    #[actix_web::test]
    async fn injected_transaction_reaches_handler() {
        let provider = FakeTransactionProvider::new();
        let tx = TestTransaction::begin(&provider).await.expect("begin");
        let (_, seen) = call(
            RequestScope::new().with_transaction(tx.handle()),
            test::TestRequest::get().uri("/"),
        )
        .await;
        let ctx = seen.lock().expect("seen lock").take().expect("handler ran");
        assert!(ctx.transaction().is_some_and(|handle| handle.same_as(&tx.handle())));
        tx.rollback().await.expect("rollback");
        assert_eq!(provider.stats().rolled_back, 1);
    }
}
