//! Request context extraction.

use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpMessage, HttpRequest};
use futures_util::future::{Ready, ready};

use crate::domain::Ctx;

impl FromRequest for Ctx {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    /// The context attached by `RequestScope`, or a fresh HTTP context when
    /// the middleware is not installed.
    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let ctx = req.extensions().get::<Ctx>().cloned().unwrap_or_else(Ctx::http);
        ready(Ok(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[actix_web::test]
    async fn falls_back_to_http_context() {
        let req = TestRequest::default().to_http_request();
        let ctx = Ctx::extract(&req).await.expect("extracts");
        assert!(ctx.is_http());
        assert!(ctx.transaction().is_none());
    }

    #[actix_web::test]
    async fn prefers_context_from_extensions() {
        let req = TestRequest::default().to_http_request();
        let attached = Ctx::http();
        req.extensions_mut().insert(attached.clone());

        let ctx = Ctx::extract(&req).await.expect("extracts");
        attached.cancel();
        assert!(ctx.is_canceled());
    }
}
