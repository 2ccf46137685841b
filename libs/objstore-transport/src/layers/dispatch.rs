use crate::dispatch::{Admission, DispatchPermit};
use crate::error::{BoxError, TransportError};
use crate::transport::ResponseBody;
use bytes::Bytes;
use http::{Request, Response, Uri};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service, ServiceExt};

/// Tower layer that admits every request through an [`Admission`] policy
#[derive(Clone)]
pub struct DispatchLayer {
    admission: Arc<dyn Admission>,
}

impl DispatchLayer {
    #[must_use]
    pub fn new(admission: Arc<dyn Admission>) -> Self {
        Self { admission }
    }
}

impl<S> Layer<S> for DispatchLayer {
    type Service = DispatchService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DispatchService {
            inner,
            admission: Arc::clone(&self.admission),
        }
    }
}

/// Service that waits for a dispatch permit before calling `inner`
#[derive(Clone)]
pub struct DispatchService<S> {
    inner: S,
    admission: Arc<dyn Admission>,
}

/// Admission key for a request: the lowercased destination host
fn destination(uri: &Uri) -> String {
    uri.host().unwrap_or_default().to_ascii_lowercase()
}

impl<S, ReqBody> Service<Request<ReqBody>> for DispatchService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResponseBody>, Error = TransportError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
{
    type Response = Response<ResponseBody>;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Admission is awaited per call; the inner service is readied after it
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let admission = Arc::clone(&self.admission);
        let destination = destination(req.uri());

        Box::pin(async move {
            let permit = admission.acquire(&destination).await?;
            let response = inner.oneshot(req).await?;
            Ok(response.map(|body| PermitBody::new(body, permit).boxed()))
        })
    }
}

pin_project! {
    /// Response body that holds a dispatch permit until the last frame is read
    /// or the body is dropped.
    pub struct PermitBody {
        #[pin]
        inner: ResponseBody,
        permit: Option<DispatchPermit>,
    }
}

impl PermitBody {
    #[must_use]
    pub fn new(inner: ResponseBody, permit: DispatchPermit) -> Self {
        Self {
            inner,
            permit: Some(permit),
        }
    }
}

impl Body for PermitBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let polled = this.inner.poll_frame(cx);
        if let Poll::Ready(None | Some(Err(_))) = &polled {
            this.permit.take();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use http::StatusCode;
    use http_body_util::Full;
    use std::time::Duration;

    #[derive(Clone)]
    struct OkService;

    impl Service<Request<Full<Bytes>>> for OkService {
        type Response = Response<ResponseBody>;
        type Error = TransportError;
        type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request<Full<Bytes>>) -> Self::Future {
            let body = Full::new(Bytes::from_static(b"object bytes"))
                .map_err(|never| -> BoxError { match never {} })
                .boxed();
            std::future::ready(Ok(Response::builder()
                .status(StatusCode::OK)
                .body(body)
                .unwrap()))
        }
    }

    fn get(uri: &str) -> Request<Full<Bytes>> {
        Request::get(uri).body(Full::new(Bytes::new())).unwrap()
    }

    #[test]
    fn test_destination_is_lowercase_host() {
        assert_eq!(
            destination(&"https://Bucket.OBS.example.com:443/k".parse().unwrap()),
            "bucket.obs.example.com"
        );
        assert_eq!(destination(&"/relative".parse().unwrap()), "");
    }

    #[tokio::test]
    async fn test_permit_released_when_body_is_read() {
        let dispatcher = Arc::new(Dispatcher::new(1, 1));
        let service = DispatchLayer::new(dispatcher.clone()).layer(OkService);

        let response = service.clone().oneshot(get("http://a.example/1")).await.unwrap();
        assert_eq!(dispatcher.in_flight(), 1);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"object bytes"));
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_second_request_queues_until_body_dropped() {
        let dispatcher = Arc::new(Dispatcher::new(1, 1));
        let service = DispatchLayer::new(dispatcher.clone()).layer(OkService);

        let first = service.clone().oneshot(get("http://a.example/1")).await.unwrap();

        let queued = tokio::time::timeout(
            Duration::from_millis(50),
            service.clone().oneshot(get("http://a.example/2")),
        )
        .await;
        assert!(queued.is_err(), "second request must wait for the first");

        drop(first);
        let second = tokio::time::timeout(
            Duration::from_secs(1),
            service.clone().oneshot(get("http://a.example/2")),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(second.status(), StatusCode::OK);
    }
}
