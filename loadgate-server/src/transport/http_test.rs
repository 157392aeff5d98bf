#[cfg(test)]
mod tests {
    use super::super::http::{AdmitRequest, AdmitResponse, admission_middleware};
    use crate::gate::Gate;
    use crate::identity::IdentitySource;
    use crate::metrics::Metrics;
    use axum::{
        Router,
        body::Body,
        extract::connect_info::MockConnectInfo,
        http::{Request, StatusCode},
        middleware,
        routing::get,
    };
    use loadgate::{AdmissionEngine, BucketParams, SweepConfig};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn gate(burst: u32) -> Gate {
        let engine = AdmissionEngine::builder()
            .default_limit(BucketParams::per_second(1.0, burst).unwrap())
            .sweep(SweepConfig::disabled())
            .start()
            .await
            .unwrap();
        Gate::new(
            Arc::new(engine),
            IdentitySource::PeerIp,
            Arc::new(Metrics::new()),
        )
    }

    #[test]
    fn test_admit_request_format() {
        let request: AdmitRequest = serde_json::from_str(r#"{"client": "10.0.0.1"}"#).unwrap();
        assert_eq!(request.client, "10.0.0.1");

        let response = AdmitResponse {
            verdict: "reject_rate".to_string(),
            allowed: false,
            state: "tier0".to_string(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["verdict"], "reject_rate");
        assert_eq!(json["allowed"], false);
        assert_eq!(json["state"], "tier0");
    }

    #[tokio::test]
    async fn test_middleware_wraps_any_router() {
        let gate = gate(1).await;
        let peer: SocketAddr = "198.51.100.1:40000".parse().unwrap();

        let app = Router::new()
            .route("/hello", get(|| async { "hello" }))
            .layer(middleware::from_fn_with_state(
                gate.clone(),
                admission_middleware,
            ))
            .layer(MockConnectInfo(peer));

        let first = app
            .clone()
            .oneshot(Request::get("/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(Request::get("/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        assert_eq!(gate.engine().visitor_count(), 1);
    }
}
