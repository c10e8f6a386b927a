use std::sync::Arc;
use std::time::Duration;

use httptest::matchers::{all_of, contains, request, url_decoded};
use httptest::responders::{delay_and_then, json_encoded, status_code};
use httptest::{Expectation, Server};
use secrecy::SecretString;
use serde_json::json;

use site_geocache::{
    normalize, Coordinate, Geocoder, GoogleGeocodingClient, NominatimClient, RateLimitedResolver,
    ResolutionError, RetryPolicy, SiteRecord,
};

fn springfield() -> SiteRecord {
    SiteRecord::new("1")
        .with_street("12 Main St")
        .with_city("Springfield")
        .with_region("IL")
        .with_country("US")
}

fn endpoint(server: &Server) -> String {
    server.url_str("")
}

#[tokio::test]
async fn nominatim_degraded_lookup_sends_free_text_and_agent() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/search"),
            request::query(url_decoded(contains(("q", "springfield, us")))),
            request::query(url_decoded(contains(("format", "jsonv2")))),
            request::headers(contains(("user-agent", "site_mapper_test"))),
        ])
        .respond_with(json_encoded(json!([
            { "lat": "39.7990175", "lon": "-89.6439575", "display_name": "Springfield" }
        ]))),
    );

    let client =
        NominatimClient::new(&endpoint(&server), "site_mapper_test", Duration::from_secs(5)).unwrap();
    let coordinate = client.geocode(&normalize(&springfield()).degraded).await.unwrap();

    assert_eq!(coordinate, Coordinate::new(39.7990175, -89.6439575).unwrap());
}

#[tokio::test]
async fn nominatim_precise_lookup_is_structured_and_empty_hits_are_no_match() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/search"),
            request::query(url_decoded(contains(("street", "12 main st")))),
            request::query(url_decoded(contains(("state", "il")))),
        ])
        .respond_with(json_encoded(json!([]))),
    );

    let client =
        NominatimClient::new(&endpoint(&server), "site_mapper_test", Duration::from_secs(5)).unwrap();
    let err = client.geocode(&normalize(&springfield()).precise).await.unwrap_err();

    assert_eq!(err, ResolutionError::NoMatch);
}

#[tokio::test]
async fn nominatim_slow_response_is_a_timeout() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/search"))
            .respond_with(delay_and_then(Duration::from_millis(500), status_code(200))),
    );

    let client =
        NominatimClient::new(&endpoint(&server), "site_mapper_test", Duration::from_millis(50)).unwrap();
    let err = client.geocode(&normalize(&springfield()).degraded).await.unwrap_err();

    assert_eq!(err, ResolutionError::Timeout);
}

#[tokio::test]
async fn resolver_retries_service_unavailable_exactly_max_attempts() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/search"))
            .times(3)
            .respond_with(status_code(503)),
    );

    let client =
        NominatimClient::new(&endpoint(&server), "site_mapper_test", Duration::from_secs(5)).unwrap();
    let resolver = RateLimitedResolver::new(
        Arc::new(client),
        Duration::ZERO,
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_jitter: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
        },
    );

    let err = resolver.resolve(&normalize(&springfield()).degraded).await.unwrap_err();
    assert!(matches!(err, ResolutionError::Exhausted { attempts: 3, .. }));
}

#[tokio::test]
async fn google_maps_statuses_onto_failure_classes() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/maps/api/geocode/json"),
            request::query(url_decoded(contains(("address", "springfield, us")))),
            request::query(url_decoded(contains(("key", "test-key")))),
        ])
        .respond_with(json_encoded(json!({
            "status": "OK",
            "results": [{ "geometry": { "location": { "lat": 39.8, "lng": -89.6 } } }]
        }))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/maps/api/geocode/json"),
            request::query(url_decoded(contains(("address", "12 main st, springfield, il, us")))),
        ])
        .respond_with(json_encoded(json!({ "status": "ZERO_RESULTS", "results": [] }))),
    );

    let client = GoogleGeocodingClient::new(
        &endpoint(&server),
        SecretString::from("test-key".to_string()),
        Duration::from_secs(5),
    )
    .unwrap();
    let keys = normalize(&springfield());

    assert_eq!(
        client.geocode(&keys.degraded).await.unwrap(),
        Coordinate::new(39.8, -89.6).unwrap()
    );
    assert_eq!(client.geocode(&keys.precise).await.unwrap_err(), ResolutionError::NoMatch);
}

#[tokio::test]
async fn google_quota_exhaustion_is_transient() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/maps/api/geocode/json")).respond_with(
            json_encoded(json!({ "status": "OVER_QUERY_LIMIT", "error_message": "slow down" })),
        ),
    );

    let client = GoogleGeocodingClient::new(
        &endpoint(&server),
        SecretString::from("test-key".to_string()),
        Duration::from_secs(5),
    )
    .unwrap();
    let err = client.geocode(&normalize(&springfield()).degraded).await.unwrap_err();

    assert!(err.is_transient());
}
