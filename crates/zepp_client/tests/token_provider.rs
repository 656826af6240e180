use secrecy::{ExposeSecret, SecretString};
use wiremock::matchers::{any, body_string_contains, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zepp_client::config::{Config, Credentials, Endpoints};
use zepp_client::http_client::build_http_client;
use zepp_client::{LoginHop, TokenProvider, ZeppError};

const REDIRECT: &str = "https://s3-us-west-2.amazonws.com/hm-registration/successsignin.html?region=eu-central-1&access=CODE1&country_code=GB&expiration=1700000000";

fn provider(server: &MockServer, credentials: Credentials) -> TokenProvider {
    let config = Config::new(credentials, Endpoints::single(&server.uri()));
    let client = build_http_client(config.http_timeout).expect("client");
    TokenProvider::from_config(&config, client)
}

fn password_credentials() -> Credentials {
    Credentials {
        email: Some("runner@example.com".into()),
        password: Some(SecretString::new("hunter2".into())),
        ..Credentials::default()
    }
}

#[tokio::test]
async fn app_token_resolves_without_network() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let creds = Credentials {
        app_token: Some(SecretString::new("pre-extracted".into())),
        user_id: Some("1234".into()),
        // password credentials are ignored when a full token pair is present
        ..password_credentials()
    };
    let session = provider(&server, creds).resolve().await.expect("session");
    assert_eq!(session.user_id(), "1234");
    assert_eq!(session.token().expose_secret(), "pre-extracted");
    assert!(session.expires_hint().is_none());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_credentials_is_a_configuration_error() {
    let server = MockServer::start().await;
    let creds = Credentials {
        app_token: Some(SecretString::new("tok".into())),
        ..Credentials::default()
    };
    let err = provider(&server, creds).resolve().await.unwrap_err();
    assert!(matches!(err, ZeppError::Configuration(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn password_login_runs_both_hops() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/registrations/[^/]+/tokens$"))
        .and(body_string_contains("client_id=HuaMi"))
        .and(body_string_contains("token=access"))
        .respond_with(ResponseTemplate::new(303).insert_header("Location", REDIRECT))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/client/login"))
        .and(body_string_contains("grant_type=access_token"))
        .and(body_string_contains("code=CODE1"))
        .and(body_string_contains("country_code=GB"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token_info": {
                "login_token": "lt",
                "app_token": "APPTOK",
                "user_id": "777",
                "app_ttl": 7776000
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = provider(&server, password_credentials())
        .resolve()
        .await
        .expect("session");
    assert_eq!(session.user_id(), "777");
    assert_eq!(session.token().expose_secret(), "APPTOK");
    assert!(session.expires_hint().is_some());
}

#[tokio::test]
async fn redirect_without_access_code_fails_authentication() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/registrations/[^/]+/tokens$"))
        .respond_with(
            ResponseTemplate::new(303)
                .insert_header("Location", "https://example.com/signin.html?error=0106"),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/client/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = provider(&server, password_credentials())
        .resolve()
        .await
        .unwrap_err();
    match err {
        ZeppError::AuthenticationFailed { hop, status, .. } => {
            assert_eq!(hop, LoginHop::RequestingCode);
            assert_eq!(status, Some(303));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn redirect_without_location_fails_authentication() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/registrations/[^/]+/tokens$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>captcha</html>"))
        .mount(&server)
        .await;

    let err = provider(&server, password_credentials())
        .resolve()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ZeppError::AuthenticationFailed { hop: LoginHop::RequestingCode, .. }
    ));
}

#[tokio::test]
async fn rate_limited_login_is_fatal_and_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/registrations/[^/]+/tokens$"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let err = provider(&server, password_credentials())
        .resolve()
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(429));
    assert!(err.to_string().contains("requesting_code"));
}

#[tokio::test]
async fn rejected_token_exchange_is_attributed_to_second_hop() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/registrations/[^/]+/tokens$"))
        .respond_with(ResponseTemplate::new(303).insert_header("Location", REDIRECT))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/client/login"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid grant"))
        .mount(&server)
        .await;

    let err = provider(&server, password_credentials())
        .resolve()
        .await
        .unwrap_err();
    match err {
        ZeppError::AuthenticationFailed {
            hop,
            status,
            reason,
        } => {
            assert_eq!(hop, LoginHop::ExchangingToken);
            assert_eq!(status, Some(400));
            assert!(reason.contains("invalid grant"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn token_exchange_without_token_info_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/registrations/[^/]+/tokens$"))
        .respond_with(ResponseTemplate::new(303).insert_header("Location", REDIRECT))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/client/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": "fail"})),
        )
        .mount(&server)
        .await;

    let err = provider(&server, password_credentials())
        .resolve()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ZeppError::AuthenticationFailed { hop: LoginHop::ExchangingToken, .. }
    ));
}

#[tokio::test]
async fn encoded_access_code_is_sent_once_encoded() {
    let server = MockServer::start().await;
    let location = "https://s3-us-west-2.amazonws.com/hm-registration/successsignin.html?access=ab%2Fc%3D%3D&country_code=GB";
    Mock::given(method("POST"))
        .and(path_regex(r"^/registrations/[^/]+/tokens$"))
        .respond_with(ResponseTemplate::new(303).insert_header("Location", location))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/client/login"))
        .and(body_string_contains("code=ab%2Fc%3D%3D"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token_info": {"app_token": "APPTOK", "user_id": "777"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = provider(&server, password_credentials())
        .resolve()
        .await
        .expect("session");
    assert_eq!(session.user_id(), "777");

    let requests = server.received_requests().await.unwrap();
    let exchange = requests
        .iter()
        .find(|r| r.url.path() == "/v2/client/login")
        .expect("token exchange");
    let body = String::from_utf8_lossy(&exchange.body);
    assert!(!body.contains("%25"), "code re-encoded: {body}");
}
