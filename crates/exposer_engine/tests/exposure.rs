//! End-to-end tests: expose groups, serve them through the mock platform and call them over
//! simulated HTTP.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use exposer_base::pal::http::{
    HttpMethod, HttpRequest, HttpResponse, HttpServerConfig, HttpServerHandle, HttpStatusCode,
};
use exposer_base::{ErrorKind, ExposerError, ExposerResult, MockPal, Pal, RealPal};
use exposer_engine::{
    ApiFunction, CHECKSUM_HEADER, ExposeConfig, ExposedClient, Exposure, Group, GroupExports,
    Transport, expose,
};
use expect_test::expect;
use futures::executor::block_on;
use serde_json::{Value, json};

fn calc_group() -> Group {
    Group::from_sync("calc", |_context| {
        Ok(GroupExports::apis([
            (
                "add",
                ApiFunction::new("(a, b)", |args| {
                    Ok(json!(args.get::<f64>(0)? + args.get::<f64>(1)?))
                })
                .validate(vec![json!({"type": "number"}), json!({"type": "number"})])
                .description("Adds two numbers"),
            ),
            (
                "div",
                ApiFunction::new("(a, b)", |args| -> ExposerResult<Value> {
                    let divisor = args.get::<f64>(1)?;
                    if divisor == 0.0 {
                        exposer_base::bail!("division by zero");
                    }
                    Ok(json!(args.get::<f64>(0)? / divisor))
                }),
            ),
        ]))
    })
}

fn files_group() -> Group {
    Group::from_sync("files", |_context| {
        Ok(GroupExports::apis([(
            "size",
            ApiFunction::new("(data, label)", |mut args| {
                let label = args.value(1).clone();
                let data = args.take_buffer()?.unwrap_or_default();
                Ok(json!({"size": data.len(), "label": label}))
            })
            .buffer_input(),
        )]))
    })
}

struct Served {
    pal: MockPal,
    handle: HttpServerHandle,
    exposure: Exposure,
}

impl Served {
    fn request(&self, request: HttpRequest) -> HttpResponse {
        self.pal.simulate_request(self.handle.port(), request).unwrap()
    }

    fn post(&self, path: &str, body: &str) -> HttpResponse {
        self.request(
            HttpRequest::new(HttpMethod::Post, path)
                .with_header("Content-Type", "application/json")
                .with_body(body),
        )
    }
}

fn serve(config: ExposeConfig) -> Served {
    let exposure = block_on(expose(config)).unwrap();
    let pal = MockPal::new();
    let handle = pal
        .start_http_server(
            Box::new(exposure.route_table().unwrap()),
            HttpServerConfig::new("127.0.0.1"),
        )
        .unwrap();
    Served {
        pal,
        handle,
        exposure,
    }
}

fn calc_service() -> Served {
    serve(
        ExposeConfig::new("calc", "1.0.0")
            .with_group(calc_group())
            .with_group(files_group()),
    )
}

#[test]
fn test_valid_call_returns_result_and_checksum() {
    let served = calc_service();
    let response = served.post("/api/calc/add", r#"{"a": 5, "b": 10}"#);
    assert_eq!(response.status(), HttpStatusCode::OK);
    assert_eq!(response.body().as_string().unwrap(), "15.0");
    assert_eq!(
        response.headers().get(CHECKSUM_HEADER).map(String::as_str),
        Some(served.exposure.checksum())
    );
}

#[test]
fn test_calc_add_end_to_end() {
    let served = calc_service();

    let response = served.post("/api/calc/add", r#"{"a": 10, "b": 5}"#);
    assert_eq!(response.status(), HttpStatusCode::OK);
    assert_eq!(response.body().as_string().unwrap(), "15.0");
    assert_eq!(
        response.headers().get(CHECKSUM_HEADER).map(String::as_str),
        Some(served.exposure.checksum())
    );

    let response = served.post("/api/calc/add", r#"{"a": "ten", "b": 5}"#);
    assert_eq!(response.status(), HttpStatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(response.body().as_bytes()).unwrap();
    assert_eq!(body["api"], "add");
    assert_eq!(body["details"][0]["field"], "a");
    expect![[r#""ten" is not of type "number""#]]
        .assert_eq(body["details"][0]["message"].as_str().unwrap());

    let response = served.request(HttpRequest::new(HttpMethod::Get, "/api/exposed"));
    let body: Value = serde_json::from_slice(response.body().as_bytes()).unwrap();
    expect![[r#"{"group":"calc","id":"add","params":["a","b"],"path":"/api/calc/add","hasBufferInput":false,"hasStreamInput":false}"#]]
        .assert_eq(&body["apis"][0].to_string());
}

#[test]
fn test_invalid_parameters_are_400() {
    let served = calc_service();
    let response = served.post("/api/calc/add", r#"{"a": "five", "b": 10}"#);
    assert_eq!(response.status(), HttpStatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(response.body().as_bytes()).unwrap();
    assert_eq!(body["api"], "add");
    expect![[r#""five" is not of type "number""#]]
        .assert_eq(body["details"][0]["message"].as_str().unwrap());
}

#[test]
fn test_too_many_parameters_are_400() {
    let served = calc_service();
    let response = served.post("/api/calc/add", r#"{"a": 1, "b": 2, "c": 3}"#);
    assert_eq!(response.status(), HttpStatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(response.body().as_bytes()).unwrap();
    expect!["API add expects at most 2 parameters but received 3"]
        .assert_eq(body["message"].as_str().unwrap());
}

#[test]
fn test_handler_failure_is_599() {
    let served = calc_service();
    let response = served.post("/api/calc/div", r#"{"a": 1, "b": 0}"#);
    assert_eq!(response.status(), HttpStatusCode::HANDLER_ERROR);
    let body: Value = serde_json::from_slice(response.body().as_bytes()).unwrap();
    expect!["Error while calling API div: division by zero"]
        .assert_eq(body["message"].as_str().unwrap());
}

#[test]
fn test_discovery_lists_every_api() {
    let served = calc_service();
    let response = served.request(HttpRequest::new(HttpMethod::Get, "/api/exposed"));
    assert_eq!(response.status(), HttpStatusCode::OK);
    let body: Value = serde_json::from_slice(response.body().as_bytes()).unwrap();
    assert_eq!(body["checksum"], served.exposure.checksum());
    let paths: Vec<&str> = body["apis"]
        .as_array()
        .unwrap()
        .iter()
        .map(|api| api["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec!["/api/calc/add", "/api/calc/div", "/api/files/size"]);
    assert_eq!(body["apis"][2]["hasBufferInput"], true);
}

#[test]
fn test_unknown_route_and_wrong_method() {
    let served = calc_service();
    let response = served.request(HttpRequest::new(HttpMethod::Get, "/api/calc/mul"));
    assert_eq!(response.status(), HttpStatusCode::NOT_FOUND);
    assert_eq!(
        response.headers().get(CHECKSUM_HEADER).map(String::as_str),
        Some(served.exposure.checksum())
    );
    let response = served.request(HttpRequest::new(HttpMethod::Get, "/api/calc/add"));
    assert_eq!(response.status(), HttpStatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        response.headers().get(CHECKSUM_HEADER).map(String::as_str),
        Some(served.exposure.checksum())
    );
}

#[test]
fn test_duplicate_parameter_names_stop_exposure() {
    let config = ExposeConfig::new("calc", "1.0.0").with_group(Group::from_sync("calc", |_context| {
        Ok(GroupExports::apis([(
            "twice",
            ApiFunction::new("(a, a)", |args| Ok(args.value(0).clone())),
        )]))
    }));
    let error = block_on(expose(config)).unwrap_err();
    assert!(
        matches!(error.kind(), ErrorKind::UnsupportedSignature { .. }),
        "error was {}",
        error
    );
}

#[test]
fn test_buffer_input_sees_only_the_raw_body() {
    let served = calc_service();
    let response = served.request(
        HttpRequest::new(HttpMethod::Post, "/api/files/size")
            .with_header("Content-Type", "application/octet-stream")
            .with_body(vec![0u8; 300]),
    );
    assert_eq!(response.status(), HttpStatusCode::OK);
    expect![[r#"{"size":300,"label":null}"#]].assert_eq(&response.body().as_string().unwrap());
}

#[test]
fn test_body_limit_is_413() {
    let served = serve(
        ExposeConfig::new("calc", "1.0.0")
            .with_group(files_group())
            .with_max_body_bytes(16),
    );
    let response = served.request(
        HttpRequest::new(HttpMethod::Post, "/api/files/size").with_body(vec![1u8; 17]),
    );
    assert_eq!(response.status(), HttpStatusCode::PAYLOAD_TOO_LARGE);
}

#[test]
fn test_failing_group_stops_initialization() {
    let later_runs = Arc::new(AtomicUsize::new(0));
    let counter = later_runs.clone();
    let config = ExposeConfig::new("calc", "1.0.0")
        .with_group(calc_group())
        .with_group(Group::from_sync("db", |_context| -> ExposerResult<GroupExports> {
            exposer_base::bail!("connection refused")
        }))
        .with_group(Group::from_sync("late", move |_context| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(GroupExports::NoApis)
        }));
    let error = block_on(expose(config)).unwrap_err();
    assert!(matches!(error.kind(), ErrorKind::GroupInit { .. }));
    assert_eq!(later_runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_response_validation_is_512() {
    let served = serve(ExposeConfig::new("liar", "1").with_group(liar_group(true)));
    let response = served.request(HttpRequest::new(HttpMethod::Get, "/api/liar/name"));
    assert_eq!(response.status(), HttpStatusCode::BAD_RESPONSE);
}

fn liar_group(validate_response: bool) -> Group {
    Group::from_sync("liar", move |_context| {
        Ok(GroupExports::apis([(
            "name",
            ApiFunction::new("()", |_| Ok(json!(42)))
                .response_schema(json!({"type": "string"}))
                .validate_response(validate_response),
        )]))
    })
}

#[test]
fn test_unchecked_response_schema_passes_through() {
    let served = serve(ExposeConfig::new("liar", "1").with_group(liar_group(false)));
    let response = served.request(HttpRequest::new(HttpMethod::Get, "/api/liar/name"));
    assert_eq!(response.status(), HttpStatusCode::OK);
    assert_eq!(response.body().as_string().unwrap(), "42");
}

#[test]
fn test_async_group_and_api() {
    let served = serve(ExposeConfig::new("clock", "1").with_group(Group::new(
        "clock",
        |_context| async {
            Ok(GroupExports::apis([(
                "tick",
                ApiFunction::new_async("(n)", |args| async move {
                    Ok::<_, Box<ExposerError>>(json!(args.get::<u64>(0)? + 1))
                }),
            )]))
        },
    )));
    let response = served.post("/api/clock/tick", r#"{"n": 41}"#);
    assert_eq!(response.body().as_string().unwrap(), "42");
}

/// Client transport going through the mock platform's simulated server.
struct MockTransport {
    pal: MockPal,
    port: u16,
}

impl Transport for MockTransport {
    fn send(&self, request: HttpRequest) -> ExposerResult<HttpResponse> {
        self.pal.simulate_request(self.port, request)
    }
}

#[test]
fn test_client_round_trip() {
    let served = calc_service();
    let client = ExposedClient::new(
        MockTransport {
            pal: served.pal.clone(),
            port: served.handle.port(),
        },
        "/api",
    );
    let document = client.resolve().unwrap();
    assert_eq!(document.checksum, served.exposure.checksum());
    assert_eq!(
        client.call("calc", "add", &[json!(2), json!(3)]).unwrap(),
        json!(5.0)
    );
    let error = client
        .call("calc", "add", &[json!("2"), json!(3)])
        .unwrap_err();
    assert_eq!(error.status(), Some(400));
    let size = client.call_raw("files", "size", b"abc".to_vec()).unwrap();
    assert_eq!(size, br#"{"size":3,"label":null}"#.to_vec());
}

fn pipes_group() -> Group {
    Group::from_sync("pipes", |_context| {
        Ok(GroupExports::apis([
            (
                "first",
                ApiFunction::new("(data)", |mut args| {
                    let mut reader = args
                        .take_stream()
                        .ok_or_else(|| exposer_base::err!("no request body"))?;
                    let mut first = [0u8; 1];
                    reader
                        .read_exact(&mut first)
                        .map_err(|e| exposer_base::err!("reading body: {}", e))?;
                    Ok(first.to_vec())
                })
                .stream_input(),
            ),
            (
                "up",
                ApiFunction::new("(data)", |mut args| {
                    Ok(json!(args.take_buffer()?.unwrap_or_default().len()))
                })
                .buffer_input(),
            ),
        ]))
    })
}

/// Send raw bytes to a real server and return the status line of the answer.
fn status_line(port: u16, raw_request: &[u8]) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(raw_request).unwrap();
    let mut line = String::new();
    BufReader::new(stream).read_line(&mut line).unwrap();
    line
}

#[test]
fn test_real_server_answers_before_body_is_complete() {
    let exposure = block_on(expose(
        ExposeConfig::new("pipes", "1")
            .with_group(pipes_group())
            .with_max_body_bytes(16),
    ))
    .unwrap();
    let pal = RealPal::new(std::env::temp_dir());
    let handle = pal
        .start_http_server(
            Box::new(exposure.route_table().unwrap()),
            HttpServerConfig::new("127.0.0.1"),
        )
        .unwrap();

    // The stream API answers from the first byte of a body that is still on its way
    let line = status_line(
        handle.port(),
        b"POST /api/pipes/first HTTP/1.1\r\nHost: localhost\r\nContent-Length: 1000\r\n\r\nx",
    );
    assert!(line.contains("200"), "status was {}", line);

    // An announced upload beyond the route limit is refused without waiting for it
    let line = status_line(
        handle.port(),
        b"POST /api/pipes/up HTTP/1.1\r\nHost: localhost\r\nContent-Length: 100000000\r\n\r\n",
    );
    assert!(line.contains("413"), "status was {}", line);
}
