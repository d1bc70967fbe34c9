use citadel::http::response::{Response, ResponseBuilder, StatusCode};
use citadel::http::writer::serialize_response;

#[test]
fn test_status_code_values() {
    assert_eq!(StatusCode::Ok.as_u16(), 200);
    assert_eq!(StatusCode::NotFound.as_u16(), 404);
    assert_eq!(StatusCode::SwitchingProtocols.as_u16(), 101);
    assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    assert_eq!(StatusCode::NotFound.reason_phrase(), "Not Found");
}

#[test]
fn test_builder_adds_content_length() {
    let resp = ResponseBuilder::new(StatusCode::Ok)
        .body(b"hello".to_vec())
        .build();

    assert_eq!(resp.headers.get("Content-Length").unwrap(), "5");
}

#[test]
fn test_builder_keeps_explicit_content_length() {
    let resp = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Length", "99")
        .body(b"hello".to_vec())
        .build();

    assert_eq!(resp.headers.get("Content-Length").unwrap(), "99");
}

#[test]
fn test_no_content_omits_content_length() {
    let resp = Response::no_content();
    assert!(!resp.headers.contains_key("Content-Length"));
}

#[test]
fn test_builder_adds_server_header() {
    let resp = Response::ok("x");
    assert_eq!(resp.headers.get("Server").unwrap(), "citadel");
}

#[test]
fn test_serialized_response_shape() {
    let resp = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/plain")
        .body(b"hi".to_vec())
        .build();

    let wire = serialize_response(&resp, false);
    let text = String::from_utf8(wire).unwrap();

    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Type: text/plain\r\n"));
    assert!(text.contains("Content-Length: 2\r\n"));
    assert!(text.ends_with("\r\n\r\nhi"));
}

#[test]
fn test_head_serialization_omits_body_but_keeps_length() {
    let resp = Response::ok("payload");
    let wire = serialize_response(&resp, true);
    let text = String::from_utf8(wire).unwrap();

    assert!(text.contains("Content-Length: 7\r\n"));
    assert!(text.ends_with("\r\n\r\n"));
}

#[test]
fn test_canned_responses() {
    assert_eq!(Response::not_found().status, StatusCode::NotFound);
    assert_eq!(Response::bad_request().status, StatusCode::BadRequest);
    assert_eq!(
        Response::internal_error().status,
        StatusCode::InternalServerError
    );
}
