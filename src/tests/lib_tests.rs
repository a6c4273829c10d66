use crate::transport::{error_from_status, status_for};
use crate::Error;
use hyper::StatusCode;

#[test]
fn test_transient_classification() {
    assert!(Error::Transient("store down".to_string()).is_transient());
    assert!(Error::Io(std::io::Error::other("reset")).is_transient());
    assert!(!Error::Validation("empty".to_string()).is_transient());
    assert!(!Error::NotFound("user".to_string()).is_transient());
    assert!(!Error::Authorization("missing".to_string()).is_transient());
}

#[test]
fn test_status_mapping() {
    assert_eq!(status_for(&Error::Validation("x".into())), StatusCode::BAD_REQUEST);
    assert_eq!(status_for(&Error::Authorization("x".into())), StatusCode::UNAUTHORIZED);
    assert_eq!(status_for(&Error::NotFound("x".into())), StatusCode::NOT_FOUND);
    assert_eq!(
        status_for(&Error::Transient("x".into())),
        StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(
        status_for(&Error::Storage("x".into())),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[test]
fn test_status_mapping_roundtrips_error_class() {
    let cases = [
        Error::Validation("bad".into()),
        Error::Authorization("who".into()),
        Error::NotFound("gone".into()),
        Error::Transient("later".into()),
    ];

    for err in cases {
        let back = error_from_status(status_for(&err), err.detail());
        assert_eq!(
            std::mem::discriminant(&back),
            std::mem::discriminant(&err),
            "class changed for {}",
            err
        );
    }
}

#[test]
fn test_detail_drops_class_prefix() {
    let err = Error::Validation("Message text is required".into());
    assert_eq!(err.detail(), "Message text is required");
    assert_eq!(err.to_string(), "Validation error: Message text is required");

    let body = crate::protocol::ErrorResponse::from_error(&Error::NotFound("Receiver not found".into()));
    assert_eq!(body.error, "Receiver not found");
    assert!(!body.success);
}
