//! Unit tests for `AppError` display formats.

use ghalibvr_relay::AppError;

#[test]
fn each_variant_has_its_own_prefix() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Bind("x".into()), "bind: x"),
        (AppError::Connect("x".into()), "connect: x"),
        (AppError::NotConnected("x".into()), "not connected: x"),
        (AppError::SessionIo("x".into()), "session io: x"),
        (AppError::InvalidState("x".into()), "invalid state: x"),
        (AppError::Io("x".into()), "io: x"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn bind_error_message_no_trailing_period() {
    let err = AppError::Bind("cannot listen on 127.0.0.1:4120: address in use".into());
    let s = err.to_string();
    assert!(
        !s.ends_with('.'),
        "error message must not end with a period: {s}"
    );
}

#[test]
fn toml_errors_convert_to_config() {
    let parse_err = toml::from_str::<toml::Value>("= broken").expect_err("invalid toml");
    let err = AppError::from(parse_err);
    assert!(err.to_string().starts_with("config: invalid config"));
}

#[test]
fn implements_std_error_trait() {
    fn assert_error<E: std::error::Error>(_: &E) {}
    let err = AppError::NotConnected("no consumer".into());
    assert_error(&err);
    assert!(format!("{err:?}").contains("NotConnected"));
}
