use super::*;

#[test]
fn test_error_code_attribute() -> Result<()> {
    let mut m = Message::new();
    let a = ErrorCodeAttribute {
        code: CODE_STALE_NONCE,
        reason: b"Stale Nonce".to_vec(),
    };
    a.add_to(&mut m)?;

    let mut decoded = Message::new();
    decoded.unmarshal_binary(&m.raw)?;

    let mut got = ErrorCodeAttribute::default();
    got.get_from(&decoded)?;
    assert_eq!(got, a);
    assert_eq!(got.class(), 4);
    assert_eq!(got.number(), 38);
    assert_eq!(got.to_string(), "438: Stale Nonce");

    Ok(())
}

#[test]
fn test_error_code_default_reason() -> Result<()> {
    let mut m = Message::new();
    CODE_UNAUTHORIZED.add_to(&mut m)?;

    let mut got = ErrorCodeAttribute::default();
    got.get_from(&m)?;
    assert_eq!(got.code, CODE_UNAUTHORIZED);
    assert_eq!(got.reason, b"Unauthorized".to_vec());

    let mut m = Message::new();
    assert!(ErrorCode(599).add_to(&mut m).is_err());

    Ok(())
}

#[test]
fn test_error_code_too_short() {
    let mut m = Message::new();
    m.add(ATTR_ERROR_CODE, &[0, 0, 4]);
    let mut got = ErrorCodeAttribute::default();
    assert_eq!(got.get_from(&m), Err(Error::ErrUnexpectedEof));
}
