use super::*;
use crate::textattrs::TextAttribute;

#[test]
fn test_fingerprint_check() -> Result<()> {
    let mut m = Message::new();
    m.build(&[
        Box::new(BINDING_REQUEST),
        Box::new(TransactionId::new()),
        Box::new(TextAttribute::new(
            crate::attributes::ATTR_SOFTWARE,
            "software".to_owned(),
        )),
        Box::new(FINGERPRINT),
    ])?;

    let mut decoded = Message::new();
    decoded.unmarshal_binary(&m.raw)?;
    FINGERPRINT.check(&decoded)?;

    // flip a byte inside the SOFTWARE value
    let mut raw = m.raw.clone();
    raw[MESSAGE_HEADER_SIZE + ATTRIBUTE_HEADER_SIZE] ^= 0xff;
    let mut corrupted = Message::new();
    corrupted.unmarshal_binary(&raw)?;
    assert_eq!(
        FINGERPRINT.check(&corrupted),
        Err(Error::ErrFingerprintMismatch)
    );

    Ok(())
}

#[test]
fn test_fingerprint_missing() {
    let m = Message::new();
    assert_eq!(FINGERPRINT.check(&m), Err(Error::ErrAttributeNotFound));
}
