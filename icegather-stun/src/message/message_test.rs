use super::*;
use crate::textattrs::TextAttribute;

#[test]
fn test_message_type_value() -> Result<()> {
    let tests = vec![
        (BINDING_REQUEST, 0x0001),
        (BINDING_SUCCESS, 0x0101),
        (BINDING_ERROR, 0x0111),
        (
            MessageType {
                method: METHOD_BINDING,
                class: CLASS_INDICATION,
            },
            0x0011,
        ),
        (
            MessageType {
                method: Method(0xb6d),
                class: MessageClass(0x03),
            },
            0x2ddd,
        ),
    ];

    for (input, output) in tests {
        let b = input.value();
        assert_eq!(b, output, "Value({input}) -> {b}, want {output}");

        let mut got = MessageType::default();
        got.read_value(output);
        assert_eq!(got, input, "read_value({output}) -> {got}, want {input}");
    }

    Ok(())
}

#[test]
fn test_binding_request_encode_decode() -> Result<()> {
    let id = TransactionId([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    let mut m = Message::new();
    m.build(&[Box::new(BINDING_REQUEST), Box::new(id)])?;
    assert_eq!(m.raw.len(), MESSAGE_HEADER_SIZE);
    assert!(is_message(&m.raw));

    let mut decoded = Message::new();
    decoded.unmarshal_binary(&m.marshal_binary())?;
    assert_eq!(decoded.typ, BINDING_REQUEST);
    assert_eq!(decoded.transaction_id, id);
    assert_eq!(decoded, m);

    Ok(())
}

#[test]
fn test_message_attribute_padding() -> Result<()> {
    let mut m = Message::new();
    m.build(&[
        Box::new(BINDING_REQUEST),
        Box::new(TransactionId::new()),
        Box::new(TextAttribute::new(ATTR_SOFTWARE, "abcde".to_owned())),
    ])?;

    // 4 bytes TL + 5 bytes value padded to 8
    assert_eq!(m.length, 12);
    assert_eq!(m.raw.len(), MESSAGE_HEADER_SIZE + 12);
    assert_eq!(&m.raw[MESSAGE_HEADER_SIZE + 9..], &[0, 0, 0]);

    let mut decoded = Message::new();
    decoded.unmarshal_binary(&m.raw)?;
    assert_eq!(decoded.get(ATTR_SOFTWARE)?, b"abcde".to_vec());
    assert!(decoded.contains(ATTR_SOFTWARE));
    assert!(!decoded.contains(ATTR_USERNAME));
    assert_eq!(decoded.get(ATTR_USERNAME), Err(Error::ErrAttributeNotFound));

    Ok(())
}

#[test]
fn test_message_decode_errors() -> Result<()> {
    let mut m = Message::new();
    assert_eq!(
        m.unmarshal_binary(&[0u8; 10]),
        Err(Error::ErrUnexpectedHeaderEof)
    );

    // valid header with a wrong magic cookie
    let mut raw = vec![0u8; MESSAGE_HEADER_SIZE];
    raw[1] = 0x01;
    raw[4..8].copy_from_slice(&0xdeadbeefu32.to_be_bytes());
    assert!(!is_message(&raw));
    assert_eq!(m.unmarshal_binary(&raw), Err(Error::ErrNonStunMessage));

    // header announcing more attribute bytes than present
    let mut ok = Message::new();
    ok.build(&[Box::new(BINDING_REQUEST), Box::new(TransactionId::new())])?;
    let mut truncated = ok.raw.clone();
    truncated[2..4].copy_from_slice(&8u16.to_be_bytes());
    assert!(m.unmarshal_binary(&truncated).is_err());

    Ok(())
}

#[test]
fn test_message_class_is_response() {
    assert!(!CLASS_REQUEST.is_response());
    assert!(!CLASS_INDICATION.is_response());
    assert!(CLASS_SUCCESS_RESPONSE.is_response());
    assert!(CLASS_ERROR_RESPONSE.is_response());
}

#[test]
fn test_transaction_id_unique() {
    let a = TransactionId::new();
    let b = TransactionId::new();
    assert_ne!(a, b);
    assert_eq!(a.to_string().len(), TRANSACTION_ID_SIZE * 2);
}
