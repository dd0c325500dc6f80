use super::*;

#[test]
fn test_mapped_address() -> Result<()> {
    let mut m = Message::new();
    let addr = MappedAddress {
        ip: "122.12.34.5".parse().unwrap(),
        port: 5412,
    };
    assert_eq!(addr.to_string(), "122.12.34.5:5412", "bad string {addr}");

    addr.add_to(&mut m)?;

    let mut got = MappedAddress::default();
    got.get_from(&m)?;
    assert_eq!(got.ip, addr.ip, "got bad IP: {}", got.ip);
    assert_eq!(got.port, addr.port);

    // bad family
    let mut bad = Message::new();
    bad.add(ATTR_MAPPED_ADDRESS, &[0, 3, 0, 1, 1, 2, 3, 4]);
    let mut got = MappedAddress::default();
    assert_eq!(got.get_from(&bad), Err(Error::ErrBadFamily));

    // too short
    let mut short = Message::new();
    short.add(ATTR_MAPPED_ADDRESS, &[0, 1, 0, 1]);
    assert_eq!(got.get_from(&short), Err(Error::ErrUnexpectedEof));

    // ipv4 family with a truncated address
    let mut truncated = Message::new();
    truncated.add(ATTR_MAPPED_ADDRESS, &[0, 1, 0, 1, 1, 2]);
    assert_eq!(got.get_from(&truncated), Err(Error::ErrBadIpLength));

    // missing
    let empty = Message::new();
    assert_eq!(got.get_from(&empty), Err(Error::ErrAttributeNotFound));

    Ok(())
}

#[test]
fn test_mapped_address_v6() -> Result<()> {
    let mut m = Message::new();
    let addr = MappedAddress {
        ip: "::".parse().unwrap(),
        port: 5412,
    };
    addr.add_to(&mut m)?;

    let mut got = MappedAddress::default();
    got.get_from(&m)?;
    assert_eq!(got.ip, addr.ip);
    assert_eq!(got.socket_addr(), "[::]:5412".parse().unwrap());

    Ok(())
}
