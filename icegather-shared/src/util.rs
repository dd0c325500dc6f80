use crate::error::Result;
use rand::{Rng, rng};
use std::net::{SocketAddr, ToSocketAddrs};

/// lookup_all resolves host to every SocketAddr the system resolver returns
pub fn lookup_all<T>(host: T) -> Result<Vec<SocketAddr>>
where
    T: ToSocketAddrs,
{
    Ok(host.to_socket_addrs()?.collect())
}

/// generate_crypto_random_string picks n runes from the thread-local CSPRNG.
pub fn generate_crypto_random_string(n: usize, runes: &[u8]) -> String {
    let mut rng = rng();

    (0..n)
        .map(|_| {
            let idx = rng.random_range(0..runes.len());
            runes[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_generate_crypto_random_string() -> Result<()> {
        let runes = b"abc";
        let s = generate_crypto_random_string(32, runes);
        assert_eq!(s.len(), 32);
        assert!(s.bytes().all(|b| runes.contains(&b)));
        Ok(())
    }

    #[test]
    fn test_lookup_all_literal() -> Result<()> {
        let addrs = lookup_all(("127.0.0.1", 3478))?;
        assert_eq!(addrs, vec!["127.0.0.1:3478".parse::<SocketAddr>()?]);
        Ok(())
    }
}
