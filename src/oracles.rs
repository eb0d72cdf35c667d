use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, warn};
use reqwest::StatusCode;
use tiny_http::{Request, Response, Server};

use crate::{
    bytes_to_int,
    error::{Error, Result},
    int_to_bytes_padded,
    padding::PKCS1_OVERHEAD,
    rsa::{rsa_private_raw, PrivateKey, RsaKey},
};

/// The only channel between the attack and the holder of the private key.
pub trait PaddingOracle: Send + Sync {
    /// Whether `ciphertext` decrypts to a conforming PKCS#1 v1.5 block.
    fn query(&self, ciphertext: &[u8]) -> Result<bool>;

    /// Queries answered so far by this oracle.
    fn queries(&self) -> u64;
}

impl<O: PaddingOracle + ?Sized> PaddingOracle for &O {
    fn query(&self, ciphertext: &[u8]) -> Result<bool> {
        (**self).query(ciphertext)
    }

    fn queries(&self) -> u64 {
        (**self).queries()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conformance {
    /// Only the leading `00 02` is checked.
    Lax,
    /// Also requires at least eight non-zero padding bytes and a zero separator.
    Strict,
}

impl Conformance {
    pub fn check(self, block: &[u8]) -> bool {
        if block.len() < 2 || block[0] != 0x00 || block[1] != 0x02 {
            return false;
        }
        match self {
            Conformance::Lax => true,
            Conformance::Strict => match block[2..].iter().position(|b| *b == 0) {
                Some(pad_len) => pad_len >= PKCS1_OVERHEAD - 3,
                None => false,
            },
        }
    }
}

/// In-process oracle holding the private key.
pub struct Pkcs1Oracle {
    key: PrivateKey,
    conformance: Conformance,
    queries: AtomicU64,
}

impl Pkcs1Oracle {
    pub fn new(key: PrivateKey) -> Self {
        Self::with_conformance(key, Conformance::Lax)
    }

    pub fn strict(key: PrivateKey) -> Self {
        Self::with_conformance(key, Conformance::Strict)
    }

    pub fn with_conformance(key: PrivateKey, conformance: Conformance) -> Self {
        Self {
            key,
            conformance,
            queries: AtomicU64::new(0),
        }
    }

    pub fn is_conforming(&self, ciphertext: &[u8]) -> Result<bool> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let plaintext = rsa_private_raw(&self.key, &bytes_to_int(ciphertext));
        // Short values are compared as their full-width, zero-extended block.
        let block = int_to_bytes_padded(&plaintext, self.key.size())?;
        Ok(self.conformance.check(&block))
    }
}

impl PaddingOracle for Pkcs1Oracle {
    fn query(&self, ciphertext: &[u8]) -> Result<bool> {
        self.is_conforming(ciphertext)
    }

    fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}

const SERVER_THREADS: usize = 4;
const ORACLE_PATH: &str = "/oracle";
const CONFORMING_BODY: &str = "ok";
const NON_CONFORMING_BODY: &str = "bad padding";

/// Serves a [`PaddingOracle`] over HTTP at `GET /oracle?c=<hex>`.
///
/// Conforming ciphertexts get `200`, non-conforming ones `400`. Malformed
/// requests get `422` and oracle failures `500`, so clients can tell them
/// apart from a padding answer.
pub struct OracleServer {
    running: Arc<AtomicBool>,
    server: Arc<Server>,
    workers: Vec<JoinHandle<()>>,
}

impl Drop for OracleServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl OracleServer {
    pub fn new<O: PaddingOracle + 'static>(oracle: O) -> Result<Self> {
        let server = Server::http("127.0.0.1:0").map_err(|e| Error::Oracle(e.to_string()))?;
        let server = Arc::new(server);
        let running = Arc::new(AtomicBool::from(true));
        let oracle = Arc::new(oracle);
        let mut workers = Vec::with_capacity(SERVER_THREADS);

        for _ in 0..SERVER_THREADS {
            let server = server.clone();
            let running = running.clone();
            let oracle = oracle.clone();

            workers.push(thread::spawn(move || {
                while running.load(Ordering::Acquire) {
                    match server.recv_timeout(Duration::from_millis(100)) {
                        Ok(Some(rq)) => {
                            let response = respond(&*oracle, &rq);
                            if let Err(err) = rq.respond(response) {
                                warn!("failed to answer oracle request: {}", err);
                            }
                        }
                        Ok(None) => {}
                        Err(err) => warn!("oracle server receive failed: {}", err),
                    };
                }
            }));
        }

        let result = Self {
            running,
            server,
            workers,
        };
        debug!("oracle server listening on {}", result.get_base_url());
        Ok(result)
    }

    pub fn get_server_addr(&self) -> SocketAddr {
        self.server.server_addr()
    }

    pub fn get_base_url(&self) -> String {
        let address = self.get_server_addr();
        format!("http://{}:{}/", address.ip(), address.port())
    }

    pub fn oracle_url(&self) -> String {
        let address = self.get_server_addr();
        format!("http://{}:{}{}", address.ip(), address.port(), ORACLE_PATH)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn respond<O: PaddingOracle + ?Sized>(
    oracle: &O,
    request: &Request,
) -> Response<std::io::Cursor<Vec<u8>>> {
    let ciphertext = match parse_ciphertext(request.url()) {
        Ok(ciphertext) => ciphertext,
        Err(err) => return Response::from_string(err).with_status_code(422),
    };
    match oracle.query(&ciphertext) {
        Ok(true) => Response::from_string(CONFORMING_BODY),
        Ok(false) => Response::from_string(NON_CONFORMING_BODY).with_status_code(400),
        Err(err) => {
            warn!("oracle failed: {}", err);
            Response::from_string(err.to_string()).with_status_code(500)
        }
    }
}

fn parse_ciphertext(url: &str) -> std::result::Result<Vec<u8>, String> {
    let mut parts = url.splitn(2, '?');
    let path = parts.next().unwrap_or("");
    if path != ORACLE_PATH {
        return Err(format!("unknown path {}", path));
    }
    let params = parse_query_params(parts.next().unwrap_or(""));
    let ciphertext = params.get("c").ok_or("missing c param")?;
    hex::decode(ciphertext).map_err(|e| format!("bad ciphertext: {}", e))
}

fn parse_query_params(query: &str) -> HashMap<&str, &str> {
    query
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            Some((parts.next()?, parts.next()?))
        })
        .collect()
}

/// Client side of [`OracleServer`]; counts the queries it sends.
pub struct HttpOracle {
    client: reqwest::blocking::Client,
    url: String,
    queries: AtomicU64,
}

impl HttpOracle {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            url: url.to_owned(),
            queries: AtomicU64::new(0),
        }
    }
}

impl PaddingOracle for HttpOracle {
    fn query(&self, ciphertext: &[u8]) -> Result<bool> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let response = self
            .client
            .get(&self.url)
            .query(&[("c", hex::encode(ciphertext))])
            .send()
            .map_err(|e| Error::Oracle(e.to_string()))?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::BAD_REQUEST => Ok(false),
            status => Err(Error::Oracle(format!(
                "unexpected status {}: {}",
                status,
                response.text().unwrap_or_default()
            ))),
        }
    }

    fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::padding::Padding;
    use crate::rsa::{gen_rsa_with_rng, rsa_public_raw, PublicKey, E3};
    use anyhow::Result;
    use num_bigint::BigUint;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn key_pair(seed: u64) -> Result<(PublicKey, PrivateKey)> {
        let mut rng = StdRng::seed_from_u64(seed);
        Ok(gen_rsa_with_rng(256, &E3, &mut rng)?)
    }

    fn encrypt(key: &PublicKey, block: &[u8]) -> Result<Vec<u8>> {
        Ok(rsa_public_raw(key, &bytes_to_int(block))?.to_bytes_be())
    }

    #[test]
    fn conformance_checks() {
        let mut block = vec![0x00, 0x02];
        block.extend_from_slice(&[0xff; 8]);
        block.push(0x00);
        block.extend_from_slice(b"hi");
        assert!(Conformance::Lax.check(&block));
        assert!(Conformance::Strict.check(&block));

        let mut short_padding = vec![0x00, 0x02];
        short_padding.extend_from_slice(&[0xff; 7]);
        short_padding.push(0x00);
        assert!(Conformance::Lax.check(&short_padding));
        assert!(!Conformance::Strict.check(&short_padding));

        let no_separator = [0x00, 0x02, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        assert!(Conformance::Lax.check(&no_separator));
        assert!(!Conformance::Strict.check(&no_separator));

        assert!(!Conformance::Lax.check(&[0x00, 0x01, 0x00]));
        assert!(!Conformance::Lax.check(&[0x02]));
    }

    #[test]
    fn padded_ciphertext_conforms() -> Result<()> {
        let (pub_key, priv_key) = key_pair(4)?;
        let padding = Padding::pkcs1_encryption(pub_key.size());
        let oracle = Pkcs1Oracle::new(priv_key.clone());
        let strict = Pkcs1Oracle::strict(priv_key);

        for message in [&b"Hello, World!"[..], b"", b"1337h4x0rz"].iter() {
            let ciphertext = encrypt(&pub_key, &padding.pad(message)?)?;
            assert!(oracle.query(&ciphertext)?);
            assert!(strict.query(&ciphertext)?);
        }
        assert_eq!(3, oracle.queries());
        assert_eq!(3, strict.queries());
        Ok(())
    }

    #[test]
    fn unpadded_ciphertext_does_not_conform() -> Result<()> {
        let (pub_key, priv_key) = key_pair(5)?;
        let oracle = Pkcs1Oracle::new(priv_key);
        // Decrypts to a block starting 00 00, never 00 02.
        let ciphertext = encrypt(&pub_key, b"Hello, World!")?;
        assert!(!oracle.query(&ciphertext)?);
        assert_eq!(1, oracle.queries());
        Ok(())
    }

    #[test]
    fn short_plaintexts_are_zero_extended() -> Result<()> {
        let (pub_key, priv_key) = key_pair(6)?;
        let k = pub_key.size();
        let oracle = Pkcs1Oracle::new(priv_key);

        // 00 02 followed by zeros: the integer is just 2 * 256^(k-2).
        let mut block = vec![0u8; k];
        block[1] = 0x02;
        let value = bytes_to_int(&block);
        assert_eq!(BigUint::from(2u32) << (8 * (k - 2)), value);
        assert!(oracle.query(&encrypt(&pub_key, &block)?)?);
        Ok(())
    }

    #[test]
    fn counters_are_per_oracle() -> Result<()> {
        let (pub_key, priv_key) = key_pair(7)?;
        let first = Pkcs1Oracle::new(priv_key.clone());
        let second = Pkcs1Oracle::new(priv_key);
        let ciphertext = encrypt(&pub_key, b"abc")?;
        first.query(&ciphertext)?;
        first.query(&ciphertext)?;
        assert_eq!(2, first.queries());
        assert_eq!(0, second.queries());

        let borrowed: &dyn PaddingOracle = &first;
        borrowed.query(&ciphertext)?;
        assert_eq!(3, first.queries());
        Ok(())
    }

    #[test]
    fn query_params() {
        let params = parse_query_params("c=00ff&x=1&bare");
        assert_eq!(Some(&"00ff"), params.get("c"));
        assert_eq!(Some(&"1"), params.get("x"));
        assert_eq!(None, params.get("bare"));

        assert_eq!(Ok(vec![0x00, 0xff]), parse_ciphertext("/oracle?c=00ff"));
        assert!(parse_ciphertext("/other?c=00ff").is_err());
        assert!(parse_ciphertext("/oracle?c=zz").is_err());
        assert!(parse_ciphertext("/oracle").is_err());
    }

    #[test]
    fn server() -> Result<()> {
        let (pub_key, priv_key) = key_pair(8)?;
        let padding = Padding::pkcs1_encryption(pub_key.size());
        let server = OracleServer::new(Pkcs1Oracle::new(priv_key))?;
        let oracle = HttpOracle::new(&server.oracle_url());

        let good = encrypt(&pub_key, &padding.pad(b"kick it, CC")?)?;
        let bad = encrypt(&pub_key, b"kick it, CC")?;
        assert!(oracle.query(&good)?);
        assert!(!oracle.query(&bad)?);
        assert_eq!(2, oracle.queries());

        let client = reqwest::blocking::Client::new();
        let result = client.get(server.get_base_url()).send()?;
        assert_eq!(StatusCode::UNPROCESSABLE_ENTITY, result.status());

        let wrong_path = HttpOracle::new(&server.get_base_url());
        assert!(matches!(wrong_path.query(&good), Err(Error::Oracle(_))));
        Ok(())
    }
}
