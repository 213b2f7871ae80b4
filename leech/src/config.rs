use std::{path::PathBuf, time::Duration};
use rand::Rng;
use crate::{tracker::RetryPolicy, ID};

#[derive(Debug, Clone)]
pub struct Config {

    pub client_id: ID,

    // Directory the output file is written to.
    pub dir: PathBuf,

    // Port reported to the tracker in announces.
    pub port: u16,

    // Upper bound on concurrent peer sessions.
    pub max_peers: usize,

    pub tracker_retry: RetryPolicy,

    pub connect_timeout: Duration,

    // A peer that sends nothing for this long is disconnected.
    pub idle_timeout: Duration,

}

const CLIENT_ID_PREFIX: &[u8; 8] = b"-LE0100-";

// Azureus-style peer id, fixed client prefix followed by random digits.
pub fn generate_client_id() -> ID {
    let mut id = [0; 20];
    id[..8].copy_from_slice(CLIENT_ID_PREFIX);
    let mut rng = rand::thread_rng();
    for b in id[8..].iter_mut() {
        *b = rng.gen_range(b'0'..=b'9');
    }
    id
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: generate_client_id(),
            dir: PathBuf::from("downloads"),
            port: 6881,
            max_peers: 50,
            tracker_retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id() {
        let id = generate_client_id();
        assert_eq!(&id[..8], CLIENT_ID_PREFIX);
        assert!(id[8..].iter().all(|b| b.is_ascii_digit()));
    }
}
