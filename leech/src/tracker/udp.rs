use std::net::{Ipv4Addr, SocketAddr};
use bytes::{Buf, BufMut, BytesMut};
use super::{AnnounceParams, Result, RetryPolicy, TrackerError, Transport};

// Reference: https://www.bittorrent.org/beps/bep_0015.html

const PROTOCOL_ID: u64      = 0x41727101980;
const ACTION_CONNECT: u32   = 0;
const ACTION_ANNOUNCE: u32  = 1;
const ACTION_ERROR: u32     = 3;

pub const CONNECT_REQUEST_LEN: usize = 16;
pub const ANNOUNCE_REQUEST_LEN: usize = 98;
const ANNOUNCE_HEADER_LEN: usize = 20;
const MAX_RESPONSE_LEN: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Init,
    ConnectSent,
    Connected,
    AnnounceSent,
    PeersReady,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    pub action: u32,
    pub trans_id: u32,
    pub conn_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceResponse {
    pub action: u32,
    pub trans_id: u32,
    pub interval: u32,
    pub leechers: u32,
    pub seeders: u32,
    pub peers: Vec<SocketAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Connect(ConnectResponse),
    Announce(AnnounceResponse),
    Error { trans_id: u32, message: String },
}

impl Response {

    // Dispatches on the action field. Unknown actions and truncated datagrams give None.
    pub fn parse(buf: &[u8]) -> Option<Response> {
        if buf.len() < 8 {
            return None;
        }
        let mut resp = buf;
        let action = resp.get_u32();
        let trans_id = resp.get_u32();

        match action {
            ACTION_CONNECT if resp.remaining() >= 8 => Some(Response::Connect(ConnectResponse {
                action,
                trans_id,
                conn_id: resp.get_u64(),
            })),

            ACTION_ANNOUNCE if buf.len() >= ANNOUNCE_HEADER_LEN => {
                let interval = resp.get_u32();
                let leechers = resp.get_u32();
                let seeders = resp.get_u32();
                let peers = resp
                    .chunks_exact(6)
                    .map(|c| {
                        let ip = Ipv4Addr::new(c[0], c[1], c[2], c[3]);
                        SocketAddr::new(ip.into(), u16::from_be_bytes([c[4], c[5]]))
                    })
                    .collect();
                Some(Response::Announce(AnnounceResponse {
                    action,
                    trans_id,
                    interval,
                    leechers,
                    seeders,
                    peers,
                }))
            },

            ACTION_ERROR => Some(Response::Error {
                trans_id,
                message: String::from_utf8_lossy(resp).into_owned(),
            }),

            _ => None,
        }
    }

    fn action(&self) -> u32 {
        match self {
            Response::Connect(r) => r.action,
            Response::Announce(r) => r.action,
            Response::Error { .. } => ACTION_ERROR,
        }
    }

    fn trans_id(&self) -> u32 {
        match self {
            Response::Connect(r) => r.trans_id,
            Response::Announce(r) => r.trans_id,
            Response::Error { trans_id, .. } => *trans_id,
        }
    }
}

pub fn build_connect_request(trans_id: u32) -> [u8; CONNECT_REQUEST_LEN] {
    let mut buf = BytesMut::with_capacity(CONNECT_REQUEST_LEN);
    buf.put_u64(PROTOCOL_ID);
    buf.put_u32(ACTION_CONNECT);
    buf.put_u32(trans_id);

    let mut out = [0; CONNECT_REQUEST_LEN];
    out.copy_from_slice(&buf);
    out
}

pub fn build_announce_request(conn_id: u64, trans_id: u32, params: &AnnounceParams) -> [u8; ANNOUNCE_REQUEST_LEN] {
    let mut buf = BytesMut::with_capacity(ANNOUNCE_REQUEST_LEN);
    buf.put_u64(conn_id);
    buf.put_u32(ACTION_ANNOUNCE);
    buf.put_u32(trans_id);
    buf.put(&params.info_hash[..]);
    buf.put(&params.client_id[..]);
    buf.put_u64(params.downloaded);
    buf.put_u64(params.left);
    buf.put_u64(params.uploaded);
    buf.put_u32(0); // Event: none.
    buf.put_u32(0); // IP address, default = 0.
    buf.put_u32(params.key);
    buf.put_i32(params.num_want.map(|n| n as i32).unwrap_or(-1));
    buf.put_u16(params.port);

    let mut out = [0; ANNOUNCE_REQUEST_LEN];
    out.copy_from_slice(&buf);
    out
}

pub struct UdpTracker<T> {

    transport: T,

    policy: RetryPolicy,

    state: TrackerState,

}

impl<T: Transport> UdpTracker<T> {

    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            state: TrackerState::Init,
        }
    }

    pub fn state(&self) -> TrackerState { self.state }

    async fn connect(&mut self) -> Result<u64> {
        let trans_id = rand::random();
        let request = build_connect_request(trans_id);

        self.state = TrackerState::ConnectSent;
        let resp = send_with_retry(&self.transport, &self.policy, &request, trans_id, ACTION_CONNECT).await?;
        let Response::Connect(resp) = resp else {
            return Err(TrackerError::ResponseError("expected connect response".to_string()));
        };

        tracing::trace!("connected to tracker");
        self.state = TrackerState::Connected;
        Ok(resp.conn_id)
    }

    pub async fn announce(&mut self, params: &AnnounceParams) -> Result<AnnounceResponse> {

        let conn_id = self.connect().await?;
        let trans_id = rand::random();
        let request = build_announce_request(conn_id, trans_id, params);

        self.state = TrackerState::AnnounceSent;
        let resp = send_with_retry(&self.transport, &self.policy, &request, trans_id, ACTION_ANNOUNCE).await?;
        let Response::Announce(resp) = resp else {
            return Err(TrackerError::ResponseError("expected announce response".to_string()));
        };

        tracing::info!(
            "provided {} peers ({} seeders, {} leechers)",
            resp.peers.len(),
            resp.seeders,
            resp.leechers,
        );
        self.state = TrackerState::PeersReady;
        Ok(resp)
    }
}

// Transmits the request until a response with the expected action and transaction id arrives.
async fn send_with_retry<T: Transport>(
    transport: &T,
    policy: &RetryPolicy,
    request: &[u8],
    trans_id: u32,
    action: u32,
) -> Result<Response> {
    policy.run(|attempt| {
        tracing::trace!("sending action {} request, attempt {}", action, attempt + 1);
        exchange(transport, request, trans_id, action)
    }).await
}

// A single transmission, waits until a matching response is received.
async fn exchange<T: Transport>(transport: &T, request: &[u8], trans_id: u32, action: u32) -> Result<Response> {
    transport.send(request).await?;

    let mut buf = [0u8; MAX_RESPONSE_LEN];
    loop {
        let n = transport.recv(&mut buf).await?;
        let Some(resp) = Response::parse(&buf[..n]) else {
            tracing::warn!("ignoring unrecognised tracker response of {} bytes", n);
            continue;
        };
        if resp.trans_id() != trans_id {
            tracing::warn!("ignoring response with transaction id {}, expected {}", resp.trans_id(), trans_id);
            continue;
        }
        if let Response::Error { message, .. } = resp {
            return Err(TrackerError::ResponseError(message));
        }
        if resp.action() == action {
            return Ok(resp);
        }
        tracing::warn!("ignoring response with action {}, expected {}", resp.action(), action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::VecDeque, sync::Mutex, time::Duration};
    use tokio::{sync::Notify, time::Instant};

    fn params() -> AnnounceParams {
        AnnounceParams {
            info_hash: [0xaa; 20],
            client_id: *b"-LE0100-123456789012",
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left: 49_152,
            key: 0xdead_beef,
            num_want: None,
        }
    }

    fn connect_response(trans_id: u32, conn_id: u64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32(ACTION_CONNECT);
        buf.put_u32(trans_id);
        buf.put_u64(conn_id);
        buf.to_vec()
    }

    fn announce_response(trans_id: u32, peers: &[([u8; 4], u16)]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32(ACTION_ANNOUNCE);
        buf.put_u32(trans_id);
        buf.put_u32(1800);
        buf.put_u32(3);
        buf.put_u32(7);
        for (ip, port) in peers {
            buf.put(&ip[..]);
            buf.put_u16(*port);
        }
        buf.to_vec()
    }

    // Scripted tracker: answers each request with the closure's response, if any.
    struct FakeTransport {
        sent: Mutex<Vec<(Instant, Vec<u8>)>>,
        inbox: Mutex<VecDeque<Vec<u8>>>,
        notify: Notify,
        respond: Box<dyn Fn(usize, &[u8]) -> Vec<Vec<u8>> + Send + Sync>,
    }

    impl FakeTransport {
        fn new(respond: impl Fn(usize, &[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                inbox: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                respond: Box::new(respond),
            }
        }
    }

    #[async_trait::async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, buf: &[u8]) -> std::io::Result<()> {
            let n = {
                let mut sent = self.sent.lock().unwrap();
                sent.push((Instant::now(), buf.to_vec()));
                sent.len() - 1
            };
            let replies = (self.respond)(n, buf);
            if !replies.is_empty() {
                self.inbox.lock().unwrap().extend(replies);
                self.notify.notify_one();
            }
            Ok(())
        }

        async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
            loop {
                let next = self.inbox.lock().unwrap().pop_front();
                if let Some(msg) = next {
                    buf[..msg.len()].copy_from_slice(&msg);
                    return Ok(msg.len());
                }
                self.notify.notified().await;
            }
        }
    }

    fn trans_id_of(req: &[u8]) -> u32 {
        u32::from_be_bytes(req[12..16].try_into().unwrap())
    }

    fn conn_id_of(req: &[u8]) -> u64 {
        u64::from_be_bytes(req[0..8].try_into().unwrap())
    }

    #[test]
    fn test_connect_request() {
        let req = build_connect_request(0x0102_0304);
        assert_eq!(req, hex_literal::hex!("0000041727101980 00000000 01020304"));
    }

    #[test]
    fn test_announce_request_layout() {
        let params = params();
        let req = build_announce_request(0x1122_3344_5566_7788, 0x0a0b_0c0d, &params);
        assert_eq!(req.len(), 98);
        assert_eq!(conn_id_of(&req), 0x1122_3344_5566_7788);
        assert_eq!(&req[8..12], &[0, 0, 0, 1]);
        assert_eq!(trans_id_of(&req), 0x0a0b_0c0d);
        assert_eq!(&req[16..36], &params.info_hash);
        assert_eq!(&req[36..56], &params.client_id);
        assert_eq!(&req[56..64], &[0; 8]);
        assert_eq!(&req[64..72], &49_152u64.to_be_bytes());
        assert_eq!(&req[72..80], &[0; 8]);
        assert_eq!(&req[80..88], &[0; 8]);
        assert_eq!(&req[88..92], &0xdead_beefu32.to_be_bytes());
        assert_eq!(&req[92..96], &[0xff; 4]);
        assert_eq!(&req[96..98], &[0x1a, 0xe1]);
    }

    #[test]
    fn test_parse_connect_response() {
        let resp = Response::parse(&connect_response(7, 0xabcd)).unwrap();
        assert_eq!(resp, Response::Connect(ConnectResponse { action: 0, trans_id: 7, conn_id: 0xabcd }));
    }

    #[test]
    fn test_parse_announce_response() {
        let mut raw = announce_response(9, &[([10, 0, 0, 1], 6881), ([192, 168, 1, 20], 51413)]);
        // Trailing partial peer record is ignored.
        raw.extend_from_slice(&[1, 2, 3]);
        let Some(Response::Announce(resp)) = Response::parse(&raw) else {
            panic!("expected announce response");
        };
        assert_eq!(resp.trans_id, 9);
        assert_eq!(resp.interval, 1800);
        assert_eq!(resp.leechers, 3);
        assert_eq!(resp.seeders, 7);
        assert_eq!(
            resp.peers,
            vec![
                "10.0.0.1:6881".parse::<SocketAddr>().unwrap(),
                "192.168.1.20:51413".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn test_parse_unknown_and_short() {
        assert_eq!(Response::parse(&[0, 0, 0, 7, 0, 0, 0, 1]), None);
        assert_eq!(Response::parse(&[0, 0, 0]), None);
        // Connect without connection id.
        assert_eq!(Response::parse(&[0, 0, 0, 0, 0, 0, 0, 1]), None);
        let mut err = vec![0, 0, 0, 3, 0, 0, 0, 5];
        err.extend_from_slice(b"bad info hash");
        assert_eq!(
            Response::parse(&err),
            Some(Response::Error { trans_id: 5, message: "bad info hash".to_string() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_announce() {
        let transport = FakeTransport::new(|_, req| {
            if req.len() == CONNECT_REQUEST_LEN {
                vec![connect_response(trans_id_of(req), 42)]
            } else {
                assert_eq!(conn_id_of(req), 42);
                vec![announce_response(trans_id_of(req), &[([127, 0, 0, 1], 6881)])]
            }
        });
        let mut tracker = UdpTracker::new(transport, RetryPolicy::default());
        assert_eq!(tracker.state(), TrackerState::Init);

        let resp = tracker.announce(&params()).await.unwrap();
        assert_eq!(resp.peers, vec!["127.0.0.1:6881".parse().unwrap()]);
        assert_eq!(tracker.state(), TrackerState::PeersReady);
        assert_eq!(tracker.transport.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retransmits_with_backoff() {
        // First two connect requests and first announce are lost.
        let transport = FakeTransport::new(|n, req| match n {
            0 | 1 | 3 => vec![],
            _ if req.len() == CONNECT_REQUEST_LEN => vec![connect_response(trans_id_of(req), 1)],
            _ => vec![announce_response(trans_id_of(req), &[])],
        });
        let start = Instant::now();
        let mut tracker = UdpTracker::new(transport, RetryPolicy::default());
        tracker.announce(&params()).await.unwrap();

        let sent = tracker.transport.sent.lock().unwrap();
        let times: Vec<u64> = sent.iter().map(|(t, _)| (*t - start).as_secs()).collect();
        // Connect at 0, 15, 45. Announce at 45, then 60.
        assert_eq!(times, vec![0, 15, 45, 45, 60]);
        // Retransmits reuse the transaction id.
        assert_eq!(trans_id_of(&sent[0].1), trans_id_of(&sent[2].1));
        assert_eq!(trans_id_of(&sent[3].1), trans_id_of(&sent[4].1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_mismatched_transaction_id() {
        let transport = FakeTransport::new(|_, req| {
            let trans_id = trans_id_of(req);
            if req.len() == CONNECT_REQUEST_LEN {
                vec![
                    connect_response(trans_id.wrapping_add(1), 666),
                    vec![0, 0, 0, 9, 0, 0, 0, 0],
                    connect_response(trans_id, 42),
                ]
            } else {
                vec![
                    announce_response(trans_id.wrapping_add(1), &[([6, 6, 6, 6], 6666)]),
                    announce_response(trans_id, &[([1, 2, 3, 4], 1234)]),
                ]
            }
        });
        let mut tracker = UdpTracker::new(transport, RetryPolicy::default());
        let resp = tracker.announce(&params()).await.unwrap();
        assert_eq!(resp.peers, vec!["1.2.3.4:1234".parse().unwrap()]);
        let sent = tracker.transport.sent.lock().unwrap();
        assert_eq!(conn_id_of(&sent[1].1), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_tracker_exhausts_retries() {
        let transport = FakeTransport::new(|_, _| vec![]);
        let start = Instant::now();
        let mut tracker = UdpTracker::new(transport, RetryPolicy::default());
        let res = tracker.announce(&params()).await;
        assert!(matches!(res, Err(TrackerError::RetriesExhausted { attempts: 8 })));
        assert_eq!(tracker.state(), TrackerState::ConnectSent);
        assert_eq!(tracker.transport.sent.lock().unwrap().len(), 8);
        assert_eq!(start.elapsed(), Duration::from_secs(3825));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_error_response() {
        let transport = FakeTransport::new(|_, req| {
            let mut err = BytesMut::new();
            err.put_u32(ACTION_ERROR);
            err.put_u32(trans_id_of(req));
            err.put(&b"unregistered torrent"[..]);
            vec![err.to_vec()]
        });
        let mut tracker = UdpTracker::new(transport, RetryPolicy::default());
        match tracker.announce(&params()).await {
            Err(TrackerError::ResponseError(msg)) => assert_eq!(msg, "unregistered torrent"),
            other => panic!("expected response error, got {:?}", other.map(|r| r.peers)),
        }
    }
}
