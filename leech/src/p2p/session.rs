use std::{net::SocketAddr, sync::Arc};
use tokio::{io::{AsyncRead, AsyncWrite}, net::TcpStream, sync::mpsc, time};
use tokio_util::codec::Framed;
use futures::{SinkExt, StreamExt};
use crate::{
    block::{Block, BlockRequest},
    disk::DiskCommand,
    picker::BlockQueue,
    torrent::{TorrentCommand, TorrentContext},
    Bitfield,
};
use super::{*, state::{ConnEvent, ConnState}};

type PeerSocket<S> = Framed<S, FrameCodec>;

#[derive(Debug)]
pub struct PeerSession {

    // The peer's IP address.
    address: SocketAddr,

    // Context is a read only state accessible by all peers.
    ctx: Arc<TorrentContext>,

    // Commands to the peer.
    peer_rx: PeerRx,

    // Blocks this peer can serve, in the order it announced them.
    queue: BlockQueue,

    state: ConnState,

}

impl PeerSession {

    pub fn new(address: SocketAddr, ctx: Arc<TorrentContext>) -> (PeerSession, PeerTx) {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let queue = BlockQueue::new(ctx.info);
        (
            PeerSession {
                address,
                ctx,
                peer_rx,
                queue,
                state: ConnState::Connecting,
            },
            peer_tx,
        )
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    // Connects and runs the session until it closes, then tells the torrent.
    #[tracing::instrument(name = "peer", skip_all, fields(address = %self.address))]
    pub async fn start_session(mut self) {
        match self.connect().await {
            Ok(()) => tracing::info!("session closed"),
            Err(e) => tracing::warn!("session ended: {}", e),
        }
        self.ctx.torrent_tx.send(TorrentCommand::PeerDisconnected { address: self.address }).ok();
    }

    async fn connect(&mut self) -> Result<()> {
        let connect = time::timeout(self.ctx.connect_timeout, TcpStream::connect(self.address));
        let stream = tokio::select! {
            res = connect => res.map_err(|_| PeerError::Timeout)??,
            Some(PeerCommand::Shutdown) = self.peer_rx.recv() => return Ok(()),
        };
        tracing::trace!("outbound connection successful");
        self.run(stream).await
    }

    // Runs the peer wire protocol over an established stream.
    pub async fn run<S>(&mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.transition(ConnEvent::Connected);
        let mut socket = Framed::new(stream, FrameCodec::new());

        let handshake = Handshake::new(self.ctx.info_hash, self.ctx.client_id);
        tracing::debug!("send handshake");
        let res = match socket.send(handshake).await {
            Ok(()) => self.run_loop(&mut socket).await,
            Err(e) => Err(e),
        };
        if res.is_err() {
            self.transition(ConnEvent::Failed);
        }
        res
    }

    async fn run_loop<S>(&mut self, socket: &mut PeerSocket<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let idle_timeout = self.ctx.idle_timeout;

        while !self.state.is_closing() { tokio::select! {

            // Frame from peer.
            frame = time::timeout(idle_timeout, socket.next()) => {
                match frame.map_err(|_| PeerError::Timeout)? {
                    Some(Ok(Frame::Handshake(handshake))) => self.handle_handshake(socket, handshake).await?,
                    Some(Ok(Frame::Message(msg))) => self.handle_msg(socket, msg).await?,
                    Some(Err(e)) => return Err(e),
                    None if self.state == ConnState::Handshaking => return Err(PeerError::NoHandshake),
                    None => {
                        tracing::info!("peer closed connection");
                        self.transition(ConnEvent::Failed);
                    },
                }
            }

            // Command from the torrent.
            Some(cmd) = self.peer_rx.recv() => {
                match cmd {
                    PeerCommand::Shutdown => {
                        tracing::info!("session shutdown");
                        self.transition(ConnEvent::Done);
                    },
                }
            }

        }}

        Ok(())
    }

    fn transition(&mut self, event: ConnEvent) {
        match self.state.next(event) {
            Some(next) => {
                if next != self.state {
                    tracing::trace!("{} -> {}", self.state, next);
                }
                self.state = next;
            },
            None => tracing::warn!("unexpected {:?} while {}", event, self.state),
        }
    }

    // Logs a message and sends to peer.
    async fn send_message<S>(&mut self, socket: &mut PeerSocket<S>, msg: Message) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tracing::debug!("send: {}", msg);
        socket.send(msg).await
    }

    async fn handle_handshake<S>(&mut self, socket: &mut PeerSocket<S>, handshake: Handshake) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tracing::debug!("read: handshake");
        // Protocol string is checked by the codec.
        if handshake.info_hash != self.ctx.info_hash {
            return Err(PeerError::IncorrectInfoHash);
        }
        tracing::info!("handshake successful, peer id: {}", String::from_utf8_lossy(&handshake.peer_id));
        self.transition(ConnEvent::Handshake);
        self.send_message(socket, Message::Interested).await
    }

    async fn handle_msg<S>(&mut self, socket: &mut PeerSocket<S>, msg: Message) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tracing::debug!("read: {}", msg);

        match msg {

            Message::Choke => {
                self.queue.choked = true;
                self.transition(ConnEvent::Choke);
            },

            Message::Unchoke => {
                self.queue.choked = false;
                self.transition(ConnEvent::Unchoke);
                self.request_piece(socket).await?;
            },

            Message::Have { idx } => {
                let was_empty = self.queue.is_empty();
                self.queue.queue(idx);
                if was_empty {
                    self.request_piece(socket).await?;
                }
            },

            Message::Bitfield(bitfield) => self.handle_bitfield(socket, bitfield).await?,

            Message::Block(block) => self.handle_block(socket, block).await?,

            Message::KeepAlive => {},

            // Nothing is uploaded, requests from the peer go unanswered.
            Message::Interested
            | Message::NotInterested
            | Message::Request(_)
            | Message::Cancel(_)
            | Message::Port { .. } => tracing::trace!("ignoring: {}", msg),

            Message::Unknown { id, .. } => tracing::debug!("ignoring unknown message id {}", id),

        }

        Ok(())
    }

    async fn handle_bitfield<S>(&mut self, socket: &mut PeerSocket<S>, bitfield: Bitfield) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let num_pieces = self.ctx.info.num_pieces as usize;
        tracing::info!("peer has {}/{} pieces", bitfield.iter_ones().filter(|i| *i < num_pieces).count(), num_pieces);

        let was_empty = self.queue.is_empty();
        // Trailing spare bits are ignored.
        for idx in bitfield.iter_ones().take_while(|i| *i < num_pieces) {
            self.queue.queue(idx as u32);
        }
        if was_empty {
            self.request_piece(socket).await?;
        }
        Ok(())
    }

    async fn handle_block<S>(&mut self, socket: &mut PeerSocket<S>, block: Block) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = BlockRequest::from_block(&block);
        if !request.is_valid(&self.ctx.info) {
            tracing::warn!("invalid block: {:?}", request);
            return Ok(());
        }

        if self.ctx.pieces.add_received(&block).await {
            let offset = self.ctx.info.piece_offset(block.piece_idx) + block.offset as u64;
            self.ctx.disk_tx.send(DiskCommand::WriteBlock { offset, data: block.data })?;
            self.ctx.torrent_tx.send(TorrentCommand::BlockReceived)?;
        } else {
            tracing::debug!("duplicate block: {:?}", request);
        }

        if self.ctx.pieces.is_done().await {
            tracing::info!("all blocks received");
            self.ctx.torrent_tx.send(TorrentCommand::Complete)?;
            self.transition(ConnEvent::Done);
            return Ok(());
        }

        self.request_piece(socket).await
    }

    // Sends a request for the first queued block that no other peer has claimed.
    // At most one request is sent per call.
    async fn request_piece<S>(&mut self, socket: &mut PeerSocket<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while !self.queue.choked {
            let Some(request) = self.queue.deque() else {
                break;
            };
            if self.ctx.pieces.try_request(&request).await {
                return self.send_message(socket, Message::Request(request)).await;
            }
        }
        Ok(())
    }
}
