use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::{
    split, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::peer::{LatencyNotice, LatencyPeer, PeerError};

const MAX_FRAME_LEN: usize = 64 * 1024;

/// One newline-delimited JSON frame, tagged by `event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum PeerMessage {
    Ping,
    Ack,
    Latency { ms: u64 },
}

impl PeerMessage {
    pub fn encode(&self) -> Result<Vec<u8>, PeerError> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self, PeerError> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

impl From<LinesCodecError> for PeerError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::Io(err) => err.into(),
            LinesCodecError::MaxLineLengthExceeded => {
                PeerError::Protocol("frame exceeds maximum length".to_string())
            }
        }
    }
}

/// A peer reached over any byte stream speaking [`PeerMessage`] lines.
///
/// Acks arrive in ping order. A `ping` whose wait was abandoned still has
/// its ack coming, so every sent ping is counted and a `ping` only resolves
/// once all outstanding acks have been read.
pub struct LinePeer<S> {
    frames: FramedRead<ReadHalf<S>, LinesCodec>,
    writer: WriteHalf<S>,
    outstanding: u64,
}

pub type TcpPeer = LinePeer<TcpStream>;

impl TcpPeer {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, PeerError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        if let Ok(remote) = stream.peer_addr() {
            info!(%remote, "connected to peer");
        }
        Ok(Self::new(stream))
    }
}

impl<S> LinePeer<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        let (reader, writer) = split(stream);
        Self {
            frames: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_FRAME_LEN)),
            writer,
            outstanding: 0,
        }
    }

    /// Pings sent whose ack has not been read yet.
    pub fn outstanding(&self) -> u64 {
        self.outstanding
    }

    async fn send(&mut self, message: PeerMessage) -> Result<(), PeerError> {
        let frame = message.encode()?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Partial frames stay buffered in the codec if this is cancelled.
    async fn recv(&mut self) -> Result<PeerMessage, PeerError> {
        match self.frames.next().await {
            Some(line) => PeerMessage::decode(&line?),
            None => Err(PeerError::Disconnected),
        }
    }
}

#[async_trait]
impl<S> LatencyPeer for LinePeer<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn ping(&mut self) -> Result<(), PeerError> {
        self.send(PeerMessage::Ping).await?;
        self.outstanding += 1;
        while self.outstanding > 0 {
            match self.recv().await? {
                PeerMessage::Ack => {
                    self.outstanding -= 1;
                    if self.outstanding > 0 {
                        debug!(outstanding = self.outstanding, "drained late ack");
                    }
                }
                other => debug!(?other, "ignoring frame while awaiting ack"),
            }
        }
        Ok(())
    }

    async fn notify_latency(&mut self, notice: LatencyNotice) -> Result<(), PeerError> {
        self.send(PeerMessage::Latency { ms: notice.ms }).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServeStats {
    pub pings: u64,
    pub notices: u64,
    pub last_latency_ms: Option<u64>,
}

/// Answers every `ping` with an `ack` and logs `latency` notices until the
/// client hangs up.
pub async fn serve_connection<S>(stream: S) -> Result<ServeStats, PeerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let mut line = String::new();
    let mut stats = ServeStats::default();

    loop {
        line.clear();
        if stream.read_line(&mut line).await? == 0 {
            return Ok(stats);
        }

        match PeerMessage::decode(&line) {
            Ok(PeerMessage::Ping) => {
                stats.pings += 1;
                stream.write_all(&PeerMessage::Ack.encode()?).await?;
                stream.flush().await?;
            }
            Ok(PeerMessage::Latency { ms }) => {
                stats.notices += 1;
                stats.last_latency_ms = Some(ms);
                info!(latency_ms = ms, "latency reported");
            }
            Ok(PeerMessage::Ack) => debug!("unsolicited ack"),
            Err(err) => warn!(%err, "skipping malformed frame"),
        }
    }
}
