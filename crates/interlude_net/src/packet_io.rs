use std::io::{self, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use interlude_protocol::{Encode, Packet};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::buffer_pool::BufferPool;
use crate::codec::{PacketDecoder, PacketEncoder};

const READ_BUF_SIZE: usize = 4096;

/// Encodes one packet into a plaintext frame body (opcode included),
/// ready for an [`Outbox`]. Sealing and encryption happen in the writer
/// task that owns the connection's cipher state.
pub fn encode_packet_body<P>(pkt: &P) -> anyhow::Result<Bytes>
where
    P: Packet + Encode,
{
    let mut buf = Vec::new();
    pkt.encode_with_opcode(&mut buf)?;
    Ok(buf.into())
}

/// A duplex framed connection driven inline, for the strictly alternating
/// handshake phases where each side takes turns.
///
/// Read scratch comes out of the process-wide [`BufferPool`] and goes
/// straight back once the bytes are queued in the decoder.
pub struct PacketIo {
    stream: TcpStream,
    enc: PacketEncoder,
    dec: PacketDecoder,
    timeout: Duration,
    pool: Arc<BufferPool>,
}

impl PacketIo {
    pub fn new(
        stream: TcpStream,
        enc: PacketEncoder,
        dec: PacketDecoder,
        timeout: Duration,
        pool: Arc<BufferPool>,
    ) -> Self {
        Self {
            stream,
            enc,
            dec,
            timeout,
            pool,
        }
    }

    pub async fn send_packet<P>(&mut self, pkt: &P) -> anyhow::Result<()>
    where
        P: Packet + Encode,
    {
        self.enc.append_packet(pkt)?;
        let bytes = self.enc.take();
        timeout(self.timeout, self.stream.write_all(&bytes)).await??;
        Ok(())
    }

    /// Receives the next decrypted frame body.
    pub async fn recv_frame(&mut self) -> anyhow::Result<BytesMut> {
        timeout(self.timeout, async {
            loop {
                if let Some(frame) = self.dec.try_next_packet()? {
                    return Ok(frame);
                }

                let mut buf = self.pool.acquire(READ_BUF_SIZE);

                if self.stream.read_buf(&mut buf).await? == 0 {
                    return Err(io::Error::from(ErrorKind::UnexpectedEof).into());
                }

                self.dec.queue_slice(&buf);
                self.pool.release(buf);
            }
        })
        .await?
    }

    /// Cipher swaps (inter-server BlowFishKey) happen between frames
    /// through these.
    pub fn encoder_mut(&mut self) -> &mut PacketEncoder {
        &mut self.enc
    }

    pub fn decoder_mut(&mut self) -> &mut PacketDecoder {
        &mut self.dec
    }

    /// Splits into a read task and a write task bridged by bounded
    /// channels. From here on the connection is steady-state: inbound
    /// frames arrive strictly in order on the returned receiver, outbound
    /// bodies go through the [`Outbox`].
    pub fn split(self, config: SplitConfig) -> SplitConnection {
        let Self {
            stream,
            mut enc,
            mut dec,
            pool,
            ..
        } = self;

        let lagging = Arc::new(AtomicBool::new(false));
        let (inbound_tx, inbound_rx) = flume::bounded::<BytesMut>(config.queue_size);
        let (outbound_tx, outbound_rx) = flume::bounded::<Bytes>(config.queue_size);

        let (mut reader, mut writer) = stream.into_split();

        let read_timeout = config.read_timeout;
        let reader_task = tokio::spawn(async move {
            loop {
                let frame = match dec.try_next_packet() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        let mut buf = pool.acquire(READ_BUF_SIZE);
                        match timeout(read_timeout, reader.read_buf(&mut buf)).await {
                            Ok(Ok(0)) => break, // EOF
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => {
                                debug!("error reading from stream: {e}");
                                break;
                            }
                            Err(_) => {
                                debug!("connection idle past the read deadline");
                                break;
                            }
                        }
                        dec.queue_slice(&buf);
                        pool.release(buf);
                        continue;
                    }
                    Err(e) => {
                        warn!("error decoding inbound frame: {e:#}");
                        break;
                    }
                };

                if inbound_tx.send_async(frame).await.is_err() {
                    break; // handler went away
                }
            }
        });

        let write_timeout = config.write_timeout;
        let writer_task = tokio::spawn(async move {
            while let Ok(body) = outbound_rx.recv_async().await {
                if let Err(e) = enc.append_body(&body) {
                    warn!("error sealing outbound frame: {e:#}");
                    break;
                }
                let bytes = enc.take();
                match timeout(write_timeout, writer.write_all(&bytes)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!("error writing to stream: {e}");
                        break;
                    }
                    Err(_) => {
                        debug!("write stalled past the deadline");
                        break;
                    }
                }
            }
        });

        SplitConnection {
            outbox: Outbox {
                tx: outbound_tx,
                lagging,
            },
            inbound: inbound_rx,
            reader_task,
            writer_task,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SplitConfig {
    /// Bound of both per-connection queues, in frames.
    pub queue_size: usize,
    /// Inactivity deadline on the read side.
    pub read_timeout: Duration,
    /// Per-write stall deadline.
    pub write_timeout: Duration,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            queue_size: 256,
            read_timeout: Duration::from_secs(120),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Sender half of a split connection's outbound queue.
///
/// `send` never blocks: a full queue drops the packet and marks the client
/// lagging instead of stalling whoever is broadcasting. Frames are sealed
/// whole by the writer task, so a drop never tears a write.
#[derive(Clone)]
pub struct Outbox {
    tx: flume::Sender<Bytes>,
    lagging: Arc<AtomicBool>,
}

impl Outbox {
    /// Queues one plaintext frame body. Returns `false` if the packet was
    /// dropped (queue full or connection gone).
    pub fn send(&self, body: Bytes) -> bool {
        match self.tx.try_send(body) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(_)) => {
                self.lagging.store(true, Ordering::Relaxed);
                false
            }
            Err(flume::TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn send_packet<P>(&self, pkt: &P) -> bool
    where
        P: Packet + Encode,
    {
        match encode_packet_body(pkt) {
            Ok(body) => self.send(body),
            Err(e) => {
                warn!("failed to encode '{}': {e:#}", P::NAME);
                false
            }
        }
    }

    /// True once the queue has overflowed at least once.
    pub fn is_lagging(&self) -> bool {
        self.lagging.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_disconnected()
    }
}

/// A steady-state connection: ordered inbound frames plus the outbound
/// queue. Dropping it aborts both tasks and closes the socket.
pub struct SplitConnection {
    pub outbox: Outbox,
    pub inbound: flume::Receiver<BytesMut>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl SplitConnection {
    /// Stops reading and lets the writer drain what is already queued, up
    /// to `deadline`. Dropping the returned-from value closes the socket.
    pub async fn flush_and_close(self, deadline: Duration) {
        self.reader_task.abort();

        let start = tokio::time::Instant::now();
        while !self.outbox.tx.is_empty() && start.elapsed() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if !self.outbox.tx.is_empty() {
            debug!("writer did not drain before the shutdown deadline");
        }
    }
}

impl Drop for SplitConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}
