use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::wire::event::Observation;
use crate::wire::framer::{datagram_lines, StreamFramer};
use crate::wire::parse::LineParser;

/// TCP read chunk size; lines may span reads.
pub const TCP_READ_SIZE: usize = 4096;

/// Receives UDP datagrams and feeds parsed observations into the queue.
///
/// Runs until cancelled. When the queue is full observations are dropped,
/// consistent with UDP loss semantics.
pub async fn run_udp(
    socket: UdpSocket,
    max_packet_size: usize,
    parser: LineParser,
    tx: mpsc::Sender<Observation>,
    ctx: CancellationToken,
) {
    let mut buf = vec![0u8; max_packet_size];

    loop {
        tokio::select! {
            _ = ctx.cancelled() => return,

            received = socket.recv_from(&mut buf) => {
                let len = match received {
                    Ok((len, _)) => len,
                    Err(e) => {
                        warn!(error = %e, "udp receive failed");
                        continue;
                    }
                };

                for line in datagram_lines(&buf[..len]) {
                    match parser.parse(line) {
                        Some(obs) => {
                            if let Err(err) = tx.try_send(obs) {
                                let obs = err.into_inner();
                                debug!(
                                    kind = obs.value.kind().as_str(),
                                    bucket = %obs.bucket,
                                    "observation queue full, dropping",
                                );
                            }
                        }
                        None => drop_line(line),
                    }
                }
            }
        }
    }
}

/// Accepts TCP senders and spawns a reader task per connection.
pub async fn run_tcp(
    listener: TcpListener,
    parser: LineParser,
    tx: mpsc::Sender<Observation>,
    ctx: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = ctx.cancelled() => return,

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted tcp sender");
                        tokio::spawn(read_stream(
                            stream,
                            parser.clone(),
                            tx.clone(),
                            ctx.child_token(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "tcp accept failed"),
                }
            }
        }
    }
}

/// Reads one TCP sender until EOF, reassembling lines across reads.
///
/// Sends block when the queue is full, which slows the sender down instead
/// of dropping.
async fn read_stream(
    mut stream: TcpStream,
    parser: LineParser,
    tx: mpsc::Sender<Observation>,
    ctx: CancellationToken,
) {
    let mut framer = StreamFramer::new(TCP_READ_SIZE);
    let mut buf = [0u8; TCP_READ_SIZE];
    let mut pending = Vec::new();

    loop {
        tokio::select! {
            _ = ctx.cancelled() => return,

            read = stream.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        framer.finish(|line| collect_line(&parser, line, &mut pending));
                        for obs in pending.drain(..) {
                            let _ = tx.send(obs).await;
                        }
                        return;
                    }
                    Ok(len) => {
                        framer.feed(&buf[..len], |line| collect_line(&parser, line, &mut pending));
                        for obs in pending.drain(..) {
                            if tx.send(obs).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "tcp read failed");
                        return;
                    }
                }
            }
        }
    }
}

fn collect_line(parser: &LineParser, line: &[u8], pending: &mut Vec<Observation>) {
    match parser.parse(line) {
        Some(obs) => pending.push(obs),
        None => drop_line(line),
    }
}

fn drop_line(line: &[u8]) {
    debug!(line = %String::from_utf8_lossy(line), "dropped unparsable line");
}
