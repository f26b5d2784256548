//! The duplex message pump.
//!
//! Two concurrently scheduled loops share one secure channel for the life
//! of a session: the sender loop carries console input to the peer, the
//! receiver loop carries peer frames to the console. Each loop races its
//! blocking read against the shutdown coordinator's cancellation signal, so
//! whichever loop is still parked when the other requests termination is
//! actively unblocked rather than left waiting for its next wakeup.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, Lines};
use tracing::{debug, warn};

use crate::config::Identity;
use crate::console::Console;
use crate::error::SessionError;
use crate::framing::{Frame, FrameReader, FrameWriter, TERMINATION_SENTINEL};
use crate::shutdown::ShutdownCoordinator;
use crate::tls::SecureChannel;

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The local user entered the termination sentinel (or closed input).
    LocalExit,
    /// The peer sent the termination sentinel.
    PeerExit,
    /// The peer closed the connection without a sentinel.
    PeerDisconnected,
    /// The transport failed mid-session.
    TransportFailed,
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionOutcome::LocalExit => write!(f, "ended locally"),
            SessionOutcome::PeerExit => write!(f, "ended by the peer"),
            SessionOutcome::PeerDisconnected => write!(f, "peer disconnected"),
            SessionOutcome::TransportFailed => write!(f, "transport failure"),
        }
    }
}

/// Terminal result of a session, returned to the caller. The caller decides
/// what happens to the process; the session never exits it.
#[derive(Debug)]
pub struct SessionReport {
    /// Why the session ended.
    pub outcome: SessionOutcome,
    /// Messages transmitted by the local side.
    pub messages_sent: usize,
    /// Messages received and displayed.
    pub messages_received: usize,
}

/// Run a session over an established channel, reading input from stdin.
pub async fn run_session(
    channel: SecureChannel,
    identity: Identity,
    console: Arc<Console>,
) -> Result<SessionReport, SessionError> {
    let (reader, writer) = channel.split();
    let input = BufReader::new(tokio::io::stdin());
    run_pump(reader, writer, input, identity, console).await
}

/// Drive the two loops over arbitrary channel halves and input.
///
/// Spawns the sender and receiver, waits for both to stop, then closes the
/// write half exactly once and reports the outcome.
pub async fn run_pump<R, W, I>(
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    input: I,
    identity: Identity,
    console: Arc<Console>,
) -> Result<SessionReport, SessionError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    I: AsyncBufRead + Unpin + Send + 'static,
{
    let shutdown = Arc::new(ShutdownCoordinator::new());

    let sender = tokio::spawn(sender_loop(
        writer,
        input.lines(),
        identity,
        console.clone(),
        shutdown.clone(),
    ));
    let receiver = tokio::spawn(receiver_loop(reader, console, shutdown.clone()));

    let (sender_res, receiver_res) = tokio::join!(sender, receiver);
    let sender_stopped = sender_res.map_err(join_failure)?;
    let receiver_stopped = receiver_res.map_err(join_failure)?;

    // Both loops have stopped issuing operations; release the channel once.
    let mut writer = sender_stopped.writer;
    if let Err(e) = writer.close().await {
        debug!(error = %e, "channel close");
    }
    debug!(state = ?shutdown.state(true), "session finished");

    Ok(SessionReport {
        outcome: resolve_outcome(sender_stopped.cause, receiver_stopped.cause),
        messages_sent: sender_stopped.sent,
        messages_received: receiver_stopped.received,
    })
}

fn join_failure(e: tokio::task::JoinError) -> SessionError {
    SessionError::Io(io::Error::new(io::ErrorKind::Other, e))
}

/// Pick the session outcome from what each loop observed. When both stopped
/// with a cause (a termination race), a transport failure outranks a
/// sentinel, and the local sentinel outranks the receiver's observation.
fn resolve_outcome(
    sender: Option<SessionOutcome>,
    receiver: Option<SessionOutcome>,
) -> SessionOutcome {
    match (sender, receiver) {
        (Some(SessionOutcome::TransportFailed), _) | (_, Some(SessionOutcome::TransportFailed)) => {
            SessionOutcome::TransportFailed
        }
        (Some(SessionOutcome::LocalExit), _) => SessionOutcome::LocalExit,
        (_, Some(cause)) => cause,
        (Some(cause), None) => cause,
        (None, None) => SessionOutcome::PeerDisconnected,
    }
}

struct SenderStopped<W> {
    writer: FrameWriter<W>,
    cause: Option<SessionOutcome>,
    sent: usize,
}

/// Console → channel. `AwaitInput → Encode → Transmit`, until the sentinel,
/// a transmit failure, or cancellation from the other loop.
async fn sender_loop<W, I>(
    mut writer: FrameWriter<W>,
    mut lines: Lines<I>,
    identity: Identity,
    console: Arc<Console>,
    shutdown: Arc<ShutdownCoordinator>,
) -> SenderStopped<W>
where
    W: AsyncWrite + Unpin,
    I: AsyncBufRead + Unpin,
{
    let _ = console.show_prompt();
    let mut sent = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("sender stopped by cancellation");
                return SenderStopped { writer, cause: None, sent };
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        // Input closed: nothing more can ever be sent, so
                        // end the session and tell the peer.
                        let _ = writer.send(&Frame::Exit).await;
                        shutdown.trigger();
                        return SenderStopped {
                            writer,
                            cause: Some(SessionOutcome::LocalExit),
                            sent,
                        };
                    }
                    Err(e) => {
                        let _ = console.show_notice(&format!("input failed: {e}"));
                        shutdown.trigger();
                        return SenderStopped {
                            writer,
                            cause: Some(SessionOutcome::TransportFailed),
                            sent,
                        };
                    }
                };

                if line == TERMINATION_SENTINEL {
                    if let Err(e) = writer.send(&Frame::Exit).await {
                        let _ = console.show_notice(&format!("send failed: {e}"));
                    }
                    shutdown.trigger();
                    return SenderStopped {
                        writer,
                        cause: Some(SessionOutcome::LocalExit),
                        sent,
                    };
                }

                if line.is_empty() {
                    let _ = console.show_prompt();
                    continue;
                }

                let frame = Frame::message(identity.name(), line);
                if let Err(e) = writer.send(&frame).await {
                    let _ = console.show_notice(&format!("send failed: {e}"));
                    shutdown.trigger();
                    return SenderStopped {
                        writer,
                        cause: Some(SessionOutcome::TransportFailed),
                        sent,
                    };
                }
                sent += 1;
                let _ = console.show_prompt();
            }
        }
    }
}

struct ReceiverStopped {
    cause: Option<SessionOutcome>,
    received: usize,
}

/// Channel → console. `AwaitFrame → Decode → Dispatch`, until the sentinel,
/// end-of-stream, a transport error, or cancellation from the other loop.
/// Malformed frames are logged and skipped.
async fn receiver_loop<R>(
    mut reader: FrameReader<R>,
    console: Arc<Console>,
    shutdown: Arc<ShutdownCoordinator>,
) -> ReceiverStopped
where
    R: AsyncRead + Unpin,
{
    let mut received = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("receiver stopped by cancellation");
                return ReceiverStopped { cause: None, received };
            }
            frame = reader.next_frame() => match frame {
                Ok(Some(payload)) => match Frame::decode(&payload) {
                    Ok(Frame::Exit) => {
                        let _ = console.show_notice("peer ended the chat");
                        shutdown.trigger();
                        return ReceiverStopped {
                            cause: Some(SessionOutcome::PeerExit),
                            received,
                        };
                    }
                    Ok(Frame::Message(message)) => {
                        received += 1;
                        let _ = console.show_incoming(&message);
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(error = %e, "skipping malformed frame");
                    }
                    Err(e) => {
                        let _ = console.show_notice(&format!("receive failed: {e}"));
                        shutdown.trigger();
                        return ReceiverStopped {
                            cause: Some(SessionOutcome::TransportFailed),
                            received,
                        };
                    }
                },
                Ok(None) => {
                    let _ = console.show_notice("peer closed the connection");
                    shutdown.trigger();
                    return ReceiverStopped {
                        cause: Some(SessionOutcome::PeerDisconnected),
                        received,
                    };
                }
                Err(e) => {
                    let _ = console.show_notice(&format!("receive failed: {e}"));
                    shutdown.trigger();
                    return ReceiverStopped {
                        cause: Some(SessionOutcome::TransportFailed),
                        received,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;

    use super::*;

    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture_console(name: &str) -> (Arc<Console>, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let console = Arc::new(Console::with_sink(
            name,
            Box::new(SharedSink(buffer.clone())),
        ));
        (console, buffer)
    }

    fn console_text(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8(buffer.lock().unwrap().clone()).unwrap()
    }

    fn scripted(lines: &str) -> BufReader<Cursor<Vec<u8>>> {
        BufReader::new(Cursor::new(lines.as_bytes().to_vec()))
    }

    /// An input source that never yields a line, simulating a user who is
    /// not typing. The returned guard must stay alive for the duration.
    fn silent_input() -> (BufReader<tokio::io::DuplexStream>, tokio::io::DuplexStream) {
        let (input, guard) = tokio::io::duplex(1);
        (BufReader::new(input), guard)
    }

    #[tokio::test]
    async fn sentinel_stops_both_sides() {
        let (alice_stream, bob_stream) = tokio::io::duplex(1024);
        let (alice_read, alice_write) = tokio::io::split(alice_stream);
        let (bob_read, bob_write) = tokio::io::split(bob_stream);

        let (alice_console, _) = capture_console("alice");
        let (bob_console, bob_buffer) = capture_console("bob");

        // Bob never types: his sender loop stays blocked on input and must
        // be cancelled when his receiver observes the sentinel.
        let (bob_input, _guard) = silent_input();

        let alice = run_pump(
            FrameReader::new(alice_read),
            FrameWriter::new(alice_write),
            scripted("hello\nEXIT\n"),
            Identity::new("alice").unwrap(),
            alice_console,
        );
        let bob = run_pump(
            FrameReader::new(bob_read),
            FrameWriter::new(bob_write),
            bob_input,
            Identity::new("bob").unwrap(),
            bob_console,
        );

        let (alice_report, bob_report) =
            tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(alice, bob) })
                .await
                .expect("both pumps must stop after the sentinel");

        let alice_report = alice_report.unwrap();
        let bob_report = bob_report.unwrap();

        assert_eq!(alice_report.outcome, SessionOutcome::LocalExit);
        assert_eq!(alice_report.messages_sent, 1);
        assert_eq!(bob_report.outcome, SessionOutcome::PeerExit);
        assert_eq!(bob_report.messages_received, 1);

        let bob_out = console_text(&bob_buffer);
        assert!(bob_out.contains("alice: hello"));
        assert!(bob_out.contains("peer ended the chat"));
    }

    #[tokio::test]
    async fn peer_close_without_sentinel_is_reported() {
        let (alice_stream, bob_stream) = tokio::io::duplex(1024);
        let (alice_read, alice_write) = tokio::io::split(alice_stream);
        drop(bob_stream);

        let (console, buffer) = capture_console("alice");
        let (input, _guard) = silent_input();

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            run_pump(
                FrameReader::new(alice_read),
                FrameWriter::new(alice_write),
                input,
                Identity::new("alice").unwrap(),
                console,
            ),
        )
        .await
        .expect("pump must stop when the peer vanishes")
        .unwrap();

        assert_eq!(report.outcome, SessionOutcome::PeerDisconnected);
        assert!(console_text(&buffer).contains("peer closed the connection"));
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped_not_fatal() {
        let (alice_stream, bob_stream) = tokio::io::duplex(1024);
        let (alice_read, alice_write) = tokio::io::split(alice_stream);
        let (_bob_read, mut bob_write) = tokio::io::split(bob_stream);

        let (console, buffer) = capture_console("alice");
        let (input, _guard) = silent_input();

        // Peer sends: an invalid-UTF-8 frame, a valid message, the sentinel.
        let feeder = async move {
            bob_write.write_all(&3u32.to_le_bytes()).await.unwrap();
            bob_write.write_all(&[0xff, 0xfe, 0xff]).await.unwrap();
            for payload in [&b"bob: still here"[..], &b"EXIT"[..]] {
                bob_write
                    .write_all(&(payload.len() as u32).to_le_bytes())
                    .await
                    .unwrap();
                bob_write.write_all(payload).await.unwrap();
            }
            bob_write.flush().await.unwrap();
            bob_write
        };

        let pump = run_pump(
            FrameReader::new(alice_read),
            FrameWriter::new(alice_write),
            input,
            Identity::new("alice").unwrap(),
            console,
        );

        let (report, _bob_write) =
            tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(pump, feeder) })
                .await
                .expect("pump must stop on the sentinel");
        let report = report.unwrap();

        assert_eq!(report.outcome, SessionOutcome::PeerExit);
        assert_eq!(report.messages_received, 1);
        assert!(console_text(&buffer).contains("bob: still here"));
    }

    #[tokio::test]
    async fn stdin_eof_acts_as_local_exit() {
        let (alice_stream, bob_stream) = tokio::io::duplex(1024);
        let (alice_read, alice_write) = tokio::io::split(alice_stream);
        let (bob_read, bob_write) = tokio::io::split(bob_stream);

        let (alice_console, _) = capture_console("alice");
        let (bob_console, _) = capture_console("bob");
        let (bob_input, _guard) = silent_input();

        let alice = run_pump(
            FrameReader::new(alice_read),
            FrameWriter::new(alice_write),
            scripted(""),
            Identity::new("alice").unwrap(),
            alice_console,
        );
        let bob = run_pump(
            FrameReader::new(bob_read),
            FrameWriter::new(bob_write),
            bob_input,
            Identity::new("bob").unwrap(),
            bob_console,
        );

        let (alice_report, bob_report) =
            tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(alice, bob) })
                .await
                .expect("EOF on input must end both sessions");

        assert_eq!(alice_report.unwrap().outcome, SessionOutcome::LocalExit);
        assert_eq!(bob_report.unwrap().outcome, SessionOutcome::PeerExit);
    }

    #[tokio::test]
    async fn empty_lines_are_not_transmitted() {
        let (alice_stream, bob_stream) = tokio::io::duplex(1024);
        let (alice_read, alice_write) = tokio::io::split(alice_stream);
        let (bob_read, bob_write) = tokio::io::split(bob_stream);

        let (alice_console, _) = capture_console("alice");
        let (bob_console, _) = capture_console("bob");
        let (bob_input, _guard) = silent_input();

        let alice = run_pump(
            FrameReader::new(alice_read),
            FrameWriter::new(alice_write),
            scripted("\n\nping\nEXIT\n"),
            Identity::new("alice").unwrap(),
            alice_console,
        );
        let bob = run_pump(
            FrameReader::new(bob_read),
            FrameWriter::new(bob_write),
            bob_input,
            Identity::new("bob").unwrap(),
            bob_console,
        );

        let (alice_report, bob_report) =
            tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(alice, bob) })
                .await
                .unwrap();

        assert_eq!(alice_report.unwrap().messages_sent, 1);
        assert_eq!(bob_report.unwrap().messages_received, 1);
    }

    #[test]
    fn outcome_resolution_prefers_failures() {
        use SessionOutcome::*;

        assert_eq!(
            resolve_outcome(Some(LocalExit), Some(TransportFailed)),
            TransportFailed
        );
        assert_eq!(resolve_outcome(Some(LocalExit), Some(PeerExit)), LocalExit);
        assert_eq!(resolve_outcome(None, Some(PeerExit)), PeerExit);
        assert_eq!(resolve_outcome(Some(LocalExit), None), LocalExit);
    }
}
