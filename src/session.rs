use std::io::{Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::SessionError;
use crate::protocol::{read_frame, write_frame};
use crate::query::{Query, QueryEngine, unknown_query_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    PeerClosed,
    ExitRequested,
}

pub struct Session<'a, S> {
    stream: S,
    engine: &'a QueryEngine,
    max_request_len: usize,
}

impl<'a, S: Read + Write> Session<'a, S> {
    pub fn new(stream: S, engine: &'a QueryEngine, max_request_len: usize) -> Self {
        Self {
            stream,
            engine,
            max_request_len,
        }
    }

    pub fn run(mut self) -> Result<SessionEnd, SessionError> {
        loop {
            let message = match read_frame(&mut self.stream, self.max_request_len) {
                Ok(Some(message)) => message,
                Ok(None) => return Ok(SessionEnd::PeerClosed),
                Err(e) if e.is_recoverable() => {
                    log::warn!("Rejected message: {e}");
                    write_frame(&mut self.stream, &format!("Error: {e}"))?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            log::info!("Message from client: {message:?}");
            let Some(reply) = self.dispatch(&message) else {
                return Ok(SessionEnd::ExitRequested);
            };
            write_frame(&mut self.stream, &reply)?;
        }
    }

    /// `None` when the message asks to end the session.
    fn dispatch(&self, message: &str) -> Option<String> {
        let reply = match Query::parse(message) {
            Some(Query::Exit) => return None,
            Some(query) => match self.engine.run(query) {
                Ok(result) => result.text,
                Err(e) => {
                    log::error!("{query:?} failed: {e}");
                    format!("Error: {e}")
                }
            },
            None => unknown_query_text(),
        };
        Some(reply)
    }
}

#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    engine: QueryEngine,
    max_request_len: usize,
    stopped: Arc<AtomicBool>,
}

/// Ends a running `Server::serve` loop from another thread.
#[derive(Debug, Clone)]
pub struct Stopper {
    stopped: Arc<AtomicBool>,
    addr: SocketAddr,
}

impl Stopper {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // unblock the pending accept
        if let Err(e) = TcpStream::connect(self.addr) {
            log::warn!("Failed to wake accept loop: {e}");
        }
    }
}

impl Server {
    pub fn bind(
        addr: impl ToSocketAddrs,
        engine: QueryEngine,
        max_request_len: usize,
    ) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            engine,
            max_request_len,
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub fn stopper(&self) -> Result<Stopper, std::io::Error> {
        let mut addr = self.local_addr()?;
        if addr.ip().is_unspecified() {
            match addr {
                SocketAddr::V4(_) => addr.set_ip(Ipv4Addr::LOCALHOST.into()),
                SocketAddr::V6(_) => addr.set_ip(Ipv6Addr::LOCALHOST.into()),
            }
        }
        Ok(Stopper {
            stopped: Arc::clone(&self.stopped),
            addr,
        })
    }

    /// Serves connections one at a time until stopped.
    pub fn serve(&self) {
        loop {
            let accepted = self.listener.accept();
            if self.stopped.load(Ordering::SeqCst) {
                log::info!("Accept loop stopped");
                return;
            }
            match accepted {
                Ok((stream, peer)) => {
                    let result = self.session(&stream, peer);
                    log_session_end(peer, &result);
                }
                Err(e) => log::error!("Failed to accept connection: {e}"),
            }
        }
    }

    /// Accepts and serves exactly one connection.
    pub fn serve_one(&self) -> Result<SessionEnd, SessionError> {
        let (stream, peer) = self.listener.accept()?;
        let result = self.session(&stream, peer);
        log_session_end(peer, &result);
        result
    }

    fn session(&self, stream: &TcpStream, peer: SocketAddr) -> Result<SessionEnd, SessionError> {
        log::info!("Connection from {peer}");
        Session::new(stream, &self.engine, self.max_request_len).run()
    }
}

fn log_session_end(peer: SocketAddr, result: &Result<SessionEnd, SessionError>) {
    match result {
        Ok(SessionEnd::PeerClosed) => log::info!("Client at {peer} has disconnected"),
        Ok(SessionEnd::ExitRequested) => log::info!("Client at {peer} exited"),
        Err(e) => log::error!("Error during communication with {peer}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};
    use std::thread;

    use chrono::Utc;
    use serde_json::json;

    use crate::config::AnalyticsConfig;
    use crate::db::DB;
    use crate::protocol::MAX_RESPONSE_LEN;
    use crate::reading::{DeviceMetadata, SensorReading};

    struct MockStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl MockStream {
        fn new(messages: &[&str]) -> Self {
            let mut input = Vec::new();
            for m in messages {
                write_frame(&mut input, m).unwrap();
            }
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }

        fn replies(&self) -> Vec<String> {
            let mut cursor = Cursor::new(self.output.as_slice());
            let mut replies = Vec::new();
            while let Some(reply) = read_frame(&mut cursor, MAX_RESPONSE_LEN).unwrap() {
                replies.push(reply);
            }
            replies
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn engine() -> QueryEngine {
        let db = DB::open_in_memory().unwrap();
        db.init().unwrap();
        db.insert_device(&DeviceMetadata {
            id: "dishwasher".to_string(),
            name: "Dishwasher".to_string(),
            timezone: "America/Los_Angeles".to_string(),
            unit: "gallons".to_string(),
        })
        .unwrap();
        for gallons in [10.0, 20.0, 30.0] {
            db.insert_reading(&SensorReading {
                device_id: "dishwasher".to_string(),
                timestamp: Utc::now(),
                payload: json!({ "Water Consumption Sensor": gallons }),
            })
            .unwrap();
        }
        QueryEngine::new(db, AnalyticsConfig::default()).unwrap()
    }

    #[test]
    fn test_session_answers_until_peer_closes() {
        let engine = engine();
        let mut stream = MockStream::new(&["2", "what?"]);

        let end = Session::new(&mut stream, &engine, 1024).run().unwrap();
        assert_eq!(end, SessionEnd::PeerClosed);

        let replies = stream.replies();
        assert_eq!(replies.len(), 2);
        assert!(replies[0].contains("20.00 gallons"), "{}", replies[0]);
        assert!(replies[1].starts_with("Sorry, this query cannot be processed"));
    }

    #[test]
    fn test_exit_stops_reading() {
        let engine = engine();
        let mut stream = MockStream::new(&["4", "2"]);

        let end = Session::new(&mut stream, &engine, 1024).run().unwrap();
        assert_eq!(end, SessionEnd::ExitRequested);
        assert!(stream.replies().is_empty());
        // only the exit frame was consumed
        assert_eq!(stream.input.position(), 5);
    }

    #[test]
    fn test_query_error_is_reported_as_text() {
        let db = DB::open_in_memory().unwrap();
        db.init().unwrap();
        let engine = QueryEngine::new(db, AnalyticsConfig::default()).unwrap();
        let mut stream = MockStream::new(&["2"]);

        Session::new(&mut stream, &engine, 1024).run().unwrap();
        assert_eq!(stream.replies(), vec!["Error: Unknown device: dishwasher"]);
    }

    #[test]
    fn test_oversized_request_keeps_session_open() {
        let engine = engine();
        let long = "1".repeat(64);
        let mut stream = MockStream::new(&[long.as_str(), "menu"]);

        let end = Session::new(&mut stream, &engine, 16).run().unwrap();
        assert_eq!(end, SessionEnd::PeerClosed);

        let replies = stream.replies();
        assert_eq!(replies.len(), 2);
        assert!(replies[0].contains("exceeds the limit of 16 bytes"));
        assert!(replies[1].starts_with("Select a query:"));
    }

    #[test]
    fn test_truncated_frame_ends_session_with_error() {
        let engine = engine();
        let mut stream = MockStream::new(&[]);
        stream.input = Cursor::new(vec![0, 0, 0, 9, b'2']);

        let result = Session::new(&mut stream, &engine, 1024).run();
        assert!(matches!(result, Err(SessionError::Frame(_))));
    }

    #[test]
    fn test_server_serves_connections_serially() {
        let server = Server::bind("127.0.0.1:0", engine(), 1024).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let first = server.serve_one();
            let second = server.serve_one();
            let third = server.serve_one();
            (first.ok(), second.is_err(), third.ok())
        });

        // exit token: the server closes without another read
        let mut client = TcpStream::connect(addr).unwrap();
        write_frame(&mut client, "2").unwrap();
        let reply = read_frame(&mut client, MAX_RESPONSE_LEN).unwrap().unwrap();
        assert!(reply.contains("20.00 gallons"), "{reply}");
        write_frame(&mut client, "4").unwrap();
        assert_eq!(read_frame(&mut client, MAX_RESPONSE_LEN).unwrap(), None);

        // disconnect in the middle of a frame
        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(&[0, 0]).unwrap();
        drop(client);

        // a later connection is unaffected
        let mut client = TcpStream::connect(addr).unwrap();
        write_frame(&mut client, "menu").unwrap();
        let reply = read_frame(&mut client, MAX_RESPONSE_LEN).unwrap().unwrap();
        assert!(reply.contains("4. Exit"));
        drop(client);

        let (first, second_failed, third) = handle.join().unwrap();
        assert_eq!(first, Some(SessionEnd::ExitRequested));
        assert!(second_failed);
        assert_eq!(third, Some(SessionEnd::PeerClosed));
    }

    #[test]
    fn test_stopper_ends_serve_loop() {
        let server = Server::bind("0.0.0.0:0", engine(), 1024).unwrap();
        let port = server.local_addr().unwrap().port();
        let stopper = server.stopper().unwrap();
        let handle = thread::spawn(move || server.serve());

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write_frame(&mut client, "menu").unwrap();
        let reply = read_frame(&mut client, MAX_RESPONSE_LEN).unwrap().unwrap();
        assert!(reply.starts_with("Select a query:"));
        drop(client);

        stopper.stop();
        handle.join().unwrap();
    }
}
