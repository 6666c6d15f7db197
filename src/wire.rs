//! Minimal client for the textual key-value-store wire protocol.
//!
//! Requests are arrays of bulk strings (`*<argc>`, then `$<len>` + bytes per
//! argument); replies are decoded by their single-byte type prefix. The
//! protocol is binary-safe: lengths are declared up front and payload bytes
//! are never interpreted.
//!
//! The client holds one persistent TCP stream, connected lazily on the first
//! command and reused afterwards. Every failure surfaces as a
//! [`TransportError`]; nothing is swallowed here. The cache repository is the
//! layer that decides what a failure means.
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use crate::cache::RemoteStore;
use crate::config::ConnectionConfig;
use crate::error::TransportError;

/// A decoded server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+` simple string.
    Simple(String),
    /// `:` integer.
    Integer(i64),
    /// `$` bulk string; `None` is the null bulk string.
    Bulk(Option<Vec<u8>>),
    /// `*` array; a negative count decodes as an empty list.
    Array(Vec<Reply>),
}

/// Blocking wire-protocol client over a single TCP stream.
pub struct RespClient {
    config: ConnectionConfig,
    stream: Option<BufReader<TcpStream>>,
}

impl RespClient {
    /// Create a client. No connection is made until the first command.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    /// Send one command and decode its reply.
    pub fn command(&mut self, args: &[&[u8]]) -> Result<Reply, TransportError> {
        let result = self.exchange(args);
        if result.is_err() {
            // A failed exchange leaves the stream in an unknown state.
            self.stream = None;
        }
        result
    }

    fn exchange(&mut self, args: &[&[u8]]) -> Result<Reply, TransportError> {
        self.ensure_connected()?;
        let stream = self
            .stream
            .as_mut()
            .expect("ensure_connected leaves an open stream");
        send(stream.get_mut(), args)?;
        read_reply(stream)
    }

    fn ensure_connected(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let address = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                TransportError::Protocol(format!(
                    "no address for {}:{}",
                    self.config.host, self.config.port
                ))
            })?;
        let stream = TcpStream::connect_timeout(&address, self.config.timeout)?;
        stream.set_read_timeout(Some(self.config.timeout))?;
        stream.set_write_timeout(Some(self.config.timeout))?;
        let mut stream = BufReader::new(stream);

        if let Some(password) = &self.config.password {
            send(stream.get_mut(), &[b"AUTH", password.as_bytes()])?;
            read_reply(&mut stream)?;
        }
        if self.config.database != 0 {
            let database = self.config.database.to_string();
            send(stream.get_mut(), &[b"SELECT", database.as_bytes()])?;
            read_reply(&mut stream)?;
        }

        log::debug!(target: "flagcache",
            host = self.config.host.as_str(),
            port = self.config.port;
            "connected to remote store");
        self.stream = Some(stream);
        Ok(())
    }
}

fn send<W: Write>(stream: &mut W, args: &[&[u8]]) -> Result<(), TransportError> {
    let mut request = Vec::with_capacity(64);
    request.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        request.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        request.extend_from_slice(arg);
        request.extend_from_slice(b"\r\n");
    }
    stream.write_all(&request)?;
    stream.flush()?;
    Ok(())
}

fn read_reply<R: BufRead>(reader: &mut R) -> Result<Reply, TransportError> {
    let line = read_line(reader)?;
    let Some((prefix, rest)) = split_first_char(&line) else {
        return Err(TransportError::Protocol("empty reply line".to_owned()));
    };
    match prefix {
        '+' => Ok(Reply::Simple(rest.to_owned())),
        '-' => Err(TransportError::ErrorReply(rest.to_owned())),
        ':' => {
            let value = rest
                .parse()
                .map_err(|_| TransportError::Protocol(format!("bad integer reply: {rest:?}")))?;
            Ok(Reply::Integer(value))
        }
        '$' => {
            let length: i64 = rest
                .parse()
                .map_err(|_| TransportError::Protocol(format!("bad bulk length: {rest:?}")))?;
            if length < 0 {
                return Ok(Reply::Bulk(None));
            }
            // read_exact loops until the full declared length (plus trailing
            // CRLF) is consumed; partial reads from the stream are expected.
            let mut body = vec![0u8; length as usize + 2];
            reader.read_exact(&mut body)?;
            if !body.ends_with(b"\r\n") {
                return Err(TransportError::Protocol(
                    "bulk string missing terminator".to_owned(),
                ));
            }
            body.truncate(length as usize);
            Ok(Reply::Bulk(Some(body)))
        }
        '*' => {
            let count: i64 = rest
                .parse()
                .map_err(|_| TransportError::Protocol(format!("bad array count: {rest:?}")))?;
            let mut items = Vec::new();
            for _ in 0..count.max(0) {
                items.push(read_reply(reader)?);
            }
            Ok(Reply::Array(items))
        }
        other => Err(TransportError::Protocol(format!(
            "unknown reply prefix {other:?}"
        ))),
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<String, TransportError> {
    let mut line = Vec::new();
    let read = reader.read_until(b'\n', &mut line)?;
    if read == 0 || !line.ends_with(b"\r\n") {
        return Err(TransportError::Protocol("truncated reply line".to_owned()));
    }
    line.truncate(line.len() - 2);
    String::from_utf8(line)
        .map_err(|_| TransportError::Protocol("non-utf8 reply line".to_owned()))
}

fn split_first_char(line: &str) -> Option<(char, &str)> {
    let mut chars = line.chars();
    let first = chars.next()?;
    Some((first, chars.as_str()))
}

impl RemoteStore for RespClient {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, TransportError> {
        match self.command(&[b"GET", key.as_bytes()])? {
            Reply::Bulk(body) => Ok(body),
            _ => Err(TransportError::UnexpectedReply { command: "GET" }),
        }
    }

    fn set_ex(&mut self, key: &str, ttl_seconds: u64, value: &[u8]) -> Result<(), TransportError> {
        let ttl = ttl_seconds.to_string();
        self.command(&[b"SETEX", key.as_bytes(), ttl.as_bytes(), value])?;
        Ok(())
    }

    fn del(&mut self, keys: &[String]) -> Result<(), TransportError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"DEL");
        args.extend(keys.iter().map(|key| key.as_bytes()));
        self.command(&args)?;
        Ok(())
    }

    fn sadd(&mut self, key: &str, member: &str) -> Result<(), TransportError> {
        self.command(&[b"SADD", key.as_bytes(), member.as_bytes()])?;
        Ok(())
    }

    fn smembers(&mut self, key: &str) -> Result<Vec<String>, TransportError> {
        match self.command(&[b"SMEMBERS", key.as_bytes()])? {
            Reply::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Reply::Bulk(Some(bytes)) => String::from_utf8(bytes).map_err(|_| {
                        TransportError::Protocol("non-utf8 set member".to_owned())
                    }),
                    _ => Err(TransportError::UnexpectedReply { command: "SMEMBERS" }),
                })
                .collect(),
            _ => Err(TransportError::UnexpectedReply { command: "SMEMBERS" }),
        }
    }

    fn expire(&mut self, key: &str, ttl_seconds: u64) -> Result<(), TransportError> {
        let ttl = ttl_seconds.to_string();
        self.command(&[b"EXPIRE", key.as_bytes(), ttl.as_bytes()])?;
        Ok(())
    }

    fn publish(&mut self, channel: &str, message: &[u8]) -> Result<(), TransportError> {
        self.command(&[b"PUBLISH", channel.as_bytes(), message])?;
        Ok(())
    }
}
