#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use msdk_remote::{Client, ClientConfig, Frame, VideoDecoder};

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Three loopback listeners standing in for the gateway app.
pub struct FakeGateway {
    pub video: TcpListener,
    pub control: TcpListener,
    pub query: TcpListener,
}

impl FakeGateway {
    pub fn bind() -> Result<Self> {
        Ok(Self {
            video: TcpListener::bind("127.0.0.1:0")?,
            control: TcpListener::bind("127.0.0.1:0")?,
            query: TcpListener::bind("127.0.0.1:0")?,
        })
    }

    pub fn config(&self) -> Result<ClientConfig> {
        let mut cfg = ClientConfig::new("127.0.0.1");
        cfg.video_port = self.video.local_addr()?.port();
        cfg.control_port = self.control.local_addr()?.port();
        cfg.query_port = self.query.local_addr()?.port();
        cfg.connect_timeout = IO_TIMEOUT;
        Ok(cfg)
    }

    /// Connects a client with `ScriptedDecoder` and accepts its three sockets.
    pub fn connect(&self) -> Result<(Client, Peers)> {
        let client = Client::connect_with_decoder(&self.config()?, Box::new(ScriptedDecoder))?;
        let peers = self.accept()?;
        Ok((client, peers))
    }

    pub fn accept(&self) -> Result<Peers> {
        Ok(Peers {
            video: accept(&self.video)?,
            control: Peer::new(accept(&self.control)?)?,
            query: Peer::new(accept(&self.query)?)?,
        })
    }
}

fn accept(listener: &TcpListener) -> Result<TcpStream> {
    let (stream, _) = listener.accept()?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    Ok(stream)
}

/// Gateway side of a connected client.
pub struct Peers {
    pub video: TcpStream,
    pub control: Peer,
    pub query: Peer,
}

/// Gateway side of one text channel.
pub struct Peer {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Peer {
    fn new(stream: TcpStream) -> Result<Self> {
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        })
    }

    /// Next command the client sent, without its terminator.
    pub fn recv(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            return Err(anyhow!("client closed the connection"));
        }
        line.strip_suffix("\r\n")
            .map(str::to_string)
            .ok_or_else(|| anyhow!("command not terminated by CRLF: {line:?}"))
    }

    /// True if the client sends nothing within `wait`.
    pub fn is_quiet(&mut self, wait: Duration) -> Result<bool> {
        self.writer.set_read_timeout(Some(wait))?;
        let quiet = match self.reader.fill_buf() {
            Ok(buf) => buf.is_empty(),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                true
            }
            Err(e) => return Err(e.into()),
        };
        self.writer.set_read_timeout(Some(IO_TIMEOUT))?;
        Ok(quiet)
    }

    pub fn send(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\r\n")?;
        Ok(())
    }

    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        Ok(())
    }

    pub fn close(self) {
        let _ = self.writer.shutdown(std::net::Shutdown::Both);
    }
}

/// True once the client has closed `stream` (EOF on the gateway side).
pub fn sees_eof(stream: &mut TcpStream) -> Result<bool> {
    let mut buf = [0u8; 64];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return Ok(true),
            Ok(_) => continue,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => return Ok(true),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Test decoder: every byte is one 1x1 frame whose pixel is that byte.
/// `0xFF` is rejected as a decode error.
pub struct ScriptedDecoder;

pub const BAD_BYTE: u8 = 0xFF;

impl VideoDecoder for ScriptedDecoder {
    fn decode(&mut self, chunk: &[u8], sink: &mut dyn FnMut(Frame)) -> msdk_remote::Result<()> {
        for &byte in chunk {
            if byte == BAD_BYTE {
                return Err(msdk_remote::Error::Decoder("corrupt access unit".into()));
            }
            if let Some(frame) = Frame::from_bgr(1, 1, vec![byte; 3]) {
                sink(frame);
            }
        }
        Ok(())
    }
}

/// Polls `check` until it holds or `IO_TIMEOUT` passes.
pub fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + IO_TIMEOUT;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}
