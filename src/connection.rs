// src/connection.rs

//! A small asynchronous request/reply connection used for sentinel probes,
//! master verification, pooled command traffic, and subscription reads.

use crate::errors::SentinelPoolError;
use crate::protocol::{MasterAddr, RespFrame, RespFrameCodec, decode};
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};

pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// One TCP connection speaking the RESP protocol.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    codec: RespFrameCodec,
    read_buf: BytesMut,
}

impl Connection {
    /// Connects with the default connect timeout.
    pub async fn connect(addr: &str) -> Result<Self, SentinelPoolError> {
        Self::connect_with_timeout(addr, CONNECT_TIMEOUT).await
    }

    /// Connects with a caller-supplied timeout; used by the latency probes
    /// in sentinel discovery.
    pub async fn connect_with_timeout(
        addr: &str,
        limit: Duration,
    ) -> Result<Self, SentinelPoolError> {
        let stream = tokio::time::timeout(limit, TcpStream::connect(addr)).await??;
        Ok(Self {
            stream,
            codec: RespFrameCodec,
            read_buf: BytesMut::with_capacity(4096),
        })
    }

    /// Sends one command and waits for a single reply frame.
    pub async fn execute(&mut self, args: &[&str]) -> Result<RespFrame, SentinelPoolError> {
        let mut out = BytesMut::new();
        self.codec.encode(RespFrame::command(args), &mut out)?;
        self.stream.write_all(&out).await?;
        tokio::time::timeout(READ_TIMEOUT, self.next_frame()).await?
    }

    /// Reads the next frame without sending anything. Used by subscriber
    /// connections that receive server pushes; blocks without an independent
    /// timeout.
    pub async fn next_frame(&mut self) -> Result<RespFrame, SentinelPoolError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.read_buf)? {
                return Ok(frame);
            }
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(SentinelPoolError::ConnectionClosed);
            }
        }
    }

    /// Issues `ROLE` and returns the reported role name.
    pub async fn role(&mut self) -> Result<String, SentinelPoolError> {
        let reply = self.execute(&["ROLE"]).await?;
        decode::role_name(&reply)
    }

    /// Asks a sentinel for its peer list for the given master name.
    pub async fn sentinel_peers(
        &mut self,
        master_name: &str,
    ) -> Result<Vec<String>, SentinelPoolError> {
        let reply = self
            .execute(&["SENTINEL", "sentinels", master_name])
            .await?;
        decode::peer_addresses(&reply)
    }

    /// Asks a sentinel for the current master address for the given name.
    pub async fn master_addr_by_name(
        &mut self,
        master_name: &str,
    ) -> Result<MasterAddr, SentinelPoolError> {
        let reply = self
            .execute(&["SENTINEL", "get-master-addr-by-name", master_name])
            .await?;
        MasterAddr::decode(&reply)
    }
}
