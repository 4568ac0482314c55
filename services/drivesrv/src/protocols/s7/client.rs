//! S7 client over tokio `TcpStream`

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::constants::{
    ISO_TCP_PORT, MIN_PDU_SIZE, READ_RESPONSE_OVERHEAD, REQUESTED_PDU_SIZE, TPKT_HEADER_LEN,
    WRITE_REQUEST_OVERHEAD,
};
use super::frame::{self, ItemAddress};
use crate::error::{DriveSrvError, Result};
use crate::protocols::transport::PlcTransport;

/// Connection parameters for one controller
#[derive(Debug, Clone)]
pub struct S7Config {
    pub host: String,
    pub port: u16,
    pub rack: u8,
    pub slot: u8,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl Default for S7Config {
    fn default() -> Self {
        Self {
            host: "192.168.0.1".to_string(),
            port: ISO_TCP_PORT,
            rack: 0,
            slot: 1,
            connect_timeout: Duration::from_millis(3000),
            io_timeout: Duration::from_millis(2000),
        }
    }
}

/// S7 session: COTP connect, setup communication, then Read/Write Var jobs
pub struct S7Client {
    config: S7Config,
    stream: Option<TcpStream>,
    pdu_size: u16,
    pdu_ref: u16,
}

impl std::fmt::Debug for S7Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S7Client")
            .field("endpoint", &self.endpoint())
            .field("connected", &self.stream.is_some())
            .field("pdu_size", &self.pdu_size)
            .finish()
    }
}

impl S7Client {
    pub fn new(config: S7Config) -> Self {
        Self {
            config,
            stream: None,
            pdu_size: REQUESTED_PDU_SIZE,
            pdu_ref: 0,
        }
    }

    /// PDU size agreed with the controller during setup
    pub fn pdu_size(&self) -> u16 {
        self.pdu_size
    }

    fn next_ref(&mut self) -> u16 {
        self.pdu_ref = self.pdu_ref.wrapping_add(1);
        self.pdu_ref
    }

    fn max_read_chunk(&self) -> usize {
        usize::from(self.pdu_size) - READ_RESPONSE_OVERHEAD
    }

    fn max_write_chunk(&self) -> usize {
        usize::from(self.pdu_size) - WRITE_REQUEST_OVERHEAD
    }

    /// Send one TPKT frame and return the payload of the reply TPKT
    async fn exchange(&mut self, request: Bytes) -> Result<Vec<u8>> {
        let io_timeout = self.config.io_timeout;
        let stream = self.stream.as_mut().ok_or(DriveSrvError::NotConnected)?;

        match timeout(io_timeout, stream.write_all(&request)).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => return Err(DriveSrvError::transport(format!("send failed: {e}"))),
            Err(_) => return Err(DriveSrvError::transport("send timed out")),
        }

        let mut header = [0u8; TPKT_HEADER_LEN];
        match timeout(io_timeout, stream.read_exact(&mut header)).await {
            Ok(Ok(_)) => {},
            Ok(Err(e)) => {
                return Err(DriveSrvError::transport(format!("header read failed: {e}")))
            },
            Err(_) => return Err(DriveSrvError::transport("header read timed out")),
        }

        let payload_len = frame::parse_tpkt_header(&header)?;
        let mut payload = vec![0u8; payload_len];
        match timeout(io_timeout, stream.read_exact(&mut payload)).await {
            Ok(Ok(_)) => Ok(payload),
            Ok(Err(e)) => Err(DriveSrvError::transport(format!("body read failed: {e}"))),
            Err(_) => Err(DriveSrvError::transport("body read timed out")),
        }
    }

    /// Run one S7 job and return the validated ack-data
    async fn job(&mut self, build: impl FnOnce(u16) -> Result<Bytes>) -> Result<frame::AckData> {
        let pdu_ref = self.next_ref();
        let request = build(pdu_ref)?;
        let payload = self.exchange(request).await?;
        let ack = frame::parse_ack_data(frame::cotp_data(&payload)?)?;
        if ack.pdu_ref != pdu_ref {
            return Err(DriveSrvError::protocol(format!(
                "reply reference {} does not match request {}",
                ack.pdu_ref, pdu_ref
            )));
        }
        Ok(ack)
    }

    async fn handshake(&mut self) -> Result<()> {
        let reply = self
            .exchange(frame::connection_request(self.config.rack, self.config.slot))
            .await?;
        frame::parse_connection_confirm(&reply)?;

        let ack = self
            .job(|pdu_ref| Ok(frame::setup_communication(pdu_ref, REQUESTED_PDU_SIZE)))
            .await?;
        let negotiated = frame::parse_setup_response(&ack)?;
        if negotiated < MIN_PDU_SIZE {
            return Err(DriveSrvError::protocol(format!(
                "negotiated PDU size {negotiated} below minimum {MIN_PDU_SIZE}"
            )));
        }
        self.pdu_size = negotiated.min(REQUESTED_PDU_SIZE);
        Ok(())
    }
}

#[async_trait]
impl PlcTransport for S7Client {
    async fn open(&mut self) -> Result<()> {
        self.close().await;

        let addr = format!("{}:{}", self.config.host, self.config.port);
        debug!("S7 connecting: {}", addr);
        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(&addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(DriveSrvError::transport(format!(
                    "connect to {addr} failed: {e}"
                )))
            },
            Err(_) => {
                return Err(DriveSrvError::transport(format!(
                    "connect to {addr} timed out"
                )))
            },
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY: {}", e);
        }
        self.stream = Some(stream);

        if let Err(e) = self.handshake().await {
            warn!("S7 handshake with {} failed: {}", addr, e);
            self.stream = None;
            return Err(e);
        }

        info!(
            "S7 connected: {} rack={} slot={} pdu={}",
            addr, self.config.rack, self.config.slot, self.pdu_size
        );
        Ok(())
    }

    async fn read_bytes(&mut self, db: u16, start: usize, len: usize) -> Result<Vec<u8>> {
        let chunk = self.max_read_chunk();
        let mut out = Vec::with_capacity(len);

        while out.len() < len {
            let offset = start + out.len();
            let size = chunk.min(len - out.len());
            let ack = self
                .job(|pdu_ref| frame::read_var(pdu_ref, ItemAddress::bytes(db, offset, size as u16)))
                .await?;
            out.extend_from_slice(&frame::parse_read_response(&ack, size)?);
        }

        debug!("S7 read DB{}.{} {}B", db, start, len);
        Ok(out)
    }

    async fn write_bit(&mut self, db: u16, byte: usize, bit: u8, value: bool) -> Result<()> {
        let ack = self
            .job(|pdu_ref| frame::write_var(pdu_ref, ItemAddress::bit(db, byte, bit), &[u8::from(value)]))
            .await?;
        frame::parse_write_response(&ack)?;
        debug!("S7 write DB{}.DBX{}.{} = {}", db, byte, bit, value);
        Ok(())
    }

    async fn write_bytes(&mut self, db: u16, start: usize, data: &[u8]) -> Result<()> {
        let chunk = self.max_write_chunk();
        for (index, part) in data.chunks(chunk).enumerate() {
            let offset = start + index * chunk;
            let ack = self
                .job(|pdu_ref| {
                    frame::write_var(pdu_ref, ItemAddress::bytes(db, offset, part.len() as u16), part)
                })
                .await?;
            frame::parse_write_response(&ack)?;
        }
        debug!("S7 write DB{}.{} {}B", db, start, data.len());
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("S7 shutdown: {}", e);
            }
            info!("S7 disconnected: {}", self.endpoint());
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}:{} (rack {}, slot {})",
            self.config.host, self.config.port, self.config.rack, self.config.slot
        )
    }
}
