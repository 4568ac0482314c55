//! In-process S7 controller simulator
//!
//! Speaks just enough ISO-on-TCP to serve one data block: COTP connect,
//! setup communication, single-item Read Var and Write Var (byte and bit).

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

struct Shared {
    db: u16,
    memory: Mutex<Vec<u8>>,
    pdu_size: u16,
    remote_tsap: u8,
    generation: AtomicU64,
    connections: AtomicUsize,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

pub struct S7Simulator {
    addr: SocketAddr,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl S7Simulator {
    /// Serve data block `db` of `size` bytes for rack 0 / slot 1
    pub async fn start(db: u16, size: usize, pdu_size: u16) -> Self {
        Self::start_with_slot(db, size, pdu_size, 1).await
    }

    pub async fn start_with_slot(db: u16, size: usize, pdu_size: u16, slot: u8) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared {
            db,
            memory: Mutex::new(vec![0u8; size]),
            pdu_size,
            remote_tsap: slot,
            generation: AtomicU64::new(0),
            connections: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        });

        let accept_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let shared = Arc::clone(&accept_shared);
                tokio::spawn(async move {
                    let _ = serve(stream, shared).await;
                });
            }
        });

        Self { addr, shared, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn set_bytes(&self, start: usize, data: &[u8]) {
        self.shared.memory.lock()[start..start + data.len()].copy_from_slice(data);
    }

    pub fn bytes(&self, start: usize, len: usize) -> Vec<u8> {
        self.shared.memory.lock()[start..start + len].to_vec()
    }

    pub fn bit(&self, byte: usize, bit: u8) -> bool {
        self.shared.memory.lock()[byte] & (1 << bit) != 0
    }

    /// Close every open session on its next request
    pub fn drop_connections(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Sessions that completed the COTP handshake
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn read_requests(&self) -> usize {
        self.shared.reads.load(Ordering::SeqCst)
    }

    pub fn write_requests(&self) -> usize {
        self.shared.writes.load(Ordering::SeqCst)
    }
}

impl Drop for S7Simulator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn tpkt(payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x03, 0x00];
    frame.extend_from_slice(&((payload.len() + 4) as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn ack_data(pdu_ref: [u8; 2], params: &[u8], data: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x02, 0xF0, 0x80, 0x32, 0x03, 0x00, 0x00, pdu_ref[0], pdu_ref[1]];
    payload.extend_from_slice(&(params.len() as u16).to_be_bytes());
    payload.extend_from_slice(&(data.len() as u16).to_be_bytes());
    payload.extend_from_slice(&[0x00, 0x00]);
    payload.extend_from_slice(params);
    payload.extend_from_slice(data);
    tpkt(&payload)
}

struct Item {
    transport_size: u8,
    count: usize,
    db: u16,
    byte: usize,
    bit: u8,
}

fn parse_item(params: &[u8]) -> Item {
    let item = &params[2..14];
    let address = (usize::from(item[9]) << 16) | (usize::from(item[10]) << 8) | usize::from(item[11]);
    Item {
        transport_size: item[3],
        count: usize::from(u16::from_be_bytes([item[4], item[5]])),
        db: u16::from_be_bytes([item[6], item[7]]),
        byte: address >> 3,
        bit: (address & 0x07) as u8,
    }
}

async fn serve(mut stream: TcpStream, shared: Arc<Shared>) -> std::io::Result<()> {
    let generation = shared.generation.load(Ordering::SeqCst);

    loop {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await?;
        if shared.generation.load(Ordering::SeqCst) != generation {
            return Ok(());
        }
        let len = usize::from(u16::from_be_bytes([header[2], header[3]])) - 4;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await?;

        let reply = match payload[1] {
            0xE0 => {
                // Destination TSAP is the last parameter of the request
                let tsap = payload[payload.len() - 1];
                if tsap != shared.remote_tsap {
                    return Ok(());
                }
                shared.connections.fetch_add(1, Ordering::SeqCst);
                tpkt(&[
                    0x11, 0xD0, 0x00, 0x01, 0x00, 0x01, 0x00, 0xC0, 0x01, 0x0A, 0xC1, 0x02, 0x01,
                    0x00, 0xC2, 0x02, 0x03, tsap,
                ])
            },
            0xF0 => handle_job(&payload[3..], &shared),
            _ => return Ok(()),
        };
        stream.write_all(&reply).await?;
    }
}

fn handle_job(s7: &[u8], shared: &Shared) -> Vec<u8> {
    let pdu_ref = [s7[4], s7[5]];
    let param_len = usize::from(u16::from_be_bytes([s7[6], s7[7]]));
    let params = &s7[10..10 + param_len];
    let data = &s7[10 + param_len..];

    match params[0] {
        0xF0 => {
            let pdu = shared.pdu_size.to_be_bytes();
            ack_data(pdu_ref, &[0xF0, 0x00, 0x00, 0x01, 0x00, 0x01, pdu[0], pdu[1]], &[])
        },
        0x04 => {
            shared.reads.fetch_add(1, Ordering::SeqCst);
            let item = parse_item(params);
            let memory = shared.memory.lock();
            if item.db != shared.db || item.byte + item.count > memory.len() {
                return ack_data(pdu_ref, &[0x04, 0x01], &[0x05, 0x00, 0x00, 0x00]);
            }
            let mut reply = vec![0xFF, 0x04];
            reply.extend_from_slice(&((item.count * 8) as u16).to_be_bytes());
            reply.extend_from_slice(&memory[item.byte..item.byte + item.count]);
            ack_data(pdu_ref, &[0x04, 0x01], &reply)
        },
        0x05 => {
            shared.writes.fetch_add(1, Ordering::SeqCst);
            let item = parse_item(params);
            let mut memory = shared.memory.lock();
            let payload = &data[4..];
            let code = if item.db != shared.db || item.byte + payload.len() > memory.len() {
                0x05
            } else if item.transport_size == 0x01 {
                if payload[0] != 0 {
                    memory[item.byte] |= 1 << item.bit;
                } else {
                    memory[item.byte] &= !(1 << item.bit);
                }
                0xFF
            } else {
                memory[item.byte..item.byte + payload.len()].copy_from_slice(payload);
                0xFF
            };
            ack_data(pdu_ref, &[0x05, 0x01], &[code])
        },
        _ => ack_data(pdu_ref, &[params[0], 0x00], &[0x0A]),
    }
}
