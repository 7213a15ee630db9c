// dispatch-net::codec — framing for the TCP transport.
//
// Wire format: [u32 big-endian length][bincode Frame]
// The handshake that opens every connection is a bare u32 big-endian rank.

use std::io;

use dispatch_types::{Rank, Tag};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// ── Frame ─────────────────────────────────────────────────────────────────────

/// One tagged message on a rank-to-rank stream. The source is implied by the
/// connection's handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub tag: Tag,
    pub payload: Vec<u8>,
}

pub fn encode_frame(frame: &Frame) -> io::Result<Vec<u8>> {
    bincode::serde::encode_to_vec(frame, bincode::config::standard())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

pub fn decode_frame(data: &[u8]) -> io::Result<Frame> {
    let (frame, _) = bincode::serde::decode_from_slice(data, bincode::config::standard())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    Ok(frame)
}

/// Read and decode one frame.
pub async fn read_frame<T>(io: &mut T, max_bytes: usize) -> io::Result<Frame>
where
    T: AsyncRead + Unpin + Send,
{
    let buf = read_length_prefixed(io, max_bytes).await?;
    decode_frame(&buf)
}

/// Write an already-encoded frame.
pub async fn write_frame<T>(io: &mut T, encoded: &[u8]) -> io::Result<()>
where
    T: AsyncWrite + Unpin + Send,
{
    write_length_prefixed(io, encoded).await
}

// ── Handshake ─────────────────────────────────────────────────────────────────

pub async fn write_handshake<T>(io: &mut T, rank: Rank) -> io::Result<()>
where
    T: AsyncWrite + Unpin + Send,
{
    let rank = u32::try_from(rank).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("rank {rank} exceeds u32"))
    })?;
    io.write_all(&rank.to_be_bytes()).await?;
    io.flush().await
}

pub async fn read_handshake<T>(io: &mut T) -> io::Result<Rank>
where
    T: AsyncRead + Unpin + Send,
{
    let mut buf = [0u8; 4];
    io.read_exact(&mut buf).await?;
    Ok(u32::from_be_bytes(buf) as Rank)
}

// ── Wire Helpers ──────────────────────────────────────────────────────────────

/// Read a `[u32 BE length][payload]` frame.
///
/// End of stream before the first prefix byte is `UnexpectedEof` (a clean
/// close); end of stream anywhere inside a frame is `InvalidData`.
async fn read_length_prefixed<T>(io: &mut T, max_bytes: usize) -> io::Result<Vec<u8>>
where
    T: AsyncRead + Unpin + Send,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = io.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                io::ErrorKind::UnexpectedEof.into()
            } else {
                cut_short(filled, len_buf.len())
            });
        }
        filled += n;
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_bytes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes (max {max_bytes})"),
        ));
    }
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("stream closed inside a {len}-byte frame"),
            )
        } else {
            e
        }
    })?;
    Ok(buf)
}

fn cut_short(got: usize, want: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("stream closed after {got} of {want} length-prefix bytes"),
    )
}

/// Write a `[u32 BE length][payload]` frame.
async fn write_length_prefixed<T>(io: &mut T, data: &[u8]) -> io::Result<()>
where
    T: AsyncWrite + Unpin + Send,
{
    let len = u32::try_from(data.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("payload exceeds u32::MAX: {} bytes", data.len()),
        )
    })?;
    io.write_all(&len.to_be_bytes()).await?;
    io.write_all(data).await?;
    io.flush().await?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
