//! Engine statistics and formatting

use std::fmt;
use std::net::SocketAddr;
use swarm_protocol::ChunkHash;

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Running totals kept by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Datagrams handed to the transport
    pub packets_sent: u64,
    /// Datagrams that decoded successfully
    pub packets_received: u64,
    /// Datagrams dropped as malformed or foreign
    pub packets_invalid: u64,
    /// DATA payload bytes sent, retransmissions included
    pub bytes_uploaded: u64,
    /// DATA payload bytes received, duplicates included
    pub bytes_downloaded: u64,
    /// Units sent again after a timeout or fast retransmit
    pub retransmissions: u64,
    /// GETs refused by admission control
    pub denied_sent: u64,
    /// Uploads dropped because the receiver stopped acking
    pub uploads_abandoned: u64,
    /// Downloads handed to another candidate
    pub downloads_reassigned: u64,
    /// Chunks fully received
    pub chunks_received: u64,
}

/// Snapshot of one upload session
#[derive(Debug, Clone)]
pub struct UploadStats {
    /// Receiving peer
    pub peer: SocketAddr,
    /// Chunk being uploaded
    pub hash: ChunkHash,
    /// Cumulative ack
    pub ack: u32,
    /// Units in the chunk
    pub total_units: u32,
    /// Congestion window
    pub cwnd: f64,
    /// Slow start threshold
    pub ssthresh: u32,
}

/// Snapshot of the whole engine
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Active uploads
    pub uploads: Vec<UploadStats>,
    /// Active downloads
    pub downloads: usize,
    /// Fetched and total targets of the active DOWNLOAD run
    pub download_progress: Option<(usize, usize)>,
    /// Running totals
    pub counters: Counters,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "up {}", self.uploads.len())?;
        for upload in &self.uploads {
            write!(
                f,
                " [{} {}/{} cwnd {:.1} ssthresh {}]",
                upload.peer, upload.ack, upload.total_units, upload.cwnd, upload.ssthresh
            )?;
        }
        write!(f, " | down {}", self.downloads)?;
        if let Some((done, total)) = self.download_progress {
            write!(f, " ({}/{} chunks)", done, total)?;
        }
        write!(
            f,
            " | sent {} recv {} rtx {}",
            format_bytes(self.counters.bytes_uploaded),
            format_bytes(self.counters.bytes_downloaded),
            self.counters.retransmissions
        )
    }
}
