use crate::{FrameError, MsgType};

/// Size of the telegram header in bytes.
pub const HEADER_SIZE: usize = 40;
/// Largest payload a telegram may carry.
pub const MAX_DATASET_LEN: u32 = 1432;
/// Largest datagram this core will send or accept, aligned to a common MTU.
pub const MAX_DATAGRAM_SIZE: usize = HEADER_SIZE + MAX_DATASET_LEN as usize;

const CRC_OFFSET: usize = 36;

/// The 40-byte telegram header. Multi-byte fields are big-endian on the wire
/// except `frame_check_sum`, which is little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub sequence_counter: u32,
    pub protocol_version: u16,
    pub msg_type: MsgType,
    pub com_id: u32,
    pub etb_topo_cnt: u32,
    pub op_trn_topo_cnt: u32,
    pub dataset_length: u32,
    pub reserved: u32,
    pub reply_com_id: u32,
    pub reply_ip_address: u32,
    pub frame_check_sum: u32,
}

impl Header {
    /// Stamps a fresh header from an element's current addressing, as
    /// `init()` does in the frame codec: sequence counter and FCS are left
    /// at zero, to be filled in by [`Header::stamp`] before transmit.
    #[inline]
    pub fn init(
        protocol_version: u16,
        msg_type: MsgType,
        com_id: u32,
        etb_topo_cnt: u32,
        op_trn_topo_cnt: u32,
        reply_com_id: u32,
        reply_ip_address: u32,
    ) -> Self {
        Self {
            sequence_counter: 0,
            protocol_version,
            msg_type,
            com_id,
            etb_topo_cnt,
            op_trn_topo_cnt,
            dataset_length: 0,
            reserved: 0,
            reply_com_id,
            reply_ip_address,
            frame_check_sum: 0,
        }
    }

    /// Major version byte; only this half is checked on ingress.
    #[inline]
    pub const fn protocol_major(&self) -> u8 {
        (self.protocol_version >> 8) as u8
    }

    /// Stamps `sequence_counter` and `dataset_length`, then recomputes and
    /// stores the little-endian FCS. Mirrors the frame codec's `update()`:
    /// callers pick which sequence counter to bump (`curSeqCnt` vs
    /// `curSeqCnt4Pull`) based on `msg_type`.
    #[inline]
    pub fn stamp(&mut self, sequence_counter: u32, dataset_length: u32) {
        self.sequence_counter = sequence_counter;
        self.dataset_length = dataset_length;
        self.frame_check_sum = 0;
    }

    /// Encodes the header (and the CRC over it) into the first
    /// [`HEADER_SIZE`] bytes of `out`. `out` must be at least `HEADER_SIZE`
    /// long.
    pub fn encode(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= HEADER_SIZE);
        out[0..4].copy_from_slice(&self.sequence_counter.to_be_bytes());
        out[4..6].copy_from_slice(&self.protocol_version.to_be_bytes());
        out[6..8].copy_from_slice(&self.msg_type.as_u16().to_be_bytes());
        out[8..12].copy_from_slice(&self.com_id.to_be_bytes());
        out[12..16].copy_from_slice(&self.etb_topo_cnt.to_be_bytes());
        out[16..20].copy_from_slice(&self.op_trn_topo_cnt.to_be_bytes());
        out[20..24].copy_from_slice(&self.dataset_length.to_be_bytes());
        out[24..28].copy_from_slice(&self.reserved.to_be_bytes());
        out[28..32].copy_from_slice(&self.reply_com_id.to_be_bytes());
        out[32..36].copy_from_slice(&self.reply_ip_address.to_be_bytes());

        let crc = crc32fast::hash(&out[..CRC_OFFSET]);
        out[CRC_OFFSET..HEADER_SIZE].copy_from_slice(&crc.to_le_bytes());
    }

    /// Parses a header out of `buf` without any size/CRC validation; callers
    /// outside this crate should use [`Header::check`] instead.
    fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < HEADER_SIZE {
            return Err(FrameError::Wire);
        }

        let msg_type_raw = u16::from_be_bytes(buf[6..8].try_into().unwrap());
        let msg_type = MsgType::try_from(msg_type_raw).map_err(|()| FrameError::Wire)?;

        Ok(Self {
            sequence_counter: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            protocol_version: u16::from_be_bytes(buf[4..6].try_into().unwrap()),
            msg_type,
            com_id: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            etb_topo_cnt: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
            op_trn_topo_cnt: u32::from_be_bytes(buf[16..20].try_into().unwrap()),
            dataset_length: u32::from_be_bytes(buf[20..24].try_into().unwrap()),
            reserved: u32::from_be_bytes(buf[24..28].try_into().unwrap()),
            reply_com_id: u32::from_be_bytes(buf[28..32].try_into().unwrap()),
            reply_ip_address: u32::from_be_bytes(buf[32..36].try_into().unwrap()),
            frame_check_sum: u32::from_le_bytes(buf[36..40].try_into().unwrap()),
        })
    }

    /// Validates an inbound datagram and parses its header.
    ///
    /// `WireErr` covers: `recv_size` out of `[HEADER_SIZE, MAX_DATAGRAM_SIZE]`,
    /// a protocol major mismatch, `datasetLength > MAX_DATASET_LEN`, or an
    /// unrecognised `msgType`. `CrcErr` covers a little-endian FCS mismatch
    /// over the first 36 bytes.
    pub fn check(
        buf: &[u8],
        recv_size: usize,
        expected_protocol_major: u8,
    ) -> Result<Self, FrameError> {
        if recv_size < HEADER_SIZE || recv_size > MAX_DATAGRAM_SIZE || buf.len() < recv_size {
            return Err(FrameError::Wire);
        }

        let header = Self::decode(&buf[..recv_size])?;

        if header.protocol_major() != expected_protocol_major {
            return Err(FrameError::Wire);
        }
        if header.dataset_length > MAX_DATASET_LEN {
            return Err(FrameError::Wire);
        }
        if header.dataset_length as usize != recv_size - HEADER_SIZE {
            return Err(FrameError::Wire);
        }

        let expected_crc = crc32fast::hash(&buf[..CRC_OFFSET]);
        if expected_crc != header.frame_check_sum {
            return Err(FrameError::Crc);
        }

        Ok(header)
    }
}
