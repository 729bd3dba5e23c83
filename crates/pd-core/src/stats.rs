use pd_timing::Nanos;

/// Session-global counters (§7), also the payload format for the
/// statistics PULL handler (§9).
///
/// `num_subs`/`num_pub` are not accumulated here: they're live queue lengths
/// sampled at snapshot time (see [`SessionStats::encode_snapshot`]), the way
/// the original protocol's stats reply reports them.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub num_crc_err: u64,
    pub num_prot_err: u64,
    pub num_topo_err: u64,
    pub num_no_subs: u64,
    /// A PULL request whose reply com id matched no publication.
    pub num_no_pub: u64,
    pub num_timeout: u64,
    pub num_send: u64,
    pub num_rcv: u64,
    pub num_missed: u64,
}

/// Size in bytes of the statistics reply payload: a `(tv_sec, tv_usec)`
/// timestamp pair followed by the eleven counters, all network-order u32.
///
/// Resolves spec's open question about `timeStamp.tv_usec` endianness: both
/// halves are network-order u32, consistent with every other multi-byte
/// field in the wire format bar the FCS.
pub const STATS_PAYLOAD_LEN: usize = 2 * 4 + 11 * 4;

impl SessionStats {
    /// Serializes a snapshot into `out` in field order, big-endian, prefixed
    /// by a wall-clock timestamp. `num_subs`/`num_pub` are the live
    /// receive/send queue lengths at snapshot time. `out` must be at least
    /// [`STATS_PAYLOAD_LEN`] bytes.
    pub fn encode_snapshot(&self, num_subs: u32, num_pub: u32, out: &mut [u8]) {
        debug_assert!(out.len() >= STATS_PAYLOAD_LEN);

        let now = Nanos::now();
        let tv_sec = (now.0 / 1_000_000_000) as u32;
        let tv_usec = ((now.0 / 1_000) % 1_000_000) as u32;

        out[0..4].copy_from_slice(&tv_sec.to_be_bytes());
        out[4..8].copy_from_slice(&tv_usec.to_be_bytes());
        out[8..12].copy_from_slice(&(self.num_crc_err as u32).to_be_bytes());
        out[12..16].copy_from_slice(&(self.num_prot_err as u32).to_be_bytes());
        out[16..20].copy_from_slice(&(self.num_topo_err as u32).to_be_bytes());
        out[20..24].copy_from_slice(&(self.num_no_subs as u32).to_be_bytes());
        out[24..28].copy_from_slice(&(self.num_no_pub as u32).to_be_bytes());
        out[28..32].copy_from_slice(&(self.num_timeout as u32).to_be_bytes());
        out[32..36].copy_from_slice(&(self.num_send as u32).to_be_bytes());
        out[36..40].copy_from_slice(&(self.num_rcv as u32).to_be_bytes());
        out[40..44].copy_from_slice(&(self.num_missed as u32).to_be_bytes());
        out[44..48].copy_from_slice(&num_subs.to_be_bytes());
        out[48..52].copy_from_slice(&num_pub.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_counters_big_endian_after_timestamp() {
        let mock = pd_timing::init_global_with_mock();
        mock.increment(1);
        let stats = SessionStats { num_send: 7, num_rcv: 3, ..Default::default() };
        let mut buf = [0u8; STATS_PAYLOAD_LEN];
        stats.encode_snapshot(2, 5, &mut buf);
        assert_eq!(u32::from_be_bytes(buf[32..36].try_into().unwrap()), 7);
        assert_eq!(u32::from_be_bytes(buf[36..40].try_into().unwrap()), 3);
        assert_eq!(u32::from_be_bytes(buf[44..48].try_into().unwrap()), 2);
        assert_eq!(u32::from_be_bytes(buf[48..52].try_into().unwrap()), 5);
    }
}
