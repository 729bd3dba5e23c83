use pd_timing::Nanos;
use pd_utils::ArrayVec;
use pd_wire::MsgType;

use crate::config::DEFAULT_SEQUENCE_TABLE_CAPACITY;

/// Stable handle into a [`crate::table::PacketTable`], analogous to a
/// `mio::Token`: assigned once at publish/subscribe time and never reused
/// while the element is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub usize);

bitflags::bitflags! {
    /// Public and private flag bytes from the packet element (§3). Public
    /// flags are set by the application; private flags are owned by the
    /// core and never mutated from outside it.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ElementFlags: u8 {
        /// Invoke the callback on accepted frames (public).
        const CALLBACK     = 0b0000_0001;
        /// Invoke the callback even if the payload is unchanged (public).
        const FORCE_CB      = 0b0000_0010;
        /// Run the application's marshal/unmarshal hook on this element (public).
        const MARSHALL      = 0b0000_0100;
        /// Silenced: another node in this redundancy group is authoritative (public).
        const REDUNDANT     = 0b0000_1000;
        /// No payload has ever been stored; never cleared by a timeout (private).
        const INVALID_DATA  = 0b0001_0000;
        /// Timeout callback already fired for the current silence (private).
        const TIMED_OUT     = 0b0010_0000;
        /// A PULL request just arrived; send on the next `sendQueued` (private).
        const REQ_2B_SENT   = 0b0100_0000;
    }
}

/// The addressing tuple that identifies a publication or subscription.
/// `src_ip`/`dst_ip` of `0` on a subscription are wildcards matched against
/// any sender/group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub com_id: u32,
    pub src_ip: u32,
    pub dst_ip: u32,
    pub etb_topo_cnt: u32,
    pub op_trn_topo_cnt: u32,
}

impl Address {
    /// True if `self` (a subscription's stored address, possibly wildcarded)
    /// matches an inbound frame's concrete address.
    #[inline]
    pub fn matches(&self, frame: &Address) -> bool {
        self.com_id == frame.com_id
            && (self.src_ip == 0 || self.src_ip == frame.src_ip)
            && (self.dst_ip == 0 || self.dst_ip == frame.dst_ip)
    }
}

/// One entry of a subscription's per-source sequence table (§4.S).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSeq {
    pub src_ip: u32,
    pub msg_type: MsgType,
    pub last_seq: u32,
}

/// Error code surfaced via statistics, `msgInfo.resultCode`, and an
/// element's `lastErr`. Distinct from [`crate::error::PdError`] so it stays
/// `Copy` and storable inline in a packet element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCode {
    #[default]
    Ok,
    ParamErr,
    MemErr,
    NoSubErr,
    NoDataErr,
    TimeoutErr,
    WireErr,
    CrcErr,
    TopoErr,
    IoErr,
    BlockErr,
}

impl From<&crate::error::PdError> for ErrorCode {
    fn from(value: &crate::error::PdError) -> Self {
        use crate::error::PdError;
        match value {
            PdError::ParamErr => ErrorCode::ParamErr,
            PdError::MemErr => ErrorCode::MemErr,
            PdError::NoSubErr => ErrorCode::NoSubErr,
            PdError::NoDataErr => ErrorCode::NoDataErr,
            PdError::TimeoutErr => ErrorCode::TimeoutErr,
            PdError::WireErr => ErrorCode::WireErr,
            PdError::CrcErr => ErrorCode::CrcErr,
            PdError::TopoErr => ErrorCode::TopoErr,
            PdError::IoErr(_) => ErrorCode::IoErr,
            PdError::BlockErr => ErrorCode::BlockErr,
        }
    }
}

/// Running statistics kept per element (§3, §7).
#[derive(Debug, Clone, Copy, Default)]
pub struct ElementStats {
    /// Number of times this publication's payload was updated by the app.
    pub upd_pkts: u64,
    /// Number of PULL requests served by this publication.
    pub get_pkts: u64,
    /// Number of frames sent (publication) or accepted (subscription).
    pub num_rx_tx: u64,
    /// Gap in sequence numbers observed by the sequence tracker.
    pub num_missed: u64,
    pub last_err: ErrorCode,
}

/// The per-publication / per-subscription record (§3). A single type serves
/// both roles: a publication has `interval != 0` or is PULL-only
/// (`interval == 0`); a subscription is whatever the application registered
/// interest in and is driven entirely by the receive/timeout paths.
pub struct PacketElement {
    pub address: Address,
    /// Owned frame buffer; `frame[..gross_size]` is the exact wire image.
    pub frame: Vec<u8>,
    pub gross_size: usize,
    /// Send period; zero means PULL-only / one-shot (a `Pr` request).
    pub interval: Nanos,
    /// Absolute next-fire timestamp (publications) or next-timeout deadline
    /// (subscriptions).
    pub time_to_go: Option<Nanos>,
    pub cur_seq_cnt: u32,
    pub cur_seq_cnt4_pull: u32,
    pub sequence_table: ArrayVec<SourceSeq, DEFAULT_SEQUENCE_TABLE_CAPACITY>,
    pub flags: ElementFlags,
    /// Transient override of destination for a single PULL reply.
    pub pull_ip_address: Option<u32>,
    pub callback: Option<Box<dyn FnMut(&crate::callback::MsgInfo, &[u8]) + Send>>,
    pub user_ref: u64,
    pub stats: ElementStats,
    /// Socket-table index, or `None` when not yet bound.
    pub socket_index: Option<usize>,
    pub msg_type: MsgType,
}

impl PacketElement {
    pub fn new(address: Address, msg_type: MsgType, interval: Nanos) -> Self {
        Self {
            address,
            frame: Vec::with_capacity(pd_wire::MAX_DATAGRAM_SIZE),
            gross_size: 0,
            interval,
            time_to_go: if interval == Nanos::ZERO { None } else { Some(Nanos::now() + interval) },
            cur_seq_cnt: 0,
            cur_seq_cnt4_pull: 0,
            sequence_table: ArrayVec::new(),
            flags: ElementFlags::INVALID_DATA,
            pull_ip_address: None,
            callback: None,
            user_ref: 0,
            stats: ElementStats::default(),
            socket_index: None,
            msg_type,
        }
    }

    #[inline]
    pub fn is_one_shot_pull(&self) -> bool {
        self.interval == Nanos::ZERO && self.msg_type == MsgType::Pr
    }
}
