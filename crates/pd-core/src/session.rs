use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use mio::{Events, Interest, Poll, Token, net::UdpSocket};
use pd_timing::{Nanos, Repeater};
use pd_wire::{Header, MsgType, MAX_DATAGRAM_SIZE};
use tracing::{debug, warn};

use crate::{
    callback::MsgInfo,
    config::{SessionConfig, STATISTICS_PULL_COMID},
    distribute::distribute,
    element::{Address, ElementFlags, ElementId, ErrorCode, PacketElement},
    error::PdError,
    sequence::{self, SeqOutcome},
    stats::{SessionStats, STATS_PAYLOAD_LEN},
    table::PacketTable,
    topology,
};

const SOCKET_TOKEN: Token = Token(0);

fn ip_addr(ip: u32) -> IpAddr {
    IpAddr::V4(Ipv4Addr::from(ip))
}

/// The owning session (§5, §9's "global mutable session" re-architecture):
/// exclusively owns the send/receive queues and the scratch receive frame.
/// All mutators take `&mut self`; there are no process-wide singletons.
///
/// The datagram socket layer is bound once at construction and driven by a
/// single `mio::Poll`. Capturing the real destination IP of an inbound
/// multicast datagram would need `IP_PKTINFO`, which this core does not
/// implement; `own_ip` from [`SessionConfig`] is used in its place (see
/// DESIGN.md).
pub struct Session {
    config: SessionConfig,
    send_queue: PacketTable,
    receive_queue: PacketTable,
    stats: SessionStats,
    scratch_frame: Vec<u8>,
    socket: UdpSocket,
    poll: Poll,
    events: Events,
    distribute_repeater: Repeater,
    /// Disallows re-entrant publish/subscribe calls from within a callback,
    /// per the Design Notes' re-entry guard.
    reentry_guard: bool,
    statistics_element: ElementId,
}

impl Session {
    /// Binds the session's UDP socket at `bind_addr` and registers the
    /// statistics publication under [`STATISTICS_PULL_COMID`].
    pub fn new(mut config: SessionConfig, bind_addr: SocketAddr) -> io::Result<Self> {
        let mut socket = UdpSocket::bind(bind_addr)?;
        let poll = Poll::new()?;
        poll.registry().register(&mut socket, SOCKET_TOKEN, Interest::READABLE)?;

        // An ephemeral bind (port 0, as tests use) only makes sense if the
        // session's own notion of "the PD port" tracks what it actually
        // bound; production configs always pin both to the well-known port.
        if bind_addr.port() == 0 {
            config.port = socket.local_addr()?.port();
        }

        let mut send_queue = PacketTable::new();
        let statistics_element = send_queue.insert(PacketElement::new(
            Address {
                com_id: STATISTICS_PULL_COMID,
                src_ip: config.own_ip,
                dst_ip: 0,
                etb_topo_cnt: 0,
                op_trn_topo_cnt: 0,
            },
            MsgType::Pd,
            Nanos::ZERO,
        ));

        Ok(Self {
            distribute_repeater: Repeater::every(config.distribute_interval),
            config,
            send_queue,
            receive_queue: PacketTable::new(),
            stats: SessionStats::default(),
            scratch_frame: vec![0u8; MAX_DATAGRAM_SIZE],
            socket,
            poll,
            events: Events::with_capacity(16),
            reentry_guard: false,
            statistics_element,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn publication(&self, id: ElementId) -> Option<&PacketElement> {
        self.send_queue.get(id)
    }

    pub fn subscription(&self, id: ElementId) -> Option<&PacketElement> {
        self.receive_queue.get(id)
    }

    // ---- publish / subscribe -------------------------------------------

    /// Registers a new publication and stages it into the send queue.
    /// `interval == Nanos::ZERO` marks a PULL-only publication.
    pub fn publish(
        &mut self,
        address: Address,
        interval: Nanos,
        flags: ElementFlags,
        callback: Option<Box<dyn FnMut(&MsgInfo, &[u8]) + Send>>,
    ) -> Result<ElementId, PdError> {
        if self.reentry_guard {
            return Err(PdError::ParamErr);
        }
        let mut element = PacketElement::new(address, MsgType::Pd, interval);
        element.flags |= flags;
        element.callback = callback;
        let id = self.send_queue.insert(element);
        distribute(&mut self.send_queue);
        Ok(id)
    }

    /// Updates a publication's payload, clearing `INVALID_DATA` and bumping
    /// its update counter (§3 invariant 2: `INVALID_DATA` only clears once a
    /// payload has been stored).
    pub fn update_payload(&mut self, id: ElementId, payload: &[u8]) -> Result<(), PdError> {
        if payload.len() > pd_wire::MAX_DATASET_LEN as usize {
            return Err(PdError::ParamErr);
        }
        let element = self.send_queue.get_mut(id).ok_or(PdError::ParamErr)?;
        element.frame.resize(pd_wire::HEADER_SIZE + payload.len(), 0);
        element.frame[pd_wire::HEADER_SIZE..].copy_from_slice(payload);
        element.gross_size = pd_wire::HEADER_SIZE + payload.len();
        element.flags.remove(ElementFlags::INVALID_DATA);
        element.stats.upd_pkts += 1;
        Ok(())
    }

    /// Registers a subscription. `address.src_ip == 0` matches any sender.
    /// `interval == Nanos::ZERO` disables the timeout supervisor for it (a
    /// PULL-only receiver).
    pub fn subscribe(
        &mut self,
        address: Address,
        interval: Nanos,
        flags: ElementFlags,
        callback: Option<Box<dyn FnMut(&MsgInfo, &[u8]) + Send>>,
    ) -> ElementId {
        let mut element = PacketElement::new(address, MsgType::Pd, interval);
        element.flags |= flags;
        element.callback = callback;
        self.receive_queue.insert(element)
    }

    pub fn unpublish(&mut self, id: ElementId) -> Option<PacketElement> {
        self.send_queue.remove(id)
    }

    pub fn unsubscribe(&mut self, id: ElementId) -> Option<PacketElement> {
        self.receive_queue.remove(id)
    }

    /// Stages a one-shot PULL request (`Pr`) for immediate transmission on
    /// the next `sendQueued`.
    pub fn pull(&mut self, target: Address, reply_com_id: u32, reply_ip_address: u32) -> ElementId {
        let mut element = PacketElement::new(target, MsgType::Pr, Nanos::ZERO);
        element.flags |= ElementFlags::REQ_2B_SENT;
        element.pull_ip_address = if reply_ip_address != 0 { Some(reply_ip_address) } else { None };
        element.stats.get_pkts = 0;
        let _ = reply_com_id;
        self.send_queue.insert(element)
    }

    // ---- process() entry point -------------------------------------------

    /// `process()`: `handleTimeOuts` -> `sendQueued` -> drains ready sockets.
    pub fn process(&mut self) -> Result<(), PdError> {
        if self.distribute_repeater.fired() {
            distribute(&mut self.send_queue);
        }
        self.handle_timeouts();
        let send_result = self.send_queued();
        self.poll_ready(Some(Duration::ZERO))?;
        send_result
    }

    // ---- Component O: timeout supervisor ---------------------------------

    /// §4.O. Fires the timeout callback at most once per silent interval;
    /// the next accepted frame re-arms it via [`Session::handle_datagram`].
    pub fn handle_timeouts(&mut self) {
        let now = Nanos::now();
        for (_, element) in self.receive_queue.iter_mut() {
            if element.address.com_id == STATISTICS_PULL_COMID {
                continue;
            }
            if element.interval == Nanos::ZERO {
                continue;
            }
            let Some(time_to_go) = element.time_to_go else { continue };
            if time_to_go > now || element.flags.contains(ElementFlags::TIMED_OUT) {
                continue;
            }

            element.flags.insert(ElementFlags::TIMED_OUT);
            self.stats.num_timeout += 1;
            element.stats.last_err = ErrorCode::TimeoutErr;

            if let Some(callback) = element.callback.as_mut() {
                let info = MsgInfo {
                    com_id: element.address.com_id,
                    src_ip: element.address.src_ip,
                    dst_ip: element.address.dst_ip,
                    etb_topo_cnt: element.address.etb_topo_cnt,
                    op_trn_topo_cnt: element.address.op_trn_topo_cnt,
                    msg_type: element.msg_type,
                    seq_count: element.cur_seq_cnt,
                    prot_version: self.config.protocol_version,
                    reply_com_id: 0,
                    reply_ip_addr: 0,
                    user_ref: element.user_ref,
                    result_code: ErrorCode::TimeoutErr,
                };
                let payload: &[u8] = if element.gross_size > pd_wire::HEADER_SIZE {
                    &element.frame[pd_wire::HEADER_SIZE..element.gross_size]
                } else {
                    &[]
                };
                callback(&info, payload);
            }
        }
    }

    // ---- Component X: transmit engine -------------------------------------

    /// §4.X. Reverse scan so a mid-walk teardown of a one-shot `Pr` (step
    /// 10) never skips or re-visits an element, mirroring
    /// `ConnectionManager::broadcast`'s `while i != 0 { i -= 1; }` pattern.
    pub fn send_queued(&mut self) -> Result<(), PdError> {
        let now = Nanos::now();
        let mut last_err: Option<PdError> = None;

        let mut i = self.send_queue.len();
        while i != 0 {
            i -= 1;

            let due = {
                let (_, element) = self.send_queue.entry_at(i);
                let cyclic_due =
                    element.interval != Nanos::ZERO && element.time_to_go.is_some_and(|t| t <= now);
                cyclic_due || element.flags.contains(ElementFlags::REQ_2B_SENT)
            };
            if !due {
                continue;
            }

            let (_, element) = self.send_queue.entry_at(i);

            if element.flags.contains(ElementFlags::INVALID_DATA) {
                self.rearm(i);
                continue;
            }

            let (_, element) = self.send_queue.entry_at(i);
            let was_pull_reply = element.flags.contains(ElementFlags::REQ_2B_SENT)
                && element.msg_type == MsgType::Pd;
            let original_type = element.msg_type;
            if was_pull_reply {
                element.msg_type = MsgType::Pp;
            }

            let seq = if element.msg_type == MsgType::Pp {
                element.cur_seq_cnt4_pull += 1;
                element.cur_seq_cnt4_pull
            } else {
                element.cur_seq_cnt += 1;
                element.cur_seq_cnt
            };

            if !topology::valid(
                self.config.etb_topo_cnt,
                self.config.op_trn_topo_cnt,
                element.address.etb_topo_cnt,
                element.address.op_trn_topo_cnt,
            ) {
                element.stats.last_err = ErrorCode::TopoErr;
                self.stats.num_topo_err += 1;
                element.msg_type = original_type;
                self.rearm(i);
                continue;
            }

            if element.flags.contains(ElementFlags::REDUNDANT) {
                element.msg_type = original_type;
                self.rearm(i);
                continue;
            }

            let mut header = Header::init(
                self.config.protocol_version,
                element.msg_type,
                element.address.com_id,
                element.address.etb_topo_cnt,
                element.address.op_trn_topo_cnt,
                0,
                0,
            );
            let payload_len = element.gross_size.saturating_sub(pd_wire::HEADER_SIZE);
            header.stamp(seq, payload_len as u32);

            let mut out = vec![0u8; pd_wire::HEADER_SIZE + payload_len];
            header.encode(&mut out);
            if payload_len > 0 {
                out[pd_wire::HEADER_SIZE..].copy_from_slice(&element.frame[pd_wire::HEADER_SIZE..element.gross_size]);
            }

            let dst_ip = element.pull_ip_address.unwrap_or(element.address.dst_ip);

            if element.flags.contains(ElementFlags::CALLBACK) {
                if let Some(callback) = element.callback.as_mut() {
                    let info = MsgInfo {
                        com_id: element.address.com_id,
                        src_ip: element.address.src_ip,
                        dst_ip,
                        etb_topo_cnt: element.address.etb_topo_cnt,
                        op_trn_topo_cnt: element.address.op_trn_topo_cnt,
                        msg_type: element.msg_type,
                        seq_count: seq,
                        prot_version: self.config.protocol_version,
                        reply_com_id: 0,
                        reply_ip_addr: 0,
                        user_ref: element.user_ref,
                        result_code: ErrorCode::Ok,
                    };
                    callback(&info, &out[pd_wire::HEADER_SIZE..]);
                }
            }

            let dst_addr = SocketAddr::new(ip_addr(dst_ip), self.config.port);
            match self.socket.send_to(&out, dst_addr) {
                Ok(_) => {
                    self.stats.num_send += 1;
                    element.stats.num_rx_tx += 1;
                    if was_pull_reply {
                        element.stats.get_pkts += 1;
                    }
                }
                Err(err) => {
                    warn!(?err, com_id = element.address.com_id, "pd: send failed");
                    element.stats.last_err = ErrorCode::IoErr;
                    last_err = Some(PdError::IoErr(err));
                }
            }

            let (_, element) = self.send_queue.entry_at(i);
            if was_pull_reply {
                element.msg_type = original_type;
            } else if element.interval != Nanos::ZERO {
                let next = element.time_to_go.unwrap_or(now) + element.interval;
                element.time_to_go = Some(if next <= now { now + element.interval } else { next });
            }
            element.flags.remove(ElementFlags::REQ_2B_SENT);
            element.pull_ip_address = None;

            if element.is_one_shot_pull() {
                self.send_queue.remove_at(i);
            }
        }

        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn rearm(&mut self, index: usize) {
        let (_, element) = self.send_queue.entry_at(index);
        if element.interval != Nanos::ZERO {
            element.time_to_go = Some(Nanos::now() + element.interval);
        }
        element.flags.remove(ElementFlags::REQ_2B_SENT);
    }

    // ---- Component R: receive engine --------------------------------------

    /// Reads one datagram from the socket and runs it through
    /// [`Session::handle_datagram`]. Destination-IP capture (needed to tell
    /// multicast groups apart) is approximated with `config.own_ip`.
    pub fn receive(&mut self) -> Result<(), PdError> {
        let (recv_size, from) = self.socket.recv_from(&mut self.scratch_frame).map_err(|err| {
            if err.kind() == io::ErrorKind::WouldBlock {
                PdError::BlockErr
            } else {
                PdError::IoErr(err)
            }
        })?;

        let src_ip = match from.ip() {
            IpAddr::V4(v4) => u32::from(v4),
            IpAddr::V6(_) => 0,
        };
        let dst_ip = self.config.own_ip;
        self.handle_datagram(recv_size, src_ip, dst_ip)
    }

    /// Feeds an already-assembled datagram through the receive path without
    /// touching the socket, e.g. to replay a captured frame or drive the
    /// core from something other than `mio`.
    pub fn receive_bytes(&mut self, bytes: &[u8], src_ip: u32, dst_ip: u32) -> Result<(), PdError> {
        self.scratch_frame[..bytes.len()].copy_from_slice(bytes);
        self.handle_datagram(bytes.len(), src_ip, dst_ip)
    }

    /// Core of §4.R, decoupled from socket I/O so it can be driven directly
    /// by [`Session::receive_bytes`] or tests.
    pub fn handle_datagram(
        &mut self,
        recv_size: usize,
        src_ip: u32,
        dst_ip: u32,
    ) -> Result<(), PdError> {
        self.stats.num_rcv += 1;

        let expected_major = (self.config.protocol_version >> 8) as u8;
        let header = match Header::check(&self.scratch_frame, recv_size, expected_major) {
            Ok(h) => h,
            Err(pd_wire::FrameError::Wire) => {
                self.stats.num_prot_err += 1;
                return Err(PdError::WireErr);
            }
            Err(pd_wire::FrameError::Crc) => {
                self.stats.num_crc_err += 1;
                return Err(PdError::CrcErr);
            }
        };

        if !topology::valid(
            self.config.etb_topo_cnt,
            self.config.op_trn_topo_cnt,
            header.etb_topo_cnt,
            header.op_trn_topo_cnt,
        ) {
            self.stats.num_topo_err += 1;
            return Err(PdError::TopoErr);
        }

        if header.msg_type == MsgType::Pr {
            // A PULL request carries no data for any subscriber to consume;
            // it only ever triggers a reply.
            return self.handle_pull_request(&header, src_ip);
        }

        let frame_addr = Address {
            com_id: header.com_id,
            src_ip,
            dst_ip,
            etb_topo_cnt: header.etb_topo_cnt,
            op_trn_topo_cnt: header.op_trn_topo_cnt,
        };

        let Some(sub_id) = self.receive_queue.find_by_sub_addr(&frame_addr) else {
            self.stats.num_no_subs += 1;
            return Err(PdError::NoSubErr);
        };

        let payload_start = pd_wire::HEADER_SIZE;
        let payload_end = recv_size;
        let mut new_payload = vec![0u8; payload_end.saturating_sub(payload_start) + pd_wire::HEADER_SIZE];
        new_payload[pd_wire::HEADER_SIZE..].copy_from_slice(&self.scratch_frame[payload_start..payload_end]);

        let element = self.receive_queue.get_mut(sub_id).expect("id just resolved");

        if !topology::valid(
            header.etb_topo_cnt,
            header.op_trn_topo_cnt,
            element.address.etb_topo_cnt,
            element.address.op_trn_topo_cnt,
        ) {
            element.stats.last_err = ErrorCode::TopoErr;
            if element.flags.contains(ElementFlags::CALLBACK) {
                let info = MsgInfo {
                    com_id: element.address.com_id,
                    src_ip,
                    dst_ip,
                    etb_topo_cnt: header.etb_topo_cnt,
                    op_trn_topo_cnt: header.op_trn_topo_cnt,
                    msg_type: header.msg_type,
                    seq_count: header.sequence_counter,
                    prot_version: header.protocol_version,
                    reply_com_id: header.reply_com_id,
                    reply_ip_addr: header.reply_ip_address,
                    user_ref: element.user_ref,
                    result_code: ErrorCode::TopoErr,
                };
                if let Some(callback) = element.callback.as_mut() {
                    let existing = element.frame.get(pd_wire::HEADER_SIZE..element.gross_size).unwrap_or(&[]);
                    callback(&info, existing);
                }
            }
            return Ok(());
        }

        let mut missed = 0u64;
        let outcome = sequence::track(
            &mut element.sequence_table,
            src_ip,
            header.msg_type,
            header.sequence_counter,
            &mut missed,
        );
        element.stats.num_missed += missed;
        self.stats.num_missed += missed;

        match outcome {
            SeqOutcome::Duplicate => return Ok(()),
            SeqOutcome::Overflow => return Err(PdError::MemErr),
            SeqOutcome::Accept | SeqOutcome::Restart => {}
        }

        let payload_changed = element.frame.get(pd_wire::HEADER_SIZE..).unwrap_or(&[])
            != &new_payload[pd_wire::HEADER_SIZE..];
        let inform_user = element.flags.contains(ElementFlags::CALLBACK)
            && (element.flags.contains(ElementFlags::FORCE_CB)
                || element.flags.contains(ElementFlags::TIMED_OUT)
                || payload_changed);

        element.time_to_go = if element.interval != Nanos::ZERO {
            Some(Nanos::now() + element.interval)
        } else {
            None
        };
        element.flags.remove(ElementFlags::TIMED_OUT);
        element.flags.remove(ElementFlags::INVALID_DATA);
        element.address.src_ip = src_ip;
        element.address.dst_ip = dst_ip;
        element.cur_seq_cnt = header.sequence_counter;
        element.stats.num_rx_tx += 1;

        // Swap: the subscription now owns the freshly received bytes; no
        // aliasing, the old buffer is simply dropped.
        std::mem::swap(&mut element.frame, &mut new_payload);
        element.gross_size = pd_wire::HEADER_SIZE + (payload_end - payload_start);

        if inform_user {
            let info = MsgInfo {
                com_id: element.address.com_id,
                src_ip,
                dst_ip,
                etb_topo_cnt: header.etb_topo_cnt,
                op_trn_topo_cnt: header.op_trn_topo_cnt,
                msg_type: header.msg_type,
                seq_count: header.sequence_counter,
                prot_version: header.protocol_version,
                reply_com_id: header.reply_com_id,
                reply_ip_addr: header.reply_ip_address,
                user_ref: element.user_ref,
                result_code: ErrorCode::Ok,
            };
            if let Some(callback) = element.callback.as_mut() {
                callback(&info, &element.frame[pd_wire::HEADER_SIZE..element.gross_size]);
            }
        }

        Ok(())
    }

    fn handle_pull_request(&mut self, header: &Header, src_ip: u32) -> Result<(), PdError> {
        if header.com_id == STATISTICS_PULL_COMID {
            let reply_ip = if header.reply_ip_address != 0 { header.reply_ip_address } else { src_ip };
            let id = self.statistics_element;
            let snapshot = self.stats;
            let num_subs = self.receive_queue.len() as u32;
            let num_pub = self.send_queue.len() as u32;
            if let Some(element) = self.send_queue.get_mut(id) {
                element.address.dst_ip = reply_ip;
                element.msg_type = MsgType::Pd;
                element.flags.insert(ElementFlags::REQ_2B_SENT);
                element.pull_ip_address = Some(reply_ip);
                element.frame.resize(pd_wire::HEADER_SIZE + STATS_PAYLOAD_LEN, 0);
                snapshot.encode_snapshot(num_subs, num_pub, &mut element.frame[pd_wire::HEADER_SIZE..]);
                element.gross_size = pd_wire::HEADER_SIZE + STATS_PAYLOAD_LEN;
                element.flags.remove(ElementFlags::INVALID_DATA);
            }
            return self.send_queued();
        }

        let reply_com_id = if header.reply_com_id != 0 { header.reply_com_id } else { header.com_id };
        let Some(id) = self.send_queue.find_by_com_id(reply_com_id) else {
            self.stats.num_no_pub += 1;
            return Ok(());
        };
        let reply_ip = if header.reply_ip_address != 0 { header.reply_ip_address } else { src_ip };
        if let Some(element) = self.send_queue.get_mut(id) {
            element.pull_ip_address = Some(reply_ip);
            element.flags.insert(ElementFlags::REQ_2B_SENT);
        }
        self.send_queued()
    }

    // ---- Component P: poll integrator -------------------------------------

    /// §4.P `checkPending`: earliest deadline across both queues, skipping
    /// already-timed-out entries and PULL-only receivers with no deadline.
    pub fn next_deadline(&self) -> Option<Nanos> {
        let send_min = self.send_queue.iter().filter_map(|(_, e)| e.time_to_go).min();
        let recv_min = self
            .receive_queue
            .iter()
            .filter(|(_, e)| !e.flags.contains(ElementFlags::TIMED_OUT))
            .filter_map(|(_, e)| e.time_to_go)
            .min();
        match (send_min, recv_min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, None) => a,
            (None, b) => b,
        }
    }

    /// §4.P `checkListenSocks`: polls the socket and drains (non-blocking
    /// config) or reads once (blocking config) per ready event.
    pub fn poll_ready(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.poll.poll(&mut self.events, timeout)?;

        let mut ready = false;
        for event in self.events.iter() {
            if event.token() == SOCKET_TOKEN && event.is_readable() {
                ready = true;
            }
        }
        if !ready {
            return Ok(());
        }

        loop {
            match self.receive() {
                Ok(()) => {
                    if !self.config.non_blocking {
                        break;
                    }
                }
                Err(PdError::BlockErr) => break,
                Err(err) => {
                    debug!(?err, "pd: receive error");
                    if !self.config.non_blocking {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
