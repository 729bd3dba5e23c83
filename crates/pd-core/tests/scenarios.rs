//! End-to-end scenarios driven through `Session`'s public API, each frame
//! assembled by hand with `pd_wire::Header` and fed in via `receive_bytes`
//! rather than a live socket. All scenarios share one process-global mocked
//! clock, so they run as a single test to avoid racing its `OnceCell`.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use pd_core::{Address, ElementFlags, ErrorCode, PdError, Session, SessionConfig};
use pd_timing::Nanos;
use pd_wire::{Header, MsgType};

fn loopback_session(own_ip: u32) -> Session {
    let config = SessionConfig { own_ip, ..Default::default() };
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Session::new(config, addr).expect("bind loopback session")
}

fn frame(
    msg_type: MsgType,
    com_id: u32,
    seq: u32,
    reply_com_id: u32,
    reply_ip: u32,
    payload: &[u8],
    protocol_version: u16,
) -> Vec<u8> {
    let mut header = Header::init(protocol_version, msg_type, com_id, 0, 0, reply_com_id, reply_ip);
    header.stamp(seq, payload.len() as u32);
    let mut buf = vec![0u8; pd_wire::HEADER_SIZE + payload.len()];
    header.encode(&mut buf);
    buf[pd_wire::HEADER_SIZE..].copy_from_slice(payload);
    buf
}

fn recorder() -> (Arc<Mutex<Vec<(ErrorCode, Vec<u8>)>>>, Box<dyn FnMut(&pd_core::MsgInfo, &[u8]) + Send>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let log_clone = log.clone();
    let cb = Box::new(move |info: &pd_core::MsgInfo, payload: &[u8]| {
        log_clone.lock().unwrap().push((info.result_code, payload.to_vec()));
    });
    (log, cb)
}

#[test]
fn end_to_end_scenarios() {
    let mock = pd_timing::init_global_with_mock();
    mock.increment(1);

    // E1: data callback fires only when the payload actually changes.
    {
        let mut session = loopback_session(1);
        let (log, cb) = recorder();
        session.subscribe(
            Address { com_id: 100, src_ip: 0, dst_ip: 0, etb_topo_cnt: 0, op_trn_topo_cnt: 0 },
            Nanos::from_millis(100),
            ElementFlags::CALLBACK,
            Some(cb),
        );

        session.receive_bytes(&frame(MsgType::Pd, 100, 1, 0, 0, b"A", 0x0100), 10, 1).unwrap();
        session.receive_bytes(&frame(MsgType::Pd, 100, 2, 0, 0, b"A", 0x0100), 10, 1).unwrap();
        session.receive_bytes(&frame(MsgType::Pd, 100, 3, 0, 0, b"B", 0x0100), 10, 1).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2, "callback should fire for frame 1 and frame 3 only");
        assert_eq!(log[0].1, b"A");
        assert_eq!(log[1].1, b"B");
    }

    // E2: exactly one timeout callback per silence; a later frame clears it.
    {
        let mut session = loopback_session(1);
        let (log, cb) = recorder();
        let sub_id = session.subscribe(
            Address { com_id: 101, src_ip: 0, dst_ip: 0, etb_topo_cnt: 0, op_trn_topo_cnt: 0 },
            Nanos::from_millis(100),
            ElementFlags::CALLBACK,
            Some(cb),
        );

        mock.increment(Nanos::from_millis(250).0);
        session.handle_timeouts();
        session.handle_timeouts();

        {
            let log = log.lock().unwrap();
            assert_eq!(log.len(), 1, "handleTimeOuts is idempotent within one silence");
            assert_eq!(log[0].0, ErrorCode::TimeoutErr);
        }
        assert!(session.subscription(sub_id).unwrap().flags.contains(ElementFlags::TIMED_OUT));

        session.receive_bytes(&frame(MsgType::Pd, 101, 1, 0, 0, b"same", 0x0100), 10, 1).unwrap();
        session.receive_bytes(&frame(MsgType::Pd, 101, 1, 0, 0, b"same", 0x0100), 10, 1).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2, "first frame after a timeout is delivered regardless of payload identity");
        assert!(!session.subscription(sub_id).unwrap().flags.contains(ElementFlags::TIMED_OUT));
    }

    // E3: a wildcard subscription tracks every source independently.
    {
        let mut session = loopback_session(1);
        let (log, cb) = recorder();
        let sub_id = session.subscribe(
            Address { com_id: 102, src_ip: 0, dst_ip: 0, etb_topo_cnt: 0, op_trn_topo_cnt: 0 },
            Nanos::ZERO,
            ElementFlags::CALLBACK,
            Some(cb),
        );

        for seq in [1u32, 2, 3] {
            session.receive_bytes(&frame(MsgType::Pd, 102, seq, 0, 0, &seq.to_be_bytes(), 0x0100), 11, 1).unwrap();
        }
        for seq in [10u32, 11] {
            session.receive_bytes(&frame(MsgType::Pd, 102, seq, 0, 0, &seq.to_be_bytes(), 0x0100), 22, 1).unwrap();
        }

        assert_eq!(log.lock().unwrap().len(), 5, "all five frames from two independent sources are accepted");
        assert_eq!(session.subscription(sub_id).unwrap().stats.num_missed, 0);
        assert_eq!(session.stats().num_missed, 0);
    }

    // E4: a PULL request gets one Pp reply at the requested address, then
    // periodic sends resume as Pd to the publication's own destination.
    {
        let mut session = loopback_session(1);
        let observed: Arc<Mutex<Vec<(MsgType, u32)>>> = Arc::new(Mutex::new(Vec::new()));
        let observed_clone = observed.clone();
        let cb: Box<dyn FnMut(&pd_core::MsgInfo, &[u8]) + Send> = Box::new(move |info, _payload| {
            observed_clone.lock().unwrap().push((info.msg_type, info.dst_ip));
        });
        let pub_id = session
            .publish(
                Address { com_id: 200, src_ip: 1, dst_ip: 9, etb_topo_cnt: 0, op_trn_topo_cnt: 0 },
                Nanos::from_millis(100),
                ElementFlags::CALLBACK,
                Some(cb),
            )
            .unwrap();
        session.update_payload(pub_id, b"telemetry").unwrap();

        let reply_ip: u32 = u32::from(std::net::Ipv4Addr::new(10, 0, 0, 5));
        session.receive_bytes(&frame(MsgType::Pr, 200, 1, 0, reply_ip, &[], 0x0100), 77, 1).unwrap();

        mock.increment(Nanos::from_millis(150).0);
        session.send_queued().unwrap();

        let observed = observed.lock().unwrap();
        assert!(observed.iter().any(|(mt, dst)| *mt == MsgType::Pp && *dst == reply_ip), "pull reply should target the requested address");
        assert!(observed.iter().any(|(mt, dst)| *mt == MsgType::Pd && *dst == 9), "periodic sends resume to the publication's own destination");
    }

    // E5: a protocol-major mismatch is counted and returned, never delivered.
    {
        let mut session = loopback_session(1);
        let (log, cb) = recorder();
        session.subscribe(
            Address { com_id: 103, src_ip: 0, dst_ip: 0, etb_topo_cnt: 0, op_trn_topo_cnt: 0 },
            Nanos::ZERO,
            ElementFlags::CALLBACK,
            Some(cb),
        );

        let bad = frame(MsgType::Pd, 103, 1, 0, 0, b"x", 0x0200);
        let result = session.receive_bytes(&bad, 10, 1);
        assert!(matches!(result, Err(PdError::WireErr)));
        assert_eq!(session.stats().num_prot_err, 1);
        assert!(log.lock().unwrap().is_empty());
    }

    // E6: distribute() staggers cyclic publications by Δmax/N.
    {
        let mut session = loopback_session(1);
        let id_fast = session
            .publish(Address { com_id: 1, src_ip: 1, dst_ip: 1, etb_topo_cnt: 0, op_trn_topo_cnt: 0 }, Nanos::from_millis(50), ElementFlags::empty(), None)
            .unwrap();
        let id_mid = session
            .publish(Address { com_id: 2, src_ip: 1, dst_ip: 1, etb_topo_cnt: 0, op_trn_topo_cnt: 0 }, Nanos::from_millis(100), ElementFlags::empty(), None)
            .unwrap();
        let id_slow = session
            .publish(Address { com_id: 3, src_ip: 1, dst_ip: 1, etb_topo_cnt: 0, op_trn_topo_cnt: 0 }, Nanos::from_millis(200), ElementFlags::empty(), None)
            .unwrap();

        let slot = Nanos::from_millis(50) / 3usize;
        let t_fast = session.publication(id_fast).unwrap().time_to_go.unwrap();
        let t_mid = session.publication(id_mid).unwrap().time_to_go.unwrap();
        let t_slow = session.publication(id_slow).unwrap().time_to_go.unwrap();

        assert!(t_mid - t_fast >= slot || t_mid == t_fast);
        assert!(t_slow - t_mid >= slot || t_slow == t_mid);
    }

    // E7: a zero-wildcard subscription still accepts a frame whose own
    // topology counters are non-zero. Only a subscription with its own
    // non-zero counters set should ever reject on topology mismatch.
    {
        let mut session = loopback_session(1);
        let (log, cb) = recorder();
        session.subscribe(
            Address { com_id: 104, src_ip: 0, dst_ip: 0, etb_topo_cnt: 0, op_trn_topo_cnt: 0 },
            Nanos::ZERO,
            ElementFlags::CALLBACK,
            Some(cb),
        );

        let mut header = Header::init(0x0100, MsgType::Pd, 104, 7, 3, 0, 0);
        header.stamp(1, 1u32);
        let mut buf = vec![0u8; pd_wire::HEADER_SIZE + 1];
        header.encode(&mut buf);
        buf[pd_wire::HEADER_SIZE..].copy_from_slice(b"x");

        session.receive_bytes(&buf, 10, 1).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1, "a wildcard subscription accepts frames from any topology generation");
        assert_eq!(log[0].0, ErrorCode::Ok);
        assert_eq!(session.stats().num_topo_err, 0);
    }
}
