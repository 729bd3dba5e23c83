use pd_timing::Nanos;
use tracing::debug;

use crate::table::PacketTable;

/// Staggers send instants across cyclic publications so a periodic tick
/// doesn't burst them all at once (§4.D). Run on (re)publication and
/// whenever the publish set changes. A no-op with zero or one cyclic
/// publication.
pub fn distribute(send_queue: &mut PacketTable) {
    let cyclic_count =
        send_queue.iter().filter(|(_, e)| e.interval != Nanos::ZERO).count();
    if cyclic_count < 2 {
        return;
    }

    let delta_max = send_queue
        .iter()
        .filter(|(_, e)| e.interval != Nanos::ZERO)
        .map(|(_, e)| e.interval)
        .min()
        .expect("cyclic_count >= 2 implies at least one cyclic interval");

    let t0 = send_queue
        .iter()
        .filter(|(_, e)| e.interval != Nanos::ZERO)
        .filter_map(|(_, e)| e.time_to_go)
        .max()
        .unwrap_or_else(Nanos::now);

    let slot_width = delta_max / cyclic_count;

    let mut k: u32 = 0;
    for i in 0..send_queue.len() {
        let (_, element) = send_queue.entry_at(i);
        if element.interval == Nanos::ZERO {
            continue;
        }

        let shift = slot_width * k;
        if shift + shift > element.interval {
            debug!(com_id = element.address.com_id, "distribute: shift would race own timeout, left unchanged");
        } else {
            element.time_to_go = Some(t0 + shift);
        }
        k += 1;
    }
}

#[cfg(test)]
mod tests {
    use pd_wire::MsgType;

    use super::*;
    use crate::element::{Address, PacketElement};

    fn addr(com_id: u32) -> Address {
        Address { com_id, src_ip: 0, dst_ip: 0, etb_topo_cnt: 0, op_trn_topo_cnt: 0 }
    }

    #[test]
    fn single_publication_is_a_no_op() {
        let mock = pd_timing::init_global_with_mock();
        mock.increment(1);
        let mut table = PacketTable::new();
        table.insert(PacketElement::new(addr(1), MsgType::Pd, Nanos::from_millis(100)));
        distribute(&mut table);
        // no panics, nothing to assert beyond not crashing on one element
    }

    #[test]
    fn spreads_cyclic_publications_by_slot_width() {
        let mock = pd_timing::init_global_with_mock();
        mock.increment(1);
        let mut table = PacketTable::new();
        table.insert(PacketElement::new(addr(1), MsgType::Pd, Nanos::from_millis(50)));
        table.insert(PacketElement::new(addr(2), MsgType::Pd, Nanos::from_millis(100)));
        table.insert(PacketElement::new(addr(3), MsgType::Pd, Nanos::from_millis(200)));

        distribute(&mut table);

        let mut times: Vec<Nanos> =
            table.iter().map(|(_, e)| e.time_to_go.expect("cyclic element has time_to_go")).collect();
        times.sort();
        let delta_max = Nanos::from_millis(50);
        let slot = delta_max / 3usize;
        assert!(times[1] - times[0] >= slot || times[1] == times[0]);
        let _ = delta_max;
    }
}
