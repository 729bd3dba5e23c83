use crate::element::{Address, ElementId, PacketElement};

/// A send or receive queue (§4.Q). Legacy intrusive linked lists are
/// replaced by a flat table scanned linearly and torn down via
/// `swap_remove`, the shape `ConnectionManager::conns` uses in the teacher
/// for its connection table — acceptable at PD's scale (LAN telemetry, tens
/// to low hundreds of channels).
#[derive(Default)]
pub struct PacketTable {
    entries: Vec<(ElementId, PacketElement)>,
    next_id: usize,
}

impl PacketTable {
    pub fn new() -> Self {
        Self { entries: Vec::new(), next_id: 0 }
    }

    /// Inserts `element`, assigning it a fresh [`ElementId`].
    pub fn insert(&mut self, element: PacketElement) -> ElementId {
        let id = ElementId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, element));
        id
    }

    /// Removes and returns the element at `id`, if present.
    pub fn remove(&mut self, id: ElementId) -> Option<PacketElement> {
        let index = self.entries.iter().position(|(eid, _)| *eid == id)?;
        Some(self.entries.swap_remove(index).1)
    }

    /// Removes the element at table index `index` (used by callers already
    /// mid-scan, e.g. the transmit engine tearing down a one-shot PULL).
    pub fn remove_at(&mut self, index: usize) -> (ElementId, PacketElement) {
        self.entries.swap_remove(index)
    }

    pub fn get(&self, id: ElementId) -> Option<&PacketElement> {
        self.entries.iter().find(|(eid, _)| *eid == id).map(|(_, e)| e)
    }

    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut PacketElement> {
        self.entries.iter_mut().find(|(eid, _)| *eid == id).map(|(_, e)| e)
    }

    /// Linear scan by exact `comId` (send-side lookup: replies resolve
    /// `replyComId`/`comId` to a publication).
    pub fn find_by_com_id(&self, com_id: u32) -> Option<ElementId> {
        self.entries.iter().find(|(_, e)| e.address.com_id == com_id).map(|(id, _)| *id)
    }

    /// Linear scan honoring subscription wildcards (receive-side lookup).
    pub fn find_by_sub_addr(&self, frame_addr: &Address) -> Option<ElementId> {
        self.entries.iter().find(|(_, e)| e.address.matches(frame_addr)).map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ElementId, PacketElement)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut (ElementId, PacketElement)> {
        self.entries.iter_mut()
    }

    /// Index-based access for callers that walk the table by position (the
    /// transmit engine's reverse scan, mirroring
    /// `ConnectionManager::broadcast`'s `while i != 0 { i -= 1; }` pattern so
    /// a mid-walk `swap_remove` never skips or re-visits an element).
    pub fn entry_at(&mut self, index: usize) -> &mut (ElementId, PacketElement) {
        &mut self.entries[index]
    }
}

#[cfg(test)]
mod tests {
    use pd_timing::Nanos;
    use pd_wire::MsgType;

    use super::*;

    fn addr(com_id: u32) -> Address {
        Address { com_id, src_ip: 0, dst_ip: 0, etb_topo_cnt: 0, op_trn_topo_cnt: 0 }
    }

    #[test]
    fn insert_then_find_by_com_id() {
        let mut table = PacketTable::new();
        let id = table.insert(PacketElement::new(addr(200), MsgType::Pd, Nanos::from_millis(100)));
        assert_eq!(table.find_by_com_id(200), Some(id));
        assert_eq!(table.find_by_com_id(999), None);
    }

    #[test]
    fn wildcard_subscription_matches_any_source() {
        let mut table = PacketTable::new();
        let sub_addr =
            Address { com_id: 100, src_ip: 0, dst_ip: 0, etb_topo_cnt: 0, op_trn_topo_cnt: 0 };
        let id = table.insert(PacketElement::new(sub_addr, MsgType::Pd, Nanos::ZERO));

        let frame_addr =
            Address { com_id: 100, src_ip: 42, dst_ip: 7, etb_topo_cnt: 0, op_trn_topo_cnt: 0 };
        assert_eq!(table.find_by_sub_addr(&frame_addr), Some(id));
    }

    #[test]
    fn swap_remove_mid_walk_never_skips_an_element() {
        let mut table = PacketTable::new();
        for com_id in 0..4 {
            table.insert(PacketElement::new(addr(com_id), MsgType::Pd, Nanos::ZERO));
        }

        let mut visited = Vec::new();
        let mut i = table.len();
        while i != 0 {
            i -= 1;
            let com_id = table.entry_at(i).1.address.com_id;
            visited.push(com_id);
            if com_id == 2 {
                table.remove_at(i);
            }
        }
        visited.sort_unstable();
        assert_eq!(visited, vec![0, 1, 2, 3]);
        assert_eq!(table.len(), 3);
    }
}
