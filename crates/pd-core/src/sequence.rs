use pd_utils::ArrayVec;
use pd_wire::MsgType;

use crate::element::SourceSeq;

/// Outcome of feeding one inbound `(srcIp, msgType, seq)` triple into a
/// subscription's sequence table (§4.S).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqOutcome {
    /// First sighting of this source, or a strictly-newer sequence.
    Accept,
    /// `incoming == 0`: the sender restarted. Table entry was reset.
    Restart,
    /// Strictly older than `lastSeq` (and not zero): ignored.
    Duplicate,
    /// Table had no entry for this source and no capacity remained.
    Overflow,
}

/// Feeds `incoming` into `table` for `(src_ip, msg_type)`, mutating the
/// matching entry in place and reporting missed-packet deltas via
/// `missed_out`.
pub fn track<const N: usize>(
    table: &mut ArrayVec<SourceSeq, N>,
    src_ip: u32,
    msg_type: MsgType,
    incoming: u32,
    missed_out: &mut u64,
) -> SeqOutcome {
    if let Some(entry) =
        table.iter_mut().find(|e| e.src_ip == src_ip && e.msg_type == msg_type)
    {
        if incoming == 0 {
            entry.last_seq = 0;
            return SeqOutcome::Restart;
        }

        // Circular forward distance from last_seq to incoming. A gap in the
        // lower half of the u32 range means incoming is newer (accounting
        // for wrap); the upper half means incoming is a stale duplicate.
        let gap = incoming.wrapping_sub(entry.last_seq);
        if gap == 0 || gap >= 0x8000_0000 {
            SeqOutcome::Duplicate
        } else {
            if gap > 1 {
                *missed_out += (gap - 1) as u64;
            }
            entry.last_seq = incoming;
            SeqOutcome::Accept
        }
    } else if table.try_push(SourceSeq { src_ip, msg_type, last_seq: incoming }).is_none() {
        SeqOutcome::Accept
    } else {
        SeqOutcome::Overflow
    }
}

#[cfg(test)]
mod tests {
    use pd_utils::ArrayVec;

    use super::*;

    #[test]
    fn accepts_non_decreasing_sequence_per_source() {
        let mut table: ArrayVec<SourceSeq, 4> = ArrayVec::new();
        let mut missed = 0;
        assert_eq!(track(&mut table, 1, MsgType::Pd, 1, &mut missed), SeqOutcome::Accept);
        assert_eq!(track(&mut table, 1, MsgType::Pd, 2, &mut missed), SeqOutcome::Accept);
        assert_eq!(track(&mut table, 1, MsgType::Pd, 3, &mut missed), SeqOutcome::Accept);
        assert_eq!(missed, 0);
    }

    #[test]
    fn rejects_strictly_decreasing_as_duplicate() {
        let mut table: ArrayVec<SourceSeq, 4> = ArrayVec::new();
        let mut missed = 0;
        track(&mut table, 1, MsgType::Pd, 5, &mut missed);
        assert_eq!(track(&mut table, 1, MsgType::Pd, 3, &mut missed), SeqOutcome::Duplicate);
    }

    #[test]
    fn zero_is_treated_as_restart() {
        let mut table: ArrayVec<SourceSeq, 4> = ArrayVec::new();
        let mut missed = 0;
        track(&mut table, 1, MsgType::Pd, 9, &mut missed);
        assert_eq!(track(&mut table, 1, MsgType::Pd, 0, &mut missed), SeqOutcome::Restart);
        assert_eq!(table.iter().find(|e| e.src_ip == 1).unwrap().last_seq, 0);
    }

    #[test]
    fn overflow_when_capacity_exhausted() {
        let mut table: ArrayVec<SourceSeq, 2> = ArrayVec::new();
        let mut missed = 0;
        assert_eq!(track(&mut table, 1, MsgType::Pd, 1, &mut missed), SeqOutcome::Accept);
        assert_eq!(track(&mut table, 2, MsgType::Pd, 1, &mut missed), SeqOutcome::Accept);
        assert_eq!(track(&mut table, 3, MsgType::Pd, 1, &mut missed), SeqOutcome::Overflow);
    }

    #[test]
    fn missed_counts_gaps() {
        let mut table: ArrayVec<SourceSeq, 4> = ArrayVec::new();
        let mut missed = 0;
        track(&mut table, 1, MsgType::Pd, 1, &mut missed);
        track(&mut table, 1, MsgType::Pd, 5, &mut missed);
        assert_eq!(missed, 3);
    }
}
