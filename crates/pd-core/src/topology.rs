/// Validates a frame's topology counters against the session's (or a
/// subscription's own stored) counters. A counter of zero means "local
/// scope, not checked"; otherwise the frame's counter must match exactly
/// (§4.T).
#[inline]
pub fn valid(session_etb: u32, session_op_trn: u32, frame_etb: u32, frame_op_trn: u32) -> bool {
    (frame_etb == 0 || frame_etb == session_etb) && (frame_op_trn == 0 || frame_op_trn == session_op_trn)
}
