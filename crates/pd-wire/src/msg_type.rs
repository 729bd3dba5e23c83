/// The four telegram kinds the PD core understands. `Pd`/`Pp` are periodic
/// publish and PULL-reply variants of the same payload; `Pr` is a PULL
/// request; `Pe` is reserved for event-driven telegrams and is accepted on
/// the wire but never emitted by this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MsgType {
    Pd = 0x5064,
    Pp = 0x5070,
    Pr = 0x5072,
    Pe = 0x5065,
}

impl MsgType {
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for MsgType {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x5064 => Ok(MsgType::Pd),
            0x5070 => Ok(MsgType::Pp),
            0x5072 => Ok(MsgType::Pr),
            0x5065 => Ok(MsgType::Pe),
            _ => Err(()),
        }
    }
}
