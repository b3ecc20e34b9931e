use kiln_primitives::buf::Buf32;

/// The finalized execution block as reported by consensus.  Either form is
/// resolved to a full header before a cycle uses it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FinalizedRef {
    Hash(Buf32),
    Number(u64),
}
