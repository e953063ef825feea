use bitflags::bitflags;

bitflags! {
    /// Tracks which parts of a [`Card`](crate::state::Card) header changed.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct CardFields: u8 {
        /// Owner, capacity, growable or locked.
        const META       = 1 << 0;
        const SLOT_COUNT = 1 << 1;
    }
}

bitflags! {
    /// Tracks which fields of the Slotable in one slot changed.
    ///
    /// `IDENTITY` means the occupant itself changed (different id, or the
    /// slot became empty / occupied); the other bits are then irrelevant.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct SlotFields: u8 {
        const IDENTITY      = 1 << 0;
        const LIFECYCLE     = 1 << 1;
        const TAGS          = 1 << 2;
        const CONTRIBUTIONS = 1 << 3;
        const CONTEXT       = 1 << 4;
    }
}
