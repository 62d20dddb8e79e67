use bitflags::bitflags;

/******************************
 *
 * Status Flags
 *
 ******************************/

pub type StatusFlagsType = u32;

bitflags! {
    /// Conditions accumulated across a call.
    ///
    /// Operations that keep going after a local failure (draining a tree,
    /// processing a whole DACS) report everything they ran into here, while
    /// their return value only carries the first failure.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusFlags: StatusFlagsType {
        /// The system clock could not be read, timeouts were skipped.
        const UNRELIABLE_TIME = 0x0004;
        /// A bundle was discarded before being acknowledged.
        const DROPPED = 0x0008;
        /// The storage collaborator reported a failure.
        const STORE_FAILURE = 0x0080;
        /// A DACS acknowledged a custody id that is not active.
        const UNKNOWN_CID = 0x0100;
        const SDNV_OVERFLOW = 0x0200;
        const SDNV_INCOMPLETE = 0x0400;
        /// The active table had no room for the next custody id.
        const ACTIVE_TABLE_WRAP = 0x0800;
        /// A custody id was received more than once.
        const DUPLICATES = 0x1000;
        /// The custody tree filled up and was flushed early.
        const RBTREE_FULL = 0x2000;
        /// An unrecognized administrative record was received.
        const UNKNOWN_REC = 0x4000;
        /// A caller supplied invalid arguments.
        const API_ERROR = 0x8000;
    }
}

impl StatusFlags {
    /// Flags describing a given error, used when a failure is folded into
    /// the accumulated mask.
    pub fn for_error(err: &crate::Error) -> StatusFlags {
        use crate::Error;
        match err {
            Error::StoreFailure(_) => StatusFlags::STORE_FAILURE,
            Error::UnreliableTime => StatusFlags::UNRELIABLE_TIME,
            Error::SdnvOverflow => StatusFlags::SDNV_OVERFLOW,
            Error::SdnvIncomplete => StatusFlags::SDNV_INCOMPLETE,
            Error::UnknownRecord(_) => StatusFlags::UNKNOWN_REC,
            Error::Duplicate => StatusFlags::DUPLICATES,
            Error::ParamError(_) => StatusFlags::API_ERROR,
            _ => StatusFlags::empty(),
        }
    }
}
