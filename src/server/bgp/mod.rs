//! The index of BGP announcements seen by RIS.
//!
//! The [`AnnouncementIndex`] keeps the announcements from a RISwhois dump in
//! memory and finds the most specific ones for a set of resources. The
//! dumps themselves are parsed by [`riswhois::parse_data`].

pub use self::index::{AnnouncementIndex, MatchedEntries};

mod index;
pub mod riswhois;
