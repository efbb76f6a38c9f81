pub mod arena;
pub mod bitmap;
pub mod free_list;
pub mod layout;
pub mod size_class;

pub use arena::Arena;
pub use layout::{ArenaHeader, ArenaLayout, ZoneStatistics};
