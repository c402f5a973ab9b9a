//! Virtual texture: a page table over a fixed pool of physical texture slots

pub mod format;
pub mod lookup;
pub mod page_table;

pub use format::{PageLayout, TextureChannel};
pub use lookup::{PageLookup, NO_PAGE};
pub use page_table::{
    default_capacity, CombinePlan, PageEntry, PageTableStats, SlotState, VirtualTexture,
    MAX_PHYSICAL_SLOTS,
};
