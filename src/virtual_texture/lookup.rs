//! Logical-to-physical page indirection grid

use crate::quadtree::PageCoord;

/// Lookup value for cells with no resident page
pub const NO_PAGE: u32 = u32::MAX;

/// One physical slot index per finest-level cell.
///
/// Coarse pages cover `size x size` cells; finer resident pages overwrite
/// the cells they cover so a lookup always resolves to the finest page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageLookup {
    resolution: u32,
    cells: Vec<u32>,
}

impl PageLookup {
    pub fn new(max_depth: u32) -> Self {
        let resolution = 1u32 << max_depth;
        Self {
            resolution,
            cells: vec![NO_PAGE; (resolution * resolution) as usize],
        }
    }

    /// Cells per axis
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn cells(&self) -> &[u32] {
        &self.cells
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.cells)
    }

    pub fn get(&self, x: u32, y: u32) -> u32 {
        if x >= self.resolution || y >= self.resolution {
            return NO_PAGE;
        }
        self.cells[(y * self.resolution + x) as usize]
    }

    pub fn clear(&mut self) {
        self.cells.fill(NO_PAGE);
    }

    /// Point every cell of `page` at `slot`
    pub fn write(&mut self, page: PageCoord, slot: u32) {
        let x0 = page.start.x.min(self.resolution);
        let y0 = page.start.y.min(self.resolution);
        let x1 = (page.start.x + page.size).min(self.resolution);
        let y1 = (page.start.y + page.size).min(self.resolution);
        for y in y0..y1 {
            let row = (y * self.resolution) as usize;
            self.cells[row + x0 as usize..row + x1 as usize].fill(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::UVec2;

    #[test]
    fn test_fresh_lookup_is_empty() {
        let lookup = PageLookup::new(3);
        assert_eq!(lookup.resolution(), 8);
        assert!(lookup.cells().iter().all(|&c| c == NO_PAGE));
        assert_eq!(lookup.as_bytes().len(), 8 * 8 * 4);
    }

    #[test]
    fn test_write_covers_page_cells() {
        let mut lookup = PageLookup::new(3);
        lookup.write(PageCoord::new(UVec2::new(4, 0), 4), 7);
        assert_eq!(lookup.get(4, 0), 7);
        assert_eq!(lookup.get(7, 3), 7);
        assert_eq!(lookup.get(3, 0), NO_PAGE);
        assert_eq!(lookup.get(4, 4), NO_PAGE);
        assert_eq!(lookup.get(100, 0), NO_PAGE);
    }
}
