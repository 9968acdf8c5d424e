use std::cell::Cell;

use super::{ConstantData, GPUError, PushConstantInfo, Result};

#[derive(Debug, Clone)]
pub(crate) enum ConstantStorage<'a> {
    Owned(Vec<u8>),
    Borrowed(&'a [Cell<u8>]),
}

/// One resolved push-constant range.
#[derive(Debug, Clone)]
pub struct PushConstant<'a> {
    offset: u32,
    size: u32,
    storage: ConstantStorage<'a>,
}

impl<'a> PushConstant<'a> {
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self.storage, ConstantStorage::Borrowed(_))
    }

    /// Current contents. Borrowed constants are read at call time.
    pub fn bytes(&self) -> Vec<u8> {
        match &self.storage {
            ConstantStorage::Owned(v) => v.clone(),
            ConstantStorage::Borrowed(cells) => cells.iter().map(Cell::get).collect(),
        }
    }
}

/// Push constants packed back to back in declaration order.
#[derive(Debug, Clone, Default)]
pub struct PushConstantLayout<'a> {
    constants: Vec<PushConstant<'a>>,
    total_size: u32,
}

impl<'a> PushConstantLayout<'a> {
    pub fn new(infos: &[PushConstantInfo<'a>]) -> Result<Self> {
        let mut constants = Vec::with_capacity(infos.len());
        let mut offset: u32 = 0;
        for info in infos {
            if info.data.is_empty() {
                return Err(GPUError::InvalidArgument("push constant has zero size"));
            }
            // Vulkan requires push-constant offsets and sizes to be multiples of 4.
            if info.data.len() % 4 != 0 {
                return Err(GPUError::InvalidArgument(
                    "push constant size is not a multiple of 4 bytes",
                ));
            }
            let size = u32::try_from(info.data.len())
                .map_err(|_| GPUError::InvalidArgument("push constant is too large"))?;
            let storage = match &info.data {
                ConstantData::Owned(data) => ConstantStorage::Owned(data.clone()),
                ConstantData::Borrowed(cells) => ConstantStorage::Borrowed(*cells),
            };
            constants.push(PushConstant {
                offset,
                size,
                storage,
            });
            offset = offset
                .checked_add(size)
                .ok_or(GPUError::InvalidArgument("push constants are too large"))?;
        }

        Ok(Self {
            constants,
            total_size: offset,
        })
    }

    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PushConstant<'a>> {
        self.constants.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_prefix_sums() {
        let a = [0u8; 4];
        let b = [0u8; 12];
        let c = [0u8; 8];
        let layout = PushConstantLayout::new(&[
            PushConstantInfo::owned(&a),
            PushConstantInfo::owned(&b),
            PushConstantInfo::owned(&c),
        ])
        .unwrap();

        let offsets: Vec<u32> = layout.iter().map(|c| c.offset()).collect();
        assert_eq!(offsets, vec![0, 4, 16]);
        assert_eq!(layout.total_size(), 24);
    }

    #[test]
    fn ranges_do_not_overlap() {
        let sizes = [4usize, 8, 4, 16, 4];
        let buffers: Vec<Vec<u8>> = sizes.iter().map(|s| vec![0u8; *s]).collect();
        let infos: Vec<PushConstantInfo> =
            buffers.iter().map(|b| PushConstantInfo::owned(b)).collect();
        let layout = PushConstantLayout::new(&infos).unwrap();

        let ranges: Vec<(u32, u32)> = layout.iter().map(|c| (c.offset(), c.size())).collect();
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].0 + pair[0].1, pair[1].0);
        }
    }

    #[test]
    fn owned_data_is_copied() {
        let mut data = vec![1u8, 2, 3, 4];
        let layout = PushConstantLayout::new(&[PushConstantInfo::owned(&data)]).unwrap();
        data[0] = 9;
        let first = layout.iter().next().unwrap();
        assert!(!first.is_borrowed());
        assert_eq!(first.bytes(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn borrowed_data_is_read_live() {
        let mut raw = [0u8; 4];
        let cells = Cell::from_mut(&mut raw[..]).as_slice_of_cells();
        let layout = PushConstantLayout::new(&[PushConstantInfo::borrowed(cells)]).unwrap();

        cells[2].set(7);
        let first = layout.iter().next().unwrap();
        assert!(first.is_borrowed());
        assert_eq!(first.bytes(), vec![0, 0, 7, 0]);
    }

    #[test]
    fn zero_sized_constant_is_rejected() {
        let empty: [u8; 0] = [];
        let res = PushConstantLayout::new(&[PushConstantInfo::owned(&empty)]);
        assert!(matches!(res, Err(GPUError::InvalidArgument(_))));
    }

    #[test]
    fn unaligned_sizes_are_rejected() {
        let short = [0u8; 2];
        let word = [0u8; 4];
        let res = PushConstantLayout::new(&[
            PushConstantInfo::owned(&short),
            PushConstantInfo::owned(&word),
        ]);
        assert!(matches!(res, Err(GPUError::InvalidArgument(_))));

        let odd = [0u8; 6];
        let res = PushConstantLayout::new(&[PushConstantInfo::owned(&odd)]);
        assert!(matches!(res, Err(GPUError::InvalidArgument(_))));
    }

    #[test]
    fn empty_layout() {
        let layout = PushConstantLayout::new(&[]).unwrap();
        assert!(layout.is_empty());
        assert_eq!(layout.total_size(), 0);
    }
}
