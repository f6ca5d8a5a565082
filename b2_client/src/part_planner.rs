use b2_types::MAX_PART_COUNT;

use crate::error::UploadErrorReason;

/// One contiguous byte range of a large file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSpec {
    /// Numbered from 1.
    pub part_number: u32,
    pub offset: u64,
    pub length: u64,
}

/// How a large file is cut into parts. Computed before any request is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPlan {
    pub part_size: u64,
    pub parts: Vec<PartSpec>,
}

impl PartPlan {
    /// Plans parts of `recommended_part_size` bytes, never smaller than `absolute_minimum_part_size`
    /// and grown as needed to stay within [`MAX_PART_COUNT`] parts.
    ///
    /// A file that fits in a single such part is split into two halves instead. The first part
    /// never drops below the absolute minimum and only the last may be smaller, so a file no
    /// larger than the absolute minimum has no valid plan.
    pub fn new(size: u64, recommended_part_size: u64, absolute_minimum_part_size: u64) -> Result<Self, UploadErrorReason> {
        let minimum = absolute_minimum_part_size.max(1);
        let mut part_size = recommended_part_size.max(minimum);

        if size <= part_size {
            part_size = size.div_ceil(2).max(minimum);
        } else if size.div_ceil(part_size) > MAX_PART_COUNT {
            part_size = size.div_ceil(MAX_PART_COUNT);
        }

        let plan = Self::with_part_size(size, part_size);
        if plan.parts.len() < 2 {
            return Err(UploadErrorReason::TooSmallForParts {
                size,
                minimum_part_size: minimum,
            });
        }
        Ok(plan)
    }

    fn with_part_size(size: u64, part_size: u64) -> Self {
        let mut parts = Vec::with_capacity(size.div_ceil(part_size) as usize);
        let mut offset = 0;
        while offset < size {
            let length = part_size.min(size - offset);
            parts.push(PartSpec {
                part_number: parts.len() as u32 + 1,
                offset,
                length,
            });
            offset += length;
        }
        Self { part_size, parts }
    }

    pub fn total_size(&self) -> u64 {
        self.parts.iter().map(|p| p.length).sum()
    }
}
