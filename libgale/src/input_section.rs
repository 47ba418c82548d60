//! The section/subsection model. An input section is one structural section of an object file; a
//! subsection is an address-bounded slice of it that later stages can relocate independently.
//! Subsection boundaries come from the addresses of the file's section-defined symbols.

use crate::error::Result;
use crate::macho;
use anyhow::bail;
use anyhow::ensure;
use itertools::Itertools;
use macho_utils::macho::RelocInfo;
use macho_utils::macho::fixed_name;
use object::LittleEndian;
use std::ops::Range;

pub struct InputSection<'data> {
    pub(crate) header: &'data macho::MachSection,
    pub(crate) address: u64,
    pub(crate) size: u64,
    pub(crate) data: &'data [u8],

    /// Decoded relocation entries for this section, in file order.
    pub(crate) relocations: Vec<RelocInfo>,

    /// In ascending `input_address` order, with mutually disjoint address ranges that cover the
    /// section exactly.
    pub(crate) subsections: Vec<Subsection>,
}

/// An independently relocatable slice of a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subsection {
    pub(crate) input_address: u64,
    pub(crate) size: u64,

    /// Index and length of this subsection's run in the owning file's sorted unwind-record
    /// array.
    pub(crate) unwind_offset: u32,
    pub(crate) unwind_count: u32,
}

/// Identifies a subsection within its owning file: the section-slot index (0-based, in the
/// file's own section numbering) and the subsection's index within that section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsectionId {
    pub section: u32,
    pub subsection: u32,
}

impl<'data> InputSection<'data> {
    pub(crate) fn parse(data: &'data [u8], header: &'data macho::MachSection) -> Result<Self> {
        let address = header.addr.get(LittleEndian);
        let size = header.size.get(LittleEndian);

        let section_data = if is_zerofill(header.flags.get(LittleEndian)) {
            &[]
        } else {
            let offset = header.offset.get(LittleEndian) as usize;
            offset
                .checked_add(size as usize)
                .and_then(|end| data.get(offset..end))
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "section `{}` extends past the end of the file",
                        display_name(header)
                    )
                })?
        };

        Ok(Self {
            header,
            address,
            size,
            data: section_data,
            relocations: Vec::new(),
            subsections: Vec::new(),
        })
    }

    #[must_use]
    pub fn segment_name(&self) -> &'data [u8] {
        fixed_name(&self.header.segname)
    }

    #[must_use]
    pub fn section_name(&self) -> &'data [u8] {
        fixed_name(&self.header.sectname)
    }

    /// `segment,section`, lossily decoded for error messages.
    #[must_use]
    pub fn display_name(&self) -> String {
        display_name(self.header)
    }

    pub(crate) fn parse_relocations(&mut self, file_data: &'data [u8]) -> Result {
        let reloff = self.header.reloff.get(LittleEndian) as usize;
        let nreloc = self.header.nreloc.get(LittleEndian) as usize;
        if nreloc == 0 {
            return Ok(());
        }
        let Some(relocations) = macho::slice_at::<macho::Relocation>(file_data, reloff, nreloc)
        else {
            bail!(
                "section `{}`: relocation table extends past the end of the file",
                self.display_name()
            );
        };
        self.relocations = relocations
            .iter()
            .enumerate()
            .map(|(index, relocation)| {
                RelocInfo::parse(relocation).map_err(|error| {
                    error.context(format!(
                        "section `{}`: relocation {index}",
                        self.display_name()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    /// Splits the section at the supplied symbol addresses. Boundaries may arrive in any order
    /// and may repeat; an address outside the section is a structural error in the input.
    pub(crate) fn build_subsections(&mut self, symbol_addresses: Vec<u64>) -> Result {
        if self.size == 0 {
            return Ok(());
        }
        let end = self.address.checked_add(self.size).ok_or_else(|| {
            anyhow::anyhow!(
                "section `{}` address range overflows",
                self.display_name()
            )
        })?;
        for &address in &symbol_addresses {
            ensure!(
                (self.address..=end).contains(&address),
                "symbol address {address:#x} is outside section `{}`",
                self.display_name()
            );
        }

        let starts: Vec<u64> = std::iter::once(self.address)
            .chain(symbol_addresses)
            .filter(|address| *address < end)
            .sorted()
            .dedup()
            .collect();

        self.subsections = starts
            .iter()
            .enumerate()
            .map(|(index, &input_address)| Subsection {
                input_address,
                size: starts.get(index + 1).copied().unwrap_or(end) - input_address,
                unwind_offset: 0,
                unwind_count: 0,
            })
            .collect();
        Ok(())
    }

    /// Address-ordered lookup: the subsection whose range `address` falls in, identified by
    /// index. Addresses past the last subsection's start resolve to the last subsection.
    pub(crate) fn find_subsection(&self, address: u64) -> Option<u32> {
        let count = self
            .subsections
            .partition_point(|subsection| subsection.input_address <= address);
        count.checked_sub(1).map(|index| index as u32)
    }

    #[must_use]
    pub fn subsections(&self) -> &[Subsection] {
        &self.subsections
    }

    #[must_use]
    pub fn relocations(&self) -> &[RelocInfo] {
        &self.relocations
    }

    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    #[must_use]
    pub fn data(&self) -> &'data [u8] {
        self.data
    }
}

impl Subsection {
    #[must_use]
    pub fn input_address(&self) -> u64 {
        self.input_address
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The range of this subsection's records in the owning file's unwind-record array.
    #[must_use]
    pub fn unwind_range(&self) -> Range<usize> {
        let start = self.unwind_offset as usize;
        start..start + self.unwind_count as usize
    }
}

fn is_zerofill(flags: u32) -> bool {
    matches!(
        flags & object::macho::SECTION_TYPE,
        object::macho::S_ZEROFILL
            | object::macho::S_GB_ZEROFILL
            | object::macho::S_THREAD_LOCAL_ZEROFILL
    )
}

fn display_name(header: &macho::MachSection) -> String {
    format!(
        "{},{}",
        String::from_utf8_lossy(fixed_name(&header.segname)),
        String::from_utf8_lossy(fixed_name(&header.sectname))
    )
}
