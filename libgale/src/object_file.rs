//! Parsing of relocatable Mach-O object files: walking the load-command stream, building the
//! section/subsection tree, interning the local symbol list and decoding the
//! `__LD,__compact_unwind` section.

use crate::error::Result;
use crate::input_data::FileId;
use crate::input_data::InputBytes;
use crate::input_data::InputRef;
use crate::input_section::InputSection;
use crate::input_section::Subsection;
use crate::input_section::SubsectionId;
use crate::macho;
use crate::symbol_db::Symbol;
use crate::symbol_db::SymbolDb;
use anyhow::anyhow;
use anyhow::ensure;
use macho_utils::macho::COMPACT_UNWIND_SECTION;
use macho_utils::macho::COMPACT_UNWIND_SEGMENT;
use macho_utils::macho::CompactUnwindEntry;
use macho_utils::macho::RelocInfo;
use macho_utils::macho::fixed_name;
use macho_utils::macho::is_stab;
use macho_utils::macho::load_command_name;
use macho_utils::macho::symbol_type;
use object::LittleEndian;
use object::macho::LC_BUILD_VERSION;
use object::macho::LC_DYSYMTAB;
use object::macho::LC_SEGMENT_64;
use object::macho::LC_SYMTAB;
use object::macho::N_SECT;
use std::mem::offset_of;

pub struct ObjectFile<'data> {
    pub(crate) input: InputRef<'data>,
    pub(crate) data: &'data [u8],
    pub(crate) file_id: FileId,
    pub(crate) priority: u32,

    /// One slot per section of the input, preserving the file's section numbering. The captured
    /// `__LD,__compact_unwind` section occupies a slot but is not an ordinary section.
    pub(crate) sections: Vec<SectionSlot<'data>>,

    /// The raw symbol-table entries, index-parallel with `syms`.
    pub(crate) mach_syms: &'data [macho::Nlist],

    /// The interned symbol for each symbol-table entry, in table order.
    pub(crate) syms: Vec<&'data Symbol<'data>>,

    /// Decoded unwind records, grouped contiguously by owning subsection after parsing. Each
    /// subsection's `unwind_range` indexes into this.
    pub(crate) unwind_records: Vec<UnwindRecord<'data>>,
}

pub(crate) enum SectionSlot<'data> {
    Loaded(InputSection<'data>),
    CompactUnwind,
}

/// One `__compact_unwind` entry after its relocations have been applied.
pub struct UnwindRecord<'data> {
    /// The subsection containing the covered code range. Filled in by the entry's `code_start`
    /// relocation; an entry without one is a structural error.
    pub(crate) subsection: Option<SubsectionId>,
    pub(crate) offset: u64,
    pub(crate) code_len: u32,
    pub(crate) encoding: u32,
    pub(crate) personality: Option<&'data Symbol<'data>>,
    pub(crate) lsda: Option<SubsectionId>,
    pub(crate) lsda_offset: u64,
}

const ENTRY_SIZE: usize = size_of::<CompactUnwindEntry>();
const CODE_START_OFFSET: usize = offset_of!(CompactUnwindEntry, code_start);
const PERSONALITY_OFFSET: usize = offset_of!(CompactUnwindEntry, personality);
const LSDA_OFFSET: usize = offset_of!(CompactUnwindEntry, lsda);

impl<'data> ObjectFile<'data> {
    pub(crate) fn parse(
        input: &InputBytes<'data>,
        file_id: FileId,
        symbol_db: &SymbolDb<'data>,
    ) -> Result<ObjectFile<'data>> {
        let data = input.data;
        let header: &macho::MachHeader =
            macho::struct_at(data, 0).ok_or_else(|| anyhow!("truncated Mach-O header"))?;

        let mut object = ObjectFile {
            input: input.input.clone(),
            data,
            file_id,
            priority: input.priority,
            sections: Vec::new(),
            mach_syms: &[],
            syms: Vec::new(),
            unwind_records: Vec::new(),
        };

        let mut unwind_section = None;
        let mut cursor = macho::CommandCursor::new(data, size_of::<macho::MachHeader>());

        for index in 0..header.ncmds.get(LittleEndian) {
            let (command, body) = cursor.command(index)?;
            match command.cmd.get(LittleEndian) {
                LC_SEGMENT_64 => object.parse_segment(body, &mut unwind_section)?,
                LC_SYMTAB => object.parse_symtab(body, symbol_db)?,
                LC_DYSYMTAB | LC_BUILD_VERSION => {}
                other => crate::error::warning(&format!(
                    "{}: unknown load command: {}",
                    object.input,
                    load_command_name(other)
                )),
            }
        }

        object.split_subsections()?;
        object.parse_relocations()?;
        if let Some(section) = unwind_section {
            object.parse_compact_unwind(section)?;
        }

        Ok(object)
    }

    fn parse_segment(
        &mut self,
        body: &'data [u8],
        unwind_section: &mut Option<&'data macho::MachSection>,
    ) -> Result {
        let segment: &macho::SegmentCommand =
            macho::struct_at(body, 0).ok_or_else(|| anyhow!("segment command is too short"))?;
        let nsects = segment.nsects.get(LittleEndian) as usize;
        let headers: &[macho::MachSection] =
            macho::slice_at(body, size_of::<macho::SegmentCommand>(), nsects).ok_or_else(
                || anyhow!("segment section headers exceed the declared command size"),
            )?;

        for header in headers {
            if fixed_name(&header.segname) == COMPACT_UNWIND_SEGMENT
                && fixed_name(&header.sectname) == COMPACT_UNWIND_SECTION
            {
                ensure!(
                    unwind_section.is_none(),
                    "multiple `__LD,__compact_unwind` sections"
                );
                *unwind_section = Some(header);
                self.sections.push(SectionSlot::CompactUnwind);
            } else {
                self.sections
                    .push(SectionSlot::Loaded(InputSection::parse(self.data, header)?));
            }
        }
        Ok(())
    }

    fn parse_symtab(&mut self, body: &'data [u8], symbol_db: &SymbolDb<'data>) -> Result {
        let symtab: &macho::SymtabCommand =
            macho::struct_at(body, 0).ok_or_else(|| anyhow!("symtab command is too short"))?;
        let nsyms = symtab.nsyms.get(LittleEndian) as usize;

        self.mach_syms = macho::slice_at(self.data, symtab.symoff.get(LittleEndian) as usize, nsyms)
            .ok_or_else(|| anyhow!("symbol table extends past the end of the file"))?;

        let stroff = symtab.stroff.get(LittleEndian) as usize;
        let strings = stroff
            .checked_add(symtab.strsize.get(LittleEndian) as usize)
            .and_then(|end| self.data.get(stroff..end))
            .ok_or_else(|| anyhow!("string table extends past the end of the file"))?;

        self.syms.reserve(nsyms);
        for msym in self.mach_syms {
            let start = msym.n_strx.get(LittleEndian) as usize;
            let rest = strings.get(start..).ok_or_else(|| {
                anyhow!("symbol name offset {start:#x} is outside the string table")
            })?;
            let len = memchr::memchr(0, rest)
                .ok_or_else(|| anyhow!("unterminated symbol name in string table"))?;
            self.syms.push(symbol_db.intern(&rest[..len]));
        }
        Ok(())
    }

    /// Derives subsection boundaries from the addresses of section-defined, non-debug symbols.
    fn split_subsections(&mut self) -> Result {
        let mut boundaries = vec![Vec::new(); self.sections.len()];
        for msym in self.mach_syms {
            if is_stab(msym.n_type) || symbol_type(msym.n_type) != N_SECT {
                continue;
            }
            let ordinal = msym.n_sect as usize;
            let section_boundaries = ordinal
                .checked_sub(1)
                .and_then(|index| boundaries.get_mut(index))
                .ok_or_else(|| anyhow!("symbol section index {ordinal} is out of range"))?;
            section_boundaries.push(msym.n_value.get(LittleEndian));
        }

        for (slot, addresses) in self.sections.iter_mut().zip(boundaries) {
            match slot {
                SectionSlot::Loaded(section) => section.build_subsections(addresses)?,
                SectionSlot::CompactUnwind => {
                    ensure!(
                        addresses.is_empty(),
                        "symbol defined inside `__LD,__compact_unwind`"
                    );
                }
            }
        }
        Ok(())
    }

    fn parse_relocations(&mut self) -> Result {
        let data = self.data;
        for slot in &mut self.sections {
            if let SectionSlot::Loaded(section) = slot {
                section.parse_relocations(data)?;
            }
        }
        Ok(())
    }

    /// Decodes the captured unwind section: a fixed-layout record array whose `code_start`,
    /// `personality` and `lsda` fields are patched from the section's own relocation list. The
    /// two-pass decode-then-associate shape is forced on us: which subsection a record belongs
    /// to isn't known until its `code_start` relocation has been seen, and relocations arrive in
    /// arbitrary order.
    fn parse_compact_unwind(&mut self, header: &'data macho::MachSection) -> Result {
        let size = header.size.get(LittleEndian) as usize;
        ensure!(
            size % ENTRY_SIZE == 0,
            "__compact_unwind: invalid section size {size}"
        );

        let entries: &[CompactUnwindEntry] = macho::slice_at(
            self.data,
            header.offset.get(LittleEndian) as usize,
            size / ENTRY_SIZE,
        )
        .ok_or_else(|| anyhow!("__compact_unwind: contents extend past the end of the file"))?;

        let mut records: Vec<UnwindRecord<'data>> = entries
            .iter()
            .map(|entry| UnwindRecord {
                subsection: None,
                offset: 0,
                code_len: entry.code_len.get(LittleEndian),
                encoding: entry.encoding.get(LittleEndian),
                personality: None,
                lsda: None,
                lsda_offset: 0,
            })
            .collect();

        let relocations: &[macho::Relocation] = macho::slice_at(
            self.data,
            header.reloff.get(LittleEndian) as usize,
            header.nreloc.get(LittleEndian) as usize,
        )
        .ok_or_else(|| {
            anyhow!("__compact_unwind: relocation table extends past the end of the file")
        })?;

        for (index, relocation) in relocations.iter().enumerate() {
            let info = RelocInfo::parse(relocation)
                .map_err(|error| error.context(format!("__compact_unwind: relocation {index}")))?;
            let offset = info.offset as usize;
            ensure!(
                offset < size,
                "__compact_unwind: relocation offset too large: {index}"
            );

            let entry = &entries[offset / ENTRY_SIZE];
            let record = &mut records[offset / ENTRY_SIZE];
            let unsupported =
                || anyhow!("__compact_unwind: unsupported relocation: {index}");

            match offset % ENTRY_SIZE {
                CODE_START_OFFSET => {
                    if info.is_pcrel || info.size_pow2 != 3 || info.is_extern || info.r_type != 0 {
                        return Err(unsupported());
                    }
                    let address = entry.code_start.get(LittleEndian);
                    let (subsection, within) = self
                        .resolve_section_address(info.target, address)
                        .ok_or_else(unsupported)?;
                    record.subsection = Some(subsection);
                    record.offset = within;
                }
                PERSONALITY_OFFSET => {
                    if info.is_pcrel || info.size_pow2 != 3 || !info.is_extern || info.r_type != 0 {
                        return Err(unsupported());
                    }
                    record.personality = Some(
                        *self
                            .syms
                            .get(info.target as usize)
                            .ok_or_else(unsupported)?,
                    );
                }
                LSDA_OFFSET => {
                    if info.is_pcrel || info.size_pow2 != 3 || info.is_extern || info.r_type != 0 {
                        return Err(unsupported());
                    }
                    let address = entry.lsda.get(LittleEndian);
                    let (subsection, within) = self
                        .resolve_section_address(info.target, address)
                        .ok_or_else(unsupported)?;
                    record.lsda = Some(subsection);
                    record.lsda_offset = within;
                }
                _ => return Err(unsupported()),
            }
        }

        for (index, record) in records.iter().enumerate() {
            ensure!(
                record.subsection.is_some(),
                "__compact_unwind: missing code_start relocation for record {index}"
            );
        }

        // Relocations arrive in arbitrary order, so sort the records into a canonical,
        // file-independent order before grouping. The sort is stable.
        records.sort_by_key(|record| {
            (
                self.subsection(record.subsection.unwrap()).input_address,
                record.offset,
            )
        });

        // Associate each subsection with its contiguous run of records.
        let mut start = 0;
        while start < records.len() {
            let subsection = records[start].subsection;
            let mut end = start + 1;
            while end < records.len() && records[end].subsection == subsection {
                end += 1;
            }
            let subsection = self.subsection_mut(subsection.unwrap());
            subsection.unwind_offset = start as u32;
            subsection.unwind_count = (end - start) as u32;
            start = end;
        }

        self.unwind_records = records;
        Ok(())
    }

    /// Resolves an address within the section named by a relocation or symbol-table entry to a
    /// subsection plus the offset within it. Section ordinals in the file are 1-based; the
    /// conversion to 0-based happens here, at the decode boundary.
    pub(crate) fn resolve_section_address(
        &self,
        ordinal: u32,
        address: u64,
    ) -> Option<(SubsectionId, u64)> {
        let section_index = (ordinal as usize).checked_sub(1)?;
        let SectionSlot::Loaded(section) = self.sections.get(section_index)? else {
            return None;
        };
        let subsection = section.find_subsection(address)?;
        let within = address - section.subsections[subsection as usize].input_address;
        Some((
            SubsectionId {
                section: section_index as u32,
                subsection,
            },
            within,
        ))
    }

    pub(crate) fn subsection(&self, id: SubsectionId) -> &Subsection {
        let SectionSlot::Loaded(section) = &self.sections[id.section as usize] else {
            unreachable!("SubsectionId refers to a non-loaded section");
        };
        &section.subsections[id.subsection as usize]
    }

    fn subsection_mut(&mut self, id: SubsectionId) -> &mut Subsection {
        let SectionSlot::Loaded(section) = &mut self.sections[id.section as usize] else {
            unreachable!("SubsectionId refers to a non-loaded section");
        };
        &mut section.subsections[id.subsection as usize]
    }

    /// The ordinary sections of the file, in section-numbering order. The captured unwind
    /// section is not included.
    pub fn sections(&self) -> impl Iterator<Item = &InputSection<'data>> {
        self.sections.iter().filter_map(|slot| match slot {
            SectionSlot::Loaded(section) => Some(section),
            SectionSlot::CompactUnwind => None,
        })
    }

    #[must_use]
    pub fn unwind_records(&self) -> &[UnwindRecord<'data>] {
        &self.unwind_records
    }

    #[must_use]
    pub fn symbols(&self) -> &[&'data Symbol<'data>] {
        &self.syms
    }

    #[must_use]
    pub fn file_id(&self) -> FileId {
        self.file_id
    }
}

impl<'data> UnwindRecord<'data> {
    #[must_use]
    pub fn subsection(&self) -> SubsectionId {
        self.subsection
            .expect("set during parsing or the file would have been rejected")
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub fn code_len(&self) -> u32 {
        self.code_len
    }

    #[must_use]
    pub fn encoding(&self) -> u32 {
        self.encoding
    }

    #[must_use]
    pub fn personality(&self) -> Option<&'data Symbol<'data>> {
        self.personality
    }

    #[must_use]
    pub fn lsda(&self) -> Option<(SubsectionId, u64)> {
        self.lsda.map(|subsection| (subsection, self.lsda_offset))
    }
}

impl std::fmt::Display for ObjectFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.input, f)
    }
}
