//! Builders for synthetic Mach-O object files. Tests emit the raw little-endian layout directly
//! so that nothing here shares code with the parser under test.

use crate::file_kind::FileKind;
use crate::input_data::InputBytes;
use crate::input_data::InputFile;
use crate::input_data::InputRef;
use object::macho::CPU_TYPE_X86_64;
use object::macho::LC_SEGMENT_64;
use object::macho::LC_SYMTAB;
use object::macho::MH_MAGIC_64;
use object::macho::MH_OBJECT;

const HEADER_SIZE: usize = 32;
const SEGMENT_COMMAND_SIZE: usize = 72;
const SECTION_HEADER_SIZE: usize = 80;
const SYMTAB_COMMAND_SIZE: usize = 24;
const NLIST_SIZE: usize = 16;
const RELOCATION_SIZE: usize = 8;

#[derive(Default)]
pub(crate) struct TestObject {
    pub(crate) sections: Vec<TestSection>,
    pub(crate) symbols: Vec<TestSymbol>,

    /// Extra `(cmd, payload)` load commands appended after the segment and symtab commands. The
    /// payload excludes the 8-byte command prefix.
    pub(crate) extra_commands: Vec<(u32, Vec<u8>)>,
}

pub(crate) struct TestSection {
    pub(crate) segname: &'static str,
    pub(crate) sectname: &'static str,
    pub(crate) addr: u64,
    pub(crate) data: Vec<u8>,
    pub(crate) relocs: Vec<TestReloc>,
}

pub(crate) struct TestReloc {
    pub(crate) offset: u32,
    pub(crate) target: u32,
    pub(crate) pcrel: bool,
    pub(crate) length: u8,
    pub(crate) is_extern: bool,
    pub(crate) r_type: u8,
}

pub(crate) struct TestSymbol {
    pub(crate) name: &'static str,
    pub(crate) n_type: u8,
    pub(crate) n_sect: u8,
    pub(crate) value: u64,
}

impl TestSection {
    pub(crate) fn text(addr: u64, data: Vec<u8>) -> TestSection {
        TestSection {
            segname: "__TEXT",
            sectname: "__text",
            addr,
            data,
            relocs: Vec::new(),
        }
    }

    pub(crate) fn compact_unwind(data: Vec<u8>, relocs: Vec<TestReloc>) -> TestSection {
        TestSection {
            segname: "__LD",
            sectname: "__compact_unwind",
            addr: 0,
            data,
            relocs,
        }
    }
}

impl TestReloc {
    /// A section-relative 8-byte relocation, as emitted for `code_start` and `lsda` fields.
    pub(crate) fn section(offset: u32, section_ordinal: u32) -> TestReloc {
        TestReloc {
            offset,
            target: section_ordinal,
            pcrel: false,
            length: 3,
            is_extern: false,
            r_type: 0,
        }
    }

    /// A symbol-relative 8-byte relocation, as emitted for `personality` fields.
    pub(crate) fn symbol(offset: u32, symbol_index: u32) -> TestReloc {
        TestReloc {
            offset,
            target: symbol_index,
            pcrel: false,
            length: 3,
            is_extern: true,
            r_type: 0,
        }
    }
}

impl TestObject {
    pub(crate) fn build(&self) -> Vec<u8> {
        let nsects = self.sections.len();
        let segment_cmdsize = SEGMENT_COMMAND_SIZE + SECTION_HEADER_SIZE * nsects;
        let extra_cmdsize: usize = self.extra_commands.iter().map(|(_, p)| 8 + p.len()).sum();
        let sizeofcmds = segment_cmdsize + SYMTAB_COMMAND_SIZE + extra_cmdsize;

        let mut offset = HEADER_SIZE + sizeofcmds;
        let section_offsets: Vec<usize> = self
            .sections
            .iter()
            .map(|section| {
                let this = offset;
                offset += section.data.len();
                this
            })
            .collect();
        let reloc_offsets: Vec<usize> = self
            .sections
            .iter()
            .map(|section| {
                let this = offset;
                offset += RELOCATION_SIZE * section.relocs.len();
                this
            })
            .collect();
        let symoff = offset;
        let stroff = symoff + NLIST_SIZE * self.symbols.len();

        let mut strtab = vec![0u8];
        let string_offsets: Vec<u32> = self
            .symbols
            .iter()
            .map(|symbol| {
                let this = strtab.len() as u32;
                strtab.extend_from_slice(symbol.name.as_bytes());
                strtab.push(0);
                this
            })
            .collect();

        let mut out = Vec::new();

        // Header.
        push_u32(&mut out, MH_MAGIC_64);
        push_u32(&mut out, CPU_TYPE_X86_64);
        push_u32(&mut out, 3);
        push_u32(&mut out, MH_OBJECT);
        push_u32(&mut out, 2 + self.extra_commands.len() as u32);
        push_u32(&mut out, sizeofcmds as u32);
        push_u32(&mut out, 0);
        push_u32(&mut out, 0);

        // Segment command with all sections.
        push_u32(&mut out, LC_SEGMENT_64);
        push_u32(&mut out, segment_cmdsize as u32);
        push_fixed_name(&mut out, "");
        push_u64(&mut out, 0); // vmaddr
        push_u64(&mut out, 0); // vmsize
        push_u64(&mut out, 0); // fileoff
        push_u64(&mut out, 0); // filesize
        push_u32(&mut out, 7); // maxprot
        push_u32(&mut out, 7); // initprot
        push_u32(&mut out, nsects as u32);
        push_u32(&mut out, 0); // flags

        for (index, section) in self.sections.iter().enumerate() {
            push_fixed_name(&mut out, section.sectname);
            push_fixed_name(&mut out, section.segname);
            push_u64(&mut out, section.addr);
            push_u64(&mut out, section.data.len() as u64);
            push_u32(&mut out, section_offsets[index] as u32);
            push_u32(&mut out, 0); // align
            push_u32(&mut out, reloc_offsets[index] as u32);
            push_u32(&mut out, section.relocs.len() as u32);
            push_u32(&mut out, 0); // flags
            push_u32(&mut out, 0);
            push_u32(&mut out, 0);
            push_u32(&mut out, 0);
        }

        // Symtab command.
        push_u32(&mut out, LC_SYMTAB);
        push_u32(&mut out, SYMTAB_COMMAND_SIZE as u32);
        push_u32(&mut out, symoff as u32);
        push_u32(&mut out, self.symbols.len() as u32);
        push_u32(&mut out, stroff as u32);
        push_u32(&mut out, strtab.len() as u32);

        for (cmd, payload) in &self.extra_commands {
            push_u32(&mut out, *cmd);
            push_u32(&mut out, (8 + payload.len()) as u32);
            out.extend_from_slice(payload);
        }

        for section in &self.sections {
            out.extend_from_slice(&section.data);
        }
        for section in &self.sections {
            for reloc in &section.relocs {
                push_u32(&mut out, reloc.offset);
                let mut word1 = reloc.target & 0x00ff_ffff;
                word1 |= u32::from(reloc.pcrel) << 24;
                word1 |= u32::from(reloc.length & 3) << 25;
                word1 |= u32::from(reloc.is_extern) << 27;
                word1 |= u32::from(reloc.r_type) << 28;
                push_u32(&mut out, word1);
            }
        }
        for (index, symbol) in self.symbols.iter().enumerate() {
            push_u32(&mut out, string_offsets[index]);
            out.push(symbol.n_type);
            out.push(symbol.n_sect);
            push_u16(&mut out, 0);
            push_u64(&mut out, symbol.value);
        }
        out.extend_from_slice(&strtab);

        out
    }
}

/// One raw 32-byte compact-unwind entry.
pub(crate) fn unwind_entry(
    code_start: u64,
    code_len: u32,
    encoding: u32,
    personality: u64,
    lsda: u64,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    push_u64(&mut out, code_start);
    push_u32(&mut out, code_len);
    push_u32(&mut out, encoding);
    push_u64(&mut out, personality);
    push_u64(&mut out, lsda);
    out
}

pub(crate) fn input<'data>(
    file: &'data InputFile,
    data: &'data [u8],
    priority: u32,
) -> InputBytes<'data> {
    InputBytes {
        input: InputRef { file, member: None },
        kind: FileKind::identify_bytes(data).unwrap(),
        data,
        priority,
    }
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_fixed_name(out: &mut Vec<u8>, name: &str) {
    let mut fixed = [0u8; 16];
    fixed[..name.len()].copy_from_slice(name.as_bytes());
    out.extend_from_slice(&fixed);
}
