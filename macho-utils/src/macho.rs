//! Helpers for working with the raw little-endian Mach-O layout. These sit below the parser
//! proper: nothing here allocates or interprets file structure beyond a single field or record.

use anyhow::Result;
use anyhow::bail;
use object::LittleEndian;
use object::U32Bytes;
use object::U64Bytes;
use object::macho;
use std::borrow::Cow;

/// Segment and section name of the compact-unwind section emitted by the compiler for the
/// linker's consumption.
pub const COMPACT_UNWIND_SEGMENT: &[u8] = b"__LD";
pub const COMPACT_UNWIND_SECTION: &[u8] = b"__compact_unwind";

/// One fixed-size entry of a `__LD,__compact_unwind` section. The `code_start`, `personality` and
/// `lsda` fields are placeholders that are patched via the section's relocation list rather than
/// read as stored, except that `lsda` doubles as the stored address for its own relocation.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct CompactUnwindEntry {
    pub code_start: U64Bytes<LittleEndian>,
    pub code_len: U32Bytes<LittleEndian>,
    pub encoding: U32Bytes<LittleEndian>,
    pub personality: U64Bytes<LittleEndian>,
    pub lsda: U64Bytes<LittleEndian>,
}

// Safety: repr(C), no padding and all fields are themselves plain bytes.
unsafe impl object::Pod for CompactUnwindEntry {}

const _ASSERTS: () = {
    assert!(size_of::<CompactUnwindEntry>() == 32);
};

/// A relocation entry with the packed `(r_word0, r_word1)` representation unpacked into named
/// fields. The `target` is still in the file's own convention: a 1-based section ordinal when
/// `is_extern` is false, a 0-based symbol-table index when it is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocInfo {
    /// Byte offset of the patched field within the relocated section.
    pub offset: u32,
    pub target: u32,
    pub is_pcrel: bool,
    /// Operand size as a power-of-two byte count, so 3 means an 8-byte field.
    pub size_pow2: u8,
    pub is_extern: bool,
    pub r_type: u8,
}

impl RelocInfo {
    /// Unpacks a raw relocation entry. Scattered relocations only occur for 32-bit
    /// architectures, which we don't link for, so they are rejected here.
    pub fn parse(relocation: &macho::Relocation<LittleEndian>) -> Result<RelocInfo> {
        let word0 = relocation.r_word0.get(LittleEndian);
        if word0 & macho::R_SCATTERED != 0 {
            bail!("scattered relocations are not supported");
        }
        let word1 = relocation.r_word1.get(LittleEndian);
        Ok(RelocInfo {
            offset: word0,
            target: word1 & 0x00ff_ffff,
            is_pcrel: (word1 >> 24) & 1 != 0,
            size_pow2: ((word1 >> 25) & 3) as u8,
            is_extern: (word1 >> 27) & 1 != 0,
            r_type: (word1 >> 28) as u8,
        })
    }
}

/// Returns a segment or section name from its fixed 16-byte field, without trailing NULs.
#[must_use]
pub fn fixed_name(raw: &[u8; 16]) -> &[u8] {
    let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    &raw[..len]
}

/// True for symbol-table entries that are debug (stab) entries rather than real symbols.
#[must_use]
pub fn is_stab(n_type: u8) -> bool {
    n_type & macho::N_STAB != 0
}

/// The `N_TYPE` bits of a symbol-table entry, e.g. `N_ABS` or `N_SECT`.
#[must_use]
pub fn symbol_type(n_type: u8) -> u8 {
    n_type & macho::N_TYPE
}

#[must_use]
pub fn is_extern(n_type: u8) -> bool {
    n_type & macho::N_EXT != 0
}

macro_rules! const_name_by_value {
    ($needle: expr, $( $const:ident ),*) => {
        match $needle {
            $(object::macho::$const => Some(stringify!($const)),)*
            _ => None
        }
    };
}

#[must_use]
pub fn load_command_name(cmd: u32) -> Cow<'static, str> {
    if let Some(name) = const_name_by_value![
        cmd,
        LC_SEGMENT,
        LC_SYMTAB,
        LC_DYSYMTAB,
        LC_LOAD_DYLIB,
        LC_ID_DYLIB,
        LC_LOAD_DYLINKER,
        LC_ID_DYLINKER,
        LC_ROUTINES,
        LC_SUB_FRAMEWORK,
        LC_SUB_UMBRELLA,
        LC_SUB_CLIENT,
        LC_SUB_LIBRARY,
        LC_TWOLEVEL_HINTS,
        LC_LOAD_WEAK_DYLIB,
        LC_SEGMENT_64,
        LC_ROUTINES_64,
        LC_UUID,
        LC_RPATH,
        LC_CODE_SIGNATURE,
        LC_SEGMENT_SPLIT_INFO,
        LC_REEXPORT_DYLIB,
        LC_LAZY_LOAD_DYLIB,
        LC_ENCRYPTION_INFO,
        LC_DYLD_INFO,
        LC_DYLD_INFO_ONLY,
        LC_LOAD_UPWARD_DYLIB,
        LC_VERSION_MIN_MACOSX,
        LC_VERSION_MIN_IPHONEOS,
        LC_FUNCTION_STARTS,
        LC_DYLD_ENVIRONMENT,
        LC_MAIN,
        LC_DATA_IN_CODE,
        LC_SOURCE_VERSION,
        LC_DYLIB_CODE_SIGN_DRS,
        LC_ENCRYPTION_INFO_64,
        LC_LINKER_OPTION,
        LC_LINKER_OPTIMIZATION_HINT,
        LC_VERSION_MIN_TVOS,
        LC_VERSION_MIN_WATCHOS,
        LC_NOTE,
        LC_BUILD_VERSION,
        LC_DYLD_EXPORTS_TRIE,
        LC_DYLD_CHAINED_FIXUPS,
        LC_FILESET_ENTRY
    ] {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("0x{cmd:x}"))
    }
}
