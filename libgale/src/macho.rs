//! Type aliases for the raw little-endian Mach-O structures we decode, plus bounds-checked reads
//! over a mapped byte buffer. All pointer-offset arithmetic from the input file goes through the
//! helpers here, so a truncated or inconsistent file surfaces as a decode error rather than an
//! out-of-bounds read.

use crate::error::Result;
use anyhow::anyhow;
use anyhow::ensure;
use object::LittleEndian;

pub(crate) type MachHeader = object::macho::MachHeader64<LittleEndian>;
pub(crate) type LoadCommand = object::macho::LoadCommand<LittleEndian>;
pub(crate) type SegmentCommand = object::macho::SegmentCommand64<LittleEndian>;
pub(crate) type MachSection = object::macho::Section64<LittleEndian>;
pub(crate) type SymtabCommand = object::macho::SymtabCommand<LittleEndian>;
pub(crate) type Nlist = object::macho::Nlist64<LittleEndian>;
pub(crate) type Relocation = object::macho::Relocation<LittleEndian>;

/// Reads a `T` at `offset`, or `None` if the read would extend past the end of `data`.
pub(crate) fn struct_at<T: object::Pod>(data: &[u8], offset: usize) -> Option<&T> {
    object::from_bytes(data.get(offset..)?).ok().map(|(v, _)| v)
}

/// Reads `count` consecutive `T`s at `offset`, or `None` if they would extend past the end of
/// `data`.
pub(crate) fn slice_at<T: object::Pod>(data: &[u8], offset: usize, count: usize) -> Option<&[T]> {
    object::slice_from_bytes(data.get(offset..)?, count)
        .ok()
        .map(|(v, _)| v)
}

/// A cursor over an object file's load-command stream. Commands are variable-length; each read
/// validates the declared `cmdsize` against the remaining buffer before handing out the command's
/// bytes.
pub(crate) struct CommandCursor<'data> {
    data: &'data [u8],
    offset: usize,
}

impl<'data> CommandCursor<'data> {
    pub(crate) fn new(data: &'data [u8], offset: usize) -> Self {
        Self { data, offset }
    }

    /// Returns the next command's `(kind, size)` prefix and its full body (prefix included),
    /// advancing past it. `index` is only used for error messages.
    pub(crate) fn command(&mut self, index: u32) -> Result<(&'data LoadCommand, &'data [u8])> {
        let command: &LoadCommand = struct_at(self.data, self.offset)
            .ok_or_else(|| anyhow!("load command {index} extends past the end of the file"))?;
        let size = command.cmdsize.get(LittleEndian) as usize;
        ensure!(
            size >= size_of::<LoadCommand>(),
            "load command {index} has impossible size {size}"
        );
        let end = self
            .offset
            .checked_add(size)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| anyhow!("load command {index} extends past the end of the file"))?;
        let body = &self.data[self.offset..end];
        self.offset = end;
        Ok((command, body))
    }
}
