//! Code for identifying what sort of file we're dealing with based on the bytes of the file.

use crate::error::Result;
use crate::macho;
use anyhow::bail;
use object::LittleEndian;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum FileKind {
    MachObject,
    MachDylib,
    /// A textual dynamic-library stub (`.tbd`).
    Tapi,
    Archive,
}

impl FileKind {
    pub(crate) fn identify_bytes(bytes: &[u8]) -> Result<FileKind> {
        if bytes.starts_with(&object::archive::MAGIC) {
            Ok(FileKind::Archive)
        } else if bytes.starts_with(&object::macho::MH_MAGIC_64.to_le_bytes()) {
            let Some(header) = macho::struct_at::<macho::MachHeader>(bytes, 0) else {
                bail!("Invalid Mach-O file");
            };
            match header.filetype.get(LittleEndian) {
                object::macho::MH_OBJECT => Ok(FileKind::MachObject),
                object::macho::MH_DYLIB => Ok(FileKind::MachDylib),
                t => bail!("Unsupported Mach-O file type {t}"),
            }
        } else if bytes.starts_with(&object::macho::MH_MAGIC.to_le_bytes()) {
            bail!("Only 64 bit Mach-O is currently supported");
        } else if bytes.starts_with(&object::macho::MH_CIGAM_64.to_le_bytes()) {
            bail!("Only little endian Mach-O is currently supported");
        } else if bytes.starts_with(&object::macho::FAT_MAGIC.to_be_bytes())
            || bytes.starts_with(&object::macho::FAT_MAGIC_64.to_be_bytes())
        {
            bail!("Fat Mach-O binaries are not supported; pass a single-architecture slice");
        } else if bytes.starts_with(b"--- !tapi-tbd") {
            Ok(FileKind::Tapi)
        } else {
            bail!("Couldn't identify file type");
        }
    }
}
