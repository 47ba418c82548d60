//! Dynamic-library inputs. At link time these are almost always textual stubs (`.tbd`) rather
//! than the compiled library; the stub gives us everything resolution needs - the export-name
//! list and the install name.

use crate::error::Result;
use crate::file_kind::FileKind;
use crate::input_data::FileId;
use crate::input_data::InputBytes;
use crate::input_data::InputRef;
use crate::symbol_db::Symbol;
use crate::symbol_db::SymbolDb;
use crate::tapi;
use anyhow::bail;

pub struct DylibFile<'data> {
    pub(crate) input: InputRef<'data>,
    pub(crate) file_id: FileId,
    pub(crate) priority: u32,
    pub(crate) install_name: &'data str,

    /// The interned symbol for each exported name.
    pub(crate) syms: Vec<&'data Symbol<'data>>,
}

impl<'data> DylibFile<'data> {
    pub(crate) fn parse(
        input: &InputBytes<'data>,
        file_id: FileId,
        symbol_db: &SymbolDb<'data>,
    ) -> Result<DylibFile<'data>> {
        match input.kind {
            FileKind::Tapi => {
                let stub = tapi::parse_tbd(input.data)?;
                let syms = stub
                    .exports
                    .iter()
                    .map(|name| symbol_db.intern(name.as_bytes()))
                    .collect();
                Ok(DylibFile {
                    input: input.input.clone(),
                    file_id,
                    priority: input.priority,
                    install_name: stub.install_name,
                    syms,
                })
            }
            FileKind::MachDylib => {
                bail!("compiled dylibs are not supported yet; link against the .tbd stub instead")
            }
            _ => bail!("not a dylib"),
        }
    }

    #[must_use]
    pub fn install_name(&self) -> &'data str {
        self.install_name
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

impl std::fmt::Display for DylibFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.input, f)
    }
}
