//! Parses input files in parallel. Each input becomes a `ParsedInput` - an object file or a
//! dylib stub - with symbols interned as a side effect. Parsing itself shares no mutable state
//! between files beyond the symbol-interning table.

use crate::dylib::DylibFile;
use crate::error::Context as _;
use crate::error::Result;
use crate::file_kind::FileKind;
use crate::input_data::FileId;
use crate::input_data::InputBytes;
use crate::input_data::InputRef;
use crate::object_file::ObjectFile;
use crate::symbol_db::SymbolDb;
use anyhow::bail;
use rayon::iter::IndexedParallelIterator;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;

/// One parsed input. Shared fields (provenance, priority) live in the variants' common
/// accessors; variant-specific data stays in the respective arm.
pub enum ParsedInput<'data> {
    Object(ObjectFile<'data>),
    Dylib(DylibFile<'data>),
}

#[tracing::instrument(skip_all, name = "Parse input files")]
pub(crate) fn parse_input_files<'data>(
    inputs: &[InputBytes<'data>],
    symbol_db: &SymbolDb<'data>,
) -> Result<Vec<ParsedInput<'data>>> {
    inputs
        .par_iter()
        .enumerate()
        .map(|(index, input)| {
            let file_id = FileId::new(index as u32);
            match input.kind {
                FileKind::MachObject => Ok(ParsedInput::Object(
                    ObjectFile::parse(input, file_id, symbol_db).with_context(|| {
                        format!("Failed to parse object file `{}`", input.input)
                    })?,
                )),
                FileKind::MachDylib | FileKind::Tapi => Ok(ParsedInput::Dylib(
                    DylibFile::parse(input, file_id, symbol_db)
                        .with_context(|| format!("Failed to parse dylib `{}`", input.input))?,
                )),
                FileKind::Archive => bail!(
                    "`{}`: archives must be split into members by the archive layer",
                    input.input
                ),
            }
        })
        .collect()
}

impl<'data> ParsedInput<'data> {
    #[must_use]
    pub fn input(&self) -> &InputRef<'data> {
        match self {
            ParsedInput::Object(object) => &object.input,
            ParsedInput::Dylib(dylib) => &dylib.input,
        }
    }

    #[must_use]
    pub fn file_id(&self) -> FileId {
        match self {
            ParsedInput::Object(object) => object.file_id,
            ParsedInput::Dylib(dylib) => dylib.file_id,
        }
    }

    #[must_use]
    pub fn priority(&self) -> u32 {
        match self {
            ParsedInput::Object(object) => object.priority,
            ParsedInput::Dylib(dylib) => dylib.priority,
        }
    }

    #[must_use]
    pub fn is_dylib(&self) -> bool {
        matches!(self, ParsedInput::Dylib(_))
    }
}

impl std::fmt::Display for ParsedInput<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self.input(), f)
    }
}
