use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub mod config;
pub(crate) mod dylib;
pub mod error;
pub(crate) mod file_kind;
pub(crate) mod hash;
pub(crate) mod input_data;
pub(crate) mod input_section;
pub(crate) mod macho;
pub(crate) mod object_file;
pub(crate) mod parsing;
pub(crate) mod resolution;
pub(crate) mod symbol;
pub(crate) mod symbol_db;
pub(crate) mod tapi;
#[cfg(test)]
pub(crate) mod test_utils;

pub use bumpalo_herd::Herd;
pub use config::Config;
pub use dylib::DylibFile;
pub use input_data::FileId;
pub use input_data::InputBytes;
pub use input_data::InputData;
pub use input_data::InputFile;
pub use input_data::InputRef;
pub use input_section::InputSection;
pub use input_section::Subsection;
pub use input_section::SubsectionId;
pub use object_file::ObjectFile;
pub use object_file::UnwindRecord;
pub use parsing::ParsedInput;
pub use symbol::SymbolName;
pub use symbol_db::Symbol;
pub use symbol_db::SymbolDb;
pub use symbol_db::SymbolState;

/// Everything downstream stages consume: the parsed per-file trees and the finalized symbol
/// table. Nothing here is written to disk; address assignment and output emission live above
/// this crate.
pub struct LinkGraph<'data> {
    /// Parsed inputs, indexed by `FileId`.
    pub files: Vec<ParsedInput<'data>>,

    pub symbols: SymbolDb<'data>,
}

/// Sets up logging based on the `RUST_LOG` environment variable. Call at most once per process.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();
}

/// Ingests the files named by `input_data`: identifies and parses every input in parallel, then
/// resolves symbols. A structural error in any input aborts the whole run - a malformed object
/// file cannot be safely partially linked.
#[tracing::instrument(skip_all, name = "Ingest")]
pub fn ingest<'data>(
    input_data: &'data InputData,
    herd: &'data Herd,
) -> error::Result<LinkGraph<'data>> {
    let inputs = input_data.input_bytes();
    ingest_bytes(&inputs, herd)
}

/// Like `ingest`, but for callers (such as the archive layer) that assemble the input list
/// themselves, including pre-extracted archive members.
pub fn ingest_bytes<'data>(
    inputs: &[InputBytes<'data>],
    herd: &'data Herd,
) -> error::Result<LinkGraph<'data>> {
    let symbols = SymbolDb::new(herd);
    let files = parsing::parse_input_files(inputs, &symbols)?;
    resolution::resolve_symbols(&files)?;
    tracing::debug!(
        num_files = files.len(),
        num_symbols = symbols.num_symbols(),
        "ingested inputs"
    );
    Ok(LinkGraph { files, symbols })
}
