//! Code for mapping input files into memory and handing their bytes to the parser. Whole files
//! are mapped here; archive members arrive pre-extracted from the archive layer above this crate
//! via `InputBytes::archive_member`.

use crate::config::Config;
use crate::error::Result;
use crate::file_kind::FileKind;
use anyhow::Context;
use anyhow::bail;
use memmap2::Mmap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

pub struct InputData {
    pub(crate) files: Vec<InputFile>,
    filenames: HashSet<PathBuf>,
}

pub struct InputFile {
    pub(crate) filename: PathBuf,
    pub(crate) kind: FileKind,
    bytes: Option<Mmap>,
}

/// Identifies an input, which may be an entry in an archive rather than a regular file.
#[derive(Clone)]
pub struct InputRef<'data> {
    pub(crate) file: &'data InputFile,

    /// The archive member name, for inputs extracted from an archive.
    pub(crate) member: Option<&'data [u8]>,
}

/// One parseable input: its bytes, provenance and the caller-assigned priority used to break
/// resolution ties. Priorities are assigned at input-discovery time, which is what makes
/// resolution deterministic under parallel parsing.
#[derive(Clone)]
pub struct InputBytes<'data> {
    pub(crate) input: InputRef<'data>,
    pub(crate) kind: FileKind,
    pub(crate) data: &'data [u8],
    pub(crate) priority: u32,
}

/// Identifies a parsed input file. This is always the index of the file in the slice passed to
/// `parse_input_files`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileId(u32);

impl InputData {
    #[tracing::instrument(skip_all, name = "Open input files")]
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut input_data = Self {
            files: Vec::new(),
            filenames: HashSet::new(),
        };
        for path in &config.inputs {
            input_data.register_input(path, config)?;
        }
        Ok(input_data)
    }

    fn register_input(&mut self, path: &Path, config: &Config) -> Result {
        if !self.filenames.insert(path.to_owned()) {
            // File has already been added.
            return Ok(());
        }

        let bytes = mmap_file(path, config.prepopulate_maps)?;

        let kind = FileKind::identify_bytes(&bytes)
            .with_context(|| format!("Failed to identify input file `{}`", path.display()))?;
        if kind == FileKind::Archive {
            bail!(
                "`{}`: archive member extraction belongs to the archive layer; pass the \
                 extracted members as inputs",
                path.display()
            );
        }

        self.files.push(InputFile {
            filename: path.to_owned(),
            kind,
            bytes: Some(bytes),
        });
        Ok(())
    }

    /// The inputs in registration order, with priorities assigned from that order.
    #[must_use]
    pub fn input_bytes(&self) -> Vec<InputBytes<'_>> {
        self.files
            .iter()
            .enumerate()
            .map(|(priority, file)| InputBytes {
                input: InputRef { file, member: None },
                kind: file.kind,
                data: file.data(),
                priority: priority as u32,
            })
            .collect()
    }
}

impl InputFile {
    pub(crate) fn data(&self) -> &[u8] {
        self.bytes.as_deref().unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn fake(filename: &str, kind: FileKind) -> InputFile {
        InputFile {
            filename: filename.into(),
            kind,
            bytes: None,
        }
    }
}

impl<'data> InputBytes<'data> {
    /// Wraps a buffer extracted from an archive by the (external) archive layer. `priority` must
    /// follow the same discovery-order numbering as the caller's other inputs.
    pub fn archive_member(
        file: &'data InputFile,
        member: &'data [u8],
        data: &'data [u8],
        priority: u32,
    ) -> Result<Self> {
        let kind = FileKind::identify_bytes(data).with_context(|| {
            format!(
                "Failed to identify `{} @ {}`",
                file.filename.display(),
                String::from_utf8_lossy(member)
            )
        })?;
        Ok(Self {
            input: InputRef {
                file,
                member: Some(member),
            },
            kind,
            data,
            priority,
        })
    }
}

pub(crate) fn mmap_file(path: &Path, prepopulate_maps: bool) -> Result<Mmap> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open input file `{}`", path.display()))?;

    let mut mmap_options = memmap2::MmapOptions::new();

    if prepopulate_maps {
        mmap_options.populate();
    }

    // Safety: This is sound only as long as nothing modifies the file while we have it mapped.
    // That's a compromise we share with other linkers - reading whole input files up front would
    // cost more than it protects against.
    let bytes = unsafe { mmap_options.map(&file) }
        .with_context(|| format!("Failed to mmap input file `{}`", path.display()))?;

    Ok(bytes)
}

impl FileId {
    pub(crate) fn new(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for InputRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.file.filename.display(), f)?;
        if let Some(member) = self.member {
            std::fmt::Display::fmt(" @ ", f)?;
            std::fmt::Display::fmt(&String::from_utf8_lossy(member), f)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for InputRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}
