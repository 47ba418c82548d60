//! Symbol resolution: establishing, for every referenced name, exactly one winning definition.
//!
//! Definitions with a stronger rank overwrite definitions with a weaker rank. From strongest to
//! weakest:
//!
//!  1. A defined symbol in a regular object. The format distinguishes strong and weak
//!     definitions, but they arbitrate in the same band here; see DESIGN.md.
//!  2. A defined symbol in a dylib.
//!  3. A defined symbol in a lazily-loaded archive member.
//!  4. An unclaimed (nonexistent) symbol.
//!
//! Ties within a band break by ascending input priority. Because priority is assigned at
//! input-discovery time, the final winner is independent of the order in which parallel workers
//! deliver candidates.

use crate::error::Context as _;
use crate::error::Result;
use crate::input_section::SubsectionId;
use crate::macho;
use crate::object_file::ObjectFile;
use crate::parsing::ParsedInput;
use crate::symbol_db::SymbolState;
use anyhow::anyhow;
use macho_utils::macho::is_extern;
use macho_utils::macho::is_stab;
use macho_utils::macho::symbol_type;
use object::LittleEndian;
use object::macho::N_ABS;
use object::macho::N_SECT;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;

const OBJECT_BAND: u64 = 1;
const DYLIB_BAND: u64 = 3;
const LAZY_BAND: u64 = 5;
const UNDEFINED_BAND: u64 = 7;

/// Runs resolution over every parsed input. Regular objects (including archive members) resolve
/// first and in parallel; dylib claims run as a second phase so that object definitions are
/// already in place when libraries compete for leftover names.
#[tracing::instrument(skip_all, name = "Symbol resolution")]
pub(crate) fn resolve_symbols<'data>(files: &[ParsedInput<'data>]) -> Result {
    files.par_iter().try_for_each(|file| match file {
        ParsedInput::Object(object) => object
            .resolve_symbols(files)
            .with_context(|| format!("Failed to resolve symbols in {object}")),
        ParsedInput::Dylib(_) => Ok(()),
    })?;

    files.par_iter().for_each(|file| {
        if let ParsedInput::Dylib(dylib) = file {
            dylib.resolve_symbols(files);
        }
    });

    Ok(())
}

/// Lower ranks win. Ranks order first by band, then by input priority within the band.
fn rank(band: u64, priority: u32) -> u64 {
    (band << 32) | u64::from(priority)
}

/// The rank of a symbol's current owner, derived from its stored state. `files` must be the
/// slice resolution is running over, since `FileId`s index into it.
fn incumbent_rank(state: &SymbolState, files: &[ParsedInput]) -> u64 {
    let Some(file_id) = state.file else {
        return rank(UNDEFINED_BAND, 0);
    };
    let file = &files[file_id.as_usize()];
    let band = if state.is_lazy {
        LAZY_BAND
    } else if file.is_dylib() {
        DYLIB_BAND
    } else {
        OBJECT_BAND
    };
    rank(band, file.priority())
}

impl<'data> ObjectFile<'data> {
    /// Offers every defined symbol-table entry of this file as a candidate definition. Inputs
    /// extracted from an archive compete in the lazy band; the overwrite logic is otherwise
    /// identical.
    pub(crate) fn resolve_symbols(&self, files: &[ParsedInput<'data>]) -> Result {
        let lazy = self.input.member.is_some();
        let band = if lazy { LAZY_BAND } else { OBJECT_BAND };
        let candidate_rank = rank(band, self.priority);

        for (msym, &symbol) in self.mach_syms.iter().zip(&self.syms) {
            if is_stab(msym.n_type) {
                continue;
            }
            let (subsection, value) = match symbol_type(msym.n_type) {
                N_ABS => (None, msym.n_value.get(LittleEndian)),
                N_SECT => {
                    let (subsection, within) = self.resolve_defined(msym)?;
                    (Some(subsection), within)
                }
                // Undefined and indirect entries are references, not definitions; they never
                // overwrite.
                _ => continue,
            };

            let mut state = symbol.lock();
            if candidate_rank < incumbent_rank(&state, files) {
                *state = SymbolState {
                    file: Some(self.file_id),
                    subsection,
                    value,
                    is_extern: is_extern(msym.n_type),
                    is_lazy: lazy,
                };
            }
        }
        Ok(())
    }

    fn resolve_defined(&self, msym: &macho::Nlist) -> Result<(SubsectionId, u64)> {
        let address = msym.n_value.get(LittleEndian);
        self.resolve_section_address(u32::from(msym.n_sect), address)
            .ok_or_else(|| {
                anyhow!(
                    "symbol address {address:#x} doesn't resolve within section {}",
                    msym.n_sect
                )
            })
    }
}

impl<'data> crate::dylib::DylibFile<'data> {
    /// Claims each exported name through the same rank comparison as object resolution, in the
    /// dylib band: a dylib never displaces a regular-object definition, beats lazily-loaded
    /// archive definitions, and among dylibs the one discovered earlier wins. Never errors: a
    /// name nobody defines simply stays undefined for a later stage to report.
    pub(crate) fn resolve_symbols(&self, files: &[ParsedInput<'data>]) {
        let candidate_rank = rank(DYLIB_BAND, self.priority);
        for &symbol in &self.syms {
            let mut state = symbol.lock();
            if candidate_rank < incumbent_rank(&state, files) {
                *state = SymbolState {
                    file: Some(self.file_id),
                    subsection: None,
                    value: 0,
                    is_extern: true,
                    is_lazy: false,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_kind::FileKind;
    use crate::input_data::InputBytes;
    use crate::input_data::InputFile;
    use crate::symbol_db::SymbolDb;
    use crate::test_utils::TestObject;
    use crate::test_utils::TestSection;
    use crate::test_utils::TestSymbol;
    use bumpalo_herd::Herd;
    use object::macho::N_EXT;
    use std::collections::HashMap;

    fn defining_object(name: &'static str) -> Vec<u8> {
        TestObject {
            sections: vec![TestSection::text(0x1000, vec![0x90; 16])],
            symbols: vec![TestSymbol {
                name,
                n_type: N_SECT | N_EXT,
                n_sect: 1,
                value: 0x1000,
            }],
            ..TestObject::default()
        }
        .build()
    }

    fn tbd_exporting(names: &[&str]) -> Vec<u8> {
        format!(
            "--- !tapi-tbd\n\
             tbd-version: 4\n\
             install-name: /usr/lib/libtest.dylib\n\
             exports:\n\
               - symbols: [ {} ]\n\
             ...\n",
            names.join(", ")
        )
        .into_bytes()
    }

    fn parse_and_resolve<'data>(
        inputs: &[InputBytes<'data>],
        symbol_db: &SymbolDb<'data>,
    ) -> Vec<ParsedInput<'data>> {
        let files = crate::parsing::parse_input_files(inputs, symbol_db).unwrap();
        resolve_symbols(&files).unwrap();
        files
    }

    #[test]
    fn strong_object_beats_dylib_and_archive_member() {
        let herd = Herd::new();
        let symbol_db = SymbolDb::new(&herd);

        let dylib_file = InputFile::fake("libdup.tbd", FileKind::Tapi);
        let dylib_bytes = tbd_exporting(&["_dup"]);
        let archive_file = InputFile::fake("libdup.a", FileKind::MachObject);
        let member_bytes = defining_object("_dup");
        let object_file = InputFile::fake("dup.o", FileKind::MachObject);
        let object_bytes = defining_object("_dup");

        // The object is discovered last (largest priority) and listed last, yet its band wins.
        let inputs = [
            crate::test_utils::input(&dylib_file, &dylib_bytes, 0),
            InputBytes::archive_member(&archive_file, b"dup.o", &member_bytes, 1).unwrap(),
            crate::test_utils::input(&object_file, &object_bytes, 2),
        ];
        let files = parse_and_resolve(&inputs, &symbol_db);

        let state = symbol_db.get(b"_dup").unwrap().state();
        assert_eq!(state.file, Some(files[2].file_id()));
        assert!(!state.is_lazy);
    }

    #[test]
    fn same_band_ties_break_by_priority_not_list_order() {
        let herd = Herd::new();
        let symbol_db = SymbolDb::new(&herd);

        let file_a = InputFile::fake("a.o", FileKind::MachObject);
        let bytes_a = defining_object("_dup");
        let file_b = InputFile::fake("b.o", FileKind::MachObject);
        let bytes_b = defining_object("_dup");

        // b.o is listed first but was discovered later (priority 7 vs 3).
        let inputs = [
            crate::test_utils::input(&file_b, &bytes_b, 7),
            crate::test_utils::input(&file_a, &bytes_a, 3),
        ];
        let files = parse_and_resolve(&inputs, &symbol_db);

        let state = symbol_db.get(b"_dup").unwrap().state();
        assert_eq!(state.file, Some(files[1].file_id()));
    }

    #[test]
    fn archive_member_loses_to_regular_object_despite_earlier_priority() {
        let herd = Herd::new();
        let symbol_db = SymbolDb::new(&herd);

        let archive_file = InputFile::fake("libx.a", FileKind::MachObject);
        let member_bytes = defining_object("_x");
        let object_file = InputFile::fake("x.o", FileKind::MachObject);
        let object_bytes = defining_object("_x");

        let inputs = [
            InputBytes::archive_member(&archive_file, b"x.o", &member_bytes, 0).unwrap(),
            crate::test_utils::input(&object_file, &object_bytes, 1),
        ];
        let files = parse_and_resolve(&inputs, &symbol_db);

        let state = symbol_db.get(b"_x").unwrap().state();
        assert_eq!(state.file, Some(files[1].file_id()));
        assert!(!state.is_lazy);
    }

    #[test]
    fn archive_member_wins_when_nothing_else_defines() {
        let herd = Herd::new();
        let symbol_db = SymbolDb::new(&herd);

        let archive_file = InputFile::fake("liby.a", FileKind::MachObject);
        let member_bytes = defining_object("_y");
        let inputs = [InputBytes::archive_member(&archive_file, b"y.o", &member_bytes, 0).unwrap()];
        let files = parse_and_resolve(&inputs, &symbol_db);

        let state = symbol_db.get(b"_y").unwrap().state();
        assert_eq!(state.file, Some(files[0].file_id()));
        assert!(state.is_lazy);
    }

    #[test]
    fn dylib_does_not_displace_earlier_object() {
        let herd = Herd::new();
        let symbol_db = SymbolDb::new(&herd);

        let object_file = InputFile::fake("foo.o", FileKind::MachObject);
        let object_bytes = defining_object("_foo");
        let dylib_file = InputFile::fake("libfoo.tbd", FileKind::Tapi);
        let dylib_bytes = tbd_exporting(&["_foo", "_bar"]);

        let inputs = [
            crate::test_utils::input(&object_file, &object_bytes, 0),
            crate::test_utils::input(&dylib_file, &dylib_bytes, 1),
        ];
        let files = parse_and_resolve(&inputs, &symbol_db);

        let foo = symbol_db.get(b"_foo").unwrap().state();
        assert_eq!(foo.file, Some(files[0].file_id()));
        assert!(foo.subsection.is_some());

        // A name nothing else defines is claimed by the dylib.
        let bar = symbol_db.get(b"_bar").unwrap().state();
        assert_eq!(bar.file, Some(files[1].file_id()));
        assert!(bar.is_extern);
        assert_eq!(bar.subsection, None);
    }

    #[test]
    fn earlier_dylib_beats_later_dylib() {
        let herd = Herd::new();
        let symbol_db = SymbolDb::new(&herd);

        let dylib_a = InputFile::fake("liba.tbd", FileKind::Tapi);
        let bytes_a = tbd_exporting(&["_baz"]);
        let dylib_b = InputFile::fake("libb.tbd", FileKind::Tapi);
        let bytes_b = tbd_exporting(&["_baz"]);

        let inputs = [
            crate::test_utils::input(&dylib_a, &bytes_a, 0),
            crate::test_utils::input(&dylib_b, &bytes_b, 1),
        ];
        let files = parse_and_resolve(&inputs, &symbol_db);

        let state = symbol_db.get(b"_baz").unwrap().state();
        assert_eq!(state.file, Some(files[0].file_id()));
    }

    #[test]
    fn dylib_beats_lazy_archive_member() {
        let herd = Herd::new();
        let symbol_db = SymbolDb::new(&herd);

        let archive_file = InputFile::fake("libz.a", FileKind::MachObject);
        let member_bytes = defining_object("_z");
        let dylib_file = InputFile::fake("libz.tbd", FileKind::Tapi);
        let dylib_bytes = tbd_exporting(&["_z"]);

        let inputs = [
            InputBytes::archive_member(&archive_file, b"z.o", &member_bytes, 0).unwrap(),
            crate::test_utils::input(&dylib_file, &dylib_bytes, 1),
        ];
        let files = parse_and_resolve(&inputs, &symbol_db);

        let state = symbol_db.get(b"_z").unwrap().state();
        assert_eq!(state.file, Some(files[1].file_id()));
        assert!(!state.is_lazy);
    }

    #[test]
    fn absolute_symbols_install_raw_value_and_no_subsection() {
        let herd = Herd::new();
        let symbol_db = SymbolDb::new(&herd);

        let file = InputFile::fake("abs.o", FileKind::MachObject);
        let bytes = TestObject {
            symbols: vec![TestSymbol {
                name: "_abs",
                n_type: N_ABS | N_EXT,
                n_sect: 0,
                value: 0xdead_beef,
            }],
            ..TestObject::default()
        }
        .build();

        let inputs = [crate::test_utils::input(&file, &bytes, 0)];
        parse_and_resolve(&inputs, &symbol_db);

        let state = symbol_db.get(b"_abs").unwrap().state();
        assert_eq!(state.subsection, None);
        assert_eq!(state.value, 0xdead_beef);
        assert!(state.is_extern);
    }

    #[test]
    fn resolution_is_idempotent() {
        let herd = Herd::new();
        let symbol_db = SymbolDb::new(&herd);

        let object_file = InputFile::fake("a.o", FileKind::MachObject);
        let object_bytes = defining_object("_dup");
        let archive_file = InputFile::fake("lib.a", FileKind::MachObject);
        let member_bytes = defining_object("_dup");
        let dylib_file = InputFile::fake("lib.tbd", FileKind::Tapi);
        let dylib_bytes = tbd_exporting(&["_dup", "_only_dylib"]);

        let inputs = [
            crate::test_utils::input(&object_file, &object_bytes, 0),
            InputBytes::archive_member(&archive_file, b"m.o", &member_bytes, 1).unwrap(),
            crate::test_utils::input(&dylib_file, &dylib_bytes, 2),
        ];
        let files = crate::parsing::parse_input_files(&inputs, &symbol_db).unwrap();

        let snapshot = |symbol_db: &SymbolDb| {
            let mut states = HashMap::new();
            symbol_db.for_each_symbol(|symbol| {
                states.insert(symbol.name().bytes().to_vec(), symbol.state());
            });
            states
        };

        resolve_symbols(&files).unwrap();
        let first = snapshot(&symbol_db);
        resolve_symbols(&files).unwrap();
        let second = snapshot(&symbol_db);
        assert_eq!(first, second);
    }
}
