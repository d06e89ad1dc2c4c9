//! Split-DWARF delegation.
//!
//! A unit that names a `.dwo` companion is resolved by a nested
//! [`DwarfResolver`] opened on that file. The nested resolver keeps only the
//! skeleton's [`DieRef`] as context and never delegates again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use gimli::constants;
use tracing::{debug, trace};

use super::line_table::LineTables;
use super::DwarfResolver;
use crate::config::ResolverConfig;
use crate::dwarf::{DebugInfoAccess, DieRef};
use crate::error::TraceResult;
use crate::types::{FrameWithInlines, ObjectFrame};

/// Companion path named by the unit rooted at `root`, if it is split.
///
/// Covers both `DW_TAG_skeleton_unit` and full units carrying the GNU
/// extension attribute. A relative name with no `DW_AT_comp_dir` cannot be
/// located and yields `None`.
pub(crate) fn companion_path<A: DebugInfoAccess>(access: &A, root: DieRef) -> TraceResult<Option<PathBuf>>
{
    let name = match access.string_attr(root, constants::DW_AT_dwo_name)? {
        Some(name) => Some(name),
        None => access.string_attr(root, constants::DW_AT_GNU_dwo_name)?,
    };
    let Some(name) = name else {
        if access.tag(root)? == constants::DW_TAG_skeleton_unit {
            debug!(unit = root.unit.0, "skeleton unit without a companion name");
        }
        return Ok(None);
    };

    let name = PathBuf::from(name);
    if name.is_absolute() {
        return Ok(Some(name));
    }
    match access.string_attr(root, constants::DW_AT_comp_dir)? {
        Some(dir) => Ok(Some(Path::new(&dir).join(name))),
        None => {
            debug!(unit = root.unit.0, name = %name.display(), "relative companion name without comp_dir");
            Ok(None)
        }
    }
}

/// Nested resolvers keyed by the skeleton unit that spawned them.
pub(crate) struct SplitResolvers<A: DebugInfoAccess>
{
    children: HashMap<DieRef, Option<DwarfResolver<A>>>,
}

impl<A: DebugInfoAccess> Default for SplitResolvers<A>
{
    fn default() -> Self
    {
        Self {
            children: HashMap::new(),
        }
    }
}

impl<A: DebugInfoAccess> SplitResolvers<A>
{
    /// Resolve `frame` through the companion of `skeleton`.
    ///
    /// `Ok(None)` means the companion exists but carries no debug info, and
    /// the caller should fall back to the skeleton itself. Open failures are
    /// returned and not remembered, so a later query retries the file.
    pub(crate) fn resolve(
        &mut self,
        parent: &A,
        parent_lines: &mut LineTables,
        skeleton: DieRef,
        path: &Path,
        config: ResolverConfig,
        frame: &ObjectFrame,
    ) -> TraceResult<Option<FrameWithInlines>>
    {
        if !config.cache_mode.retains_tables() {
            let Some(mut child) = open_child(parent, skeleton, path, config)? else {
                return Ok(None);
            };
            return child.resolve_split(frame, parent, skeleton, parent_lines).map(Some);
        }

        if !self.children.contains_key(&skeleton) {
            let child = open_child(parent, skeleton, path, config)?;
            self.children.insert(skeleton, child);
        } else {
            trace!(?skeleton, "reusing split resolver");
        }
        match self.children.get_mut(&skeleton) {
            Some(Some(child)) => child.resolve_split(frame, parent, skeleton, parent_lines).map(Some),
            _ => Ok(None),
        }
    }

    /// Number of cached nested resolvers.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize
    {
        self.children.len()
    }
}

fn open_child<A: DebugInfoAccess>(
    parent: &A,
    skeleton: DieRef,
    path: &Path,
    config: ResolverConfig,
) -> TraceResult<Option<DwarfResolver<A>>>
{
    let access = parent.open_split_unit(skeleton.unit, path)?;
    debug!(path = %path.display(), found = access.is_some(), "opened split companion");
    Ok(access.map(|access| DwarfResolver::from_access(path, Some(access), config)))
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::dwarf::synthetic::SyntheticDebugInfo;

    #[test]
    fn test_companion_path_variants()
    {
        let mut info = SyntheticDebugInfo::new("/bin/app");
        let plain = info.add_unit(5);

        let skeleton = info.add_unit(5);
        info.set_tag(skeleton, constants::DW_TAG_skeleton_unit);
        info.set_string(skeleton, constants::DW_AT_dwo_name, "obj/a.dwo");
        info.set_string(skeleton, constants::DW_AT_comp_dir, "/build");

        let gnu = info.add_unit(4);
        info.set_string(gnu, constants::DW_AT_GNU_dwo_name, "/abs/b.dwo");

        let orphan = info.add_unit(5);
        info.set_tag(orphan, constants::DW_TAG_skeleton_unit);
        info.set_string(orphan, constants::DW_AT_dwo_name, "c.dwo");

        assert_eq!(companion_path(&info, plain).unwrap(), None);
        assert_eq!(companion_path(&info, skeleton).unwrap(), Some(PathBuf::from("/build/obj/a.dwo")));
        assert_eq!(companion_path(&info, gnu).unwrap(), Some(PathBuf::from("/abs/b.dwo")));
        assert_eq!(companion_path(&info, orphan).unwrap(), None);
    }
}
