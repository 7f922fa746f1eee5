//! Bind mounts, remounts, and transactional mount composition.
//!
//! The composition helpers build a scratch mount tree under `/tmp` and
//! install it with a single `MS_MOVE`, so the destination either gains the
//! whole arrangement or stays untouched. Rollback detaches lazily: a bind
//! that is busy at unwind time still disappears from the tree.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use sandshell_common::constants::SCRATCH_ROOT;
use sandshell_common::error::{ParseError, Result, SandshellError};
use tempfile::TempDir;

/// Decodes a comma-separated mount option list.
///
/// Accepted words (case-insensitive): `rdonly`, `noexec`, `nosuid`,
/// `nodev`. An empty string decodes to no flags.
///
/// # Errors
///
/// Returns [`ParseError::UnknownSymbol`] for any other word.
pub fn parse_options(input: &str) -> Result<MsFlags> {
    let mut flags = MsFlags::empty();
    for word in input.split(',').filter(|w| !w.is_empty()) {
        flags |= match word.to_ascii_lowercase().as_str() {
            "rdonly" | "ro" => MsFlags::MS_RDONLY,
            "noexec" => MsFlags::MS_NOEXEC,
            "nosuid" => MsFlags::MS_NOSUID,
            "nodev" => MsFlags::MS_NODEV,
            _ => {
                return Err(ParseError::UnknownSymbol {
                    input: word.to_owned(),
                    what: "mount option",
                }
                .into());
            }
        };
    }
    Ok(flags)
}

fn do_mount(
    source: Option<&Path>,
    target: &Path,
    fstype: Option<&str>,
    flags: MsFlags,
    data: Option<&str>,
) -> Result<()> {
    mount(source, target, fstype, flags, data).map_err(|errno| SandshellError::sys("mount", errno))
}

/// Bind-mounts `src` onto `dest`.
///
/// With `recursive`, submounts of `src` come along (`MS_REC`). Non-empty
/// `opts` trigger a second, remounting call, since the kernel ignores
/// option flags on the initial bind.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when either `mount(2)` call fails; a
/// failed remount leaves the plain bind in place.
pub fn bind(src: &Path, dest: &Path, recursive: bool, opts: MsFlags) -> Result<()> {
    let rec = if recursive {
        MsFlags::MS_REC
    } else {
        MsFlags::empty()
    };
    do_mount(Some(src), dest, None, MsFlags::MS_BIND | rec, None)?;
    if !opts.is_empty() {
        do_mount(
            None,
            dest,
            None,
            MsFlags::MS_REMOUNT | MsFlags::MS_BIND | rec | opts,
            None,
        )?;
    }
    tracing::debug!(src = %src.display(), dest = %dest.display(), "bind mounted");
    Ok(())
}

/// Remounts an existing mount point with new options.
///
/// A plain `MS_REMOUNT`, so the filesystem sees `data` (a bind remount
/// would make the kernel discard it).
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when `mount(2)` fails.
pub fn remount(dest: &Path, recursive: bool, opts: MsFlags, data: Option<&str>) -> Result<()> {
    let rec = if recursive {
        MsFlags::MS_REC
    } else {
        MsFlags::empty()
    };
    do_mount(None, dest, None, MsFlags::MS_REMOUNT | rec | opts, data)
}

/// Mounts a pseudo filesystem (tmpfs, proc, sysfs, ...) at `dest`.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`] when `mount(2)` fails.
pub fn pseudo(fstype: &str, dest: &Path, opts: MsFlags, data: Option<&str>) -> Result<()> {
    do_mount(Some(Path::new(fstype)), dest, Some(fstype), opts, data)
}

/// A scratch mount tree being assembled under [`SCRATCH_ROOT`].
///
/// Tracks exactly what has been mounted so far; dropping an unfinished
/// tree unwinds it in reverse order. `defuse_mounts` is flipped once the
/// tree has been moved away, at which point only the empty directory
/// remains to remove.
struct ScratchTree {
    dir: Option<TempDir>,
    tmpfs_mounted: bool,
    binds: Vec<PathBuf>,
    defuse_mounts: bool,
}

impl ScratchTree {
    fn create() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("sandshell-")
            .tempdir_in(SCRATCH_ROOT)
            .map_err(|err| SandshellError::io(SCRATCH_ROOT, err))?;
        Ok(Self {
            dir: Some(dir),
            tmpfs_mounted: false,
            binds: Vec::new(),
            defuse_mounts: false,
        })
    }

    fn path(&self) -> &Path {
        self.dir.as_ref().map_or(Path::new("."), TempDir::path)
    }

    fn mount_tmpfs(&mut self, data: Option<&str>) -> Result<()> {
        pseudo("tmpfs", self.path(), MsFlags::empty(), data)?;
        self.tmpfs_mounted = true;
        Ok(())
    }

    /// Removes everything this tree still owns. Unmount failures are
    /// logged and skipped so later steps still run.
    fn unwind(&mut self) {
        if !self.defuse_mounts {
            for placeholder in self.binds.drain(..).rev() {
                if let Err(errno) = umount2(&placeholder, MntFlags::MNT_DETACH) {
                    tracing::warn!(path = %placeholder.display(), %errno, "detach failed during rollback");
                }
            }
            if self.tmpfs_mounted {
                if let Err(errno) = umount2(self.path(), MntFlags::MNT_DETACH) {
                    tracing::warn!(path = %self.path().display(), %errno, "tmpfs detach failed during rollback");
                }
                self.tmpfs_mounted = false;
            }
        }
        if let Some(dir) = self.dir.take() {
            if let Err(err) = dir.close() {
                tracing::warn!(%err, "scratch directory removal failed");
            }
        }
    }
}

impl Drop for ScratchTree {
    fn drop(&mut self) {
        self.unwind();
    }
}

/// Validates composition sources and returns their basenames.
///
/// Rejects `/`, `.`, `..`, paths with an empty basename, and duplicate
/// basenames, since each source must map to a distinct placeholder.
fn source_names(sources: &[PathBuf]) -> Result<Vec<String>> {
    if sources.is_empty() {
        return Err(SandshellError::usage("no source paths given"));
    }
    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(sources.len());
    for source in sources {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| *n != "." && *n != "..")
            .ok_or_else(|| {
                SandshellError::usage(format!(
                    "`{}` has no usable basename",
                    source.display()
                ))
            })?;
        if !seen.insert(name.to_owned()) {
            return Err(SandshellError::usage(format!(
                "duplicate basename `{name}`"
            )));
        }
        names.push(name.to_owned());
    }
    Ok(names)
}

/// Exposes only the given sources under `dest`, all-or-nothing.
///
/// Builds a tmpfs in a scratch directory, creates one placeholder per
/// source (directory or empty file, matching the source), binds each
/// source onto its placeholder, remounts the scratch root with `opts` when
/// non-empty, and finally moves the whole tree onto `dest` in one
/// `MS_MOVE`. On any failure the partial tree is unwound and `dest` is
/// untouched.
///
/// # Errors
///
/// Returns a usage error for invalid source lists and
/// [`SandshellError::Sys`]/[`SandshellError::Io`] for failed kernel calls
/// or placeholder creation. The first failure wins; rollback problems are
/// logged, not returned.
pub fn make_accessible_under(
    dest: &Path,
    sources: &[PathBuf],
    recursive: bool,
    opts: MsFlags,
    data: Option<&str>,
) -> Result<()> {
    let names = source_names(sources)?;

    let mut tree = ScratchTree::create()?;
    tree.mount_tmpfs(data)?;

    for (source, name) in sources.iter().zip(&names) {
        let meta = std::fs::metadata(source).map_err(|err| SandshellError::io(source, err))?;
        let placeholder = tree.path().join(name);
        if meta.is_dir() {
            std::fs::create_dir(&placeholder)
                .map_err(|err| SandshellError::io(&placeholder, err))?;
        } else {
            drop(
                std::fs::File::create(&placeholder)
                    .map_err(|err| SandshellError::io(&placeholder, err))?,
            );
        }
        bind(source, &placeholder, recursive, MsFlags::empty())?;
        tree.binds.push(placeholder);
    }

    if !opts.is_empty() {
        // The options govern the tree itself; the per-source binds keep
        // the flags of whatever they expose.
        remount(tree.path(), false, opts, None)?;
    }

    do_mount(Some(tree.path()), dest, None, MsFlags::MS_MOVE, None)?;
    // The tree now lives at dest; only the empty scratch directory is left.
    tree.defuse_mounts = true;
    tree.unwind();
    tracing::debug!(dest = %dest.display(), count = sources.len(), "installed composed mount tree");
    Ok(())
}

/// Hides each path behind an empty read-only bind mount.
///
/// Placeholders live on a short-lived tmpfs that is detached once the
/// target binds are in place, so the scratch directory is removed on every
/// exit path. Already-covered targets are detached again if a later one
/// fails.
///
/// # Errors
///
/// Returns [`SandshellError::Sys`]/[`SandshellError::Io`] on the first
/// failing step.
pub fn make_inaccessible(paths: &[PathBuf]) -> Result<()> {
    if paths.is_empty() {
        return Err(SandshellError::usage("no paths given"));
    }

    let mut tree = ScratchTree::create()?;
    tree.mount_tmpfs(Some("mode=000"))?;

    let deny = MsFlags::MS_RDONLY | MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV;
    let mut covered: Vec<&PathBuf> = Vec::new();
    let result = (|| -> Result<()> {
        for target in paths {
            let meta = std::fs::metadata(target).map_err(|err| SandshellError::io(target, err))?;
            let placeholder = if meta.is_dir() {
                let p = tree.path().join("dir");
                if !p.exists() {
                    std::fs::create_dir(&p).map_err(|err| SandshellError::io(&p, err))?;
                }
                p
            } else {
                let p = tree.path().join("file");
                if !p.exists() {
                    drop(std::fs::File::create(&p).map_err(|err| SandshellError::io(&p, err))?);
                }
                p
            };
            bind(&placeholder, target, false, deny)?;
            covered.push(target);
        }
        Ok(())
    })();

    if result.is_err() {
        for target in covered.into_iter().rev() {
            if let Err(errno) = umount2(target, MntFlags::MNT_DETACH) {
                tracing::warn!(path = %target.display(), %errno, "detach failed during rollback");
            }
        }
    }
    // The target binds pin the tmpfs; detaching the scratch mount frees the
    // directory for removal either way.
    result
}

#[cfg(test)]
mod tests {
    use nix::unistd::Uid;

    use super::*;

    // ── Option decoding ──

    #[test]
    fn options_decode_and_combine() {
        assert_eq!(parse_options("").unwrap(), MsFlags::empty());
        assert_eq!(parse_options("rdonly").unwrap(), MsFlags::MS_RDONLY);
        assert_eq!(
            parse_options("noexec,nosuid,nodev").unwrap(),
            MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV
        );
    }

    #[test]
    fn unknown_option_words_are_rejected() {
        assert!(parse_options("relatime").is_err());
        assert!(parse_options("rdonly,bogus").is_err());
    }

    // ── Source validation ──

    #[test]
    fn sources_with_unusable_basenames_are_rejected() {
        assert!(source_names(&[PathBuf::from("/")]).is_err());
        assert!(source_names(&[PathBuf::from("/etc/..")]).is_err());
        assert!(source_names(&[]).is_err());
    }

    #[test]
    fn duplicate_basenames_are_rejected() {
        let sources = vec![PathBuf::from("/usr/bin"), PathBuf::from("/usr/local/bin")];
        assert!(source_names(&sources).is_err());
    }

    #[test]
    fn distinct_basenames_pass_validation() {
        let sources = vec![PathBuf::from("/usr/bin"), PathBuf::from("/etc")];
        assert_eq!(source_names(&sources).unwrap(), vec!["bin", "etc"]);
    }

    // ── Privileged paths ──

    #[test]
    fn composition_under_a_tmpdir_or_rollback() {
        if !Uid::effective().is_root() {
            return;
        }
        let dest = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("marker"), b"x").unwrap();

        match make_accessible_under(
            dest.path(),
            &[src.path().to_path_buf()],
            false,
            MsFlags::MS_RDONLY,
            None,
        ) {
            Ok(()) => {
                let name = src.path().file_name().unwrap();
                assert!(dest.path().join(name).join("marker").exists());
                let _ = umount2(dest.path(), MntFlags::MNT_DETACH);
            }
            // MS_MOVE fails on shared mount propagation; rollback must
            // still have cleared the destination.
            Err(_) => {
                assert_eq!(std::fs::read_dir(dest.path()).unwrap().count(), 0);
            }
        }
    }

    #[test]
    fn rdonly_composition_protects_the_tree_root() {
        if !Uid::effective().is_root() {
            return;
        }
        let dest = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("marker"), b"x").unwrap();

        match make_accessible_under(
            dest.path(),
            &[src.path().to_path_buf()],
            false,
            MsFlags::MS_RDONLY,
            None,
        ) {
            Ok(()) => {
                let err = std::fs::write(dest.path().join("intruder"), b"x").unwrap_err();
                assert_eq!(err.raw_os_error(), Some(libc::EROFS));
                let _ = umount2(dest.path(), MntFlags::MNT_DETACH);
            }
            Err(_) => {
                assert_eq!(std::fs::read_dir(dest.path()).unwrap().count(), 0);
            }
        }
    }

    #[test]
    fn remount_passes_data_through_to_the_filesystem() {
        if !Uid::effective().is_root() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        pseudo("tmpfs", dir.path(), MsFlags::empty(), Some("size=1m")).unwrap();
        remount(dir.path(), false, MsFlags::empty(), Some("size=4m")).unwrap();
        let mounts = std::fs::read_to_string("/proc/self/mounts").unwrap();
        let line = mounts
            .lines()
            .find(|l| l.contains(dir.path().to_str().unwrap()))
            .unwrap()
            .to_owned();
        let _ = umount2(dir.path(), MntFlags::MNT_DETACH);
        assert!(line.contains("size=4096k"), "{line}");
    }

    #[test]
    fn failed_composition_leaves_no_scratch_directories() {
        if !Uid::effective().is_root() {
            return;
        }
        let before = scratch_count();
        let dest = tempfile::tempdir().unwrap();
        // Nonexistent source forces a failure after the tmpfs is mounted.
        let err = make_accessible_under(
            dest.path(),
            &[PathBuf::from("/no/such/sandshell/source")],
            false,
            MsFlags::empty(),
            None,
        );
        assert!(err.is_err());
        assert_eq!(scratch_count(), before);
    }

    fn scratch_count() -> usize {
        std::fs::read_dir(SCRATCH_ROOT)
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("sandshell-"))
            .count()
    }
}
