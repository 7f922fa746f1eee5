//! `sbsh mount` — bind mounts, remounts, and mount composition.

use clap::{Args, Subcommand};
use sandshell_common::constants::EXIT_SUCCESS;
use sandshell_common::error::Result;
use sandshell_core::mount;
use std::path::PathBuf;

use super::fail;

/// Mount subcommands.
#[derive(Subcommand, Debug)]
pub enum MountCommand {
    /// Bind-mount a source onto a destination.
    BindMount(BindMountArgs),
    /// Remount an existing mount point with new options.
    Remount(RemountArgs),
    /// Mount a pseudo filesystem (tmpfs, proc, ...).
    MountPseudo(MountPseudoArgs),
    /// Hide paths behind empty read-only binds.
    MakeInaccessible(MakeInaccessibleArgs),
    /// Expose only the given sources under a destination, all-or-nothing.
    MakeAccessibleUnder(MakeAccessibleUnderArgs),
}

/// Arguments for `mount bind-mount`.
#[derive(Args, Debug)]
pub struct BindMountArgs {
    /// Bind submounts too (MS_REC).
    #[arg(short = 'R')]
    pub recursive: bool,

    /// Comma-separated options: rdonly, noexec, nosuid, nodev.
    #[arg(short = 'o', default_value = "")]
    pub options: String,

    /// Source path.
    pub src: PathBuf,
    /// Destination path.
    pub dest: PathBuf,
}

/// Arguments for `mount remount`.
#[derive(Args, Debug)]
pub struct RemountArgs {
    /// Apply to submounts too (MS_REC).
    #[arg(short = 'R')]
    pub recursive: bool,

    /// Comma-separated options: rdonly, noexec, nosuid, nodev.
    #[arg(short = 'o', default_value = "")]
    pub options: String,

    /// Filesystem-specific data string.
    #[arg(short = 'O')]
    pub data: Option<String>,

    /// Mount point to remount.
    pub dest: PathBuf,
}

/// Arguments for `mount mount-pseudo`.
#[derive(Args, Debug)]
pub struct MountPseudoArgs {
    /// Comma-separated options: rdonly, noexec, nosuid, nodev.
    #[arg(short = 'o', default_value = "")]
    pub options: String,

    /// Filesystem-specific data string.
    #[arg(short = 'O')]
    pub data: Option<String>,

    /// Filesystem type.
    pub fstype: String,
    /// Destination path.
    pub dest: PathBuf,
}

/// Arguments for `mount make-inaccessible`.
#[derive(Args, Debug)]
pub struct MakeInaccessibleArgs {
    /// Paths to hide.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

/// Arguments for `mount make-accessible-under`.
#[derive(Args, Debug)]
pub struct MakeAccessibleUnderArgs {
    /// Bind submounts of each source too (MS_REC).
    #[arg(short = 'R')]
    pub recursive: bool,

    /// Comma-separated options: rdonly, noexec, nosuid, nodev.
    #[arg(short = 'o', default_value = "")]
    pub options: String,

    /// Data string for the backing tmpfs (for instance `size=16m`).
    #[arg(short = 'O')]
    pub data: Option<String>,

    /// Destination the composed tree is installed at.
    pub dest: PathBuf,
    /// Source paths, each exposed under its basename.
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,
}

/// Dispatches a `mount` subcommand.
#[must_use]
pub fn execute(cmd: MountCommand) -> i32 {
    let result = match cmd {
        MountCommand::BindMount(args) => bind_mount(&args),
        MountCommand::Remount(args) => remount(&args),
        MountCommand::MountPseudo(args) => mount_pseudo(&args),
        MountCommand::MakeInaccessible(args) => mount::make_inaccessible(&args.paths),
        MountCommand::MakeAccessibleUnder(args) => make_accessible_under(&args),
    };
    match result {
        Ok(()) => EXIT_SUCCESS,
        Err(err) => fail(&err),
    }
}

fn bind_mount(args: &BindMountArgs) -> Result<()> {
    let opts = mount::parse_options(&args.options)?;
    mount::bind(&args.src, &args.dest, args.recursive, opts)
}

fn remount(args: &RemountArgs) -> Result<()> {
    let opts = mount::parse_options(&args.options)?;
    mount::remount(&args.dest, args.recursive, opts, args.data.as_deref())
}

fn mount_pseudo(args: &MountPseudoArgs) -> Result<()> {
    let opts = mount::parse_options(&args.options)?;
    mount::pseudo(&args.fstype, &args.dest, opts, args.data.as_deref())
}

fn make_accessible_under(args: &MakeAccessibleUnderArgs) -> Result<()> {
    let opts = mount::parse_options(&args.options)?;
    mount::make_accessible_under(
        &args.dest,
        &args.sources,
        args.recursive,
        opts,
        args.data.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_mount_options_exit_with_usage() {
        let cmd = MountCommand::BindMount(BindMountArgs {
            recursive: false,
            options: "rdonly,frob".into(),
            src: PathBuf::from("/tmp"),
            dest: PathBuf::from("/tmp"),
        });
        assert_eq!(execute(cmd), 2);
    }

    #[test]
    fn duplicate_sources_exit_with_usage() {
        let cmd = MountCommand::MakeAccessibleUnder(MakeAccessibleUnderArgs {
            recursive: false,
            options: String::new(),
            data: None,
            dest: PathBuf::from("/tmp"),
            sources: vec![PathBuf::from("/usr/bin"), PathBuf::from("/sbin/../bin")],
        });
        assert_eq!(execute(cmd), 2);
    }
}
