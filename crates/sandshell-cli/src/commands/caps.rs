//! `sbsh caps` — capability-set management.
//!
//! All operations act on live kernel state; there is nothing to apply or
//! commit afterwards.

use caps::CapSet;
use clap::{Args, Subcommand};
use sandshell_common::constants::EXIT_SUCCESS;
use sandshell_common::error::Result;
use sandshell_core::caps::{self as capops, Coverage, Selector, Update};
use sandshell_core::process;

use super::{fail, fail_with, launcher_fail};

/// Capability subcommands.
#[derive(Subcommand, Debug)]
pub enum CapsCommand {
    /// Drop everything in the selected sets.
    CapClear(SelectorArgs),
    /// Raise every known capability in the selected traditional sets.
    CapFill(SelectorArgs),
    /// Raise or drop one capability in chosen sets.
    CapUpdate(CapUpdateArgs),
    /// Test one capability in one set (exit 0 has, 1 lacks).
    CapHas(CapHasArgs),
    /// Measure the selected sets (exit 0 full, 3 partial, 4 none).
    CapHasSet(SelectorArgs),
}

/// Arguments carrying just a set selector.
#[derive(Args, Debug)]
pub struct SelectorArgs {
    /// Which sets: `caps`, `bounds`, or `both`.
    pub selector: String,

    /// Program to exec afterwards, with its arguments.
    #[arg(last = true)]
    pub command: Vec<String>,
}

/// Arguments for `caps cap-update`.
#[derive(Args, Debug)]
pub struct CapUpdateArgs {
    /// Act on the effective set.
    #[arg(short = 'E')]
    pub effective: bool,
    /// Act on the permitted set.
    #[arg(short = 'P')]
    pub permitted: bool,
    /// Act on the inheritable set.
    #[arg(short = 'I')]
    pub inheritable: bool,
    /// Act on the bounding set (drop only).
    #[arg(short = 'B')]
    pub bounding: bool,

    /// Direction: `add` or `drop`.
    pub direction: String,
    /// Capability name without the CAP_ prefix, case-insensitive.
    pub capability: String,

    /// Program to exec afterwards, with its arguments.
    #[arg(last = true)]
    pub command: Vec<String>,
}

/// Arguments for `caps cap-has`.
#[derive(Args, Debug)]
pub struct CapHasArgs {
    /// Set name: effective, permitted, inheritable, bounding.
    pub set: String,
    /// Capability name without the CAP_ prefix.
    pub capability: String,
}

/// Dispatches a `caps` subcommand.
#[must_use]
pub fn execute(cmd: CapsCommand) -> i32 {
    match cmd {
        CapsCommand::CapClear(args) => mutate(&args, capops::clear),
        CapsCommand::CapFill(args) => mutate(&args, capops::fill),
        CapsCommand::CapUpdate(args) => cap_update(&args),
        CapsCommand::CapHas(args) => cap_has(&args),
        CapsCommand::CapHasSet(args) => cap_has_set(&args),
    }
}

fn maybe_exec(command: &[String]) -> Result<i32> {
    if command.is_empty() {
        return Ok(EXIT_SUCCESS);
    }
    let never = process::exec(command)?;
    match never {}
}

fn mutate(args: &SelectorArgs, op: fn(Selector) -> Result<()>) -> i32 {
    let result = (|| -> Result<i32> {
        op(Selector::parse(&args.selector)?)?;
        maybe_exec(&args.command)
    })();
    result.unwrap_or_else(|err| launcher_fail(&err))
}

fn cap_update(args: &CapUpdateArgs) -> i32 {
    let result = (|| -> Result<i32> {
        let mut sets: Vec<CapSet> = Vec::new();
        if args.effective {
            sets.push(CapSet::Effective);
        }
        if args.permitted {
            sets.push(CapSet::Permitted);
        }
        if args.inheritable {
            sets.push(CapSet::Inheritable);
        }
        if args.bounding {
            sets.push(CapSet::Bounding);
        }
        let direction = match args.direction.as_str() {
            "add" => Update::Add,
            "drop" => Update::Drop,
            other => {
                return Err(sandshell_common::error::SandshellError::usage(format!(
                    "direction must be `add` or `drop`, not `{other}`"
                )));
            }
        };
        let capability = capops::parse_capability(&args.capability)?;
        capops::update(&sets, direction, capability)?;
        maybe_exec(&args.command)
    })();
    result.unwrap_or_else(|err| launcher_fail(&err))
}

fn cap_has(args: &CapHasArgs) -> i32 {
    let result = (|| -> Result<bool> {
        let set = capops::parse_set(&args.set)?;
        let capability = capops::parse_capability(&args.capability)?;
        capops::has(set, capability)
    })();
    match result {
        Ok(true) => EXIT_SUCCESS,
        Ok(false) => 1,
        Err(err) if err.is_usage() => fail(&err),
        Err(err) => fail_with(&err, 3),
    }
}

fn cap_has_set(args: &SelectorArgs) -> i32 {
    let result = (|| -> Result<Coverage> {
        capops::coverage(Selector::parse(&args.selector)?)
    })();
    match result {
        Ok(Coverage::Full) => EXIT_SUCCESS,
        Ok(Coverage::Partial) => 3,
        Ok(Coverage::None) => 4,
        Err(err) => fail(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_has_answers_without_failing() {
        let args = CapHasArgs {
            set: "effective".into(),
            capability: "chown".into(),
        };
        let code = cap_has(&args);
        assert!(code == 0 || code == 1);
    }

    #[test]
    fn cap_has_bad_set_is_usage() {
        let args = CapHasArgs {
            set: "ambient_all".into(),
            capability: "chown".into(),
        };
        assert_eq!(cap_has(&args), 2);
    }

    #[test]
    fn cap_has_set_reports_coverage_codes() {
        let args = SelectorArgs {
            selector: "caps".into(),
            command: Vec::new(),
        };
        let code = cap_has_set(&args);
        assert!(code == 0 || code == 3 || code == 4);
    }

    #[test]
    fn cap_update_rejects_bad_directions() {
        let args = CapUpdateArgs {
            effective: true,
            permitted: false,
            inheritable: false,
            bounding: false,
            direction: "toggle".into(),
            capability: "chown".into(),
            command: Vec::new(),
        };
        assert_eq!(cap_update(&args), 2);
    }
}
