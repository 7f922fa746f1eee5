//! Seccomp filter construction.
//!
//! A [`SeccompSession`] owns one filter context from construction to load
//! or export; nothing here is process-global, and dropping an unloaded
//! session discards the filter without side effects.
//!
//! Rules arrive in a textual mini-grammar:
//! `ACTION SYSCALL [CMP, CMP...]`, where each comparison reads
//! `A<index>_<width> <op> <value>` or `A<index>_<width> & <mask> == <value>`
//! with index 0..=5 and width 32 or 64. Width 32 narrows the operands to
//! the low 32 bits of the argument register.

use std::fs::File;

use libseccomp::{
    ScmpAction, ScmpArch, ScmpArgCompare, ScmpCompareOp, ScmpFilterContext, ScmpSyscall,
};
use sandshell_common::error::{ParseError, Result, SandshellError};

fn seccomp_err(err: libseccomp::error::SeccompError) -> SandshellError {
    SandshellError::Seccomp {
        message: err.to_string(),
    }
}

/// What the kernel does when a rule (or the default) matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Kill the offending thread.
    Kill,
    /// Kill the whole process.
    KillProcess,
    /// Deliver `SIGSYS`.
    Trap,
    /// Fail the call with this errno.
    Errno(i32),
    /// Allow, but log the call.
    Log,
    /// Allow the call.
    Allow,
}

impl Action {
    /// Decodes an action token (case-insensitive): `kill`, `kill_process`,
    /// `trap`, `errno(N)`, `log`, or `allow`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::UnknownSymbol`] for anything else and
    /// [`ParseError::NotANumber`] for a malformed errno value.
    pub fn parse(input: &str) -> Result<Self> {
        let lower = input.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("errno(") {
            let digits = rest.strip_suffix(')').ok_or_else(|| ParseError::UnknownSymbol {
                input: input.to_owned(),
                what: "filter action",
            })?;
            let value: i32 = digits.parse().map_err(|_| ParseError::NotANumber {
                input: digits.to_owned(),
            })?;
            return Ok(Self::Errno(value));
        }
        match lower.as_str() {
            "kill" => Ok(Self::Kill),
            "kill_process" => Ok(Self::KillProcess),
            "trap" => Ok(Self::Trap),
            "log" => Ok(Self::Log),
            "allow" => Ok(Self::Allow),
            _ => Err(ParseError::UnknownSymbol {
                input: input.to_owned(),
                what: "filter action",
            }
            .into()),
        }
    }

    fn scmp(self) -> ScmpAction {
        match self {
            Self::Kill => ScmpAction::KillThread,
            Self::KillProcess => ScmpAction::KillProcess,
            Self::Trap => ScmpAction::Trap,
            Self::Errno(value) => ScmpAction::Errno(value),
            Self::Log => ScmpAction::Log,
            Self::Allow => ScmpAction::Allow,
        }
    }
}

/// Operand width of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    /// Compare the low 32 bits.
    Bits32,
    /// Compare the full argument register.
    Bits64,
}

/// One argument comparison inside a rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    /// Argument register index, 0 through 5.
    pub index: u32,
    /// Operand width.
    pub width: Width,
    /// Comparison operator; `MaskedEqual` carries the mask.
    pub op: ScmpCompareOp,
    /// Right-hand value.
    pub value: u64,
}

impl Comparison {
    fn scmp(self) -> ScmpArgCompare {
        let narrow = |v: u64| match self.width {
            Width::Bits32 => v & u64::from(u32::MAX),
            Width::Bits64 => v,
        };
        let op = match self.op {
            ScmpCompareOp::MaskedEqual(mask) => ScmpCompareOp::MaskedEqual(narrow(mask)),
            other => other,
        };
        ScmpArgCompare::new(self.index, op, narrow(self.value))
    }
}

/// Parses one `A<index>_<width>` operand designator.
fn parse_operand(token: &str) -> Result<(u32, Width)> {
    let err = || ParseError::UnknownSymbol {
        input: token.to_owned(),
        what: "argument designator",
    };
    let rest = token.strip_prefix('A').ok_or_else(err)?;
    let (index_text, width_text) = rest.split_once('_').ok_or_else(err)?;
    let index: u32 = index_text.parse().map_err(|_| err())?;
    if index > 5 {
        return Err(ParseError::OutOfRange {
            input: token.to_owned(),
            what: "argument index",
        }
        .into());
    }
    let width = match width_text {
        "32" => Width::Bits32,
        "64" => Width::Bits64,
        _ => return Err(err().into()),
    };
    Ok((index, width))
}

fn parse_value(token: &str) -> Result<u64> {
    let parsed = if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        token.parse()
    };
    parsed.map_err(|_| {
        ParseError::NotANumber {
            input: token.to_owned(),
        }
        .into()
    })
}

fn parse_op(token: &str) -> Result<ScmpCompareOp> {
    match token {
        "<" => Ok(ScmpCompareOp::Less),
        "<=" => Ok(ScmpCompareOp::LessOrEqual),
        ">" => Ok(ScmpCompareOp::Greater),
        ">=" => Ok(ScmpCompareOp::GreaterEqual),
        "==" => Ok(ScmpCompareOp::Equal),
        "!=" => Ok(ScmpCompareOp::NotEqual),
        _ => Err(ParseError::UnknownSymbol {
            input: token.to_owned(),
            what: "comparison operator",
        }
        .into()),
    }
}

/// Parses one comparison clause.
///
/// # Errors
///
/// Returns a classified [`ParseError`] for any token that deviates from
/// the grammar.
pub fn parse_comparison(input: &str) -> Result<Comparison> {
    let tokens: Vec<&str> = input.split_whitespace().collect();
    match tokens.as_slice() {
        [operand, op, value] => {
            let (index, width) = parse_operand(operand)?;
            Ok(Comparison {
                index,
                width,
                op: parse_op(op)?,
                value: parse_value(value)?,
            })
        }
        [operand, "&", mask, "==", value] => {
            let (index, width) = parse_operand(operand)?;
            Ok(Comparison {
                index,
                width,
                op: ScmpCompareOp::MaskedEqual(parse_value(mask)?),
                value: parse_value(value)?,
            })
        }
        _ => Err(SandshellError::usage(format!(
            "malformed comparison `{input}`"
        ))),
    }
}

/// One filter rule: an action, a syscall, and optional comparisons.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Action taken when the rule matches.
    pub action: Action,
    /// Syscall name.
    pub syscall: String,
    /// Conjunction of argument comparisons; empty matches every call.
    pub comparisons: Vec<Comparison>,
}

impl Rule {
    /// Parses `ACTION SYSCALL [CMP, CMP...]`.
    ///
    /// # Errors
    ///
    /// Returns a usage error for a truncated rule and classified parse
    /// errors for bad tokens. No kernel or library state is touched.
    pub fn parse(input: &str) -> Result<Self> {
        let mut words = input.split_whitespace();
        let action_text = words
            .next()
            .ok_or_else(|| SandshellError::usage("empty rule"))?;
        let syscall = words
            .next()
            .ok_or_else(|| SandshellError::usage(format!("rule `{input}` names no syscall")))?
            .to_owned();
        let rest: Vec<&str> = words.collect();
        let comparisons = if rest.is_empty() {
            Vec::new()
        } else {
            rest.join(" ")
                .split(',')
                .map(parse_comparison)
                .collect::<Result<Vec<_>>>()?
        };
        Ok(Self {
            action: Action::parse(action_text)?,
            syscall,
            comparisons,
        })
    }
}

/// An owned, in-progress seccomp filter.
pub struct SeccompSession {
    ctx: ScmpFilterContext,
}

impl SeccompSession {
    /// Starts a session with the given default action.
    ///
    /// # Errors
    ///
    /// Returns [`SandshellError::Seccomp`] when the library cannot create
    /// a context, which is also where missing kernel support surfaces.
    pub fn new(default_action: Action) -> Result<Self> {
        let ctx = ScmpFilterContext::new_filter(default_action.scmp()).map_err(seccomp_err)?;
        Ok(Self { ctx })
    }

    /// Adds an architecture to the filter by name (`x86_64`, `aarch64`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::UnknownSymbol`] for an unknown name and
    /// [`SandshellError::Seccomp`] when the library refuses it.
    pub fn add_arch(&mut self, name: &str) -> Result<()> {
        let arch: ScmpArch = name.parse().map_err(|_| ParseError::UnknownSymbol {
            input: name.to_owned(),
            what: "architecture",
        })?;
        let _ = self.ctx.add_arch(arch).map_err(seccomp_err)?;
        Ok(())
    }

    /// Adds one rule.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::UnknownSymbol`] for an unknown syscall name
    /// and [`SandshellError::Seccomp`] when the library rejects the rule.
    pub fn add_rule(&mut self, rule: &Rule) -> Result<()> {
        let syscall = ScmpSyscall::from_name(&rule.syscall).map_err(|_| {
            ParseError::UnknownSymbol {
                input: rule.syscall.clone(),
                what: "syscall",
            }
        })?;
        let comparators: Vec<ScmpArgCompare> =
            rule.comparisons.iter().map(|c| c.scmp()).collect();
        if comparators.is_empty() {
            self.ctx
                .add_rule(rule.action.scmp(), syscall)
                .map_err(seccomp_err)?;
        } else {
            self.ctx
                .add_rule_conditional(rule.action.scmp(), syscall, &comparators)
                .map_err(seccomp_err)?;
        }
        tracing::debug!(syscall = %rule.syscall, ?rule.action, "added filter rule");
        Ok(())
    }

    /// Hints the library to sort this syscall earlier in the generated
    /// program.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::UnknownSymbol`] for an unknown syscall name
    /// and [`SandshellError::Seccomp`] when the library refuses.
    pub fn set_priority(&mut self, syscall: &str, priority: u8) -> Result<()> {
        let syscall = ScmpSyscall::from_name(syscall).map_err(|_| ParseError::UnknownSymbol {
            input: syscall.to_owned(),
            what: "syscall",
        })?;
        self.ctx
            .set_syscall_priority(syscall, priority)
            .map_err(seccomp_err)
    }

    /// Logs non-allow actions to the audit log.
    ///
    /// # Errors
    ///
    /// Returns [`SandshellError::Seccomp`] when the attribute is not
    /// supported.
    pub fn set_log(&mut self) -> Result<()> {
        self.ctx.set_ctl_log(true).map_err(seccomp_err)
    }

    /// Controls whether loading the filter also sets no-new-privs.
    ///
    /// # Errors
    ///
    /// Returns [`SandshellError::Seccomp`] when the attribute cannot be
    /// set.
    pub fn set_no_new_privs(&mut self, enabled: bool) -> Result<()> {
        self.ctx.set_ctl_nnp(enabled).map_err(seccomp_err)
    }

    /// Loads the filter into the kernel, consuming the session.
    ///
    /// # Errors
    ///
    /// Returns [`SandshellError::Seccomp`] when the load fails; the
    /// session is gone either way.
    pub fn load(self) -> Result<()> {
        self.ctx.load().map_err(seccomp_err)?;
        tracing::debug!("seccomp filter loaded");
        Ok(())
    }

    /// Writes the filter as a classic BPF program.
    ///
    /// # Errors
    ///
    /// Returns [`SandshellError::Seccomp`] when the export fails.
    pub fn export_bpf(&self, file: &mut File) -> Result<()> {
        self.ctx.export_bpf(file).map_err(seccomp_err)
    }

    /// Writes the filter in the human-readable PFC format.
    ///
    /// # Errors
    ///
    /// Returns [`SandshellError::Seccomp`] when the export fails.
    pub fn export_pfc(&self, file: &mut File) -> Result<()> {
        self.ctx.export_pfc(file).map_err(seccomp_err)
    }
}

impl std::fmt::Debug for SeccompSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeccompSession").finish_non_exhaustive()
    }
}
