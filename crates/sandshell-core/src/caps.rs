//! Capability-set management.
//!
//! Operations act on the calling process's live capability state. The
//! traditional sets (effective, permitted, inheritable) can move in both
//! directions; the bounding set only ever shrinks, so raising into it is
//! refused up front.

use std::str::FromStr;

use caps::{CapSet, Capability, CapsHashSet};
use sandshell_common::error::{ParseError, Result, SandshellError};

/// Which groups of sets an operation acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// The traditional sets: effective, permitted, inheritable.
    Caps,
    /// The bounding set.
    Bounds,
    /// Traditional sets and the bounding set.
    Both,
}

impl Selector {
    /// Decodes a selector token (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::UnknownSymbol`] for anything but `caps`,
    /// `bounds`, or `both`.
    pub fn parse(input: &str) -> Result<Self> {
        match input.to_ascii_lowercase().as_str() {
            "caps" => Ok(Self::Caps),
            "bounds" => Ok(Self::Bounds),
            "both" => Ok(Self::Both),
            _ => Err(ParseError::UnknownSymbol {
                input: input.to_owned(),
                what: "capability selector",
            }
            .into()),
        }
    }

    fn sets(self) -> &'static [CapSet] {
        match self {
            Self::Caps => &[CapSet::Effective, CapSet::Permitted, CapSet::Inheritable],
            Self::Bounds => &[CapSet::Bounding],
            // Bounding first: dropping from it needs CAP_SETPCAP in the
            // effective set, which clearing the traditional sets removes.
            Self::Both => &[
                CapSet::Bounding,
                CapSet::Effective,
                CapSet::Permitted,
                CapSet::Inheritable,
            ],
        }
    }
}

/// Decodes a named capability set.
///
/// # Errors
///
/// Returns [`ParseError::UnknownSymbol`] for anything but `effective`,
/// `permitted`, `inheritable`, or `bounding`.
pub fn parse_set(input: &str) -> Result<CapSet> {
    match input.to_ascii_lowercase().as_str() {
        "effective" => Ok(CapSet::Effective),
        "permitted" => Ok(CapSet::Permitted),
        "inheritable" => Ok(CapSet::Inheritable),
        "bounding" => Ok(CapSet::Bounding),
        _ => Err(ParseError::UnknownSymbol {
            input: input.to_owned(),
            what: "capability set",
        }
        .into()),
    }
}

/// Decodes a capability name as in capabilities(7), without the `CAP_`
/// prefix, case-insensitive.
///
/// # Errors
///
/// Returns [`ParseError::UnknownSymbol`] for unknown names.
pub fn parse_capability(input: &str) -> Result<Capability> {
    let qualified = format!("CAP_{}", input.to_ascii_uppercase());
    Capability::from_str(&qualified).map_err(|_| {
        ParseError::UnknownSymbol {
            input: input.to_owned(),
            what: "capability",
        }
        .into()
    })
}

fn caps_err(err: caps::errors::CapsError) -> SandshellError {
    SandshellError::Capability {
        message: err.to_string(),
    }
}

/// Drops every capability in the selected sets. Idempotent.
///
/// The bounding set is cleared capability by capability, since the kernel
/// has no bulk drop for it.
///
/// # Errors
///
/// Returns [`SandshellError::Capability`] when a kernel call fails.
pub fn clear(selector: Selector) -> Result<()> {
    for set in selector.sets() {
        caps::clear(None, *set).map_err(caps_err)?;
    }
    tracing::debug!(?selector, "cleared capability sets");
    Ok(())
}

/// Raises every known capability in the selected traditional sets.
///
/// # Errors
///
/// Returns [`SandshellError::Unsupported`] when the selector includes the
/// bounding set, which cannot be raised, and
/// [`SandshellError::Capability`] when a kernel call fails.
pub fn fill(selector: Selector) -> Result<()> {
    if matches!(selector, Selector::Bounds | Selector::Both) {
        return Err(SandshellError::Unsupported {
            message: "the bounding set can only be dropped, not filled".into(),
        });
    }
    let everything: CapsHashSet = caps::all();
    for set in selector.sets() {
        caps::set(None, *set, &everything).map_err(caps_err)?;
    }
    tracing::debug!(?selector, "filled capability sets");
    Ok(())
}

/// Direction of a single-capability update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// Raise the capability.
    Add,
    /// Drop the capability.
    Drop,
}

/// Raises or drops one capability in each of the given sets.
///
/// # Errors
///
/// Returns [`SandshellError::Unsupported`] when asked to raise into the
/// bounding set, and [`SandshellError::Capability`] when a kernel call
/// fails.
pub fn update(sets: &[CapSet], direction: Update, capability: Capability) -> Result<()> {
    if sets.is_empty() {
        return Err(SandshellError::usage("no capability set selected"));
    }
    for set in sets {
        match direction {
            Update::Add => {
                if matches!(set, CapSet::Bounding) {
                    return Err(SandshellError::Unsupported {
                        message: "capabilities cannot be raised into the bounding set".into(),
                    });
                }
                caps::raise(None, *set, capability).map_err(caps_err)?;
            }
            Update::Drop => caps::drop(None, *set, capability).map_err(caps_err)?,
        }
    }
    tracing::debug!(%capability, ?direction, "updated capability");
    Ok(())
}

/// Whether the process holds one capability in one set.
///
/// # Errors
///
/// Returns [`SandshellError::Capability`] when the query fails.
pub fn has(set: CapSet, capability: Capability) -> Result<bool> {
    caps::has_cap(None, set, capability).map_err(caps_err)
}

/// How much of the selected sets the process holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// Every known capability in every selected set.
    Full,
    /// Some but not all.
    Partial,
    /// Nothing at all.
    None,
}

/// Measures how much of the selected sets the process holds.
///
/// # Errors
///
/// Returns [`SandshellError::Capability`] when reading a set fails.
pub fn coverage(selector: Selector) -> Result<Coverage> {
    let everything = caps::all();
    let mut held = 0usize;
    let mut total = 0usize;
    for set in selector.sets() {
        let current = caps::read(None, *set).map_err(caps_err)?;
        held += current.intersection(&everything).count();
        total += everything.len();
    }
    Ok(if held == 0 {
        Coverage::None
    } else if held == total {
        Coverage::Full
    } else {
        Coverage::Partial
    })
}

#[cfg(test)]
mod tests {
    use nix::unistd::Uid;

    use super::*;

    #[test]
    fn selector_tokens_decode() {
        assert_eq!(Selector::parse("caps").unwrap(), Selector::Caps);
        assert_eq!(Selector::parse("BOTH").unwrap(), Selector::Both);
        assert!(Selector::parse("all").is_err());
    }

    #[test]
    fn capability_names_decode_without_prefix() {
        assert_eq!(
            parse_capability("net_bind_service").unwrap(),
            Capability::CAP_NET_BIND_SERVICE
        );
        assert_eq!(parse_capability("CHOWN").unwrap(), Capability::CAP_CHOWN);
        assert!(parse_capability("warp_drive").is_err());
    }

    #[test]
    fn set_names_decode() {
        assert!(matches!(parse_set("effective").unwrap(), CapSet::Effective));
        assert!(matches!(parse_set("Bounding").unwrap(), CapSet::Bounding));
        assert!(parse_set("ambient_all").is_err());
    }

    #[test]
    fn fill_refuses_the_bounding_set() {
        assert!(fill(Selector::Bounds).is_err());
        assert!(fill(Selector::Both).is_err());
    }

    #[test]
    fn raising_into_the_bounding_set_is_refused() {
        let err = update(
            &[CapSet::Bounding],
            Update::Add,
            Capability::CAP_CHOWN,
        )
        .unwrap_err();
        assert!(matches!(err, SandshellError::Unsupported { .. }));
    }

    #[test]
    fn coverage_queries_succeed_for_every_selector() {
        // The answer depends on how the test runs; the query must not fail.
        for selector in [Selector::Caps, Selector::Bounds, Selector::Both] {
            let _ = coverage(selector).unwrap();
        }
    }

    #[test]
    fn has_answers_for_an_arbitrary_capability() {
        let _ = has(CapSet::Effective, Capability::CAP_CHOWN).unwrap();
    }

    // ── Live state (privileged) ──

    #[test]
    fn update_and_query_round_trip_on_the_effective_set() {
        if !Uid::effective().is_root() {
            return;
        }
        let cap = Capability::CAP_CHOWN;
        if !has(CapSet::Permitted, cap).unwrap() {
            return;
        }
        // Capabilities are per-thread, so this leaves other tests alone.
        update(&[CapSet::Effective], Update::Drop, cap).unwrap();
        assert!(!has(CapSet::Effective, cap).unwrap());
        update(&[CapSet::Effective], Update::Add, cap).unwrap();
        assert!(has(CapSet::Effective, cap).unwrap());
    }

    #[test]
    fn clearing_everything_twice_is_idempotent() {
        if !Uid::effective().is_root() {
            return;
        }
        // Run in a cloned child so the dropped state dies with it.
        let cb = Box::new(move || -> isize {
            for _ in 0..2 {
                if clear(Selector::Both).is_err() {
                    return 1;
                }
            }
            match coverage(Selector::Both) {
                Ok(Coverage::None) => 0,
                _ => 2,
            }
        });
        let mut stack = vec![0u8; 256 * 1024];
        // SAFETY: the callback only touches the child's own capability sets.
        let pid = unsafe {
            nix::sched::clone(
                cb,
                &mut stack,
                nix::sched::CloneFlags::empty(),
                Some(libc::SIGCHLD),
            )
        }
        .unwrap();
        match nix::sys::wait::waitpid(pid, None).unwrap() {
            nix::sys::wait::WaitStatus::Exited(_, code) => assert_eq!(code, 0),
            other => panic!("unexpected wait status: {other:?}"),
        }
    }
}
