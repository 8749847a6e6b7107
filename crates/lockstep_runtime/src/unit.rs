//! Work units: one intercepted continuation each.

use lockstep_core::{SchedulerId, UnitId};
use std::any::Any;

/// Opaque argument passed to a callback
pub type Argument = Box<dyn Any + Send>;

/// Boxed error a callback may return
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result of running a callback
pub type UnitResult = Result<(), BoxError>;

/// Deferred continuation
pub type Callback = Box<dyn FnOnce(Argument) -> UnitResult + Send>;

/// Classification bits attached to a unit when it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnitFlags {
    /// The callback installs the routine context itself
    pub can_self_install_context: bool,
    /// The unit resumes a cooperative yield point
    pub is_yield_continuation: bool,
}

/// Metadata of a queued unit, readable without consuming it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitInfo {
    /// Unit id
    pub id: UnitId,
    /// Scheduler the unit was created for
    pub scheduler: SchedulerId,
    /// Classification
    pub flags: UnitFlags,
}

/// One deferred continuation with its argument and metadata.
///
/// Units are immutable; running one consumes it.
pub struct WorkUnit {
    info: UnitInfo,
    callback: Callback,
    argument: Argument,
}

impl WorkUnit {
    /// Create a unit
    #[must_use]
    pub fn new(
        id: UnitId,
        scheduler: SchedulerId,
        flags: UnitFlags,
        callback: Callback,
        argument: Argument,
    ) -> Self {
        Self {
            info: UnitInfo {
                id,
                scheduler,
                flags,
            },
            callback,
            argument,
        }
    }

    /// Unit id
    #[must_use]
    pub const fn id(&self) -> UnitId {
        self.info.id
    }

    /// Scheduler this unit is pinned to
    #[must_use]
    pub const fn scheduler(&self) -> SchedulerId {
        self.info.scheduler
    }

    /// Classification flags
    #[must_use]
    pub const fn flags(&self) -> UnitFlags {
        self.info.flags
    }

    /// Metadata snapshot
    #[must_use]
    pub const fn info(&self) -> UnitInfo {
        self.info
    }

    /// Whether this unit resumes a cooperative yield
    #[must_use]
    pub const fn is_yield_continuation(&self) -> bool {
        self.info.flags.is_yield_continuation
    }

    /// Whether the callback installs the routine context itself
    #[must_use]
    pub const fn can_self_install_context(&self) -> bool {
        self.info.flags.can_self_install_context
    }

    /// Run the callback with its argument
    ///
    /// # Errors
    ///
    /// Returns whatever the callback returns
    pub fn run(self) -> UnitResult {
        (self.callback)(self.argument)
    }
}

impl std::fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnit")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Argument for callbacks that take none
#[must_use]
pub fn no_argument() -> Argument {
    Box::new(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_flags_default() {
        let flags = UnitFlags::default();
        assert!(!flags.can_self_install_context);
        assert!(!flags.is_yield_continuation);
    }

    #[test]
    fn test_unit_passes_argument() {
        let unit = WorkUnit::new(
            UnitId::from_raw(1),
            SchedulerId::from_raw(1),
            UnitFlags::default(),
            Box::new(|arg: Argument| -> UnitResult {
                let value = arg.downcast::<u32>().map_err(|_| "wrong argument type")?;
                if *value == 7 { Ok(()) } else { Err("unexpected value".into()) }
            }),
            Box::new(7u32),
        );
        assert!(unit.run().is_ok());
    }

    #[test]
    fn test_unit_reports_callback_error() {
        let unit = WorkUnit::new(
            UnitId::from_raw(2),
            SchedulerId::from_raw(1),
            UnitFlags::default(),
            Box::new(|_: Argument| -> UnitResult { Err("nope".into()) }),
            no_argument(),
        );
        assert_eq!(unit.run().unwrap_err().to_string(), "nope");
    }

    #[test]
    fn test_unit_metadata() {
        let flags = UnitFlags {
            can_self_install_context: true,
            is_yield_continuation: true,
        };
        let unit = WorkUnit::new(
            UnitId::from_raw(9),
            SchedulerId::from_raw(4),
            flags,
            Box::new(|_: Argument| -> UnitResult { Ok(()) }),
            no_argument(),
        );
        assert_eq!(unit.id(), UnitId::from_raw(9));
        assert_eq!(unit.scheduler(), SchedulerId::from_raw(4));
        assert!(unit.is_yield_continuation());
        assert!(unit.can_self_install_context());
        assert_eq!(unit.info().flags, flags);
        assert!(format!("{unit:?}").contains("UnitId(9)"));
    }
}
