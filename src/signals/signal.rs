//! # Signals, arguments and subscription triggers.
//!
//! A [`Signal`] is a name plus an optional, opaque [`Argument`]. Arguments are
//! type-erased but keep value equality: two arguments are equal when they hold
//! the same concrete type and that type's `PartialEq` says so.
//!
//! A [`Trigger`] describes what a subscription waits for: a signal name, an
//! optional expected argument and an optional invocation budget.
//!
//! ```rust
//! use taskherd::{Argument, Trigger};
//!
//! assert_eq!(Argument::new(5_i32), Argument::new(5_i32));
//! assert_ne!(Argument::new(5_i32), Argument::new(5_i64));
//!
//! let trig = Trigger::new("job.done").with_arg("alpha").times(2);
//! assert_eq!(trig.signal(), "job.done");
//! assert!(trig.accepts(Some(&Argument::new("alpha"))));
//! assert!(!trig.accepts(None));
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Object-safe equality over erased argument values.
trait DynArg: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn DynArg) -> bool;
}

impl<T> DynArg for T
where
    T: Any + Send + Sync + fmt::Debug + PartialEq,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn DynArg) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }
}

/// Opaque signal argument compared by value.
#[derive(Clone)]
pub struct Argument(Arc<dyn DynArg>);

impl Argument {
    /// Wraps a value.
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync + fmt::Debug + PartialEq,
    {
        Self(Arc::new(value))
    }

    /// Returns the value if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }
}

impl PartialEq for Argument {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(other.0.as_ref())
    }
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

/// One occurrence: a name and an optional argument.
///
/// Constructed at publish time and never stored by the bus.
#[derive(Clone, Debug)]
pub struct Signal {
    name: Arc<str>,
    argument: Option<Argument>,
}

impl Signal {
    /// Signal without an argument.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            argument: None,
        }
    }

    /// Signal carrying `argument`.
    pub fn with_arg<T>(name: impl Into<Arc<str>>, argument: T) -> Self
    where
        T: Any + Send + Sync + fmt::Debug + PartialEq,
    {
        Self {
            name: name.into(),
            argument: Some(Argument::new(argument)),
        }
    }

    /// Signal carrying an already-erased argument (or none).
    pub fn from_parts(name: impl Into<Arc<str>>, argument: Option<Argument>) -> Self {
        Self {
            name: name.into(),
            argument,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn argument(&self) -> Option<&Argument> {
        self.argument.as_ref()
    }
}

impl From<&str> for Signal {
    fn from(name: &str) -> Self {
        Signal::new(name)
    }
}

impl From<String> for Signal {
    fn from(name: String) -> Self {
        Signal::new(name)
    }
}

/// Argument filter of a subscription.
#[derive(Clone, Debug, Default)]
enum Expect {
    /// Fire on every publish.
    #[default]
    Any,
    /// Fire only when the published argument equals this one (`None` matches only `None`).
    Exactly(Option<Argument>),
}

/// What a subscription listens for.
///
/// `&str` and `String` convert into an unfiltered, unlimited trigger.
#[derive(Clone, Debug)]
pub struct Trigger {
    signal: String,
    expect: Expect,
    times: Option<u32>,
}

impl Trigger {
    /// Unfiltered trigger on `signal`.
    pub fn new(signal: impl Into<String>) -> Self {
        Self {
            signal: signal.into(),
            expect: Expect::Any,
            times: None,
        }
    }

    /// Only fire when the published argument equals `arg`.
    pub fn with_arg<T>(mut self, arg: T) -> Self
    where
        T: Any + Send + Sync + fmt::Debug + PartialEq,
    {
        self.expect = Expect::Exactly(Some(Argument::new(arg)));
        self
    }

    /// Only fire for publishes that carry no argument.
    pub fn without_arg(mut self) -> Self {
        self.expect = Expect::Exactly(None);
        self
    }

    /// Filter on an already-erased argument; `None` matches only argument-less publishes.
    pub fn with_expected(mut self, expected: Option<Argument>) -> Self {
        self.expect = Expect::Exactly(expected);
        self
    }

    /// Remove the subscription after `n` matching deliveries. `times(0)` never subscribes.
    pub fn times(mut self, n: u32) -> Self {
        self.times = Some(n);
        self
    }

    pub fn signal(&self) -> &str {
        &self.signal
    }

    /// Invocation budget, if any.
    pub fn limit(&self) -> Option<u32> {
        self.times
    }

    /// True when the filter is an exact-argument filter.
    pub fn is_filtered(&self) -> bool {
        matches!(self.expect, Expect::Exactly(_))
    }

    /// Applies the argument filter to a published argument.
    pub fn accepts(&self, actual: Option<&Argument>) -> bool {
        match &self.expect {
            Expect::Any => true,
            Expect::Exactly(None) => actual.is_none(),
            Expect::Exactly(Some(expected)) => actual.is_some_and(|a| a == expected),
        }
    }
}

impl From<&str> for Trigger {
    fn from(signal: &str) -> Self {
        Trigger::new(signal)
    }
}

impl From<String> for Trigger {
    fn from(signal: String) -> Self {
        Trigger::new(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_equality_by_type_and_value() {
        assert_eq!(Argument::new("a"), Argument::new("a"));
        assert_ne!(Argument::new("a"), Argument::new("b"));
        assert_ne!(Argument::new(1_u8), Argument::new(1_u16));
        assert_eq!(
            Argument::new(String::from("x")),
            Argument::new(String::from("x"))
        );
    }

    #[test]
    fn test_downcast() {
        let arg = Argument::new(42_u32);
        assert_eq!(arg.downcast_ref::<u32>(), Some(&42));
        assert!(arg.downcast_ref::<i32>().is_none());
    }

    #[test]
    fn test_unfiltered_trigger_accepts_everything() {
        let t = Trigger::from("sig");
        assert!(!t.is_filtered());
        assert!(t.accepts(None));
        assert!(t.accepts(Some(&Argument::new(1))));
    }

    #[test]
    fn test_null_only_matches_null() {
        let t = Trigger::new("sig").without_arg();
        assert!(t.accepts(None));
        assert!(!t.accepts(Some(&Argument::new(()))));

        let t = Trigger::new("sig").with_arg(7);
        assert!(!t.accepts(None));
        assert!(t.accepts(Some(&Argument::new(7))));
        assert!(!t.accepts(Some(&Argument::new(8))));
    }
}
